use log::debug;

use sharding_common::common::Result;

use crate::discovery::database::ShardingRule;
use crate::parser::sql::{SQLStatementContext, StatementType};
use crate::route::condition::ShardingConditions;
use crate::route::RouteContext;

pub mod broadcast;
pub mod complex;
pub mod standard;

/// Routing strategies, picked once per statement.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteEngine {
    /// Every data source, no table rewriting.
    DatabaseBroadcast,
    /// Every actual node of the given tables.
    TableBroadcast(Vec<String>),
    /// One data source per distinct database url.
    DataSourceGroupBroadcast,
    /// One data source per database instance.
    InstanceBroadcast,
    /// Any single node holding every table.
    Unicast(Vec<String>),
    DefaultDataSource(Vec<String>),
    Standard(String),
    Complex(Vec<String>),
}

impl RouteEngine {
    pub fn select(ctx: &SQLStatementContext, rule: &ShardingRule) -> RouteEngine {
        let tables = ctx.table_names();
        match ctx.statement_type {
            StatementType::Tcl => RouteEngine::DatabaseBroadcast,
            StatementType::Ddl if tables.is_empty() => RouteEngine::DatabaseBroadcast,
            StatementType::Ddl => RouteEngine::TableBroadcast(tables),
            StatementType::Dal if tables.is_empty() => RouteEngine::DataSourceGroupBroadcast,
            StatementType::Dal => RouteEngine::Unicast(tables),
            StatementType::Dcl if tables.len() == 1 && rule.is_rule_table(&tables[0]) => RouteEngine::TableBroadcast(tables),
            StatementType::Dcl => RouteEngine::InstanceBroadcast,
            StatementType::Select | StatementType::Insert | StatementType::Update | StatementType::Delete => {
                Self::select_dml(ctx, rule, tables)
            }
        }
    }

    fn select_dml(ctx: &SQLStatementContext, rule: &ShardingRule, tables: Vec<String>) -> RouteEngine {
        if rule.default_data_source.is_some() && tables.iter().all(|t| !rule.is_rule_table(t)) {
            return RouteEngine::DefaultDataSource(tables);
        }
        if rule.is_all_broadcast_tables(&tables) {
            return if ctx.statement_type == StatementType::Select {
                RouteEngine::Unicast(tables)
            } else {
                RouteEngine::TableBroadcast(tables)
            };
        }
        let sharding_tables = rule.sharding_table_names(&tables);
        match sharding_tables.len() {
            0 if rule.default_data_source.is_some() => RouteEngine::DefaultDataSource(tables),
            0 => RouteEngine::Unicast(tables),
            1 => RouteEngine::Standard(sharding_tables[0].clone()),
            _ => RouteEngine::Complex(sharding_tables),
        }
    }

    pub fn route(&self, ctx: &SQLStatementContext, rule: &ShardingRule, conditions: &ShardingConditions) -> Result<RouteContext> {
        debug!("route `{}` with {:?}", ctx.sql, self);
        match self {
            RouteEngine::DatabaseBroadcast => Ok(broadcast::database_broadcast(rule)),
            RouteEngine::TableBroadcast(tables) => broadcast::table_broadcast(rule, tables),
            RouteEngine::DataSourceGroupBroadcast => Ok(broadcast::data_source_group_broadcast(rule)),
            RouteEngine::InstanceBroadcast => Ok(broadcast::instance_broadcast(rule)),
            RouteEngine::Unicast(tables) => broadcast::unicast(rule, tables),
            RouteEngine::DefaultDataSource(tables) => broadcast::default_data_source(rule, tables),
            RouteEngine::Standard(table) => standard::route(ctx, rule, table, conditions),
            RouteEngine::Complex(tables) => complex::route(ctx, rule, tables, conditions),
        }
    }
}

/// Picks the engine for the statement and routes it.
pub fn route(ctx: &SQLStatementContext, rule: &ShardingRule, conditions: &ShardingConditions) -> Result<RouteContext> {
    RouteEngine::select(ctx, rule).route(ctx, rule, conditions)
}
