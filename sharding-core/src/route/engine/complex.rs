use indexmap::IndexSet;
use log::debug;

use sharding_common::common::{Error, Result};

use crate::discovery::database::ShardingRule;
use crate::parser::sql::SQLStatementContext;
use crate::route::condition::ShardingConditions;
use crate::route::engine::standard::{broadcast_mappers, find_table_rule, route_conditions};
use crate::route::{RouteContext, RouteMapper, RouteUnit};

/// Routes a statement over several sharding tables. Tables of one binding
/// group follow the route of the first one by actual table index; other
/// combinations are only accepted when every table resolves to a single node
/// of the same data source.
pub fn route(ctx: &SQLStatementContext, rule: &ShardingRule, logic_tables: &[String], conditions: &ShardingConditions) -> Result<RouteContext> {
    let broadcast_tables = broadcast_mappers(ctx, rule);
    if rule.is_all_binding_tables(logic_tables) {
        return route_binding(rule, logic_tables, conditions, &broadcast_tables);
    }

    let mut mappers = vec![];
    let mut data_source: Option<String> = None;
    for logic_table in logic_tables {
        let table_rule = find_table_rule(rule, logic_table)?;
        let nodes = route_conditions(table_rule, conditions, &[logic_table.as_str()])?;
        let node = match nodes.get_index(0) {
            Some(node) if nodes.len() == 1 => node,
            _ => {
                return Err(Error::UnsupportedConstruct(format!(
                    "{:?} are not bound to each other and {} routes to {} data nodes",
                    logic_tables,
                    logic_table,
                    nodes.len()
                )))
            }
        };
        match &data_source {
            Some(ds) if *ds != node.data_source => {
                return Err(Error::UnsupportedConstruct(format!(
                    "{:?} are not bound to each other and route to data sources {} and {}",
                    logic_tables, ds, node.data_source
                )))
            }
            _ => data_source = Some(node.data_source.clone()),
        }
        mappers.push(RouteMapper::new(&table_rule.logic_table, &node.table));
    }
    debug!("unicast fallback for unbound tables {:?}", logic_tables);
    mappers.extend(broadcast_tables);
    let mut units = IndexSet::new();
    if let Some(ds) = data_source {
        units.insert(RouteUnit::new(&ds, mappers));
    }
    Ok(RouteContext::new(units))
}

fn route_binding(rule: &ShardingRule, logic_tables: &[String], conditions: &ShardingConditions, broadcast_tables: &[RouteMapper]) -> Result<RouteContext> {
    let primary = find_table_rule(rule, &logic_tables[0])?;
    // bound tables share sharding columns, so any member's condition applies
    let condition_tables: Vec<&str> = logic_tables.iter().map(|t| t.as_str()).collect();
    let nodes = route_conditions(primary, conditions, &condition_tables)?;

    let mut units = IndexSet::new();
    for node in &nodes {
        let index = primary.find_actual_table_index(&node.data_source, &node.table).ok_or_else(|| {
            Error::Configuration(format!("{} is not an actual table of {}", node, primary.logic_table))
        })?;
        let mut mappers = vec![RouteMapper::new(&primary.logic_table, &node.table)];
        for logic_table in &logic_tables[1..] {
            let table_rule = find_table_rule(rule, logic_table)?;
            let actual_tables = table_rule.actual_tables(&node.data_source);
            let actual_table = actual_tables.get(index).ok_or_else(|| {
                Error::Configuration(format!("binding table {} has no actual table {} in {}", logic_table, index, node.data_source))
            })?;
            mappers.push(RouteMapper::new(&table_rule.logic_table, actual_table));
        }
        mappers.extend(broadcast_tables.iter().cloned());
        units.insert(RouteUnit::new(&node.data_source, mappers));
    }
    Ok(RouteContext::new(units))
}
