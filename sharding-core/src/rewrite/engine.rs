// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use indexmap::IndexMap;
use log::debug;

use sharding_common::common::{Error, Result};

use crate::discovery::database::ShardingRule;
use crate::parser::sql::{ParameterMarkerType, SQLStatementContext, StatementType};
use crate::rewrite::builder::sql::build_sql;
use crate::rewrite::token::SQLToken;
use crate::rewrite::translator::{translate, SQLTranslator};
use crate::rewrite::{SQLRewriteContext, SQLRewriteUnit};
use crate::route::RouteUnit;

const UNION_ALL: &str = " UNION ALL ";

/// One rewrite for every target, rendered without a route unit.
pub struct GenericSQLRewriteEngine;

impl GenericSQLRewriteEngine {
    pub fn rewrite(rw: &SQLRewriteContext<'_>) -> Result<SQLRewriteUnit> {
        let sql = build_sql(&rw.ctx.sql, &rw.tokens, None)?;
        let parameters = rw.parameter_builder.build(None, &rw.tokens, &rw.route_context.original_data_nodes);
        Ok(SQLRewriteUnit { sql, parameters })
    }

    /// The generic unit translated for each route unit's data source.
    pub fn rewrite_units(rw: &SQLRewriteContext<'_>, translator: Option<&dyn SQLTranslator>) -> Result<IndexMap<RouteUnit, SQLRewriteUnit>> {
        let generic = Self::rewrite(rw)?;
        let mut result = IndexMap::with_capacity(rw.route_context.route_units.len());
        for unit in &rw.route_context.route_units {
            let data_source = unit.data_source_name();
            let translated = translate(translator, generic.clone(), rw.ctx, rw.rule.database_type(data_source), data_source);
            result.insert(unit.clone(), translated);
        }
        Ok(result)
    }
}

/// Per unit rewrite. Units sharing a data source are merged with UNION ALL
/// when the statement allows it.
pub struct RouteSQLRewriteEngine;

impl RouteSQLRewriteEngine {
    pub fn rewrite(rw: &SQLRewriteContext<'_>, translator: Option<&dyn SQLTranslator>) -> Result<IndexMap<RouteUnit, SQLRewriteUnit>> {
        let mut result = IndexMap::with_capacity(rw.route_context.route_units.len());
        for (data_source, units) in rw.route_context.units_by_data_source() {
            let storage_type = rw.rule.database_type(data_source);
            if is_aggregatable(rw.ctx, rw.rule, &rw.tokens, &units) {
                let merged = build_union_all(rw, &units)?;
                debug!("merged {} units of {} into one statement", units.len(), data_source);
                if let Some(first) = units.first() {
                    result.insert((*first).clone(), translate(translator, merged, rw.ctx, storage_type, data_source));
                }
                continue;
            }
            for unit in units {
                let rewritten = build_unit(rw, unit)?;
                result.insert(unit.clone(), translate(translator, rewritten, rw.ctx, storage_type, data_source));
            }
        }
        Ok(result)
    }
}

fn build_unit(rw: &SQLRewriteContext<'_>, unit: &RouteUnit) -> Result<SQLRewriteUnit> {
    let sql = build_sql(&rw.ctx.sql, &rw.tokens, Some(unit))?;
    let parameters = rw.parameter_builder.build(Some(unit), &rw.tokens, &rw.route_context.original_data_nodes);
    Ok(SQLRewriteUnit { sql, parameters })
}

/// A plain SELECT over several units of one storage type. `$n` markers are
/// shared by every fragment, so their filtered parameters must agree.
pub fn is_aggregatable(ctx: &SQLStatementContext, rule: &ShardingRule, tokens: &[SQLToken], units: &[&RouteUnit]) -> bool {
    if ctx.statement_type != StatementType::Select || units.len() < 2 {
        return false;
    }
    let select = match &ctx.select {
        Some(select) => select,
        None => return false,
    };
    if ctx.contains_subquery || ctx.contains_join || select.order_by || select.group_by || select.pagination.is_some() || select.lock || select.union {
        return false;
    }
    let storage_type = rule.database_type(units[0].data_source_name());
    if units.iter().any(|u| rule.database_type(u.data_source_name()) != storage_type) {
        return false;
    }
    if ctx.parameter_marker_type == ParameterMarkerType::Dollar {
        let removed = |unit: &RouteUnit| {
            let mut indices: Vec<usize> = tokens.iter().flat_map(|t| t.removed_parameter_indices(unit)).collect();
            indices.sort_unstable();
            indices.dedup();
            indices
        };
        let first = removed(units[0]);
        return units.iter().skip(1).all(|u| removed(*u) == first);
    }
    true
}

/// `?` fragments each consume their own parameters; `$n` fragments share the
/// first fragment's.
pub fn build_union_all(rw: &SQLRewriteContext<'_>, units: &[&RouteUnit]) -> Result<SQLRewriteUnit> {
    if !is_aggregatable(rw.ctx, rw.rule, &rw.tokens, units) {
        return Err(Error::UnsupportedConstruct(format!("statement cannot be merged with UNION ALL: {}", rw.ctx.sql)));
    }
    let mut fragments = Vec::with_capacity(units.len());
    let mut parameters = vec![];
    // a trailing `;` or line comment would end the merged statement early
    let statement = &rw.ctx.sql[..rw.ctx.stop];
    for (index, unit) in units.iter().copied().enumerate() {
        fragments.push(build_sql(statement, &rw.tokens, Some(unit))?);
        if index == 0 || rw.ctx.parameter_marker_type == ParameterMarkerType::Question {
            parameters.extend(rw.parameter_builder.build(Some(unit), &rw.tokens, &rw.route_context.original_data_nodes));
        }
    }
    Ok(SQLRewriteUnit { sql: fragments.join(UNION_ALL), parameters })
}
