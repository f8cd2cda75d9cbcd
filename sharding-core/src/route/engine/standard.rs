use indexmap::{IndexMap, IndexSet};
use log::debug;

use sharding_common::common::{Error, Result};

use crate::algorithm::{ComplexKeysShardingValue, PreciseShardingValue, RangeShardingValue, ShardingAlgorithm};
use crate::discovery::database::{DataNode, ShardingRule, ShardingStrategy, TableRule};
use crate::parser::sql::SQLStatementContext;
use crate::route::condition::{ShardingConditionGroup, ShardingConditions, ShardingValues};
use crate::route::{RouteContext, RouteMapper, RouteUnit};

/// Routes a statement touching exactly one sharding table.
pub fn route(ctx: &SQLStatementContext, rule: &ShardingRule, logic_table: &str, conditions: &ShardingConditions) -> Result<RouteContext> {
    let table_rule = find_table_rule(rule, logic_table)?;
    let broadcast_tables = broadcast_mappers(ctx, rule);
    let unit_of = |node: &DataNode| {
        let mut mappers = vec![RouteMapper::new(&table_rule.logic_table, &node.table)];
        mappers.extend(broadcast_tables.iter().cloned());
        RouteUnit::new(&node.data_source, mappers)
    };

    if let Some(insert) = &ctx.insert {
        if insert.insert_select {
            return Err(Error::UnsupportedConstruct(format!("INSERT ... SELECT into sharding table {}", logic_table)));
        }
        let mut route_context = RouteContext::default();
        for group in &conditions.groups {
            let nodes = route_data_nodes(table_rule, Some(group), &[logic_table])?;
            let node = match nodes.get_index(0) {
                Some(node) if nodes.len() == 1 => node.clone(),
                _ => {
                    return Err(Error::UnsupportedConstruct(format!(
                        "an inserted row of {} routes to {} data nodes",
                        logic_table,
                        nodes.len()
                    )))
                }
            };
            route_context.route_units.insert(unit_of(&node));
            route_context.original_data_nodes.push(vec![node]);
        }
        return Ok(route_context);
    }

    let nodes = route_conditions(table_rule, conditions, &[logic_table])?;
    Ok(RouteContext::new(nodes.iter().map(unit_of).collect()))
}

pub(crate) fn find_table_rule<'a>(rule: &'a ShardingRule, logic_table: &str) -> Result<&'a TableRule> {
    rule.find_table_rule(logic_table)
        .ok_or_else(|| Error::Configuration(format!("no sharding rule for table {}", logic_table)))
}

/// Identity mappers for the broadcast tables a statement references.
pub(crate) fn broadcast_mappers(ctx: &SQLStatementContext, rule: &ShardingRule) -> Vec<RouteMapper> {
    ctx.table_names().iter().filter(|t| rule.is_broadcast_table(t)).map(|t| RouteMapper::identity(t)).collect()
}

/// Data nodes of a table across all OR groups. `condition_tables` lists the
/// tables whose conditions may drive this table's strategies.
pub(crate) fn route_conditions(table_rule: &TableRule, conditions: &ShardingConditions, condition_tables: &[&str]) -> Result<IndexSet<DataNode>> {
    if conditions.is_empty() {
        return route_data_nodes(table_rule, None, condition_tables);
    }
    let mut nodes = IndexSet::new();
    for group in conditions.groups.iter().filter(|g| !g.always_false) {
        nodes.extend(route_data_nodes(table_rule, Some(group), condition_tables)?);
    }
    if nodes.is_empty() {
        // no row can match, any single node answers
        debug!("no data node of {} can match, route to the first one", table_rule.logic_table);
        if let Some(node) = table_rule.actual_data_nodes.first() {
            nodes.insert(node.clone());
        }
    }
    Ok(nodes)
}

/// Database and table strategies applied independently, then combined.
pub(crate) fn route_data_nodes(
    table_rule: &TableRule,
    group: Option<&ShardingConditionGroup>,
    condition_tables: &[&str],
) -> Result<IndexSet<DataNode>> {
    let data_sources = shard(table_rule, table_rule.database_strategy.as_ref(), &table_rule.data_source_names(), group, condition_tables)?;
    let mut nodes = IndexSet::new();
    for data_source in &data_sources {
        let tables = shard(table_rule, table_rule.table_strategy.as_ref(), &table_rule.actual_tables(data_source), group, condition_tables)?;
        for table in tables {
            nodes.insert(DataNode { data_source: data_source.clone(), table });
        }
    }
    Ok(nodes)
}

fn shard(
    table_rule: &TableRule,
    strategy: Option<&ShardingStrategy>,
    available: &[String],
    group: Option<&ShardingConditionGroup>,
    condition_tables: &[&str],
) -> Result<Vec<String>> {
    let find = |column: &str| group.and_then(|g| condition_tables.iter().find_map(|t| g.find(t, column)));
    match strategy {
        None => Ok(available.to_vec()),
        Some(ShardingStrategy::Standard { column, algorithm }) => match find(column) {
            Some(condition) => shard_standard(table_rule, column, algorithm.as_ref(), available, &condition.values),
            None => Ok(available.to_vec()),
        },
        Some(ShardingStrategy::Complex { columns, algorithm }) => {
            let mut value =
                ComplexKeysShardingValue { logic_table: &table_rule.logic_table, column_values: IndexMap::new(), column_ranges: IndexMap::new() };
            for column in columns {
                match find(column).map(|c| &c.values) {
                    Some(ShardingValues::List(values)) => {
                        value.column_values.insert(column.as_str(), &values[..]);
                    }
                    Some(ShardingValues::Range(range)) => {
                        value.column_ranges.insert(column.as_str(), range);
                    }
                    // an unconstrained column cannot narrow anything
                    None => return Ok(available.to_vec()),
                }
            }
            let targets = algorithm.do_sharding(available, &value)?;
            Ok(available.iter().filter(|a| targets.contains(*a)).cloned().collect())
        }
    }
}

fn shard_standard(
    table_rule: &TableRule,
    column: &str,
    algorithm: &dyn ShardingAlgorithm,
    available: &[String],
    values: &ShardingValues,
) -> Result<Vec<String>> {
    match values {
        ShardingValues::List(values) => {
            let mut targets = IndexSet::new();
            for value in values {
                let sharding_value = PreciseShardingValue { logic_table: &table_rule.logic_table, column, value };
                match algorithm.precise_match(available, &sharding_value)? {
                    Some(target) => {
                        targets.insert(target);
                    }
                    None => {
                        return Err(Error::Algorithm(format!(
                            "no target of {} in {:?} accepts {} = {}",
                            table_rule.logic_table, available, column, value
                        )))
                    }
                }
            }
            Ok(available.iter().filter(|a| targets.contains(*a)).cloned().collect())
        }
        ShardingValues::Range(range) => {
            let sharding_value = RangeShardingValue { logic_table: &table_rule.logic_table, column, range };
            algorithm.range_match(available, &sharding_value)
        }
    }
}

#[cfg(test)]
mod tests {
    use sharding_common::common::Error;

    use crate::discovery::database::ShardingRule;
    use crate::handler::generated_key::GeneratedKeyContext;
    use crate::parser::sql::analyse::analyse;
    use crate::route::condition::extract;
    use crate::route::engine::route;
    use crate::route::RouteContext;
    use crate::value::Value;

    fn route_sql(sql: &str, parameters: &[Value]) -> sharding_common::common::Result<RouteContext> {
        route_with("./etc/sharding.yaml", sql, parameters)
    }

    fn route_with(config_file: &str, sql: &str, parameters: &[Value]) -> sharding_common::common::Result<RouteContext> {
        let rule = ShardingRule::from_file(config_file).unwrap();
        let ctx = analyse(sql).unwrap();
        let generated_key = GeneratedKeyContext::create(&ctx, &rule);
        let conditions = extract(&ctx, &rule, parameters, generated_key.as_ref());
        route(&ctx, &rule, &conditions)
    }

    fn targets(route_context: &RouteContext) -> Vec<String> {
        route_context
            .route_units
            .iter()
            .map(|u| format!("{}.{}", u.data_source_name(), u.actual_table_name("t_order").unwrap_or("-")))
            .collect()
    }

    #[test]
    fn test_precise_route() {
        let route_context = route_sql("SELECT * FROM t_order WHERE user_id = ? AND order_id = ?", &[Value::Int(1), Value::Int(2)]).unwrap();
        assert_eq!(vec!["ds_1.t_order_0"], targets(&route_context));
    }

    #[test]
    fn test_unbound_routes_everywhere() {
        let route_context = route_sql("SELECT * FROM t_order WHERE status = 'init'", &[]).unwrap();
        assert_eq!(vec!["ds_0.t_order_0", "ds_0.t_order_1", "ds_1.t_order_0", "ds_1.t_order_1"], targets(&route_context));

        let route_context = route_sql("SELECT * FROM t_order WHERE user_id = 4", &[]).unwrap();
        assert_eq!(vec!["ds_0.t_order_0", "ds_0.t_order_1"], targets(&route_context));
    }

    #[test]
    fn test_in_and_or() {
        let route_context = route_sql("SELECT * FROM t_order WHERE user_id = 1 AND order_id IN (1, 3, 5)", &[]).unwrap();
        assert_eq!(vec!["ds_1.t_order_1"], targets(&route_context));
        let route_context = route_sql("SELECT * FROM t_order WHERE (user_id = 1 AND order_id = 2) OR (user_id = 2 AND order_id = 2)", &[]).unwrap();
        assert_eq!(vec!["ds_1.t_order_0", "ds_0.t_order_0"], targets(&route_context));
    }

    #[test]
    fn test_always_false_routes_once() {
        let route_context = route_sql("SELECT * FROM t_order WHERE order_id = 1 AND order_id = 2", &[]).unwrap();
        assert_eq!(1, route_context.route_units.len());
    }

    #[test]
    fn test_inverted_range_routes_once() {
        let route_context = route_sql("SELECT COUNT(*) FROM t_order WHERE order_id BETWEEN 5 AND 1", &[]).unwrap();
        assert_eq!(vec!["ds_0.t_order_0"], targets(&route_context));
        let route_context = route_sql("SELECT * FROM t_order WHERE order_id > ? AND order_id < ?", &[Value::Int(5), Value::Int(3)]).unwrap();
        assert_eq!(1, route_context.route_units.len());
    }

    #[test]
    fn test_extreme_range_routes_everywhere() {
        let route_context =
            route_sql("SELECT * FROM t_order WHERE user_id = 1 AND order_id BETWEEN ? AND ?", &[Value::Int(i64::MIN), Value::Int(i64::MAX)])
                .unwrap();
        assert_eq!(vec!["ds_1.t_order_0", "ds_1.t_order_1"], targets(&route_context));
    }

    #[test]
    fn test_complex_strategy() {
        let complex = |sql: &str| targets(&route_with("./etc/sharding-complex.yaml", sql, &[]).unwrap());
        assert_eq!(vec!["ds_1.t_order_1"], complex("SELECT * FROM t_order WHERE user_id = 1 AND order_id = 2"));
        assert_eq!(vec!["ds_1.t_order_1"], complex("SELECT * FROM t_order WHERE user_id = 1 AND order_id IN (2, 4)"));
        assert_eq!(vec!["ds_1.t_order_0", "ds_1.t_order_1"], complex("SELECT * FROM t_order WHERE user_id = 1 AND order_id IN (2, 3)"));
        assert_eq!(vec!["ds_1.t_order_0", "ds_1.t_order_1"], complex("SELECT * FROM t_order WHERE user_id = 1"));
        assert_eq!(vec!["ds_1.t_order_0", "ds_1.t_order_1"], complex("SELECT * FROM t_order WHERE user_id = 1 AND order_id > 3"));
        assert_eq!(vec!["ds_0.t_order_1"], complex("INSERT INTO t_order (user_id, order_id) VALUES (2, 3)"));
    }

    #[test]
    fn test_broadcast_table_mapper() {
        let route_context = route_sql("SELECT * FROM t_order o JOIN t_config c ON o.status = c.k WHERE o.user_id = 0 AND o.order_id = 1", &[]).unwrap();
        let unit = route_context.route_units.get_index(0).unwrap();
        assert_eq!(Some("t_order_1"), unit.actual_table_name("t_order"));
        assert_eq!(Some("t_config"), unit.actual_table_name("t_config"));
    }

    #[test]
    fn test_insert_rows() {
        let route_context = route_sql(
            "INSERT INTO t_order (user_id, order_id) VALUES (?, ?), (?, ?)",
            &[Value::Int(1), Value::Int(1), Value::Int(2), Value::Int(2)],
        )
        .unwrap();
        assert_eq!(vec!["ds_1.t_order_1", "ds_0.t_order_0"], targets(&route_context));
        assert_eq!(2, route_context.original_data_nodes.len());
        assert_eq!("t_order_0", route_context.original_data_nodes[1][0].table);

        // the generated order_id fixes the table, user_id the data source
        let route_context = route_sql("INSERT INTO t_order (user_id, status) VALUES (1, 'a')", &[]).unwrap();
        assert_eq!(1, route_context.route_units.len());
        assert_eq!("ds_1", route_context.route_units.get_index(0).unwrap().data_source_name());
    }

    #[test]
    fn test_insert_row_to_many_nodes_rejected() {
        let err = route_sql("INSERT INTO t_order_item (item_id, status) VALUES (1, 'a')", &[]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedConstruct(_)));
    }

    #[test]
    fn test_precise_value_without_target() {
        let err = route_sql("SELECT * FROM t_order WHERE user_id = NULL", &[]).unwrap_err();
        assert!(matches!(err, Error::Algorithm(_)));
    }
}
