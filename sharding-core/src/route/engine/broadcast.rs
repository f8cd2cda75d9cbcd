use indexmap::{IndexMap, IndexSet};

use sharding_common::common::{Error, Result};

use crate::discovery::database::ShardingRule;
use crate::route::{RouteContext, RouteMapper, RouteUnit};

pub fn database_broadcast(rule: &ShardingRule) -> RouteContext {
    RouteContext::new(rule.data_sources.keys().map(|ds| RouteUnit::new(ds, vec![])).collect())
}

/// Every actual node of every table. Tables without sharding rule keep their
/// name in every data source.
pub fn table_broadcast(rule: &ShardingRule, logic_tables: &[String]) -> Result<RouteContext> {
    let mut units = IndexSet::new();
    for logic_table in logic_tables {
        match rule.find_table_rule(logic_table) {
            Some(table_rule) => {
                for node in &table_rule.actual_data_nodes {
                    units.insert(RouteUnit::new(&node.data_source, vec![RouteMapper::new(&table_rule.logic_table, &node.table)]));
                }
            }
            None => {
                for ds in rule.data_sources.keys() {
                    units.insert(RouteUnit::new(ds, vec![RouteMapper::identity(logic_table)]));
                }
            }
        }
    }
    Ok(RouteContext::new(units))
}

/// Data sources declared twice with the same url execute once.
pub fn data_source_group_broadcast(rule: &ShardingRule) -> RouteContext {
    let mut groups: IndexMap<&str, &str> = IndexMap::new();
    for (name, ds) in &rule.data_sources {
        groups.entry(ds.url.as_str()).or_insert(name.as_str());
    }
    RouteContext::new(groups.values().map(|ds| RouteUnit::new(ds, vec![])).collect())
}

pub fn instance_broadcast(rule: &ShardingRule) -> RouteContext {
    RouteContext::new(
        rule.data_source_instances()
            .values()
            .filter_map(|names| names.first())
            .map(|ds| RouteUnit::new(ds, vec![]))
            .collect(),
    )
}

/// A single node: the first data source, in declaration order, holding every
/// table. Sharding tables use their first actual table there.
pub fn unicast(rule: &ShardingRule, logic_tables: &[String]) -> Result<RouteContext> {
    let holds = |ds: &str, logic_table: &str| match rule.find_table_rule(logic_table) {
        Some(table_rule) => !table_rule.actual_tables(ds).is_empty(),
        None if rule.is_broadcast_table(logic_table) => true,
        None => rule.default_data_source.as_ref().map_or(true, |d| d == ds),
    };
    let data_source = rule
        .data_sources
        .keys()
        .find(|ds| logic_tables.iter().all(|t| holds(ds.as_str(), t.as_str())))
        .or_else(|| rule.data_sources.keys().next())
        .ok_or_else(|| Error::Configuration("no data source configured".to_string()))?;

    let mappers = logic_tables
        .iter()
        .filter_map(|t| match rule.find_table_rule(t) {
            Some(table_rule) => table_rule.actual_tables(data_source).first().map(|a| RouteMapper::new(&table_rule.logic_table, a)),
            None => Some(RouteMapper::identity(t)),
        })
        .collect();
    let mut units = IndexSet::new();
    units.insert(RouteUnit::new(data_source, mappers));
    Ok(RouteContext::new(units))
}

pub fn default_data_source(rule: &ShardingRule, logic_tables: &[String]) -> Result<RouteContext> {
    let data_source = rule
        .default_data_source
        .as_ref()
        .ok_or_else(|| Error::Configuration("no default data source configured".to_string()))?;
    let mut units = IndexSet::new();
    units.insert(RouteUnit::new(data_source, logic_tables.iter().map(|t| RouteMapper::identity(t)).collect()));
    Ok(RouteContext::new(units))
}

#[cfg(test)]
mod tests {
    use crate::discovery::database::ShardingRule;
    use crate::parser::sql::analyse::analyse;
    use crate::route::condition::extract;
    use crate::route::engine::route;
    use crate::route::RouteContext;

    fn route_sql(sql: &str) -> RouteContext {
        let rule = ShardingRule::from_file("./etc/sharding.yaml").unwrap();
        let ctx = analyse(sql).unwrap();
        let conditions = extract(&ctx, &rule, &[], None);
        route(&ctx, &rule, &conditions).unwrap()
    }

    fn data_sources(route_context: &RouteContext) -> Vec<&str> {
        route_context.route_units.iter().map(|u| u.data_source_name()).collect()
    }

    #[test]
    fn test_database_broadcast() {
        let route_context = route_sql("BEGIN");
        assert_eq!(vec!["ds_0", "ds_1"], data_sources(&route_context));
        assert!(route_context.route_units.iter().all(|u| u.table_mappers.is_empty()));
    }

    #[test]
    fn test_table_broadcast() {
        let route_context = route_sql("ALTER TABLE t_order ADD COLUMN memo VARCHAR(10)");
        assert_eq!(4, route_context.route_units.len());
        let route_context = route_sql("DELETE FROM t_config WHERE k = 'a'");
        assert_eq!(vec!["ds_0", "ds_1"], data_sources(&route_context));
        assert_eq!(Some("t_config"), route_context.route_units.get_index(1).unwrap().actual_table_name("t_config"));
    }

    #[test]
    fn test_group_and_instance_broadcast() {
        assert_eq!(vec!["ds_0", "ds_1"], data_sources(&route_sql("SHOW DATABASES")));
        // both data sources live on 127.0.0.1:3306
        assert_eq!(vec!["ds_0"], data_sources(&route_sql("CREATE USER u")));
    }

    #[test]
    fn test_unicast() {
        let route_context = route_sql("SHOW COLUMNS FROM t_order");
        assert_eq!(1, route_context.route_units.len());
        let unit = route_context.route_units.get_index(0).unwrap();
        assert_eq!("ds_0", unit.data_source_name());
        assert_eq!(Some("t_order_0"), unit.actual_table_name("t_order"));

        let route_context = route_sql("SELECT * FROM t_config");
        assert_eq!(1, route_context.route_units.len());
    }

    #[test]
    fn test_default_data_source() {
        let route_context = route_sql("SELECT * FROM t_user u WHERE u.id = 1");
        assert_eq!(vec!["ds_0"], data_sources(&route_context));
        let route_context = route_sql("SELECT 1");
        assert_eq!(vec!["ds_0"], data_sources(&route_context));
    }
}
