//! Decides which physical data sources and tables execute a statement.

use indexmap::{IndexMap, IndexSet};

use crate::discovery::database::DataNode;

pub mod condition;
pub mod engine;

/// Logic name to actual name, for a data source or a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteMapper {
    pub logic_name: String,
    pub actual_name: String,
}

impl RouteMapper {
    pub fn new(logic_name: &str, actual_name: &str) -> Self {
        RouteMapper { logic_name: logic_name.to_string(), actual_name: actual_name.to_string() }
    }

    pub fn identity(name: &str) -> Self {
        RouteMapper::new(name, name)
    }
}

/// One physical target of a logic statement. Immutable once routed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteUnit {
    pub data_source_mapper: RouteMapper,
    pub table_mappers: Vec<RouteMapper>,
}

impl RouteUnit {
    pub fn new(data_source: &str, table_mappers: Vec<RouteMapper>) -> Self {
        RouteUnit { data_source_mapper: RouteMapper::identity(data_source), table_mappers }
    }

    pub fn data_source_name(&self) -> &str {
        &self.data_source_mapper.actual_name
    }

    pub fn find_table_mapper(&self, logic_table: &str) -> Option<&RouteMapper> {
        self.table_mappers.iter().find(|m| m.logic_name.eq_ignore_ascii_case(logic_table))
    }

    pub fn actual_table_name(&self, logic_table: &str) -> Option<&str> {
        self.find_table_mapper(logic_table).map(|m| m.actual_name.as_str())
    }

    pub fn logic_table_names(&self) -> Vec<&str> {
        self.table_mappers.iter().map(|m| m.logic_name.as_str()).collect()
    }

    /// The unit executes against this data node.
    pub fn contains_node(&self, node: &DataNode) -> bool {
        self.data_source_name() == node.data_source
            && self.table_mappers.iter().any(|m| m.actual_name.eq_ignore_ascii_case(&node.table))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RouteContext {
    pub route_units: IndexSet<RouteUnit>,
    /// Data nodes of every INSERT value row, in row order.
    pub original_data_nodes: Vec<Vec<DataNode>>,
}

impl RouteContext {
    pub fn new(route_units: IndexSet<RouteUnit>) -> Self {
        RouteContext { route_units, original_data_nodes: vec![] }
    }

    pub fn is_single_route(&self) -> bool {
        self.route_units.len() == 1
    }

    pub fn actual_data_source_names(&self) -> Vec<&str> {
        let names: IndexSet<&str> = self.route_units.iter().map(|u| u.data_source_name()).collect();
        names.into_iter().collect()
    }

    /// Units grouped by the data source they execute on, in routing order.
    pub fn units_by_data_source(&self) -> IndexMap<&str, Vec<&RouteUnit>> {
        let mut groups: IndexMap<&str, Vec<&RouteUnit>> = IndexMap::new();
        for unit in &self.route_units {
            groups.entry(unit.data_source_name()).or_default().push(unit);
        }
        groups
    }

    pub fn actual_table_names(&self, logic_table: &str) -> Vec<&str> {
        self.route_units.iter().filter_map(|u| u.actual_table_name(logic_table)).collect()
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexSet;

    use crate::discovery::database::DataNode;
    use crate::route::{RouteContext, RouteMapper, RouteUnit};

    #[test]
    fn test_route_units_dedup_and_grouping() {
        let mut units = IndexSet::new();
        units.insert(RouteUnit::new("ds_0", vec![RouteMapper::new("t_order", "t_order_0")]));
        units.insert(RouteUnit::new("ds_1", vec![RouteMapper::new("t_order", "t_order_0")]));
        units.insert(RouteUnit::new("ds_0", vec![RouteMapper::new("t_order", "t_order_1")]));
        units.insert(RouteUnit::new("ds_0", vec![RouteMapper::new("t_order", "t_order_0")]));
        let ctx = RouteContext::new(units);
        assert_eq!(3, ctx.route_units.len());
        assert_eq!(vec!["ds_0", "ds_1"], ctx.actual_data_source_names());
        let groups = ctx.units_by_data_source();
        assert_eq!(2, groups["ds_0"].len());
        assert_eq!(vec!["t_order_0", "t_order_0", "t_order_1"], ctx.actual_table_names("T_ORDER"));
        assert!(ctx.route_units.get_index(0).unwrap().contains_node(&DataNode::new("ds_0", "t_order_0")));
        assert!(!ctx.route_units.get_index(0).unwrap().contains_node(&DataNode::new("ds_1", "t_order_0")));
    }
}
