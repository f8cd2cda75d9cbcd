use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use log::debug;

use sharding_common::common::{Error, Result};
use sharding_common::config::{DataSourceConfig, DatabaseType, DisStrategy, Props, ShardingConfig};

use crate::algorithm::keygen::{create_key_generator, KeyGenerator};
use crate::algorithm::{create_algorithm, create_complex_algorithm, ComplexKeysShardingAlgorithm, ShardingAlgorithm};
use crate::discovery::inline;
use crate::value::Value;

lazy_static! {
    static ref SHARDING_RULE_ID_GENERATOR: AtomicU64 = AtomicU64::new(1);
}

pub fn sharding_rule_id() -> u64 {
    SHARDING_RULE_ID_GENERATOR.fetch_add(1, Ordering::SeqCst)
}

/// One physical table in one data source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataNode {
    pub data_source: String,
    pub table: String,
}

impl DataNode {
    pub fn new(data_source: &str, table: &str) -> Self {
        DataNode { data_source: data_source.to_string(), table: table.to_string() }
    }

    /// `ds_0.t_order_0`
    pub fn parse(node: &str) -> Result<Self> {
        let mut parts = node.trim().splitn(2, '.');
        match (parts.next(), parts.next()) {
            (Some(ds), Some(table)) if !ds.is_empty() && !table.is_empty() => Ok(DataNode::new(ds, table)),
            _ => Err(Error::Configuration(format!("invalid data node `{}`, expect data_source.table", node))),
        }
    }
}

impl fmt::Display for DataNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.data_source, self.table)
    }
}

#[derive(Debug, Clone)]
pub enum ShardingStrategy {
    Standard { column: String, algorithm: Arc<dyn ShardingAlgorithm> },
    /// Several columns handed to one algorithm together.
    Complex { columns: Vec<String>, algorithm: Arc<dyn ComplexKeysShardingAlgorithm> },
}

impl ShardingStrategy {
    fn new(config: &DisStrategy) -> Result<Self> {
        match (config.dis_key.is_empty(), config.dis_keys.is_empty()) {
            (false, true) => Ok(ShardingStrategy::Standard {
                column: config.dis_key.clone(),
                algorithm: create_algorithm(&config.dis_algorithm)?,
            }),
            (true, false) => Ok(ShardingStrategy::Complex {
                columns: config.dis_keys.clone(),
                algorithm: create_complex_algorithm(&config.dis_algorithm)?,
            }),
            (true, true) => Err(Error::Configuration("sharding strategy requires dis_key or dis_keys".to_string())),
            (false, false) => Err(Error::Configuration(format!(
                "dis_key `{}` and dis_keys {:?} cannot be combined",
                config.dis_key, config.dis_keys
            ))),
        }
    }

    pub fn columns(&self) -> Vec<&str> {
        match self {
            ShardingStrategy::Standard { column, .. } => vec![column.as_str()],
            ShardingStrategy::Complex { columns, .. } => columns.iter().map(|c| c.as_str()).collect(),
        }
    }

    /// The algorithm of a single-column strategy on `column`.
    pub fn standard_algorithm(&self, column: &str) -> Option<Arc<dyn ShardingAlgorithm>> {
        match self {
            ShardingStrategy::Standard { column: c, algorithm } if c.eq_ignore_ascii_case(column) => Some(algorithm.clone()),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct KeyGenerateRule {
    pub column: String,
    pub generator: Box<dyn KeyGenerator>,
}

#[derive(Debug)]
pub struct TableRule {
    pub logic_table: String,
    pub actual_data_nodes: Vec<DataNode>,
    pub database_strategy: Option<ShardingStrategy>,
    pub table_strategy: Option<ShardingStrategy>,
    pub key_generate: Option<KeyGenerateRule>,
}

impl TableRule {
    /// Data sources in node order.
    pub fn data_source_names(&self) -> Vec<String> {
        let names: IndexSet<&String> = self.actual_data_nodes.iter().map(|n| &n.data_source).collect();
        names.into_iter().cloned().collect()
    }

    pub fn actual_tables(&self, data_source: &str) -> Vec<String> {
        self.actual_data_nodes.iter().filter(|n| n.data_source == data_source).map(|n| n.table.clone()).collect()
    }

    pub fn find_data_node_index(&self, data_source: &str, table: &str) -> Option<usize> {
        self.actual_data_nodes.iter().position(|n| n.data_source == data_source && n.table.eq_ignore_ascii_case(table))
    }

    /// Index of an actual table among the tables of its data source.
    pub fn find_actual_table_index(&self, data_source: &str, table: &str) -> Option<usize> {
        self.actual_tables(data_source).iter().position(|t| t.eq_ignore_ascii_case(table))
    }

    pub fn is_sharding_column(&self, column: &str) -> bool {
        self.sharding_columns().iter().any(|c| c.eq_ignore_ascii_case(column))
    }

    pub fn sharding_columns(&self) -> Vec<&str> {
        let mut columns = vec![];
        for column in self.database_strategy.iter().chain(self.table_strategy.iter()).flat_map(|s| s.columns()) {
            if !columns.iter().any(|c: &&str| c.eq_ignore_ascii_case(column)) {
                columns.push(column);
            }
        }
        columns
    }

    pub fn generate_key_column(&self) -> Option<&str> {
        self.key_generate.as_ref().map(|k| k.column.as_str())
    }
}

/// Tables that always share a shard index with each other.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingTableRule {
    pub tables: Vec<String>,
}

impl BindingTableRule {
    pub fn contains(&self, logic_table: &str) -> bool {
        self.tables.iter().any(|t| t.eq_ignore_ascii_case(logic_table))
    }
}

/// Validated, immutable routing rules built from a [`ShardingConfig`].
#[derive(Debug)]
pub struct ShardingRule {
    pub id: u64,
    pub name: String,
    pub data_sources: IndexMap<String, DataSourceConfig>,
    pub default_data_source: Option<String>,
    pub table_rules: IndexMap<String, TableRule>,
    pub binding_table_rules: Vec<BindingTableRule>,
    pub broadcast_tables: Vec<String>,
    pub props: Props,
}

impl ShardingRule {
    pub fn from_file(config_file: &str) -> Result<Self> {
        ShardingRule::new(ShardingConfig::from_file(config_file)?)
    }

    pub fn new(config: ShardingConfig) -> Result<Self> {
        if config.data_sources.is_empty() {
            return Err(Error::Configuration("no data source configured".to_string()));
        }
        if let Some(default) = &config.default_data_source {
            if !config.data_sources.contains_key(default) {
                return Err(Error::Configuration(format!("default data source `{}` is not declared", default)));
            }
        }
        let default_database_strategy = config.dis_rules.default_database_strategy.as_ref().map(ShardingStrategy::new).transpose()?;
        let default_table_strategy = config.dis_rules.default_table_strategy.as_ref().map(ShardingStrategy::new).transpose()?;

        let mut table_rules = IndexMap::new();
        for (logic_table, table) in &config.dis_rules.distributed_tables {
            let actual_data_nodes = match &table.actual_data_nodes {
                Some(expression) => inline::expand(expression)?.iter().map(|n| DataNode::parse(n)).collect::<Result<Vec<_>>>()?,
                None => config.data_sources.keys().map(|ds| DataNode::new(ds, logic_table)).collect(),
            };
            if actual_data_nodes.is_empty() {
                return Err(Error::Configuration(format!("table `{}` has no actual data node", logic_table)));
            }
            if let Some(node) = actual_data_nodes.iter().find(|n| !config.data_sources.contains_key(&n.data_source)) {
                return Err(Error::Configuration(format!("table `{}` uses undeclared data source `{}`", logic_table, node.data_source)));
            }
            let rule = TableRule {
                logic_table: logic_table.clone(),
                actual_data_nodes,
                database_strategy: match &table.database_strategy {
                    Some(strategy) => Some(ShardingStrategy::new(strategy)?),
                    None => default_database_strategy.clone(),
                },
                table_strategy: match &table.table_strategy {
                    Some(strategy) => Some(ShardingStrategy::new(strategy)?),
                    None => default_table_strategy.clone(),
                },
                key_generate: table
                    .key_generate
                    .as_ref()
                    .map(|k| KeyGenerateRule { column: k.column.clone(), generator: create_key_generator(k) }),
            };
            check_strategy(&rule)?;
            table_rules.insert(logic_table.to_lowercase(), rule);
        }

        let binding_table_rules = build_binding_rules(&config.dis_rules.binding_tables, &table_rules)?;
        let rule = ShardingRule {
            id: sharding_rule_id(),
            name: config.name,
            data_sources: config.data_sources,
            default_data_source: config.default_data_source,
            table_rules,
            binding_table_rules,
            broadcast_tables: config.dis_rules.replicated_tables,
            props: config.props,
        };
        debug!("sharding rule {} built with {} tables", rule.id, rule.table_rules.len());
        Ok(rule)
    }

    pub fn find_table_rule(&self, logic_table: &str) -> Option<&TableRule> {
        self.table_rules.get(&logic_table.to_lowercase())
    }

    pub fn is_sharding_table(&self, logic_table: &str) -> bool {
        self.find_table_rule(logic_table).is_some()
    }

    pub fn is_broadcast_table(&self, logic_table: &str) -> bool {
        self.broadcast_tables.iter().any(|t| t.eq_ignore_ascii_case(logic_table))
    }

    /// Tables with a sharding rule or a broadcast declaration.
    pub fn is_rule_table(&self, logic_table: &str) -> bool {
        self.is_sharding_table(logic_table) || self.is_broadcast_table(logic_table)
    }

    pub fn is_all_broadcast_tables(&self, logic_tables: &[String]) -> bool {
        !logic_tables.is_empty() && logic_tables.iter().all(|t| self.is_broadcast_table(t))
    }

    pub fn sharding_table_names(&self, logic_tables: &[String]) -> Vec<String> {
        logic_tables.iter().filter(|t| self.is_sharding_table(t)).cloned().collect()
    }

    pub fn find_binding_table_rule(&self, logic_table: &str) -> Option<&BindingTableRule> {
        self.binding_table_rules.iter().find(|r| r.contains(logic_table))
    }

    /// All given sharding tables belong to one binding group.
    pub fn is_all_binding_tables(&self, logic_tables: &[String]) -> bool {
        match logic_tables.first().and_then(|t| self.find_binding_table_rule(t)) {
            Some(rule) => logic_tables.iter().all(|t| rule.contains(t)),
            None => false,
        }
    }

    pub fn data_source_names(&self) -> Vec<String> {
        self.data_sources.keys().cloned().collect()
    }

    pub fn database_type(&self, data_source: &str) -> DatabaseType {
        self.data_sources.get(data_source).map(|d| d.database_type).unwrap_or_default()
    }

    /// Data sources grouped by database instance (`host:port` of the url).
    pub fn data_source_instances(&self) -> IndexMap<String, Vec<String>> {
        let mut instances: IndexMap<String, Vec<String>> = IndexMap::new();
        for (name, ds) in &self.data_sources {
            instances.entry(instance_of(&ds.url)).or_default().push(name.clone());
        }
        instances
    }

    pub fn generate_key(&self, logic_table: &str) -> Option<Value> {
        self.find_table_rule(logic_table)
            .and_then(|r| r.key_generate.as_ref())
            .map(|k| k.generator.generate_key())
    }
}

/// A table spread over several data sources needs a database strategy, and
/// several tables in one data source need a table strategy.
fn check_strategy(rule: &TableRule) -> Result<()> {
    if rule.database_strategy.is_none() && rule.data_source_names().len() > 1 {
        return Err(Error::Configuration(format!(
            "table `{}` spans {} data sources but has no database strategy",
            rule.logic_table,
            rule.data_source_names().len()
        )));
    }
    if rule.table_strategy.is_none() && rule.data_source_names().iter().any(|ds| rule.actual_tables(ds).len() > 1) {
        return Err(Error::Configuration(format!(
            "table `{}` has several actual tables per data source but no table strategy",
            rule.logic_table
        )));
    }
    Ok(())
}

fn build_binding_rules(groups: &[Vec<String>], table_rules: &IndexMap<String, TableRule>) -> Result<Vec<BindingTableRule>> {
    let mut rules: Vec<BindingTableRule> = vec![];
    for group in groups {
        let mut node_count = None;
        for table in group {
            if rules.iter().any(|r| r.contains(table)) {
                return Err(Error::Configuration(format!("table `{}` is declared in more than one binding group", table)));
            }
            let rule = table_rules
                .get(&table.to_lowercase())
                .ok_or_else(|| Error::Configuration(format!("binding table `{}` has no sharding rule", table)))?;
            let count = rule.actual_data_nodes.len();
            if *node_count.get_or_insert(count) != count {
                return Err(Error::Configuration(format!("binding group {:?} has tables with different node counts", group)));
            }
        }
        rules.push(BindingTableRule { tables: group.clone() });
    }
    Ok(rules)
}

/// `mysql://user@host:3306/db` gives `host:3306`.
fn instance_of(url: &str) -> String {
    let rest = url.splitn(2, "://").nth(1).unwrap_or(url);
    let rest = rest.rsplitn(2, '@').next().unwrap_or(rest);
    rest.split(|c| c == '/' || c == '?').next().unwrap_or(rest).to_string()
}
