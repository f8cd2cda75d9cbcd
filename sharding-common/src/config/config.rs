use std::fs::File;
use std::io::Read;

use indexmap::IndexMap;
use log::debug;
use serde::Deserialize;
use serde::Serialize;

use crate::common::{Error, Result};

/// Top level sharding rule file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ShardingConfig {
    pub name: String,
    pub data_sources: IndexMap<String, DataSourceConfig>,
    #[serde(default)]
    pub default_data_source: Option<String>,
    #[serde(default)]
    pub dis_rules: DisRules,
    #[serde(default)]
    pub props: Props,
}

impl ShardingConfig {
    pub fn from_str(config_str: &str) -> Result<Self> {
        let config: ShardingConfig = serde_yaml::from_str(config_str)?;
        Ok(config)
    }

    pub fn from_file(config_file: &str) -> Result<Self> {
        let mut file = File::open(config_file)?;
        let mut config_str = String::new();
        file.read_to_string(&mut config_str)?;
        debug!("load sharding config from {}", config_file);
        Self::from_str(&*config_str)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(Error::from)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DataSourceConfig {
    pub url: String,
    #[serde(default)]
    pub database_type: DatabaseType,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    MySQL,
    PostgreSQL,
    Oracle,
    SQLServer,
    H2,
}

impl Default for DatabaseType {
    fn default() -> Self {
        DatabaseType::MySQL
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DisRules {
    #[serde(default)]
    pub distributed_tables: IndexMap<String, DisTable>,
    #[serde(default)]
    pub binding_tables: Vec<Vec<String>>,
    #[serde(default)]
    pub replicated_tables: Vec<String>,
    #[serde(default)]
    pub default_database_strategy: Option<DisStrategy>,
    #[serde(default)]
    pub default_table_strategy: Option<DisStrategy>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DisTable {
    /// Inline expression such as `ds_${0..1}.t_order_${0..1}`. When absent the
    /// table lives once in every data source under its logic name.
    #[serde(default)]
    pub actual_data_nodes: Option<String>,
    #[serde(default)]
    pub database_strategy: Option<DisStrategy>,
    #[serde(default)]
    pub table_strategy: Option<DisStrategy>,
    #[serde(default)]
    pub key_generate: Option<KeyGenerate>,
}

/// `dis_key` names the column of a single-column strategy, `dis_keys` the
/// columns of a strategy evaluated over several columns at once.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DisStrategy {
    #[serde(default)]
    pub dis_key: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dis_keys: Vec<String>,
    pub dis_algorithm: DisAlgorithm,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DisAlgorithm {
    pub dis_type: DisType,
    #[serde(default)]
    pub dis_expression: Option<String>,
    #[serde(default)]
    pub sharding_count: Option<u32>,
    #[serde(default)]
    pub boundaries: Vec<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisType {
    HASH,
    RANGE,
    CUSTOM,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KeyGenerate {
    pub column: String,
    #[serde(default)]
    pub key_generator: KeyGeneratorType,
    #[serde(default)]
    pub worker_id: u16,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyGeneratorType {
    SNOWFLAKE,
}

impl Default for KeyGeneratorType {
    fn default() -> Self {
        KeyGeneratorType::SNOWFLAKE
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Props {
    #[serde(default)]
    pub sql_show: bool,
}

#[cfg(test)]
mod tests {
    use crate::config::config::{DatabaseType, DisType, KeyGeneratorType, ShardingConfig};

    const RULES: &str = r#"
name: sharding_db
data_sources:
  ds_1:
    url: mysql://10.0.0.2:3306/demo_ds_1
  ds_0:
    url: mysql://10.0.0.1:3306/demo_ds_0
    database_type: PostgreSQL
dis_rules:
  distributed_tables:
    t_order:
      actual_data_nodes: ds_${0..1}.t_order_${0..1}
      table_strategy:
        dis_key: order_id
        dis_algorithm:
          dis_type: HASH
          sharding_count: 2
      key_generate:
        column: order_id
  replicated_tables:
    - t_config
"#;

    #[test]
    fn test_yaml() {
        let config = ShardingConfig::from_str(RULES).unwrap();
        assert_eq!("sharding_db", config.name);
        let names: Vec<&String> = config.data_sources.keys().collect();
        assert_eq!(vec!["ds_1", "ds_0"], names);
        assert_eq!(DatabaseType::MySQL, config.data_sources["ds_1"].database_type);
        assert_eq!(DatabaseType::PostgreSQL, config.data_sources["ds_0"].database_type);
        assert!(config.default_data_source.is_none());

        let t_order = &config.dis_rules.distributed_tables["t_order"];
        assert!(t_order.database_strategy.is_none());
        let table_strategy = t_order.table_strategy.as_ref().unwrap();
        assert_eq!("order_id", table_strategy.dis_key);
        assert_eq!(DisType::HASH, table_strategy.dis_algorithm.dis_type);
        assert_eq!(Some(2), table_strategy.dis_algorithm.sharding_count);
        let key_generate = t_order.key_generate.as_ref().unwrap();
        assert_eq!(KeyGeneratorType::SNOWFLAKE, key_generate.key_generator);
        assert_eq!(vec!["t_config".to_string()], config.dis_rules.replicated_tables);
        assert!(!config.props.sql_show);

        let s = config.to_yaml().unwrap();
        let deserialized = ShardingConfig::from_str(&s).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_yaml_from_file() {
        let config = ShardingConfig::from_file("./etc/sharding.yaml").unwrap();
        assert_eq!("sharding_db", config.name);
        assert_eq!(Some("ds_0".to_string()), config.default_data_source);
        assert_eq!(vec![vec!["t_order".to_string(), "t_order_item".to_string()]], config.dis_rules.binding_tables);
        assert!(config.props.sql_show);
    }

    #[test]
    fn test_yaml_dis_keys() {
        let config = ShardingConfig::from_str(
            r#"
name: complex_db
data_sources:
  ds_0:
    url: mysql://10.0.0.1:3306/demo_ds_0
dis_rules:
  default_table_strategy:
    dis_keys: [user_id, order_id]
    dis_algorithm:
      dis_type: CUSTOM
      dis_expression: (user_id + order_id) % 2
"#,
        )
        .unwrap();
        let strategy = config.dis_rules.default_table_strategy.as_ref().unwrap();
        assert!(strategy.dis_key.is_empty());
        assert_eq!(vec!["user_id".to_string(), "order_id".to_string()], strategy.dis_keys);
        assert_eq!(config, ShardingConfig::from_str(&config.to_yaml().unwrap()).unwrap());
    }

    #[test]
    fn test_yaml_broken() {
        assert!(ShardingConfig::from_str("name: [").is_err());
        assert!(ShardingConfig::from_file("./etc/missing.yaml").is_err());
    }
}
