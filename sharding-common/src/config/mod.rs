pub mod config;

pub use self::config::{DataSourceConfig, DatabaseType, DisAlgorithm, DisRules, DisStrategy, DisTable, DisType, KeyGenerate, KeyGeneratorType, Props, ShardingConfig};
