//! Shows where a logic statement goes and what each target receives,
//! without touching any database.

#![warn(rust_2018_idioms)]

use std::process;
use std::sync::Arc;

use clap::{App, Arg};
use log::error;

use sharding_common::common::Result;
use sharding_core::discovery::database::ShardingRule;
use sharding_core::handler::QueryHandler;
use sharding_core::value::Value;

fn main() {
    env_logger::init();

    let matches = App::new("Sharding Preview")
        .version("0.1.0")
        .author("AlphaPo")
        .about("Prints the actual SQL and parameters of a logic statement per data source")
        .arg(Arg::with_name("config")
            .short("c")
            .long("config")
            .value_name("FILE")
            .takes_value(true)
            .help("sharding rule file"))
        .arg(Arg::with_name("param")
            .short("p")
            .long("param")
            .value_name("VALUE")
            .takes_value(true)
            .multiple(true)
            .number_of_values(1)
            .help("statement parameter, in marker order"))
        .arg(Arg::with_name("sql")
            .required(true)
            .index(1)
            .help("logic SQL statement"))
        .get_matches();

    let config_path = matches.value_of("config").unwrap_or("./etc/sharding.yaml");
    let sql = matches.value_of("sql").unwrap_or_default();
    let parameters: Vec<Value> = matches.values_of("param").map(|v| v.map(Value::parse).collect()).unwrap_or_default();

    match preview(config_path, sql, &parameters) {
        Ok(lines) => {
            for line in lines {
                println!("{}", line);
            }
        }
        Err(e) => {
            error!("preview `{}` failed: {}", sql, e);
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}

fn preview(config_path: &str, sql: &str, parameters: &[Value]) -> Result<Vec<String>> {
    let rule = ShardingRule::from_file(config_path)?;
    let handler = QueryHandler::new(Arc::new(rule));
    let execution = handler.handle(sql, parameters)?;
    Ok(execution
        .execution_units
        .iter()
        .map(|(unit, rewritten)| format!("{} ::: {} ::: {}", unit.data_source_name(), rewritten.sql, format_parameters(&rewritten.parameters)))
        .collect())
}

fn format_parameters(parameters: &[Value]) -> String {
    let values: Vec<String> = parameters.iter().map(|p| p.to_string()).collect();
    format!("[{}]", values.join(", "))
}

#[cfg(test)]
mod tests {
    use sharding_core::value::Value;

    use crate::{format_parameters, preview};

    #[test]
    fn test_preview() {
        let lines = preview("../sharding-core/etc/sharding-range.yaml", "SELECT * FROM t_order WHERE order_id = ?", &[Value::Int(4)]).unwrap();
        assert_eq!(vec!["ds_0 ::: SELECT * FROM t_order_1 WHERE order_id = ? ::: [4]".to_string()], lines);
    }

    #[test]
    fn test_preview_errors() {
        assert!(preview("./etc/missing.yaml", "SELECT 1", &[]).is_err());
        assert!(preview("../sharding-core/etc/sharding-range.yaml", "", &[]).is_err());
    }

    #[test]
    fn test_format_parameters() {
        assert_eq!("[1, 'a''b', NULL]", format_parameters(&[Value::Int(1), Value::from("a'b"), Value::Null]));
        assert_eq!("[]", format_parameters(&[]));
    }
}
