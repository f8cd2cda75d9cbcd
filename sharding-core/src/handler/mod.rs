use std::sync::Arc;

use indexmap::IndexMap;
use log::{debug, info};

use sharding_common::common::Result;

use crate::cache;
use crate::discovery::database::ShardingRule;
use crate::handler::generated_key::GeneratedKeyContext;
use crate::parser::sql::analyse::analyse;
use crate::rewrite::engine::{GenericSQLRewriteEngine, RouteSQLRewriteEngine};
use crate::rewrite::translator::SQLTranslator;
use crate::rewrite::{SQLRewriteContext, SQLRewriteUnit};
use crate::route::condition;
use crate::route::engine;
use crate::route::{RouteContext, RouteUnit};
use crate::value::Value;

pub mod generated_key;

/// What the execution layer needs to dispatch one logic statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    pub route_context: RouteContext,
    pub execution_units: IndexMap<RouteUnit, SQLRewriteUnit>,
}

#[derive(Debug, Clone)]
pub struct QueryHandler {
    rule: Arc<ShardingRule>,
    translator: Option<Arc<dyn SQLTranslator>>,
}

impl QueryHandler {
    pub fn new(rule: Arc<ShardingRule>) -> Self {
        QueryHandler { rule, translator: None }
    }

    pub fn with_translator(rule: Arc<ShardingRule>, translator: Arc<dyn SQLTranslator>) -> Self {
        QueryHandler { rule, translator: Some(translator) }
    }

    pub fn rule(&self) -> &ShardingRule {
        &self.rule
    }

    pub fn handle(&self, sql: &str, parameters: &[Value]) -> Result<ExecutionContext> {
        let rule = self.rule.as_ref();
        let ctx = analyse(sql)?;
        let generated_key = GeneratedKeyContext::create(&ctx, rule);
        let conditions = condition::extract(&ctx, rule, parameters, generated_key.as_ref());
        let route_context = engine::route(&ctx, rule, &conditions)?;

        let needs_rewrite = cache::needs_rewrite(rule.id, sql, || SQLRewriteContext::needs_rewrite(&ctx, rule, generated_key.as_ref()));
        let translator = self.translator.as_deref();
        let execution_units = if needs_rewrite {
            let rw = SQLRewriteContext::new(&ctx, rule, &route_context, parameters, generated_key.as_ref());
            RouteSQLRewriteEngine::rewrite(&rw, translator)?
        } else {
            debug!("`{}` needs no rewrite, share one statement", sql);
            let rw = SQLRewriteContext::without_tokens(&ctx, rule, &route_context, parameters);
            GenericSQLRewriteEngine::rewrite_units(&rw, translator)?
        };

        if rule.props.sql_show {
            info!("Logic SQL: {}", sql);
            for (unit, rewritten) in &execution_units {
                info!("Actual SQL: {} ::: {} ::: {:?}", unit.data_source_name(), rewritten.sql, rewritten.parameters);
            }
        }
        Ok(ExecutionContext { route_context, execution_units })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::cache;
    use crate::discovery::database::ShardingRule;
    use crate::handler::QueryHandler;
    use crate::value::Value;

    fn handler(config_file: &str) -> QueryHandler {
        let _ = env_logger::builder().is_test(true).try_init();
        QueryHandler::new(Arc::new(ShardingRule::from_file(config_file).unwrap()))
    }

    fn texts(result: &crate::handler::ExecutionContext) -> Vec<&str> {
        result.execution_units.values().map(|u| u.sql.as_str()).collect()
    }

    #[test]
    fn test_insert_with_generated_key() {
        let handler = handler("./etc/sharding-keygen.yaml");
        let parameters = vec![Value::from("init"), Value::Int(1)];
        let result = handler.handle("INSERT INTO t_order(foo_col,col1) VALUES(?,?)", &parameters).unwrap();
        assert_eq!(1, result.execution_units.len());
        let (unit, rewritten) = result.execution_units.get_index(0).unwrap();
        assert_eq!(3, rewritten.parameters.len());
        let key = rewritten.parameters[2].as_i64().unwrap();
        let table = format!("t_order_{}", key % 2);
        assert_eq!(Some(table.as_str()), unit.actual_table_name("t_order"));
        assert_eq!(format!("INSERT INTO {}(foo_col,col1, id) VALUES(?,?, ?)", table), rewritten.sql);
        assert_eq!(&parameters[..], &rewritten.parameters[..2]);
    }

    #[test]
    fn test_range_merged_with_union_all() {
        let handler = handler("./etc/sharding-range.yaml");
        let result = handler.handle("SELECT order_id,user_id,status FROM t_order WHERE order_id BETWEEN 1 AND 5", &[]).unwrap();
        assert_eq!(2, result.route_context.route_units.len());
        assert_eq!(
            vec![
                "SELECT order_id,user_id,status FROM t_order_0 WHERE order_id BETWEEN 1 AND 5 UNION ALL \
                 SELECT order_id,user_id,status FROM t_order_1 WHERE order_id BETWEEN 1 AND 5"
            ],
            texts(&result)
        );
    }

    #[test]
    fn test_merged_statement_without_tail() {
        let handler = handler("./etc/sharding-range.yaml");
        let result = handler.handle("SELECT order_id FROM t_order WHERE order_id BETWEEN 1 AND 5;", &[]).unwrap();
        assert_eq!(
            vec!["SELECT order_id FROM t_order_0 WHERE order_id BETWEEN 1 AND 5 UNION ALL SELECT order_id FROM t_order_1 WHERE order_id BETWEEN 1 AND 5"],
            texts(&result)
        );

        let handler = self::handler("./etc/sharding.yaml");
        let result = handler.handle("SELECT * FROM t_order WHERE user_id = 1 -- trailing comment", &[]).unwrap();
        assert_eq!(
            vec!["SELECT * FROM t_order_0 WHERE user_id = 1 UNION ALL SELECT * FROM t_order_1 WHERE user_id = 1"],
            texts(&result)
        );
    }

    #[test]
    fn test_empty_range_still_answers() {
        let handler = handler("./etc/sharding-range.yaml");
        let result = handler.handle("SELECT COUNT(*) FROM t_order WHERE order_id BETWEEN 5 AND 1", &[]).unwrap();
        assert_eq!(1, result.route_context.route_units.len());
        assert_eq!(vec!["SELECT COUNT(*) FROM t_order_0 WHERE order_id BETWEEN 5 AND 1"], texts(&result));
    }

    #[test]
    fn test_account_statements_broadcast_to_instances() {
        let handler = handler("./etc/sharding.yaml");
        let result = handler.handle("CREATE USER 'u'@'%'", &[]).unwrap();
        assert_eq!(vec!["CREATE USER 'u'@'%'"], texts(&result));
        let result = handler.handle("GRANT SELECT ON t_order TO 'u'@'localhost'", &[]).unwrap();
        assert_eq!(4, result.execution_units.len());
        assert!(texts(&result).contains(&"GRANT SELECT ON t_order_1 TO 'u'@'localhost'"));
    }

    #[test]
    fn test_order_by_limit_never_merged() {
        let handler = handler("./etc/sharding-range.yaml");
        let sql = "SELECT order_id,user_id,status FROM t_order WHERE order_id BETWEEN 1 AND 7 ORDER BY order_id LIMIT 10";
        let result = handler.handle(sql, &[]).unwrap();
        let expected: Vec<String> = (0..3)
            .map(|i| format!("SELECT order_id,user_id,status FROM t_order_{} WHERE order_id BETWEEN 1 AND 7 ORDER BY order_id LIMIT 10", i))
            .collect();
        assert_eq!(expected, texts(&result));
    }

    #[test]
    fn test_precise_update() {
        let handler = handler("./etc/sharding-range.yaml");
        let parameters = vec![Value::from("done"), Value::Int(5)];
        let result = handler.handle("UPDATE t_order SET status=? WHERE order_id=?", &parameters).unwrap();
        assert_eq!(1, result.execution_units.len());
        let (unit, rewritten) = result.execution_units.get_index(0).unwrap();
        assert_eq!(Some("t_order_1"), unit.actual_table_name("t_order"));
        assert_eq!("UPDATE t_order_1 SET status=? WHERE order_id=?", rewritten.sql);
        assert_eq!(parameters, rewritten.parameters);
    }

    #[test]
    fn test_fast_path_shares_generic_statement() {
        let handler = handler("./etc/sharding.yaml");
        let sql = "SELECT * FROM t_user WHERE id = ?";
        let result = handler.handle(sql, &[Value::Int(3)]).unwrap();
        assert_eq!(vec![sql], texts(&result));
        assert_eq!(Some(false), cache::cached(handler.rule().id, sql));

        let result = handler.handle("BEGIN", &[]).unwrap();
        assert_eq!(vec!["BEGIN", "BEGIN"], texts(&result));
        handler.handle("SELECT * FROM t_order", &[]).unwrap();
        assert_eq!(Some(true), cache::cached(handler.rule().id, "SELECT * FROM t_order"));
    }

    #[test]
    fn test_binding_join() {
        let handler = handler("./etc/sharding.yaml");
        let sql = "SELECT * FROM t_order o JOIN t_order_item i ON o.order_id = i.order_id WHERE o.user_id = 1 AND o.order_id = 2";
        let result = handler.handle(sql, &[]).unwrap();
        assert_eq!(
            vec!["SELECT * FROM t_order_0 o JOIN t_order_item_0 i ON o.order_id = i.order_id WHERE o.user_id = 1 AND o.order_id = 2"],
            texts(&result)
        );
        let (unit, _) = result.execution_units.get_index(0).unwrap();
        assert_eq!("ds_1", unit.data_source_name());
    }

    #[test]
    fn test_in_predicate_filtered_per_table() {
        let handler = handler("./etc/sharding.yaml");
        let sql = "SELECT * FROM t_order WHERE user_id = 1 AND order_id IN (?, ?)";
        let result = handler.handle(sql, &[Value::Int(10), Value::Int(11)]).unwrap();
        assert_eq!(2, result.route_context.route_units.len());
        assert_eq!(1, result.execution_units.len());
        let (_, rewritten) = result.execution_units.get_index(0).unwrap();
        assert_eq!(
            "SELECT * FROM t_order_0 WHERE user_id = 1 AND order_id IN (?) UNION ALL \
             SELECT * FROM t_order_1 WHERE user_id = 1 AND order_id IN (?)",
            rewritten.sql
        );
        assert_eq!(vec![Value::Int(10), Value::Int(11)], rewritten.parameters);
    }

    #[test]
    fn test_pagination_revised_for_fan_out() {
        let handler = handler("./etc/sharding.yaml");
        let sql = "SELECT * FROM t_order WHERE user_id = 1 ORDER BY order_id LIMIT ?, ?";
        let result = handler.handle(sql, &[Value::Int(20), Value::Int(10)]).unwrap();
        assert_eq!(2, result.execution_units.len());
        for rewritten in result.execution_units.values() {
            assert!(rewritten.sql.ends_with("ORDER BY order_id LIMIT ?, ?"));
            assert_eq!(vec![Value::Int(0), Value::Int(30)], rewritten.parameters);
        }
    }

    #[test]
    fn test_unsupported_join_fails_fast() {
        let mut config = sharding_common::config::ShardingConfig::from_file("./etc/sharding.yaml").unwrap();
        config.dis_rules.binding_tables.clear();
        let handler = QueryHandler::new(Arc::new(ShardingRule::new(config).unwrap()));
        let err = handler.handle("SELECT * FROM t_order o JOIN t_order_item i ON o.order_id = i.order_id", &[]).unwrap_err();
        assert!(err.is_unsupported());
    }
}
