use log::debug;

use crate::discovery::database::ShardingRule;
use crate::parser::sql::{ParameterMarkerType, SQLStatementContext};
use crate::value::Value;

/// Keys generated for an INSERT that leaves out its key column.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedKeyContext {
    pub column: String,
    /// One value per inserted row.
    pub values: Vec<Value>,
    /// Values travel as `?` parameters instead of literals.
    pub parameterized: bool,
}

impl GeneratedKeyContext {
    /// A context exists only for an INSERT with an explicit column list, or the
    /// SET form, that does not name the configured key column.
    pub fn create(ctx: &SQLStatementContext, rule: &ShardingRule) -> Option<GeneratedKeyContext> {
        let insert = ctx.insert.as_ref().filter(|i| !i.insert_select)?;
        let table = ctx.tables.first()?;
        let table_rule = rule.find_table_rule(&table.name)?;
        let column = table_rule.generate_key_column()?;
        let rows = if insert.is_set_form() {
            if insert.set_assignments.iter().any(|a| a.column.eq_ignore_ascii_case(column)) {
                return None;
            }
            1
        } else {
            if insert.columns.is_empty() || insert.columns.iter().any(|c| c.eq_ignore_ascii_case(column)) {
                return None;
            }
            insert.values.len()
        };
        let values: Vec<Value> = (0..rows).filter_map(|_| rule.generate_key(&table.name)).collect();
        debug!("generated {} keys for column {} of {}", values.len(), column, table.name);
        Some(GeneratedKeyContext {
            column: column.to_string(),
            values,
            parameterized: ctx.parameter_count > 0 && ctx.parameter_marker_type == ParameterMarkerType::Question,
        })
    }

    /// Text placed at the key slot of row `index`.
    pub fn render(&self, index: usize) -> Option<String> {
        let value = self.values.get(index)?;
        if self.parameterized {
            Some("?".to_string())
        } else {
            Some(value.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::discovery::database::ShardingRule;
    use crate::handler::generated_key::GeneratedKeyContext;
    use crate::parser::sql::analyse::analyse;
    use crate::value::Value;

    fn create(sql: &str) -> Option<GeneratedKeyContext> {
        let rule = ShardingRule::from_file("./etc/sharding.yaml").unwrap();
        GeneratedKeyContext::create(&analyse(sql).unwrap(), &rule)
    }

    #[test]
    fn test_generated_per_row() {
        let key = create("INSERT INTO t_order (user_id, status) VALUES (?, ?), (?, ?)").unwrap();
        assert_eq!("order_id", key.column);
        assert_eq!(2, key.values.len());
        assert!(key.parameterized);
        assert_eq!(Some("?".to_string()), key.render(1));
        assert_eq!(None, key.render(2));

        let key = create("INSERT INTO t_order (user_id) VALUES (1)").unwrap();
        assert!(!key.parameterized);
        assert!(matches!(key.values[0], Value::Int(_)));
        assert_eq!(Some(key.values[0].to_string()), key.render(0));

        let key = create("INSERT INTO t_order SET user_id = 1").unwrap();
        assert_eq!(1, key.values.len());
    }

    #[test]
    fn test_not_generated() {
        assert!(create("INSERT INTO t_order (order_id, user_id) VALUES (1, 1)").is_none());
        assert!(create("INSERT INTO t_order VALUES (1, 1, 'init')").is_none());
        assert!(create("INSERT INTO t_order_item (user_id) VALUES (1)").is_none());
        assert!(create("INSERT INTO t_order SET order_id = 2, user_id = 1").is_none());
        assert!(create("SELECT * FROM t_order").is_none());
    }
}
