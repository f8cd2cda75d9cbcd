use rhai::{Dynamic, Engine, Scope};

use sharding_common::common::{Error, Result};

use crate::algorithm::{
    find_by_suffix, ComplexKeysShardingAlgorithm, ComplexKeysShardingValue, PreciseShardingValue, RangeShardingValue, ShardingAlgorithm,
};
use crate::value::Value;

/// Evaluates a rhai expression with the sharding columns bound by name, e.g.
/// `"t_order_" + (order_id % 2)` or just `(user_id + order_id) % 2`. A full
/// target name or a trailing number is accepted as the result.
#[derive(Debug)]
pub struct CustomShardingAlgorithm {
    expression: String,
}

impl CustomShardingAlgorithm {
    pub fn new(expression: &str) -> Result<Self> {
        let engine = Engine::new();
        engine
            .compile_expression(expression)
            .map_err(|e| Error::Configuration(format!("invalid dis_expression `{}`: {}", expression, e)))?;
        Ok(CustomShardingAlgorithm { expression: expression.to_string() })
    }

    fn eval(&self, bindings: &[(&str, &Value)]) -> Result<String> {
        let engine = Engine::new();
        let mut scope = Scope::new();
        for (column, value) in bindings {
            let name = column.to_string();
            match value {
                Value::Int(i) => scope.push(name, *i),
                Value::Double(d) => scope.push(name, *d),
                Value::Text(s) => scope.push(name, s.clone()),
                Value::Bool(b) => scope.push(name, *b),
                Value::Null => scope.push(name, ()),
            };
        }
        let result: Dynamic = engine.eval_expression_with_scope(&mut scope, &self.expression).map_err(|e| {
            let bound: Vec<String> = bindings.iter().map(|(c, v)| format!("{} = {}", c, v)).collect();
            Error::Algorithm(format!("`{}` failed for {}: {}", self.expression, bound.join(", "), e))
        })?;
        Ok(result.to_string())
    }

    fn target(&self, available: &[String], bindings: &[(&str, &Value)]) -> Result<Option<String>> {
        let result = self.eval(bindings)?;
        if let Some(target) = available.iter().find(|a| a.eq_ignore_ascii_case(&result)) {
            return Ok(Some(target.clone()));
        }
        Ok(result.trim().parse::<i64>().ok().and_then(|suffix| find_by_suffix(available, suffix)))
    }
}

impl ShardingAlgorithm for CustomShardingAlgorithm {
    fn precise_match(&self, available: &[String], value: &PreciseShardingValue<'_>) -> Result<Option<String>> {
        self.target(available, &[(value.column, value.value)])
    }

    fn range_match(&self, available: &[String], _value: &RangeShardingValue<'_>) -> Result<Vec<String>> {
        Ok(available.to_vec())
    }
}

impl ComplexKeysShardingAlgorithm for CustomShardingAlgorithm {
    /// Evaluated once per combination of listed values. A ranged column
    /// leaves every target open.
    fn do_sharding(&self, available: &[String], value: &ComplexKeysShardingValue<'_>) -> Result<Vec<String>> {
        if !value.column_ranges.is_empty() || value.column_values.is_empty() {
            return Ok(available.to_vec());
        }
        let mut combinations: Vec<Vec<(&str, &Value)>> = vec![vec![]];
        for (column, values) in &value.column_values {
            combinations = combinations
                .iter()
                .flat_map(|bound| {
                    values.iter().map(move |v| {
                        let mut next = bound.clone();
                        next.push((*column, v));
                        next
                    })
                })
                .collect();
        }
        let mut targets = vec![];
        for bindings in &combinations {
            match self.target(available, bindings)? {
                Some(target) => targets.push(target),
                None => {
                    return Err(Error::Algorithm(format!(
                        "`{}` maps no target of {} in {:?}",
                        self.expression, value.logic_table, available
                    )))
                }
            }
        }
        Ok(available.iter().filter(|a| targets.contains(a)).cloned().collect())
    }
}
