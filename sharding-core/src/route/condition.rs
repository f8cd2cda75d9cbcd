//! Folds a WHERE tree, or the rows of an INSERT, into OR-of-AND sharding
//! conditions on sharding columns.

use std::ops::Bound;

use log::debug;

use crate::algorithm::ValueRange;
use crate::discovery::database::ShardingRule;
use crate::handler::generated_key::GeneratedKeyContext;
use crate::parser::sql::{BinaryOperator, ColumnSegment, ExpressionSegment, SQLStatementContext};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOperator {
    Equal,
    In,
    Between,
    Range,
}

/// Right hand side of a leaf before parameters are bound.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionValue {
    Literal(Value),
    Parameter(usize),
}

impl ConditionValue {
    fn from_expr(expr: &ExpressionSegment) -> Option<Self> {
        match expr {
            ExpressionSegment::Literal { value, .. } => Some(ConditionValue::Literal(value.clone())),
            ExpressionSegment::Parameter { index, .. } => Some(ConditionValue::Parameter(*index)),
            _ => None,
        }
    }

    pub fn resolve(&self, parameters: &[Value]) -> Option<Value> {
        match self {
            ConditionValue::Literal(v) => Some(v.clone()),
            ConditionValue::Parameter(i) => parameters.get(*i).cloned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShardingValues {
    List(Vec<Value>),
    Range(ValueRange),
}

impl ShardingValues {
    fn intersect(&self, other: &ShardingValues) -> ShardingValues {
        match (self, other) {
            (ShardingValues::List(l), ShardingValues::List(r)) => {
                ShardingValues::List(l.iter().filter(|v| r.contains(v)).cloned().collect())
            }
            (ShardingValues::List(l), ShardingValues::Range(r)) | (ShardingValues::Range(r), ShardingValues::List(l)) => {
                ShardingValues::List(l.iter().filter(|v| r.contains(v)).cloned().collect())
            }
            (ShardingValues::Range(l), ShardingValues::Range(r)) => match l.intersect(r) {
                Some(range) => ShardingValues::Range(range),
                None => ShardingValues::List(vec![]),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ShardingValues::List(values) => values.is_empty(),
            ShardingValues::Range(range) => range.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShardingCondition {
    pub table: String,
    pub column: String,
    pub operator: ConditionOperator,
    pub values: ShardingValues,
}

/// Conditions joined by AND. An always false group can match no row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShardingConditionGroup {
    pub conditions: Vec<ShardingCondition>,
    pub always_false: bool,
}

impl ShardingConditionGroup {
    pub fn find(&self, table: &str, column: &str) -> Option<&ShardingCondition> {
        self.conditions
            .iter()
            .find(|c| c.table.eq_ignore_ascii_case(table) && c.column.eq_ignore_ascii_case(column))
    }

    /// Conditions on one column collapse into their intersection.
    fn merge(conditions: Vec<ShardingCondition>) -> Self {
        let mut group = ShardingConditionGroup::default();
        for condition in conditions {
            let existing = group
                .conditions
                .iter_mut()
                .find(|c| c.table.eq_ignore_ascii_case(&condition.table) && c.column.eq_ignore_ascii_case(&condition.column));
            let empty = match existing {
                Some(c) => {
                    c.values = c.values.intersect(&condition.values);
                    c.values.is_empty()
                }
                None => {
                    let empty = condition.values.is_empty();
                    group.conditions.push(condition);
                    empty
                }
            };
            if empty {
                group.always_false = true;
            }
        }
        group
    }
}

/// OR of AND groups. No group at all means nothing is known.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShardingConditions {
    pub groups: Vec<ShardingConditionGroup>,
}

impl ShardingConditions {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn is_always_false(&self) -> bool {
        !self.groups.is_empty() && self.groups.iter().all(|g| g.always_false)
    }
}

/// Extracts sharding conditions of a statement, INSERT rows included.
pub fn extract(
    ctx: &SQLStatementContext,
    rule: &ShardingRule,
    parameters: &[Value],
    generated_key: Option<&GeneratedKeyContext>,
) -> ShardingConditions {
    let extractor = ConditionExtractor { ctx, rule, parameters };
    let conditions = match (&ctx.insert, &ctx.where_expr) {
        (Some(_), _) => extractor.insert_conditions(generated_key),
        (None, Some(expr)) => {
            let groups = extractor.visit(expr);
            // a single unconstrained group carries no information
            if groups.len() == 1 && groups[0].is_empty() {
                ShardingConditions::default()
            } else {
                ShardingConditions { groups: groups.into_iter().map(ShardingConditionGroup::merge).collect() }
            }
        }
        (None, None) => ShardingConditions::default(),
    };
    debug!("sharding conditions of `{}`: {:?}", ctx.sql, conditions);
    conditions
}

struct ConditionExtractor<'a> {
    ctx: &'a SQLStatementContext,
    rule: &'a ShardingRule,
    parameters: &'a [Value],
}

type Groups = Vec<Vec<ShardingCondition>>;

fn unbound() -> Groups {
    vec![vec![]]
}

impl<'a> ConditionExtractor<'a> {
    fn visit(&self, expr: &ExpressionSegment) -> Groups {
        match expr {
            ExpressionSegment::Binary { left, op: BinaryOperator::And, right, .. } => {
                let (left, right) = (self.visit(left), self.visit(right));
                let mut groups = Vec::with_capacity(left.len() * right.len());
                for l in &left {
                    for r in &right {
                        groups.push(l.iter().chain(r.iter()).cloned().collect());
                    }
                }
                groups
            }
            ExpressionSegment::Binary { left, op: BinaryOperator::Or, right, .. } => {
                let mut groups = self.visit(left);
                groups.extend(self.visit(right));
                groups
            }
            other => self.leaf(other).map(|c| vec![c]).unwrap_or_else(unbound),
        }
    }

    fn leaf(&self, expr: &ExpressionSegment) -> Option<Vec<ShardingCondition>> {
        match expr {
            ExpressionSegment::Binary { left, op, right, .. } => {
                let (column, value, op) = match (left.as_ref(), right.as_ref()) {
                    (ExpressionSegment::Column(c), value) => (c, ConditionValue::from_expr(value)?, *op),
                    (value, ExpressionSegment::Column(c)) => (c, ConditionValue::from_expr(value)?, op.reverse()),
                    _ => return None,
                };
                let value = value.resolve(self.parameters)?;
                let (operator, values) = match op {
                    BinaryOperator::Eq => (ConditionOperator::Equal, ShardingValues::List(vec![value])),
                    BinaryOperator::Lt => (ConditionOperator::Range, range(Bound::Unbounded, Bound::Excluded(value))),
                    BinaryOperator::LtEq => (ConditionOperator::Range, range(Bound::Unbounded, Bound::Included(value))),
                    BinaryOperator::Gt => (ConditionOperator::Range, range(Bound::Excluded(value), Bound::Unbounded)),
                    BinaryOperator::GtEq => (ConditionOperator::Range, range(Bound::Included(value), Bound::Unbounded)),
                    _ => return None,
                };
                self.condition(column, operator, values)
            }
            ExpressionSegment::Between { left, low, high, not: false, .. } => {
                let column = as_column(left)?;
                let low = ConditionValue::from_expr(low)?.resolve(self.parameters)?;
                let high = ConditionValue::from_expr(high)?.resolve(self.parameters)?;
                self.condition(column, ConditionOperator::Between, ShardingValues::Range(ValueRange::closed(low, high)))
            }
            ExpressionSegment::In { left, list, not: false, .. } => {
                let column = as_column(left)?;
                let values = list
                    .iter()
                    .map(|item| ConditionValue::from_expr(item).and_then(|v| v.resolve(self.parameters)))
                    .collect::<Option<Vec<_>>>()?;
                self.condition(column, ConditionOperator::In, ShardingValues::List(values))
            }
            _ => None,
        }
    }

    /// One condition per sharding table the column may belong to.
    fn condition(&self, column: &ColumnSegment, operator: ConditionOperator, values: ShardingValues) -> Option<Vec<ShardingCondition>> {
        let tables = sharding_owner_tables(self.ctx, self.rule, column);
        if tables.is_empty() {
            return None;
        }
        let conditions = tables
            .into_iter()
            .map(|table| ShardingCondition { table: table.to_string(), column: column.name.clone(), operator, values: values.clone() })
            .collect();
        Some(conditions)
    }

    /// One AND group per VALUES row, or a single group for the SET form.
    fn insert_conditions(&self, generated_key: Option<&GeneratedKeyContext>) -> ShardingConditions {
        let insert = match &self.ctx.insert {
            Some(insert) if !insert.insert_select => insert,
            _ => return ShardingConditions::default(),
        };
        let table = match self.ctx.tables.first() {
            Some(table) => table.name.as_str(),
            None => return ShardingConditions::default(),
        };
        let table_rule = match self.rule.find_table_rule(table) {
            Some(rule) => rule,
            None => return ShardingConditions::default(),
        };
        let rows: Vec<Vec<(&str, &ExpressionSegment)>> = if insert.is_set_form() {
            vec![insert.set_assignments.iter().map(|a| (a.column.as_str(), &a.value)).collect()]
        } else {
            insert
                .values
                .iter()
                .map(|row| insert.columns.iter().map(|c| c.as_str()).zip(row.values.iter()).collect())
                .collect()
        };

        let mut groups = vec![];
        for (index, row) in rows.iter().enumerate() {
            let mut conditions = vec![];
            for (column, expr) in row {
                if !table_rule.is_sharding_column(column) {
                    continue;
                }
                if let Some(value) = ConditionValue::from_expr(expr).and_then(|v| v.resolve(self.parameters)) {
                    conditions.push(ShardingCondition {
                        table: table.to_string(),
                        column: column.to_string(),
                        operator: ConditionOperator::Equal,
                        values: ShardingValues::List(vec![value]),
                    });
                }
            }
            if let Some(key) = generated_key {
                if table_rule.is_sharding_column(&key.column) {
                    if let Some(value) = key.values.get(index) {
                        conditions.push(ShardingCondition {
                            table: table.to_string(),
                            column: key.column.clone(),
                            operator: ConditionOperator::Equal,
                            values: ShardingValues::List(vec![value.clone()]),
                        });
                    }
                }
            }
            groups.push(ShardingConditionGroup { conditions, always_false: false });
        }
        ShardingConditions { groups }
    }
}

/// The sharding table a column shards, through qualifier or alias when
/// present, otherwise the first sharding table that shards on it.
pub(crate) fn sharding_owner_table<'a>(ctx: &'a SQLStatementContext, rule: &ShardingRule, column: &ColumnSegment) -> Option<&'a str> {
    sharding_owner_tables(ctx, rule, column).into_iter().next()
}

/// Every sharding table an unqualified column may belong to.
fn sharding_owner_tables<'a>(ctx: &'a SQLStatementContext, rule: &ShardingRule, column: &ColumnSegment) -> Vec<&'a str> {
    let shards = |table: &str| rule.find_table_rule(table).map_or(false, |r| r.is_sharding_column(&column.name));
    match &column.owner {
        Some(owner) => ctx.find_table_name(owner).filter(|t| shards(*t)).into_iter().collect(),
        None => {
            let mut tables: Vec<&str> = vec![];
            for table in ctx.tables.iter().map(|t| t.name.as_str()) {
                if shards(table) && !tables.iter().any(|t| t.eq_ignore_ascii_case(table)) {
                    tables.push(table);
                }
            }
            tables
        }
    }
}

fn range(lower: Bound<Value>, upper: Bound<Value>) -> ShardingValues {
    ShardingValues::Range(ValueRange { lower, upper })
}

fn as_column(expr: &ExpressionSegment) -> Option<&ColumnSegment> {
    match expr {
        ExpressionSegment::Column(c) => Some(c),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::ops::Bound;

    use crate::algorithm::ValueRange;
    use crate::discovery::database::ShardingRule;
    use crate::parser::sql::analyse::analyse;
    use crate::route::condition::{extract, ConditionOperator, ShardingConditions, ShardingValues};
    use crate::value::Value;

    fn rule() -> ShardingRule {
        ShardingRule::from_file("./etc/sharding.yaml").unwrap()
    }

    fn conditions(sql: &str, parameters: &[Value]) -> ShardingConditions {
        extract(&analyse(sql).unwrap(), &rule(), parameters, None)
    }

    #[test]
    fn test_equal_and_reversed() {
        let c = conditions("SELECT * FROM t_order o WHERE ? = o.order_id AND user_id = 3", &[Value::Int(7)]);
        assert_eq!(1, c.groups.len());
        let group = &c.groups[0];
        assert_eq!(ShardingValues::List(vec![Value::Int(7)]), group.find("t_order", "order_id").unwrap().values);
        assert_eq!(ShardingValues::List(vec![Value::Int(3)]), group.find("t_order", "user_id").unwrap().values);

        let c = conditions("SELECT * FROM t_order WHERE 10 > order_id", &[]);
        let condition = c.groups[0].find("t_order", "order_id").unwrap();
        assert_eq!(ConditionOperator::Range, condition.operator);
        assert_eq!(ShardingValues::Range(ValueRange { lower: Bound::Unbounded, upper: Bound::Excluded(Value::Int(10)) }), condition.values);
    }

    #[test]
    fn test_or_of_and() {
        let c = conditions("SELECT * FROM t_order WHERE (order_id = 1 OR order_id = 2) AND user_id IN (1, 2)", &[]);
        assert_eq!(2, c.groups.len());
        assert_eq!(ShardingValues::List(vec![Value::Int(2)]), c.groups[1].find("t_order", "order_id").unwrap().values);
        assert_eq!(ConditionOperator::In, c.groups[1].find("t_order", "user_id").unwrap().operator);
    }

    #[test]
    fn test_merge_same_column() {
        let c = conditions("SELECT * FROM t_order WHERE order_id BETWEEN 1 AND 10 AND order_id IN (5, 20)", &[]);
        assert_eq!(ShardingValues::List(vec![Value::Int(5)]), c.groups[0].find("t_order", "order_id").unwrap().values);
        assert!(!c.is_always_false());

        let c = conditions("SELECT * FROM t_order WHERE order_id = 1 AND order_id = 2", &[]);
        assert!(c.groups[0].always_false);
        assert!(c.is_always_false());
    }

    #[test]
    fn test_inverted_range_is_always_false() {
        let c = conditions("SELECT * FROM t_order WHERE order_id BETWEEN 5 AND 1", &[]);
        assert!(c.is_always_false());
        let c = conditions("SELECT * FROM t_order WHERE order_id BETWEEN ? AND ? OR user_id = 1", &[Value::Int(9), Value::Int(2)]);
        assert!(c.groups[0].always_false);
        assert!(!c.is_always_false());
        let c = conditions("SELECT * FROM t_order WHERE order_id BETWEEN 1 AND 1", &[]);
        assert!(!c.is_always_false());
    }

    #[test]
    fn test_unclassifiable_degrades() {
        assert!(conditions("SELECT * FROM t_order WHERE status = 'init'", &[]).is_empty());
        assert!(conditions("SELECT * FROM t_order WHERE order_id <> 1", &[]).is_empty());
        assert!(conditions("SELECT * FROM t_order WHERE order_id = abs(-1)", &[]).is_empty());
        assert!(conditions("SELECT * FROM t_order WHERE order_id NOT IN (1, 2)", &[]).is_empty());
        assert!(conditions("SELECT * FROM t_order WHERE order_id IN (SELECT order_id FROM t_order_item)", &[]).is_empty());

        let c = conditions("SELECT * FROM t_order WHERE order_id = 1 OR status = 'x'", &[]);
        assert_eq!(2, c.groups.len());
        assert!(c.groups[1].conditions.is_empty());
    }

    #[test]
    fn test_unqualified_column_applies_to_every_table() {
        let c = conditions("SELECT * FROM t_order o JOIN t_order_item i ON o.order_id = i.order_id WHERE user_id = 1 AND o.order_id = 2", &[]);
        let group = &c.groups[0];
        assert_eq!(ShardingValues::List(vec![Value::Int(1)]), group.find("t_order", "user_id").unwrap().values);
        assert_eq!(ShardingValues::List(vec![Value::Int(1)]), group.find("t_order_item", "user_id").unwrap().values);
        assert!(group.find("t_order_item", "order_id").is_none());
    }

    #[test]
    fn test_insert_rows() {
        let c = conditions("INSERT INTO t_order (user_id, order_id, status) VALUES (1, ?, 'a'), (2, 3, ?)", &[Value::Int(10), "b".into()]);
        assert_eq!(2, c.groups.len());
        assert_eq!(ShardingValues::List(vec![Value::Int(10)]), c.groups[0].find("t_order", "order_id").unwrap().values);
        assert_eq!(ShardingValues::List(vec![Value::Int(2)]), c.groups[1].find("t_order", "user_id").unwrap().values);
        assert_eq!(2, c.groups[1].conditions.len());
    }
}
