// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use indexmap::IndexMap;
use log::debug;

use crate::discovery::database::{ShardingRule, ShardingStrategy};
use crate::handler::generated_key::GeneratedKeyContext;
use crate::parser::sql::{BinaryOperator, ExpressionSegment, PaginationValue, ParameterMarkerType, SQLStatementContext, StatementType};
use crate::rewrite::token::{
    GeneratedKeyAssignmentToken, GeneratedKeyInsertColumnToken, InItem, InPredicateToken, InsertValue, InsertValuesToken, PaginationToken,
    SQLToken, TableToken,
};
use crate::route::condition::sharding_owner_table;
use crate::route::RouteContext;
use crate::value::Value;

pub struct GeneratorContext<'a> {
    pub ctx: &'a SQLStatementContext,
    pub rule: &'a ShardingRule,
    pub route_context: &'a RouteContext,
    pub parameters: &'a [Value],
    pub generated_key: Option<&'a GeneratedKeyContext>,
}

pub trait SQLTokenGenerator {
    /// Decided on statement structure alone, never on routing or parameters.
    fn is_generate_sql_token(&self, ctx: &SQLStatementContext, rule: &ShardingRule, generated_key: Option<&GeneratedKeyContext>) -> bool;

    /// `previous` holds the tokens of the generators that ran before.
    fn generate(&self, gen: &GeneratorContext<'_>, previous: &[SQLToken]) -> Vec<SQLToken>;
}

fn generators() -> Vec<Box<dyn SQLTokenGenerator>> {
    vec![
        Box::new(TableTokenGenerator),
        Box::new(GeneratedKeyInsertColumnTokenGenerator),
        Box::new(GeneratedKeyAssignmentTokenGenerator),
        Box::new(InsertValuesTokenGenerator),
        Box::new(PaginationTokenGenerator),
        Box::new(InPredicateTokenGenerator),
    ]
}

pub fn is_generate_sql_token(ctx: &SQLStatementContext, rule: &ShardingRule, generated_key: Option<&GeneratedKeyContext>) -> bool {
    generators().iter().any(|g| g.is_generate_sql_token(ctx, rule, generated_key))
}

pub fn generate_sql_tokens(gen: &GeneratorContext<'_>) -> Vec<SQLToken> {
    let mut tokens = vec![];
    for generator in generators() {
        if generator.is_generate_sql_token(gen.ctx, gen.rule, gen.generated_key) {
            let generated = generator.generate(gen, &tokens);
            tokens.extend(generated);
        }
    }
    debug!("{} sql tokens for `{}`", tokens.len(), gen.ctx.sql);
    tokens
}

fn has_sharding_table(ctx: &SQLStatementContext, rule: &ShardingRule) -> bool {
    ctx.tables.iter().any(|t| rule.is_sharding_table(&t.name))
}

fn has_generated_values(generated_key: Option<&GeneratedKeyContext>) -> bool {
    generated_key.map_or(false, |k| !k.values.is_empty())
}

struct TableTokenGenerator;

impl SQLTokenGenerator for TableTokenGenerator {
    fn is_generate_sql_token(&self, ctx: &SQLStatementContext, rule: &ShardingRule, _: Option<&GeneratedKeyContext>) -> bool {
        has_sharding_table(ctx, rule)
    }

    fn generate(&self, gen: &GeneratorContext<'_>, _: &[SQLToken]) -> Vec<SQLToken> {
        let (ctx, rule) = (gen.ctx, gen.rule);
        let mut tokens: Vec<SQLToken> = ctx
            .tables
            .iter()
            .filter(|t| rule.is_sharding_table(&t.name))
            .map(|t| SQLToken::Table(TableToken { start: t.start, stop: t.stop, logic_table: t.name.clone(), quote: t.quote }))
            .collect();
        // qualifiers spelling a table name rather than an alias
        for owner in &ctx.owners {
            if !ctx.is_alias(&owner.name) && rule.is_sharding_table(&owner.name) && ctx.tables.iter().any(|t| t.name.eq_ignore_ascii_case(&owner.name)) {
                tokens.push(SQLToken::Table(TableToken {
                    start: owner.start,
                    stop: owner.stop,
                    logic_table: owner.name.clone(),
                    quote: owner.quote,
                }));
            }
        }
        tokens
    }
}

struct GeneratedKeyInsertColumnTokenGenerator;

impl SQLTokenGenerator for GeneratedKeyInsertColumnTokenGenerator {
    fn is_generate_sql_token(&self, ctx: &SQLStatementContext, _: &ShardingRule, generated_key: Option<&GeneratedKeyContext>) -> bool {
        has_generated_values(generated_key) && ctx.insert.as_ref().map_or(false, |i| i.columns_close.is_some() && !i.values.is_empty())
    }

    fn generate(&self, gen: &GeneratorContext<'_>, _: &[SQLToken]) -> Vec<SQLToken> {
        match (gen.ctx.insert.as_ref().and_then(|i| i.columns_close), gen.generated_key) {
            (Some(start), Some(key)) => {
                vec![SQLToken::GeneratedKeyInsertColumn(GeneratedKeyInsertColumnToken { start, column: key.column.clone() })]
            }
            _ => vec![],
        }
    }
}

struct GeneratedKeyAssignmentTokenGenerator;

impl SQLTokenGenerator for GeneratedKeyAssignmentTokenGenerator {
    fn is_generate_sql_token(&self, ctx: &SQLStatementContext, _: &ShardingRule, generated_key: Option<&GeneratedKeyContext>) -> bool {
        has_generated_values(generated_key) && ctx.insert.as_ref().map_or(false, |i| i.is_set_form())
    }

    fn generate(&self, gen: &GeneratorContext<'_>, _: &[SQLToken]) -> Vec<SQLToken> {
        let start = gen.ctx.insert.as_ref().and_then(|i| i.set_stop());
        match (start, gen.generated_key.and_then(|k| k.render(0).map(|v| (k, v)))) {
            (Some(start), Some((key, value))) => {
                vec![SQLToken::GeneratedKeyAssignment(GeneratedKeyAssignmentToken { start, column: key.column.clone(), value })]
            }
            _ => vec![],
        }
    }
}

struct InsertValuesTokenGenerator;

impl SQLTokenGenerator for InsertValuesTokenGenerator {
    fn is_generate_sql_token(&self, ctx: &SQLStatementContext, rule: &ShardingRule, _: Option<&GeneratedKeyContext>) -> bool {
        has_sharding_table(ctx, rule) && ctx.insert.as_ref().map_or(false, |i| !i.values.is_empty())
    }

    fn generate(&self, gen: &GeneratorContext<'_>, previous: &[SQLToken]) -> Vec<SQLToken> {
        let insert = match &gen.ctx.insert {
            Some(insert) => insert,
            None => return vec![],
        };
        let (first, last) = match (insert.values.first(), insert.values.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return vec![],
        };
        // generated values only go where the key column was added
        let generated_key = if previous.iter().any(|t| matches!(t, SQLToken::GeneratedKeyInsertColumn(_))) {
            gen.generated_key
        } else {
            None
        };
        let values = insert
            .values
            .iter()
            .enumerate()
            .map(|(index, row)| InsertValue {
                text: gen.ctx.sql[row.start..row.stop].to_string(),
                generated: generated_key.and_then(|k| k.render(index)),
                data_nodes: gen.route_context.original_data_nodes.get(index).cloned().unwrap_or_default(),
            })
            .collect();
        vec![SQLToken::InsertValues(InsertValuesToken { start: first.start, stop: last.stop, values })]
    }
}

/// With several route units each unit must return the first `offset + count`
/// rows, so the offset becomes 0 and the row count `offset + count`.
struct PaginationTokenGenerator;

impl SQLTokenGenerator for PaginationTokenGenerator {
    fn is_generate_sql_token(&self, ctx: &SQLStatementContext, rule: &ShardingRule, _: Option<&GeneratedKeyContext>) -> bool {
        has_sharding_table(ctx, rule) && ctx.pagination().map_or(false, |p| p.offset.is_some())
    }

    fn generate(&self, gen: &GeneratorContext<'_>, _: &[SQLToken]) -> Vec<SQLToken> {
        let pagination = match gen.ctx.pagination() {
            Some(pagination) if gen.route_context.route_units.len() > 1 => pagination,
            _ => return vec![],
        };
        let (offset, row_count) = match (&pagination.offset, &pagination.row_count) {
            (Some(offset), Some(row_count)) => (offset, row_count),
            _ => return vec![],
        };
        let (offset_value, count_value) = match (offset.resolve(gen.parameters), row_count.resolve(gen.parameters)) {
            (Some(o), Some(c)) => (o, c),
            _ => return vec![],
        };
        vec![
            SQLToken::Offset(pagination_token(&gen.ctx.sql, offset, 0)),
            SQLToken::RowCount(pagination_token(&gen.ctx.sql, row_count, offset_value.saturating_add(count_value))),
        ]
    }
}

fn pagination_token(sql: &str, value: &PaginationValue, revised: i64) -> PaginationToken {
    let parameter = match value {
        PaginationValue::Parameter { index, .. } => Some(*index),
        PaginationValue::Literal { .. } => None,
    };
    PaginationToken { start: value.start(), stop: value.stop(), revised, parameter, text: sql[value.start()..value.stop()].to_string() }
}

/// Trims `sharding_column IN (...)` per unit for SELECT fan-out. `$n` markers
/// are positional and never filtered.
struct InPredicateTokenGenerator;

impl InPredicateTokenGenerator {
    fn predicates<'a>(ctx: &'a SQLStatementContext, rule: &ShardingRule) -> Vec<(&'a str, &'a ExpressionSegment)> {
        let mut found = vec![];
        let mut stack: Vec<&ExpressionSegment> = ctx.where_expr.iter().collect();
        while let Some(expr) = stack.pop() {
            match expr {
                ExpressionSegment::Binary { left, op: BinaryOperator::And, right, .. }
                | ExpressionSegment::Binary { left, op: BinaryOperator::Or, right, .. } => {
                    stack.push(right);
                    stack.push(left);
                }
                ExpressionSegment::In { left, list, not: false, .. } => {
                    let plain = list.iter().all(|i| matches!(i, ExpressionSegment::Literal { .. } | ExpressionSegment::Parameter { .. }));
                    if let (ExpressionSegment::Column(column), true) = (left.as_ref(), plain) {
                        if let Some(table) = sharding_owner_table(ctx, rule, column) {
                            found.push((table, expr));
                        }
                    }
                }
                _ => {}
            }
        }
        found
    }
}

impl SQLTokenGenerator for InPredicateTokenGenerator {
    fn is_generate_sql_token(&self, ctx: &SQLStatementContext, rule: &ShardingRule, _: Option<&GeneratedKeyContext>) -> bool {
        ctx.statement_type == StatementType::Select
            && ctx.parameter_marker_type == ParameterMarkerType::Question
            && !Self::predicates(ctx, rule).is_empty()
    }

    fn generate(&self, gen: &GeneratorContext<'_>, _: &[SQLToken]) -> Vec<SQLToken> {
        if gen.route_context.route_units.len() <= 1 {
            return vec![];
        }
        let mut tokens = vec![];
        for (table, expr) in Self::predicates(gen.ctx, gen.rule) {
            let (column, list, list_start, list_stop) = match expr {
                ExpressionSegment::In { left, list, list_start, list_stop, .. } => match left.as_ref() {
                    ExpressionSegment::Column(column) => (column, list, *list_start, *list_stop),
                    _ => continue,
                },
                _ => continue,
            };
            let table_rule = match gen.rule.find_table_rule(table) {
                Some(table_rule) => table_rule,
                None => continue,
            };
            let on_column = |s: &Option<ShardingStrategy>| s.as_ref().and_then(|s| s.standard_algorithm(&column.name));
            let items = list
                .iter()
                .map(|item| {
                    let (value, parameter) = match item {
                        ExpressionSegment::Literal { value, .. } => (Some(value.clone()), None),
                        ExpressionSegment::Parameter { index, .. } => (gen.parameters.get(*index).cloned(), Some(*index)),
                        _ => (None, None),
                    };
                    InItem { text: gen.ctx.sql[item.start()..item.stop()].to_string(), value, parameter }
                })
                .collect();
            let data_sources = table_rule.data_source_names();
            let actual_tables: IndexMap<String, Vec<String>> =
                data_sources.iter().map(|ds| (ds.clone(), table_rule.actual_tables(ds))).collect();
            tokens.push(SQLToken::InPredicate(InPredicateToken {
                start: list_start,
                stop: list_stop,
                logic_table: table_rule.logic_table.clone(),
                column: column.name.clone(),
                items,
                database_algorithm: on_column(&table_rule.database_strategy),
                data_sources,
                table_algorithm: on_column(&table_rule.table_strategy),
                actual_tables,
            }));
        }
        tokens
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexSet;

    use crate::discovery::database::ShardingRule;
    use crate::handler::generated_key::GeneratedKeyContext;
    use crate::parser::sql::analyse::analyse;
    use crate::rewrite::token::generator::{generate_sql_tokens, is_generate_sql_token, GeneratorContext};
    use crate::rewrite::token::SQLToken;
    use crate::rewrite::SQLReWrite;
    use crate::route::condition::extract;
    use crate::route::engine::route;
    use crate::route::{RouteContext, RouteMapper, RouteUnit};
    use crate::value::Value;

    fn rule() -> ShardingRule {
        ShardingRule::from_file("./etc/sharding.yaml").unwrap()
    }

    fn render_all(tokens: &[SQLToken], unit: Option<&RouteUnit>) -> Vec<String> {
        tokens
            .iter()
            .map(|t| {
                let mut f = String::new();
                t.rewrite(&mut f, unit).unwrap();
                f
            })
            .collect()
    }

    #[test]
    fn test_table_and_owner_tokens() {
        let rule = rule();
        let ctx = analyse("SELECT t_order.order_id FROM t_order JOIN t_config c ON t_order.status = c.k WHERE t_order.user_id = 1").unwrap();
        assert!(is_generate_sql_token(&ctx, &rule, None));
        let route_context = RouteContext::default();
        let tokens = generate_sql_tokens(&GeneratorContext { ctx: &ctx, rule: &rule, route_context: &route_context, parameters: &[], generated_key: None });
        assert_eq!(4, tokens.len());
        assert!(tokens.iter().all(|t| matches!(t, SQLToken::Table(_))));

        let ctx = analyse("SELECT * FROM t_user").unwrap();
        assert!(!is_generate_sql_token(&ctx, &rule, None));
    }

    #[test]
    fn test_generated_key_tokens_idempotent() {
        let rule = rule();
        let ctx = analyse("INSERT INTO t_order (user_id, status) VALUES (?, ?), (?, ?)").unwrap();
        let generated_key = GeneratedKeyContext::create(&ctx, &rule);
        let parameters = vec![Value::Int(1), "a".into(), Value::Int(2), "b".into()];
        let conditions = extract(&ctx, &rule, &parameters, generated_key.as_ref());
        let route_context = route(&ctx, &rule, &conditions).unwrap();
        let gen = GeneratorContext { ctx: &ctx, rule: &rule, route_context: &route_context, parameters: &parameters, generated_key: generated_key.as_ref() };
        let tokens = generate_sql_tokens(&gen);
        assert!(matches!(tokens[1], SQLToken::GeneratedKeyInsertColumn(_)));
        assert!(matches!(tokens[2], SQLToken::InsertValues(_)));
        for unit in &route_context.route_units {
            assert_eq!(render_all(&tokens, Some(unit)), render_all(&generate_sql_tokens(&gen), Some(unit)));
        }
        assert_eq!(vec!["t_order", ", order_id", "(?, ?, ?), (?, ?, ?)"], render_all(&tokens, None));
    }

    #[test]
    fn test_empty_generated_key_suppressed() {
        let rule = rule();
        let ctx = analyse("INSERT INTO t_order (user_id, status) VALUES (1, 'a')").unwrap();
        let mut generated_key = GeneratedKeyContext::create(&ctx, &rule).unwrap();
        generated_key.values.clear();
        let route_context = RouteContext::default();
        let tokens = generate_sql_tokens(&GeneratorContext {
            ctx: &ctx,
            rule: &rule,
            route_context: &route_context,
            parameters: &[],
            generated_key: Some(&generated_key),
        });
        assert!(!tokens.iter().any(|t| matches!(t, SQLToken::GeneratedKeyInsertColumn(_))));
        assert_eq!(vec!["t_order", "(1, 'a')"], render_all(&tokens, None));
    }

    #[test]
    fn test_pagination_tokens() {
        let rule = rule();
        let ctx = analyse("SELECT * FROM t_order ORDER BY order_id LIMIT ?, 10").unwrap();
        let parameters = vec![Value::Int(20)];
        let route_context = route(&ctx, &rule, &extract(&ctx, &rule, &parameters, None)).unwrap();
        let gen = GeneratorContext { ctx: &ctx, rule: &rule, route_context: &route_context, parameters: &parameters, generated_key: None };
        let tokens = generate_sql_tokens(&gen);
        assert_eq!(vec!["t_order", "?", "30"], render_all(&tokens, None));
        assert_eq!(Some((0, Value::Int(0))), tokens[1].replaced_parameter());

        let single = analyse("SELECT * FROM t_order WHERE user_id = 1 AND order_id = 1 LIMIT 5, 10").unwrap();
        let route_context = route(&single, &rule, &extract(&single, &rule, &[], None)).unwrap();
        let tokens = generate_sql_tokens(&GeneratorContext { ctx: &single, rule: &rule, route_context: &route_context, parameters: &[], generated_key: None });
        assert_eq!(vec!["t_order"], render_all(&tokens, None));
    }

    #[test]
    fn test_in_predicate_token() {
        let rule = rule();
        let ctx = analyse("SELECT * FROM t_order WHERE user_id = 1 AND order_id IN (?, ?, 3, ?)").unwrap();
        let parameters = vec![Value::Int(1), Value::Int(2), Value::Int(4)];
        let route_context = route(&ctx, &rule, &extract(&ctx, &rule, &parameters, None)).unwrap();
        assert_eq!(2, route_context.route_units.len());
        let tokens = generate_sql_tokens(&GeneratorContext { ctx: &ctx, rule: &rule, route_context: &route_context, parameters: &parameters, generated_key: None });
        let token = tokens.iter().find(|t| matches!(t, SQLToken::InPredicate(_))).unwrap();

        let even = RouteUnit::new("ds_1", vec![RouteMapper::new("t_order", "t_order_0")]);
        let odd = RouteUnit::new("ds_1", vec![RouteMapper::new("t_order", "t_order_1")]);
        assert_eq!(vec!["(?, ?)"], render_all(std::slice::from_ref(token), Some(&even)));
        assert_eq!(vec![0], token.removed_parameter_indices(&even));
        assert_eq!(vec!["(?, 3)"], render_all(std::slice::from_ref(token), Some(&odd)));
        assert_eq!(vec![1, 2], token.removed_parameter_indices(&odd));

        let units: IndexSet<RouteUnit> = vec![even].into_iter().collect();
        let single = RouteContext::new(units);
        let tokens = generate_sql_tokens(&GeneratorContext { ctx: &ctx, rule: &rule, route_context: &single, parameters: &parameters, generated_key: None });
        assert!(!tokens.iter().any(|t| matches!(t, SQLToken::InPredicate(_))));
    }
}
