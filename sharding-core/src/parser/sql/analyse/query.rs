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

use sqlparser::tokenizer::Token;

use sharding_common::common::Result;

use crate::parser::sql::analyse::{Analyser, SAResult};
use crate::parser::sql::{PaginationContext, PaginationValue, SQLStatementContext, SelectStatementContext};

const PROJECTION_STOPS: &[&str] = &["FROM", "WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "FOR", "LOCK", "UNION", "INTO", "WINDOW"];
const WHERE_STOPS: &[&str] = &["GROUP", "HAVING", "ORDER", "LIMIT", "FOR", "LOCK", "UNION", "WINDOW"];
const GROUP_STOPS: &[&str] = &["HAVING", "ORDER", "LIMIT", "FOR", "LOCK", "UNION", "WINDOW"];
const ORDER_STOPS: &[&str] = &["LIMIT", "FOR", "LOCK", "UNION"];
const DML_WHERE_STOPS: &[&str] = &["ORDER", "LIMIT", "RETURNING"];

impl<'a> Analyser<'a> {
    /// `SELECT ...`, or a parenthesised select. Only the outermost select
    /// fills the statement level select context and predicate.
    pub(crate) fn parse_select(&mut self, ctx: &mut SQLStatementContext, top: bool) -> SAResult {
        let mut select = SelectStatementContext::default();
        if self.consume_token(&Token::LParen) {
            self.parse_select(ctx, false)?;
            self.expect_token(&Token::RParen)?;
        } else {
            if self.parse_keyword("WITH") {
                ctx.contains_subquery = true;
                self.parse_keyword("RECURSIVE");
                self.scan_until(ctx, &["SELECT"])?;
            }
            self.expect_keyword("SELECT")?;
            while self.peek_any_keyword(&["ALL", "DISTINCT", "DISTINCTROW", "HIGH_PRIORITY", "STRAIGHT_JOIN", "SQL_NO_CACHE", "SQL_CALC_FOUND_ROWS"]) {
                if self.peek_any_keyword(&["DISTINCT", "DISTINCTROW"]) {
                    select.distinct = true;
                }
                self.index += 1;
            }
            self.scan_until(ctx, PROJECTION_STOPS)?;
            if self.parse_keyword("INTO") {
                self.scan_until(ctx, PROJECTION_STOPS)?;
            }
            if self.parse_keyword("FROM") {
                self.parse_table_references(ctx)?;
            }
            if self.parse_keyword("WHERE") {
                let expr = self.parse_where(ctx, WHERE_STOPS)?;
                if top {
                    ctx.where_expr = Some(expr);
                }
            }
            if self.parse_keywords(&["GROUP", "BY"]) {
                select.group_by = true;
                self.scan_until(ctx, GROUP_STOPS)?;
            }
            if self.parse_keyword("HAVING") {
                self.scan_until(ctx, GROUP_STOPS)?;
            }
            if self.parse_keyword("WINDOW") {
                self.scan_until(ctx, GROUP_STOPS)?;
            }
        }
        if self.parse_keywords(&["ORDER", "BY"]) {
            select.order_by = true;
            self.scan_until(ctx, ORDER_STOPS)?;
        }
        if self.parse_keyword("LIMIT") {
            select.pagination = Some(self.parse_limit()?);
        }
        if self.parse_keyword("FOR") {
            select.lock = true;
            self.scan_until(ctx, &["UNION"])?;
        } else if self.parse_keywords(&["LOCK", "IN", "SHARE", "MODE"]) {
            select.lock = true;
        }
        if self.parse_keyword("UNION") {
            select.union = true;
            self.parse_keyword("ALL");
            self.parse_keyword("DISTINCT");
            self.parse_select(ctx, false)?;
        }
        if top {
            ctx.select = Some(select);
        }
        Ok(())
    }

    /// `LIMIT row_count`, `LIMIT offset, row_count` or `LIMIT row_count OFFSET offset`.
    fn parse_limit(&mut self) -> Result<PaginationContext> {
        let first = self.parse_pagination_value()?;
        if self.consume_token(&Token::Comma) {
            let row_count = self.parse_pagination_value()?;
            return Ok(PaginationContext { offset: Some(first), row_count: Some(row_count) });
        }
        if self.parse_keyword("OFFSET") {
            let offset = self.parse_pagination_value()?;
            return Ok(PaginationContext { offset: Some(offset), row_count: Some(first) });
        }
        Ok(PaginationContext { offset: None, row_count: Some(first) })
    }

    fn parse_pagination_value(&mut self) -> Result<PaginationValue> {
        let token = self.advance().ok_or_else(|| self.expected("limit value"))?;
        match &token.token {
            Token::Number(n, _) => {
                let value = n.parse::<i64>().map_err(|_| self.expected("integer limit"))?;
                Ok(PaginationValue::Literal { start: token.start, stop: token.stop, value })
            }
            Token::Placeholder(_) => {
                let index = self.parameters[self.index - 1].ok_or_else(|| self.expected("parameter marker"))?;
                Ok(PaginationValue::Parameter { start: token.start, stop: token.stop, index })
            }
            _ => Err(self.expected("limit value")),
        }
    }

    pub(crate) fn parse_update(&mut self, ctx: &mut SQLStatementContext) -> SAResult {
        self.expect_keyword("UPDATE")?;
        while self.parse_keyword("LOW_PRIORITY") || self.parse_keyword("IGNORE") {}
        self.parse_table_references(ctx)?;
        self.expect_keyword("SET")?;
        self.scan_until(ctx, &["WHERE", "ORDER", "LIMIT"])?;
        self.parse_dml_tail(ctx)
    }

    pub(crate) fn parse_delete(&mut self, ctx: &mut SQLStatementContext) -> SAResult {
        self.expect_keyword("DELETE")?;
        while self.parse_keyword("LOW_PRIORITY") || self.parse_keyword("QUICK") || self.parse_keyword("IGNORE") {}
        if !self.peek_keyword("FROM") {
            // multi table form, the targets repeat names or aliases of the FROM list
            while !self.peek_keyword("FROM") && self.advance().is_some() {}
        }
        self.expect_keyword("FROM")?;
        self.parse_table_references(ctx)?;
        if self.parse_keyword("USING") {
            self.parse_table_references(ctx)?;
        }
        self.parse_dml_tail(ctx)
    }

    fn parse_dml_tail(&mut self, ctx: &mut SQLStatementContext) -> SAResult {
        if self.parse_keyword("WHERE") {
            ctx.where_expr = Some(self.parse_where(ctx, DML_WHERE_STOPS)?);
        }
        if self.parse_keywords(&["ORDER", "BY"]) {
            self.scan_until(ctx, &["LIMIT"])?;
        }
        if self.parse_keyword("LIMIT") {
            self.parse_limit()?;
        }
        self.scan_until(ctx, &[])
    }
}
