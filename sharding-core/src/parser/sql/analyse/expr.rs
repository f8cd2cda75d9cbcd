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
use crate::parser::sql::{BinaryOperator, ColumnSegment, ExpressionSegment, SQLStatementContext};
use crate::value::Value;

impl<'a> Analyser<'a> {
    /// Parses a predicate. When the predicate cannot be read as a tree the
    /// whole clause degrades to one opaque segment.
    pub(crate) fn parse_where(&mut self, ctx: &mut SQLStatementContext, stops: &[&str]) -> Result<ExpressionSegment> {
        let checkpoint = self.index;
        let (tables, owners) = (ctx.tables.len(), ctx.owners.len());
        match self.parse_expr(ctx) {
            Ok(expr) if self.at_end(stops) => Ok(expr),
            _ => {
                self.index = checkpoint;
                ctx.tables.truncate(tables);
                ctx.owners.truncate(owners);
                let start = self.current_start();
                self.scan_until(ctx, stops)?;
                Ok(ExpressionSegment::Common { start, stop: self.prev_stop().max(start) })
            }
        }
    }

    pub(crate) fn parse_expr(&mut self, ctx: &mut SQLStatementContext) -> Result<ExpressionSegment> {
        let mut left = self.parse_and(ctx)?;
        loop {
            let op = if self.parse_keyword("OR") {
                BinaryOperator::Or
            } else if self.parse_keyword("XOR") {
                BinaryOperator::Other
            } else {
                break;
            };
            let right = self.parse_and(ctx)?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self, ctx: &mut SQLStatementContext) -> Result<ExpressionSegment> {
        let mut left = self.parse_not(ctx)?;
        while self.parse_keyword("AND") {
            let right = self.parse_not(ctx)?;
            left = binary(left, BinaryOperator::And, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self, ctx: &mut SQLStatementContext) -> Result<ExpressionSegment> {
        let start = self.current_start();
        if self.parse_keyword("NOT") {
            let expr = self.parse_not(ctx)?;
            return Ok(ExpressionSegment::Not { start, stop: expr.stop(), expr: Box::new(expr) });
        }
        self.parse_predicate(ctx)
    }

    fn parse_predicate(&mut self, ctx: &mut SQLStatementContext) -> Result<ExpressionSegment> {
        let left = self.parse_operand(ctx)?;
        if let Some(op) = self.parse_comparison() {
            let right = self.parse_operand(ctx)?;
            return Ok(binary(left, op, right));
        }
        if self.parse_keyword("IS") {
            self.parse_keyword("NOT");
            self.advance().ok_or_else(|| self.expected("NULL"))?;
            return Ok(ExpressionSegment::Common { start: left.start(), stop: self.prev_stop() });
        }
        let not = self.parse_keyword("NOT");
        if self.parse_keyword("BETWEEN") {
            let low = self.parse_operand(ctx)?;
            self.expect_keyword("AND")?;
            let high = self.parse_operand(ctx)?;
            return Ok(ExpressionSegment::Between {
                start: left.start(),
                stop: high.stop(),
                left: Box::new(left),
                low: Box::new(low),
                high: Box::new(high),
                not,
            });
        }
        if self.parse_keyword("IN") {
            return self.parse_in_list(ctx, left, not);
        }
        if self.parse_keyword("LIKE") {
            let right = self.parse_operand(ctx)?;
            let stop = if self.parse_keyword("ESCAPE") { self.parse_operand(ctx)?.stop() } else { right.stop() };
            let op = if not { BinaryOperator::Other } else { BinaryOperator::Like };
            return Ok(ExpressionSegment::Binary { start: left.start(), stop, left: Box::new(left), op, right: Box::new(right) });
        }
        if self.parse_keyword("REGEXP") || self.parse_keyword("RLIKE") || self.parse_keywords(&["SOUNDS", "LIKE"]) {
            let right = self.parse_operand(ctx)?;
            return Ok(binary(left, BinaryOperator::Other, right));
        }
        if not {
            return Err(self.expected("BETWEEN, IN or LIKE"));
        }
        Ok(left)
    }

    fn parse_in_list(&mut self, ctx: &mut SQLStatementContext, left: ExpressionSegment, not: bool) -> Result<ExpressionSegment> {
        if self.peek_subquery() {
            let (start, stop) = self.parse_subquery(ctx)?;
            return Ok(ExpressionSegment::In {
                start: left.start(),
                stop,
                left: Box::new(left),
                list: vec![ExpressionSegment::Subquery { start, stop }],
                list_start: start,
                list_stop: stop,
                not,
            });
        }
        let open = self.expect_token(&Token::LParen)?;
        let mut list = vec![];
        if !self.peek_token(&Token::RParen) {
            loop {
                list.push(self.parse_operand(ctx)?);
                if !self.consume_token(&Token::Comma) {
                    break;
                }
            }
        }
        let close = self.expect_token(&Token::RParen)?;
        Ok(ExpressionSegment::In {
            start: left.start(),
            stop: close.stop,
            left: Box::new(left),
            list,
            list_start: open.start,
            list_stop: close.stop,
            not,
        })
    }

    fn parse_comparison(&mut self) -> Option<BinaryOperator> {
        let op = match self.peek().map(|t| &t.token) {
            Some(Token::Eq) | Some(Token::DoubleEq) => BinaryOperator::Eq,
            Some(Token::Neq) => BinaryOperator::NotEq,
            Some(Token::Lt) => BinaryOperator::Lt,
            Some(Token::Gt) => BinaryOperator::Gt,
            Some(Token::LtEq) => BinaryOperator::LtEq,
            Some(Token::GtEq) => BinaryOperator::GtEq,
            Some(Token::Spaceship) => BinaryOperator::Other,
            _ => return None,
        };
        self.index += 1;
        Some(op)
    }

    /// A primary followed by any arithmetic. Arithmetic makes it opaque.
    pub(crate) fn parse_operand(&mut self, ctx: &mut SQLStatementContext) -> Result<ExpressionSegment> {
        let first = self.parse_primary(ctx)?;
        let start = first.start();
        let mut operand = first;
        while self.parse_arithmetic() {
            let right = self.parse_primary(ctx)?;
            operand = ExpressionSegment::Common { start, stop: right.stop() };
        }
        if self.parse_keyword("COLLATE") {
            self.advance().ok_or_else(|| self.expected("collation"))?;
            operand = ExpressionSegment::Common { start, stop: self.prev_stop() };
        }
        Ok(operand)
    }

    fn parse_arithmetic(&mut self) -> bool {
        let arithmetic = match self.peek().map(|t| &t.token) {
            Some(Token::Plus) | Some(Token::Minus) | Some(Token::Mul) | Some(Token::Div) | Some(Token::Mod)
            | Some(Token::Caret) | Some(Token::Ampersand) | Some(Token::Pipe) | Some(Token::StringConcat)
            | Some(Token::ShiftLeft) | Some(Token::ShiftRight) => true,
            Some(Token::Word(w)) if w.quote_style.is_none() => {
                w.value.eq_ignore_ascii_case("DIV") || w.value.eq_ignore_ascii_case("MOD")
            }
            _ => false,
        };
        if arithmetic {
            self.index += 1;
        }
        arithmetic
    }

    fn parse_primary(&mut self, ctx: &mut SQLStatementContext) -> Result<ExpressionSegment> {
        let token = match self.peek() {
            Some(t) => t.clone(),
            None => return Err(self.expected("expression")),
        };
        let (start, stop) = (token.start, token.stop);
        match token.token {
            Token::LParen => {
                if self.peek_subquery() {
                    let (start, stop) = self.parse_subquery(ctx)?;
                    return Ok(ExpressionSegment::Subquery { start, stop });
                }
                self.index += 1;
                let expr = self.parse_expr(ctx)?;
                if self.peek_token(&Token::Comma) {
                    self.scan_until(ctx, &[])?;
                    self.expect_token(&Token::RParen)?;
                    return Ok(ExpressionSegment::Common { start, stop: self.prev_stop() });
                }
                self.expect_token(&Token::RParen)?;
                Ok(expr)
            }
            Token::Number(n, _) => {
                self.index += 1;
                Ok(ExpressionSegment::Literal { start, stop, value: number(&n) })
            }
            Token::SingleQuotedString(s)
            | Token::DoubleQuotedString(s)
            | Token::NationalStringLiteral(s)
            | Token::EscapedStringLiteral(s)
            | Token::HexStringLiteral(s) => {
                self.index += 1;
                Ok(ExpressionSegment::Literal { start, stop, value: Value::Text(s) })
            }
            Token::Placeholder(_) => {
                let index = self.parameters[self.index].ok_or_else(|| self.expected("parameter marker"))?;
                self.index += 1;
                Ok(ExpressionSegment::Parameter { start, stop, index })
            }
            Token::Minus | Token::Plus => {
                self.index += 1;
                let operand = self.parse_primary(ctx)?;
                match operand {
                    ExpressionSegment::Literal { stop, value: Value::Int(i), .. } if token.token == Token::Minus => {
                        Ok(ExpressionSegment::Literal { start, stop, value: Value::Int(-i) })
                    }
                    ExpressionSegment::Literal { stop, value: Value::Double(d), .. } if token.token == Token::Minus => {
                        Ok(ExpressionSegment::Literal { start, stop, value: Value::Double(-d) })
                    }
                    ExpressionSegment::Literal { stop, value, .. } => Ok(ExpressionSegment::Literal { start, stop, value }),
                    other => Ok(ExpressionSegment::Common { start, stop: other.stop() }),
                }
            }
            Token::Tilde | Token::ExclamationMark => {
                self.index += 1;
                let operand = self.parse_primary(ctx)?;
                Ok(ExpressionSegment::Common { start, stop: operand.stop() })
            }
            Token::Word(ref w) if w.quote_style.is_none() => {
                let keyword = w.value.to_uppercase();
                match keyword.as_str() {
                    "NULL" => {
                        self.index += 1;
                        Ok(ExpressionSegment::Literal { start, stop, value: Value::Null })
                    }
                    "TRUE" | "FALSE" => {
                        self.index += 1;
                        Ok(ExpressionSegment::Literal { start, stop, value: Value::Bool(keyword == "TRUE") })
                    }
                    "CASE" => self.parse_case(ctx),
                    "EXISTS" => {
                        self.index += 1;
                        let (_, stop) = self.parse_subquery(ctx)?;
                        Ok(ExpressionSegment::Subquery { start, stop })
                    }
                    "INTERVAL" | "BINARY" => {
                        self.index += 1;
                        let operand = self.parse_operand(ctx)?;
                        if keyword == "INTERVAL" {
                            self.advance();
                        }
                        Ok(ExpressionSegment::Common { start, stop: operand.stop().max(self.prev_stop()) })
                    }
                    _ => self.parse_column_or_function(ctx),
                }
            }
            Token::Word(_) => self.parse_column_or_function(ctx),
            _ => Err(self.expected("expression")),
        }
    }

    fn parse_column_or_function(&mut self, ctx: &mut SQLStatementContext) -> Result<ExpressionSegment> {
        let start = self.current_start();
        if self.peek_nth(1).map_or(false, |t| t.token == Token::LParen) {
            self.index += 1;
            self.skip_parenthesized(ctx)?;
            return Ok(ExpressionSegment::Common { start, stop: self.prev_stop() });
        }
        match self.parse_identifier_chain(ctx) {
            Some((name, _, stop, owner)) => {
                if self.peek_token(&Token::LParen) {
                    // schema qualified function
                    self.skip_parenthesized(ctx)?;
                    return Ok(ExpressionSegment::Common { start, stop: self.prev_stop() });
                }
                Ok(ExpressionSegment::Column(ColumnSegment { start, stop, name, owner }))
            }
            None => Err(self.expected("column")),
        }
    }

    fn skip_parenthesized(&mut self, ctx: &mut SQLStatementContext) -> SAResult {
        self.expect_token(&Token::LParen)?;
        self.scan_until(ctx, &[])?;
        self.expect_token(&Token::RParen)?;
        Ok(())
    }

    fn parse_case(&mut self, ctx: &mut SQLStatementContext) -> Result<ExpressionSegment> {
        let start = self.current_start();
        self.expect_keyword("CASE")?;
        let mut depth = 1usize;
        while depth > 0 {
            if self.peek_keyword("CASE") {
                depth += 1;
                self.index += 1;
            } else if self.peek_keyword("END") {
                depth -= 1;
                self.index += 1;
            } else if self.peek_token(&Token::LParen) {
                self.skip_parenthesized(ctx)?;
            } else if self.peek().map_or(false, |t| matches!(t.token, Token::Word(_))) {
                self.parse_identifier_chain(ctx);
            } else if self.advance().is_none() {
                return Err(self.expected("END"));
            }
        }
        Ok(ExpressionSegment::Common { start, stop: self.prev_stop() })
    }
}

fn binary(left: ExpressionSegment, op: BinaryOperator, right: ExpressionSegment) -> ExpressionSegment {
    ExpressionSegment::Binary { start: left.start(), stop: right.stop(), left: Box::new(left), op, right: Box::new(right) }
}

fn number(n: &str) -> Value {
    match n.parse::<i64>() {
        Ok(i) => Value::Int(i),
        Err(_) => n.parse::<f64>().map(Value::Double).unwrap_or_else(|_| Value::Text(n.to_string())),
    }
}
