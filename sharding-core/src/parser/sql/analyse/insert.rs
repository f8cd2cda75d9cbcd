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
use crate::parser::sql::{AssignmentSegment, InsertStatementContext, InsertValueGroup, SQLStatementContext};

impl<'a> Analyser<'a> {
    /// `INSERT [INTO] t [(cols)] {VALUES (...), ... | SET c = v, ... | SELECT ...} [ON DUPLICATE KEY UPDATE ...]`
    pub(crate) fn parse_insert(&mut self, ctx: &mut SQLStatementContext) -> SAResult {
        if !(self.parse_keyword("INSERT") || self.parse_keyword("REPLACE")) {
            return Err(self.expected("INSERT"));
        }
        while self.peek_any_keyword(&["LOW_PRIORITY", "DELAYED", "HIGH_PRIORITY", "IGNORE"]) {
            self.index += 1;
        }
        self.parse_keyword("INTO");
        if !self.parse_table_segment(ctx, false)? {
            return Err(self.expected("table name"));
        }
        if self.parse_keyword("PARTITION") {
            self.expect_token(&Token::LParen)?;
            self.scan_until(ctx, &[])?;
            self.expect_token(&Token::RParen)?;
        }

        let mut insert = InsertStatementContext::default();
        if self.peek_token(&Token::LParen) && !self.peek_subquery() {
            self.index += 1;
            if !self.peek_token(&Token::RParen) {
                loop {
                    let (column, _, _, _) = self.parse_identifier_chain(ctx).ok_or_else(|| self.expected("column name"))?;
                    insert.columns.push(column);
                    if !self.consume_token(&Token::Comma) {
                        break;
                    }
                }
            }
            let close = self.expect_token(&Token::RParen)?;
            insert.columns_close = Some(close.start);
        }

        if self.parse_keyword("VALUES") || self.parse_keyword("VALUE") {
            loop {
                insert.values.push(self.parse_value_group(ctx)?);
                if !self.consume_token(&Token::Comma) {
                    break;
                }
            }
        } else if self.parse_keyword("SET") {
            let from = self.index;
            loop {
                let (column, _, _, _) = self.parse_identifier_chain(ctx).ok_or_else(|| self.expected("column name"))?;
                self.expect_token(&Token::Eq)?;
                let value = self.parse_expr(ctx)?;
                insert.set_assignments.push(AssignmentSegment { column, value });
                if !self.consume_token(&Token::Comma) {
                    break;
                }
            }
            insert.set_parameters = self.parameters_between(from, self.index);
        } else if self.peek_any_keyword(&["SELECT", "WITH"]) || self.peek_token(&Token::LParen) {
            insert.insert_select = true;
            ctx.contains_subquery = true;
            self.parse_select(ctx, false)?;
        } else {
            return Err(self.expected("VALUES, SET or SELECT"));
        }

        if self.parse_keywords(&["ON", "DUPLICATE", "KEY", "UPDATE"]) {
            insert.on_duplicate = true;
            self.scan_until(ctx, &[])?;
        }
        ctx.insert = Some(insert);
        Ok(())
    }

    fn parse_value_group(&mut self, ctx: &mut SQLStatementContext) -> Result<InsertValueGroup> {
        let from = self.index;
        let open = self.expect_token(&Token::LParen)?;
        let mut values = vec![];
        if !self.peek_token(&Token::RParen) {
            loop {
                values.push(self.parse_expr(ctx)?);
                if !self.consume_token(&Token::Comma) {
                    break;
                }
            }
        }
        let close = self.expect_token(&Token::RParen)?;
        Ok(InsertValueGroup {
            start: open.start,
            stop: close.stop,
            values,
            parameters: self.parameters_between(from, self.index),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::sql::analyse::analyse;
    use crate::parser::sql::{ExpressionSegment, StatementType};

    #[test]
    fn test_insert_values() {
        let sql = "INSERT INTO t_order (user_id, status) VALUES (?, ?), (?, 'init') ON DUPLICATE KEY UPDATE status = ?";
        let ctx = analyse(sql).unwrap();
        assert_eq!(StatementType::Insert, ctx.statement_type);
        let insert = ctx.insert.as_ref().unwrap();
        assert_eq!(vec!["user_id".to_string(), "status".to_string()], insert.columns);
        assert_eq!(")", &sql[insert.columns_close.unwrap()..insert.columns_close.unwrap() + 1]);
        assert_eq!(2, insert.values.len());
        assert_eq!(vec![0, 1], insert.values[0].parameters);
        assert_eq!(vec![2], insert.values[1].parameters);
        assert_eq!("(?, 'init')", &sql[insert.values[1].start..insert.values[1].stop]);
        assert!(insert.on_duplicate);
        assert_eq!(4, ctx.parameter_count);
    }

    #[test]
    fn test_insert_set() {
        let sql = "INSERT INTO t_order SET user_id = ?, status = 'init'";
        let ctx = analyse(sql).unwrap();
        let insert = ctx.insert.as_ref().unwrap();
        assert!(insert.is_set_form());
        assert!(insert.columns.is_empty());
        assert_eq!(vec![0], insert.set_parameters);
        assert_eq!(sql.len(), insert.set_stop().unwrap());
        assert!(matches!(insert.set_assignments[1].value, ExpressionSegment::Literal { .. }));
    }

    #[test]
    fn test_insert_select() {
        let ctx = analyse("INSERT INTO t_order (order_id) SELECT order_id FROM t_order_item").unwrap();
        let insert = ctx.insert.as_ref().unwrap();
        assert!(insert.insert_select);
        assert!(insert.values.is_empty());
        assert_eq!(vec!["t_order".to_string(), "t_order_item".to_string()], ctx.table_names());
    }
}
