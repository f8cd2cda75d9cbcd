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

//! Statement binding over the token stream: classifies the statement and
//! records every offset the router and rewriter need.

use sqlparser::tokenizer::Token;

use sharding_common::common::{Error, Result};

use crate::parser::sql::mysql::{lex, LexToken};
use crate::parser::sql::{OwnerSegment, ParameterMarkerType, SQLStatementContext, StatementType, TableSegment};

mod expr;
mod insert;
mod query;

pub type SAResult = sharding_common::common::Result<()>;

/// Words that end a table reference and can never be taken as an alias.
const RESERVED: &[&str] = &[
    "WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "FOR", "LOCK", "UNION", "ON", "USING", "SET", "WINDOW", "INTO",
    "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "NATURAL", "STRAIGHT_JOIN", "OUTER", "VALUES", "VALUE",
    "SELECT", "FROM", "PARTITION", "USE", "FORCE", "IGNORE", "DUPLICATE", "AND", "OR", "NOT", "TO", "LIKE",
    "PROCEDURE", "RETURNING",
];

pub fn analyse(sql: &str) -> Result<SQLStatementContext> {
    let mut analyser = Analyser::new(sql)?;
    analyser.analyse_statement()
}

pub struct Analyser<'a> {
    sql: &'a str,
    tokens: Vec<LexToken>,
    parameters: Vec<Option<usize>>,
    index: usize,
}

impl<'a> Analyser<'a> {
    pub fn new(sql: &'a str) -> Result<Self> {
        let mut tokens = lex(sql)?;
        while tokens.last().map_or(false, |t| t.token == Token::SemiColon) {
            tokens.pop();
        }
        let mut counter = 0;
        let parameters = tokens
            .iter()
            .map(|t| match &t.token {
                Token::Placeholder(p) if p.starts_with('$') => p[1..].parse::<usize>().ok().map(|n| n.saturating_sub(1)),
                Token::Placeholder(p) if p.starts_with('?') => {
                    counter += 1;
                    Some(counter - 1)
                }
                _ => None,
            })
            .collect();
        Ok(Analyser { sql, tokens, parameters, index: 0 })
    }

    pub fn analyse_statement(&mut self) -> Result<SQLStatementContext> {
        let statement_type = self.classify()?;
        let mut ctx = SQLStatementContext::new(self.sql, statement_type);
        ctx.stop = self.tokens.last().map_or(0, |t| t.stop);
        self.bind_parameters(&mut ctx);
        match statement_type {
            StatementType::Select => self.parse_select(&mut ctx, true)?,
            StatementType::Insert => self.parse_insert(&mut ctx)?,
            StatementType::Update => self.parse_update(&mut ctx)?,
            StatementType::Delete => self.parse_delete(&mut ctx)?,
            StatementType::Ddl => self.parse_ddl(&mut ctx)?,
            StatementType::Dal => self.parse_dal(&mut ctx)?,
            StatementType::Dcl => self.parse_dcl(&mut ctx)?,
            StatementType::Tcl => {}
        }
        Ok(ctx)
    }

    fn classify(&self) -> Result<StatementType> {
        let first = match self.tokens.first() {
            Some(t) => t,
            None => return Err(Error::Parse("empty statement".to_string())),
        };
        if first.token == Token::LParen {
            return Ok(StatementType::Select);
        }
        let head = first.keyword().unwrap_or_default();
        let second = self.tokens.get(1).and_then(|t| t.keyword()).unwrap_or_default();
        let statement_type = match head.as_str() {
            "SELECT" | "WITH" => StatementType::Select,
            "INSERT" | "REPLACE" => StatementType::Insert,
            "UPDATE" => StatementType::Update,
            "DELETE" => StatementType::Delete,
            "BEGIN" | "START" | "COMMIT" | "ROLLBACK" | "SAVEPOINT" | "RELEASE" | "XA" => StatementType::Tcl,
            "SET" if self.is_transaction_set() => StatementType::Tcl,
            "CREATE" | "ALTER" | "DROP" | "RENAME" if second == "USER" || second == "ROLE" => StatementType::Dcl,
            "CREATE" | "ALTER" | "DROP" | "TRUNCATE" | "RENAME" => StatementType::Ddl,
            "GRANT" | "REVOKE" => StatementType::Dcl,
            "SHOW" | "DESC" | "DESCRIBE" | "EXPLAIN" | "USE" | "SET" | "ANALYZE" | "OPTIMIZE" | "KILL" | "FLUSH" => StatementType::Dal,
            _ => return Err(Error::Parse(format!("unsupported statement: {}", self.sql))),
        };
        Ok(statement_type)
    }

    fn is_transaction_set(&self) -> bool {
        self.tokens.iter().skip(1).take(3).any(|t| match &t.token {
            Token::Word(w) => {
                let word = w.value.trim_start_matches('@').to_uppercase();
                word == "AUTOCOMMIT" || word == "TRANSACTION"
            }
            _ => false,
        })
    }

    fn bind_parameters(&self, ctx: &mut SQLStatementContext) {
        let dollar = self.tokens.iter().any(|t| matches!(&t.token, Token::Placeholder(p) if p.starts_with('$')));
        ctx.parameter_marker_type = if dollar { ParameterMarkerType::Dollar } else { ParameterMarkerType::Question };
        ctx.parameter_count = self.parameters.iter().filter_map(|p| *p).map(|p| p + 1).max().unwrap_or(0);
    }

    // Cursor helpers

    fn peek(&self) -> Option<&LexToken> {
        self.tokens.get(self.index)
    }

    fn peek_nth(&self, n: usize) -> Option<&LexToken> {
        self.tokens.get(self.index + n)
    }

    fn advance(&mut self) -> Option<LexToken> {
        let token = self.tokens.get(self.index).cloned();
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        self.peek().map_or(false, |t| t.is_keyword(keyword))
    }

    fn peek_any_keyword(&self, keywords: &[&str]) -> bool {
        match self.peek().and_then(|t| t.keyword()) {
            Some(k) => keywords.contains(&k.as_str()),
            None => false,
        }
    }

    fn parse_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    /// Consumes the whole keyword sequence or nothing.
    fn parse_keywords(&mut self, keywords: &[&str]) -> bool {
        let checkpoint = self.index;
        for keyword in keywords {
            if !self.parse_keyword(keyword) {
                self.index = checkpoint;
                return false;
            }
        }
        true
    }

    fn expect_keyword(&mut self, keyword: &str) -> SAResult {
        if self.parse_keyword(keyword) {
            Ok(())
        } else {
            Err(self.expected(keyword))
        }
    }

    fn peek_token(&self, token: &Token) -> bool {
        self.peek().map_or(false, |t| &t.token == token)
    }

    fn consume_token(&mut self, token: &Token) -> bool {
        if self.peek_token(token) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn expect_token(&mut self, token: &Token) -> Result<LexToken> {
        if self.peek_token(token) {
            self.advance().ok_or_else(|| self.expected(&token.to_string()))
        } else {
            Err(self.expected(&token.to_string()))
        }
    }

    fn expected(&self, what: &str) -> Error {
        match self.peek() {
            Some(t) => Error::Parse(format!("expected {} but found {} at offset {}", what, t.token, t.start)),
            None => Error::Parse(format!("expected {} but reached end of statement", what)),
        }
    }

    /// Stop offset of the last consumed token.
    fn prev_stop(&self) -> usize {
        if self.index == 0 {
            0
        } else {
            self.tokens[self.index - 1].stop
        }
    }

    fn current_start(&self) -> usize {
        self.peek().map_or(self.sql.len(), |t| t.start)
    }

    fn parameters_between(&self, from: usize, to: usize) -> Vec<usize> {
        let to = to.min(self.parameters.len());
        let mut parameters: Vec<usize> = self.parameters[from.min(to)..to].iter().filter_map(|p| *p).collect();
        parameters.sort_unstable();
        parameters.dedup();
        parameters
    }

    fn peek_subquery(&self) -> bool {
        self.peek_token(&Token::LParen)
            && self.peek_nth(1).map_or(false, |t| t.is_keyword("SELECT") || t.is_keyword("WITH"))
    }

    fn at_end(&self, stops: &[&str]) -> bool {
        match self.peek() {
            None => true,
            Some(t) if t.token == Token::RParen || t.token == Token::SemiColon => true,
            Some(t) => t.keyword().map_or(false, |k| stops.contains(&k.as_str())),
        }
    }

    // Shared clause handling

    /// Consumes tokens until a depth-0 stop keyword or an unbalanced `)`.
    /// Records column qualifiers and analyses nested queries on the way.
    fn scan_until(&mut self, ctx: &mut SQLStatementContext, stops: &[&str]) -> SAResult {
        let mut depth = 0usize;
        while let Some(token) = self.peek() {
            match &token.token {
                Token::LParen => {
                    if self.peek_subquery() {
                        self.parse_subquery(ctx)?;
                    } else {
                        depth += 1;
                        self.index += 1;
                    }
                }
                Token::RParen => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                    self.index += 1;
                }
                Token::SemiColon if depth == 0 => break,
                Token::Word(_) => {
                    if depth == 0 && token.keyword().map_or(false, |k| stops.contains(&k.as_str())) {
                        break;
                    }
                    self.parse_identifier_chain(ctx);
                }
                _ => self.index += 1,
            }
        }
        Ok(())
    }

    /// `( SELECT ... )` as an operand or a derived table.
    fn parse_subquery(&mut self, ctx: &mut SQLStatementContext) -> Result<(usize, usize)> {
        let open = self.expect_token(&Token::LParen)?;
        ctx.contains_subquery = true;
        self.parse_select(ctx, false)?;
        let close = self.expect_token(&Token::RParen)?;
        Ok((open.start, close.stop))
    }

    /// Consumes `a`, `a.b` or `a.b.c` and records the table qualifier.
    /// Returns the last part with its span.
    fn parse_identifier_chain(&mut self, ctx: &mut SQLStatementContext) -> Option<(String, usize, usize, Option<String>)> {
        if !self.peek().map_or(false, |t| matches!(t.token, Token::Word(_))) {
            return None;
        }
        let mut parts: Vec<LexToken> = vec![self.advance()?];
        while self.peek_token(&Token::Period) {
            match self.peek_nth(1).map(|t| &t.token) {
                Some(Token::Word(_)) | Some(Token::Mul) => {
                    self.index += 1;
                    parts.push(self.advance()?);
                }
                _ => break,
            }
        }
        let last = parts.last()?.clone();
        let name = word_value(&last.token).unwrap_or_else(|| "*".to_string());
        let owner = if parts.len() >= 2 {
            let owner = &parts[parts.len() - 2];
            let owner_name = word_value(&owner.token)?;
            ctx.owners.push(OwnerSegment {
                start: owner.start,
                stop: owner.stop,
                name: owner_name.clone(),
                quote: word_quote(&owner.token),
            });
            Some(owner_name)
        } else {
            None
        };
        Some((name, last.start, last.stop, owner))
    }

    /// `[schema.]name [[AS] alias]`
    fn parse_table_segment(&mut self, ctx: &mut SQLStatementContext, with_alias: bool) -> Result<bool> {
        let first = match self.peek() {
            Some(t) if matches!(t.token, Token::Word(_)) => t.clone(),
            _ => return Ok(false),
        };
        self.index += 1;
        let mut owner = None;
        let mut name_token = first;
        while self.peek_token(&Token::Period) && self.peek_nth(1).map_or(false, |t| matches!(t.token, Token::Word(_))) {
            self.index += 1;
            owner = word_value(&name_token.token);
            name_token = self.advance().ok_or_else(|| self.expected("table name"))?;
        }
        let name = word_value(&name_token.token).ok_or_else(|| self.expected("table name"))?;
        let alias = if with_alias { self.parse_alias()? } else { None };
        ctx.tables.push(TableSegment {
            start: name_token.start,
            stop: name_token.stop,
            name,
            quote: word_quote(&name_token.token),
            owner,
            alias,
        });
        Ok(true)
    }

    fn parse_alias(&mut self) -> Result<Option<String>> {
        if self.parse_keyword("AS") {
            let alias = self.advance().ok_or_else(|| self.expected("alias"))?;
            return Ok(word_value(&alias.token));
        }
        match self.peek() {
            Some(t) => match &t.token {
                Token::Word(w) if w.quote_style.is_some() || !RESERVED.contains(&w.value.to_uppercase().as_str()) => {
                    let alias = w.value.clone();
                    self.index += 1;
                    Ok(Some(alias))
                }
                _ => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// FROM list: table factors separated by commas or joins.
    fn parse_table_references(&mut self, ctx: &mut SQLStatementContext) -> SAResult {
        self.parse_table_factor(ctx)?;
        loop {
            if self.consume_token(&Token::Comma) {
                ctx.contains_join = true;
                self.parse_table_factor(ctx)?;
            } else if self.parse_join_keyword() {
                ctx.contains_join = true;
                self.parse_table_factor(ctx)?;
                if self.parse_keyword("ON") {
                    self.scan_until(ctx, JOIN_STOPS)?;
                } else if self.parse_keyword("USING") {
                    self.scan_until(ctx, JOIN_STOPS)?;
                }
            } else {
                break;
            }
        }
        Ok(())
    }

    fn parse_table_factor(&mut self, ctx: &mut SQLStatementContext) -> SAResult {
        if self.peek_subquery() {
            self.parse_subquery(ctx)?;
            self.parse_alias()?;
        } else if self.consume_token(&Token::LParen) {
            self.parse_table_references(ctx)?;
            self.expect_token(&Token::RParen)?;
        } else if !self.parse_table_segment(ctx, true)? {
            return Err(self.expected("table reference"));
        }
        // index hints
        while self.peek_any_keyword(&["USE", "FORCE", "IGNORE"])
            && self.peek_nth(1).map_or(false, |t| t.is_keyword("INDEX") || t.is_keyword("KEY"))
        {
            self.index += 2;
            while !self.peek_token(&Token::LParen) && self.advance().is_some() {}
            self.expect_token(&Token::LParen)?;
            self.scan_until(ctx, &[])?;
            self.expect_token(&Token::RParen)?;
        }
        Ok(())
    }

    fn parse_join_keyword(&mut self) -> bool {
        let checkpoint = self.index;
        self.parse_keyword("NATURAL");
        if !(self.parse_keyword("INNER") || self.parse_keyword("CROSS")) {
            if self.parse_keyword("LEFT") || self.parse_keyword("RIGHT") || self.parse_keyword("FULL") {
                self.parse_keyword("OUTER");
            }
        }
        if self.parse_keyword("JOIN") || self.parse_keyword("STRAIGHT_JOIN") {
            true
        } else {
            self.index = checkpoint;
            false
        }
    }

    // Non DML statements

    fn parse_ddl(&mut self, ctx: &mut SQLStatementContext) -> SAResult {
        let head = self.advance().and_then(|t| t.keyword()).unwrap_or_default();
        match head.as_str() {
            "CREATE" => {
                self.parse_keywords(&["OR", "REPLACE"]);
                while self.parse_keyword("TEMPORARY") || self.parse_keyword("UNIQUE") || self.parse_keyword("FULLTEXT") || self.parse_keyword("SPATIAL") {}
                if self.parse_keyword("TABLE") {
                    self.parse_keywords(&["IF", "NOT", "EXISTS"]);
                    self.parse_table_segment(ctx, false)?;
                    if self.parse_keyword("LIKE") {
                        self.parse_table_segment(ctx, false)?;
                    }
                } else if self.parse_keyword("INDEX") {
                    self.parse_index_target(ctx)?;
                }
            }
            "ALTER" => {
                if self.parse_keyword("TABLE") {
                    self.parse_table_segment(ctx, false)?;
                }
            }
            "DROP" => {
                self.parse_keyword("TEMPORARY");
                if self.parse_keyword("TABLE") {
                    self.parse_keywords(&["IF", "EXISTS"]);
                    self.parse_table_segment(ctx, false)?;
                    while self.consume_token(&Token::Comma) {
                        self.parse_table_segment(ctx, false)?;
                    }
                } else if self.parse_keyword("INDEX") {
                    self.parse_index_target(ctx)?;
                }
            }
            "TRUNCATE" => {
                self.parse_keyword("TABLE");
                self.parse_table_segment(ctx, false)?;
            }
            "RENAME" => {
                self.expect_keyword("TABLE")?;
                loop {
                    self.parse_table_segment(ctx, false)?;
                    self.expect_keyword("TO")?;
                    self.parse_table_segment(ctx, false)?;
                    if !self.consume_token(&Token::Comma) {
                        break;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// `index_name ... ON table`
    fn parse_index_target(&mut self, ctx: &mut SQLStatementContext) -> SAResult {
        while let Some(token) = self.peek() {
            if token.is_keyword("ON") {
                self.index += 1;
                self.parse_table_segment(ctx, false)?;
                break;
            }
            self.index += 1;
        }
        Ok(())
    }

    fn parse_dal(&mut self, ctx: &mut SQLStatementContext) -> SAResult {
        let head = self.advance().and_then(|t| t.keyword()).unwrap_or_default();
        match head.as_str() {
            "SHOW" => {
                if self.parse_keywords(&["CREATE", "TABLE"]) {
                    self.parse_table_segment(ctx, false)?;
                    return Ok(());
                }
                while let Some(token) = self.advance() {
                    let on_table = ["COLUMNS", "FIELDS", "INDEX", "INDEXES", "KEYS"].iter().any(|k| token.is_keyword(k));
                    if on_table && (self.parse_keyword("FROM") || self.parse_keyword("IN")) {
                        self.parse_table_segment(ctx, false)?;
                        break;
                    }
                }
            }
            "DESC" | "DESCRIBE" | "EXPLAIN" => {
                if self.peek_any_keyword(&["SELECT", "WITH"]) || self.peek_token(&Token::LParen) {
                    self.parse_select(ctx, false)?;
                } else if self.peek_any_keyword(&["INSERT", "REPLACE"]) {
                    self.parse_insert(ctx)?;
                    ctx.insert = None;
                } else if self.peek_keyword("UPDATE") {
                    self.parse_update(ctx)?;
                    ctx.where_expr = None;
                } else if self.peek_keyword("DELETE") {
                    self.parse_delete(ctx)?;
                    ctx.where_expr = None;
                } else {
                    self.parse_table_segment(ctx, false)?;
                }
            }
            "ANALYZE" | "OPTIMIZE" => {
                self.parse_keyword("TABLE");
                self.parse_table_segment(ctx, false)?;
                while self.consume_token(&Token::Comma) {
                    self.parse_table_segment(ctx, false)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn parse_dcl(&mut self, ctx: &mut SQLStatementContext) -> SAResult {
        while let Some(token) = self.advance() {
            if token.is_keyword("ON") {
                self.parse_keyword("TABLE");
                let wildcard = match (self.peek().map(|t| &t.token), self.peek_nth(2).map(|t| &t.token)) {
                    (Some(Token::Mul), _) => true,
                    (Some(Token::Word(_)), Some(Token::Mul)) => self.peek_nth(1).map_or(false, |t| t.token == Token::Period),
                    _ => false,
                };
                if !wildcard {
                    self.parse_table_segment(ctx, false)?;
                }
                break;
            }
        }
        Ok(())
    }
}

const JOIN_STOPS: &[&str] = &[
    "WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "FOR", "LOCK", "UNION", "WINDOW", "SET", "JOIN", "INNER", "LEFT",
    "RIGHT", "FULL", "CROSS", "NATURAL", "STRAIGHT_JOIN",
];

pub(crate) fn word_value(token: &Token) -> Option<String> {
    match token {
        Token::Word(w) => Some(w.value.clone()),
        _ => None,
    }
}

fn word_quote(token: &Token) -> Option<char> {
    match token {
        Token::Word(w) => w.quote_style,
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::sql::analyse::analyse;
    use crate::parser::sql::{ParameterMarkerType, StatementType};

    #[test]
    fn test_classify() {
        let cases = vec![
            ("BEGIN", StatementType::Tcl),
            ("SET autocommit = 0", StatementType::Tcl),
            ("SET @@session.autocommit = 1", StatementType::Tcl),
            ("SET NAMES utf8mb4", StatementType::Dal),
            ("commit", StatementType::Tcl),
            ("CREATE TABLE t_order (id INT)", StatementType::Ddl),
            ("CREATE USER 'u'@'%'", StatementType::Dcl),
            ("GRANT SELECT ON t_order TO u", StatementType::Dcl),
            ("GRANT SELECT ON t_order TO 'u'@'localhost'", StatementType::Dcl),
            ("SHOW TABLES", StatementType::Dal),
            ("select 1", StatementType::Select),
            ("REPLACE INTO t VALUES (1)", StatementType::Insert),
        ];
        for (sql, expected) in cases {
            assert_eq!(expected, analyse(sql).unwrap().statement_type, "{}", sql);
        }
        assert!(analyse("FOO BAR").is_err());
        assert!(analyse("   ").is_err());
    }

    #[test]
    fn test_ddl_tables() {
        let ctx = analyse("CREATE INDEX idx_status ON t_order (status)").unwrap();
        assert_eq!(vec!["t_order".to_string()], ctx.table_names());
        let ctx = analyse("DROP TABLE IF EXISTS t_order, `t_order_item`").unwrap();
        assert_eq!(vec!["t_order".to_string(), "t_order_item".to_string()], ctx.table_names());
        assert_eq!(Some('`'), ctx.tables[1].quote);
        let ctx = analyse("TRUNCATE TABLE demo.t_order").unwrap();
        assert_eq!(Some("demo".to_string()), ctx.tables[0].owner);
        let ctx = analyse("CREATE FUNCTION f() RETURNS INT RETURN 1").unwrap();
        assert!(ctx.tables.is_empty());
    }

    #[test]
    fn test_dal_dcl_tables() {
        assert_eq!(vec!["t_order".to_string()], analyse("SHOW COLUMNS FROM t_order").unwrap().table_names());
        assert_eq!(vec!["t_order".to_string()], analyse("DESC t_order").unwrap().table_names());
        assert!(analyse("SHOW DATABASES").unwrap().tables.is_empty());
        assert_eq!(vec!["t_order".to_string()], analyse("GRANT SELECT ON TABLE t_order TO u").unwrap().table_names());
        assert!(analyse("GRANT ALL ON *.* TO u").unwrap().tables.is_empty());
        assert!(analyse("GRANT ALL ON demo.* TO u").unwrap().tables.is_empty());
        let ctx = analyse("REVOKE INSERT ON t_order FROM 'u'@'%'").unwrap();
        assert_eq!(vec!["t_order".to_string()], ctx.table_names());
    }

    #[test]
    fn test_parameters() {
        let ctx = analyse("SELECT * FROM t_order WHERE order_id = ? AND user_id IN (?, ?);").unwrap();
        assert_eq!(3, ctx.parameter_count);
        assert_eq!(ParameterMarkerType::Question, ctx.parameter_marker_type);
        assert_eq!("SELECT * FROM t_order WHERE order_id = ? AND user_id IN (?, ?)", &ctx.sql[..ctx.stop]);
        let ctx = analyse("SELECT * FROM t_order WHERE order_id = $2 AND user_id = $1 -- by user\n").unwrap();
        assert_eq!("SELECT * FROM t_order WHERE order_id = $2 AND user_id = $1", &ctx.sql[..ctx.stop]);
        assert_eq!(2, ctx.parameter_count);
        assert_eq!(ParameterMarkerType::Dollar, ctx.parameter_marker_type);
    }
}
