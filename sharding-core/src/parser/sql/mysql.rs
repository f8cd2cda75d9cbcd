use sqlparser::dialect::Dialect;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Token, Tokenizer, Word};

use sharding_common::common::{Error, Result};

#[derive(Debug)]
pub struct MySQLDialect {}

impl Dialect for MySQLDialect {
    fn is_identifier_start(&self, ch: char) -> bool {
        // See https://dev.mysql.com/doc/refman/8.0/en/identifiers.html.
        // `$` and `?` are left to the tokenizer so that `$1` and `?` come out
        // as placeholders. `@` is an operator here so that `'u'@'host'` lexes;
        // variables are glued back together in `lex`.
        ('a'..='z').contains(&ch) || ('A'..='Z').contains(&ch) || ch == '_' || ('\u{0080}'..='\u{ffff}').contains(&ch)
    }

    fn is_identifier_part(&self, ch: char) -> bool {
        self.is_identifier_start(ch) || ('0'..='9').contains(&ch) || ch == '$'
    }

    fn is_delimited_identifier_start(&self, ch: char) -> bool {
        ch == '`' || ch == '"'
    }
}

/// A token with its byte span in the original SQL. `stop` is exclusive and
/// never covers trailing whitespace or comments.
#[derive(Debug, Clone, PartialEq)]
pub struct LexToken {
    pub token: Token,
    pub start: usize,
    pub stop: usize,
}

impl LexToken {
    /// Upper-cased keyword text of an unquoted word.
    pub fn keyword(&self) -> Option<String> {
        match &self.token {
            Token::Word(w) if w.quote_style.is_none() => Some(w.value.to_uppercase()),
            _ => None,
        }
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        match &self.token {
            Token::Word(w) if w.quote_style.is_none() => w.value.eq_ignore_ascii_case(keyword),
            _ => false,
        }
    }
}

pub fn lex(sql: &str) -> Result<Vec<LexToken>> {
    let dialect = MySQLDialect {};
    let mut tokenizer = Tokenizer::new(&dialect, sql);
    let located = tokenizer
        .tokenize_with_location()
        .map_err(|e| Error::Parse(e.to_string()))?;

    let line_starts = line_starts(sql);
    let starts: Vec<usize> = located
        .iter()
        .map(|t| byte_offset(sql, &line_starts, t.location.line, t.location.column))
        .collect();

    let mut tokens: Vec<LexToken> = Vec::with_capacity(located.len());
    for (i, t) in located.into_iter().enumerate() {
        match t.token {
            Token::Whitespace(_) | Token::EOF => continue,
            _ => {}
        }
        let start = starts[i];
        let stop = starts.get(i + 1).copied().unwrap_or_else(|| sql.len()).max(start);
        if let Some(variable) = tokens.last_mut().filter(|prev| prev.stop == start) {
            if let Some(word) = variable_word(&variable.token, &t.token) {
                variable.token = Token::Word(word);
                variable.stop = stop;
                continue;
            }
        }
        tokens.push(LexToken { token: t.token, start, stop });
    }
    Ok(tokens)
}

/// `@name` and `@@name` written without a gap.
fn variable_word(prefix: &Token, token: &Token) -> Option<Word> {
    let prefix = match prefix {
        Token::AtSign => "@",
        Token::AtAt => "@@",
        _ => return None,
    };
    match token {
        Token::Word(w) if w.quote_style.is_none() => {
            Some(Word { value: format!("{}{}", prefix, w.value), quote_style: None, keyword: Keyword::NoKeyword })
        }
        _ => None,
    }
}

fn line_starts(sql: &str) -> Vec<usize> {
    let mut starts = vec![0];
    for (i, c) in sql.char_indices() {
        if c == '\n' {
            starts.push(i + 1);
        }
    }
    starts
}

/// Locations are 1-based and count characters.
fn byte_offset(sql: &str, line_starts: &[usize], line: u64, column: u64) -> usize {
    if line == 0 {
        return 0;
    }
    let line_start = match line_starts.get((line - 1) as usize) {
        Some(s) => *s,
        None => return sql.len(),
    };
    let column = column.saturating_sub(1) as usize;
    sql[line_start..]
        .char_indices()
        .nth(column)
        .map(|(i, _)| line_start + i)
        .unwrap_or_else(|| sql.len())
}
