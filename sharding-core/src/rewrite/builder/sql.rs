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

use log::debug;

use sharding_common::common::Result;

use crate::rewrite::token::SQLToken;
use crate::rewrite::SQLReWrite;
use crate::route::RouteUnit;

/// Splices the rendered tokens into the original SQL in one pass. Offsets
/// always refer to `sql` itself; a token starting inside the span replaced by
/// the previous one is skipped.
pub fn build_sql(sql: &str, tokens: &[SQLToken], unit: Option<&RouteUnit>) -> Result<String> {
    let mut sorted: Vec<&SQLToken> = tokens.iter().collect();
    sorted.sort_by_key(|t| t.start());

    let mut f = String::with_capacity(sql.len() + 16 * tokens.len());
    let mut cursor = 0;
    for token in sorted {
        let start = token.start();
        if start < cursor || start > sql.len() {
            debug!("skip sql token at {} overlapping offset {}", start, cursor);
            continue;
        }
        f.push_str(&sql[cursor..start]);
        token.rewrite(&mut f, unit)?;
        cursor = token.stop().unwrap_or(start).min(sql.len());
    }
    f.push_str(&sql[cursor..]);
    Ok(f)
}

#[cfg(test)]
mod tests {
    use crate::rewrite::builder::sql::build_sql;
    use crate::rewrite::token::{GeneratedKeyInsertColumnToken, SQLToken, TableToken};
    use crate::route::{RouteMapper, RouteUnit};

    fn table(start: usize, stop: usize) -> SQLToken {
        SQLToken::Table(TableToken { start, stop, logic_table: "t_order".to_string(), quote: None })
    }

    #[test]
    fn test_splice_unsorted_tokens() {
        let sql = "SELECT t_order.id FROM t_order";
        let unit = RouteUnit::new("ds_0", vec![RouteMapper::new("t_order", "t_order_1")]);
        let tokens = vec![table(23, 30), table(7, 14)];
        assert_eq!("SELECT t_order_1.id FROM t_order_1", build_sql(sql, &tokens, Some(&unit)).unwrap());
        assert_eq!(sql, build_sql(sql, &tokens, None).unwrap());
        assert_eq!(sql, build_sql(sql, &[], Some(&unit)).unwrap());
    }

    #[test]
    fn test_insertion_and_overlap() {
        let sql = "INSERT INTO t_order (a) VALUES (1)";
        let tokens = vec![
            table(12, 19),
            SQLToken::GeneratedKeyInsertColumn(GeneratedKeyInsertColumnToken { start: 22, column: "id".to_string() }),
            table(14, 19),
        ];
        assert_eq!("INSERT INTO t_order (a, id) VALUES (1)", build_sql(sql, &tokens, None).unwrap());
    }
}
