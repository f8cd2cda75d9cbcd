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

use std::fmt::Write;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::algorithm::{PreciseShardingValue, ShardingAlgorithm};
use crate::discovery::database::DataNode;
use crate::rewrite::{display_comma_separated, SQLReWrite, SRWResult};
use crate::route::RouteUnit;
use crate::value::Value;

pub mod generator;

/// A positional edit against the original SQL text. `stop` is exclusive;
/// tokens without `stop` insert text at `start`.
#[derive(Debug, Clone)]
pub enum SQLToken {
    Table(TableToken),
    InsertValues(InsertValuesToken),
    GeneratedKeyInsertColumn(GeneratedKeyInsertColumnToken),
    GeneratedKeyAssignment(GeneratedKeyAssignmentToken),
    Offset(PaginationToken),
    RowCount(PaginationToken),
    InPredicate(InPredicateToken),
}

impl SQLToken {
    pub fn start(&self) -> usize {
        match self {
            SQLToken::Table(t) => t.start,
            SQLToken::InsertValues(t) => t.start,
            SQLToken::GeneratedKeyInsertColumn(t) => t.start,
            SQLToken::GeneratedKeyAssignment(t) => t.start,
            SQLToken::Offset(t) | SQLToken::RowCount(t) => t.start,
            SQLToken::InPredicate(t) => t.start,
        }
    }

    pub fn stop(&self) -> Option<usize> {
        match self {
            SQLToken::Table(t) => Some(t.stop),
            SQLToken::InsertValues(t) => Some(t.stop),
            SQLToken::GeneratedKeyInsertColumn(_) | SQLToken::GeneratedKeyAssignment(_) => None,
            SQLToken::Offset(t) | SQLToken::RowCount(t) => Some(t.stop),
            SQLToken::InPredicate(t) => Some(t.stop),
        }
    }

    /// Parameter indices this token drops for the unit.
    pub fn removed_parameter_indices(&self, unit: &RouteUnit) -> Vec<usize> {
        match self {
            SQLToken::InPredicate(t) => t.removed_parameter_indices(unit),
            _ => vec![],
        }
    }

    /// Parameters whose value this token revises.
    pub fn replaced_parameter(&self) -> Option<(usize, Value)> {
        match self {
            SQLToken::Offset(t) | SQLToken::RowCount(t) => t.parameter.map(|i| (i, Value::Int(t.revised))),
            _ => None,
        }
    }
}

impl SQLReWrite for SQLToken {
    fn rewrite(&self, f: &mut String, unit: Option<&RouteUnit>) -> SRWResult {
        match self {
            SQLToken::Table(t) => t.rewrite(f, unit),
            SQLToken::InsertValues(t) => t.rewrite(f, unit),
            SQLToken::GeneratedKeyInsertColumn(t) => t.rewrite(f, unit),
            SQLToken::GeneratedKeyAssignment(t) => t.rewrite(f, unit),
            SQLToken::Offset(t) | SQLToken::RowCount(t) => t.rewrite(f, unit),
            SQLToken::InPredicate(t) => t.rewrite(f, unit),
        }
    }
}

/// A logic table name, or a column qualifier naming one.
#[derive(Debug, Clone, PartialEq)]
pub struct TableToken {
    pub start: usize,
    pub stop: usize,
    pub logic_table: String,
    pub quote: Option<char>,
}

impl SQLReWrite for TableToken {
    fn rewrite(&self, f: &mut String, unit: Option<&RouteUnit>) -> SRWResult {
        let name = unit.and_then(|u| u.actual_table_name(&self.logic_table)).unwrap_or(&self.logic_table);
        match self.quote {
            Some('[') => write!(f, "[{}]", name)?,
            Some(q) => write!(f, "{}{}{}", q, name, q)?,
            None => f.write_str(name)?,
        }
        Ok(())
    }
}

/// One VALUES row and the data nodes it was routed to.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertValue {
    /// Original row text, parentheses included.
    pub text: String,
    /// Generated key text placed before the closing parenthesis.
    pub generated: Option<String>,
    pub data_nodes: Vec<DataNode>,
}

impl InsertValue {
    fn belongs_to(&self, unit: Option<&RouteUnit>) -> bool {
        match unit {
            Some(unit) => self.data_nodes.is_empty() || self.data_nodes.iter().any(|n| unit.contains_node(n)),
            None => true,
        }
    }
}

impl SQLReWrite for InsertValue {
    fn rewrite(&self, f: &mut String, _unit: Option<&RouteUnit>) -> SRWResult {
        match &self.generated {
            Some(generated) => {
                let body = self.text.strip_suffix(')').unwrap_or(&self.text);
                write!(f, "{}, {})", body, generated)?;
            }
            None => f.write_str(&self.text)?,
        }
        Ok(())
    }
}

/// All VALUES rows; each unit renders only the rows routed to it.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertValuesToken {
    pub start: usize,
    pub stop: usize,
    pub values: Vec<InsertValue>,
}

impl SQLReWrite for InsertValuesToken {
    fn rewrite(&self, f: &mut String, unit: Option<&RouteUnit>) -> SRWResult {
        let values: Vec<&InsertValue> = self.values.iter().filter(|v| v.belongs_to(unit)).collect();
        display_comma_separated(&values).rewrite(f, unit)
    }
}

/// `, key_column` appended to the INSERT column list.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedKeyInsertColumnToken {
    pub start: usize,
    pub column: String,
}

impl SQLReWrite for GeneratedKeyInsertColumnToken {
    fn rewrite(&self, f: &mut String, _unit: Option<&RouteUnit>) -> SRWResult {
        write!(f, ", {}", self.column)?;
        Ok(())
    }
}

/// `, key_column = value` appended to an `INSERT ... SET` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedKeyAssignmentToken {
    pub start: usize,
    pub column: String,
    pub value: String,
}

impl SQLReWrite for GeneratedKeyAssignmentToken {
    fn rewrite(&self, f: &mut String, _unit: Option<&RouteUnit>) -> SRWResult {
        write!(f, ", {} = {}", self.column, self.value)?;
        Ok(())
    }
}

/// A LIMIT offset or row count revised for fan-out. A parameter marker is
/// rendered unchanged and its value revised through the parameter builder.
#[derive(Debug, Clone, PartialEq)]
pub struct PaginationToken {
    pub start: usize,
    pub stop: usize,
    pub revised: i64,
    pub parameter: Option<usize>,
    pub text: String,
}

impl SQLReWrite for PaginationToken {
    fn rewrite(&self, f: &mut String, _unit: Option<&RouteUnit>) -> SRWResult {
        match self.parameter {
            Some(_) => f.write_str(&self.text)?,
            None => write!(f, "{}", self.revised)?,
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InItem {
    pub text: String,
    pub value: Option<Value>,
    pub parameter: Option<usize>,
}

/// The value list of `sharding_column IN (...)`. Each unit keeps the items
/// its strategies map to it.
#[derive(Debug, Clone)]
pub struct InPredicateToken {
    pub start: usize,
    pub stop: usize,
    pub logic_table: String,
    pub column: String,
    pub items: Vec<InItem>,
    pub database_algorithm: Option<Arc<dyn ShardingAlgorithm>>,
    pub data_sources: Vec<String>,
    pub table_algorithm: Option<Arc<dyn ShardingAlgorithm>>,
    pub actual_tables: IndexMap<String, Vec<String>>,
}

impl InPredicateToken {
    fn accepts(&self, item: &InItem, unit: &RouteUnit) -> bool {
        let value = match &item.value {
            Some(value) => value,
            None => return true,
        };
        let sharding_value = PreciseShardingValue { logic_table: &self.logic_table, column: &self.column, value };
        let matches = |algorithm: &Option<Arc<dyn ShardingAlgorithm>>, available: &[String], target: Option<&str>| match algorithm {
            Some(algorithm) => match algorithm.precise_match(available, &sharding_value) {
                Ok(Some(found)) => target.map_or(true, |t| t.eq_ignore_ascii_case(&found)),
                Ok(None) => false,
                // keep what cannot be decided
                Err(_) => true,
            },
            None => true,
        };
        let data_source = unit.data_source_name();
        let empty = vec![];
        let tables = self.actual_tables.get(data_source).unwrap_or(&empty);
        matches(&self.database_algorithm, &self.data_sources, Some(data_source))
            && matches(&self.table_algorithm, tables, unit.actual_table_name(&self.logic_table))
    }

    fn kept_items(&self, unit: &RouteUnit) -> Vec<&InItem> {
        let kept: Vec<&InItem> = self.items.iter().filter(|i| self.accepts(i, unit)).collect();
        if kept.is_empty() {
            self.items.iter().collect()
        } else {
            kept
        }
    }

    pub fn removed_parameter_indices(&self, unit: &RouteUnit) -> Vec<usize> {
        let kept = self.kept_items(unit);
        self.items
            .iter()
            .filter(|i| !kept.iter().any(|k| std::ptr::eq(*k, *i)))
            .filter_map(|i| i.parameter)
            .collect()
    }
}

impl SQLReWrite for InPredicateToken {
    fn rewrite(&self, f: &mut String, unit: Option<&RouteUnit>) -> SRWResult {
        let items: Vec<&InItem> = match unit {
            Some(unit) => self.kept_items(unit),
            None => self.items.iter().collect(),
        };
        f.write_str("(")?;
        let mut delim = "";
        for item in items {
            write!(f, "{}{}", delim, item.text)?;
            delim = ", ";
        }
        f.write_str(")")?;
        Ok(())
    }
}
