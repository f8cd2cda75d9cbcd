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

use std::collections::BTreeMap;

use crate::discovery::database::DataNode;
use crate::handler::generated_key::GeneratedKeyContext;
use crate::parser::sql::SQLStatementContext;
use crate::rewrite::token::SQLToken;
use crate::route::RouteUnit;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum ParameterBuilder {
    Standard(StandardParameterBuilder),
    Grouped(GroupedParameterBuilder),
}

impl ParameterBuilder {
    /// Grouped for INSERT rows (or a SET clause) carrying parameters or
    /// generated keys, standard otherwise.
    pub fn new(ctx: &SQLStatementContext, parameters: &[Value], generated_key: Option<&GeneratedKeyContext>, tokens: &[SQLToken]) -> Self {
        let generated: Vec<Value> = match generated_key {
            Some(key) if key.parameterized => key.values.clone(),
            _ => vec![],
        };
        let key_added = tokens
            .iter()
            .any(|t| matches!(t, SQLToken::GeneratedKeyInsertColumn(_) | SQLToken::GeneratedKeyAssignment(_)));
        let generated = if key_added { generated } else { vec![] };

        let groups: Vec<&[usize]> = match &ctx.insert {
            Some(insert) if insert.is_set_form() => vec![&insert.set_parameters[..]],
            Some(insert) if !insert.values.is_empty() => insert.values.iter().map(|v| &v.parameters[..]).collect(),
            _ => vec![],
        };
        if groups.is_empty() || (parameters.is_empty() && generated.is_empty()) {
            let mut builder = StandardParameterBuilder::new(parameters.to_vec());
            for (index, value) in tokens.iter().filter_map(|t| t.replaced_parameter()) {
                builder.replaced.insert(index, value);
            }
            return ParameterBuilder::Standard(builder);
        }
        ParameterBuilder::Grouped(GroupedParameterBuilder::new(parameters, &groups, &generated))
    }

    /// Parameters of `unit`, all parameters when no unit is given.
    pub fn build(&self, unit: Option<&RouteUnit>, tokens: &[SQLToken], original_data_nodes: &[Vec<DataNode>]) -> Vec<Value> {
        match self {
            ParameterBuilder::Standard(builder) => {
                let removed: Vec<usize> = match unit {
                    Some(unit) => tokens.iter().flat_map(|t| t.removed_parameter_indices(unit)).collect(),
                    None => vec![],
                };
                builder.build(&removed)
            }
            ParameterBuilder::Grouped(builder) => builder.build(unit, original_data_nodes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StandardParameterBuilder {
    pub parameters: Vec<Value>,
    pub replaced: BTreeMap<usize, Value>,
}

impl StandardParameterBuilder {
    pub fn new(parameters: Vec<Value>) -> Self {
        StandardParameterBuilder { parameters, replaced: BTreeMap::new() }
    }

    /// Replaced values applied, then removed indices dropped from the highest
    /// down so lower indices stay valid.
    pub fn build(&self, removed: &[usize]) -> Vec<Value> {
        let mut result = self.parameters.clone();
        for (index, value) in &self.replaced {
            if let Some(slot) = result.get_mut(*index) {
                *slot = value.clone();
            }
        }
        let mut removed = removed.to_vec();
        removed.sort_unstable_by(|a, b| b.cmp(a));
        removed.dedup();
        for index in removed {
            if index < result.len() {
                result.remove(index);
            }
        }
        result
    }
}

/// Parameters split around INSERT rows: `before_generic`, one group per row
/// with its generated key, `after_generic`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupedParameterBuilder {
    pub before_generic: Vec<Value>,
    pub groups: Vec<Vec<Value>>,
    pub after_generic: Vec<Value>,
}

impl GroupedParameterBuilder {
    pub fn new(parameters: &[Value], groups: &[&[usize]], generated: &[Value]) -> Self {
        let first = groups.iter().flat_map(|g| g.iter()).min().copied();
        let last = groups.iter().flat_map(|g| g.iter()).max().copied();
        let (before, after) = match (first, last) {
            (Some(first), Some(last)) => (first, last + 1),
            _ => (0, 0),
        };
        let before_generic = parameters.iter().take(before).cloned().collect();
        let after_generic = parameters.iter().skip(after).cloned().collect();
        let groups = groups
            .iter()
            .enumerate()
            .map(|(index, group)| {
                let mut values: Vec<Value> = group.iter().filter_map(|i| parameters.get(*i).cloned()).collect();
                // the key column is the last column of its row
                if let Some(key) = generated.get(index) {
                    values.push(key.clone());
                }
                values
            })
            .collect();
        GroupedParameterBuilder { before_generic, groups, after_generic }
    }

    /// Rows without data nodes belong to every unit.
    pub fn build(&self, unit: Option<&RouteUnit>, original_data_nodes: &[Vec<DataNode>]) -> Vec<Value> {
        let mut result = self.before_generic.clone();
        for (index, group) in self.groups.iter().enumerate() {
            let belongs = match (unit, original_data_nodes.get(index)) {
                (Some(unit), Some(nodes)) if !nodes.is_empty() => nodes.iter().any(|n| unit.contains_node(n)),
                _ => true,
            };
            if belongs {
                result.extend(group.iter().cloned());
            }
        }
        result.extend(self.after_generic.iter().cloned());
        result
    }

    pub fn parameter_count(&self) -> usize {
        self.before_generic.len() + self.groups.iter().map(|g| g.len()).sum::<usize>() + self.after_generic.len()
    }
}

#[cfg(test)]
mod tests {
    use crate::discovery::database::DataNode;
    use crate::rewrite::builder::parameter::{GroupedParameterBuilder, StandardParameterBuilder};
    use crate::route::{RouteMapper, RouteUnit};
    use crate::value::Value;

    fn values(v: &[i64]) -> Vec<Value> {
        v.iter().map(|i| Value::Int(*i)).collect()
    }

    #[test]
    fn test_standard_builder() {
        let mut builder = StandardParameterBuilder::new(values(&[10, 11, 12, 13, 14]));
        builder.replaced.insert(4, Value::Int(40));
        let result = builder.build(&[3, 1, 3]);
        assert_eq!(values(&[10, 12, 40]), result);
        assert_eq!(5 - 2, result.len());
        assert_eq!(values(&[10, 11, 12, 13, 40]), builder.build(&[]));
    }

    #[test]
    fn test_grouped_builder() {
        // INSERT ... VALUES (?, ?), (?, ?) ON DUPLICATE KEY UPDATE status = ?
        let parameters = values(&[1, 2, 3, 4, 5]);
        let builder = GroupedParameterBuilder::new(&parameters, &[&[0, 1], &[2, 3]], &values(&[100, 200]));
        assert_eq!(values(&[1, 2, 100]), builder.groups[0]);
        assert_eq!(values(&[5]), builder.after_generic);
        assert_eq!(parameters.len() + 2, builder.parameter_count());

        let nodes = vec![vec![DataNode::new("ds_0", "t_order_0")], vec![DataNode::new("ds_1", "t_order_0")]];
        let first = RouteUnit::new("ds_0", vec![RouteMapper::new("t_order", "t_order_0")]);
        let second = RouteUnit::new("ds_1", vec![RouteMapper::new("t_order", "t_order_0")]);
        let a = builder.build(Some(&first), &nodes);
        let b = builder.build(Some(&second), &nodes);
        assert_eq!(values(&[1, 2, 100, 5]), a);
        assert_eq!(values(&[3, 4, 200, 5]), b);
        // every row lands in exactly one unit, generic parameters in both
        assert_eq!(builder.parameter_count() + builder.after_generic.len(), a.len() + b.len());
        assert_eq!(values(&[1, 2, 100, 3, 4, 200, 5]), builder.build(None, &nodes));
    }
}
