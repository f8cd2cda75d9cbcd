//! Sharding algorithm SPI and the algorithms selectable from rule files.

use std::fmt::Debug;
use std::ops::Bound;
use std::sync::Arc;

use indexmap::IndexMap;

use sharding_common::common::{Error, Result};
use sharding_common::config::{DisAlgorithm, DisType};

use crate::value::Value;

pub mod custom;
pub mod hash;
pub mod keygen;
pub mod range;

pub struct PreciseShardingValue<'a> {
    pub logic_table: &'a str,
    pub column: &'a str,
    pub value: &'a Value,
}

pub struct RangeShardingValue<'a> {
    pub logic_table: &'a str,
    pub column: &'a str,
    pub range: &'a ValueRange,
}

/// A continuous value interval.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueRange {
    pub lower: Bound<Value>,
    pub upper: Bound<Value>,
}

impl ValueRange {
    pub fn all() -> Self {
        ValueRange { lower: Bound::Unbounded, upper: Bound::Unbounded }
    }

    pub fn closed(lower: Value, upper: Value) -> Self {
        ValueRange { lower: Bound::Included(lower), upper: Bound::Included(upper) }
    }

    pub fn contains(&self, value: &Value) -> bool {
        let above = match &self.lower {
            Bound::Included(l) => value >= l,
            Bound::Excluded(l) => value > l,
            Bound::Unbounded => true,
        };
        let below = match &self.upper {
            Bound::Included(u) => value <= u,
            Bound::Excluded(u) => value < u,
            Bound::Unbounded => true,
        };
        above && below
    }

    /// Intersection of two ranges, `None` when they cannot overlap.
    pub fn intersect(&self, other: &ValueRange) -> Option<ValueRange> {
        let lower = tighter(&self.lower, &other.lower, true);
        let upper = tighter(&self.upper, &other.upper, false);
        let range = ValueRange { lower, upper };
        if range.is_empty() {
            None
        } else {
            Some(range)
        }
    }

    pub fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Bound::Included(l), Bound::Included(u)) => l > u,
            (Bound::Included(l), Bound::Excluded(u)) | (Bound::Excluded(l), Bound::Included(u)) | (Bound::Excluded(l), Bound::Excluded(u)) => l >= u,
            _ => false,
        }
    }

    /// Integer end points, when both exist.
    pub fn int_bounds(&self) -> Option<(i64, i64)> {
        let lower = match &self.lower {
            Bound::Included(v) => v.as_i64()?,
            Bound::Excluded(v) => v.as_i64()?.checked_add(1)?,
            Bound::Unbounded => return None,
        };
        let upper = match &self.upper {
            Bound::Included(v) => v.as_i64()?,
            Bound::Excluded(v) => v.as_i64()?.checked_sub(1)?,
            Bound::Unbounded => return None,
        };
        Some((lower, upper))
    }
}

fn tighter(left: &Bound<Value>, right: &Bound<Value>, lower: bool) -> Bound<Value> {
    match (left, right) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => other.clone(),
        (l, r) => {
            let (lv, rv) = (bound_value(l), bound_value(r));
            let pick_left = match lv.partial_cmp(rv) {
                Some(std::cmp::Ordering::Greater) => lower,
                Some(std::cmp::Ordering::Less) => !lower,
                // equal end points keep the exclusive one
                _ => matches!(l, Bound::Excluded(_)),
            };
            if pick_left {
                l.clone()
            } else {
                r.clone()
            }
        }
    }
}

fn bound_value(bound: &Bound<Value>) -> &Value {
    match bound {
        Bound::Included(v) | Bound::Excluded(v) => v,
        Bound::Unbounded => &Value::Null,
    }
}

pub trait ShardingAlgorithm: Debug + Send + Sync {
    /// The single target holding `value`, `None` when no available target matches.
    fn precise_match(&self, available: &[String], value: &PreciseShardingValue<'_>) -> Result<Option<String>>;

    /// Every target that may hold a value in the range.
    fn range_match(&self, available: &[String], value: &RangeShardingValue<'_>) -> Result<Vec<String>>;
}

/// Every column of a multi-column strategy, each constrained either by a list
/// of values or by a range.
pub struct ComplexKeysShardingValue<'a> {
    pub logic_table: &'a str,
    pub column_values: IndexMap<&'a str, &'a [Value]>,
    pub column_ranges: IndexMap<&'a str, &'a ValueRange>,
}

pub trait ComplexKeysShardingAlgorithm: Debug + Send + Sync {
    /// Every target that may hold a row matching all the columns at once.
    fn do_sharding(&self, available: &[String], value: &ComplexKeysShardingValue<'_>) -> Result<Vec<String>>;
}

pub fn create_algorithm(config: &DisAlgorithm) -> Result<Arc<dyn ShardingAlgorithm>> {
    match config.dis_type {
        DisType::HASH => Ok(Arc::new(hash::HashModShardingAlgorithm::new(config.sharding_count)?)),
        DisType::RANGE => Ok(Arc::new(range::BoundaryRangeShardingAlgorithm::new(config.boundaries.clone())?)),
        DisType::CUSTOM => {
            let expression = config
                .dis_expression
                .as_ref()
                .ok_or_else(|| Error::Configuration("CUSTOM algorithm requires dis_expression".to_string()))?;
            Ok(Arc::new(custom::CustomShardingAlgorithm::new(expression)?))
        }
    }
}

/// Only expressions can combine several columns.
pub fn create_complex_algorithm(config: &DisAlgorithm) -> Result<Arc<dyn ComplexKeysShardingAlgorithm>> {
    match (config.dis_type, &config.dis_expression) {
        (DisType::CUSTOM, Some(expression)) => Ok(Arc::new(custom::CustomShardingAlgorithm::new(expression)?)),
        (DisType::CUSTOM, None) => Err(Error::Configuration("CUSTOM algorithm requires dis_expression".to_string())),
        (other, _) => Err(Error::Configuration(format!("{:?} algorithm shards on a single dis_key, use CUSTOM for dis_keys", other))),
    }
}

/// Finds the target whose trailing number equals `suffix`.
pub fn find_by_suffix(available: &[String], suffix: i64) -> Option<String> {
    available.iter().find(|name| trailing_number(name) == Some(suffix)).cloned()
}

pub fn trailing_number(name: &str) -> Option<i64> {
    let digits = name.len() - name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    name[name.len() - digits..].parse().ok()
}

#[cfg(test)]
mod tests {
    use std::ops::Bound;

    use crate::algorithm::{find_by_suffix, trailing_number, ValueRange};
    use crate::value::Value;

    #[test]
    fn test_trailing_number() {
        assert_eq!(Some(1), trailing_number("t_order_1"));
        assert_eq!(Some(10), trailing_number("ds_10"));
        assert_eq!(None, trailing_number("t_order"));
        let available = vec!["t_order_0".to_string(), "t_order_1".to_string()];
        assert_eq!(Some("t_order_1".to_string()), find_by_suffix(&available, 1));
        assert_eq!(None, find_by_suffix(&available, 2));
    }

    #[test]
    fn test_range_intersect() {
        let r1 = ValueRange::closed(Value::Int(1), Value::Int(10));
        let r2 = ValueRange { lower: Bound::Excluded(Value::Int(5)), upper: Bound::Unbounded };
        let r = r1.intersect(&r2).unwrap();
        assert_eq!(Bound::Excluded(Value::Int(5)), r.lower);
        assert_eq!(Bound::Included(Value::Int(10)), r.upper);
        assert_eq!(Some((6, 10)), r.int_bounds());
        assert!(r.contains(&Value::Int(6)));
        assert!(!r.contains(&Value::Int(5)));

        let r3 = ValueRange { lower: Bound::Unbounded, upper: Bound::Excluded(Value::Int(1)) };
        assert!(r1.intersect(&r3).is_none());
        assert_eq!(None, ValueRange::all().int_bounds());
    }
}
