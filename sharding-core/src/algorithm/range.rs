use sharding_common::common::{Error, Result};

use crate::algorithm::{find_by_suffix, PreciseShardingValue, RangeShardingValue, ShardingAlgorithm};
use std::ops::Bound;

/// Partition `i` holds `[boundaries[i - 1], boundaries[i])`; the first and
/// last partitions are open ended.
#[derive(Debug)]
pub struct BoundaryRangeShardingAlgorithm {
    boundaries: Vec<i64>,
}

impl BoundaryRangeShardingAlgorithm {
    pub fn new(boundaries: Vec<i64>) -> Result<Self> {
        if boundaries.is_empty() {
            return Err(Error::Configuration("RANGE algorithm requires boundaries".to_string()));
        }
        if boundaries.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::Configuration(format!("RANGE boundaries must ascend: {:?}", boundaries)));
        }
        Ok(BoundaryRangeShardingAlgorithm { boundaries })
    }

    fn partition(&self, value: i64) -> i64 {
        self.boundaries.iter().filter(|b| **b <= value).count() as i64
    }
}

impl ShardingAlgorithm for BoundaryRangeShardingAlgorithm {
    fn precise_match(&self, available: &[String], value: &PreciseShardingValue<'_>) -> Result<Option<String>> {
        let key = match value.value.as_i64() {
            Some(key) => key,
            None => return Err(Error::Algorithm(format!("RANGE sharding on {} needs an integer, got {}", value.column, value.value))),
        };
        Ok(find_by_suffix(available, self.partition(key)))
    }

    fn range_match(&self, available: &[String], value: &RangeShardingValue<'_>) -> Result<Vec<String>> {
        let first = match &value.range.lower {
            Bound::Included(v) | Bound::Excluded(v) => v.as_i64().map(|k| self.partition(k)).unwrap_or(0),
            Bound::Unbounded => 0,
        };
        let last = match &value.range.upper {
            Bound::Included(v) => v.as_i64().map(|k| self.partition(k)),
            Bound::Excluded(v) => v.as_i64().map(|k| self.partition(k.saturating_sub(1))),
            Bound::Unbounded => None,
        }
        .unwrap_or(self.boundaries.len() as i64);
        Ok((first..=last).filter_map(|p| find_by_suffix(available, p)).collect())
    }
}
