use crc32fast::Hasher;

use sharding_common::common::{Error, Result};

use crate::algorithm::{find_by_suffix, PreciseShardingValue, RangeShardingValue, ShardingAlgorithm};
use crate::value::Value;

/// `value mod sharding_count`, text keys hashed with crc32 first. The
/// result selects the target with that trailing number.
#[derive(Debug)]
pub struct HashModShardingAlgorithm {
    sharding_count: Option<u32>,
}

impl HashModShardingAlgorithm {
    pub fn new(sharding_count: Option<u32>) -> Result<Self> {
        if sharding_count == Some(0) {
            return Err(Error::Configuration("HASH sharding_count must be positive".to_string()));
        }
        Ok(HashModShardingAlgorithm { sharding_count })
    }

    fn count(&self, available: &[String]) -> i64 {
        self.sharding_count.map(i64::from).unwrap_or(available.len() as i64).max(1)
    }

    fn shard_of(&self, value: &Value, count: i64) -> Option<i64> {
        let key = match value {
            Value::Null => return None,
            Value::Text(s) => match s.trim().parse::<i64>() {
                Ok(i) => i,
                Err(_) => {
                    let mut hasher = Hasher::new();
                    hasher.update(s.as_bytes());
                    hasher.finalize() as i64
                }
            },
            other => other.as_i64()?,
        };
        Some(key.rem_euclid(count))
    }
}

impl ShardingAlgorithm for HashModShardingAlgorithm {
    fn precise_match(&self, available: &[String], value: &PreciseShardingValue<'_>) -> Result<Option<String>> {
        let count = self.count(available);
        Ok(self.shard_of(value.value, count).and_then(|shard| find_by_suffix(available, shard)))
    }

    fn range_match(&self, available: &[String], value: &RangeShardingValue<'_>) -> Result<Vec<String>> {
        let count = self.count(available);
        match value.range.int_bounds() {
            Some((lower, upper)) if upper.checked_sub(lower).map_or(false, |span| (0..count).contains(&span)) => {
                let mut result: Vec<String> = vec![];
                for key in lower..=upper {
                    if let Some(target) = find_by_suffix(available, key.rem_euclid(count)) {
                        if !result.contains(&target) {
                            result.push(target);
                        }
                    }
                }
                // keep configuration order
                Ok(available.iter().filter(|a| result.contains(a)).cloned().collect())
            }
            Some((lower, upper)) if upper < lower => Ok(vec![]),
            _ => Ok(available.to_vec()),
        }
    }
}
