use std::fmt::Debug;
use std::sync::Mutex;

use chrono::Utc;

use sharding_common::config::{KeyGenerate, KeyGeneratorType};

use crate::value::Value;

pub trait KeyGenerator: Debug + Send + Sync {
    fn generate_key(&self) -> Value;
}

pub fn create_key_generator(config: &KeyGenerate) -> Box<dyn KeyGenerator> {
    match config.key_generator {
        KeyGeneratorType::SNOWFLAKE => Box::new(SnowflakeKeyGenerator::new(config.worker_id)),
    }
}

/// 2016-11-01T00:00:00Z
const EPOCH_MILLIS: i64 = 1_477_958_400_000;
const SEQUENCE_BITS: u32 = 12;
const WORKER_ID_BITS: u32 = 10;
const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;

/// 41 bits of milliseconds, 10 bits of worker id, 12 bits of sequence.
#[derive(Debug)]
pub struct SnowflakeKeyGenerator {
    worker_id: i64,
    state: Mutex<(i64, i64)>,
}

impl SnowflakeKeyGenerator {
    pub fn new(worker_id: u16) -> Self {
        SnowflakeKeyGenerator {
            worker_id: i64::from(worker_id) & ((1 << WORKER_ID_BITS) - 1),
            state: Mutex::new((0, 0)),
        }
    }

    pub fn next_id(&self) -> i64 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let (last_millis, sequence) = *state;
        // a clock moving backwards keeps issuing from the last instant
        let mut millis = Utc::now().timestamp_millis().max(last_millis);
        let mut next_sequence = 0;
        if millis == last_millis {
            next_sequence = (sequence + 1) & SEQUENCE_MASK;
            if next_sequence == 0 {
                while millis <= last_millis {
                    millis = Utc::now().timestamp_millis();
                }
            }
        }
        *state = (millis, next_sequence);
        ((millis - EPOCH_MILLIS) << (SEQUENCE_BITS + WORKER_ID_BITS)) | (self.worker_id << SEQUENCE_BITS) | next_sequence
    }
}

impl KeyGenerator for SnowflakeKeyGenerator {
    fn generate_key(&self) -> Value {
        Value::Int(self.next_id())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use crate::algorithm::keygen::SnowflakeKeyGenerator;

    #[test]
    fn test_unique_and_increasing() {
        let generator = SnowflakeKeyGenerator::new(1);
        let mut last = 0;
        let mut seen = HashSet::new();
        for _ in 0..10000 {
            let id = generator.next_id();
            assert!(id > last);
            assert!(seen.insert(id));
            last = id;
        }
        assert_eq!(1, (last >> 12) & 0x3ff);
    }

    #[test]
    fn test_concurrent() {
        let generator = Arc::new(SnowflakeKeyGenerator::new(7));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = generator.clone();
                thread::spawn(move || (0..1000).map(|_| generator.next_id()).collect::<Vec<i64>>())
            })
            .collect();
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(4000, seen.len());
    }
}
