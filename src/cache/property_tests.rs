//! Property-Based Tests for the In-Process Backend
//!
//! Uses proptest to check the contract properties every backend must hold.

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::cache::{CacheOptions, CacheStore, MemoryCache};
use crate::error::CacheError;

// == Test Configuration ==
const TEST_MAX_ENTRIES: usize = 100;

type CaseResult = Result<(), TestCaseError>;

/// Runs an async property body on a fresh single-threaded runtime.
fn run(body: impl std::future::Future<Output = CaseResult>) -> CaseResult {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("test runtime")
        .block_on(body)
}

fn test_cache(max_entries: usize) -> MemoryCache {
    MemoryCache::new(
        CacheOptions::default()
            .with_max_entries(max_entries)
            .with_sweep_interval(Duration::ZERO),
    )
}

// == Strategies ==
fn valid_key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_:]{1,64}"
}

fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

#[derive(Debug, Clone)]
enum CacheOp {
    Set { key: String, value: Vec<u8> },
    Get { key: String },
    Delete { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (valid_key_strategy(), value_strategy())
            .prop_map(|(key, value)| CacheOp::Set { key, value }),
        valid_key_strategy().prop_map(|key| CacheOp::Get { key }),
        valid_key_strategy().prop_map(|key| CacheOp::Delete { key }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Any stored bytes come back unchanged before expiry.
    #[test]
    fn prop_roundtrip_storage(key in valid_key_strategy(), value in value_strategy()) {
        run(async {
            let cache = test_cache(TEST_MAX_ENTRIES);
            cache.set(&key, value.clone(), Duration::ZERO).await.unwrap();
            prop_assert_eq!(cache.get(&key).await.unwrap(), value);
            Ok(())
        })?;
    }

    // A later write to the same key wins and does not add an entry.
    #[test]
    fn prop_overwrite_semantics(
        key in valid_key_strategy(),
        first in value_strategy(),
        second in value_strategy()
    ) {
        run(async {
            let cache = test_cache(TEST_MAX_ENTRIES);
            cache.set(&key, first, Duration::ZERO).await.unwrap();
            cache.set(&key, second.clone(), Duration::ZERO).await.unwrap();

            prop_assert_eq!(cache.get(&key).await.unwrap(), second);
            prop_assert_eq!(cache.len().await, 1);
            Ok(())
        })?;
    }

    // After a delete the key reads as NotFound, never as another error.
    #[test]
    fn prop_delete_removes_entry(key in valid_key_strategy(), value in value_strategy()) {
        run(async {
            let cache = test_cache(TEST_MAX_ENTRIES);
            cache.set(&key, value, Duration::ZERO).await.unwrap();
            cache.delete(&key).await.unwrap();

            prop_assert!(matches!(cache.get(&key).await, Err(CacheError::NotFound(_))));
            prop_assert!(!cache.exists(&key).await.unwrap());
            Ok(())
        })?;
    }

    // The soft cap is never exceeded by a stream of writes.
    #[test]
    fn prop_capacity_enforcement(
        entries in prop::collection::vec((valid_key_strategy(), value_strategy()), 1..200)
    ) {
        run(async {
            let max_entries = 50;
            let cache = test_cache(max_entries);
            for (key, value) in entries {
                cache.set(&key, value, Duration::ZERO).await.unwrap();
                prop_assert!(cache.len().await <= max_entries);
            }
            Ok(())
        })?;
    }

    // get_multi returns exactly the requested keys that were stored.
    #[test]
    fn prop_batch_subset(
        stored in prop::collection::hash_map(valid_key_strategy(), value_strategy(), 0..20),
        extra in prop::collection::vec(valid_key_strategy(), 0..10)
    ) {
        run(async {
            let cache = test_cache(TEST_MAX_ENTRIES);
            cache.set_multi(stored.clone(), Duration::ZERO).await.unwrap();

            let requested: Vec<String> = stored.keys().cloned().chain(extra.iter().cloned()).collect();
            let found = cache.get_multi(&requested).await.unwrap();
            prop_assert_eq!(found, stored);
            Ok(())
        })?;
    }

    // Hit and miss counters match the observed read outcomes.
    #[test]
    fn prop_statistics_accuracy(ops in prop::collection::vec(cache_op_strategy(), 1..50)) {
        run(async {
            let cache = test_cache(TEST_MAX_ENTRIES);
            let mut expected_hits = 0u64;
            let mut expected_misses = 0u64;

            for op in ops {
                match op {
                    CacheOp::Set { key, value } => {
                        cache.set(&key, value, Duration::ZERO).await.unwrap();
                    }
                    CacheOp::Get { key } => match cache.get(&key).await {
                        Ok(_) => expected_hits += 1,
                        Err(_) => expected_misses += 1,
                    },
                    CacheOp::Delete { key } => {
                        cache.delete(&key).await.unwrap();
                    }
                }
            }

            let stats = cache.stats().await;
            prop_assert_eq!(stats.hits, expected_hits);
            prop_assert_eq!(stats.misses, expected_misses);
            prop_assert_eq!(stats.total_entries, cache.len().await);
            Ok(())
        })?;
    }

    // Filling to capacity then inserting a new key evicts the first key written.
    #[test]
    fn prop_lru_eviction_order(
        keys in prop::collection::vec(valid_key_strategy(), 3..10),
        new_key in valid_key_strategy()
    ) {
        let mut seen = HashSet::new();
        let unique: Vec<String> = keys.into_iter().filter(|k| seen.insert(k.clone())).collect();
        prop_assume!(unique.len() >= 2);
        prop_assume!(!unique.contains(&new_key));

        run(async {
            let cache = test_cache(unique.len());
            for key in &unique {
                cache.set(key, key.as_bytes().to_vec(), Duration::ZERO).await.unwrap();
            }
            cache.set(&new_key, b"new".to_vec(), Duration::ZERO).await.unwrap();

            prop_assert!(!cache.exists(&unique[0]).await.unwrap());
            prop_assert!(cache.exists(&new_key).await.unwrap());
            for key in unique.iter().skip(1) {
                prop_assert!(cache.exists(key).await.unwrap());
            }
            Ok(())
        })?;
    }
}

// Fewer cases for the time-sensitive property
proptest! {
    #![proptest_config(ProptestConfig::with_cases(5))]

    // An entry written with a 50 ms TTL is gone after 100 ms.
    #[test]
    fn prop_ttl_expiration_behavior(key in valid_key_strategy(), value in value_strategy()) {
        run(async {
            let cache = test_cache(TEST_MAX_ENTRIES);
            cache.set(&key, value.clone(), Duration::from_millis(50)).await.unwrap();
            prop_assert_eq!(cache.get(&key).await.unwrap(), value);

            tokio::time::sleep(Duration::from_millis(100)).await;

            prop_assert!(!cache.exists(&key).await.unwrap());
            prop_assert!(matches!(cache.get(&key).await, Err(CacheError::NotFound(_))));
            Ok(())
        })?;
    }
}

#[test]
fn test_clear_completeness() {
    run(async {
        let cache = test_cache(TEST_MAX_ENTRIES);
        let items: HashMap<String, Vec<u8>> = (0..20)
            .map(|i| (format!("key:{}", i), vec![i as u8]))
            .collect();
        cache.set_multi(items.clone(), Duration::ZERO).await.unwrap();

        cache.clear().await.unwrap();

        for key in items.keys() {
            assert!(!cache.exists(key).await.unwrap());
            assert!(matches!(cache.get(key).await, Err(CacheError::NotFound(_))));
        }
        Ok(())
    })
    .unwrap();
}
