//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check size accounting, capacity and LRU ordering of the
//! memory cache, plus purity of the policy functions.

use proptest::prelude::*;
use std::collections::HashMap;
use std::time::Duration;

use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;

use crate::cache::{cache_key, current_timestamp_ms, Cache, CacheEntry, MemoryCache};

// == Test Configuration ==
const TEST_MAX_SIZE: u64 = 256;

// == Strategies ==
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,3}".prop_map(|s| s)
}

fn size_strategy() -> impl Strategy<Value = u64> {
    1u64..96
}

#[derive(Debug, Clone)]
enum CacheOp {
    Set { key: String, size: u64 },
    Get { key: String },
    Delete { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (key_strategy(), size_strategy()).prop_map(|(key, size)| CacheOp::Set { key, size }),
        key_strategy().prop_map(|key| CacheOp::Get { key }),
        key_strategy().prop_map(|key| CacheOp::Delete { key }),
    ]
}

fn entry_with_size(size: u64) -> CacheEntry {
    let now = current_timestamp_ms();
    CacheEntry {
        status: StatusCode::OK,
        headers: HeaderMap::new(),
        body: Bytes::new(),
        etag: String::new(),
        created_at: now,
        expires_at: now + 300_000,
        size,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Size accounting: after any sequence of operations the reported size
    // equals the sum of the sizes of the entries still retrievable, and
    // never exceeds capacity.
    #[test]
    fn prop_size_accounting(ops in prop::collection::vec(cache_op_strategy(), 1..80)) {
        let store = MemoryCache::new(TEST_MAX_SIZE);
        let mut sizes: HashMap<String, u64> = HashMap::new();

        for op in ops {
            match op {
                CacheOp::Set { key, size } => {
                    store.set(key.clone(), entry_with_size(size));
                    sizes.insert(key, size);
                    prop_assert!(store.size() <= TEST_MAX_SIZE, "Capacity exceeded");
                }
                CacheOp::Get { key } => {
                    let _ = store.get(&key);
                }
                CacheOp::Delete { key } => {
                    store.delete(&key);
                }
            }
        }

        let live: u64 = sizes
            .iter()
            .filter(|(key, _)| store.get(key).is_some())
            .map(|(_, size)| *size)
            .sum();
        prop_assert_eq!(store.size(), live, "Size does not match live entries");
    }

    // LRU order: with equally sized entries filling the cache, inserting
    // one more always evicts the least recently accessed key.
    #[test]
    fn prop_lru_evicts_least_recent(accesses in prop::collection::vec(0usize..4, 0..20)) {
        let store = MemoryCache::new(40);
        let keys = ["a", "b", "c", "d"];
        let mut order: Vec<&str> = Vec::new();

        for key in keys {
            store.set(key.to_string(), entry_with_size(10));
            order.push(key);
        }

        for idx in accesses {
            let key = keys[idx];
            prop_assert!(store.get(key).is_some());
            order.retain(|k| *k != key);
            order.push(key);
        }

        store.set("e".to_string(), entry_with_size(10));

        prop_assert!(store.get(order[0]).is_none(), "LRU entry should be evicted");
        for key in &order[1..] {
            prop_assert!(store.get(key).is_some(), "Recent entry {} evicted", key);
        }
    }

    // Round trip: a fresh entry is returned with its body intact.
    #[test]
    fn prop_roundtrip_storage(key in key_strategy(), body in "[a-zA-Z0-9 ]{0,64}") {
        let store = MemoryCache::new(TEST_MAX_SIZE);
        let entry = CacheEntry::new(
            StatusCode::OK,
            HeaderMap::new(),
            Bytes::from(body.clone()),
            String::new(),
            Duration::from_secs(60),
        );

        store.set(key.clone(), entry);

        let retrieved = store.get(&key).unwrap();
        prop_assert_eq!(retrieved.body.as_ref(), body.as_bytes());
    }

    // Key derivation is pure and path sensitive.
    #[test]
    fn prop_cache_key_pure(
        path_a in "/[a-z]{1,12}",
        path_b in "/[a-z]{1,12}",
        query in "[a-z=&]{0,12}"
    ) {
        let a1 = cache_key(&Method::GET, &path_a, &query, &[]);
        let a2 = cache_key(&Method::GET, &path_a, &query, &[]);
        prop_assert_eq!(&a1, &a2);

        if path_a != path_b {
            prop_assert_ne!(a1, cache_key(&Method::GET, &path_b, &query, &[]));
        }
    }
}
