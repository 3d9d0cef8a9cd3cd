// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, thread::sleep, time::Duration};

use resp_cache_rs::{
    server::stats::Stats,
    storage::engine::{StorageEngine, StoreError},
};

fn engine(max_memory: u64, default_ttl: i64) -> (StorageEngine, Arc<Stats>) {
    let stats = Arc::new(Stats::new(max_memory));
    (
        StorageEngine::new(max_memory, default_ttl, stats.clone()),
        stats,
    )
}

#[test]
fn test_set_get_del_roundtrip() {
    let (store, _stats) = engine(1024, 0);

    assert!(store.set(b"k", b"hello", 0).is_ok());
    assert_eq!(store.get(b"k").as_deref(), Some(b"hello".as_ref()));
    assert!(store.exists(b"k"));
    assert_eq!(store.entry_count(), 1);

    assert!(store.del(b"k"));
    assert!(!store.del(b"k"));
    assert_eq!(store.get(b"k"), None);
    assert_eq!(store.entry_count(), 0);
    assert_eq!(store.memory_used(), 0);
}

#[test]
fn test_memory_accounting_tracks_payload_sizes() {
    let (store, stats) = engine(1024, 0);

    store.set(b"alpha", b"12345", 0).expect("set alpha");
    store.set(b"be", b"1234567890", 0).expect("set be");
    assert_eq!(store.memory_used(), (5 + 5) + (2 + 10));

    // Overwrite adjusts by the delta only.
    store.set(b"alpha", b"12", 0).expect("overwrite alpha");
    assert_eq!(store.memory_used(), (5 + 2) + (2 + 10));

    store.del(b"be");
    assert_eq!(store.memory_used(), 5 + 2);

    let snap = stats.snapshot().expect("stats snapshot");
    assert_eq!(snap.used_memory_bytes, store.memory_used());
}

#[test]
fn test_get_counts_hits_and_misses() {
    let (store, stats) = engine(1024, 0);

    store.set(b"k", b"v", 0).expect("set");
    assert!(store.get(b"k").is_some());
    assert!(store.get(b"k").is_some());
    assert!(store.get(b"missing").is_none());

    let snap = stats.snapshot().expect("stats snapshot");
    assert_eq!(snap.cache_hits, 2);
    assert_eq!(snap.cache_misses, 1);
}

#[test]
fn test_ttl_reporting() {
    let (store, _stats) = engine(1024, 0);

    assert_eq!(store.ttl(b"absent"), -1);

    store.set(b"k", b"v", 0).expect("set");
    assert_eq!(store.ttl(b"k"), -2);

    assert!(store.expire(b"k", 100));
    let remaining = store.ttl(b"k");
    assert!((99..=100).contains(&remaining), "got {remaining}");

    // ttl <= 0 clears the expiry again.
    assert!(store.expire(b"k", 0));
    assert_eq!(store.ttl(b"k"), -2);

    assert!(!store.expire(b"absent", 10));
}

#[test]
fn test_expired_entries_are_invisible_and_swept() {
    let (store, _stats) = engine(1024, 0);

    store.set(b"t", b"v", 1).expect("set with ttl");
    assert_eq!(store.get(b"t").as_deref(), Some(b"v".as_ref()));

    sleep(Duration::from_secs(2));

    // Invisible to reads before the sweeper has run.
    assert_eq!(store.get(b"t"), None);
    assert_eq!(store.ttl(b"t"), -1);
    assert!(!store.exists(b"t"));

    assert_eq!(store.cleanup_expired(), 1);
    assert_eq!(store.entry_count(), 0);
    assert_eq!(store.memory_used(), 0);
    assert_eq!(store.cleanup_expired(), 0);
}

#[test]
fn test_set_replaces_expired_entry_under_same_key() {
    let (store, _stats) = engine(1024, 0);

    store.set(b"k", b"first", 1).expect("set with ttl");
    sleep(Duration::from_secs(2));

    store.set(b"k", b"second", 0).expect("set over expired");
    assert_eq!(store.get(b"k").as_deref(), Some(b"second".as_ref()));
    assert_eq!(store.entry_count(), 1);
    assert_eq!(store.memory_used(), (1 + 6) as u64);
    assert_eq!(store.ttl(b"k"), -2);
}

#[test]
fn test_default_ttl_applies_when_unset() {
    let (store, _stats) = engine(1024, 100);

    store.set(b"k", b"v", 0).expect("set");
    let remaining = store.ttl(b"k");
    assert!((99..=100).contains(&remaining), "got {remaining}");

    // Explicit ttl wins over the default.
    store.set(b"e", b"v", 5).expect("set explicit");
    let remaining = store.ttl(b"e");
    assert!((4..=5).contains(&remaining), "got {remaining}");

    store.set_default_ttl(0);
    store.set(b"n", b"v", 0).expect("set after reset");
    assert_eq!(store.ttl(b"n"), -2);
}

#[test]
fn test_eviction_drops_least_recently_written_first() {
    // Every entry is 1 + 19 = 20 bytes; the budget fits two.
    let (store, _stats) = engine(50, 0);
    let payload = [b'x'; 19];

    store.set(b"a", &payload, 0).expect("set a");
    store.set(b"b", &payload, 0).expect("set b");
    store.set(b"c", &payload, 0).expect("set c");

    assert_eq!(store.get(b"a"), None, "oldest entry evicted");
    assert!(store.get(b"b").is_some());
    assert!(store.get(b"c").is_some());
    assert!(store.memory_used() <= 50);
    assert_eq!(store.entry_count(), 2);
}

#[test]
fn test_rewrite_promotes_entry_out_of_eviction_order() {
    let (store, _stats) = engine(50, 0);
    let payload = [b'x'; 19];

    store.set(b"a", &payload, 0).expect("set a");
    store.set(b"b", &payload, 0).expect("set b");
    // Rewriting `a` moves it to the head; `b` becomes the tail victim.
    store.set(b"a", &payload, 0).expect("rewrite a");
    store.set(b"c", &payload, 0).expect("set c");

    assert!(store.get(b"a").is_some());
    assert_eq!(store.get(b"b"), None);
    assert!(store.get(b"c").is_some());
}

#[test]
fn test_set_fails_when_entry_cannot_fit_at_all() {
    let (store, _stats) = engine(10, 0);

    let err = store.set(b"key", b"way too large for this", 0);
    assert_eq!(err, Err(StoreError::OutOfMemory));
    assert_eq!(store.entry_count(), 0);
    assert_eq!(store.memory_used(), 0);

    // A fitting entry still goes in afterwards.
    assert!(store.set(b"k", b"v", 0).is_ok());
}

#[test]
fn test_shrinking_budget_defers_eviction_to_next_set() {
    let (store, _stats) = engine(1024, 0);
    let payload = [b'x'; 19];

    store.set(b"a", &payload, 0).expect("set a");
    store.set(b"b", &payload, 0).expect("set b");

    store.set_max_memory(50);
    // Nothing evicted yet.
    assert_eq!(store.entry_count(), 2);

    store.set(b"c", &payload, 0).expect("set c");
    assert_eq!(store.entry_count(), 2);
    assert!(store.memory_used() <= 50);
    assert_eq!(store.get(b"a"), None);
}

#[test]
fn test_many_keys_share_buckets_without_loss() {
    let (store, _stats) = engine(1024 * 1024, 0);

    let mut expected_memory = 0u64;
    for i in 0..2000 {
        let key = format!("key-{i}");
        let value = format!("value-{i}");
        expected_memory += (key.len() + value.len()) as u64;
        store.set(key.as_bytes(), value.as_bytes(), 0).expect("set");
    }

    assert_eq!(store.entry_count(), 2000);
    assert_eq!(store.memory_used(), expected_memory);

    for i in (0..2000).step_by(97) {
        let key = format!("key-{i}");
        let expected = format!("value-{i}");
        assert_eq!(
            store.get(key.as_bytes()).as_deref(),
            Some(expected.as_bytes())
        );
    }

    for i in 0..2000 {
        let key = format!("key-{i}");
        assert!(store.del(key.as_bytes()));
    }
    assert_eq!(store.entry_count(), 0);
    assert_eq!(store.memory_used(), 0);
}

#[test]
fn test_del_removes_expired_entry() {
    let (store, _stats) = engine(1024, 0);

    store.set(b"k", b"v", 1).expect("set with ttl");
    sleep(Duration::from_secs(2));

    // DEL reclaims even an expired entry and reports it.
    assert!(store.del(b"k"));
    assert_eq!(store.memory_used(), 0);
}

#[test]
fn test_values_are_binary_safe() {
    let (store, _stats) = engine(1024, 0);

    let value = b"\x00\x01\r\n\xff binary";
    store.set(b"bin", value, 0).expect("set binary");
    assert_eq!(store.get(b"bin").as_deref(), Some(value.as_ref()));
}
