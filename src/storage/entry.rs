// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

/// `expires_at` value meaning the entry never expires.
pub const NO_EXPIRY: u64 = 0;

/// One stored key with its value and bookkeeping.
///
/// An entry is threaded through two intrusive lists owned by the engine: a
/// hash-bucket chain and the process-wide LRU list. Both are expressed as
/// slot indices into the engine's slab rather than pointers; the entry is
/// meaningless outside the engine that allocated it.
///
/// `last_accessed` and `access_count` are atomics because lookups touch
/// them while holding only the engine's read lock.
#[derive(Debug)]
pub struct KvEntry {
    pub key: Bytes,
    pub value: Bytes,
    pub created_at: u64,
    pub last_accessed: AtomicU64,
    pub access_count: AtomicU64,
    /// Epoch seconds; [`NO_EXPIRY`] disables expiry.
    pub expires_at: u64,

    pub(crate) bucket_prev: Option<usize>,
    pub(crate) bucket_next: Option<usize>,
    pub(crate) lru_prev: Option<usize>,
    pub(crate) lru_next: Option<usize>,
}

impl KvEntry {
    pub(crate) fn new(key: Bytes, value: Bytes, ttl: i64, now: u64) -> Self {
        let expires_at = if ttl > 0 { now + ttl as u64 } else { NO_EXPIRY };
        Self {
            key,
            value,
            created_at: now,
            last_accessed: AtomicU64::new(now),
            access_count: AtomicU64::new(0),
            expires_at,
            bucket_prev: None,
            bucket_next: None,
            lru_prev: None,
            lru_next: None,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at != NO_EXPIRY && now >= self.expires_at
    }

    pub fn touch(&self, now: u64) {
        self.last_accessed.store(now, Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Bytes this entry charges against the memory budget. Struct overhead
    /// is deliberately not accounted.
    pub fn footprint(&self) -> u64 {
        (self.key.len() + self.value.len()) as u64
    }
}
