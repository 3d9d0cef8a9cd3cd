// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{Arc, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use crate::{
    server::stats::Stats,
    storage::entry::{KvEntry, NO_EXPIRY},
};

/// Bucket array size. Fixed for the lifetime of the engine; chains grow
/// instead of rehashing.
pub const BUCKET_COUNT: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("storage lock poisoned")]
    LockPoisoned,
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn djb2(key: &[u8]) -> u32 {
    let mut hash: u32 = 5381;
    for &byte in key {
        hash = hash.wrapping_mul(33).wrapping_add(u32::from(byte));
    }
    hash
}

fn bucket_index(key: &[u8]) -> usize {
    djb2(key) as usize % BUCKET_COUNT
}

/// Everything behind the engine's reader/writer lock: the entry slab, the
/// bucket heads, the LRU endpoints, and the accounting counters.
#[derive(Debug)]
struct EngineState {
    slots: Vec<Option<KvEntry>>,
    free_slots: Vec<usize>,
    buckets: Vec<Option<usize>>,
    /// Most recently written entry.
    lru_head: Option<usize>,
    /// Next eviction victim.
    lru_tail: Option<usize>,
    entry_count: usize,
    memory_used: u64,
    /// 0 disables the budget entirely.
    max_memory: u64,
    default_ttl: i64,
}

impl EngineState {
    fn entry(&self, idx: usize) -> &KvEntry {
        self.slots[idx]
            .as_ref()
            .expect("tracked slot index must be occupied")
    }

    fn entry_mut(&mut self, idx: usize) -> &mut KvEntry {
        self.slots[idx]
            .as_mut()
            .expect("tracked slot index must be occupied")
    }

    fn find_raw(&self, key: &[u8]) -> Option<usize> {
        let mut cursor = self.buckets[bucket_index(key)];
        while let Some(idx) = cursor {
            let entry = self.entry(idx);
            if entry.key.as_ref() == key {
                return Some(idx);
            }
            cursor = entry.bucket_next;
        }
        None
    }

    /// Lookup that hides expired-but-not-yet-swept entries.
    fn find_visible(&self, key: &[u8], now: u64) -> Option<usize> {
        self.find_raw(key)
            .filter(|&idx| !self.entry(idx).is_expired(now))
    }

    fn lru_unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let entry = self.entry(idx);
            (entry.lru_prev, entry.lru_next)
        };
        match prev {
            Some(p) => self.entry_mut(p).lru_next = next,
            None => self.lru_head = next,
        }
        match next {
            Some(n) => self.entry_mut(n).lru_prev = prev,
            None => self.lru_tail = prev,
        }
        let entry = self.entry_mut(idx);
        entry.lru_prev = None;
        entry.lru_next = None;
    }

    fn lru_push_front(&mut self, idx: usize) {
        let old_head = self.lru_head;
        {
            let entry = self.entry_mut(idx);
            entry.lru_prev = None;
            entry.lru_next = old_head;
        }
        match old_head {
            Some(h) => self.entry_mut(h).lru_prev = Some(idx),
            None => self.lru_tail = Some(idx),
        }
        self.lru_head = Some(idx);
    }

    fn lru_move_front(&mut self, idx: usize) {
        if self.lru_head == Some(idx) {
            return;
        }
        self.lru_unlink(idx);
        self.lru_push_front(idx);
    }

    fn bucket_unlink(&mut self, idx: usize) {
        let bucket = bucket_index(self.entry(idx).key.as_ref());
        let (prev, next) = {
            let entry = self.entry(idx);
            (entry.bucket_prev, entry.bucket_next)
        };
        match prev {
            Some(p) => self.entry_mut(p).bucket_next = next,
            None => self.buckets[bucket] = next,
        }
        if let Some(n) = next {
            self.entry_mut(n).bucket_prev = prev;
        }
        let entry = self.entry_mut(idx);
        entry.bucket_prev = None;
        entry.bucket_next = None;
    }

    fn bucket_push_front(&mut self, idx: usize) {
        let bucket = bucket_index(self.entry(idx).key.as_ref());
        let old_head = self.buckets[bucket];
        {
            let entry = self.entry_mut(idx);
            entry.bucket_prev = None;
            entry.bucket_next = old_head;
        }
        if let Some(h) = old_head {
            self.entry_mut(h).bucket_prev = Some(idx);
        }
        self.buckets[bucket] = Some(idx);
    }

    /// Unlinks the entry from both lists, releases its slot, and adjusts
    /// the counters.
    fn remove_entry(&mut self, idx: usize) -> KvEntry {
        self.lru_unlink(idx);
        self.bucket_unlink(idx);
        let entry = self.slots[idx]
            .take()
            .expect("tracked slot index must be occupied");
        self.free_slots.push(idx);
        self.entry_count -= 1;
        self.memory_used -= entry.footprint();
        entry
    }

    fn insert_entry(&mut self, entry: KvEntry) -> usize {
        let footprint = entry.footprint();
        let idx = match self.free_slots.pop() {
            Some(idx) => {
                self.slots[idx] = Some(entry);
                idx
            },
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            },
        };
        self.bucket_push_front(idx);
        self.lru_push_front(idx);
        self.entry_count += 1;
        self.memory_used += footprint;
        idx
    }

    /// Evicts from the LRU tail until `needed` bytes are freed or the list
    /// runs dry. Returns the number of bytes actually freed.
    fn evict_tail(&mut self, needed: u64) -> u64 {
        let mut freed = 0;
        while freed < needed {
            let Some(victim) = self.lru_tail else {
                break;
            };
            let entry = self.remove_entry(victim);
            freed += entry.footprint();
        }
        freed
    }

    fn update_in_place(&mut self, idx: usize, value: &[u8], ttl: i64, now: u64) {
        let default_ttl = self.default_ttl;
        let mut delta: i64 = 0;
        if let Some(entry) = self.slots[idx].as_mut() {
            delta = value.len() as i64 - entry.value.len() as i64;
            entry.value = Bytes::copy_from_slice(value);
            entry.expires_at = if ttl > 0 {
                now + ttl as u64
            } else if ttl == 0 && default_ttl > 0 {
                now + default_ttl as u64
            } else {
                NO_EXPIRY
            };
            entry.touch(now);
        }
        self.memory_used = self.memory_used.saturating_add_signed(delta);
        self.lru_move_front(idx);
    }
}

/// The storage engine: DJB2 hash buckets crossed with an intrusive LRU
/// list, all under one reader/writer lock.
///
/// Lookups take the read lock and only touch atomic fields; every mutation
/// takes the write lock. Recency is recorded on writes alone, so eviction
/// order approximates LRU with a write bias. A poisoned lock degrades to
/// absent-key answers rather than panicking.
#[derive(Debug)]
pub struct StorageEngine {
    state: RwLock<EngineState>,
    stats: Arc<Stats>,
}

impl StorageEngine {
    pub fn new(max_memory: u64, default_ttl: i64, stats: Arc<Stats>) -> Self {
        let state = EngineState {
            slots: Vec::new(),
            free_slots: Vec::new(),
            buckets: vec![None; BUCKET_COUNT],
            lru_head: None,
            lru_tail: None,
            entry_count: 0,
            memory_used: 0,
            max_memory,
            default_ttl,
        };
        Self { state: RwLock::new(state), stats }
    }

    /// Looks up a live entry, counts the hit or miss, and hands back an
    /// owned copy of the value.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        let Ok(state) = self.state.read() else {
            return None;
        };
        let now = now_secs();
        let Some(idx) = state.find_visible(key, now) else {
            self.stats.inc_cache_miss();
            return None;
        };
        self.stats.inc_cache_hit();
        let entry = state.entry(idx);
        entry.touch(now);
        Some(entry.value.clone())
    }

    /// Stores `value` under `key`.
    ///
    /// An existing live key is updated in place and promoted to the LRU
    /// head. A new key evicts tail entries until it fits the budget; when
    /// even an empty store cannot hold it the call fails with
    /// [`StoreError::OutOfMemory`]. `ttl == 0` applies the engine default.
    pub fn set(&self, key: &[u8], value: &[u8], ttl: i64) -> Result<(), StoreError> {
        let Ok(mut state) = self.state.write() else {
            return Err(StoreError::LockPoisoned);
        };
        let now = now_secs();

        if let Some(idx) = state.find_raw(key) {
            if state.entry(idx).is_expired(now) {
                // A stale entry under the same key would otherwise coexist
                // with the fresh one until the sweeper runs.
                state.remove_entry(idx);
            } else {
                state.update_in_place(idx, value, ttl, now);
                self.stats.set_memory(state.memory_used);
                return Ok(());
            }
        }

        let effective_ttl = if ttl > 0 { ttl } else { state.default_ttl };
        let entry = KvEntry::new(
            Bytes::copy_from_slice(key),
            Bytes::copy_from_slice(value),
            effective_ttl,
            now,
        );
        let footprint = entry.footprint();

        if state.max_memory > 0 && state.memory_used + footprint > state.max_memory {
            let needed = state.memory_used + footprint - state.max_memory;
            let freed = state.evict_tail(needed);
            if freed > 0 {
                debug!("evicted {freed} bytes to admit a {footprint}-byte entry");
            }
            if state.memory_used + footprint > state.max_memory {
                self.stats.set_memory(state.memory_used);
                return Err(StoreError::OutOfMemory);
            }
        }

        state.insert_entry(entry);
        self.stats.set_memory(state.memory_used);
        Ok(())
    }

    /// Removes `key`, expired or not. Returns whether an entry was
    /// removed.
    pub fn del(&self, key: &[u8]) -> bool {
        let Ok(mut state) = self.state.write() else {
            return false;
        };
        let Some(idx) = state.find_raw(key) else {
            return false;
        };
        state.remove_entry(idx);
        self.stats.set_memory(state.memory_used);
        true
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        let Ok(state) = self.state.read() else {
            return false;
        };
        state.find_visible(key, now_secs()).is_some()
    }

    /// Re-arms or clears the expiry of a live key. `ttl <= 0` clears it.
    /// Returns false when the key is absent or already expired.
    pub fn expire(&self, key: &[u8], ttl: i64) -> bool {
        let Ok(mut state) = self.state.write() else {
            return false;
        };
        let now = now_secs();
        let Some(idx) = state.find_visible(key, now) else {
            return false;
        };
        let entry = state.entry_mut(idx);
        entry.expires_at = if ttl > 0 { now + ttl as u64 } else { NO_EXPIRY };
        true
    }

    /// Seconds until expiry: -1 when the key is absent or expired, -2 when
    /// it exists without an expiry.
    pub fn ttl(&self, key: &[u8]) -> i64 {
        let Ok(state) = self.state.read() else {
            return -1;
        };
        let now = now_secs();
        let Some(idx) = state.find_visible(key, now) else {
            return -1;
        };
        let entry = state.entry(idx);
        if entry.expires_at == NO_EXPIRY {
            return -2;
        }
        let remaining = (entry.expires_at - now) as i64;
        if remaining > 0 { remaining } else { -1 }
    }

    /// Walks every bucket and drops entries whose expiry has passed.
    /// Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let Ok(mut state) = self.state.write() else {
            return 0;
        };
        let now = now_secs();
        let mut removed = 0;

        for bucket in 0..BUCKET_COUNT {
            let mut cursor = state.buckets[bucket];
            while let Some(idx) = cursor {
                cursor = state.entry(idx).bucket_next;
                if state.entry(idx).is_expired(now) {
                    state.remove_entry(idx);
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            self.stats.set_memory(state.memory_used);
        }
        removed
    }

    pub fn entry_count(&self) -> usize {
        self.state.read().map(|s| s.entry_count).unwrap_or(0)
    }

    pub fn memory_used(&self) -> u64 {
        self.state.read().map(|s| s.memory_used).unwrap_or(0)
    }

    /// Shrinking the budget does not evict immediately; the next insert
    /// that overflows the new budget does.
    pub fn set_max_memory(&self, max_memory: u64) {
        if let Ok(mut state) = self.state.write() {
            state.max_memory = max_memory;
        }
    }

    pub fn set_default_ttl(&self, default_ttl: i64) {
        if let Ok(mut state) = self.state.write() {
            state.default_ttl = default_ttl;
        }
    }
}
