// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::RwLock;

/// Settings that CONFIG GET/SET reads and writes at runtime.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeSettings {
    pub max_memory_bytes: u64,
    pub max_memory_mb: u64,
    pub default_ttl: i64,
    pub workers: usize,
}

/// Reader/writer-locked runtime settings. Reads dominate (every CONFIG GET
/// and executor lookup); writes happen only on CONFIG SET, and the caller
/// propagates the accepted values into storage and stats afterwards.
#[derive(Debug)]
pub struct RuntimeConfig {
    state: RwLock<RuntimeSettings>,
}

impl RuntimeConfig {
    pub fn new(max_memory_mb: u64, workers: usize, default_ttl: i64) -> Self {
        Self {
            state: RwLock::new(RuntimeSettings {
                max_memory_bytes: max_memory_mb * 1024 * 1024,
                max_memory_mb,
                default_ttl,
                workers,
            }),
        }
    }

    /// Copy of the current settings; `None` when the lock is poisoned.
    pub fn snapshot(&self) -> Option<RuntimeSettings> {
        self.state.read().ok().map(|s| *s)
    }

    /// Applies `apply` under the write lock and returns the resulting
    /// settings; `None` when the lock is poisoned.
    pub fn update<F>(&self, apply: F) -> Option<RuntimeSettings>
    where F: FnOnce(&mut RuntimeSettings) {
        let mut guard = self.state.write().ok()?;
        apply(&mut guard);
        Some(*guard)
    }
}
