// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Mutex, time::Instant};

/// Counter block guarded by the stats mutex. Cloned out whole for
/// reporting so the lock is never held while formatting.
#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    pub total_commands: u64,
    pub cmd_get: u64,
    pub cmd_set: u64,
    pub cmd_del: u64,
    pub cmd_ping: u64,
    pub cmd_auth: u64,
    pub cmd_config: u64,
    pub cmd_expire: u64,
    pub cmd_ttl: u64,
    pub cmd_stats: u64,
    pub cmd_hello: u64,
    pub cmd_other: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub total_connections: u64,
    pub current_connections: u64,
    pub used_memory_bytes: u64,
    pub max_memory_bytes: u64,
}

#[derive(Debug)]
pub struct Stats {
    counters: Mutex<StatsSnapshot>,
    started: Instant,
}

impl Stats {
    pub fn new(max_memory_bytes: u64) -> Self {
        let counters = StatsSnapshot {
            max_memory_bytes,
            ..StatsSnapshot::default()
        };
        Self {
            counters: Mutex::new(counters),
            started: Instant::now(),
        }
    }

    /// Bumps the total and the per-command bucket. Unrecognized names land
    /// in the `other` bucket.
    pub fn inc_command(&self, cmd: &str) {
        let Ok(mut c) = self.counters.lock() else {
            return;
        };
        c.total_commands += 1;

        if cmd.eq_ignore_ascii_case("GET") {
            c.cmd_get += 1;
        } else if cmd.eq_ignore_ascii_case("SET") {
            c.cmd_set += 1;
        } else if cmd.eq_ignore_ascii_case("DEL") {
            c.cmd_del += 1;
        } else if cmd.eq_ignore_ascii_case("PING") {
            c.cmd_ping += 1;
        } else if cmd.eq_ignore_ascii_case("AUTH") {
            c.cmd_auth += 1;
        } else if cmd.eq_ignore_ascii_case("CONFIG") {
            c.cmd_config += 1;
        } else if cmd.eq_ignore_ascii_case("EXPIRE") {
            c.cmd_expire += 1;
        } else if cmd.eq_ignore_ascii_case("TTL") {
            c.cmd_ttl += 1;
        } else if cmd.eq_ignore_ascii_case("STATS") {
            c.cmd_stats += 1;
        } else if cmd.eq_ignore_ascii_case("HELLO") {
            c.cmd_hello += 1;
        } else {
            c.cmd_other += 1;
        }
    }

    pub fn inc_cache_hit(&self) {
        if let Ok(mut c) = self.counters.lock() {
            c.cache_hits += 1;
        }
    }

    pub fn inc_cache_miss(&self) {
        if let Ok(mut c) = self.counters.lock() {
            c.cache_misses += 1;
        }
    }

    pub fn set_memory(&self, bytes: u64) {
        if let Ok(mut c) = self.counters.lock() {
            c.used_memory_bytes = bytes;
        }
    }

    pub fn set_max_memory(&self, bytes: u64) {
        if let Ok(mut c) = self.counters.lock() {
            c.max_memory_bytes = bytes;
        }
    }

    pub fn inc_connections(&self) {
        if let Ok(mut c) = self.counters.lock() {
            c.current_connections += 1;
            c.total_connections += 1;
        }
    }

    pub fn dec_connections(&self) {
        if let Ok(mut c) = self.counters.lock() {
            c.current_connections = c.current_connections.saturating_sub(1);
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Hit percentage over all lookups so far; 0.0 before the first one.
    pub fn hit_ratio(&self) -> f64 {
        let Ok(c) = self.counters.lock() else {
            return 0.0;
        };
        let total = c.cache_hits + c.cache_misses;
        if total == 0 {
            return 0.0;
        }
        c.cache_hits as f64 / total as f64 * 100.0
    }

    pub fn snapshot(&self) -> Option<StatsSnapshot> {
        self.counters.lock().ok().map(|c| c.clone())
    }

    /// The multi-section text report served by STATS. `None` only when the
    /// counter mutex is poisoned.
    pub fn format_report(&self) -> Option<String> {
        let c = self.snapshot()?;

        let uptime = self.uptime_secs();
        let hours = uptime / 3600;
        let minutes = uptime % 3600 / 60;
        let seconds = uptime % 60;

        let memory_mb = c.used_memory_bytes as f64 / (1024.0 * 1024.0);
        let max_mb = c.max_memory_bytes as f64 / (1024.0 * 1024.0);
        let memory_percent = if c.max_memory_bytes > 0 {
            c.used_memory_bytes as f64 / c.max_memory_bytes as f64 * 100.0
        } else {
            0.0
        };

        let lookups = c.cache_hits + c.cache_misses;
        let hit_ratio = if lookups > 0 {
            c.cache_hits as f64 / lookups as f64 * 100.0
        } else {
            0.0
        };

        Some(format!(
            "STATS\r\n\
             1. Requests\r\n\
             \x20 total_commands_processed   {total_commands}\r\n\
             \x20 cmd_get                    {cmd_get}\r\n\
             \x20 cmd_set                    {cmd_set}\r\n\
             \x20 cmd_del                    {cmd_del}\r\n\
             \x20 cmd_ping                   {cmd_ping}\r\n\
             \x20 cmd_auth                   {cmd_auth}\r\n\
             \x20 cmd_config                 {cmd_config}\r\n\
             \x20 cmd_expire                 {cmd_expire}\r\n\
             \x20 cmd_ttl                    {cmd_ttl}\r\n\
             \x20 cmd_stats                  {cmd_stats}\r\n\
             \x20 cmd_hello                  {cmd_hello}\r\n\
             \x20 cmd_other                  {cmd_other}\r\n\
             \r\n\
             2. Cache\r\n\
             \x20 cache_hits                 {cache_hits}\r\n\
             \x20 cache_misses               {cache_misses}\r\n\
             \x20 hit_ratio                  {hit_ratio:.1}%\r\n\
             \r\n\
             3. Memory\r\n\
             \x20 used_memory_bytes          {used_memory}  ({memory_mb:.1} / {max_mb:.1} MiB, {memory_percent:.1}%)\r\n\
             \r\n\
             4. Connections / Uptime\r\n\
             \x20 current_connections        {current_connections}\r\n\
             \x20 total_connections_received {total_connections}\r\n\
             \x20 uptime_s                   {uptime}  ({hours}h {minutes}m {seconds}s)\r\n",
            total_commands = c.total_commands,
            cmd_get = c.cmd_get,
            cmd_set = c.cmd_set,
            cmd_del = c.cmd_del,
            cmd_ping = c.cmd_ping,
            cmd_auth = c.cmd_auth,
            cmd_config = c.cmd_config,
            cmd_expire = c.cmd_expire,
            cmd_ttl = c.cmd_ttl,
            cmd_stats = c.cmd_stats,
            cmd_hello = c.cmd_hello,
            cmd_other = c.cmd_other,
            cache_hits = c.cache_hits,
            cache_misses = c.cache_misses,
            hit_ratio = hit_ratio,
            used_memory = c.used_memory_bytes,
            memory_mb = memory_mb,
            max_mb = max_mb,
            memory_percent = memory_percent,
            current_connections = c.current_connections,
            total_connections = c.total_connections,
            uptime = uptime,
            hours = hours,
            minutes = minutes,
            seconds = seconds,
        ))
    }
}
