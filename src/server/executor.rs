// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{borrow::Cow, sync::Arc};

use crate::{
    protocol::resp::{Value, lenient_i64},
    server::{auth::AuthService, runtime::RuntimeConfig, stats::Stats},
    storage::engine::StorageEngine,
};

const MIB: u64 = 1024 * 1024;

/// Dispatches parsed commands against storage, stats, auth, and the
/// runtime config.
///
/// Command names and CONFIG parameter names are case-insensitive; keys and
/// values are not. PING, HELLO, AUTH, QUIT, and CONFIG are served before
/// authentication; everything else answers `NOAUTH` until the session's
/// AUTH succeeds.
#[derive(Debug)]
pub struct CommandExecutor {
    storage: Arc<StorageEngine>,
    stats: Arc<Stats>,
    auth: Arc<AuthService>,
    runtime: Arc<RuntimeConfig>,
}

fn bulk_bytes(value: &Value) -> Option<&[u8]> {
    match value {
        Value::Bulk(data) => Some(data.as_ref()),
        _ => None,
    }
}

fn bulk_text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::Bulk(data) => Some(String::from_utf8_lossy(data)),
        _ => None,
    }
}

fn wrong_args(cmd: &str) -> Value {
    Value::error(
        "ERR",
        &format!("wrong number of arguments for '{cmd}' command"),
    )
}

impl CommandExecutor {
    pub fn new(
        storage: Arc<StorageEngine>,
        stats: Arc<Stats>,
        auth: Arc<AuthService>,
        runtime: Arc<RuntimeConfig>,
    ) -> Self {
        Self { storage, stats, auth, runtime }
    }

    /// Executes one command array and returns the reply to serialize.
    /// `authenticated` is the calling session's gate flag; only a
    /// successful AUTH flips it.
    pub fn execute(&self, cmd: &Value, authenticated: &mut bool) -> Value {
        let Value::Array(args) = cmd else {
            return Value::error("ERR", "invalid command format");
        };
        if args.is_empty() {
            return Value::error("ERR", "invalid command format");
        }
        let Some(name) = bulk_text(&args[0]) else {
            return Value::error("ERR", "invalid command name");
        };
        let name = name.to_ascii_uppercase();

        match name.as_str() {
            "HELLO" => self.handle_hello(args),
            "AUTH" => self.handle_auth(args, authenticated),
            "CONFIG" => self.handle_config(args),
            "PING" => self.handle_ping(),
            "QUIT" => Value::ok(),
            _ if !*authenticated => {
                Value::error("NOAUTH", "Authentication required")
            },
            "GET" => self.handle_get(args),
            "SET" => self.handle_set(args),
            "DEL" => self.handle_del(args),
            "EXPIRE" => self.handle_expire(args),
            "TTL" => self.handle_ttl(args),
            "STATS" => self.handle_stats(),
            _ => {
                self.stats.inc_command("OTHER");
                Value::error("ERR", "unknown command")
            },
        }
    }

    fn handle_ping(&self) -> Value {
        self.stats.inc_command("PING");
        Value::Simple("PONG".to_string())
    }

    fn handle_hello(&self, args: &[Value]) -> Value {
        self.stats.inc_command("HELLO");

        if args.len() < 2 {
            return wrong_args("HELLO");
        }

        // Only protocol version 2 is spoken here.
        match bulk_bytes(&args[1]) {
            Some(version) if version == b"2" => Value::ok(),
            _ => Value::error("NOPROTO", "unsupported protocol version"),
        }
    }

    fn handle_auth(&self, args: &[Value], authenticated: &mut bool) -> Value {
        self.stats.inc_command("AUTH");

        if !(2..=3).contains(&args.len()) {
            return wrong_args("AUTH");
        }

        let (username, password) = if args.len() == 2 {
            let Some(password) = bulk_text(&args[1]) else {
                return Value::error("ERR", "invalid argument type");
            };
            (Cow::Owned(self.auth.default_user()), password)
        } else {
            let (Some(username), Some(password)) =
                (bulk_text(&args[1]), bulk_text(&args[2]))
            else {
                return Value::error("ERR", "invalid argument type");
            };
            (username, password)
        };

        if self.auth.authenticate(&username, &password) {
            *authenticated = true;
            return Value::ok();
        }

        Value::error("WRONGPASS", "invalid username-password pair")
    }

    fn handle_get(&self, args: &[Value]) -> Value {
        self.stats.inc_command("GET");

        if args.len() < 2 {
            return wrong_args("GET");
        }
        let Some(key) = bulk_bytes(&args[1]) else {
            return Value::error("ERR", "invalid key type");
        };

        match self.storage.get(key) {
            Some(value) => Value::Bulk(value),
            None => Value::Null,
        }
    }

    fn handle_set(&self, args: &[Value]) -> Value {
        self.stats.inc_command("SET");

        if args.len() < 3 {
            return wrong_args("SET");
        }
        let (Some(key), Some(value)) = (bulk_bytes(&args[1]), bulk_bytes(&args[2]))
        else {
            return Value::error("ERR", "invalid argument type");
        };

        match self.storage.set(key, value, 0) {
            Ok(()) => Value::ok(),
            Err(_) => Value::error("ERR", "out of memory"),
        }
    }

    fn handle_del(&self, args: &[Value]) -> Value {
        self.stats.inc_command("DEL");

        if args.len() < 2 {
            return wrong_args("DEL");
        }

        let mut deleted: i64 = 0;
        for arg in &args[1..] {
            if let Some(key) = bulk_bytes(arg)
                && self.storage.del(key)
            {
                deleted += 1;
            }
        }

        Value::int(deleted)
    }

    fn handle_expire(&self, args: &[Value]) -> Value {
        self.stats.inc_command("EXPIRE");

        if args.len() < 3 {
            return wrong_args("EXPIRE");
        }
        let (Some(key), Some(seconds)) = (bulk_bytes(&args[1]), bulk_bytes(&args[2]))
        else {
            return Value::error("ERR", "invalid argument type");
        };

        let ttl = lenient_i64(seconds);
        Value::int(i64::from(self.storage.expire(key, ttl)))
    }

    fn handle_ttl(&self, args: &[Value]) -> Value {
        self.stats.inc_command("TTL");

        if args.len() < 2 {
            return wrong_args("TTL");
        }
        let Some(key) = bulk_bytes(&args[1]) else {
            return Value::error("ERR", "invalid key type");
        };

        Value::int(self.storage.ttl(key))
    }

    fn handle_stats(&self) -> Value {
        self.stats.inc_command("STATS");

        match self.stats.format_report() {
            Some(report) => Value::bulk(report),
            None => Value::error("ERR", "failed to format statistics"),
        }
    }

    fn handle_config(&self, args: &[Value]) -> Value {
        self.stats.inc_command("CONFIG");

        if args.len() < 2 {
            return wrong_args("CONFIG");
        }
        let Some(subcommand) = bulk_text(&args[1]) else {
            return Value::error("ERR", "invalid subcommand type");
        };

        if subcommand.eq_ignore_ascii_case("GET") {
            return self.handle_config_get(args);
        }
        if subcommand.eq_ignore_ascii_case("SET") {
            return self.handle_config_set(args);
        }

        Value::error("ERR", "unknown CONFIG subcommand")
    }

    fn handle_config_get(&self, args: &[Value]) -> Value {
        if args.len() < 3 {
            return wrong_args("CONFIG GET");
        }
        let Some(param) = bulk_text(&args[2]) else {
            return Value::error("ERR", "invalid parameter type");
        };

        let Some(settings) = self.runtime.snapshot() else {
            return Value::error("ERR", "failed to acquire config lock");
        };

        if param.as_ref() == "*" {
            // Informational dump: the real budget plus the fixed stub
            // parameters clients commonly probe for.
            return Value::Array(vec![
                Value::bulk_str("maxmemory"),
                Value::bulk_str(&settings.max_memory_bytes.to_string()),
                Value::bulk_str("maxclients"),
                Value::bulk_str("10000"),
                Value::bulk_str("timeout"),
                Value::bulk_str("0"),
                Value::bulk_str("tcp-keepalive"),
                Value::bulk_str("300"),
                Value::bulk_str("databases"),
                Value::bulk_str("16"),
            ]);
        }

        let reply_value = if param.eq_ignore_ascii_case("maxmemory") {
            settings.max_memory_bytes.to_string()
        } else if param.eq_ignore_ascii_case("maxmemory-mb") {
            settings.max_memory_mb.to_string()
        } else if param.eq_ignore_ascii_case("default-ttl") {
            settings.default_ttl.to_string()
        } else if param.eq_ignore_ascii_case("workers") {
            settings.workers.to_string()
        } else {
            return Value::error("ERR", "unsupported CONFIG parameter");
        };

        Value::Array(vec![
            Value::bulk_str(&param),
            Value::bulk_str(&reply_value),
        ])
    }

    fn handle_config_set(&self, args: &[Value]) -> Value {
        if args.len() < 4 {
            return wrong_args("CONFIG SET");
        }
        let (Some(param), Some(raw_value)) =
            (bulk_text(&args[2]), bulk_bytes(&args[3]))
        else {
            return Value::error("ERR", "invalid argument type");
        };

        let parsed = lenient_i64(raw_value);

        if param.eq_ignore_ascii_case("maxmemory") {
            if parsed < MIB as i64 {
                return Value::error("ERR", "maxmemory must be at least 1MB");
            }
            let bytes = parsed as u64;
            let Some(settings) = self.runtime.update(|s| {
                s.max_memory_bytes = bytes;
                s.max_memory_mb = bytes / MIB;
            }) else {
                return Value::error("ERR", "failed to acquire config lock");
            };
            self.stats.set_max_memory(settings.max_memory_bytes);
            self.storage.set_max_memory(settings.max_memory_bytes);
        } else if param.eq_ignore_ascii_case("maxmemory-mb") {
            if parsed < 1 {
                return Value::error("ERR", "maxmemory-mb must be at least 1");
            }
            let mb = parsed as u64;
            let Some(settings) = self.runtime.update(|s| {
                s.max_memory_mb = mb;
                s.max_memory_bytes = mb * MIB;
            }) else {
                return Value::error("ERR", "failed to acquire config lock");
            };
            self.stats.set_max_memory(settings.max_memory_bytes);
            self.storage.set_max_memory(settings.max_memory_bytes);
        } else if param.eq_ignore_ascii_case("default-ttl") {
            if parsed < 0 {
                return Value::error("ERR", "default-ttl must be non-negative");
            }
            if self.runtime.update(|s| s.default_ttl = parsed).is_none() {
                return Value::error("ERR", "failed to acquire config lock");
            }
            self.storage.set_default_ttl(parsed);
        } else {
            return Value::error("ERR", "unsupported CONFIG parameter");
        }

        Value::ok()
    }
}
