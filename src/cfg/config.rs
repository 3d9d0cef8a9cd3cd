// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::cfg::logger::LoggingConfig;

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// Listener address and runtime sizing.
    pub server: ServerConfig,
    /// Cache budget and expiry defaults handed to the storage engine.
    pub cache: CacheConfig,
    /// Credentials accepted by AUTH.
    pub auth: AuthConfig,
    /// Logging destination and verbosity.
    pub logging: LoggingConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP port to listen on. Port 0 asks the OS for an ephemeral port.
    pub port: u16,
    /// Worker threads driving client connections.
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 6380, workers: 4 }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct CacheConfig {
    /// Value-payload memory budget in megabytes.
    pub max_memory_mb: u64,
    /// TTL applied to keys stored without an explicit one. 0 = never expire.
    pub default_ttl: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_memory_mb: 256, default_ttl: 0 }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub default_user: String,
    pub default_password: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            default_user: "admin".to_string(),
            default_password: "admin".to_string(),
        }
    }
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Loads the file when it exists; a missing file falls back to the
    /// built-in defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(self.server.workers >= 1, "workers must be >= 1");
        ensure!(self.cache.max_memory_mb >= 1, "max_memory_mb must be >= 1");
        ensure!(
            self.cache.default_ttl >= 0,
            "default_ttl must be non-negative"
        );
        ensure!(
            !self.auth.default_user.is_empty(),
            "default_user must not be empty"
        );
        ensure!(
            !self.auth.default_password.is_empty(),
            "default_password must not be empty"
        );
        Ok(())
    }

    pub fn max_memory_bytes(&self) -> u64 {
        self.cache.max_memory_mb * 1024 * 1024
    }
}
