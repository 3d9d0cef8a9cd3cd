// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use resp_cache_rs::{
    cfg::{
        cli::{config_path_from_args, resolve_config_path},
        config::Config,
        logger::init_logger,
    },
    server::{
        auth::AuthService, executor::CommandExecutor, listener::NetworkListener,
        maintenance, runtime::RuntimeConfig, stats::Stats,
    },
    storage::engine::StorageEngine,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

const DEFAULT_CONFIG_PATH: &str = "cache.yaml";
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    let cfg = match config_path_from_args() {
        Some(arg) => {
            let path = resolve_config_path(&arg)?;
            Config::load_from_file(&path)
                .with_context(|| format!("failed to load config {path:?}"))?
        },
        None => Config::load_or_default(DEFAULT_CONFIG_PATH)
            .context("failed to load default config")?,
    };

    // The runtime is sized before the logger so a bad workers value fails
    // loudly on stderr.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cfg.server.workers.max(1))
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(serve(cfg))
}

async fn serve(cfg: Config) -> Result<()> {
    let _logger_guard = init_logger(&cfg.logging)?;

    info!("cache server starting");
    info!("port: {}", cfg.server.port);
    info!("max memory: {} MB", cfg.cache.max_memory_mb);
    info!("workers: {}", cfg.server.workers);
    info!("default TTL: {} seconds", cfg.cache.default_ttl);
    info!("default user: {}", cfg.auth.default_user);

    let stats = Arc::new(Stats::new(cfg.max_memory_bytes()));
    let storage = Arc::new(StorageEngine::new(
        cfg.max_memory_bytes(),
        cfg.cache.default_ttl,
        stats.clone(),
    ));
    let auth = Arc::new(AuthService::new(
        &cfg.auth.default_user,
        &cfg.auth.default_password,
    ));
    let runtime_config = Arc::new(RuntimeConfig::new(
        cfg.cache.max_memory_mb,
        cfg.server.workers,
        cfg.cache.default_ttl,
    ));
    let executor = Arc::new(CommandExecutor::new(
        storage.clone(),
        stats.clone(),
        auth,
        runtime_config,
    ));

    let listener = NetworkListener::start(cfg.server.port, executor, stats).await?;
    info!("ready to accept connections on {}", listener.local_addr());

    let maint_cancel = CancellationToken::new();
    let maint = maintenance::spawn(storage, maint_cancel.clone());

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for shutdown signal")?;
    info!("received shutdown signal");

    maint_cancel.cancel();
    let _ = maint.await;

    listener.stop(SHUTDOWN_TIMEOUT).await;

    info!("cache server stopped");
    Ok(())
}
