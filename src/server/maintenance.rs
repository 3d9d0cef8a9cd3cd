// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::storage::engine::StorageEngine;

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Spawns the background sweeper that drops expired keys once per second
/// until `cancel` fires.
pub fn spawn(
    storage: Arc<StorageEngine>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run(storage, cancel))
}

async fn run(storage: Arc<StorageEngine>, cancel: CancellationToken) {
    info!("maintenance loop started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(SWEEP_INTERVAL) => {
                let removed = storage.cleanup_expired();
                if removed > 0 {
                    debug!("cleaned up {removed} expired keys");
                }
            },
        }
    }

    info!("maintenance loop finished");
}
