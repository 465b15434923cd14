// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! opflow engine
//!
//! Watches execution units in the configured namespaces and drives backup,
//! restore, clone, stanza and benchmark workflows to completion.

use std::sync::Arc;
use tracing::{info, warn};

use opflow_core::SqliteTaskStore;
use opflow_engine::config::Config;
use opflow_engine::events::LogPublisher;
use opflow_engine::inventory::MemoryInventory;
use opflow_engine::runtime::EngineRuntime;
use opflow_engine::submit::StoreSubmitter;
use opflow_engine::watcher::PollingWatchSource;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "opflow_engine=info,opflow_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        namespaces = ?config.namespaces,
        poll_interval_ms = config.watch_poll_interval.as_millis() as u64,
        strict_replacement = config.strict_replacement,
        "Starting opflow engine"
    );

    let store = Arc::new(SqliteTaskStore::connect(&config.database_url).await?);
    info!("Task store ready");

    let inventory = match &config.inventory_path {
        Some(path) => {
            let inventory = MemoryInventory::load(path).await?;
            info!(path = %path.display(), "Inventory snapshot loaded");
            inventory
        }
        None => {
            warn!("OPFLOW_INVENTORY_PATH not set, starting with an empty inventory");
            MemoryInventory::new()
        }
    };

    let runtime = EngineRuntime::builder()
        .store(store.clone())
        .submitter(Arc::new(StoreSubmitter::new(store.clone())))
        .inventory(Arc::new(inventory))
        .publisher(Arc::new(LogPublisher))
        .watch_source(Arc::new(PollingWatchSource::new(
            store,
            config.watch_poll_interval,
        )))
        .namespaces(config.namespaces.clone())
        .settings(config.engine_settings())
        .build()?
        .start()
        .await?;

    info!("Engine ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("opflow engine shut down");

    Ok(())
}
