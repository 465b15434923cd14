// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for opflow-engine.
//!
//! [`EngineRuntime`] wires the collaborators into the orchestrators, the
//! dispatcher and one watch subscription per namespace, so the engine can
//! run inside an existing tokio application.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use opflow_core::SqliteTaskStore;
//! use opflow_engine::runtime::EngineRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SqliteTaskStore::connect("sqlite://opflow.db").await?);
//!
//!     let runtime = EngineRuntime::builder()
//!         .store(store.clone())
//!         .submitter(Arc::new(StoreSubmitter::new(store.clone())))
//!         .inventory(Arc::new(MemoryInventory::new()))
//!         .watch_source(Arc::new(PollingWatchSource::new(store, Duration::from_secs(2))))
//!         .namespaces(["default"])
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     let response = runtime.api().create_backup(&request).await;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use opflow_core::TaskStore;
use tracing::info;

use crate::api::EngineApi;
use crate::config::EngineSettings;
use crate::context::EngineContext;
use crate::dispatch::Dispatcher;
use crate::events::{EventPublisher, LogPublisher};
use crate::inventory::ClusterInventory;
use crate::orchestrator::Orchestrators;
use crate::submit::WorkSubmitter;
use crate::watcher::{ResourceKind, WatchManager, WatchSource};

/// Builder for creating an [`EngineRuntime`].
pub struct EngineRuntimeBuilder {
    store: Option<Arc<dyn TaskStore>>,
    submitter: Option<Arc<dyn WorkSubmitter>>,
    inventory: Option<Arc<dyn ClusterInventory>>,
    publisher: Arc<dyn EventPublisher>,
    watch_source: Option<Arc<dyn WatchSource>>,
    namespaces: Vec<String>,
    settings: EngineSettings,
}

impl Default for EngineRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            submitter: None,
            inventory: None,
            publisher: Arc::new(LogPublisher),
            watch_source: None,
            namespaces: vec!["default".to_string()],
            settings: EngineSettings::default(),
        }
    }
}

impl EngineRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the task store (required).
    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the work submitter (required).
    pub fn submitter(mut self, submitter: Arc<dyn WorkSubmitter>) -> Self {
        self.submitter = Some(submitter);
        self
    }

    /// Set the cluster inventory (required).
    pub fn inventory(mut self, inventory: Arc<dyn ClusterInventory>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    /// Set the event publisher.
    ///
    /// Default: [`LogPublisher`]
    pub fn publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    /// Set the source of execution-unit events (required).
    pub fn watch_source(mut self, source: Arc<dyn WatchSource>) -> Self {
        self.watch_source = Some(source);
        self
    }

    /// Set the namespaces to watch.
    ///
    /// Default: `["default"]`
    pub fn namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.namespaces = namespaces.into_iter().map(Into::into).collect();
        self
    }

    /// Set the orchestrator settings.
    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<EngineRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let submitter = self
            .submitter
            .ok_or_else(|| anyhow::anyhow!("submitter is required"))?;
        let inventory = self
            .inventory
            .ok_or_else(|| anyhow::anyhow!("inventory is required"))?;
        let watch_source = self
            .watch_source
            .ok_or_else(|| anyhow::anyhow!("watch_source is required"))?;
        if self.namespaces.is_empty() {
            anyhow::bail!("at least one namespace is required");
        }

        Ok(EngineRuntimeConfig {
            store,
            submitter,
            inventory,
            publisher: self.publisher,
            watch_source,
            namespaces: self.namespaces,
            settings: self.settings,
        })
    }
}

/// Configuration for an [`EngineRuntime`].
pub struct EngineRuntimeConfig {
    store: Arc<dyn TaskStore>,
    submitter: Arc<dyn WorkSubmitter>,
    inventory: Arc<dyn ClusterInventory>,
    publisher: Arc<dyn EventPublisher>,
    watch_source: Arc<dyn WatchSource>,
    namespaces: Vec<String>,
    settings: EngineSettings,
}

impl EngineRuntimeConfig {
    /// Start the runtime, subscribing to every configured namespace.
    pub async fn start(self) -> Result<EngineRuntime> {
        let ctx = Arc::new(EngineContext::new(
            self.store,
            self.submitter,
            self.inventory,
            self.publisher,
            self.settings,
        ));
        let orchestrators = Orchestrators::new(ctx.clone());
        let dispatcher = Arc::new(Dispatcher::new(ctx.clone(), orchestrators.clone()));
        let watches = WatchManager::new(self.watch_source, dispatcher);

        for namespace in &self.namespaces {
            watches
                .setup_watch(namespace, ResourceKind::ExecutionUnit)
                .await?;
        }

        info!(namespaces = ?self.namespaces, "EngineRuntime started");

        Ok(EngineRuntime {
            api: EngineApi::new(ctx, orchestrators),
            watches,
            namespaces: self.namespaces,
        })
    }
}

/// A running engine that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct EngineRuntime {
    api: EngineApi,
    watches: WatchManager,
    namespaces: Vec<String>,
}

impl EngineRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> EngineRuntimeBuilder {
        EngineRuntimeBuilder::new()
    }

    /// Operations exposed to callers.
    pub fn api(&self) -> &EngineApi {
        &self.api
    }

    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    /// Gracefully shut down the runtime.
    ///
    /// Stops every watch subscription and waits for in-flight deliveries
    /// to finish.
    pub async fn shutdown(self) -> Result<()> {
        info!("EngineRuntime shutting down...");
        self.watches.shutdown().await;
        info!("EngineRuntime shutdown complete");
        Ok(())
    }
}
