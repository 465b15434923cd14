// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for opflow-engine integration tests.
//!
//! Provides a [`Harness`] wired with in-memory collaborators and an
//! inventory holding one backup-enabled cluster, `pg1`.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use opflow_core::labels;
use opflow_core::{ExecutionUnit, MemoryTaskStore, RetryPolicy, Task, TaskType};
use opflow_engine::api::EngineApi;
use opflow_engine::config::EngineSettings;
use opflow_engine::context::EngineContext;
use opflow_engine::dispatch::Dispatcher;
use opflow_engine::events::RecordingPublisher;
use opflow_engine::inventory::{
    Cluster, Deployment, InventorySnapshot, MemoryInventory, Node, Pod,
};
use opflow_engine::orchestrator::Orchestrators;
use opflow_engine::submit::MockSubmitter;
use opflow_engine::watcher::UnitEventHandler;

pub const NS: &str = "pgo";
pub const USER: &str = "admin";

/// Engine wired to in-memory fakes.
pub struct Harness {
    pub store: Arc<MemoryTaskStore>,
    pub submitter: Arc<MockSubmitter>,
    pub inventory: Arc<MemoryInventory>,
    pub publisher: Arc<RecordingPublisher>,
    pub ctx: Arc<EngineContext>,
    pub orchestrators: Orchestrators,
    pub dispatcher: Dispatcher,
    pub api: EngineApi,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_inventory(pg1_inventory())
    }

    pub fn with_inventory(snapshot: InventorySnapshot) -> Self {
        Self::build(snapshot, MemoryTaskStore::new(), test_settings())
    }

    pub fn build(
        snapshot: InventorySnapshot,
        store: MemoryTaskStore,
        settings: EngineSettings,
    ) -> Self {
        let store = Arc::new(store);
        let submitter = Arc::new(MockSubmitter::with_store(store.clone()));
        let inventory = Arc::new(MemoryInventory::from(snapshot));
        let publisher = Arc::new(RecordingPublisher::new());

        let ctx = Arc::new(EngineContext::new(
            store.clone(),
            submitter.clone(),
            inventory.clone(),
            publisher.clone(),
            settings,
        ));
        let orchestrators = Orchestrators::new(ctx.clone());
        let dispatcher = Dispatcher::new(ctx.clone(), orchestrators.clone());
        let api = EngineApi::new(ctx.clone(), orchestrators.clone());

        Self {
            store,
            submitter,
            inventory,
            publisher,
            ctx,
            orchestrators,
            dispatcher,
            api,
        }
    }

    /// Finish the latest unit of `task_name` successfully and deliver the update.
    pub async fn complete(&self, task_name: &str) -> ExecutionUnit {
        let done = self
            .submitter
            .complete(task_name)
            .await
            .unwrap_or_else(|| panic!("no submission for {}", task_name));
        self.deliver_transition(done.clone()).await;
        done
    }

    /// Fail the latest unit of `task_name` and deliver the update.
    pub async fn fail(&self, task_name: &str) -> ExecutionUnit {
        let failed = self
            .submitter
            .fail(task_name)
            .await
            .unwrap_or_else(|| panic!("no submission for {}", task_name));
        self.deliver_transition(failed.clone()).await;
        failed
    }

    async fn deliver_transition(&self, finished: ExecutionUnit) {
        let mut running = finished.clone();
        running.status = Default::default();
        running.status.active = 1;
        self.dispatcher.on_update(&running, &finished).await;
    }

    pub async fn task(&self, name: &str) -> Option<Task> {
        use opflow_core::TaskStore;
        self.store.get_task(NS, name).await.unwrap()
    }

    pub async fn tasks_of(&self, task_type: TaskType) -> Vec<Task> {
        self.store
            .all_tasks()
            .await
            .into_iter()
            .filter(|t| t.task_type == task_type)
            .collect()
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::fixed(3, Duration::from_millis(1))
}

pub fn test_settings() -> EngineSettings {
    EngineSettings {
        replacement_retry: fast_retry(),
        ..EngineSettings::default()
    }
}

/// `pg1`: backups enabled, a ready primary, a ready repository pod and one replica.
pub fn pg1_inventory() -> InventorySnapshot {
    InventorySnapshot::default()
        .cluster(Cluster::new(NS, "pg1").with_label(labels::BACKREST, labels::TRUE))
        .pod(
            Pod::new(NS, "pg1-7f9c-primary")
                .with_label(labels::PG_CLUSTER, "pg1")
                .with_label(labels::ROLE, labels::ROLE_PRIMARY)
                .with_label(labels::DEPLOYMENT_NAME, "pg1")
                .on_node("node-a"),
        )
        .pod(
            Pod::new(NS, "pg1-backrest-shared-repo-5d8b")
                .with_label(labels::PG_CLUSTER, "pg1")
                .with_label(labels::BACKREST_REPO, labels::TRUE),
        )
        .pod(
            Pod::new(NS, "pg1-rpl1-6c4d")
                .with_label(labels::PG_CLUSTER, "pg1")
                .with_label(labels::ROLE, labels::ROLE_REPLICA)
                .with_label(labels::DEPLOYMENT_NAME, "pg1-rpl1")
                .on_node("node-b"),
        )
        .deployment(Deployment::for_cluster(NS, "pg1", "pg1"))
        .deployment(Deployment::for_cluster(NS, "pg1", "pg1-rpl1"))
        .replication(NS, "pg1-rpl1", 5000, 4200)
        .node(Node {
            name: "node-a".to_string(),
            labels: Default::default(),
        })
        .node(Node {
            name: "node-b".to_string(),
            labels: [("failover".to_string(), "preferred".to_string())]
                .into_iter()
                .collect(),
        })
}
