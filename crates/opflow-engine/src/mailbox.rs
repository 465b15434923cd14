// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Requests addressed to the cluster reconciler.
//!
//! The reconciler is never called directly. Each request is a task record
//! under a deterministic name that the reconciler watches for; posting a
//! request replaces any stale one of the same name.

use std::sync::Arc;

use opflow_core::model::params;
use opflow_core::{CoreError, Task, TaskStore, TaskType, labels};
use tracing::info;

/// State written on cluster initialization requests.
pub const STATE_INITIALIZED: &str = "initialized";

#[derive(Clone)]
pub struct ReconcilerMailbox {
    store: Arc<dyn TaskStore>,
}

impl ReconcilerMailbox {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// Ask the reconciler to mark `cluster` initialized and begin creating replicas.
    pub async fn initialize_cluster(
        &self,
        namespace: &str,
        cluster: &str,
        username: &str,
    ) -> Result<Task, CoreError> {
        let task = Task::new(
            namespace,
            initialize_task_name(cluster),
            TaskType::ClusterInitialize,
        )
        .with_label(labels::PG_CLUSTER, cluster)
        .with_label(labels::PGOUSER, username)
        .with_parameter(params::CLUSTER, cluster)
        .with_parameter(params::STATE, STATE_INITIALIZED)
        .with_parameter(params::MESSAGE, "cluster initialized, creating replicas");
        self.post(task).await
    }

    /// Ask the reconciler to drop the forced-primary tag after a failover backup.
    pub async fn remove_primary_on_role_change(
        &self,
        namespace: &str,
        cluster: &str,
        username: &str,
    ) -> Result<Task, CoreError> {
        let task = Task::new(
            namespace,
            remove_primary_task_name(cluster),
            TaskType::RemovePrimaryOnRoleChange,
        )
        .with_label(labels::PG_CLUSTER, cluster)
        .with_label(labels::PGOUSER, username)
        .with_parameter(params::CLUSTER, cluster);
        self.post(task).await
    }

    async fn post(&self, task: Task) -> Result<Task, CoreError> {
        if self.store.delete_task(&task.namespace, &task.name).await? {
            info!(task = %task.name, "Replaced stale reconciler request");
        }
        self.store.create_task(&task).await?;
        info!(
            namespace = %task.namespace,
            task = %task.name,
            task_type = %task.task_type,
            "Posted reconciler request"
        );
        Ok(task)
    }
}

pub fn initialize_task_name(cluster: &str) -> String {
    format!("{}-initialize", cluster)
}

pub fn remove_primary_task_name(cluster: &str) -> String {
    format!("{}-remove-primary-on-role-change", cluster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opflow_core::MemoryTaskStore;

    #[tokio::test]
    async fn test_initialize_request_replaces_stale_one() {
        let store = Arc::new(MemoryTaskStore::new());
        let mailbox = ReconcilerMailbox::new(store.clone());

        mailbox.initialize_cluster("ns", "pg1", "admin").await.unwrap();
        mailbox.initialize_cluster("ns", "pg1", "other").await.unwrap();

        let tasks = store.all_tasks().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "pg1-initialize");
        assert_eq!(tasks[0].task_type, TaskType::ClusterInitialize);
        assert_eq!(tasks[0].labels[labels::PGOUSER], "other");
        assert_eq!(tasks[0].parameters[params::STATE], STATE_INITIALIZED);
    }

    #[tokio::test]
    async fn test_remove_primary_request() {
        let store = Arc::new(MemoryTaskStore::new());
        let mailbox = ReconcilerMailbox::new(store.clone());

        let task = mailbox
            .remove_primary_on_role_change("ns", "pg1", "admin")
            .await
            .unwrap();
        assert_eq!(task.name, "pg1-remove-primary-on-role-change");
        assert!(store.get_task("ns", &task.name).await.unwrap().is_some());
    }
}
