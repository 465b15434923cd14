// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory inventory, optionally seeded from a JSON snapshot.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use opflow_core::error::{CoreError, Result};
use opflow_core::LabelSelector;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{ClusterInventory, Cluster, Deployment, Node, Pod, ReplicationStatus};

/// Replication positions for one deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationEntry {
    pub namespace: String,
    pub deployment: String,
    #[serde(flatten)]
    pub status: ReplicationStatus,
}

/// A named SQL policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub namespace: String,
    pub name: String,
    pub sql: String,
}

/// A stored config object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigObject {
    pub namespace: String,
    pub name: String,
    pub data: BTreeMap<String, String>,
}

/// Everything the in-memory inventory knows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventorySnapshot {
    pub clusters: Vec<Cluster>,
    pub pods: Vec<Pod>,
    pub deployments: Vec<Deployment>,
    pub replication: Vec<ReplicationEntry>,
    pub nodes: Vec<Node>,
    pub policies: Vec<Policy>,
    pub config_objects: Vec<ConfigObject>,
}

impl InventorySnapshot {
    pub fn cluster(mut self, cluster: Cluster) -> Self {
        self.clusters.push(cluster);
        self
    }

    pub fn pod(mut self, pod: Pod) -> Self {
        self.pods.push(pod);
        self
    }

    pub fn deployment(mut self, deployment: Deployment) -> Self {
        self.deployments.push(deployment);
        self
    }

    pub fn replication(
        mut self,
        namespace: &str,
        deployment: &str,
        receive_location: u64,
        replay_location: u64,
    ) -> Self {
        self.replication.push(ReplicationEntry {
            namespace: namespace.to_string(),
            deployment: deployment.to_string(),
            status: ReplicationStatus {
                receive_location,
                replay_location,
            },
        });
        self
    }

    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn policy(mut self, namespace: &str, name: &str, sql: &str) -> Self {
        self.policies.push(Policy {
            namespace: namespace.to_string(),
            name: name.to_string(),
            sql: sql.to_string(),
        });
        self
    }
}

/// Inventory held in process memory.
#[derive(Default)]
pub struct MemoryInventory {
    state: RwLock<InventorySnapshot>,
}

impl From<InventorySnapshot> for MemoryInventory {
    fn from(snapshot: InventorySnapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
        }
    }
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON snapshot from `path`.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            CoreError::store(
                "load_inventory",
                format!("Failed to read {:?}: {}", path, e),
            )
        })?;
        let snapshot: InventorySnapshot = serde_json::from_str(&raw)?;
        Ok(snapshot.into())
    }

    /// Insert or replace a cluster.
    pub async fn upsert_cluster(&self, cluster: Cluster) {
        let mut state = self.state.write().await;
        state
            .clusters
            .retain(|c| !(c.namespace == cluster.namespace && c.name == cluster.name));
        state.clusters.push(cluster);
    }

    /// Remove a cluster record.
    pub async fn remove_cluster(&self, namespace: &str, name: &str) {
        self.state
            .write()
            .await
            .clusters
            .retain(|c| !(c.namespace == namespace && c.name == name));
    }

    /// Stored config objects.
    pub async fn config_objects(&self) -> Vec<ConfigObject> {
        self.state.read().await.config_objects.clone()
    }
}

#[async_trait]
impl ClusterInventory for MemoryInventory {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>> {
        Ok(self
            .state
            .read()
            .await
            .clusters
            .iter()
            .find(|c| c.namespace == namespace && c.name == name)
            .cloned())
    }

    async fn list_clusters(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Cluster>> {
        Ok(self
            .state
            .read()
            .await
            .clusters
            .iter()
            .filter(|c| c.namespace == namespace && selector.matches(&c.labels))
            .cloned()
            .collect())
    }

    async fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Pod>> {
        Ok(self
            .state
            .read()
            .await
            .pods
            .iter()
            .filter(|p| p.namespace == namespace && selector.matches(&p.labels))
            .cloned()
            .collect())
    }

    async fn list_deployments(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Deployment>> {
        Ok(self
            .state
            .read()
            .await
            .deployments
            .iter()
            .filter(|d| d.namespace == namespace && selector.matches(&d.labels))
            .cloned()
            .collect())
    }

    async fn replication_status(
        &self,
        namespace: &str,
        deployment: &str,
    ) -> Result<Option<ReplicationStatus>> {
        Ok(self
            .state
            .read()
            .await
            .replication
            .iter()
            .find(|r| r.namespace == namespace && r.deployment == deployment)
            .map(|r| r.status))
    }

    async fn list_nodes(&self, selector: &LabelSelector) -> Result<Vec<Node>> {
        Ok(self
            .state
            .read()
            .await
            .nodes
            .iter()
            .filter(|n| selector.matches(&n.labels))
            .cloned()
            .collect())
    }

    async fn policy_sql(&self, namespace: &str, policy: &str) -> Result<Option<String>> {
        Ok(self
            .state
            .read()
            .await
            .policies
            .iter()
            .find(|p| p.namespace == namespace && p.name == policy)
            .map(|p| p.sql.clone()))
    }

    async fn create_config_object(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .config_objects
            .retain(|o| !(o.namespace == namespace && o.name == name));
        state.config_objects.push(ConfigObject {
            namespace: namespace.to_string(),
            name: name.to_string(),
            data,
        });
        Ok(())
    }
}
