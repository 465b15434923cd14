// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Read access to clusters and their placement.
//!
//! The inventory answers the questions orchestrators ask before mutating
//! anything: does the cluster exist, which pods are ready, which
//! deployments belong to it, how far behind is each replica.

use std::collections::BTreeMap;

use async_trait::async_trait;
use opflow_core::error::Result;
use opflow_core::labels::{self, Labels};
use opflow_core::LabelSelector;
use serde::{Deserialize, Serialize};

pub mod memory;

pub use memory::{InventorySnapshot, MemoryInventory};

/// A managed Postgres cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub labels: Labels,
    /// Follows a remote primary and is read-only.
    #[serde(default)]
    pub standby: bool,
    #[serde(default)]
    pub database: String,
}

impl Cluster {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            namespace: namespace.into(),
            identifier: format!("{}-id", name),
            name,
            labels: Labels::new(),
            standby: false,
            database: "postgres".to_string(),
        }
    }

    pub fn with_label(mut self, key: &str, value: impl Into<String>) -> Self {
        self.labels.insert(key.to_string(), value.into());
        self
    }

    pub fn with_standby(mut self, standby: bool) -> Self {
        self.standby = standby;
        self
    }

    /// Whether pgBackRest was provisioned for this cluster.
    pub fn backup_enabled(&self) -> bool {
        labels::is_true(&self.labels, labels::BACKREST)
    }

    /// Raw storage type setting; empty means the default (local).
    pub fn storage_setting(&self) -> &str {
        self.labels
            .get(labels::BACKREST_STORAGE_TYPE)
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// A pod of a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub node: Option<String>,
}

impl Pod {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            labels: Labels::new(),
            ready: true,
            node: None,
        }
    }

    pub fn with_label(mut self, key: &str, value: impl Into<String>) -> Self {
        self.labels.insert(key.to_string(), value.into());
        self
    }

    pub fn with_ready(mut self, ready: bool) -> Self {
        self.ready = ready;
        self
    }

    pub fn on_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn is_primary(&self) -> bool {
        self.labels.get(labels::ROLE).is_some_and(|r| r == labels::ROLE_PRIMARY)
    }
}

/// A deployment backing one instance (primary or replica) of a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub labels: Labels,
}

impl Deployment {
    /// Deployment `name` of `cluster`, labeled the way instances are.
    pub fn for_cluster(namespace: impl Into<String>, cluster: &str, name: &str) -> Self {
        let mut labels = Labels::new();
        labels.insert(labels::PG_CLUSTER.to_string(), cluster.to_string());
        labels.insert(labels::DEPLOYMENT_NAME.to_string(), name.to_string());
        Self {
            namespace: namespace.into(),
            name: name.to_string(),
            labels,
        }
    }
}

/// WAL positions reported by a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationStatus {
    pub receive_location: u64,
    pub replay_location: u64,
}

impl ReplicationStatus {
    /// Bytes received but not yet replayed.
    pub fn lag_bytes(&self) -> u64 {
        self.receive_location.saturating_sub(self.replay_location)
    }
}

/// A schedulable node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub labels: Labels,
}

/// Queries against the platform's view of clusters.
#[async_trait]
pub trait ClusterInventory: Send + Sync {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>>;

    async fn list_clusters(&self, namespace: &str, selector: &LabelSelector)
    -> Result<Vec<Cluster>>;

    /// Pods matching `selector`, each with its readiness flag.
    async fn list_pods(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Pod>>;

    async fn list_deployments(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Deployment>>;

    /// Replication positions of the instance behind `deployment`, if it reports any.
    async fn replication_status(
        &self,
        namespace: &str,
        deployment: &str,
    ) -> Result<Option<ReplicationStatus>>;

    async fn list_nodes(&self, selector: &LabelSelector) -> Result<Vec<Node>>;

    /// SQL body of a named policy.
    async fn policy_sql(&self, namespace: &str, policy: &str) -> Result<Option<String>>;

    /// Create (or replace) a config object holding `data`.
    async fn create_config_object(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Result<()>;
}
