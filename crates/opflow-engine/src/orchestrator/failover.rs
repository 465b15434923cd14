// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Failover requests and target queries.
//!
//! Promotion itself is carried out by the high-availability layer, which
//! watches for failover tasks. This orchestrator only validates the
//! request and records the task.

use std::collections::HashSet;
use std::sync::Arc;

use opflow_core::model::params;
use opflow_core::{CoreError, LabelSelector, Task, TaskType, labels};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::require_cluster;
use crate::context::EngineContext;
use crate::error::Result;

/// Intent to fail a cluster over, optionally to a named replica.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverRequest {
    pub namespace: String,
    pub cluster: String,
    /// Replica deployment to promote; the HA layer picks one when absent.
    pub target: Option<String>,
    pub username: String,
}

/// A replica that could be promoted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverTarget {
    pub name: String,
    /// Bytes received but not yet replayed, if the replica reports positions.
    pub replication_lag: Option<u64>,
    pub node: Option<String>,
    pub ready: bool,
    /// Whether the replica runs on a node matching the preferred-node selector.
    pub is_preferred: bool,
}

#[derive(Clone)]
pub struct FailoverOrchestrator {
    ctx: Arc<EngineContext>,
}

impl FailoverOrchestrator {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Validate the target and record the failover task. Returns the task.
    pub async fn create_failover(&self, request: &FailoverRequest) -> Result<Task> {
        let ns = request.namespace.as_str();
        let cluster = request.cluster.as_str();
        require_cluster(&self.ctx, ns, cluster).await?;

        let target = request
            .target
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        if let Some(target) = target {
            self.validate_target(ns, cluster, target).await?;
        }

        let name = task_name(cluster);
        if self.ctx.store.delete_task(ns, &name).await? {
            info!(namespace = %ns, task = %name, "Removed stale failover task");
        }

        let mut task = Task::new(ns, &name, TaskType::Failover)
            .with_label(labels::PG_CLUSTER, cluster)
            .with_label(labels::PGOUSER, &request.username)
            .with_parameter(params::CLUSTER, cluster);
        if let Some(target) = target {
            task = task
                .with_label(labels::FAILOVER_TARGET, target)
                .with_parameter(params::FAILOVER_TARGET, target);
        }
        self.ctx.store.create_task(&task).await?;

        info!(
            namespace = %ns,
            cluster = %cluster,
            target = target.unwrap_or("<auto>"),
            "Failover requested"
        );
        Ok(task)
    }

    async fn validate_target(&self, ns: &str, cluster: &str, target: &str) -> Result<()> {
        let selector = LabelSelector::everything()
            .eq(labels::PG_CLUSTER, cluster)
            .eq(labels::DEPLOYMENT_NAME, target);
        let deployments = self.ctx.inventory.list_deployments(ns, &selector).await?;
        match deployments.len() {
            0 => return Err(CoreError::not_found("replica deployment", target).into()),
            1 => {}
            n => {
                return Err(CoreError::conflict(format!(
                    "{} deployments match target {}, expected one",
                    n, target
                ))
                .into());
            }
        }

        let primaries = self
            .ctx
            .inventory
            .list_pods(ns, &selector.eq(labels::ROLE, labels::ROLE_PRIMARY))
            .await?;
        if !primaries.is_empty() {
            return Err(CoreError::precondition(format!(
                "{} is the current primary and cannot be a failover target",
                target
            ))
            .into());
        }
        Ok(())
    }

    /// Replicas of `cluster` with their lag and placement. Read only.
    pub async fn query_failover_targets(
        &self,
        namespace: &str,
        cluster: &str,
    ) -> Result<Vec<FailoverTarget>> {
        require_cluster(&self.ctx, namespace, cluster).await?;

        let cluster_selector = LabelSelector::everything().eq(labels::PG_CLUSTER, cluster);
        let deployments = self
            .ctx
            .inventory
            .list_deployments(namespace, &cluster_selector)
            .await?;
        let pods = self
            .ctx
            .inventory
            .list_pods(namespace, &cluster_selector)
            .await?;

        let preferred: HashSet<String> = match &self.ctx.settings.preferred_failover_nodes {
            Some(selector) => self
                .ctx
                .inventory
                .list_nodes(selector)
                .await?
                .into_iter()
                .map(|n| n.name)
                .collect(),
            None => HashSet::new(),
        };

        let mut targets = Vec::new();
        for deployment in deployments {
            let pod = pods
                .iter()
                .find(|p| p.labels.get(labels::DEPLOYMENT_NAME) == Some(&deployment.name));
            if pod.is_some_and(|p| p.is_primary()) {
                continue;
            }
            let replication_lag = self
                .ctx
                .inventory
                .replication_status(namespace, &deployment.name)
                .await?
                .map(|s| s.lag_bytes());
            let node = pod.and_then(|p| p.node.clone());
            targets.push(FailoverTarget {
                is_preferred: node.as_ref().is_some_and(|n| preferred.contains(n)),
                name: deployment.name,
                replication_lag,
                node,
                ready: pod.is_some_and(|p| p.ready),
            });
        }
        Ok(targets)
    }
}

/// Deterministic failover task name for `cluster`.
pub fn task_name(cluster: &str) -> String {
    format!("{}-failover", cluster)
}
