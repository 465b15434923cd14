// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! pgbench runs.
//!
//! A benchmark reports its outcome whether it succeeded or not: the task
//! status says which, and the workflow completes either way.

use std::collections::BTreeMap;
use std::sync::Arc;

use opflow_core::model::{milestones, params};
use opflow_core::{
    CoreError, ExecutionUnit, LabelSelector, Task, TaskStatus, TaskType, WorkflowKind, labels,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::{require_cluster, short_suffix, submit_for_task, unit_user};
use crate::context::EngineContext;
use crate::error::{Error, Result};
use crate::events::{self, CLUSTER_TOPIC, Event, EventHeader};
use crate::inventory::Cluster;
use crate::submit::{UnitTemplate, WorkRequest};

/// Key under which a policy's SQL is stored in the workload config object.
pub const TRANSACTIONS_KEY: &str = "transactions.sql";

const PARAM_CLIENTS: &str = "clients";
const PARAM_JOBS: &str = "jobs";
const PARAM_SCALE: &str = "scale";
const PARAM_TRANSACTIONS: &str = "transactions";
const PARAM_DATABASE: &str = "database";
const PARAM_INIT_OPTS: &str = "init-opts";
const PARAM_BENCHMARK_OPTS: &str = "benchmark-opts";
const PARAM_POLICY_CONFIG: &str = "policy-config";

/// Intent to benchmark one cluster, or every cluster matching a selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkRequest {
    pub namespace: String,
    pub cluster_name: Option<String>,
    pub selector: Option<String>,
    /// Named SQL policy used as the custom transaction script.
    pub policy: Option<String>,
    pub clients: u32,
    pub jobs: u32,
    pub scale: u32,
    pub transactions: u32,
    /// Database to run against; the cluster's database when absent.
    pub database: Option<String>,
    pub init_opts: String,
    pub benchmark_opts: String,
    pub username: String,
}

impl Default for BenchmarkRequest {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            cluster_name: None,
            selector: None,
            policy: None,
            clients: 1,
            jobs: 1,
            scale: 1,
            transactions: 1,
            database: None,
            init_opts: String::new(),
            benchmark_opts: String::new(),
            username: String::new(),
        }
    }
}

/// One submitted benchmark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkSubmitted {
    pub cluster: String,
    pub task_name: String,
    pub workflow_id: String,
}

#[derive(Clone)]
pub struct BenchmarkOrchestrator {
    ctx: Arc<EngineContext>,
}

impl BenchmarkOrchestrator {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub async fn create_benchmark(
        &self,
        request: &BenchmarkRequest,
    ) -> Result<Vec<BenchmarkSubmitted>> {
        let clusters = self.resolve_clusters(request).await?;

        let workload = match request.policy.as_deref().filter(|p| !p.is_empty()) {
            Some(policy) => Some(
                self.ctx
                    .inventory
                    .policy_sql(&request.namespace, policy)
                    .await?
                    .ok_or_else(|| CoreError::not_found("policy", policy))?,
            ),
            None => None,
        };

        let mut submitted = Vec::with_capacity(clusters.len());
        for cluster in &clusters {
            submitted.push(self.submit(request, cluster, workload.as_deref()).await?);
        }
        Ok(submitted)
    }

    async fn resolve_clusters(&self, request: &BenchmarkRequest) -> Result<Vec<Cluster>> {
        let name = request.cluster_name.as_deref().filter(|n| !n.is_empty());
        let selector = request.selector.as_deref().filter(|s| !s.trim().is_empty());
        match (name, selector) {
            (Some(name), None) => Ok(vec![
                require_cluster(&self.ctx, &request.namespace, name).await?,
            ]),
            (None, Some(raw)) => {
                let selector: LabelSelector = raw
                    .parse()
                    .map_err(|e| Error::InvalidRequest(format!("invalid selector: {}", e)))?;
                Ok(self
                    .ctx
                    .inventory
                    .list_clusters(&request.namespace, &selector)
                    .await?)
            }
            (Some(_), Some(_)) => Err(Error::InvalidRequest(
                "specify either a cluster name or a selector, not both".to_string(),
            )),
            (None, None) => Err(Error::InvalidRequest(
                "a cluster name or selector is required".to_string(),
            )),
        }
    }

    async fn submit(
        &self,
        request: &BenchmarkRequest,
        cluster: &Cluster,
        workload: Option<&str>,
    ) -> Result<BenchmarkSubmitted> {
        let ns = request.namespace.as_str();
        let name = format!("benchmark-{}-{}", cluster.name, short_suffix(4));

        let mut parameters = BTreeMap::new();
        if let Some(sql) = workload {
            let config_name = format!("{}-tx", name);
            let mut data = BTreeMap::new();
            data.insert(TRANSACTIONS_KEY.to_string(), sql.to_string());
            self.ctx
                .inventory
                .create_config_object(ns, &config_name, data)
                .await?;
            parameters.insert(PARAM_POLICY_CONFIG.to_string(), config_name);
        }

        let workflow_id = self
            .ctx
            .tracker
            .create_workflow(ns, &cluster.name, WorkflowKind::Benchmark)
            .await?;

        let database = request
            .database
            .clone()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| cluster.database.clone());
        for (key, value) in [
            (params::JOB_NAME, name.clone()),
            (params::CLUSTER, cluster.name.clone()),
            (params::WORKFLOW_ID, workflow_id.clone()),
            (params::IMAGE_PREFIX, self.ctx.settings.image_prefix.clone()),
            (PARAM_CLIENTS, request.clients.to_string()),
            (PARAM_JOBS, request.jobs.to_string()),
            (PARAM_SCALE, request.scale.to_string()),
            (PARAM_TRANSACTIONS, request.transactions.to_string()),
            (PARAM_DATABASE, database),
            (PARAM_INIT_OPTS, request.init_opts.clone()),
            (PARAM_BENCHMARK_OPTS, request.benchmark_opts.clone()),
        ] {
            parameters.insert(key.to_string(), value);
        }

        let mut task = Task::new(ns, &name, TaskType::Benchmark)
            .with_label(labels::PG_CLUSTER, &cluster.name)
            .with_label(labels::BENCHMARK, labels::TRUE)
            .with_label(labels::WORKFLOW_ID, &workflow_id)
            .with_label(labels::PGOUSER, &request.username);
        task.parameters = parameters;
        self.ctx.store.create_task(&task).await?;

        let unit_request = WorkRequest::new(ns, &name, UnitTemplate::Benchmark)
            .label(labels::PG_CLUSTER, &cluster.name)
            .label(labels::BENCHMARK, labels::TRUE)
            .label(labels::WORKFLOW_ID, &workflow_id)
            .label(labels::PGOUSER, &request.username)
            .parameters(&task.parameters);
        submit_for_task(&self.ctx, &task, unit_request).await?;

        info!(
            namespace = %ns,
            cluster = %cluster.name,
            task = %name,
            workflow_id = %workflow_id,
            "Benchmark submitted"
        );
        Ok(BenchmarkSubmitted {
            cluster: cluster.name.clone(),
            task_name: name,
            workflow_id,
        })
    }

    /// Handle a benchmark unit that finished, successfully or not.
    pub async fn on_terminal(&self, unit: &ExecutionUnit) -> Result<()> {
        let succeeded = unit.is_successful();
        let status = if succeeded {
            TaskStatus::Completed
        } else {
            TaskStatus::Error
        };
        let detail = format!("[{}]", unit.name);
        self.ctx
            .store
            .set_task_status(&unit.namespace, unit.task_name(), status, Some(&detail))
            .await?;

        let workflow_id = unit.label(labels::WORKFLOW_ID);
        if let Some(id) = workflow_id
            && let Err(e) = self
                .ctx
                .tracker
                .advance_workflow(&unit.namespace, id, milestones::COMPLETED)
                .await
        {
            error!(workflow_id = %id, error = %e, "Failed to complete benchmark workflow");
        }

        let cluster = unit.cluster_name().unwrap_or_default();
        info!(
            namespace = %unit.namespace,
            cluster = %cluster,
            unit = %unit.name,
            succeeded,
            "Benchmark finished"
        );
        events::publish_or_log(
            self.ctx.publisher.as_ref(),
            Event::BenchmarkCompleted {
                header: EventHeader::new(&unit.namespace, unit_user(unit), &[CLUSTER_TOPIC]),
                cluster: cluster.to_string(),
                workflow_id: workflow_id.map(str::to_string),
                succeeded,
            },
        )
        .await;
        Ok(())
    }
}
