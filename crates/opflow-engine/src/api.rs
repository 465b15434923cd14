// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Operations exposed to the HTTP/CLI layer.
//!
//! Every create operation answers with an [`OperationResponse`]: failures
//! become `status: Error` with the message in `results` and the error
//! category attached, never a dropped request.

use std::sync::Arc;

use opflow_core::{ErrorCategory, WorkflowStatus};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::context::EngineContext;
use crate::error::{Error, Result};
use crate::orchestrator::{
    BackupRequest, BenchmarkRequest, CloneRequest, FailoverRequest, FailoverTarget,
    Orchestrators, RestoreRequest,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    Ok,
    Error,
}

/// Response to a create operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResponse {
    pub status: StatusCode,
    /// Human-readable messages, one per affected cluster or the error.
    pub results: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_cluster: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
}

impl OperationResponse {
    pub fn ok(results: Vec<String>) -> Self {
        Self {
            status: StatusCode::Ok,
            results,
            workflow_id: None,
            target_cluster: None,
            error_category: None,
        }
    }

    pub fn from_error(err: &Error) -> Self {
        Self {
            status: StatusCode::Error,
            results: vec![err.to_string()],
            workflow_id: None,
            target_cluster: None,
            error_category: Some(err.category()),
        }
    }

    fn with_workflow(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::Ok
    }
}

/// Entry point for callers outside the engine.
#[derive(Clone)]
pub struct EngineApi {
    ctx: Arc<EngineContext>,
    orchestrators: Orchestrators,
}

impl EngineApi {
    pub fn new(ctx: Arc<EngineContext>, orchestrators: Orchestrators) -> Self {
        Self { ctx, orchestrators }
    }

    pub async fn create_backup(&self, request: &BackupRequest) -> OperationResponse {
        respond(
            "backup",
            self.orchestrators.backup.create_backup(request).await,
            OperationResponse::ok,
        )
    }

    pub async fn create_restore(&self, request: &RestoreRequest) -> OperationResponse {
        respond(
            "restore",
            self.orchestrators.restore.create_restore(request).await,
            |r| {
                OperationResponse::ok(vec![format!(
                    "restore submitted for {} as {}",
                    request.from_cluster, r.unit_name
                )])
                .with_workflow(r.workflow_id)
            },
        )
    }

    pub async fn create_clone(&self, request: &CloneRequest) -> OperationResponse {
        respond(
            "clone",
            self.orchestrators.clone.create_clone(request).await,
            |r| {
                let mut response = OperationResponse::ok(vec![format!(
                    "clone of {} to {} submitted",
                    request.source_cluster, r.target_cluster
                )])
                .with_workflow(r.workflow_id);
                response.target_cluster = Some(r.target_cluster);
                response
            },
        )
    }

    pub async fn create_failover(&self, request: &FailoverRequest) -> OperationResponse {
        respond(
            "failover",
            self.orchestrators.failover.create_failover(request).await,
            |task| {
                OperationResponse::ok(vec![format!(
                    "created failover task {} for {}",
                    task.name, request.cluster
                )])
            },
        )
    }

    pub async fn create_benchmark(&self, request: &BenchmarkRequest) -> OperationResponse {
        respond(
            "benchmark",
            self.orchestrators.benchmark.create_benchmark(request).await,
            |submitted| {
                // a single-cluster run reports its workflow directly
                let workflow_id = match submitted.as_slice() {
                    [only] => Some(only.workflow_id.clone()),
                    _ => None,
                };
                let mut response = OperationResponse::ok(
                    submitted
                        .into_iter()
                        .map(|s| {
                            format!(
                                "created benchmark {} for {} (workflow {})",
                                s.task_name, s.cluster, s.workflow_id
                            )
                        })
                        .collect(),
                );
                response.workflow_id = workflow_id;
                response
            },
        )
    }

    /// Submit a stanza-create unit for a freshly provisioned cluster.
    pub async fn create_stanza(
        &self,
        namespace: &str,
        cluster: &str,
        username: &str,
    ) -> OperationResponse {
        respond(
            "stanza",
            self.orchestrators
                .stanza
                .create_stanza(namespace, cluster, username)
                .await,
            |unit| OperationResponse::ok(vec![format!("submitted {}", unit.name)]),
        )
    }

    pub async fn show_workflow(&self, namespace: &str, workflow_id: &str) -> Result<WorkflowStatus> {
        Ok(self.ctx.tracker.read_workflow(namespace, workflow_id).await?)
    }

    pub async fn query_failover_targets(
        &self,
        namespace: &str,
        cluster: &str,
    ) -> Result<Vec<FailoverTarget>> {
        self.orchestrators
            .failover
            .query_failover_targets(namespace, cluster)
            .await
    }
}

fn respond<T>(
    operation: &str,
    outcome: Result<T>,
    on_ok: impl FnOnce(T) -> OperationResponse,
) -> OperationResponse {
    match outcome {
        Ok(value) => {
            info!(operation, "Request accepted");
            on_ok(value)
        }
        Err(e) => {
            warn!(operation, category = %e.category(), error = %e, "Request rejected");
            OperationResponse::from_error(&e)
        }
    }
}
