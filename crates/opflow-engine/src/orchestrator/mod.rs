// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Operation orchestrators.
//!
//! Each orchestrator accepts an intent, checks every precondition before
//! touching the store, records a task, and submits its execution unit.
//! Completion handlers are invoked by the dispatcher once the unit's
//! outcome is observed; multi-step operations submit their next step from
//! there.

use std::sync::Arc;

use opflow_core::{CoreError, ExecutionUnit, LabelSelector, Task, TaskStatus, labels};
use tracing::{info, warn};

use crate::context::EngineContext;
use crate::inventory::{Cluster, Pod};
use crate::mailbox::ReconcilerMailbox;
use crate::submit::{SubmittedUnit, WorkRequest};

pub mod backup;
pub mod benchmark;
pub mod cleanup;
pub mod clone;
pub mod failover;
pub mod restore;
pub mod stanza;

pub use backup::{BackupOrchestrator, BackupRequest};
pub use benchmark::{BenchmarkOrchestrator, BenchmarkRequest};
pub use cleanup::CleanupOrchestrator;
pub use clone::{CloneOrchestrator, CloneRequest};
pub use failover::{FailoverOrchestrator, FailoverRequest, FailoverTarget};
pub use restore::{RestoreOrchestrator, RestoreRequest};
pub use stanza::StanzaOrchestrator;

/// pgBackRest options the engine sets itself.
const RESTRICTED_BACKREST_OPTIONS: &[&str] = &[
    "--stanza",
    "--pg1-path",
    "--pg1-host",
    "--repo1-path",
    "--repo1-type",
    "--repo1-host",
];

/// Every orchestrator, sharing one context.
#[derive(Clone)]
pub struct Orchestrators {
    pub backup: BackupOrchestrator,
    pub restore: RestoreOrchestrator,
    pub clone: CloneOrchestrator,
    pub stanza: StanzaOrchestrator,
    pub failover: FailoverOrchestrator,
    pub benchmark: BenchmarkOrchestrator,
    pub cleanup: CleanupOrchestrator,
}

impl Orchestrators {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        let mailbox = ReconcilerMailbox::new(ctx.store.clone());
        let backup = BackupOrchestrator::new(ctx.clone(), mailbox.clone());
        Self {
            stanza: StanzaOrchestrator::new(ctx.clone(), backup.clone(), mailbox),
            restore: RestoreOrchestrator::new(ctx.clone()),
            clone: CloneOrchestrator::new(ctx.clone()),
            failover: FailoverOrchestrator::new(ctx.clone()),
            benchmark: BenchmarkOrchestrator::new(ctx.clone()),
            cleanup: CleanupOrchestrator::new(ctx),
            backup,
        }
    }
}

/// Look up a cluster, failing with `NotFound` if it is absent.
pub(crate) async fn require_cluster(
    ctx: &EngineContext,
    namespace: &str,
    name: &str,
) -> Result<Cluster, CoreError> {
    ctx.inventory
        .get_cluster(namespace, name)
        .await?
        .ok_or_else(|| CoreError::not_found("cluster", name))
}

/// The single ready pod matching `selector`.
pub(crate) async fn ready_pod(
    ctx: &EngineContext,
    namespace: &str,
    selector: &LabelSelector,
    role: &str,
) -> Result<Pod, CoreError> {
    let mut ready: Vec<Pod> = ctx
        .inventory
        .list_pods(namespace, selector)
        .await?
        .into_iter()
        .filter(|p| p.ready)
        .collect();

    match ready.len() {
        1 => Ok(ready.remove(0)),
        0 => Err(CoreError::precondition(format!(
            "no ready {} pod found for selector {}",
            role, selector
        ))),
        n => Err(CoreError::precondition(format!(
            "{} ready {} pods match selector {}, expected one",
            n, role, selector
        ))),
    }
}

pub(crate) fn primary_selector(cluster: &str) -> LabelSelector {
    LabelSelector::everything()
        .eq(labels::PG_CLUSTER, cluster)
        .eq(labels::ROLE, labels::ROLE_PRIMARY)
}

pub(crate) fn repo_selector(cluster: &str) -> LabelSelector {
    LabelSelector::everything()
        .eq(labels::PG_CLUSTER, cluster)
        .eq(labels::BACKREST_REPO, labels::TRUE)
}

/// Reject pgBackRest options that would override engine-managed settings.
pub(crate) fn validate_backrest_options(options: &str) -> Result<(), CoreError> {
    for word in options.split_whitespace() {
        let flag = word.split('=').next().unwrap_or(word);
        if RESTRICTED_BACKREST_OPTIONS.contains(&flag) {
            return Err(CoreError::precondition(format!(
                "cannot set {} in backrest options, it is managed by the operator",
                flag
            )));
        }
    }
    Ok(())
}

/// Split a `key=value` node label.
pub(crate) fn parse_node_label(raw: &str) -> Result<Option<(String, String)>, CoreError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() && !value.trim().is_empty() => {
            Ok(Some((key.trim().to_string(), value.trim().to_string())))
        }
        _ => Err(CoreError::precondition(format!(
            "node label \"{}\" must be of the form key=value",
            raw
        ))),
    }
}

/// Submit the unit for `task` and record the outcome on the task.
pub(crate) async fn submit_for_task(
    ctx: &EngineContext,
    task: &Task,
    request: WorkRequest,
) -> crate::error::Result<SubmittedUnit> {
    match ctx.submitter.submit(&request).await {
        Ok(unit) => {
            ctx.store
                .set_task_status(
                    &task.namespace,
                    &task.name,
                    TaskStatus::Submitted,
                    Some(&unit.name),
                )
                .await?;
            info!(
                namespace = %task.namespace,
                task = %task.name,
                unit = %unit.name,
                submitter = ctx.submitter.submitter_type(),
                "Task submitted"
            );
            Ok(unit)
        }
        Err(e) => {
            let detail = e.to_string();
            if let Err(store_err) = ctx
                .store
                .set_task_status(&task.namespace, &task.name, TaskStatus::Error, Some(&detail))
                .await
            {
                warn!(task = %task.name, error = %store_err, "Failed to record submission error");
            }
            Err(e.into())
        }
    }
}

/// User recorded on a unit, empty if none.
pub(crate) fn unit_user(unit: &ExecutionUnit) -> &str {
    unit.label(labels::PGOUSER).unwrap_or_default()
}

/// Short random suffix for generated names.
pub(crate) fn short_suffix(len: usize) -> String {
    uuid::Uuid::new_v4().simple().to_string()[..len].to_string()
}
