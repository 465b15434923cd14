// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Clone orchestrator.
//!
//! Three steps share one workflow id:
//!
//! 1. sync the source cluster's backup repository into a new repository
//! 2. restore from that repository into the target cluster's volume
//! 3. record the task that has the reconciler create the target cluster
//!
//! Step N+1 is only created once step N's unit is observed to succeed.
//! Later-step failures are reported as clone-failure events and leave the
//! workflow at its last milestone; nothing is rolled back.

use std::collections::BTreeMap;
use std::sync::Arc;

use opflow_core::model::{milestones, params};
use opflow_core::{
    CoreError, ExecutionUnit, LabelSelector, Task, TaskStatus, TaskType, WorkflowKind, labels,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::{require_cluster, submit_for_task, unit_user};
use crate::context::EngineContext;
use crate::error::{Error, Result};
use crate::events::{self, CLUSTER_TOPIC, Event, EventHeader};
use crate::storage::validate_storage_request;
use crate::submit::{UnitTemplate, WorkRequest};

/// Intent to clone `source_cluster` into a new `target_cluster`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloneRequest {
    pub namespace: String,
    pub source_cluster: String,
    pub target_cluster: String,
    /// Storage type of the source repository to clone from.
    pub storage_source: String,
    pub pvc_size: String,
    pub backrest_pvc_size: String,
    pub enable_metrics: bool,
    pub username: String,
}

/// Accepted clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneSubmitted {
    pub workflow_id: String,
    pub target_cluster: String,
    pub task_name: String,
}

/// Identity of a clone in flight, recovered from a step's unit.
struct CloneRun {
    namespace: String,
    source: String,
    target: String,
    workflow_id: String,
    username: String,
}

#[derive(Clone)]
pub struct CloneOrchestrator {
    ctx: Arc<EngineContext>,
}

impl CloneOrchestrator {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Validate the request and submit step 1.
    pub async fn create_clone(&self, request: &CloneRequest) -> Result<CloneSubmitted> {
        let source = request.source_cluster.trim();
        let target = request.target_cluster.trim();
        validate_cluster_name(source)?;
        validate_cluster_name(target)?;
        if source == target {
            return Err(Error::InvalidRequest(
                "source and target cluster names must differ".to_string(),
            ));
        }

        let ns = request.namespace.as_str();
        let source_cluster = require_cluster(&self.ctx, ns, source).await?;
        if self.ctx.inventory.get_cluster(ns, target).await?.is_some() {
            return Err(CoreError::conflict(format!(
                "cluster {} already exists, cannot clone into it",
                target
            ))
            .into());
        }
        if !source_cluster.backup_enabled() {
            return Err(CoreError::precondition(format!(
                "backups are not enabled for cluster {}",
                source
            ))
            .into());
        }
        let storage_type = validate_storage_request(
            &request.storage_source,
            source_cluster.storage_setting(),
            true,
        )?;

        let prior = self.ctx.store.list_tasks(ns, &clone_selector(target)).await?;
        // errored steps are stale; re-issuing the clone replaces them
        let in_flight = prior.iter().find(|t| !t.status.is_settled());
        if let Some(active) = in_flight {
            return Err(CoreError::conflict(format!(
                "a clone into {} is already in progress (task {} is {})",
                target, active.name, active.status
            ))
            .into());
        }
        for stale in &prior {
            // a concurrent request may have claimed the name since the listing
            self.ctx.store.delete_settled_task(ns, &stale.name).await?;
        }

        let mut parameters = BTreeMap::new();
        parameters.insert(params::CLONE_SOURCE.to_string(), source.to_string());
        parameters.insert(params::CLONE_TARGET.to_string(), target.to_string());
        parameters.insert(params::STORAGE_TYPE.to_string(), storage_type);
        parameters.insert(params::PVC_SIZE.to_string(), request.pvc_size.clone());
        parameters.insert(
            params::BACKREST_PVC_SIZE.to_string(),
            request.backrest_pvc_size.clone(),
        );
        parameters.insert(
            params::ENABLE_METRICS.to_string(),
            request.enable_metrics.to_string(),
        );
        parameters.insert(
            params::IMAGE_PREFIX.to_string(),
            self.ctx.settings.image_prefix.clone(),
        );

        let mut run = CloneRun {
            namespace: ns.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            workflow_id: String::new(),
            username: request.username.clone(),
        };

        // the conditional create of step 1 claims the target; the workflow
        // and units only come after the claim succeeds
        let claim = step_task(&run, TaskType::CloneStep1, 1, &parameters);
        if let Err(e) = self.ctx.store.create_task(&claim).await {
            return Err(match e {
                CoreError::AlreadyExists { .. } => CoreError::conflict(format!(
                    "a clone into {} is already in progress",
                    target
                ))
                .into(),
                other => other.into(),
            });
        }

        let task = match self.start_run(&mut run, &mut parameters, !prior.is_empty()).await {
            Ok(task) => task,
            Err(e) => {
                if let Err(release) = self.ctx.store.delete_task(ns, &claim.name).await {
                    warn!(task = %claim.name, error = %release, "Failed to release clone claim");
                }
                return Err(e);
            }
        };
        let workflow_id = run.workflow_id.clone();

        submit_for_task(
            &self.ctx,
            &task,
            step_request(&run, 1, UnitTemplate::CloneRepoSync, &parameters),
        )
        .await?;

        info!(
            namespace = %ns,
            source = %source,
            target = %target,
            workflow_id = %workflow_id,
            "Clone step 1 submitted"
        );
        Ok(CloneSubmitted {
            workflow_id,
            target_cluster: target.to_string(),
            task_name: task.name,
        })
    }

    /// With the target claimed: clear units left by a stale run, create the
    /// workflow and record its id on the step-1 task.
    async fn start_run(
        &self,
        run: &mut CloneRun,
        parameters: &mut BTreeMap<String, String>,
        had_stale_run: bool,
    ) -> Result<Task> {
        let ns = run.namespace.as_str();
        if had_stale_run {
            self.ctx
                .replacement
                .clear_units(ns, &clone_selector(&run.target))
                .await?;
        }

        let workflow_id = self
            .ctx
            .tracker
            .create_workflow(ns, &run.target, WorkflowKind::Clone)
            .await?;
        parameters.insert(params::WORKFLOW_ID.to_string(), workflow_id.clone());
        run.workflow_id = workflow_id;

        let task = step_task(run, TaskType::CloneStep1, 1, parameters);
        self.ctx.store.update_task(&task).await?;
        Ok(task)
    }

    /// Step 1 finished: record the restore milestone and submit step 2.
    pub async fn on_step1_complete(&self, unit: &ExecutionUnit) -> Result<()> {
        let (run, step1) = self.load_run(unit).await?;
        self.ctx
            .store
            .set_task_status(
                &run.namespace,
                &step1.name,
                TaskStatus::Completed,
                Some(&unit.name),
            )
            .await?;

        if let Err(e) = self.submit_step2(&run, &step1.parameters).await {
            self.report_failure(&run, &format!("could not submit step 2: {}", e))
                .await;
            return Err(e);
        }
        Ok(())
    }

    async fn submit_step2(
        &self,
        run: &CloneRun,
        parameters: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.ctx
            .tracker
            .advance_workflow(
                &run.namespace,
                &run.workflow_id,
                milestones::CLONE_RESTORE_BACKUP,
            )
            .await?;

        let name = step_task_name(2, &run.target);
        self.ctx.store.delete_task(&run.namespace, &name).await?;
        let task = step_task(run, TaskType::CloneStep2, 2, parameters)
            .with_label(labels::BACKREST_RESTORE, labels::TRUE);
        self.ctx.store.create_task(&task).await?;

        let request = step_request(run, 2, UnitTemplate::CloneRestore, parameters)
            .label(labels::BACKREST_RESTORE, labels::TRUE)
            .label(labels::BACKREST_COMMAND, labels::COMMAND_RESTORE);
        submit_for_task(&self.ctx, &task, request).await?;

        info!(
            namespace = %run.namespace,
            target = %run.target,
            workflow_id = %run.workflow_id,
            "Clone step 2 submitted"
        );
        Ok(())
    }

    /// Step 2 finished: record the cluster-create milestone and hand off step 3.
    pub async fn on_step2_complete(&self, unit: &ExecutionUnit) -> Result<()> {
        let (run, step2) = self.load_run(unit).await?;
        self.ctx
            .store
            .set_task_status(
                &run.namespace,
                &step2.name,
                TaskStatus::Completed,
                Some(&unit.name),
            )
            .await?;

        if let Err(e) = self
            .ctx
            .tracker
            .advance_workflow(&run.namespace, &run.workflow_id, milestones::CLUSTER_CREATE)
            .await
        {
            error!(workflow_id = %run.workflow_id, error = %e, "Failed to advance clone workflow");
        }

        let name = step_task_name(3, &run.target);
        let created = async {
            self.ctx.store.delete_task(&run.namespace, &name).await?;
            let task = step_task(&run, TaskType::CloneStep3, 3, &step2.parameters);
            self.ctx.store.create_task(&task).await
        }
        .await;
        if let Err(e) = created {
            self.report_failure(&run, &format!("Could not create task for step 3: {}", e))
                .await;
            return Err(e.into());
        }

        info!(
            namespace = %run.namespace,
            target = %run.target,
            workflow_id = %run.workflow_id,
            "Clone step 3 handed off"
        );
        Ok(())
    }

    async fn load_run(&self, unit: &ExecutionUnit) -> Result<(CloneRun, Task)> {
        let task = self
            .ctx
            .store
            .get_task(&unit.namespace, unit.task_name())
            .await?
            .ok_or_else(|| CoreError::not_found("task", unit.task_name()))?;

        let lookup = |key: &str| {
            unit.annotation(key)
                .or_else(|| task.parameters.get(key).map(String::as_str))
                .unwrap_or_default()
                .to_string()
        };
        let workflow_id = unit
            .label(labels::WORKFLOW_ID)
            .or_else(|| task.workflow_id())
            .ok_or_else(|| {
                CoreError::precondition(format!("clone unit {} carries no workflow id", unit.name))
            })?
            .to_string();

        let run = CloneRun {
            namespace: unit.namespace.clone(),
            source: lookup(labels::ANNOTATION_CLONE_SOURCE),
            target: lookup(labels::ANNOTATION_CLONE_TARGET),
            workflow_id,
            username: unit_user(unit).to_string(),
        };
        Ok((run, task))
    }

    async fn report_failure(&self, run: &CloneRun, message: &str) {
        warn!(
            namespace = %run.namespace,
            source = %run.source,
            target = %run.target,
            workflow_id = %run.workflow_id,
            error = %message,
            "Clone failed"
        );
        events::publish_or_log(
            self.ctx.publisher.as_ref(),
            Event::CloneFailure {
                header: EventHeader::new(&run.namespace, &run.username, &[CLUSTER_TOPIC]),
                source_cluster: run.source.clone(),
                target_cluster: run.target.clone(),
                workflow_id: run.workflow_id.clone(),
                error_message: message.to_string(),
            },
        )
        .await;
    }
}

/// Deterministic task name of clone step `step` into `target`.
pub fn step_task_name(step: u8, target: &str) -> String {
    format!("clone-step-{}-{}", step, target)
}

fn step_task(
    run: &CloneRun,
    task_type: TaskType,
    step: u8,
    parameters: &BTreeMap<String, String>,
) -> Task {
    let mut task = Task::new(&run.namespace, step_task_name(step, &run.target), task_type)
        .with_label(labels::PG_CLUSTER, &run.target)
        .with_label(labels::CLONE, labels::TRUE)
        .with_label(labels::CLONE_STEP, step.to_string())
        .with_label(labels::WORKFLOW_ID, &run.workflow_id)
        .with_label(labels::PGOUSER, &run.username);
    task.parameters = parameters.clone();
    task
}

fn step_request(
    run: &CloneRun,
    step: u8,
    template: UnitTemplate,
    parameters: &BTreeMap<String, String>,
) -> WorkRequest {
    WorkRequest::new(&run.namespace, step_task_name(step, &run.target), template)
        .label(labels::PG_CLUSTER, &run.target)
        .label(labels::CLONE, labels::TRUE)
        .label(labels::CLONE_STEP, step.to_string())
        .label(labels::WORKFLOW_ID, &run.workflow_id)
        .label(labels::PGOUSER, &run.username)
        .annotation(labels::ANNOTATION_CLONE_SOURCE, &run.source)
        .annotation(labels::ANNOTATION_CLONE_TARGET, &run.target)
        .parameters(parameters)
}

/// Tasks and units of every clone step into `target`.
fn clone_selector(target: &str) -> LabelSelector {
    LabelSelector::everything()
        .eq(labels::CLONE, labels::TRUE)
        .eq(labels::PG_CLUSTER, target)
}

/// Cluster names must be DNS-1123 labels.
fn validate_cluster_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidRequest(format!(
            "\"{}\" is not a valid cluster name, use lowercase letters, digits and '-'",
            name
        )))
    }
}
