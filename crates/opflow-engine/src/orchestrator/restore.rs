// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Restore orchestrator.
//!
//! A restore gets a workflow before anything else so the caller can follow
//! it. The task carries the workflow id; completion advances the workflow
//! and publishes a restore-complete event.

use std::sync::Arc;

use opflow_core::model::{milestones, params};
use opflow_core::{
    CoreError, ExecutionUnit, LabelSelector, Task, TaskStatus, TaskType, WorkflowKind, labels,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::{
    parse_node_label, require_cluster, short_suffix, submit_for_task, unit_user,
    validate_backrest_options,
};
use crate::context::EngineContext;
use crate::error::{Error, Result};
use crate::events::{self, CLUSTER_TOPIC, Event, EventHeader};
use crate::storage::validate_storage_request;
use crate::submit::{UnitTemplate, WorkRequest};

/// Intent to restore a cluster in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreRequest {
    pub namespace: String,
    pub from_cluster: String,
    pub restore_options: String,
    /// Point-in-time target, required with `--type=time`.
    pub pitr_target: String,
    /// Single storage type; empty uses the cluster's first one.
    pub storage_type: String,
    /// `key=value` label of the node the restored primary should run on.
    pub node_label: String,
    /// Volume to restore into; generated when empty.
    pub to_pvc: String,
    pub username: String,
}

/// Accepted restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreSubmitted {
    pub workflow_id: String,
    pub task_name: String,
    pub unit_name: String,
}

#[derive(Clone)]
pub struct RestoreOrchestrator {
    ctx: Arc<EngineContext>,
}

impl RestoreOrchestrator {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    pub async fn create_restore(&self, request: &RestoreRequest) -> Result<RestoreSubmitted> {
        let cluster_name = request.from_cluster.trim();
        if cluster_name.is_empty() {
            return Err(Error::InvalidRequest(
                "a cluster to restore is required".to_string(),
            ));
        }

        let cluster = require_cluster(&self.ctx, &request.namespace, cluster_name).await?;
        if !cluster.backup_enabled() {
            return Err(CoreError::precondition(format!(
                "backups are not enabled for cluster {}",
                cluster_name
            ))
            .into());
        }
        if cluster.standby {
            return Err(CoreError::precondition(format!(
                "cluster {} is a standby and cannot be restored, disable standby mode first",
                cluster_name
            ))
            .into());
        }
        let storage_type =
            validate_storage_request(&request.storage_type, cluster.storage_setting(), true)?;
        let node_label = parse_node_label(&request.node_label)?;
        validate_backrest_options(&request.restore_options)?;
        if request.restore_options.contains("--type=time") && request.pitr_target.trim().is_empty()
        {
            return Err(CoreError::precondition(
                "a point-in-time target is required for --type=time restores",
            )
            .into());
        }

        let name = task_name(cluster_name);
        self.ctx
            .replacement
            .clear(&request.namespace, &name, &unit_selector(cluster_name))
            .await?;

        let workflow_id = self
            .ctx
            .tracker
            .create_workflow(&request.namespace, cluster_name, WorkflowKind::Restore)
            .await?;

        let to_pvc = if request.to_pvc.trim().is_empty() {
            format!("{}-{}", cluster_name, short_suffix(4))
        } else {
            request.to_pvc.trim().to_string()
        };

        let mut task = Task::new(&request.namespace, &name, TaskType::Restore)
            .with_label(labels::PG_CLUSTER, cluster_name)
            .with_label(labels::PG_CLUSTER_IDENTIFIER, &cluster.identifier)
            .with_label(labels::WORKFLOW_ID, &workflow_id)
            .with_label(labels::PGOUSER, &request.username)
            .with_parameter(params::JOB_NAME, &name)
            .with_parameter(params::CLUSTER, cluster_name)
            .with_parameter(params::COMMAND, labels::COMMAND_RESTORE)
            .with_parameter(params::BACKREST_OPTS, &request.restore_options)
            .with_parameter(params::PITR_TARGET, request.pitr_target.trim())
            .with_parameter(params::STORAGE_TYPE, &storage_type)
            .with_parameter(params::RESTORE_TO_PVC, &to_pvc)
            .with_parameter(params::WORKFLOW_ID, &workflow_id)
            .with_parameter(params::S3_VERIFY_TLS, self.ctx.settings.s3_verify_tls.to_string())
            .with_parameter(params::IMAGE_PREFIX, &self.ctx.settings.image_prefix);
        if let Some((key, value)) = &node_label {
            task = task
                .with_parameter(params::NODE_LABEL_KEY, key)
                .with_parameter(params::NODE_LABEL_VALUE, value);
        }
        self.ctx.store.create_task(&task).await?;

        let request_unit = WorkRequest::new(&request.namespace, &name, UnitTemplate::Restore)
            .label(labels::PG_CLUSTER, cluster_name)
            .label(labels::PG_CLUSTER_IDENTIFIER, &cluster.identifier)
            .label(labels::BACKREST_RESTORE, labels::TRUE)
            .label(labels::BACKREST_COMMAND, labels::COMMAND_RESTORE)
            .label(labels::WORKFLOW_ID, &workflow_id)
            .label(labels::PGOUSER, &request.username)
            .annotation(labels::ANNOTATION_RESTORE_TO_PVC, &to_pvc)
            .parameters(&task.parameters);
        let unit = submit_for_task(&self.ctx, &task, request_unit).await?;

        info!(
            namespace = %request.namespace,
            cluster = %cluster_name,
            workflow_id = %workflow_id,
            to_pvc = %to_pvc,
            "Restore submitted"
        );
        Ok(RestoreSubmitted {
            workflow_id,
            task_name: name,
            unit_name: unit.name,
        })
    }

    /// Handle a successful restore unit.
    pub async fn on_complete(&self, unit: &ExecutionUnit) -> Result<()> {
        let cluster = unit.cluster_name().unwrap_or_default();
        let workflow_id = unit.label(labels::WORKFLOW_ID);

        self.ctx
            .store
            .set_task_status(
                &unit.namespace,
                unit.task_name(),
                TaskStatus::Completed,
                Some(&unit.name),
            )
            .await?;

        if let Some(id) = workflow_id
            && let Err(e) = self
                .ctx
                .tracker
                .advance_workflow(&unit.namespace, id, milestones::RESTORE_PVC_CREATED)
                .await
        {
            error!(workflow_id = %id, error = %e, "Failed to advance restore workflow");
        }

        info!(
            namespace = %unit.namespace,
            cluster = %cluster,
            workflow_id = workflow_id.unwrap_or_default(),
            "Restore completed"
        );
        events::publish_or_log(
            self.ctx.publisher.as_ref(),
            Event::RestoreCompleted {
                header: EventHeader::new(&unit.namespace, unit_user(unit), &[CLUSTER_TOPIC]),
                cluster: cluster.to_string(),
                workflow_id: workflow_id.map(str::to_string),
            },
        )
        .await;
        Ok(())
    }
}

/// Deterministic restore task name for `cluster`.
pub fn task_name(cluster: &str) -> String {
    format!("backrest-restore-{}", cluster)
}

/// Restore units of `cluster`.
pub fn unit_selector(cluster: &str) -> LabelSelector {
    LabelSelector::everything()
        .eq(labels::BACKREST_RESTORE, labels::TRUE)
        .eq(labels::PG_CLUSTER, cluster)
}
