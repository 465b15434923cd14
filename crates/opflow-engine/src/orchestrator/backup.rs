// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backup orchestrator.
//!
//! `Requested -> Submitted -> Completed | Error`, one task per cluster under
//! the deterministic name `backrest-backup-<cluster>`.

use std::sync::Arc;

use opflow_core::model::params;
use opflow_core::{
    BackupType, CoreError, ExecutionUnit, LabelSelector, Task, TaskStatus, TaskType, labels,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{
    primary_selector, ready_pod, repo_selector, require_cluster, submit_for_task, unit_user,
    validate_backrest_options,
};
use crate::context::EngineContext;
use crate::error::{Error, Result};
use crate::events::{self, BACKUP_TOPIC, Event, EventHeader};
use crate::inventory::Cluster;
use crate::mailbox::ReconcilerMailbox;
use crate::storage::validate_storage_request;
use crate::submit::{SubmittedUnit, UnitTemplate, WorkRequest};

/// Options used for the first backup after stanza creation.
pub const BOOTSTRAP_BACKUP_OPTIONS: &str = "--type=full";

/// Container in the repository pod that runs pgBackRest.
const BACKREST_CONTAINER: &str = "database";

/// Intent to back up one or more clusters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupRequest {
    pub namespace: String,
    /// Clusters named explicitly. Ignored when `selector` is set.
    pub clusters: Vec<String>,
    /// Label selector over clusters.
    pub selector: Option<String>,
    pub backup_options: String,
    /// Comma-separated storage types; empty uses the cluster's setting.
    pub storage_type: String,
    pub username: String,
}

/// Everything needed to render one backup unit.
#[derive(Debug, Clone)]
pub(crate) struct BackupJob {
    pub namespace: String,
    pub cluster: String,
    pub cluster_id: String,
    pub pod_name: String,
    pub options: String,
    pub storage_type: String,
    pub backup_type: Option<BackupType>,
    pub username: String,
}

#[derive(Clone)]
pub struct BackupOrchestrator {
    ctx: Arc<EngineContext>,
    mailbox: ReconcilerMailbox,
}

impl BackupOrchestrator {
    pub fn new(ctx: Arc<EngineContext>, mailbox: ReconcilerMailbox) -> Self {
        Self { ctx, mailbox }
    }

    /// Submit a backup for every requested cluster.
    ///
    /// All clusters are validated before any prior backup is replaced.
    /// Returns one message per cluster.
    pub async fn create_backup(&self, request: &BackupRequest) -> Result<Vec<String>> {
        let clusters = self.resolve_clusters(request).await?;
        if clusters.is_empty() {
            return Ok(vec!["no clusters found with that selector".to_string()]);
        }

        let mut jobs = Vec::with_capacity(clusters.len());
        for cluster in &clusters {
            jobs.push(self.plan(request, cluster).await?);
        }

        let mut messages = Vec::with_capacity(jobs.len());
        for job in &jobs {
            self.ctx
                .replacement
                .clear(&job.namespace, &task_name(&job.cluster), &unit_selector(&job.cluster))
                .await?;
            self.submit_backup(job).await?;
            messages.push(format!("created backup task for {}", job.cluster));
        }
        Ok(messages)
    }

    async fn resolve_clusters(&self, request: &BackupRequest) -> Result<Vec<Cluster>> {
        if let Some(raw) = request.selector.as_deref().filter(|s| !s.trim().is_empty()) {
            let selector: LabelSelector = raw
                .parse()
                .map_err(|e| Error::InvalidRequest(format!("invalid selector: {}", e)))?;
            return Ok(self
                .ctx
                .inventory
                .list_clusters(&request.namespace, &selector)
                .await?);
        }

        if request.clusters.is_empty() {
            return Err(Error::InvalidRequest(
                "a cluster name or selector is required".to_string(),
            ));
        }
        let mut clusters = Vec::with_capacity(request.clusters.len());
        for name in &request.clusters {
            clusters.push(require_cluster(&self.ctx, &request.namespace, name).await?);
        }
        Ok(clusters)
    }

    async fn plan(&self, request: &BackupRequest, cluster: &Cluster) -> Result<BackupJob> {
        if !cluster.backup_enabled() {
            return Err(CoreError::precondition(format!(
                "backups are not enabled for cluster {}",
                cluster.name
            ))
            .into());
        }
        if cluster.standby {
            return Err(CoreError::precondition(format!(
                "cluster {} is a standby, backups are taken on the primary cluster",
                cluster.name
            ))
            .into());
        }
        let storage_type = validate_storage_request(
            &request.storage_type,
            cluster.storage_setting(),
            false,
        )?;
        validate_backrest_options(&request.backup_options)?;

        ready_pod(&self.ctx, &request.namespace, &primary_selector(&cluster.name), "primary")
            .await?;
        let repo = ready_pod(
            &self.ctx,
            &request.namespace,
            &repo_selector(&cluster.name),
            "backrest repository",
        )
        .await?;

        Ok(BackupJob {
            namespace: request.namespace.clone(),
            cluster: cluster.name.clone(),
            cluster_id: cluster.identifier.clone(),
            pod_name: repo.name,
            options: request.backup_options.clone(),
            storage_type,
            backup_type: None,
            username: request.username.clone(),
        })
    }

    /// Record the backup task and submit its unit. Prior state must already be cleared.
    pub(crate) async fn submit_backup(&self, job: &BackupJob) -> Result<SubmittedUnit> {
        let name = task_name(&job.cluster);
        let settings = &self.ctx.settings;

        let mut task = Task::new(&job.namespace, &name, TaskType::Backup)
            .with_label(labels::PG_CLUSTER, &job.cluster)
            .with_label(labels::PG_CLUSTER_IDENTIFIER, &job.cluster_id)
            .with_label(labels::PGOUSER, &job.username)
            .with_parameter(params::JOB_NAME, &name)
            .with_parameter(params::CLUSTER, &job.cluster)
            .with_parameter(params::POD_NAME, &job.pod_name)
            .with_parameter(params::CONTAINER_NAME, BACKREST_CONTAINER)
            .with_parameter(params::COMMAND, labels::COMMAND_BACKUP)
            .with_parameter(params::BACKREST_OPTS, &job.options)
            .with_parameter(params::STORAGE_TYPE, &job.storage_type)
            .with_parameter(params::S3_VERIFY_TLS, settings.s3_verify_tls.to_string())
            .with_parameter(params::IMAGE_PREFIX, &settings.image_prefix);
        if let Some(backup_type) = job.backup_type {
            task = task.with_label(labels::BACKUP_TYPE, backup_type.as_str());
        }
        self.ctx.store.create_task(&task).await?;

        let mut request = WorkRequest::new(&job.namespace, &name, UnitTemplate::Backup)
            .label(labels::PG_CLUSTER, &job.cluster)
            .label(labels::PG_CLUSTER_IDENTIFIER, &job.cluster_id)
            .label(labels::BACKREST, labels::TRUE)
            .label(labels::BACKREST_COMMAND, labels::COMMAND_BACKUP)
            .label(labels::PGOUSER, &job.username)
            .annotation(labels::ANNOTATION_POD_NAME, &job.pod_name)
            .parameters(&task.parameters);
        if let Some(backup_type) = job.backup_type {
            request = request.label(labels::BACKUP_TYPE, backup_type.as_str());
        }

        let unit = submit_for_task(&self.ctx, &task, request).await?;
        info!(
            namespace = %job.namespace,
            cluster = %job.cluster,
            unit = %unit.name,
            backup_type = job.backup_type.map(|t| t.as_str()).unwrap_or("manual"),
            "Backup submitted"
        );
        Ok(unit)
    }

    /// Handle a successful backup unit.
    pub async fn on_complete(
        &self,
        unit: &ExecutionUnit,
        backup_type: Option<BackupType>,
    ) -> Result<()> {
        let cluster = unit.cluster_name().ok_or_else(|| {
            CoreError::precondition(format!("unit {} has no cluster label", unit.name))
        })?;
        let username = unit_user(unit);

        if let Err(e) = self
            .ctx
            .store
            .set_task_status(
                &unit.namespace,
                unit.task_name(),
                TaskStatus::Completed,
                Some(&unit.name),
            )
            .await
        {
            // the backup itself finished; downstream triggers still run
            warn!(unit = %unit.name, task = unit.task_name(), error = %e, "Failed to record backup completion");
        }
        info!(namespace = %unit.namespace, cluster = %cluster, unit = %unit.name, "Backup completed");

        events::publish_or_log(
            self.ctx.publisher.as_ref(),
            Event::BackupCompleted {
                header: EventHeader::new(&unit.namespace, username, &[BACKUP_TOPIC]),
                cluster: cluster.to_string(),
                backup_type: backup_type.map(|t| t.as_str()).unwrap_or("manual").to_string(),
                unit: unit.name.clone(),
            },
        )
        .await;

        match backup_type {
            Some(BackupType::Bootstrap) => {
                self.mailbox
                    .initialize_cluster(&unit.namespace, cluster, username)
                    .await?;
            }
            Some(BackupType::Failover) => {
                self.mailbox
                    .remove_primary_on_role_change(&unit.namespace, cluster, username)
                    .await?;
            }
            None => {}
        }
        Ok(())
    }
}

/// Deterministic backup task name for `cluster`.
pub fn task_name(cluster: &str) -> String {
    format!("backrest-backup-{}", cluster)
}

/// Units belonging to backups of `cluster`.
pub fn unit_selector(cluster: &str) -> LabelSelector {
    LabelSelector::everything()
        .eq(labels::BACKREST_COMMAND, labels::COMMAND_BACKUP)
        .eq(labels::PG_CLUSTER, cluster)
        .eq(labels::BACKREST, labels::TRUE)
}
