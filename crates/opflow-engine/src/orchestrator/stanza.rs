// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stanza creation and the bootstrap backup that follows it.

use std::sync::Arc;

use opflow_core::model::params;
use opflow_core::{BackupType, ExecutionUnit, LabelSelector, Task, TaskStatus, TaskType, labels};
use tracing::info;

use super::backup::{self, BOOTSTRAP_BACKUP_OPTIONS, BackupJob, BackupOrchestrator};
use super::{ready_pod, repo_selector, require_cluster, submit_for_task, unit_user};
use crate::context::EngineContext;
use crate::error::Result;
use crate::mailbox::ReconcilerMailbox;
use crate::storage::validate_storage_request;
use crate::submit::{SubmittedUnit, UnitTemplate, WorkRequest};

#[derive(Clone)]
pub struct StanzaOrchestrator {
    ctx: Arc<EngineContext>,
    backup: BackupOrchestrator,
    mailbox: ReconcilerMailbox,
}

impl StanzaOrchestrator {
    pub fn new(
        ctx: Arc<EngineContext>,
        backup: BackupOrchestrator,
        mailbox: ReconcilerMailbox,
    ) -> Self {
        Self {
            ctx,
            backup,
            mailbox,
        }
    }

    /// Submit a stanza-create unit against the cluster's repository pod.
    pub async fn create_stanza(
        &self,
        namespace: &str,
        cluster_name: &str,
        username: &str,
    ) -> Result<SubmittedUnit> {
        let cluster = require_cluster(&self.ctx, namespace, cluster_name).await?;
        let repo = ready_pod(
            &self.ctx,
            namespace,
            &repo_selector(cluster_name),
            "backrest repository",
        )
        .await?;

        let name = task_name(cluster_name);
        self.ctx
            .replacement
            .clear(namespace, &name, &unit_selector(cluster_name))
            .await?;

        let task = Task::new(namespace, &name, TaskType::StanzaCreate)
            .with_label(labels::PG_CLUSTER, cluster_name)
            .with_label(labels::PG_CLUSTER_IDENTIFIER, &cluster.identifier)
            .with_label(labels::PGOUSER, username)
            .with_parameter(params::JOB_NAME, &name)
            .with_parameter(params::CLUSTER, cluster_name)
            .with_parameter(params::POD_NAME, &repo.name)
            .with_parameter(params::COMMAND, labels::COMMAND_STANZA_CREATE)
            .with_parameter(params::STORAGE_TYPE, cluster.storage_setting())
            .with_parameter(params::IMAGE_PREFIX, &self.ctx.settings.image_prefix);
        self.ctx.store.create_task(&task).await?;

        let request = WorkRequest::new(namespace, &name, UnitTemplate::StanzaCreate)
            .label(labels::PG_CLUSTER, cluster_name)
            .label(labels::PG_CLUSTER_IDENTIFIER, &cluster.identifier)
            .label(labels::BACKREST, labels::TRUE)
            .label(labels::BACKREST_COMMAND, labels::COMMAND_STANZA_CREATE)
            .label(labels::PGOUSER, username)
            .annotation(labels::ANNOTATION_POD_NAME, &repo.name)
            .parameters(&task.parameters);
        submit_for_task(&self.ctx, &task, request).await
    }

    /// Handle a successful stanza-create unit.
    ///
    /// Standby clusters are marked initialized right away. Every other
    /// cluster gets a full bootstrap backup, whose completion marks it
    /// initialized.
    pub async fn on_complete(&self, unit: &ExecutionUnit) -> Result<()> {
        let namespace = unit.namespace.as_str();
        let cluster_name = unit.cluster_name().unwrap_or_default();
        let username = unit_user(unit);

        self.ctx
            .store
            .set_task_status(
                namespace,
                unit.task_name(),
                TaskStatus::Completed,
                Some(&unit.name),
            )
            .await?;

        let cluster = require_cluster(&self.ctx, namespace, cluster_name).await?;
        if cluster.standby {
            info!(
                namespace = %namespace,
                cluster = %cluster_name,
                "Stanza created on standby, skipping bootstrap backup"
            );
            self.mailbox
                .initialize_cluster(namespace, cluster_name, username)
                .await?;
            return Ok(());
        }

        let pod_name = match unit.annotation(labels::ANNOTATION_POD_NAME) {
            Some(pod) => pod.to_string(),
            None => {
                ready_pod(
                    &self.ctx,
                    namespace,
                    &repo_selector(cluster_name),
                    "backrest repository",
                )
                .await?
                .name
            }
        };

        self.ctx
            .replacement
            .clear(
                namespace,
                &backup::task_name(cluster_name),
                &backup::unit_selector(cluster_name),
            )
            .await?;

        let job = BackupJob {
            namespace: namespace.to_string(),
            cluster: cluster_name.to_string(),
            cluster_id: cluster.identifier.clone(),
            pod_name,
            options: BOOTSTRAP_BACKUP_OPTIONS.to_string(),
            storage_type: validate_storage_request("", cluster.storage_setting(), false)?,
            backup_type: Some(BackupType::Bootstrap),
            username: username.to_string(),
        };
        self.backup.submit_backup(&job).await?;
        Ok(())
    }
}

/// Deterministic stanza task name for `cluster`.
pub fn task_name(cluster: &str) -> String {
    format!("{}-stanza-create", cluster)
}

fn unit_selector(cluster: &str) -> LabelSelector {
    LabelSelector::everything()
        .eq(labels::BACKREST_COMMAND, labels::COMMAND_STANZA_CREATE)
        .eq(labels::PG_CLUSTER, cluster)
}
