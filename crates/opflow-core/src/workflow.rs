// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow ledger.
//!
//! A workflow is a task record of type [`TaskType::Workflow`] that collects
//! named, timestamped milestones for one multi-step operation. It is always
//! addressed through the `workflowid` label, never by record name.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::labels;
use crate::model::{Milestone, Task, TaskStatus, TaskType, milestones, params};
use crate::selector::LabelSelector;
use crate::store::TaskStore;

/// Operation a workflow correlates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowKind {
    Restore,
    Clone,
    Benchmark,
}

impl WorkflowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Restore => "restore",
            Self::Clone => "clone",
            Self::Benchmark => "benchmark",
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What `read_workflow` reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub workflow_id: String,
    pub cluster_name: String,
    pub milestones: Vec<Milestone>,
}

/// Creates, advances and reads workflow records.
#[derive(Clone)]
pub struct WorkflowTracker {
    store: Arc<dyn TaskStore>,
}

impl WorkflowTracker {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// Create a workflow for `cluster` with a single `submitted` milestone.
    pub async fn create_workflow(
        &self,
        namespace: &str,
        cluster: &str,
        kind: WorkflowKind,
    ) -> Result<String> {
        let workflow_id = Uuid::new_v4().to_string();
        let short_id = &workflow_id[..8];
        let name = format!("{}-{}-{}", cluster, kind, short_id);

        let mut task = Task::new(namespace, name.clone(), TaskType::Workflow)
            .with_label(labels::PG_CLUSTER, cluster)
            .with_label(labels::WORKFLOW_ID, workflow_id.as_str())
            .with_parameter(params::CLUSTER, cluster)
            .with_parameter(params::WORKFLOW_ID, workflow_id.as_str());
        task.status = TaskStatus::Submitted;
        task.milestones.push(Milestone {
            name: milestones::SUBMITTED.to_string(),
            at: Utc::now(),
        });

        self.store.create_task(&task).await?;

        info!(
            namespace = %namespace,
            cluster = %cluster,
            workflow_id = %workflow_id,
            kind = %kind,
            "Workflow created"
        );
        Ok(workflow_id)
    }

    /// Append `milestone` to the workflow ledger.
    ///
    /// A milestone that is already present keeps its original timestamp
    /// and position.
    pub async fn advance_workflow(
        &self,
        namespace: &str,
        workflow_id: &str,
        milestone: &str,
    ) -> Result<()> {
        let mut task = self.find(namespace, workflow_id).await?;

        if task.has_milestone(milestone) {
            debug!(
                workflow_id = %workflow_id,
                milestone = %milestone,
                "Milestone already recorded"
            );
            return Ok(());
        }

        task.milestones.push(Milestone {
            name: milestone.to_string(),
            at: Utc::now(),
        });
        if milestone == milestones::COMPLETED {
            task.status = TaskStatus::Completed;
        }
        self.store.update_task(&task).await?;

        info!(
            namespace = %namespace,
            workflow_id = %workflow_id,
            milestone = %milestone,
            "Workflow advanced"
        );
        Ok(())
    }

    pub async fn read_workflow(&self, namespace: &str, workflow_id: &str) -> Result<WorkflowStatus> {
        let task = self.find(namespace, workflow_id).await?;
        Ok(WorkflowStatus {
            workflow_id: workflow_id.to_string(),
            cluster_name: task.cluster_name().unwrap_or_default().to_string(),
            milestones: task.milestones,
        })
    }

    async fn find(&self, namespace: &str, workflow_id: &str) -> Result<Task> {
        let selector = LabelSelector::everything().eq(labels::WORKFLOW_ID, workflow_id);
        let mut matches: Vec<Task> = self
            .store
            .list_tasks(namespace, &selector)
            .await?
            .into_iter()
            .filter(|t| t.task_type == TaskType::Workflow)
            .collect();

        match matches.len() {
            1 => Ok(matches.remove(0)),
            0 => Err(CoreError::not_found("workflow", workflow_id)),
            n => Err(CoreError::NotFound {
                kind: "workflow",
                name: format!("{} ({} records match, expected one)", workflow_id, n),
            }),
        }
    }
}
