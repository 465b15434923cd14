// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task records and execution units.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::labels::{self, Labels};

/// Finalizer present on an execution unit while it is being deleted in the foreground.
pub const FOREGROUND_DELETION_FINALIZER: &str = "foregroundDeletion";

/// Well-known workflow milestone names.
pub mod milestones {
    pub const SUBMITTED: &str = "submitted";
    pub const RESTORE_PVC_CREATED: &str = "restore-pvc-created";
    pub const CLONE_RESTORE_BACKUP: &str = "clone-restore-backup";
    pub const CLUSTER_CREATE: &str = "cluster-create";
    pub const COMPLETED: &str = "completed";
}

/// Well-known task parameter keys.
pub mod params {
    pub const JOB_NAME: &str = "job-name";
    pub const CLUSTER: &str = "pg-cluster";
    pub const POD_NAME: &str = "podname";
    pub const CONTAINER_NAME: &str = "containername";
    pub const COMMAND: &str = "backrest-command";
    pub const BACKREST_OPTS: &str = "backrest-opts";
    pub const STORAGE_TYPE: &str = "backrest-storage-type";
    pub const S3_VERIFY_TLS: &str = "backrest-s3-verify-tls";
    pub const IMAGE_PREFIX: &str = "image-prefix";
    pub const WORKFLOW_ID: &str = "workflowid";
    pub const PITR_TARGET: &str = "backrest-pitr-target";
    pub const RESTORE_TO_PVC: &str = "backrest-restore-to-pvc";
    pub const NODE_LABEL_KEY: &str = "node-label-key";
    pub const NODE_LABEL_VALUE: &str = "node-label-value";
    pub const CLONE_SOURCE: &str = "clone-source-cluster-name";
    pub const CLONE_TARGET: &str = "clone-target-cluster-name";
    pub const PVC_SIZE: &str = "pvc-size";
    pub const BACKREST_PVC_SIZE: &str = "backrest-pvc-size";
    pub const ENABLE_METRICS: &str = "enable-metrics";
    pub const FAILOVER_TARGET: &str = "target";
    pub const STATE: &str = "state";
    pub const MESSAGE: &str = "message";
}

/// Operation kind recorded on a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    Backup,
    Restore,
    CloneStep1,
    CloneStep2,
    CloneStep3,
    StanzaCreate,
    Benchmark,
    Workflow,
    Failover,
    ClusterInitialize,
    RemovePrimaryOnRoleChange,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::Restore => "restore",
            Self::CloneStep1 => "clone-step-1",
            Self::CloneStep2 => "clone-step-2",
            Self::CloneStep3 => "clone-step-3",
            Self::StanzaCreate => "stanza-create",
            Self::Benchmark => "benchmark",
            Self::Workflow => "workflow",
            Self::Failover => "failover",
            Self::ClusterInitialize => "cluster-initialize",
            Self::RemovePrimaryOnRoleChange => "remove-primary-on-role-change",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let all = [
            Self::Backup,
            Self::Restore,
            Self::CloneStep1,
            Self::CloneStep2,
            Self::CloneStep3,
            Self::StanzaCreate,
            Self::Benchmark,
            Self::Workflow,
            Self::Failover,
            Self::ClusterInitialize,
            Self::RemovePrimaryOnRoleChange,
        ];
        all.into_iter().find(|t| t.as_str() == value)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress marker on a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Requested,
    Submitted,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Submitted => "submitted",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "requested" => Some(Self::Requested),
            "submitted" => Some(Self::Submitted),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Whether the task's unit outcome has already been recorded.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, timestamped workflow step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub name: String,
    pub at: DateTime<Utc>,
}

/// Durable record of a requested operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub namespace: String,
    pub name: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// Free-text detail accompanying `status`, e.g. the unit that produced it.
    pub status_detail: Option<String>,
    pub parameters: BTreeMap<String, String>,
    pub labels: Labels,
    /// Workflow ledger in insertion order. Empty for non-workflow tasks.
    pub milestones: Vec<Milestone>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            task_type,
            status: TaskStatus::Requested,
            status_detail: None,
            parameters: BTreeMap::new(),
            labels: Labels::new(),
            milestones: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_label(mut self, key: &str, value: impl Into<String>) -> Self {
        self.labels.insert(key.to_string(), value.into());
        self
    }

    pub fn with_parameter(mut self, key: &str, value: impl Into<String>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn cluster_name(&self) -> Option<&str> {
        self.labels.get(labels::PG_CLUSTER).map(String::as_str)
    }

    pub fn workflow_id(&self) -> Option<&str> {
        self.labels.get(labels::WORKFLOW_ID).map(String::as_str)
    }

    pub fn has_milestone(&self, name: &str) -> bool {
        self.milestones.iter().any(|m| m.name == name)
    }
}

/// Observed counters of an execution unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatus {
    pub active: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub completion_time: Option<DateTime<Utc>>,
}

/// An externally-managed unit of work (typically a batch job).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionUnit {
    pub namespace: String,
    pub name: String,
    pub labels: Labels,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub status: UnitStatus,
    #[serde(default)]
    pub finalizers: Vec<String>,
}

impl ExecutionUnit {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            labels: Labels::new(),
            annotations: BTreeMap::new(),
            status: UnitStatus::default(),
            finalizers: Vec::new(),
        }
    }

    pub fn with_label(mut self, key: &str, value: impl Into<String>) -> Self {
        self.labels.insert(key.to_string(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: &str, value: impl Into<String>) -> Self {
        self.annotations.insert(key.to_string(), value.into());
        self
    }

    pub fn is_successful(&self) -> bool {
        self.status.succeeded > 0
    }

    pub fn is_failed(&self) -> bool {
        self.status.failed > 0 && self.status.succeeded == 0 && self.status.active == 0
    }

    pub fn is_terminal(&self) -> bool {
        self.is_successful() || self.is_failed()
    }

    pub fn in_foreground_deletion(&self) -> bool {
        self.finalizers
            .iter()
            .any(|f| f == FOREGROUND_DELETION_FINALIZER)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn cluster_name(&self) -> Option<&str> {
        self.label(labels::PG_CLUSTER)
    }

    /// Name of the task this unit was submitted for; falls back to the unit name.
    pub fn task_name(&self) -> &str {
        self.label(labels::PG_TASK).unwrap_or(&self.name)
    }

    /// Mark the unit as finished successfully.
    pub fn succeed(mut self) -> Self {
        self.status.active = 0;
        self.status.succeeded = 1;
        self.status.completion_time = Some(Utc::now());
        self
    }

    /// Mark the unit as finished with failure.
    pub fn fail(mut self) -> Self {
        self.status.active = 0;
        self.status.failed = 1;
        self
    }
}
