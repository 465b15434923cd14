// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Work submitter trait definitions.
//!
//! Defines the abstract interface for turning a task into a running
//! execution unit.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opflow_core::labels::{self, Labels};
use opflow_core::{CoreError, ExecutionUnit};
use thiserror::Error;

/// Errors from work submission.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SubmitError {
    /// The platform refused the unit.
    #[error("Submission rejected: {0}")]
    Rejected(String),

    /// The unit could not be rendered from its template.
    #[error("Template error: {0}")]
    Template(String),

    /// Persisting the rendered unit failed.
    #[error("Store error: {0}")]
    Store(#[from] CoreError),
}

/// Result type for submit operations.
pub type Result<T> = std::result::Result<T, SubmitError>;

/// Which manifest template renders the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitTemplate {
    Backup,
    Restore,
    CloneRepoSync,
    CloneRestore,
    StanzaCreate,
    Benchmark,
}

impl UnitTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backup => "backrest-backup",
            Self::Restore => "backrest-restore",
            Self::CloneRepoSync => "clone-repo-sync",
            Self::CloneRestore => "clone-restore",
            Self::StanzaCreate => "backrest-stanza-create",
            Self::Benchmark => "pgbench",
        }
    }
}

impl fmt::Display for UnitTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Annotation recording which template rendered a unit.
pub const TEMPLATE_ANNOTATION: &str = "opflow/template";

/// Everything needed to render and submit one execution unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkRequest {
    pub namespace: String,
    /// Task the unit belongs to; carried on the unit as the `pg-task` label.
    pub task_name: String,
    pub template: UnitTemplate,
    pub labels: Labels,
    pub annotations: BTreeMap<String, String>,
    pub parameters: BTreeMap<String, String>,
}

impl WorkRequest {
    pub fn new(
        namespace: impl Into<String>,
        task_name: impl Into<String>,
        template: UnitTemplate,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            task_name: task_name.into(),
            template,
            labels: Labels::new(),
            annotations: BTreeMap::new(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn label(mut self, key: &str, value: impl Into<String>) -> Self {
        self.labels.insert(key.to_string(), value.into());
        self
    }

    pub fn annotation(mut self, key: &str, value: impl Into<String>) -> Self {
        self.annotations.insert(key.to_string(), value.into());
        self
    }

    pub fn parameters(mut self, parameters: &BTreeMap<String, String>) -> Self {
        self.parameters
            .extend(parameters.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Render the unit record under `name`, in the active state.
    ///
    /// Parameters become annotations; explicit annotations win on collision.
    pub fn render(&self, name: &str) -> ExecutionUnit {
        let mut unit = ExecutionUnit::new(&self.namespace, name);
        unit.labels = self.labels.clone();
        unit.labels
            .insert(labels::VENDOR.to_string(), labels::VENDOR_VALUE.to_string());
        unit.labels
            .insert(labels::PG_TASK.to_string(), self.task_name.clone());

        unit.annotations = self.parameters.clone();
        unit.annotations
            .extend(self.annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
        unit.annotations.insert(
            TEMPLATE_ANNOTATION.to_string(),
            self.template.as_str().to_string(),
        );

        unit.status.active = 1;
        unit
    }
}

/// A unit accepted by the submitter.
#[derive(Debug, Clone)]
pub struct SubmittedUnit {
    /// Generated unit name; may differ from the task name.
    pub name: String,
    pub namespace: String,
    pub submitted_at: DateTime<Utc>,
}

/// Renders and submits execution units.
#[async_trait]
pub trait WorkSubmitter: Send + Sync {
    /// Short name for logs.
    fn submitter_type(&self) -> &'static str;

    async fn submit(&self, request: &WorkRequest) -> Result<SubmittedUnit>;
}
