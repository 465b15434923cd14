// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock submitter for testing.
//!
//! Records every request and, when given a store, writes the rendered unit
//! into it under the task name so replacement and cleanup logic can see it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use opflow_core::{ExecutionUnit, TaskStore};
use tokio::sync::Mutex;

use super::traits::*;

/// Mock submitter for testing.
pub struct MockSubmitter {
    submissions: Mutex<Vec<WorkRequest>>,
    store: Option<Arc<dyn TaskStore>>,
    /// If set, every submission fails with this message
    fail_with: Mutex<Option<String>>,
}

impl Default for MockSubmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSubmitter {
    /// Create a new mock submitter that only records requests.
    pub fn new() -> Self {
        Self {
            submissions: Mutex::new(Vec::new()),
            store: None,
            fail_with: Mutex::new(None),
        }
    }

    /// Create a mock submitter that also persists rendered units into `store`.
    pub fn with_store(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::new()
        }
    }

    /// Create a mock submitter that rejects everything.
    pub fn failing() -> Self {
        Self {
            fail_with: Mutex::new(Some("Mock failure".to_string())),
            ..Self::new()
        }
    }

    /// Start or stop rejecting submissions.
    pub async fn set_failing(&self, message: Option<&str>) {
        *self.fail_with.lock().await = message.map(str::to_string);
    }

    /// All accepted requests, oldest first.
    pub async fn submissions(&self) -> Vec<WorkRequest> {
        self.submissions.lock().await.clone()
    }

    /// Most recent accepted request for `task_name`.
    pub async fn last_for(&self, task_name: &str) -> Option<WorkRequest> {
        self.submissions
            .lock()
            .await
            .iter()
            .rev()
            .find(|r| r.task_name == task_name)
            .cloned()
    }

    /// Render the most recent unit for `task_name` as finished successfully.
    pub async fn complete(&self, task_name: &str) -> Option<ExecutionUnit> {
        let unit = self.last_for(task_name).await?.render(task_name).succeed();
        self.persist(&unit).await;
        Some(unit)
    }

    /// Render the most recent unit for `task_name` as failed.
    pub async fn fail(&self, task_name: &str) -> Option<ExecutionUnit> {
        let unit = self.last_for(task_name).await?.render(task_name).fail();
        self.persist(&unit).await;
        Some(unit)
    }

    async fn persist(&self, unit: &ExecutionUnit) {
        if let Some(store) = &self.store {
            let _ = store.put_unit(unit).await;
        }
    }
}

#[async_trait]
impl WorkSubmitter for MockSubmitter {
    fn submitter_type(&self) -> &'static str {
        "mock"
    }

    async fn submit(&self, request: &WorkRequest) -> Result<SubmittedUnit> {
        if let Some(message) = self.fail_with.lock().await.clone() {
            return Err(SubmitError::Rejected(message));
        }

        if let Some(store) = &self.store {
            store.put_unit(&request.render(&request.task_name)).await?;
        }

        self.submissions.lock().await.push(request.clone());

        Ok(SubmittedUnit {
            name: request.task_name.clone(),
            namespace: request.namespace.clone(),
            submitted_at: Utc::now(),
        })
    }
}
