// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task store abstraction.
//!
//! Key-addressed storage for task records and execution units, with
//! list-by-label-selector queries. Two implementations ship with the crate:
//!
//! - [`MemoryTaskStore`]: in-process maps, used by tests and embedded setups.
//! - [`SqliteTaskStore`]: sqlx-backed SQLite storage.

use async_trait::async_trait;

use crate::error::{CoreError, Result};
use crate::model::{ExecutionUnit, Task, TaskStatus};
use crate::selector::LabelSelector;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryTaskStore;
pub use sqlite::SqliteTaskStore;

/// Storage for task records and execution units.
///
/// `create_task` is conditional: it fails with [`CoreError::AlreadyExists`]
/// when a task with the same namespace and name is present.
#[async_trait]
pub trait TaskStore: Send + Sync {
    // ========================================================================
    // Tasks
    // ========================================================================

    async fn create_task(&self, task: &Task) -> Result<()>;

    async fn get_task(&self, namespace: &str, name: &str) -> Result<Option<Task>>;

    /// Overwrite an existing task. Fails with `NotFound` if it is absent.
    async fn update_task(&self, task: &Task) -> Result<()>;

    /// Delete a task. Returns whether a record was removed.
    async fn delete_task(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Delete a task only if its status is completed or error. Returns
    /// whether a record was removed; a live task is left in place.
    async fn delete_settled_task(&self, namespace: &str, name: &str) -> Result<bool>;

    async fn list_tasks(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Task>>;

    /// Set the status of an existing task.
    async fn set_task_status(
        &self,
        namespace: &str,
        name: &str,
        status: TaskStatus,
        detail: Option<&str>,
    ) -> Result<()> {
        let mut task = self
            .get_task(namespace, name)
            .await?
            .ok_or_else(|| CoreError::not_found("task", name))?;
        task.status = status;
        task.status_detail = detail.map(str::to_string);
        self.update_task(&task).await
    }

    // ========================================================================
    // Execution units
    // ========================================================================

    /// Insert or replace an execution unit.
    async fn put_unit(&self, unit: &ExecutionUnit) -> Result<()>;

    async fn get_unit(&self, namespace: &str, name: &str) -> Result<Option<ExecutionUnit>>;

    async fn list_units(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ExecutionUnit>>;

    /// Request deletion of a unit. Removal may complete asynchronously.
    async fn delete_unit(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Request deletion of every unit matching `selector`. Returns how many were requested.
    async fn delete_units(&self, namespace: &str, selector: &LabelSelector) -> Result<usize> {
        let units = self.list_units(namespace, selector).await?;
        let mut deleted = 0;
        for unit in &units {
            if self.delete_unit(namespace, &unit.name).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}
