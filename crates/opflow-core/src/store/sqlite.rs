// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed task store.
//!
//! Selectors are evaluated in process after loading a namespace's rows,
//! since labels are stored as JSON text.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use super::TaskStore;
use crate::error::{CoreError, Result};
use crate::model::{ExecutionUnit, Task, TaskStatus, TaskType, UnitStatus};
use crate::selector::LabelSelector;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

#[derive(sqlx::FromRow)]
struct TaskRow {
    namespace: String,
    name: String,
    task_type: String,
    status: String,
    status_detail: Option<String>,
    parameters: String,
    labels: String,
    milestones: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = CoreError;

    fn try_from(row: TaskRow) -> Result<Self> {
        let task_type = TaskType::parse(&row.task_type).ok_or_else(|| {
            CoreError::store("decode", format!("unknown task type '{}'", row.task_type))
        })?;
        let status = TaskStatus::parse(&row.status).ok_or_else(|| {
            CoreError::store("decode", format!("unknown task status '{}'", row.status))
        })?;
        Ok(Task {
            namespace: row.namespace,
            name: row.name,
            task_type,
            status,
            status_detail: row.status_detail,
            parameters: serde_json::from_str(&row.parameters)?,
            labels: serde_json::from_str(&row.labels)?,
            milestones: serde_json::from_str(&row.milestones)?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UnitRow {
    namespace: String,
    name: String,
    labels: String,
    annotations: String,
    active: i64,
    succeeded: i64,
    failed: i64,
    completion_time: Option<DateTime<Utc>>,
    finalizers: String,
}

impl TryFrom<UnitRow> for ExecutionUnit {
    type Error = CoreError;

    fn try_from(row: UnitRow) -> Result<Self> {
        Ok(ExecutionUnit {
            namespace: row.namespace,
            name: row.name,
            labels: serde_json::from_str(&row.labels)?,
            annotations: serde_json::from_str(&row.annotations)?,
            status: UnitStatus {
                active: u32::try_from(row.active).unwrap_or(0),
                succeeded: u32::try_from(row.succeeded).unwrap_or(0),
                failed: u32::try_from(row.failed).unwrap_or(0),
                completion_time: row.completion_time,
            },
            finalizers: serde_json::from_str(&row.finalizers)?,
        })
    }
}

const TASK_COLUMNS: &str = "namespace, name, task_type, status, status_detail, parameters, labels, milestones, created_at";
const UNIT_COLUMNS: &str =
    "namespace, name, labels, annotations, active, succeeded, failed, completion_time, finalizers";

/// SQLite-backed task store.
#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Create a store from an existing pool. Migrations are not run.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a database URL (`sqlite:...`) or a plain file path and run migrations.
    pub async fn connect(url_or_path: &str) -> Result<Self> {
        if url_or_path.starts_with("sqlite:") {
            let pool = SqlitePoolOptions::new()
                .max_connections(5)
                .connect(url_or_path)
                .await
                .map_err(|e| CoreError::store("connect", e.to_string()))?;
            Self::migrate(&pool).await?;
            Ok(Self { pool })
        } else {
            Self::from_path(url_or_path).await
        }
    }

    /// Open (creating if needed) a database file and run migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                CoreError::store(
                    "create_dir",
                    format!("Failed to create directory {:?}: {}", parent, e),
                )
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| {
                CoreError::store(
                    "connect",
                    format!("Failed to connect to SQLite at {:?}: {}", path, e),
                )
            })?;

        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Apply the bundled migrations to `pool`.
    pub async fn migrate(pool: &SqlitePool) -> Result<()> {
        MIGRATOR
            .run(pool)
            .await
            .map_err(|e| CoreError::store("migrate", format!("Failed to run migrations: {}", e)))
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create_task(&self, task: &Task) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO tasks (namespace, name, task_type, status, status_detail,
                               parameters, labels, milestones, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.namespace)
        .bind(&task.name)
        .bind(task.task_type.as_str())
        .bind(task.status.as_str())
        .bind(&task.status_detail)
        .bind(serde_json::to_string(&task.parameters)?)
        .bind(serde_json::to_string(&task.labels)?)
        .bind(serde_json::to_string(&task.milestones)?)
        .bind(task.created_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(CoreError::AlreadyExists {
                    kind: "task",
                    name: task.name.clone(),
                })
            }
            Err(e) => Err(CoreError::store("create_task", e.to_string())),
        }
    }

    async fn get_task(&self, namespace: &str, name: &str) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM tasks WHERE namespace = ? AND name = ?",
            TASK_COLUMNS
        ))
        .bind(namespace)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Task::try_from).transpose()
    }

    async fn update_task(&self, task: &Task) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET task_type = ?, status = ?, status_detail = ?, parameters = ?,
                labels = ?, milestones = ?, updated_at = ?
            WHERE namespace = ? AND name = ?
            "#,
        )
        .bind(task.task_type.as_str())
        .bind(task.status.as_str())
        .bind(&task.status_detail)
        .bind(serde_json::to_string(&task.parameters)?)
        .bind(serde_json::to_string(&task.labels)?)
        .bind(serde_json::to_string(&task.milestones)?)
        .bind(Utc::now())
        .bind(&task.namespace)
        .bind(&task.name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("task", task.name.clone()));
        }
        Ok(())
    }

    async fn delete_task(&self, namespace: &str, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE namespace = ? AND name = ?")
            .bind(namespace)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_settled_task(&self, namespace: &str, name: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM tasks WHERE namespace = ? AND name = ? AND status IN (?, ?)",
        )
        .bind(namespace)
        .bind(name)
        .bind(TaskStatus::Completed.as_str())
        .bind(TaskStatus::Error.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_tasks(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {} FROM tasks WHERE namespace = ? ORDER BY name",
            TASK_COLUMNS
        ))
        .bind(namespace)
        .fetch_all(&self.pool)
        .await?;

        let mut tasks = Vec::new();
        for row in rows {
            let task = Task::try_from(row)?;
            if selector.matches(&task.labels) {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    async fn put_unit(&self, unit: &ExecutionUnit) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO execution_units (namespace, name, labels, annotations, active,
                                         succeeded, failed, completion_time, finalizers)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (namespace, name) DO UPDATE SET
                labels = excluded.labels,
                annotations = excluded.annotations,
                active = excluded.active,
                succeeded = excluded.succeeded,
                failed = excluded.failed,
                completion_time = excluded.completion_time,
                finalizers = excluded.finalizers
            "#,
        )
        .bind(&unit.namespace)
        .bind(&unit.name)
        .bind(serde_json::to_string(&unit.labels)?)
        .bind(serde_json::to_string(&unit.annotations)?)
        .bind(i64::from(unit.status.active))
        .bind(i64::from(unit.status.succeeded))
        .bind(i64::from(unit.status.failed))
        .bind(unit.status.completion_time)
        .bind(serde_json::to_string(&unit.finalizers)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_unit(&self, namespace: &str, name: &str) -> Result<Option<ExecutionUnit>> {
        let row = sqlx::query_as::<_, UnitRow>(&format!(
            "SELECT {} FROM execution_units WHERE namespace = ? AND name = ?",
            UNIT_COLUMNS
        ))
        .bind(namespace)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ExecutionUnit::try_from).transpose()
    }

    async fn list_units(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ExecutionUnit>> {
        let rows = sqlx::query_as::<_, UnitRow>(&format!(
            "SELECT {} FROM execution_units WHERE namespace = ? ORDER BY name",
            UNIT_COLUMNS
        ))
        .bind(namespace)
        .fetch_all(&self.pool)
        .await?;

        let mut units = Vec::new();
        for row in rows {
            let unit = ExecutionUnit::try_from(row)?;
            if selector.matches(&unit.labels) {
                units.push(unit);
            }
        }
        Ok(units)
    }

    async fn delete_unit(&self, namespace: &str, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM execution_units WHERE namespace = ? AND name = ?")
            .bind(namespace)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
