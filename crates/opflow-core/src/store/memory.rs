// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory task store.
//!
//! Deleted execution units can be configured to linger for a number of
//! list calls, the way a platform finishes foreground deletion some time
//! after the delete request was accepted.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::TaskStore;
use crate::error::{CoreError, Result};
use crate::model::{ExecutionUnit, FOREGROUND_DELETION_FINALIZER, Task};
use crate::selector::LabelSelector;

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

#[derive(Default)]
struct Inner {
    tasks: BTreeMap<Key, Task>,
    units: BTreeMap<Key, ExecutionUnit>,
    /// Units being deleted, with the number of list calls left before they vanish.
    pending_deletion: HashMap<Key, u32>,
}

/// Task store backed by in-process maps.
#[derive(Default)]
pub struct MemoryTaskStore {
    inner: Mutex<Inner>,
    deletion_lag: u32,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deleted units stay listed (with a foreground-deletion finalizer)
    /// for `polls` subsequent `list_units` calls.
    pub fn with_deletion_lag(polls: u32) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            deletion_lag: polls,
        }
    }

    /// Snapshot of every task across namespaces.
    pub async fn all_tasks(&self) -> Vec<Task> {
        self.inner.lock().await.tasks.values().cloned().collect()
    }

    /// Snapshot of every unit across namespaces.
    pub async fn all_units(&self) -> Vec<ExecutionUnit> {
        self.inner.lock().await.units.values().cloned().collect()
    }

    fn request_unit_deletion(&self, inner: &mut Inner, k: Key) -> bool {
        if !inner.units.contains_key(&k) {
            return false;
        }
        if self.deletion_lag == 0 {
            inner.units.remove(&k);
            return true;
        }
        if let Some(unit) = inner.units.get_mut(&k)
            && !unit.in_foreground_deletion()
        {
            unit.finalizers.push(FOREGROUND_DELETION_FINALIZER.to_string());
        }
        inner
            .pending_deletion
            .entry(k)
            .or_insert(self.deletion_lag);
        true
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create_task(&self, task: &Task) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let k = key(&task.namespace, &task.name);
        if inner.tasks.contains_key(&k) {
            return Err(CoreError::AlreadyExists {
                kind: "task",
                name: task.name.clone(),
            });
        }
        inner.tasks.insert(k, task.clone());
        Ok(())
    }

    async fn get_task(&self, namespace: &str, name: &str) -> Result<Option<Task>> {
        Ok(self.inner.lock().await.tasks.get(&key(namespace, name)).cloned())
    }

    async fn update_task(&self, task: &Task) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.tasks.get_mut(&key(&task.namespace, &task.name)) {
            Some(existing) => {
                *existing = task.clone();
                Ok(())
            }
            None => Err(CoreError::not_found("task", task.name.clone())),
        }
    }

    async fn delete_task(&self, namespace: &str, name: &str) -> Result<bool> {
        Ok(self
            .inner
            .lock()
            .await
            .tasks
            .remove(&key(namespace, name))
            .is_some())
    }

    async fn delete_settled_task(&self, namespace: &str, name: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let k = key(namespace, name);
        match inner.tasks.get(&k) {
            Some(task) if task.status.is_settled() => Ok(inner.tasks.remove(&k).is_some()),
            _ => Ok(false),
        }
    }

    async fn list_tasks(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Task>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tasks
            .values()
            .filter(|t| t.namespace == namespace && selector.matches(&t.labels))
            .cloned()
            .collect())
    }

    async fn put_unit(&self, unit: &ExecutionUnit) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let k = key(&unit.namespace, &unit.name);
        inner.pending_deletion.remove(&k);
        inner.units.insert(k, unit.clone());
        Ok(())
    }

    async fn get_unit(&self, namespace: &str, name: &str) -> Result<Option<ExecutionUnit>> {
        Ok(self.inner.lock().await.units.get(&key(namespace, name)).cloned())
    }

    async fn list_units(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ExecutionUnit>> {
        let mut inner = self.inner.lock().await;

        let mut finished = Vec::new();
        for (k, remaining) in inner.pending_deletion.iter_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                finished.push(k.clone());
            }
        }
        for k in finished {
            inner.pending_deletion.remove(&k);
            inner.units.remove(&k);
        }

        Ok(inner
            .units
            .values()
            .filter(|u| u.namespace == namespace && selector.matches(&u.labels))
            .cloned()
            .collect())
    }

    async fn delete_unit(&self, namespace: &str, name: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        Ok(self.request_unit_deletion(&mut inner, key(namespace, name)))
    }

    async fn delete_units(&self, namespace: &str, selector: &LabelSelector) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let matching: Vec<Key> = inner
            .units
            .iter()
            .filter(|(_, u)| u.namespace == namespace && selector.matches(&u.labels))
            .map(|(k, _)| k.clone())
            .collect();
        let mut deleted = 0;
        for k in matching {
            if self.request_unit_deletion(&mut inner, k) {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::labels;
    use crate::model::{TaskStatus, TaskType};

    #[tokio::test]
    async fn test_create_is_conditional() {
        let store = MemoryTaskStore::new();
        let task = Task::new("ns", "backrest-backup-pg1", TaskType::Backup);
        store.create_task(&task).await.unwrap();

        let err = store.create_task(&task).await.unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists { .. }));
        assert_eq!(err.category(), ErrorCategory::Store);

        // same name in another namespace is a different record
        let other = Task::new("other", "backrest-backup-pg1", TaskType::Backup);
        store.create_task(&other).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_settled_task() {
        let store = MemoryTaskStore::new();
        store
            .create_task(&Task::new("ns", "clone-step-1-pg2", TaskType::CloneStep1))
            .await
            .unwrap();

        assert!(!store.delete_settled_task("ns", "clone-step-1-pg2").await.unwrap());
        store
            .set_task_status("ns", "clone-step-1-pg2", TaskStatus::Completed, None)
            .await
            .unwrap();
        assert!(store.delete_settled_task("ns", "clone-step-1-pg2").await.unwrap());
        assert!(!store.delete_settled_task("ns", "missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_status_and_missing_task() {
        let store = MemoryTaskStore::new();
        store
            .create_task(&Task::new("ns", "t1", TaskType::Failover))
            .await
            .unwrap();

        store
            .set_task_status("ns", "t1", TaskStatus::Completed, Some("job-1"))
            .await
            .unwrap();
        let task = store.get_task("ns", "t1").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.status_detail.as_deref(), Some("job-1"));

        let err = store
            .set_task_status("ns", "missing", TaskStatus::Completed, None)
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }

    #[tokio::test]
    async fn test_list_tasks_by_selector() {
        let store = MemoryTaskStore::new();
        for (name, cluster) in [("a", "pg1"), ("b", "pg1"), ("c", "pg2")] {
            let task = Task::new("ns", name, TaskType::Backup).with_label(labels::PG_CLUSTER, cluster);
            store.create_task(&task).await.unwrap();
        }
        let sel = LabelSelector::everything().eq(labels::PG_CLUSTER, "pg1");
        let names: Vec<_> = store
            .list_tasks("ns", &sel)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_deletion_lag() {
        let store = MemoryTaskStore::with_deletion_lag(2);
        let unit = ExecutionUnit::new("ns", "job").with_label(labels::PG_CLUSTER, "pg1");
        store.put_unit(&unit).await.unwrap();

        let sel = LabelSelector::everything().eq(labels::PG_CLUSTER, "pg1");
        assert_eq!(store.delete_units("ns", &sel).await.unwrap(), 1);

        let listed = store.list_units("ns", &sel).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].in_foreground_deletion());

        assert!(store.list_units("ns", &sel).await.unwrap().is_empty());
        assert!(store.get_unit("ns", "job").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_immediate_deletion() {
        let store = MemoryTaskStore::new();
        store.put_unit(&ExecutionUnit::new("ns", "job")).await.unwrap();
        assert!(store.delete_unit("ns", "job").await.unwrap());
        assert!(!store.delete_unit("ns", "job").await.unwrap());
        assert!(store.all_units().await.is_empty());
    }
}
