// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Delete-then-recreate policy for deterministic task names.
//!
//! Before new work is submitted under a task name, any prior task with that
//! name is deleted together with the execution units matching a selector
//! scoped to the operation and cluster. Unit deletion completes
//! asynchronously, so the policy waits (bounded) for the selector to come
//! back empty.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};
use crate::retry::{PollOutcome, RetryPolicy};
use crate::selector::LabelSelector;
use crate::store::TaskStore;

/// What to do when prior units are still present after the bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutAction {
    /// Log a warning and let the caller proceed.
    #[default]
    Warn,
    /// Fail with [`CoreError::ReplacementTimeout`].
    Fail,
}

/// Result of clearing prior state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacementOutcome {
    /// Nothing was there to delete.
    Clean,
    /// Prior state was deleted and confirmed gone.
    Replaced { attempts: u32 },
    /// Prior units were still listed when the wait ran out (warn mode only).
    TimedOut { attempts: u32 },
}

#[derive(Clone)]
pub struct ReplacementPolicy {
    store: Arc<dyn TaskStore>,
    retry: RetryPolicy,
    on_timeout: TimeoutAction,
}

impl ReplacementPolicy {
    pub fn new(store: Arc<dyn TaskStore>, retry: RetryPolicy, on_timeout: TimeoutAction) -> Self {
        Self {
            store,
            retry,
            on_timeout,
        }
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// Remove task `task_name` and all units matching `units`, then wait for the units to go.
    pub async fn clear(
        &self,
        namespace: &str,
        task_name: &str,
        units: &LabelSelector,
    ) -> Result<ReplacementOutcome> {
        let task_deleted = self.store.delete_task(namespace, task_name).await?;
        let units_deleted = self.store.delete_units(namespace, units).await?;

        if !task_deleted && units_deleted == 0 {
            return Ok(ReplacementOutcome::Clean);
        }

        debug!(
            namespace = %namespace,
            task = %task_name,
            selector = %units,
            task_deleted,
            units_deleted,
            "Deleted prior state, waiting for removal"
        );
        self.settle(namespace, task_name, units).await
    }

    /// Remove the units matching `units` and wait for them to go. Tasks are left alone.
    pub async fn clear_units(
        &self,
        namespace: &str,
        units: &LabelSelector,
    ) -> Result<ReplacementOutcome> {
        let units_deleted = self.store.delete_units(namespace, units).await?;
        if units_deleted == 0 {
            return Ok(ReplacementOutcome::Clean);
        }

        debug!(namespace = %namespace, selector = %units, units_deleted, "Deleted prior units, waiting for removal");
        self.settle(namespace, &units.to_string(), units).await
    }

    async fn settle(
        &self,
        namespace: &str,
        what: &str,
        units: &LabelSelector,
    ) -> Result<ReplacementOutcome> {
        match self.wait_for_removal(namespace, units).await? {
            PollOutcome::Ready { attempts } => {
                info!(task = %what, attempts, "Prior state removed");
                Ok(ReplacementOutcome::Replaced { attempts })
            }
            PollOutcome::TimedOut { attempts } => match self.on_timeout {
                TimeoutAction::Warn => {
                    warn!(
                        namespace = %namespace,
                        task = %what,
                        selector = %units,
                        attempts,
                        "Prior execution units still present, proceeding anyway"
                    );
                    Ok(ReplacementOutcome::TimedOut { attempts })
                }
                TimeoutAction::Fail => Err(CoreError::ReplacementTimeout {
                    selector: units.to_string(),
                    attempts,
                }),
            },
        }
    }

    /// Wait until no unit matches `units`.
    pub async fn wait_for_removal(
        &self,
        namespace: &str,
        units: &LabelSelector,
    ) -> Result<PollOutcome> {
        let store = &self.store;
        self.retry
            .poll_until(|| async move {
                let remaining = store.list_units(namespace, units).await?;
                Ok::<_, CoreError>(remaining.is_empty())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::labels;
    use crate::model::{ExecutionUnit, Task, TaskType};
    use crate::store::MemoryTaskStore;
    use std::time::Duration;

    fn selector() -> LabelSelector {
        LabelSelector::everything()
            .eq(labels::BACKREST_COMMAND, labels::COMMAND_BACKUP)
            .eq(labels::PG_CLUSTER, "pg1")
    }

    async fn seed(store: &MemoryTaskStore) {
        store
            .create_task(&Task::new("ns", "backrest-backup-pg1", TaskType::Backup))
            .await
            .unwrap();
        let unit = ExecutionUnit::new("ns", "backrest-backup-pg1-x7")
            .with_label(labels::BACKREST_COMMAND, labels::COMMAND_BACKUP)
            .with_label(labels::PG_CLUSTER, "pg1");
        store.put_unit(&unit).await.unwrap();
    }

    fn policy(store: Arc<MemoryTaskStore>, on_timeout: TimeoutAction) -> ReplacementPolicy {
        ReplacementPolicy::new(
            store,
            RetryPolicy::fixed(3, Duration::from_millis(10)),
            on_timeout,
        )
    }

    #[tokio::test]
    async fn test_clean_when_nothing_exists() {
        let store = Arc::new(MemoryTaskStore::new());
        let outcome = policy(store, TimeoutAction::Warn)
            .clear("ns", "backrest-backup-pg1", &selector())
            .await
            .unwrap();
        assert_eq!(outcome, ReplacementOutcome::Clean);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_units_keeps_task() {
        let store = Arc::new(MemoryTaskStore::with_deletion_lag(1));
        seed(&store).await;

        let policy = policy(store.clone(), TimeoutAction::Warn);
        let outcome = policy.clear_units("ns", &selector()).await.unwrap();
        assert!(matches!(outcome, ReplacementOutcome::Replaced { .. }));
        assert!(store.all_units().await.is_empty());
        assert_eq!(store.all_tasks().await.len(), 1);

        let again = policy.clear_units("ns", &selector()).await.unwrap();
        assert_eq!(again, ReplacementOutcome::Clean);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaces_after_lagging_deletion() {
        let store = Arc::new(MemoryTaskStore::with_deletion_lag(2));
        seed(&store).await;

        let outcome = policy(store.clone(), TimeoutAction::Warn)
            .clear("ns", "backrest-backup-pg1", &selector())
            .await
            .unwrap();

        assert_eq!(outcome, ReplacementOutcome::Replaced { attempts: 2 });
        assert!(store.all_tasks().await.is_empty());
        assert!(store.all_units().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_warns_by_default() {
        let store = Arc::new(MemoryTaskStore::with_deletion_lag(100));
        seed(&store).await;

        let outcome = policy(store.clone(), TimeoutAction::Warn)
            .clear("ns", "backrest-backup-pg1", &selector())
            .await
            .unwrap();

        assert_eq!(outcome, ReplacementOutcome::TimedOut { attempts: 3 });
        assert!(store.all_tasks().await.is_empty(), "task is gone immediately");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_in_strict_mode() {
        let store = Arc::new(MemoryTaskStore::with_deletion_lag(100));
        seed(&store).await;

        let err = policy(store, TimeoutAction::Fail)
            .clear("ns", "backrest-backup-pg1", &selector())
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::ReplacementTimeout { attempts: 3, .. }));
        assert_eq!(err.category(), ErrorCategory::Conflict);
    }

    #[tokio::test]
    async fn test_units_of_other_clusters_survive() {
        let store = Arc::new(MemoryTaskStore::new());
        seed(&store).await;
        let other = ExecutionUnit::new("ns", "backrest-backup-pg2")
            .with_label(labels::BACKREST_COMMAND, labels::COMMAND_BACKUP)
            .with_label(labels::PG_CLUSTER, "pg2");
        store.put_unit(&other).await.unwrap();

        policy(store.clone(), TimeoutAction::Warn)
            .clear("ns", "backrest-backup-pg1", &selector())
            .await
            .unwrap();

        let remaining = store.all_units().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "backrest-backup-pg2");
    }
}
