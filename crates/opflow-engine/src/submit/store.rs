// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Submitter that materializes units as pending records in the task store.
//!
//! An external executor picks the records up, runs them and writes back
//! their counters; the polling watch source then reports the change.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use opflow_core::TaskStore;
use tracing::info;
use uuid::Uuid;

use super::traits::*;

pub struct StoreSubmitter {
    store: Arc<dyn TaskStore>,
}

impl StoreSubmitter {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    fn unit_name(task_name: &str) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}-{}", task_name, &suffix[..5])
    }
}

#[async_trait]
impl WorkSubmitter for StoreSubmitter {
    fn submitter_type(&self) -> &'static str {
        "store"
    }

    async fn submit(&self, request: &WorkRequest) -> Result<SubmittedUnit> {
        if request.task_name.is_empty() {
            return Err(SubmitError::Template(
                "work request has no task name".to_string(),
            ));
        }

        let name = Self::unit_name(&request.task_name);
        self.store.put_unit(&request.render(&name)).await?;

        info!(
            namespace = %request.namespace,
            task = %request.task_name,
            unit = %name,
            template = %request.template,
            "Execution unit submitted"
        );

        Ok(SubmittedUnit {
            name,
            namespace: request.namespace.clone(),
            submitted_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opflow_core::MemoryTaskStore;
    use opflow_core::labels;

    #[tokio::test]
    async fn test_submit_writes_pending_unit_with_generated_name() {
        let store = Arc::new(MemoryTaskStore::new());
        let submitter = StoreSubmitter::new(store.clone());

        let request = WorkRequest::new("ns", "pg1-stanza-create", UnitTemplate::StanzaCreate)
            .label(labels::PG_CLUSTER, "pg1");
        let submitted = submitter.submit(&request).await.unwrap();

        assert!(submitted.name.starts_with("pg1-stanza-create-"));
        assert_ne!(submitted.name, "pg1-stanza-create");

        let unit = store.get_unit("ns", &submitted.name).await.unwrap().unwrap();
        assert_eq!(unit.task_name(), "pg1-stanza-create");
        assert_eq!(unit.status.active, 1);
    }

    #[tokio::test]
    async fn test_empty_task_name_is_rejected() {
        let submitter = StoreSubmitter::new(Arc::new(MemoryTaskStore::new()));
        let err = submitter
            .submit(&WorkRequest::new("ns", "", UnitTemplate::Backup))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Template(_)));
    }
}
