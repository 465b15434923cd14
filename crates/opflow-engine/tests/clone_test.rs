// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Three-step clone pipeline.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::*;
use opflow_core::error::Result as CoreResult;
use opflow_core::model::milestones;
use opflow_core::{
    ErrorCategory, ExecutionUnit, LabelSelector, MemoryTaskStore, Task, TaskStatus, TaskStore,
    TaskType, labels,
};
use opflow_engine::api::{EngineApi, OperationResponse};
use opflow_engine::context::EngineContext;
use opflow_engine::events::{Event, RecordingPublisher};
use opflow_engine::inventory::{Cluster, MemoryInventory};
use opflow_engine::orchestrator::{CloneRequest, Orchestrators};
use opflow_engine::submit::MockSubmitter;

fn clone_pg1_to(target: &str) -> CloneRequest {
    CloneRequest {
        namespace: NS.to_string(),
        source_cluster: "pg1".to_string(),
        target_cluster: target.to_string(),
        username: USER.to_string(),
        ..Default::default()
    }
}

async fn milestone_names(h: &Harness, workflow_id: &str) -> Vec<String> {
    h.api
        .show_workflow(NS, workflow_id)
        .await
        .unwrap()
        .milestones
        .into_iter()
        .map(|m| m.name)
        .collect()
}

#[tokio::test]
async fn test_clone_end_to_end() {
    let h = Harness::new();

    let response = h.api.create_clone(&clone_pg1_to("pg2")).await;
    assert!(response.is_ok(), "{:?}", response);
    assert_eq!(response.target_cluster.as_deref(), Some("pg2"));
    let workflow_id = response.workflow_id.expect("workflow id");

    let step1 = h.task("clone-step-1-pg2").await.expect("step 1 task");
    assert_eq!(step1.task_type, TaskType::CloneStep1);
    assert_eq!(step1.workflow_id(), Some(workflow_id.as_str()));
    assert!(h.task("clone-step-2-pg2").await.is_none());

    h.complete("clone-step-1-pg2").await;

    let step2 = h.task("clone-step-2-pg2").await.expect("step 2 task");
    assert_eq!(step2.workflow_id(), Some(workflow_id.as_str()));
    assert_eq!(step2.status, TaskStatus::Submitted);
    assert_eq!(
        h.task("clone-step-1-pg2").await.unwrap().status,
        TaskStatus::Completed
    );
    let step2_unit = h.submitter.last_for("clone-step-2-pg2").await.unwrap();
    assert_eq!(
        step2_unit.labels.get(labels::BACKREST_RESTORE).map(String::as_str),
        Some(labels::TRUE)
    );

    h.complete("clone-step-2-pg2").await;

    let step3 = h.task("clone-step-3-pg2").await.expect("step 3 task");
    assert_eq!(step3.task_type, TaskType::CloneStep3);
    assert_eq!(step3.workflow_id(), Some(workflow_id.as_str()));
    assert_eq!(
        milestone_names(&h, &workflow_id).await,
        vec![
            milestones::SUBMITTED,
            milestones::CLONE_RESTORE_BACKUP,
            milestones::CLUSTER_CREATE
        ]
    );
    // step 2 carries the generic restore label but must not be handled as a restore
    assert!(h.publisher.events_of("restore_completed").await.is_empty());
}

#[tokio::test]
async fn test_second_clone_into_same_target_conflicts() {
    let h = Harness::new();

    assert!(h.api.create_clone(&clone_pg1_to("pg2")).await.is_ok());
    let response = h.api.create_clone(&clone_pg1_to("pg2")).await;
    assert_eq!(response.error_category, Some(ErrorCategory::Conflict));
    assert_eq!(h.tasks_of(TaskType::Workflow).await.len(), 1);
}

#[tokio::test]
async fn test_clone_into_existing_cluster_conflicts() {
    let snapshot =
        pg1_inventory().cluster(Cluster::new(NS, "pg3").with_label(labels::BACKREST, labels::TRUE));
    let h = Harness::with_inventory(snapshot);

    let response = h.api.create_clone(&clone_pg1_to("pg3")).await;
    assert_eq!(response.error_category, Some(ErrorCategory::Conflict));
    assert!(h.store.all_tasks().await.is_empty());
}

#[tokio::test]
async fn test_clone_request_validation() {
    let h = Harness::new();

    let same = h.api.create_clone(&clone_pg1_to("pg1")).await;
    assert_eq!(same.error_category, Some(ErrorCategory::PreconditionFailed));

    let invalid = h.api.create_clone(&clone_pg1_to("Not_A_Name")).await;
    assert_eq!(
        invalid.error_category,
        Some(ErrorCategory::PreconditionFailed)
    );

    let missing = h
        .api
        .create_clone(&CloneRequest {
            source_cluster: "pg9".to_string(),
            ..clone_pg1_to("pg2")
        })
        .await;
    assert_eq!(missing.error_category, Some(ErrorCategory::NotFound));
    assert!(h.store.all_tasks().await.is_empty());
}

#[tokio::test]
async fn test_step2_submit_failure_publishes_clone_failure() {
    let h = Harness::new();
    let response = h.api.create_clone(&clone_pg1_to("pg2")).await;
    let workflow_id = response.workflow_id.unwrap();

    h.submitter.set_failing(Some("quota exceeded")).await;
    h.complete("clone-step-1-pg2").await;

    let failures = h.publisher.events_of("clone_failure").await;
    assert_eq!(failures.len(), 1);
    match &failures[0] {
        Event::CloneFailure {
            source_cluster,
            target_cluster,
            workflow_id: id,
            error_message,
            ..
        } => {
            assert_eq!(source_cluster, "pg1");
            assert_eq!(target_cluster, "pg2");
            assert_eq!(id, &workflow_id);
            assert!(error_message.contains("quota exceeded"));
        }
        other => panic!("unexpected event {:?}", other),
    }

    assert_eq!(
        h.task("clone-step-2-pg2").await.unwrap().status,
        TaskStatus::Error
    );
    // forward-only: the workflow stays at its last milestone
    assert_eq!(
        milestone_names(&h, &workflow_id).await,
        vec![milestones::SUBMITTED, milestones::CLONE_RESTORE_BACKUP]
    );
}

#[tokio::test]
async fn test_failed_step2_leaves_workflow_untouched() {
    let h = Harness::new();
    let workflow_id = h
        .api
        .create_clone(&clone_pg1_to("pg2"))
        .await
        .workflow_id
        .unwrap();
    h.complete("clone-step-1-pg2").await;

    h.fail("clone-step-2-pg2").await;

    assert_eq!(
        h.task("clone-step-2-pg2").await.unwrap().status,
        TaskStatus::Error
    );
    assert!(h.task("clone-step-3-pg2").await.is_none());
    assert_eq!(
        milestone_names(&h, &workflow_id).await,
        vec![milestones::SUBMITTED, milestones::CLONE_RESTORE_BACKUP]
    );

    // the errored clone can be re-issued
    let retry = h.api.create_clone(&clone_pg1_to("pg2")).await;
    assert!(retry.is_ok(), "{:?}", retry);
}

#[tokio::test]
async fn test_concurrent_clones_into_one_target() {
    let h = Harness::new();
    let request = clone_pg1_to("pg2");

    let responses =
        futures::future::join_all((0..2).map(|_| h.api.create_clone(&request))).await;

    let accepted = responses.iter().filter(|r| r.is_ok()).count();
    assert_eq!(accepted, 1, "{:?}", responses);
    let rejected = responses.iter().find(|r| !r.is_ok()).unwrap();
    assert_eq!(rejected.error_category, Some(ErrorCategory::Conflict));
    assert_eq!(h.submitter.submissions().await.len(), 1);
}

/// Memory store that yields to the scheduler before every call, so two
/// requests driven on one task interleave at each store access.
struct YieldingStore(MemoryTaskStore);

#[async_trait]
impl TaskStore for YieldingStore {
    async fn create_task(&self, task: &Task) -> CoreResult<()> {
        tokio::task::yield_now().await;
        self.0.create_task(task).await
    }

    async fn get_task(&self, namespace: &str, name: &str) -> CoreResult<Option<Task>> {
        tokio::task::yield_now().await;
        self.0.get_task(namespace, name).await
    }

    async fn update_task(&self, task: &Task) -> CoreResult<()> {
        tokio::task::yield_now().await;
        self.0.update_task(task).await
    }

    async fn delete_task(&self, namespace: &str, name: &str) -> CoreResult<bool> {
        tokio::task::yield_now().await;
        self.0.delete_task(namespace, name).await
    }

    async fn delete_settled_task(&self, namespace: &str, name: &str) -> CoreResult<bool> {
        tokio::task::yield_now().await;
        self.0.delete_settled_task(namespace, name).await
    }

    async fn list_tasks(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> CoreResult<Vec<Task>> {
        tokio::task::yield_now().await;
        self.0.list_tasks(namespace, selector).await
    }

    async fn put_unit(&self, unit: &ExecutionUnit) -> CoreResult<()> {
        tokio::task::yield_now().await;
        self.0.put_unit(unit).await
    }

    async fn get_unit(&self, namespace: &str, name: &str) -> CoreResult<Option<ExecutionUnit>> {
        tokio::task::yield_now().await;
        self.0.get_unit(namespace, name).await
    }

    async fn list_units(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> CoreResult<Vec<ExecutionUnit>> {
        tokio::task::yield_now().await;
        self.0.list_units(namespace, selector).await
    }

    async fn delete_unit(&self, namespace: &str, name: &str) -> CoreResult<bool> {
        tokio::task::yield_now().await;
        self.0.delete_unit(namespace, name).await
    }
}

async fn delayed_clone(
    api: &EngineApi,
    request: &CloneRequest,
    yields: usize,
) -> OperationResponse {
    for _ in 0..yields {
        tokio::task::yield_now().await;
    }
    api.create_clone(request).await
}

#[tokio::test]
async fn test_racing_clones_leave_one_live_pipeline() {
    let request = clone_pg1_to("pg2");

    for offset in 0..8 {
        let store = Arc::new(YieldingStore(MemoryTaskStore::new()));
        let submitter = Arc::new(MockSubmitter::with_store(store.clone()));
        let ctx = Arc::new(EngineContext::new(
            store.clone(),
            submitter.clone(),
            Arc::new(MemoryInventory::from(pg1_inventory())),
            Arc::new(RecordingPublisher::new()),
            test_settings(),
        ));
        let api = EngineApi::new(ctx.clone(), Orchestrators::new(ctx));

        let (first, second) = tokio::join!(
            api.create_clone(&request),
            delayed_clone(&api, &request, offset)
        );

        let (accepted, rejected) = match (first.is_ok(), second.is_ok()) {
            (true, false) => (first, second),
            (false, true) => (second, first),
            _ => panic!(
                "offset {}: expected one winner, got {:?} and {:?}",
                offset, first, second
            ),
        };
        assert_eq!(
            rejected.error_category,
            Some(ErrorCategory::Conflict),
            "offset {}: {:?}",
            offset,
            rejected
        );

        let everything = LabelSelector::everything();
        let workflows: Vec<Task> = store
            .list_tasks(NS, &everything)
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.task_type == TaskType::Workflow)
            .collect();
        assert_eq!(workflows.len(), 1, "offset {}", offset);
        assert_eq!(
            workflows[0].workflow_id(),
            accepted.workflow_id.as_deref(),
            "offset {}",
            offset
        );

        let step1 = store.get_task(NS, "clone-step-1-pg2").await.unwrap().unwrap();
        assert_eq!(step1.status, TaskStatus::Submitted, "offset {}", offset);
        assert_eq!(step1.workflow_id(), accepted.workflow_id.as_deref());

        let units = store.list_units(NS, &everything).await.unwrap();
        assert_eq!(units.len(), 1, "offset {}", offset);
        assert_eq!(units[0].name, "clone-step-1-pg2");
        assert!(!units[0].is_terminal());
        assert_eq!(submitter.submissions().await.len(), 1, "offset {}", offset);
    }
}
