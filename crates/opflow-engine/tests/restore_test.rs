// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Restore flow.

mod common;

use common::*;
use opflow_core::model::{milestones, params};
use opflow_core::{ErrorCategory, TaskStatus, labels};
use opflow_engine::inventory::{Cluster, InventorySnapshot};
use opflow_engine::orchestrator::RestoreRequest;

fn restore_pg1() -> RestoreRequest {
    RestoreRequest {
        namespace: NS.to_string(),
        from_cluster: "pg1".to_string(),
        username: USER.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_restore_rejected_on_standby_before_any_task() {
    let snapshot = InventorySnapshot::default().cluster(
        Cluster::new(NS, "pg1")
            .with_label(labels::BACKREST, labels::TRUE)
            .with_standby(true),
    );
    let h = Harness::with_inventory(snapshot);

    let response = h.api.create_restore(&restore_pg1()).await;
    assert!(!response.is_ok());
    assert_eq!(
        response.error_category,
        Some(ErrorCategory::PreconditionFailed)
    );
    assert!(response.results[0].contains("standby"));
    assert!(h.store.all_tasks().await.is_empty());
    assert!(h.submitter.submissions().await.is_empty());
}

#[tokio::test]
async fn test_restore_workflow_end_to_end() {
    let h = Harness::new();

    let response = h.api.create_restore(&restore_pg1()).await;
    assert!(response.is_ok(), "{:?}", response);
    let workflow_id = response.workflow_id.expect("workflow id");

    let task = h.task("backrest-restore-pg1").await.expect("restore task");
    assert_eq!(task.status, TaskStatus::Submitted);
    assert_eq!(task.workflow_id(), Some(workflow_id.as_str()));
    let to_pvc = task.parameters.get(params::RESTORE_TO_PVC).unwrap();
    assert!(to_pvc.starts_with("pg1-"));

    let before = h.api.show_workflow(NS, &workflow_id).await.unwrap();
    assert_eq!(before.cluster_name, "pg1");
    assert_eq!(before.milestones.len(), 1);

    h.complete("backrest-restore-pg1").await;

    let task = h.task("backrest-restore-pg1").await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    let after = h.api.show_workflow(NS, &workflow_id).await.unwrap();
    let names: Vec<_> = after.milestones.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(
        names,
        vec![milestones::SUBMITTED, milestones::RESTORE_PVC_CREATED]
    );
    assert_eq!(h.publisher.events_of("restore_completed").await.len(), 1);
}

#[tokio::test]
async fn test_restore_accepts_one_storage_type_only() {
    let snapshot = InventorySnapshot::default().cluster(
        Cluster::new(NS, "pg1")
            .with_label(labels::BACKREST, labels::TRUE)
            .with_label(labels::BACKREST_STORAGE_TYPE, "local,s3"),
    );
    let h = Harness::with_inventory(snapshot);

    let request = RestoreRequest {
        storage_type: "local,s3".to_string(),
        ..restore_pg1()
    };
    let response = h.api.create_restore(&request).await;
    assert_eq!(
        response.error_category,
        Some(ErrorCategory::PreconditionFailed)
    );
    assert!(h.store.all_tasks().await.is_empty());
}

#[tokio::test]
async fn test_point_in_time_restore_needs_target() {
    let h = Harness::new();

    let request = RestoreRequest {
        restore_options: "--type=time".to_string(),
        ..restore_pg1()
    };
    let response = h.api.create_restore(&request).await;
    assert_eq!(
        response.error_category,
        Some(ErrorCategory::PreconditionFailed)
    );

    let request = RestoreRequest {
        restore_options: "--type=time".to_string(),
        pitr_target: "2025-01-01 00:00:00+00".to_string(),
        node_label: "zone=eu-1".to_string(),
        ..restore_pg1()
    };
    let response = h.api.create_restore(&request).await;
    assert!(response.is_ok(), "{:?}", response);
    let task = h.task("backrest-restore-pg1").await.unwrap();
    assert_eq!(
        task.parameters.get(params::NODE_LABEL_VALUE).map(String::as_str),
        Some("eu-1")
    );
}

#[tokio::test]
async fn test_restore_of_unknown_cluster() {
    let h = Harness::new();
    let request = RestoreRequest {
        from_cluster: "pg9".to_string(),
        ..restore_pg1()
    };
    let response = h.api.create_restore(&request).await;
    assert_eq!(response.error_category, Some(ErrorCategory::NotFound));
}
