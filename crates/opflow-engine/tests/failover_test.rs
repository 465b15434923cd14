// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Failover target validation and target queries.

mod common;

use common::*;
use opflow_core::{ErrorCategory, LabelSelector, MemoryTaskStore, TaskType, labels};
use opflow_engine::config::EngineSettings;
use opflow_engine::inventory::Deployment;
use opflow_engine::orchestrator::FailoverRequest;

fn failover_pg1(target: Option<&str>) -> FailoverRequest {
    FailoverRequest {
        namespace: NS.to_string(),
        cluster: "pg1".to_string(),
        target: target.map(str::to_string),
        username: USER.to_string(),
    }
}

#[tokio::test]
async fn test_target_validation() {
    let h = Harness::new();

    let primary = h.api.create_failover(&failover_pg1(Some("pg1"))).await;
    assert_eq!(
        primary.error_category,
        Some(ErrorCategory::PreconditionFailed)
    );

    let unknown = h.api.create_failover(&failover_pg1(Some("pg1-nope"))).await;
    assert_eq!(unknown.error_category, Some(ErrorCategory::NotFound));

    assert!(h.store.all_tasks().await.is_empty());
}

#[tokio::test]
async fn test_ambiguous_target_conflicts() {
    let snapshot = pg1_inventory()
        .deployment(Deployment::for_cluster(NS, "pg1", "pg1-rpl2"))
        .deployment(Deployment::for_cluster(NS, "pg1", "pg1-rpl2"));
    let h = Harness::with_inventory(snapshot);

    let response = h.api.create_failover(&failover_pg1(Some("pg1-rpl2"))).await;
    assert_eq!(response.error_category, Some(ErrorCategory::Conflict));
}

#[tokio::test]
async fn test_failover_replaces_stale_task() {
    let h = Harness::new();

    assert!(h.api.create_failover(&failover_pg1(None)).await.is_ok());
    let response = h.api.create_failover(&failover_pg1(Some("pg1-rpl1"))).await;
    assert!(response.is_ok(), "{:?}", response);

    let tasks = h.tasks_of(TaskType::Failover).await;
    assert_eq!(tasks.len(), 1);
    let task = &tasks[0];
    assert_eq!(task.name, "pg1-failover");
    assert_eq!(
        task.labels.get(labels::FAILOVER_TARGET).map(String::as_str),
        Some("pg1-rpl1")
    );
    assert_eq!(task.labels.get(labels::PGOUSER).map(String::as_str), Some(USER));
    assert!(h.submitter.submissions().await.is_empty());
}

#[tokio::test]
async fn test_query_failover_targets() {
    let settings = EngineSettings {
        preferred_failover_nodes: Some(LabelSelector::everything().eq("failover", "preferred")),
        ..test_settings()
    };
    let h = Harness::build(pg1_inventory(), MemoryTaskStore::new(), settings);

    let targets = h.api.query_failover_targets(NS, "pg1").await.unwrap();
    assert_eq!(targets.len(), 1);
    let replica = &targets[0];
    assert_eq!(replica.name, "pg1-rpl1");
    assert_eq!(replica.replication_lag, Some(800));
    assert_eq!(replica.node.as_deref(), Some("node-b"));
    assert!(replica.ready);
    assert!(replica.is_preferred);

    let err = h.api.query_failover_targets(NS, "pg9").await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::NotFound);
}

#[tokio::test]
async fn test_no_preferred_nodes_configured() {
    let h = Harness::new();
    let targets = h.api.query_failover_targets(NS, "pg1").await.unwrap();
    assert!(!targets[0].is_preferred);
}
