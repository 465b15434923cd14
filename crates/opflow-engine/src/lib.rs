// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! opflow-engine - event-driven operation orchestration for managed Postgres clusters.
//!
//! Operations arrive as intents through [`api::EngineApi`]. An orchestrator
//! validates the intent, records a task and submits an execution unit.
//! The unit's completion comes back through a watch subscription, is
//! classified by the [`dispatch::Dispatcher`], and drives the next step.
//!
//! ```text
//!   intent ──► EngineApi ──► orchestrator ──► TaskStore + WorkSubmitter
//!                                 ▲                     │
//!                                 │                     ▼
//!                            Dispatcher ◄── WatchManager ◄── unit completes
//! ```
//!
//! # Operations
//!
//! | Operation | Steps | Workflow |
//! |-----------|-------|----------|
//! | Backup | one unit, then mailbox for bootstrap/failover backups | no |
//! | Restore | one unit | `restore-pvc-created` |
//! | Clone | repo sync, restore, cluster-create task | `clone-restore-backup`, `cluster-create` |
//! | Stanza | stanza-create, then a bootstrap backup | no |
//! | Failover | task only; promotion is done by the HA layer | no |
//! | Benchmark | one unit, success or failure both complete | `completed` |
//!
//! Collaborators are traits injected through [`context::EngineContext`]:
//! [`opflow_core::TaskStore`], [`submit::WorkSubmitter`],
//! [`inventory::ClusterInventory`], [`events::EventPublisher`] and
//! [`watcher::WatchSource`]. Each has an in-process implementation used by
//! the tests and by the binary.

pub mod api;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod inventory;
pub mod mailbox;
pub mod orchestrator;
pub mod runtime;
pub mod storage;
pub mod submit;
pub mod watcher;

pub use api::{EngineApi, OperationResponse, StatusCode};
pub use error::{Error, Result};
pub use runtime::EngineRuntime;
