// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! opflow-core - task records and workflow state for the opflow engine.
//!
//! This crate holds the durable side of the orchestration engine:
//!
//! - **Labels**: the routing and correlation vocabulary, and [`labels::UnitPurpose`]
//! - **Selectors**: equality-based label selectors used for every list query
//! - **Store**: the [`store::TaskStore`] trait with in-memory and SQLite backends
//! - **Workflows**: an append-only milestone ledger keyed by workflow id
//! - **Replacement**: delete-then-recreate for deterministic task names,
//!   built on a bounded [`retry::RetryPolicy`]
//!
//! The event-driven side (watchers, dispatch, orchestrators) lives in
//! `opflow-engine`.

pub mod error;
pub mod labels;
pub mod model;
pub mod replacement;
pub mod retry;
pub mod selector;
pub mod store;
pub mod workflow;

pub use error::{CoreError, ErrorCategory};
pub use labels::{BackupType, Labels, UnitPurpose};
pub use model::{ExecutionUnit, Milestone, Task, TaskStatus, TaskType, UnitStatus};
pub use replacement::{ReplacementOutcome, ReplacementPolicy, TimeoutAction};
pub use retry::{PollOutcome, RetryPolicy};
pub use selector::LabelSelector;
pub use store::{MemoryTaskStore, SqliteTaskStore, TaskStore};
pub use workflow::{WorkflowKind, WorkflowStatus, WorkflowTracker};
