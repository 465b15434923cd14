// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Routing of execution-unit completions to orchestrators.
//!
//! Each unit is classified once into a [`UnitPurpose`]; the classification
//! order is the priority order. Only the transition into a triggering
//! state dispatches, so a resync that re-delivers a finished unit does
//! not run its side effects twice.

use std::sync::Arc;

use async_trait::async_trait;
use opflow_core::{CoreError, ExecutionUnit, TaskStatus, UnitPurpose};
use tracing::{debug, error, info, warn};

use crate::context::EngineContext;
use crate::error::{Error, Result};
use crate::orchestrator::Orchestrators;
use crate::watcher::UnitEventHandler;

/// Why a unit was not routed anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// The unit carries the foreground-deletion finalizer.
    BeingDeleted,
    /// No purpose matched the unit's labels.
    Unrecognized,
}

/// Where a unit in its current state goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Hand to the purpose's completion handler.
    Dispatch(UnitPurpose),
    /// Finished unsuccessfully; recorded on the task, workflow untouched.
    Failed(UnitPurpose),
    /// Still running.
    Pending(UnitPurpose),
    Discard(DiscardReason),
}

impl Route {
    /// Whether reaching this route should run a handler.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::Dispatch(_) | Self::Failed(_))
    }
}

/// Decide where `unit` goes. Pure; reads labels, finalizers and status only.
pub fn route(unit: &ExecutionUnit) -> Route {
    if unit.in_foreground_deletion() {
        return Route::Discard(DiscardReason::BeingDeleted);
    }
    let Some(purpose) = UnitPurpose::classify(&unit.labels) else {
        return Route::Discard(DiscardReason::Unrecognized);
    };

    if purpose.reports_failures() {
        return if unit.is_terminal() {
            Route::Dispatch(purpose)
        } else {
            Route::Pending(purpose)
        };
    }

    if unit.is_successful() {
        Route::Dispatch(purpose)
    } else if unit.is_failed() {
        Route::Failed(purpose)
    } else {
        Route::Pending(purpose)
    }
}

/// Watch handler that feeds unit completions to the orchestrators.
#[derive(Clone)]
pub struct Dispatcher {
    ctx: Arc<EngineContext>,
    orchestrators: Orchestrators,
}

impl Dispatcher {
    pub fn new(ctx: Arc<EngineContext>, orchestrators: Orchestrators) -> Self {
        Self { ctx, orchestrators }
    }

    /// Route `unit` in its current state and run the matching handler.
    ///
    /// Handler errors are logged, not returned: the unit's completion has
    /// already happened and there is nobody upstream to retry it.
    pub async fn dispatch(&self, unit: &ExecutionUnit) -> Route {
        let route = route(unit);
        let outcome = match route {
            Route::Dispatch(purpose) => self.run_handler(purpose, unit).await,
            Route::Failed(purpose) => self.record_failure(purpose, unit).await,
            Route::Pending(purpose) => {
                debug!(unit = %unit.name, purpose = purpose.name(), "Unit still running");
                Ok(())
            }
            Route::Discard(reason) => {
                debug!(namespace = %unit.namespace, unit = %unit.name, ?reason, "Discarding unit event");
                Ok(())
            }
        };

        if let Err(e) = outcome {
            error!(
                namespace = %unit.namespace,
                unit = %unit.name,
                route = ?route,
                error = %e,
                "Unit handler failed"
            );
        }
        route
    }

    async fn run_handler(&self, purpose: UnitPurpose, unit: &ExecutionUnit) -> Result<()> {
        debug!(unit = %unit.name, purpose = purpose.name(), "Dispatching unit");
        let o = &self.orchestrators;
        match purpose {
            UnitPurpose::CloneRepoSync => o.clone.on_step1_complete(unit).await,
            UnitPurpose::CloneRestore => o.clone.on_step2_complete(unit).await,
            UnitPurpose::RemoveData => o.cleanup.on_remove_data_complete(unit).await.map(|_| ()),
            UnitPurpose::Backup { backup_type } => o.backup.on_complete(unit, backup_type).await,
            UnitPurpose::StanzaCreate => o.stanza.on_complete(unit).await,
            UnitPurpose::Restore => o.restore.on_complete(unit).await,
            UnitPurpose::Benchmark => o.benchmark.on_terminal(unit).await,
            UnitPurpose::Load => {
                info!(namespace = %unit.namespace, unit = %unit.name, "Load completed");
                Ok(())
            }
        }
    }

    async fn record_failure(&self, purpose: UnitPurpose, unit: &ExecutionUnit) -> Result<()> {
        let failure = CoreError::ExecutionFailure {
            unit: unit.name.clone(),
            message: format!("{} unit failed", purpose.name()),
        };
        warn!(
            namespace = %unit.namespace,
            cluster = unit.cluster_name().unwrap_or_default(),
            unit = %unit.name,
            "{}",
            failure
        );

        match self
            .ctx
            .store
            .set_task_status(
                &unit.namespace,
                unit.task_name(),
                TaskStatus::Error,
                Some(&failure.to_string()),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(CoreError::NotFound { .. }) => {
                debug!(unit = %unit.name, task = unit.task_name(), "No task recorded for failed unit");
                Ok(())
            }
            Err(e) => Err(Error::from(e)),
        }
    }
}

#[async_trait]
impl UnitEventHandler for Dispatcher {
    /// A unit can be first seen already finished: it completed between two
    /// listings, or while the engine was down. Those are dispatched unless
    /// their task already carries the outcome.
    async fn on_add(&self, unit: &ExecutionUnit) {
        let purpose = match route(unit) {
            Route::Dispatch(purpose) | Route::Failed(purpose) => purpose,
            _ => {
                debug!(namespace = %unit.namespace, unit = %unit.name, "Unit added");
                return;
            }
        };

        if purpose.tracked_by_task() {
            match self
                .ctx
                .store
                .get_task(&unit.namespace, unit.task_name())
                .await
            {
                Ok(Some(task)) if !task.status.is_settled() => {}
                Ok(Some(task)) => {
                    debug!(unit = %unit.name, status = %task.status, "Unit outcome already recorded");
                    return;
                }
                Ok(None) => {
                    debug!(unit = %unit.name, task = unit.task_name(), "No task for finished unit, skipping");
                    return;
                }
                Err(e) => {
                    warn!(unit = %unit.name, error = %e, "Failed to look up task of finished unit");
                    return;
                }
            }
        }

        info!(namespace = %unit.namespace, unit = %unit.name, purpose = purpose.name(), "Unit first seen finished");
        self.dispatch(unit).await;
    }

    async fn on_update(&self, old: &ExecutionUnit, new: &ExecutionUnit) {
        let before = route(old);
        let after = route(new);
        if after.is_actionable() && before != after {
            self.dispatch(new).await;
        } else {
            debug!(unit = %new.name, route = ?after, "No transition, skipping");
        }
    }

    async fn on_delete(&self, unit: &ExecutionUnit) {
        debug!(namespace = %unit.namespace, unit = %unit.name, "Unit deleted");
    }
}
