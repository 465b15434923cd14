// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Completion of cluster data removal.

use std::sync::Arc;

use opflow_core::{CoreError, ExecutionUnit, LabelSelector, PollOutcome, labels};
use tracing::{info, warn};

use super::unit_user;
use crate::context::EngineContext;
use crate::error::Result;
use crate::events::{self, CLUSTER_TOPIC, Event, EventHeader};

#[derive(Clone)]
pub struct CleanupOrchestrator {
    ctx: Arc<EngineContext>,
}

impl CleanupOrchestrator {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Handle a successful data-removal unit.
    ///
    /// Publishes the delete-complete event, removes the unit itself, then
    /// removes the cluster's remaining succeeded units. Returns how many
    /// of those were deleted.
    pub async fn on_remove_data_complete(&self, unit: &ExecutionUnit) -> Result<usize> {
        let ns = unit.namespace.as_str();
        let cluster = unit.cluster_name().ok_or_else(|| {
            CoreError::precondition(format!("unit {} has no cluster label", unit.name))
        })?;

        events::publish_or_log(
            self.ctx.publisher.as_ref(),
            Event::DeleteClusterCompleted {
                header: EventHeader::new(ns, unit_user(unit), &[CLUSTER_TOPIC]),
                cluster: cluster.to_string(),
            },
        )
        .await;

        self.ctx.store.delete_unit(ns, &unit.name).await?;
        let store = &self.ctx.store;
        let outcome = self
            .ctx
            .replacement
            .retry()
            .poll_until(|| async move {
                Ok::<_, CoreError>(store.get_unit(ns, &unit.name).await?.is_none())
            })
            .await?;
        if let PollOutcome::TimedOut { attempts } = outcome {
            warn!(namespace = %ns, unit = %unit.name, attempts, "Data removal unit still present");
        }

        let selector = LabelSelector::everything().eq(labels::PG_CLUSTER, cluster);
        let mut removed = 0;
        for leftover in self.ctx.store.list_units(ns, &selector).await? {
            if leftover.is_successful() && self.ctx.store.delete_unit(ns, &leftover.name).await? {
                removed += 1;
            }
        }

        info!(namespace = %ns, cluster = %cluster, removed, "Cluster data removed");
        Ok(removed)
    }
}
