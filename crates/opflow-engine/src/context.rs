// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dependencies shared by every orchestrator.

use std::sync::Arc;

use opflow_core::{ReplacementPolicy, TaskStore, WorkflowTracker};

use crate::config::EngineSettings;
use crate::events::EventPublisher;
use crate::inventory::ClusterInventory;
use crate::submit::WorkSubmitter;

/// Collaborators and settings, built once and handed to each orchestrator.
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn TaskStore>,
    pub submitter: Arc<dyn WorkSubmitter>,
    pub inventory: Arc<dyn ClusterInventory>,
    pub publisher: Arc<dyn EventPublisher>,
    pub tracker: WorkflowTracker,
    pub replacement: ReplacementPolicy,
    pub settings: EngineSettings,
}

impl EngineContext {
    pub fn new(
        store: Arc<dyn TaskStore>,
        submitter: Arc<dyn WorkSubmitter>,
        inventory: Arc<dyn ClusterInventory>,
        publisher: Arc<dyn EventPublisher>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            tracker: WorkflowTracker::new(store.clone()),
            replacement: ReplacementPolicy::new(
                store.clone(),
                settings.replacement_retry,
                settings.on_replacement_timeout,
            ),
            store,
            submitter,
            inventory,
            publisher,
            settings,
        }
    }
}
