// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Label taxonomy shared by task records and execution units.
//!
//! Labels serve two roles: they route completion events to the owning
//! orchestrator, and they carry correlation state (cluster, workflow id,
//! requesting user) between the steps of a multi-step operation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Label map attached to tasks and execution units.
pub type Labels = BTreeMap<String, String>;

// Correlation labels
pub const PG_CLUSTER: &str = "pg-cluster";
pub const PG_CLUSTER_IDENTIFIER: &str = "pg-cluster-id";
pub const PGOUSER: &str = "pgouser";
pub const PG_TASK: &str = "pg-task";
pub const WORKFLOW_ID: &str = "workflowid";
pub const VENDOR: &str = "vendor";
pub const VENDOR_VALUE: &str = "opflow";

// Dispatch labels
pub const BACKREST: &str = "pgo-backrest";
pub const BACKREST_COMMAND: &str = "backrest-command";
pub const BACKREST_RESTORE: &str = "pgo-backrest-restore";
pub const CLONE: &str = "pgo-clone";
pub const CLONE_STEP: &str = "pgo-clone-step";
pub const BENCHMARK: &str = "pgo-benchmark";
pub const LOAD: &str = "pgo-load";
pub const RMDATA: &str = "pgrmdata";
pub const BACKUP_TYPE: &str = "pgha-backup-type";

// Placement and role labels
pub const BACKREST_REPO: &str = "pgo-backrest-repo";
pub const BACKREST_STORAGE_TYPE: &str = "backrest-storage-type";
pub const DEPLOYMENT_NAME: &str = "deployment-name";
pub const ROLE: &str = "role";
pub const ROLE_PRIMARY: &str = "master";
pub const ROLE_REPLICA: &str = "replica";
pub const FAILOVER_TARGET: &str = "target";

// Annotations carried on execution units
pub const ANNOTATION_POD_NAME: &str = "podname";
pub const ANNOTATION_CLONE_SOURCE: &str = "clone-source-cluster-name";
pub const ANNOTATION_CLONE_TARGET: &str = "clone-target-cluster-name";
pub const ANNOTATION_RESTORE_TO_PVC: &str = "backrest-restore-to-pvc";

pub const TRUE: &str = "true";

pub const COMMAND_BACKUP: &str = "backup";
pub const COMMAND_RESTORE: &str = "restore";
pub const COMMAND_STANZA_CREATE: &str = "stanza-create";

/// Returns true when `key` is present with the value `"true"`.
pub fn is_true(labels: &Labels, key: &str) -> bool {
    labels.get(key).is_some_and(|v| v == TRUE)
}

/// Returns true for records created by this engine.
pub fn is_vendor_owned(labels: &Labels) -> bool {
    labels.get(VENDOR).is_some_and(|v| v == VENDOR_VALUE)
}

/// Why a backup was taken, as recorded in [`BACKUP_TYPE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    /// First full backup after the stanza is created.
    Bootstrap,
    /// Backup taken after a promotion.
    Failover,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bootstrap => "bootstrap",
            Self::Failover => "failover",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "bootstrap" => Some(Self::Bootstrap),
            "failover" => Some(Self::Failover),
            _ => None,
        }
    }
}

/// What an execution unit was submitted for.
///
/// Variant order is the dispatch priority: a unit is classified as the
/// first variant whose labels match. Clone steps come first because the
/// step-2 unit also carries the generic restore label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitPurpose {
    /// Clone step 1: repository sync from the source cluster.
    CloneRepoSync,
    /// Clone step 2: point-in-time restore into the target volume.
    CloneRestore,
    /// Cluster data removal.
    RemoveData,
    /// pgBackRest backup.
    Backup {
        /// Set for backups the engine takes on its own behalf.
        backup_type: Option<BackupType>,
    },
    /// Stanza creation for a freshly provisioned cluster.
    StanzaCreate,
    /// In-place restore.
    Restore,
    /// pgbench run.
    Benchmark,
    /// Data load.
    Load,
}

impl UnitPurpose {
    /// Classify a label set, or `None` if the unit is not ours to handle.
    pub fn classify(labels: &Labels) -> Option<Self> {
        let command = labels.get(BACKREST_COMMAND).map(String::as_str);

        if is_true(labels, CLONE) || labels.contains_key(CLONE_STEP) {
            match labels.get(CLONE_STEP).map(String::as_str) {
                Some("1") => return Some(Self::CloneRepoSync),
                Some("2") => return Some(Self::CloneRestore),
                // step 3 has no execution unit of its own
                _ => {}
            }
        }

        if is_true(labels, RMDATA) {
            return Some(Self::RemoveData);
        }

        if command == Some(COMMAND_BACKUP) {
            return Some(Self::Backup {
                backup_type: labels
                    .get(BACKUP_TYPE)
                    .and_then(|v| BackupType::parse(v)),
            });
        }

        if command == Some(COMMAND_STANZA_CREATE) {
            return Some(Self::StanzaCreate);
        }

        if is_true(labels, BACKREST_RESTORE) || command == Some(COMMAND_RESTORE) {
            return Some(Self::Restore);
        }

        if is_true(labels, BENCHMARK) {
            return Some(Self::Benchmark);
        }

        if is_true(labels, LOAD) {
            return Some(Self::Load);
        }

        None
    }

    /// Whether failed units are routed too, not only successful ones.
    pub fn reports_failures(&self) -> bool {
        matches!(self, Self::Benchmark)
    }

    /// Whether units of this purpose report their outcome on a task record.
    pub fn tracked_by_task(&self) -> bool {
        !matches!(self, Self::RemoveData | Self::Load)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CloneRepoSync => "clone-repo-sync",
            Self::CloneRestore => "clone-restore",
            Self::RemoveData => "remove-data",
            Self::Backup { .. } => "backup",
            Self::StanzaCreate => "stanza-create",
            Self::Restore => "restore",
            Self::Benchmark => "benchmark",
            Self::Load => "load",
        }
    }
}
