// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for opflow-engine.

use opflow_core::{CoreError, ErrorCategory};
use thiserror::Error;

/// Engine errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Task store, workflow or precondition failure.
    #[error("{0}")]
    Core(#[from] CoreError),

    /// Work submission failed.
    #[error("Submit error: {0}")]
    Submit(#[from] crate::submit::SubmitError),

    /// Request validation failed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Map onto the caller-facing taxonomy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Core(e) => e.category(),
            Self::InvalidRequest(_) => ErrorCategory::PreconditionFailed,
            Self::Config(_) | Self::Submit(_) => ErrorCategory::Store,
        }
    }
}

/// Result type using Engine Error.
pub type Result<T> = std::result::Result<T, Error>;
