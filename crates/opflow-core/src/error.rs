// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for opflow-core.
//!
//! Every failure is classified into one of five categories so that callers
//! can report a stable status without matching on individual variants.

use std::fmt;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Coarse classification reported back to callers of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Referenced cluster, task, workflow or replica is absent.
    NotFound,
    /// Capability disabled, wrong storage backend, ambiguous pod match, target is primary.
    PreconditionFailed,
    /// Duplicate in-flight operation for the same name.
    Conflict,
    /// Underlying create/get/delete failed.
    Store,
    /// A submitted execution unit reported failure.
    ExecutionFailure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::PreconditionFailed => "precondition_failed",
            Self::Conflict => "conflict",
            Self::Store => "store_error",
            Self::ExecutionFailure => "execution_failure",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core errors raised by the store, the workflow tracker and the replacement policy.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// A referenced record does not exist.
    NotFound {
        /// What kind of record was looked up ("cluster", "task", "workflow", ...).
        kind: &'static str,
        /// Name or identifier used for the lookup.
        name: String,
    },

    /// An operation's precondition does not hold.
    PreconditionFailed {
        /// Human-readable reason.
        message: String,
    },

    /// An operation collides with one already in flight.
    Conflict {
        /// Human-readable reason.
        message: String,
    },

    /// A conditional create found an existing record under the same name.
    AlreadyExists {
        /// Record kind.
        kind: &'static str,
        /// Record name.
        name: String,
    },

    /// Store operation failed.
    Store {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// An execution unit finished unsuccessfully.
    ExecutionFailure {
        /// Execution unit name.
        unit: String,
        /// Failure description.
        message: String,
    },

    /// Prior execution units were still present after the bounded wait.
    ReplacementTimeout {
        /// Selector that was polled.
        selector: String,
        /// Number of polls performed.
        attempts: u32,
    },
}

impl CoreError {
    /// Shorthand for a not-found error.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Shorthand for a precondition failure.
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            message: message.into(),
        }
    }

    /// Shorthand for a conflict.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Shorthand for a store failure.
    pub fn store(operation: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            details: details.into(),
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::PreconditionFailed { .. } => "PRECONDITION_FAILED",
            Self::Conflict { .. } => "CONFLICT",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::Store { .. } => "STORE_ERROR",
            Self::ExecutionFailure { .. } => "EXECUTION_FAILURE",
            Self::ReplacementTimeout { .. } => "REPLACEMENT_TIMEOUT",
        }
    }

    /// Map onto the caller-facing taxonomy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::PreconditionFailed { .. } => ErrorCategory::PreconditionFailed,
            Self::Conflict { .. } | Self::ReplacementTimeout { .. } => ErrorCategory::Conflict,
            Self::AlreadyExists { .. } | Self::Store { .. } => ErrorCategory::Store,
            Self::ExecutionFailure { .. } => ErrorCategory::ExecutionFailure,
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { kind, name } => write!(f, "no {} found named '{}'", kind, name),
            Self::PreconditionFailed { message } => f.write_str(message),
            Self::Conflict { message } => f.write_str(message),
            Self::AlreadyExists { kind, name } => {
                write!(f, "{} '{}' already exists", kind, name)
            }
            Self::Store { operation, details } => {
                write!(f, "store error during '{}': {}", operation, details)
            }
            Self::ExecutionFailure { unit, message } => {
                write!(f, "execution unit '{}' failed: {}", unit, message)
            }
            Self::ReplacementTimeout { selector, attempts } => write!(
                f,
                "execution units matching '{}' still present after {} attempts",
                selector, attempts
            ),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Store {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Store {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}
