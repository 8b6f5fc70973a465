// SPDX-FileCopyrightText: 2026 Msgstore Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the msgstore message store.
//!
//! Duplicate submissions and lost claim races are not errors: they are
//! reported through [`crate::types::StoreOutcome::Duplicate`] and a `false`
//! return from state transitions respectively.

use thiserror::Error;

/// The primary error type used across all msgstore traits and operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Invalid setup: missing mandatory column, unknown dialect, malformed query.
    #[error("configuration error: {0}")]
    Config(String),

    /// No record exists for the given key within the store's scope.
    #[error("no message found for key `{key}`")]
    NotFound { key: String },

    /// The database was locked by another connection for longer than the busy timeout.
    #[error("database busy: {0}")]
    Busy(String),

    /// Operation timed out and the running statement was interrupted.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Storage backend errors (connection failure, query failure).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A payload could not be serialized, compressed, or decoded.
    #[error("payload codec error: {0}")]
    Codec(String),

    /// A stored row did not have the expected shape.
    #[error("invalid stored data: {0}")]
    InvalidData(String),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether a poll loop should log this error and try again later.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Busy(_) | StoreError::Timeout { .. })
    }

    /// Whether this error leaves the caller free to continue with other keys.
    pub fn is_recoverable(&self) -> bool {
        self.is_transient() || matches!(self, StoreError::NotFound { .. })
    }

    /// Stable machine-readable code surfaced to administrative callers.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Config(_) => "configuration",
            StoreError::NotFound { .. } => "not_found",
            StoreError::Busy(_) => "busy",
            StoreError::Timeout { .. } => "timeout",
            StoreError::Storage { .. } => "storage",
            StoreError::Codec(_) => "codec",
            StoreError::InvalidData(_) => "invalid_data",
            StoreError::Internal(_) => "internal",
        }
    }

    pub fn not_found(key: impl std::fmt::Display) -> Self {
        StoreError::NotFound {
            key: key.to_string(),
        }
    }
}
