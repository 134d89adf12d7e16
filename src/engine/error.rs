// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for model loading, caching and inference.
//!
//! All errors are fail-closed: a model that cannot be proven healthy is
//! never served. Variants carry strings rather than sources so a single
//! failure can be cloned out to every request of a batch group.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the loader, the cache manager and the batch scheduler.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("Model file not found: {0}")]
    NotFound(PathBuf),

    #[error("Corrupt model artifact {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Failed to load model {path}: {reason}")]
    LoadFailed { path: PathBuf, reason: String },

    #[error("Model {path} failed health probe: {reason}")]
    Unhealthy { path: PathBuf, reason: String },

    #[error("Memory exhausted: resident {resident} bytes, ceiling {ceiling} bytes")]
    ResourceExhausted { resident: usize, ceiling: usize },

    #[error("Inference timeout after {0}ms")]
    Timeout(u64),

    #[error("Publish conflict: {0}")]
    PublishConflict(String),

    #[error("No model available for {key} (tried {tried:?})")]
    NoModelAvailable { key: String, tried: Vec<PathBuf> },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Inference failed: {0}")]
    ExecutionFailed(String),

    #[error("Request queue full ({0} pending)")]
    QueueFull(usize),

    #[error("Runtime is shutting down")]
    ShuttingDown,
}

impl ModelError {
    /// Returns true if the fallback chain should move on to the next candidate.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::Corrupt { .. }
                | Self::LoadFailed { .. }
                | Self::Unhealthy { .. }
        )
    }

    /// Returns true if this error should be logged as a warning rather than an error.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::NotFound(_))
    }

    pub(crate) fn load_failed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::LoadFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
