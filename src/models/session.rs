// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Resident sessions and the leases that pin them during inference.

use std::ops::Deref;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identity::ModelIdentity;
use crate::engine::{InferenceSession, ModelError, Tensor, TensorSpec};

/// Metadata computed when a model file is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_path: PathBuf,
    pub identity: ModelIdentity,
    /// Uppercase hex SHA-256 of the file.
    pub content_hash: String,
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub loaded_at: DateTime<Utc>,
    pub is_healthy: bool,
}

impl ModelMetadata {
    pub fn cache_key(&self) -> String {
        self.identity.cache_key()
    }

    pub fn versioned_key(&self) -> String {
        self.identity.versioned_key()
    }
}

/// A health-validated runtime session plus its usage statistics.
///
/// Only constructed after the session passed its health probe (or with
/// probing explicitly disabled by the caller).
pub struct LoadedSession {
    session: Box<dyn InferenceSession>,
    metadata: ModelMetadata,
    memory_bytes: usize,
    loaded_at: Instant,
    usage_count: AtomicU64,
    /// Microseconds after `loaded_at`.
    last_used_offset: AtomicU64,
    in_flight: AtomicU32,
}

impl LoadedSession {
    pub(crate) fn new(session: Box<dyn InferenceSession>, metadata: ModelMetadata) -> Self {
        // Sessions that cannot account for themselves are charged their file size.
        let reported = session.memory_bytes();
        let memory_bytes = if reported > 0 { reported } else { metadata.size_bytes as usize };
        Self {
            session,
            metadata,
            memory_bytes,
            loaded_at: Instant::now(),
            usage_count: AtomicU64::new(0),
            last_used_offset: AtomicU64::new(0),
            in_flight: AtomicU32::new(0),
        }
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn inputs(&self) -> &[TensorSpec] {
        self.session.inputs()
    }

    pub fn memory_bytes(&self) -> usize {
        self.memory_bytes
    }

    pub fn usage_count(&self) -> u64 {
        self.usage_count.load(Ordering::Acquire)
    }

    pub fn loaded_at(&self) -> Instant {
        self.loaded_at
    }

    pub fn last_used(&self) -> Instant {
        self.loaded_at + Duration::from_micros(self.last_used_offset.load(Ordering::Acquire))
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used().elapsed()
    }

    /// Concurrent leases currently pinning this session.
    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Record a reuse: bump the usage count and the last-used time.
    pub(crate) fn touch(&self) {
        self.usage_count.fetch_add(1, Ordering::AcqRel);
        let offset = self.loaded_at.elapsed().as_micros().min(u64::MAX as u128) as u64;
        self.last_used_offset.fetch_max(offset, Ordering::AcqRel);
    }

    /// Run inference directly on the underlying session.
    pub fn run(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>, ModelError> {
        self.session.run(inputs)
    }
}

impl std::fmt::Debug for LoadedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedSession")
            .field("key", &self.metadata.versioned_key())
            .field("memory_bytes", &self.memory_bytes)
            .field("usage_count", &self.usage_count())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// RAII handle to a resident session. While any lease is alive the
/// session is never chosen for memory reclamation, and the `Arc` keeps it
/// alive even if it is removed from the cache.
pub struct ModelLease {
    session: Arc<LoadedSession>,
}

impl ModelLease {
    /// Pin `session` and record a use.
    pub(crate) fn acquire(session: Arc<LoadedSession>) -> Self {
        let lease = Self::pin(session);
        lease.session.touch();
        lease
    }

    /// Pin `session` without counting a use. Admission hands out this lease.
    pub(crate) fn pin(session: Arc<LoadedSession>) -> Self {
        session.in_flight.fetch_add(1, Ordering::AcqRel);
        Self { session }
    }

    pub fn session(&self) -> &Arc<LoadedSession> {
        &self.session
    }
}

impl Deref for ModelLease {
    type Target = LoadedSession;

    fn deref(&self) -> &LoadedSession {
        &self.session
    }
}

impl Clone for ModelLease {
    fn clone(&self) -> Self {
        self.session.in_flight.fetch_add(1, Ordering::AcqRel);
        Self {
            session: self.session.clone(),
        }
    }
}

impl Drop for ModelLease {
    fn drop(&mut self) {
        self.session.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for ModelLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ModelLease").field(&self.session).finish()
    }
}
