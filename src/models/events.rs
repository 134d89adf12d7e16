// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Reload and health events delivered to external collaborators.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::identity::SemVer;

const EVENT_CAPACITY: usize = 256;

/// A session for `key` became serving (initial load, fallback or hot-reload).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReloaded {
    pub key: String,
    pub path: PathBuf,
    pub version: SemVer,
    pub loaded_at: DateTime<Utc>,
    pub is_healthy: bool,
}

/// A reload attempt for `key` failed validation; the previous session keeps serving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHealthChanged {
    pub key: String,
    pub path: PathBuf,
    pub is_healthy: bool,
    pub error_message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ModelEvent {
    Reloaded(ModelReloaded),
    HealthChanged(ModelHealthChanged),
}

/// Fan-out of [`ModelEvent`]s. Publishing never blocks and never fails the caller.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ModelEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModelEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn publish(&self, event: ModelEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub(crate) fn reloaded(&self, event: ModelReloaded) {
        tracing::debug!(key = %event.key, version = %event.version, "model reloaded event");
        self.publish(ModelEvent::Reloaded(event));
    }

    pub(crate) fn health_changed(&self, event: ModelHealthChanged) {
        tracing::warn!(
            key = %event.key,
            path = %event.path.display(),
            error = event.error_message.as_deref().unwrap_or(""),
            "model health changed"
        );
        self.publish(ModelEvent::HealthChanged(event));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
