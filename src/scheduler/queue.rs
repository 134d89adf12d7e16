// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Pending inference requests.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::engine::ModelError;

/// Result slot of one request: one output row.
pub type ResultTx = oneshot::Sender<Result<Vec<f32>, ModelError>>;
pub type ResultRx = oneshot::Receiver<Result<Vec<f32>, ModelError>>;

#[derive(Debug, Clone)]
pub struct RequestQueueConfig {
    pub max_pending: usize,
}

impl Default for RequestQueueConfig {
    fn default() -> Self {
        Self { max_pending: 4096 }
    }
}

/// One single-sample inference request.
pub struct InferenceRequest {
    pub id: Uuid,
    pub model_path: PathBuf,
    pub features: Vec<f32>,
    pub submitted_at: Instant,
    cancelled: Arc<AtomicBool>,
    result_tx: ResultTx,
}

impl InferenceRequest {
    /// Create a request and the receiver its caller waits on.
    pub fn new(model_path: PathBuf, features: Vec<f32>) -> (Self, ResultRx) {
        let (result_tx, result_rx) = oneshot::channel();
        let request = Self {
            id: Uuid::new_v4(),
            model_path,
            features,
            submitted_at: Instant::now(),
            cancelled: Arc::new(AtomicBool::new(false)),
            result_tx,
        };
        (request, result_rx)
    }

    /// Shared flag the waiting caller sets when it gives up.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fulfil the result slot. A caller that already gave up is ignored.
    pub fn complete(self, result: Result<Vec<f32>, ModelError>) {
        let _ = self.result_tx.send(result);
    }
}

impl std::fmt::Debug for InferenceRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceRequest")
            .field("id", &self.id)
            .field("model_path", &self.model_path)
            .field("features", &self.features.len())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// FIFO of requests waiting for the next batch cycle.
pub struct RequestQueue {
    config: RequestQueueConfig,
    pending: Mutex<VecDeque<InferenceRequest>>,
}

impl RequestQueue {
    pub fn new(config: RequestQueueConfig) -> Self {
        Self {
            config,
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, request: InferenceRequest) -> Result<(), ModelError> {
        let mut pending = self.pending.lock();
        if pending.len() >= self.config.max_pending {
            return Err(ModelError::QueueFull(pending.len()));
        }
        pending.push_back(request);
        Ok(())
    }

    /// Take up to `max` live requests in submission order. Cancelled ones are dropped.
    pub fn drain(&self, max: usize) -> Vec<InferenceRequest> {
        let mut pending = self.pending.lock();
        let mut taken = Vec::with_capacity(max.min(pending.len()));
        while taken.len() < max {
            let Some(request) = pending.pop_front() else { break };
            if !request.is_cancelled() {
                taken.push(request);
            }
        }
        taken
    }

    /// Remove a request that has not been drained yet.
    pub fn remove(&self, id: Uuid) -> bool {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|r| r.id != id);
        pending.len() != before
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new(RequestQueueConfig::default())
    }
}
