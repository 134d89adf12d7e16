// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Batch cycle: drain, group by model, execute, scatter.
//!
//! Callers enqueue requests with [`BatchScheduler::infer`] and wait on their
//! result slot. The batch loop runs one cycle per interval.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::batch::{chunk, expected_features, group_by_model, run_stacked, BatchConfig};
use super::queue::{InferenceRequest, RequestQueue, RequestQueueConfig};
use crate::engine::ModelError;
use crate::models::{ModelLease, ModelLoader};
use crate::tasks::spawn_periodic;
use crate::telemetry;

pub struct BatchScheduler {
    config: BatchConfig,
    queue: RequestQueue,
    loader: Arc<ModelLoader>,
    accepting: AtomicBool,
    cycle_lock: tokio::sync::Mutex<()>,
}

impl BatchScheduler {
    pub fn new(
        config: BatchConfig,
        queue_config: RequestQueueConfig,
        loader: Arc<ModelLoader>,
    ) -> Self {
        Self {
            config,
            queue: RequestQueue::new(queue_config),
            loader,
            accepting: AtomicBool::new(true),
            cycle_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Reject new requests; queued ones are still served.
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    /// Submit one feature vector and wait for its output row.
    ///
    /// Fails with `Timeout` if no result arrives within the request timeout;
    /// the request is then dropped from the queue, or its result discarded if
    /// a batch is already executing it.
    pub async fn infer(
        &self,
        model_path: &Path,
        features: Vec<f32>,
    ) -> Result<Vec<f32>, ModelError> {
        if !self.is_accepting() {
            return Err(ModelError::ShuttingDown);
        }
        if features.is_empty() {
            return Err(ModelError::InvalidInput("empty feature vector".into()));
        }

        let (request, rx) = InferenceRequest::new(model_path.to_path_buf(), features);
        let id = request.id;
        let cancel = request.cancel_handle();
        self.queue.push(request)?;

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ModelError::ExecutionFailed(
                "request dropped before completion".into(),
            )),
            Err(_) => {
                cancel.store(true, Ordering::Release);
                self.queue.remove(id);
                telemetry::record_request_timeout();
                let timeout_ms = self.config.request_timeout.as_millis() as u64;
                tracing::warn!(
                    request_id = %id,
                    model = %model_path.display(),
                    timeout_ms,
                    "inference request timed out"
                );
                Err(ModelError::Timeout(timeout_ms))
            }
        }
    }

    /// Run one batch cycle. Returns the number of requests drained.
    pub async fn run_cycle(&self) -> usize {
        let _cycle = self.cycle_lock.lock().await;
        let requests = self.queue.drain(self.config.drain_limit());
        let drained = requests.len();
        if drained == 0 {
            return 0;
        }

        let groups = group_by_model(requests);
        let work = groups
            .into_iter()
            .map(|(path, members)| self.process_group(path, members));
        join_all(work).await;
        drained
    }

    /// Run cycles until the queue is empty.
    pub async fn drain(&self) {
        while self.run_cycle().await > 0 {}
    }

    async fn process_group(&self, path: PathBuf, members: Vec<InferenceRequest>) {
        let lease = match self.loader.acquire(&path).await {
            Ok(lease) => lease,
            Err(err) => {
                tracing::warn!(
                    model = %path.display(),
                    requests = members.len(),
                    error = %err,
                    "batch group load failed"
                );
                for request in members {
                    request.complete(Err(err.clone()));
                }
                return;
            }
        };

        for sub_batch in chunk(members, self.config.max_batch_size) {
            self.execute(&path, &lease, sub_batch).await;
        }
    }

    async fn execute(&self, path: &Path, lease: &ModelLease, requests: Vec<InferenceRequest>) {
        let expected = expected_features(lease);
        let (valid, invalid): (Vec<_>, Vec<_>) = requests
            .into_iter()
            .partition(|r| expected.map_or(true, |n| r.features.len() == n));
        for request in invalid {
            let got = request.features.len();
            request.complete(Err(ModelError::InvalidInput(format!(
                "expected {} features, got {}",
                expected.unwrap_or(0),
                got
            ))));
        }
        if valid.is_empty() {
            return;
        }

        let started = Instant::now();
        let session = lease.clone();
        let task = tokio::task::spawn_blocking(move || {
            let result = {
                let rows: Vec<&[f32]> = valid.iter().map(|r| r.features.as_slice()).collect();
                run_stacked(&session, &rows)
            };
            (valid, result)
        });
        let (valid, result) = match task.await {
            Ok(done) => done,
            Err(e) => {
                // Requests moved into the panicked task; their slots drop with it.
                tracing::error!(
                    model = %path.display(),
                    error = %e,
                    "batch task panicked"
                );
                return;
            }
        };

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        telemetry::record_batch(valid.len(), latency_ms);
        match result {
            Ok(rows) => {
                tracing::debug!(
                    model = %path.display(),
                    size = valid.len(),
                    latency_ms,
                    "batch executed"
                );
                for (request, row) in valid.into_iter().zip(rows) {
                    request.complete(Ok(row));
                }
            }
            Err(err) => {
                tracing::warn!(
                    model = %path.display(),
                    size = valid.len(),
                    error = %err,
                    "batch execution failed"
                );
                for request in valid {
                    request.complete(Err(err.clone()));
                }
            }
        }
    }
}

/// Spawn the batch loop. Stops when `shutdown` is cancelled.
pub fn spawn_batch_loop(
    scheduler: Arc<BatchScheduler>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let interval = scheduler.config.interval;
    spawn_periodic("batch", interval, shutdown, move || {
        let scheduler = scheduler.clone();
        async move {
            scheduler.run_cycle().await;
            Ok::<(), ModelError>(())
        }
    })
}
