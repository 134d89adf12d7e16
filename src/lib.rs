// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! MSCORE Runtime
//!
//! Model-serving core for trading decision paths: a versioned artifact
//! store, a loader with fallback chain and hot-reload, a memory-bounded
//! session cache, and a batched inference scheduler.
//!
//! # Serving guarantees
//!
//! - A session is never handed to a caller before its health probe passed.
//! - Hot-reload swaps only after the new version is healthy; the old version
//!   keeps serving on failure.
//! - Eviction never frees a session with in-flight inference.
//! - Admission fails with `ResourceExhausted` rather than serving beyond the
//!   memory ceiling.

pub mod cli;
pub mod config;
pub mod engine;
pub mod health;
pub mod memory;
pub mod models;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod tasks;
pub mod telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use config::EnvConfig;
use engine::{BackendSet, ModelError};
use health::{HealthChecker, HealthConfig, HealthInputs, HealthReport};
use memory::{CacheConfig, MemorySnapshot, ModelCache, PressureLevel};
use models::{
    scan_models, EventBus, LoaderConfig, ModelEvent, ModelIdentity, ModelLease, ModelLoader,
    ModelMetadata,
};
use scheduler::{spawn_batch_loop, BatchConfig, BatchScheduler, RequestQueueConfig};
use shutdown::{ShutdownCoordinator, ShutdownResult};
use store::{ArtifactStore, StoreConfig, StoreError};
use tasks::spawn_periodic;

type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub models_dir: PathBuf,
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub batch: BatchConfig,
    pub request_queue: RequestQueueConfig,
    pub health: HealthConfig,
    pub sweep_interval: Duration,
    pub reload_interval: Duration,
    pub store_health_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from(&EnvConfig::default())
    }
}

impl From<&EnvConfig> for RuntimeConfig {
    fn from(env: &EnvConfig) -> Self {
        Self {
            models_dir: env.models_dir.clone(),
            store: env.store.clone(),
            cache: env.cache.clone(),
            batch: env.batch.clone(),
            request_queue: env.request_queue.clone(),
            health: HealthConfig {
                require_model_loaded: false,
                max_queue_depth: env.request_queue.max_pending,
            },
            sweep_interval: env.sweep_interval,
            reload_interval: env.reload_interval,
            store_health_interval: env.store_health_interval,
        }
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Artifact store unavailable: {0}")]
    Store(#[from] StoreError),
}

/// The MSCORE runtime instance.
pub struct Runtime {
    config: RuntimeConfig,
    store: Arc<ArtifactStore>,
    cache: Arc<ModelCache>,
    loader: Arc<ModelLoader>,
    scheduler: Arc<BatchScheduler>,
    health: HealthChecker,
    shutdown: ShutdownCoordinator,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Runtime {
    /// Create a runtime. Background tasks start with [`start`](Self::start).
    pub fn new(config: RuntimeConfig, backends: BackendSet) -> Result<Self, RuntimeError> {
        let store = Arc::new(ArtifactStore::open(config.store.clone())?);
        let cache = Arc::new(ModelCache::new(config.cache.clone()));
        let loader = Arc::new(ModelLoader::new(
            LoaderConfig {
                models_dir: config.models_dir.clone(),
            },
            cache.clone(),
            backends,
            EventBus::new(),
        ));
        let scheduler = Arc::new(BatchScheduler::new(
            config.batch.clone(),
            config.request_queue.clone(),
            loader.clone(),
        ));
        let health = HealthChecker::new(config.health.clone());

        Ok(Self {
            config,
            store,
            cache,
            loader,
            scheduler,
            health,
            shutdown: ShutdownCoordinator::new(),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    pub fn loader(&self) -> &Arc<ModelLoader> {
        &self.loader
    }

    pub fn scheduler(&self) -> &Arc<BatchScheduler> {
        &self.scheduler
    }

    /// Spawn the batch loop, the reclamation sweep, the hot-reload poll and
    /// the store health report. Calling it twice is a no-op.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        tasks.push(spawn_batch_loop(self.scheduler.clone(), self.cancel.clone()));

        let cache = self.cache.clone();
        let interval = self.config.sweep_interval;
        tasks.push(spawn_periodic("reclaim", interval, self.cancel.clone(), move || {
            let cache = cache.clone();
            async move {
                reclaim(&cache);
                Ok::<(), TaskError>(())
            }
        }));

        let loader = self.loader.clone();
        let interval = self.config.reload_interval;
        tasks.push(spawn_periodic("hot_reload", interval, self.cancel.clone(), move || {
            let loader = loader.clone();
            async move {
                let report = loader.poll_reload().await;
                if !report.swapped.is_empty() || !report.failed.is_empty() {
                    tracing::info!(
                        swapped = ?report.swapped,
                        failed = ?report.failed,
                        "hot-reload poll finished"
                    );
                }
                Ok::<(), TaskError>(())
            }
        }));

        let store = self.store.clone();
        let interval = self.config.store_health_interval;
        tasks.push(spawn_periodic("store_health", interval, self.cancel.clone(), move || {
            let store = store.clone();
            async move {
                let report = tokio::task::spawn_blocking(move || store.health_check()).await??;
                for issue in report.issues() {
                    tracing::warn!(
                        model = %issue.model_name,
                        version = %issue.version,
                        status = ?issue.status,
                        expired = issue.expired,
                        "artifact store issue"
                    );
                }
                tracing::info!(
                    entries = report.entries.len(),
                    healthy = report.is_healthy(),
                    "artifact store checked"
                );
                Ok::<(), TaskError>(())
            }
        }));

        tracing::info!(tasks = tasks.len(), "runtime started");
    }

    /// Load a model by path. With `version`, the file of that semantic
    /// version next to `path` is loaded and made the serving version.
    pub async fn load_model(
        &self,
        path: &Path,
        version: Option<&str>,
    ) -> Result<ModelLease, ModelError> {
        let _guard = self.shutdown.track().ok_or(ModelError::ShuttingDown)?;
        match version {
            None => self.loader.load(path, true).await,
            Some(version) => {
                let resolved = resolve_version(path, version)?;
                self.loader.load_exact(&resolved, true).await
            }
        }
    }

    pub fn get_loaded_model(&self, key: &str) -> Option<ModelLease> {
        self.loader.get_loaded(key)
    }

    pub fn get_model_metadata(&self, key: &str) -> Option<ModelMetadata> {
        self.loader.metadata(key)
    }

    pub fn unload_model(&self, key: &str) -> bool {
        self.loader.unload(key)
    }

    pub fn memory_snapshot(&self) -> MemorySnapshot {
        self.cache.snapshot()
    }

    /// Submit one feature vector to the batch scheduler.
    pub async fn infer_batched(
        &self,
        path: &Path,
        features: Vec<f32>,
    ) -> Result<Vec<f32>, ModelError> {
        let _guard = self.shutdown.track().ok_or(ModelError::ShuttingDown)?;
        self.scheduler.infer(path, features).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModelEvent> {
        self.loader.events().subscribe()
    }

    pub fn is_alive(&self) -> bool {
        self.health.is_alive()
    }

    pub fn is_ready(&self) -> bool {
        self.health.is_ready(&self.health_inputs())
    }

    pub fn health_report(&self) -> HealthReport {
        self.health.report(&self.health_inputs())
    }

    fn health_inputs(&self) -> HealthInputs {
        HealthInputs {
            shutdown: self.shutdown.state(),
            models_loaded: self.cache.len(),
            resident_bytes: self.cache.resident_bytes(),
            memory_ceiling: self.cache.config().limits.max_memory_bytes,
            pressure: self.cache.pressure_level(),
            queue_depth: self.scheduler.pending(),
            detected_leaks: self.cache.detected_leaks().len(),
        }
    }

    /// Stop accepting work, wait for in-flight calls, then stop background
    /// tasks and release every session.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownResult {
        self.scheduler.stop_accepting();
        let result = self.shutdown.initiate(timeout).await;
        self.scheduler.drain().await;

        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background task ended abnormally");
            }
        }
        self.loader.unload_all();
        tracing::info!(result = ?result, "runtime stopped");
        result
    }
}

/// One reclamation pass: idle sweep, then pressure tiers.
fn reclaim(cache: &ModelCache) {
    let evicted = cache.idle_sweep();
    if !evicted.is_empty() {
        tracing::info!(evicted = ?evicted, "idle sweep evicted sessions");
    }
    if cache.pressure_level() >= PressureLevel::VeryHigh {
        cache.intelligent_cleanup();
    }
    if cache.pressure_level() >= PressureLevel::Critical {
        cache.emergency_cleanup();
    }
    let leaks = cache.detected_leaks();
    if !leaks.is_empty() {
        tracing::warn!(leaks = ?leaks, "unloaded sessions still referenced");
    }
}

/// Find the file for `version` of the model named by `path`.
fn resolve_version(path: &Path, version: &str) -> Result<PathBuf, ModelError> {
    let identity = ModelIdentity::from_path(path)?;
    let wanted = version.trim_start_matches('v');
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let key = identity.cache_key();
    scan_models(dir, false)
        .into_iter()
        .find(|(_, candidate)| {
            candidate.cache_key() == key && candidate.version.to_string() == wanted
        })
        .map(|(found, _)| found)
        .ok_or_else(|| ModelError::NoModelAvailable {
            key,
            tried: vec![path.to_path_buf()],
        })
}
