// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Model loading with fallback, health probing and cache admission.
//!
//! A load resolves the requested file to a serving session through the
//! chain `[requested, previous_good, last_known_good]`. Candidates are tried
//! strictly in order; the first one that loads and passes its probe is
//! admitted to the cache and becomes the serving version for its key.

use std::cmp::Ordering;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::events::{EventBus, ModelReloaded};
use super::identity::ModelIdentity;
use super::probe::probe;
use super::session::{LoadedSession, ModelLease, ModelMetadata};
use super::state::{LoadState, StateTable};
use crate::engine::{BackendSet, ModelBackend, ModelError};
use crate::memory::ModelCache;
use crate::store::{hashes_match, sha256_file, sha256_hex};
use crate::telemetry;

/// Configuration for the loader.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Root scanned recursively by the hot-reload poll.
    pub models_dir: PathBuf,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
        }
    }
}

/// Loads model files into health-validated, cached sessions.
pub struct ModelLoader {
    config: LoaderConfig,
    cache: Arc<ModelCache>,
    backends: BackendSet,
    events: EventBus,
    pub(super) states: StateTable,
    key_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    /// Reload candidates that failed validation, by path, with the hash that failed.
    pub(super) reload_failures: DashMap<PathBuf, String>,
}

impl ModelLoader {
    pub fn new(
        config: LoaderConfig,
        cache: Arc<ModelCache>,
        backends: BackendSet,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            cache,
            backends,
            events,
            states: StateTable::default(),
            key_locks: DashMap::new(),
            reload_failures: DashMap::new(),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn state(&self, key: &str) -> LoadState {
        self.states.get(key)
    }

    /// Resolve `path` to a serving session.
    ///
    /// Returns the serving session for the path's key when it is at least as
    /// new as the requested file and its file on disk still matches its hash.
    /// Otherwise runs the fallback chain. If the chain is exhausted while an
    /// earlier session is still serving, that session is returned and the
    /// fallback logged; with nothing serving the result is `NoModelAvailable`.
    pub async fn load(&self, path: &Path, validate: bool) -> Result<ModelLease, ModelError> {
        self.load_inner(path, validate, false).await
    }

    /// Like [`load`](Self::load), but only the exact requested version
    /// counts as a cache hit.
    pub async fn load_exact(&self, path: &Path, validate: bool) -> Result<ModelLease, ModelError> {
        self.load_inner(path, validate, true).await
    }

    /// Hot-path lookup: the serving session for the path's key when it is at
    /// least as new as the requested file, without touching disk. Falls back
    /// to [`load`](Self::load). Drift on disk is picked up by the reload poll.
    pub async fn acquire(&self, path: &Path) -> Result<ModelLease, ModelError> {
        if let Some(identity) = file_identity(path) {
            if let Some(lease) = self.cache.serving(&identity.cache_key()) {
                if lease.metadata().identity.version_cmp(&identity) != Ordering::Less {
                    return Ok(lease);
                }
            }
        }
        self.load(path, true).await
    }

    async fn load_inner(
        &self,
        path: &Path,
        validate: bool,
        exact: bool,
    ) -> Result<ModelLease, ModelError> {
        let Some(identity) = file_identity(path) else {
            // No key to fall back within; the chain is just the requested file.
            let err =
                ModelError::corrupt(path, "filename does not match the versioned model pattern");
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "model candidate rejected"
            );
            telemetry::record_load_failure();
            return Err(ModelError::NoModelAvailable {
                key: path.display().to_string(),
                tried: vec![path.to_path_buf()],
            });
        };
        let key = identity.cache_key();

        if let Some(lease) = self.cache_hit(&identity, exact).await {
            return Ok(lease);
        }

        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        // Another task may have finished the same load while we waited.
        if let Some(lease) = self.cache_hit(&identity, exact).await {
            return Ok(lease);
        }

        let serving = self.cache.peek_serving(&key).is_some();
        self.states.begin(&key, serving);

        let chain = fallback_chain(path, &identity);
        let mut tried = Vec::with_capacity(chain.len());
        for (position, candidate) in chain.iter().enumerate() {
            tried.push(candidate.clone());
            match self.load_candidate(candidate, validate, true).await {
                Ok(lease) => {
                    let fallback = position > 0;
                    if fallback {
                        tracing::warn!(
                            key = %key,
                            requested = %path.display(),
                            path = %candidate.display(),
                            fallback = true,
                            "loaded fallback model"
                        );
                    } else {
                        tracing::info!(
                            key = %key,
                            path = %candidate.display(),
                            "model loaded"
                        );
                    }
                    telemetry::record_model_load(fallback);
                    self.states.finish(&key, true, true);
                    return Ok(lease);
                }
                Err(err @ ModelError::ResourceExhausted { .. }) => {
                    self.states.finish(&key, false, serving);
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(
                        key = %key,
                        path = %candidate.display(),
                        error = %err,
                        "model candidate failed"
                    );
                    telemetry::record_load_failure();
                }
            }
        }

        let tried_display: Vec<String> = tried
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        if let Some(lease) = self.cache.serving(&key) {
            tracing::warn!(
                key = %key,
                tried = ?tried_display,
                path = %lease.metadata().model_path.display(),
                fallback = true,
                "fallback chain exhausted, keeping previous session"
            );
            self.states.finish(&key, false, true);
            return Ok(lease);
        }

        tracing::error!(
            key = %key,
            tried = ?tried_display,
            "no model available"
        );
        self.states.finish(&key, false, false);
        Err(ModelError::NoModelAvailable { key, tried })
    }

    /// Serialises loads and reloads of one cache key.
    pub(super) fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.key_locks.entry(key.to_string()).or_default().clone()
    }

    async fn cache_hit(&self, identity: &ModelIdentity, exact: bool) -> Option<ModelLease> {
        let session = if exact {
            self.cache.peek(&identity.versioned_key())?
        } else {
            let serving = self.cache.peek_serving(&identity.cache_key())?;
            if serving.metadata().identity.version_cmp(identity) == Ordering::Less {
                return None;
            }
            serving
        };

        let path = session.metadata().model_path.clone();
        let on_disk = tokio::task::spawn_blocking(move || sha256_file(&path))
            .await
            .ok()?
            .ok()?;
        if !hashes_match(&on_disk, &session.metadata().content_hash) {
            tracing::info!(
                key = %session.metadata().versioned_key(),
                path = %session.metadata().model_path.display(),
                "resident model changed on disk"
            );
            return None;
        }

        let versioned = session.metadata().versioned_key();
        drop(session);
        let lease = self.cache.get(&versioned)?;
        if exact {
            self.cache.swap_if_healthy(&identity.cache_key(), &versioned);
        }
        Some(lease)
    }

    /// Load exactly one file, without fallback, and admit it to the cache.
    ///
    /// With `serve` set the new session becomes the serving version at once;
    /// otherwise the caller swaps it in with [`ModelCache::swap_if_healthy`].
    pub async fn load_candidate(
        &self,
        path: &Path,
        validate: bool,
        serve: bool,
    ) -> Result<ModelLease, ModelError> {
        let identity = ModelIdentity::from_path(path)?;
        let backend = self.backends.for_path(path);
        let owned = path.to_path_buf();
        let task =
            tokio::task::spawn_blocking(move || load_blocking(&owned, backend, identity, validate));
        let session = task
            .await
            .map_err(|e| ModelError::load_failed(path, format!("load task failed: {}", e)))??;

        self.cache.ensure_capacity(session.memory_bytes()).await?;
        let lease = self.cache.insert(Arc::new(session), serve);

        let metadata = lease.metadata();
        tracing::debug!(
            key = %metadata.versioned_key(),
            bytes = lease.memory_bytes(),
            hash = %metadata.content_hash,
            "session admitted"
        );
        if serve {
            self.events.reloaded(reloaded_event(metadata));
        }
        Ok(lease)
    }

    /// Serving session for a cache key.
    pub fn get_loaded(&self, key: &str) -> Option<ModelLease> {
        self.cache.serving(key)
    }

    /// Metadata of the serving session for a cache key.
    pub fn metadata(&self, key: &str) -> Option<ModelMetadata> {
        self.cache.peek_serving(key).map(|s| s.metadata().clone())
    }

    /// Unload every resident version of a cache key, or one versioned key.
    /// Idempotent: returns false when nothing was loaded.
    pub fn unload(&self, key: &str) -> bool {
        let unloaded = self.cache.unload(key);
        if self.cache.peek_serving(key).is_none() {
            self.states.reset(key);
        }
        if unloaded {
            tracing::info!(key, "model unloaded");
        }
        unloaded
    }

    /// Drop every session and forget all load state.
    pub fn unload_all(&self) {
        self.cache.clear();
        self.states.clear();
    }
}

pub(crate) fn reloaded_event(metadata: &ModelMetadata) -> ModelReloaded {
    ModelReloaded {
        key: metadata.cache_key(),
        path: metadata.model_path.clone(),
        version: metadata.identity.version,
        loaded_at: metadata.loaded_at,
        is_healthy: metadata.is_healthy,
    }
}

fn file_identity(path: &Path) -> Option<ModelIdentity> {
    ModelIdentity::from_path(path).ok()
}

fn load_blocking(
    path: &Path,
    backend: Arc<dyn ModelBackend>,
    identity: ModelIdentity,
    validate: bool,
) -> Result<LoadedSession, ModelError> {
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ModelError::NotFound(path.to_path_buf()),
        _ => ModelError::load_failed(path, e),
    })?;
    if bytes.is_empty() {
        return Err(ModelError::corrupt(path, "empty model file"));
    }
    let fs_meta = std::fs::metadata(path).map_err(|e| ModelError::load_failed(path, e))?;

    let size_bytes = bytes.len() as u64;
    let content_hash = sha256_hex(&bytes);
    let session = backend.load(path, &bytes)?;
    drop(bytes);

    if validate {
        probe(path, session.as_ref())?;
    }

    let metadata = ModelMetadata {
        model_path: path.to_path_buf(),
        identity,
        content_hash,
        size_bytes,
        modified_at: fs_meta.modified().ok().map(DateTime::<Utc>::from),
        loaded_at: Utc::now(),
        is_healthy: validate,
    };
    Ok(LoadedSession::new(session, metadata))
}

/// `[requested, previous_good, last_known_good]` without duplicates.
///
/// `previous_good` is the next-older version of the same key in the
/// requested file's directory; `last_known_good` is the oldest.
pub fn fallback_chain(requested: &Path, identity: &ModelIdentity) -> Vec<PathBuf> {
    let dir = match requested.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let key = identity.cache_key();
    let mut siblings: Vec<(PathBuf, ModelIdentity)> = scan_models(dir, false)
        .into_iter()
        .filter(|(_, id)| id.cache_key() == key)
        .collect();
    siblings.sort_by(|a, b| a.1.version_cmp(&b.1));

    let previous_good = siblings
        .iter()
        .rev()
        .find(|(_, id)| id.version_cmp(identity) == Ordering::Less);
    let last_known_good = siblings.first();

    let mut chain = vec![requested.to_path_buf()];
    for (path, _) in previous_good.into_iter().chain(last_known_good) {
        if !chain.contains(path) {
            chain.push(path.clone());
        }
    }
    chain
}

/// Files under `dir` whose names match the versioned model pattern.
/// Unreadable directories are skipped.
pub fn scan_models(dir: &Path, recursive: bool) -> Vec<(PathBuf, ModelIdentity)> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = match std::fs::read_dir(&current) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(
                    dir = %current.display(),
                    error = %e,
                    "skipping unreadable directory"
                );
                continue;
            }
        };
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else { continue };
            let path = entry.path();
            if file_type.is_dir() {
                if recursive {
                    pending.push(path);
                }
                continue;
            }
            if let Some(identity) = entry.file_name().to_str().and_then(ModelIdentity::parse) {
                found.push((path, identity));
            }
        }
    }
    found.sort_by(|a, b| a.0.cmp(&b.0));
    found
}
