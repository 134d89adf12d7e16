// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hot-reload poll.
//!
//! For every key with a serving session, the newest matching file on disk is
//! compared with the serving metadata. A strictly newer version, or the same
//! file with a different hash, is loaded and probed next to the old session;
//! the serving pointer only moves once the new session is healthy.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;

use super::events::ModelHealthChanged;
use super::identity::ModelIdentity;
use super::loader::{reloaded_event, scan_models, ModelLoader};
use crate::store::{hashes_match, sha256_file};

/// Outcome of one poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReloadReport {
    /// Cache keys whose serving version was swapped.
    pub swapped: Vec<String>,
    /// Cache keys whose update failed validation.
    pub failed: Vec<String>,
}

impl ModelLoader {
    /// Run one hot-reload pass.
    pub async fn poll_reload(&self) -> ReloadReport {
        let mut report = ReloadReport::default();
        let keys = self.cache().serving_keys();
        if keys.is_empty() {
            return report;
        }

        let newest = self.newest_on_disk(&keys);
        for key in keys {
            let Some(current) = self.cache().peek_serving(&key) else { continue };
            let current = current.metadata().clone();
            let Some((path, identity)) = newest.get(&key) else { continue };

            let same_file = *path == current.model_path;
            match identity.version_cmp(&current.identity) {
                Ordering::Greater => {}
                Ordering::Equal if same_file => {}
                _ => continue,
            }
            let Some(candidate_hash) = hash_file(path.clone()).await else { continue };
            if same_file && hashes_match(&candidate_hash, &current.content_hash) {
                continue;
            }
            let known_bad = self
                .reload_failures
                .get(path)
                .is_some_and(|h| hashes_match(h.value(), &candidate_hash));
            if known_bad {
                tracing::debug!(
                    key = %key,
                    path = %path.display(),
                    "skipping known-bad reload candidate"
                );
                continue;
            }

            let lock = self.key_lock(&key);
            let _guard = lock.lock().await;
            self.states.begin(&key, true);

            match self.load_candidate(path, true, false).await {
                Ok(lease) => {
                    let metadata = lease.metadata().clone();
                    drop(lease);
                    if self.cache().swap_if_healthy(&key, &metadata.versioned_key()) {
                        tracing::info!(
                            key = %key,
                            from = %current.identity.version,
                            to = %metadata.identity.version,
                            path = %metadata.model_path.display(),
                            "hot reload swapped serving model"
                        );
                        self.events().reloaded(reloaded_event(&metadata));
                        self.reload_failures.remove(path);
                        report.swapped.push(key.clone());
                    }
                }
                Err(err) => {
                    // Pressure failures are retried next poll; bad files only once they change.
                    if err.is_recoverable() {
                        self.reload_failures.insert(path.clone(), candidate_hash);
                    }
                    self.events().health_changed(ModelHealthChanged {
                        key: key.clone(),
                        path: path.clone(),
                        is_healthy: false,
                        error_message: Some(err.to_string()),
                        checked_at: Utc::now(),
                    });
                    report.failed.push(key.clone());
                }
            }
            self.states.finish(&key, true, true);
        }
        report
    }

    /// Newest matching file per key, from the models directory (recursive)
    /// and the directories the serving sessions were loaded from.
    fn newest_on_disk(&self, keys: &[String]) -> HashMap<String, (PathBuf, ModelIdentity)> {
        let mut files = scan_models(&self.config().models_dir, true);
        let mut dirs: Vec<PathBuf> = keys
            .iter()
            .filter_map(|k| self.cache().peek_serving(k))
            .filter_map(|s| s.metadata().model_path.parent().map(|p| p.to_path_buf()))
            .filter(|d| !d.starts_with(&self.config().models_dir))
            .collect();
        dirs.sort();
        dirs.dedup();
        for dir in dirs {
            files.extend(scan_models(&dir, false));
        }

        let mut newest: HashMap<String, (PathBuf, ModelIdentity)> = HashMap::new();
        for (path, identity) in files {
            let key = identity.cache_key();
            if !keys.contains(&key) {
                continue;
            }
            match newest.get(&key) {
                Some((_, best)) if identity.version_cmp(best) != Ordering::Greater => {}
                _ => {
                    newest.insert(key, (path, identity));
                }
            }
        }
        newest
    }
}

async fn hash_file(path: PathBuf) -> Option<String> {
    match tokio::task::spawn_blocking(move || sha256_file(&path).map_err(|e| (path, e))).await {
        Ok(Ok(hash)) => Some(hash),
        Ok(Err((path, e))) => {
            tracing::debug!(path = %path.display(), error = %e, "reload candidate unreadable");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "reload hash task failed");
            None
        }
    }
}
