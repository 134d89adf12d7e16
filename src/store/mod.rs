// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Artifact store: durable, versioned, integrity-checked model storage.
//!
//! Layout under the registry root:
//!
//! ```text
//! registry/
//!   registry_index.json
//!   {model}/{timestamp}-{hash8}/{model}.{ext}
//!   {model}/{timestamp}-{hash8}/metadata.json
//! ```
//!
//! A version directory is assembled in a hidden staging directory and
//! renamed into place, so readers never observe a half-written version.

mod atomic;
mod compress;
mod entry;
mod health;
mod index;
mod integrity;
mod prune;

pub use entry::{ArtifactMetadata, EntryStatus, RegistryEntry, SIDECAR_FILE};
pub use health::{EntryHealth, EntryHealthStatus, StoreHealthReport};
pub use index::INDEX_FILE;
pub use integrity::{hashes_match, sha256_file, sha256_hex};
pub use prune::PruneReport;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;

use crate::engine::ModelError;
use crate::telemetry;
use index::RegistryIndex;

/// Version id timestamp prefix: 20 digits, microsecond resolution.
const VERSION_TS_FORMAT: &str = "%Y%m%d%H%M%S%6f";
const VERSION_TS_LEN: usize = 20;
const STAGING_PREFIX: &str = ".staging-";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Source artifact not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Invalid model name: {0:?}")]
    InvalidName(String),

    #[error("Publish failed for {name}: {reason}")]
    Publish { name: String, reason: String },

    #[error("Publish conflict: {0}")]
    Conflict(String),

    #[error("Version not found: {name}@{version}")]
    VersionNotFound { name: String, version: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Registry JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<StoreError> for ModelError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::SourceNotFound(path) => ModelError::NotFound(path),
            other => ModelError::PublishConflict(other.to_string()),
        }
    }
}

/// Artifact store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub root: PathBuf,
    /// Gzip artifacts after they are published.
    pub compress: bool,
    /// Entries older than this are flagged by `health_check`.
    pub expiry: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("registry"),
            compress: false,
            expiry: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

/// Versioned artifact storage rooted at a registry directory.
pub struct ArtifactStore {
    config: StoreConfig,
    index: RegistryIndex,
    model_locks: DashMap<String, Arc<Mutex<()>>>,
    index_lock: Mutex<()>,
}

impl ArtifactStore {
    /// Open (and create if needed) a store at `config.root`.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&config.root)?;
        let index = RegistryIndex::new(&config.root);
        Ok(Self {
            config,
            index,
            model_locks: DashMap::new(),
            index_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn model_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.model_locks.entry(name.to_string()).or_default().clone()
    }

    /// Publish `source` as a new version of `name`.
    pub fn publish(
        &self,
        name: &str,
        source: &Path,
        metadata: ArtifactMetadata,
    ) -> Result<RegistryEntry, StoreError> {
        validate_name(name)?;
        if !source.is_file() {
            return Err(StoreError::SourceNotFound(source.to_path_buf()));
        }
        let hash = sha256_file(source)
            .map_err(|e| publish_err(name, format!("cannot read source: {}", e)))?;

        let lock = self.model_lock(name);
        let _guard = lock.lock();

        let model_dir = self.config.root.join(name);
        std::fs::create_dir_all(&model_dir).map_err(|e| {
            publish_err(name, format!("cannot create {}: {}", model_dir.display(), e))
        })?;

        let timestamp = self.next_timestamp(&model_dir);
        let version = format!("{}-{}", timestamp.format(VERSION_TS_FORMAT), &hash[..8]);
        let version_dir = model_dir.join(&version);
        if version_dir.exists() {
            return Err(StoreError::Conflict(format!(
                "{}@{} already exists",
                name, version
            )));
        }

        let file_name = match source.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}.{}", name, ext),
            None => name.to_string(),
        };
        let entry = RegistryEntry {
            model_name: name.to_string(),
            version: version.clone(),
            timestamp,
            hash: hash.clone(),
            metadata,
            original_path: source.to_path_buf(),
            registry_path: version_dir.join(&file_name),
            status: EntryStatus::Registered,
            is_compressed: false,
        };

        let staging = model_dir.join(format!(
            "{}{}",
            STAGING_PREFIX,
            uuid::Uuid::new_v4().simple()
        ));
        if let Err(e) = self.stage(&staging, &file_name, source, &entry) {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }
        if let Err(e) = std::fs::rename(&staging, &version_dir) {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(StoreError::Conflict(format!(
                "cannot promote staging for {}@{}: {}",
                name, version, e
            )));
        }

        {
            let _index_guard = self.index_lock.lock();
            self.index.upsert(std::slice::from_ref(&entry))?;
        }

        telemetry::record_publish();
        tracing::info!(
            model = name,
            version = %version,
            hash = %hash,
            "artifact published"
        );

        if self.config.compress {
            match self.compress_locked(&entry) {
                Ok(compressed) => return Ok(compressed),
                Err(e) => tracing::warn!(
                    model = name,
                    version = %version,
                    error = %e,
                    "post-publish compression failed"
                ),
            }
        }
        Ok(entry)
    }

    fn stage(
        &self,
        staging: &Path,
        file_name: &str,
        source: &Path,
        entry: &RegistryEntry,
    ) -> Result<(), StoreError> {
        std::fs::create_dir(staging)?;
        let staged = staging.join(file_name);
        atomic::copy_atomic(source, &staged)?;

        // The source may have been rewritten while we copied it.
        let copied = integrity::sha256_mapped(&staged)?;
        if !hashes_match(&copied, &entry.hash) {
            return Err(StoreError::Conflict(format!(
                "source {} changed during publish",
                source.display()
            )));
        }
        atomic::write_atomic(&staging.join(SIDECAR_FILE), &entry.to_sidecar_json()?)?;
        Ok(())
    }

    /// Microsecond timestamp strictly after the newest existing version.
    fn next_timestamp(&self, model_dir: &Path) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(6);
        let latest = version_dirs(model_dir).into_iter().next_back();
        let previous = latest.and_then(|v| {
            v.get(..VERSION_TS_LEN)
                .and_then(|ts| NaiveDateTime::parse_from_str(ts, VERSION_TS_FORMAT).ok())
                .map(|n| n.and_utc())
        });
        match previous {
            Some(prev) if now <= prev => prev + chrono::Duration::microseconds(1),
            _ => now,
        }
    }

    /// Newest readable version of `name`, or `None` if there are none.
    pub fn get_latest(&self, name: &str) -> Option<RegistryEntry> {
        let model_dir = self.config.root.join(name);
        for version in version_dirs(&model_dir).into_iter().rev() {
            let sidecar = model_dir.join(&version).join(SIDECAR_FILE);
            match RegistryEntry::read_sidecar(&sidecar) {
                Ok(entry) => return Some(entry),
                Err(e) => tracing::warn!(
                    model = name,
                    version = %version,
                    error = %e,
                    "skipping unreadable version"
                ),
            }
        }
        None
    }

    /// Every readable version of `name`, oldest first.
    pub fn list_versions(&self, name: &str) -> Result<Vec<RegistryEntry>, StoreError> {
        let model_dir = self.config.root.join(name);
        let mut out = Vec::new();
        for version in version_dirs(&model_dir) {
            let sidecar = model_dir.join(&version).join(SIDECAR_FILE);
            match RegistryEntry::read_sidecar(&sidecar) {
                Ok(entry) => out.push(entry),
                Err(e) => tracing::warn!(
                    model = name,
                    version = %version,
                    error = %e,
                    "unreadable sidecar"
                ),
            }
        }
        Ok(out)
    }

    /// Names of all models with a directory in the registry.
    pub fn models(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.config.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Parsed global index.
    pub fn index(&self) -> Result<Vec<RegistryEntry>, StoreError> {
        let _guard = self.index_lock.lock();
        self.index.load()
    }

    /// Artifact bytes, decompressed when stored compressed.
    pub fn read_artifact(&self, entry: &RegistryEntry) -> Result<Vec<u8>, StoreError> {
        if entry.is_compressed {
            Ok(compress::gunzip_file(&entry.artifact_path())?)
        } else {
            Ok(std::fs::read(&entry.registry_path)?)
        }
    }

    /// Mark `version` Active; any previously Active version becomes Deprecated.
    pub fn promote(&self, name: &str, version: &str) -> Result<RegistryEntry, StoreError> {
        let lock = self.model_lock(name);
        let _guard = lock.lock();

        let entries = self.list_versions(name)?;
        let mut target = entries
            .iter()
            .find(|e| e.version == version)
            .cloned()
            .ok_or_else(|| StoreError::VersionNotFound {
                name: name.into(),
                version: version.into(),
            })?;

        let mut changed: Vec<RegistryEntry> = entries
            .into_iter()
            .filter(|e| e.version != version && e.status == EntryStatus::Active)
            .map(|entry| RegistryEntry {
                status: EntryStatus::Deprecated,
                ..entry
            })
            .collect();
        target.status = EntryStatus::Active;
        changed.push(target.clone());

        self.rewrite_entries(&changed)?;
        tracing::info!(model = name, version, "version promoted to active");
        Ok(target)
    }

    /// Mark `version` Failed (e.g. it never passed a health probe in production).
    pub fn mark_failed(&self, name: &str, version: &str) -> Result<RegistryEntry, StoreError> {
        let lock = self.model_lock(name);
        let _guard = lock.lock();

        let sidecar = self.config.root.join(name).join(version).join(SIDECAR_FILE);
        if !sidecar.exists() {
            return Err(StoreError::VersionNotFound {
                name: name.into(),
                version: version.into(),
            });
        }
        let entry = RegistryEntry {
            status: EntryStatus::Failed,
            ..RegistryEntry::read_sidecar(&sidecar)?
        };
        self.rewrite_entries(std::slice::from_ref(&entry))?;
        tracing::warn!(model = name, version, "version marked failed");
        Ok(entry)
    }

    /// Gzip a published artifact and flip its `is_compressed` flag.
    pub fn compress(&self, entry: &RegistryEntry) -> Result<RegistryEntry, StoreError> {
        let lock = self.model_lock(&entry.model_name);
        let _guard = lock.lock();
        self.compress_locked(entry)
    }

    fn compress_locked(&self, entry: &RegistryEntry) -> Result<RegistryEntry, StoreError> {
        if entry.is_compressed {
            return Ok(entry.clone());
        }
        let size = compress::gzip_file(&entry.registry_path)?;
        let compressed = RegistryEntry {
            is_compressed: true,
            ..entry.clone()
        };
        self.rewrite_entries(std::slice::from_ref(&compressed))?;
        std::fs::remove_file(&entry.registry_path)?;
        tracing::debug!(
            model = %entry.model_name,
            version = %entry.version,
            bytes = size,
            "artifact compressed"
        );
        Ok(compressed)
    }

    /// Replace sidecars (atomically) and the matching index records.
    fn rewrite_entries(&self, entries: &[RegistryEntry]) -> Result<(), StoreError> {
        for entry in entries {
            let dir = entry.version_dir().ok_or_else(|| StoreError::VersionNotFound {
                name: entry.model_name.clone(),
                version: entry.version.clone(),
            })?;
            atomic::write_atomic(&dir.join(SIDECAR_FILE), &entry.to_sidecar_json()?)?;
        }
        let _index_guard = self.index_lock.lock();
        self.index.upsert(entries)
    }
}

fn publish_err(name: &str, reason: String) -> StoreError {
    StoreError::Publish {
        name: name.to_string(),
        reason,
    }
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    let bad = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\'])
        || name.chars().any(|c| c.is_control());
    if bad {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Version directory names of a model, ascending (= chronological).
pub(crate) fn version_dirs(model_dir: &Path) -> Vec<String> {
    let Ok(read) = std::fs::read_dir(model_dir) else {
        return Vec::new();
    };
    let mut versions: Vec<String> = read
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|n| !n.starts_with('.'))
        .collect();
    versions.sort();
    versions
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ArtifactStore {
        ArtifactStore::open(StoreConfig {
            root: dir.path().join("registry"),
            ..Default::default()
        })
        .unwrap()
    }

    fn source(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_publish_layout() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let src = source(&dir, "a.onnx", b"weights");

        let entry = store.publish("alpha", &src, ArtifactMetadata::default()).unwrap();
        assert!(entry.registry_path.ends_with("alpha.onnx"));
        assert!(entry.registry_path.exists());
        assert!(entry.version_dir().unwrap().join(SIDECAR_FILE).exists());
        assert_eq!(entry.version.len(), VERSION_TS_LEN + 1 + 8);
        assert!(entry.version.ends_with(&entry.hash[..8]));
        assert_eq!(store.index().unwrap(), vec![entry]);
    }

    #[test]
    fn test_versions_strictly_increase() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let src = source(&dir, "a.bin", b"same bytes");

        let v1 = store.publish("alpha", &src, ArtifactMetadata::default()).unwrap();
        let v2 = store.publish("alpha", &src, ArtifactMetadata::default()).unwrap();
        assert!(v2.version > v1.version);
        assert_eq!(store.get_latest("alpha").unwrap().version, v2.version);
    }

    #[test]
    fn test_missing_source_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let missing = dir.path().join("missing");
        let err = store.publish("alpha", &missing, ArtifactMetadata::default());
        assert!(matches!(err, Err(StoreError::SourceNotFound(_))));
        assert!(store.get_latest("alpha").is_none());
    }

    #[test]
    fn test_invalid_names_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let src = source(&dir, "a.bin", b"x");
        for name in ["", "../up", ".hidden", "a/b"] {
            assert!(matches!(
                store.publish(name, &src, ArtifactMetadata::default()),
                Err(StoreError::InvalidName(_))
            ));
        }
    }

    #[test]
    fn test_promote_deprecates_previous_active() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let v1 = store
            .publish("alpha", &source(&dir, "1.bin", b"one"), ArtifactMetadata::default())
            .unwrap();
        let v2 = store
            .publish("alpha", &source(&dir, "2.bin", b"two"), ArtifactMetadata::default())
            .unwrap();

        store.promote("alpha", &v1.version).unwrap();
        store.promote("alpha", &v2.version).unwrap();

        let versions = store.list_versions("alpha").unwrap();
        assert_eq!(versions[0].status, EntryStatus::Deprecated);
        assert_eq!(versions[1].status, EntryStatus::Active);
        let index = store.index().unwrap();
        assert!(index
            .iter()
            .any(|e| e.version == v2.version && e.status == EntryStatus::Active));
    }

    #[test]
    fn test_compressed_publish_reads_back() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(StoreConfig {
            root: dir.path().join("registry"),
            compress: true,
            ..Default::default()
        })
        .unwrap();
        let bytes = vec![3u8; 10_000];
        let src = source(&dir, "a.bin", &bytes);
        let entry = store.publish("alpha", &src, ArtifactMetadata::default()).unwrap();

        assert!(entry.is_compressed);
        assert!(!entry.registry_path.exists());
        assert!(entry.artifact_path().exists());
        assert_eq!(store.read_artifact(&entry).unwrap(), bytes);
        assert!(store.get_latest("alpha").unwrap().is_compressed);
    }

    #[test]
    fn test_staging_dirs_ignored() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::create_dir_all(dir.path().join("registry/alpha/.staging-abc")).unwrap();
        assert!(store.get_latest("alpha").is_none());
    }
}
