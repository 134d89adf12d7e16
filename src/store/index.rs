// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Global `registry_index.json`: a JSON array of every published entry.

use std::path::{Path, PathBuf};

use super::atomic::write_atomic;
use super::entry::RegistryEntry;
use super::StoreError;

pub const INDEX_FILE: &str = "registry_index.json";

/// Read-modify-write access to the index file. Callers serialise writers.
pub(crate) struct RegistryIndex {
    path: PathBuf,
}

impl RegistryIndex {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(INDEX_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all entries. A missing index is an empty registry.
    pub fn load(&self) -> Result<Vec<RegistryEntry>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(Vec::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, entries: &[RegistryEntry]) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(entries)?;
        write_atomic(&self.path, &json)?;
        Ok(())
    }

    /// Insert or replace entries keyed by `(model_name, version)`.
    pub fn upsert(&self, updated: &[RegistryEntry]) -> Result<(), StoreError> {
        let mut entries = self.load()?;
        for entry in updated {
            match entries
                .iter_mut()
                .find(|e| e.model_name == entry.model_name && e.version == entry.version)
            {
                Some(existing) => *existing = entry.clone(),
                None => entries.push(entry.clone()),
            }
        }
        self.save(&entries)
    }

    /// Drop the given versions of one model.
    pub fn remove(&self, model_name: &str, versions: &[String]) -> Result<(), StoreError> {
        let mut entries = self.load()?;
        entries.retain(|e| !(e.model_name == model_name && versions.contains(&e.version)));
        self.save(&entries)
    }
}
