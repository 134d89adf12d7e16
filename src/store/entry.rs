// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Registry entries and their metadata sidecar schema.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StoreError;

/// Sidecar file name inside every version directory.
pub const SIDECAR_FILE: &str = "metadata.json";

/// Suffix appended to a compressed artifact.
pub const COMPRESSED_SUFFIX: &str = "gz";

/// Training provenance attached to a published artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArtifactMetadata {
    pub training_date: Option<DateTime<Utc>>,
    pub hyperparams: BTreeMap<String, serde_json::Value>,
    pub training_data_hash: Option<String>,
    pub validation_accuracy: Option<f64>,
    pub training_metrics: BTreeMap<String, f64>,
    pub description: String,
    pub tags: Vec<String>,
}

/// Lifecycle status of a published version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    /// Published, not yet promoted.
    Registered,
    /// The version currently promoted for serving.
    Active,
    /// Superseded by a later promotion.
    Deprecated,
    /// Marked unusable after a failed load or validation.
    Failed,
}

/// A published, versioned artifact record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub model_name: String,
    /// `{timestamp}-{hash[0:8]}`; sorts chronologically.
    pub version: String,
    pub timestamp: DateTime<Utc>,
    /// Uppercase hex SHA-256 of the uncompressed artifact.
    pub hash: String,
    #[serde(default)]
    pub metadata: ArtifactMetadata,
    pub original_path: PathBuf,
    /// Path of the uncompressed artifact inside the version directory.
    pub registry_path: PathBuf,
    pub status: EntryStatus,
    #[serde(default)]
    pub is_compressed: bool,
}

impl RegistryEntry {
    /// File currently holding the artifact bytes (gzip file when compressed).
    pub fn artifact_path(&self) -> PathBuf {
        if self.is_compressed {
            compressed_path(&self.registry_path)
        } else {
            self.registry_path.clone()
        }
    }

    /// The version directory this entry lives in.
    pub fn version_dir(&self) -> Option<&Path> {
        self.registry_path.parent()
    }

    /// Read a sidecar file.
    pub fn read_sidecar(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Pretty JSON for the sidecar file.
    pub fn to_sidecar_json(&self) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

pub(crate) fn compressed_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".");
    os.push(COMPRESSED_SUFFIX);
    PathBuf::from(os)
}
