// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Read-only integrity report over the latest version of every model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    compress, hashes_match, sha256_file, sha256_hex, ArtifactStore, RegistryEntry, StoreError,
};

/// Integrity result for one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryHealthStatus {
    /// Artifact present and its hash matches the record.
    Healthy,
    /// Artifact file is gone.
    Missing,
    /// Content changed since publish.
    HashMismatch { expected: String, actual: String },
    /// Artifact could not be read or decompressed.
    Unreadable { reason: String },
}

/// Health of a model's latest entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryHealth {
    pub model_name: String,
    pub version: String,
    pub status: EntryHealthStatus,
    pub age_days: i64,
    /// Older than the configured expiry window.
    pub expired: bool,
}

impl EntryHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == EntryHealthStatus::Healthy && !self.expired
    }
}

/// Store-wide report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreHealthReport {
    pub checked_at: DateTime<Utc>,
    pub entries: Vec<EntryHealth>,
    /// Models with a directory but no readable version.
    pub empty_models: Vec<String>,
}

impl StoreHealthReport {
    pub fn is_healthy(&self) -> bool {
        self.entries.iter().all(EntryHealth::is_healthy)
    }

    /// Entries needing attention.
    pub fn issues(&self) -> impl Iterator<Item = &EntryHealth> {
        self.entries.iter().filter(|e| !e.is_healthy())
    }

    pub fn entry(&self, model_name: &str) -> Option<&EntryHealth> {
        self.entries.iter().find(|e| e.model_name == model_name)
    }
}

impl ArtifactStore {
    /// Verify existence and hash of every model's latest entry, and flag
    /// entries past the expiry window. Never mutates the store.
    pub fn health_check(&self) -> Result<StoreHealthReport, StoreError> {
        let now = Utc::now();
        let expiry = chrono::Duration::from_std(self.config.expiry)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let mut entries = Vec::new();
        let mut empty_models = Vec::new();

        for name in self.models()? {
            let Some(entry) = self.get_latest(&name) else {
                empty_models.push(name);
                continue;
            };
            let age = now.signed_duration_since(entry.timestamp);
            let status = verify_entry(&entry);
            if status != EntryHealthStatus::Healthy {
                tracing::warn!(
                    model = %name,
                    version = %entry.version,
                    status = ?status,
                    "artifact integrity issue"
                );
            }
            entries.push(EntryHealth {
                model_name: name,
                version: entry.version,
                status,
                age_days: age.num_days(),
                expired: age > expiry,
            });
        }

        Ok(StoreHealthReport {
            checked_at: now,
            entries,
            empty_models,
        })
    }
}

fn verify_entry(entry: &RegistryEntry) -> EntryHealthStatus {
    let path = entry.artifact_path();
    if !path.exists() {
        return EntryHealthStatus::Missing;
    }
    let actual = if entry.is_compressed {
        compress::gunzip_file(&path).map(|bytes| sha256_hex(&bytes))
    } else {
        sha256_file(&path)
    };
    match actual {
        Ok(actual) if hashes_match(&actual, &entry.hash) => EntryHealthStatus::Healthy,
        Ok(actual) => EntryHealthStatus::HashMismatch {
            expected: entry.hash.clone(),
            actual,
        },
        Err(e) => EntryHealthStatus::Unreadable {
            reason: e.to_string(),
        },
    }
}
