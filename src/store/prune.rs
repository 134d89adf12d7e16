// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Retention pruning of version directories.

use super::{version_dirs, ArtifactStore, EntryStatus, RegistryEntry, StoreError, SIDECAR_FILE};

/// Versions removed by a prune pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// `(model, version)` pairs, oldest first per model.
    pub removed: Vec<(String, String)>,
    /// Active versions kept although outside the retention window.
    pub kept_active: Vec<(String, String)>,
}

impl ArtifactStore {
    /// Delete all but the `keep_versions` newest versions of every model.
    ///
    /// An Active version is never deleted. `keep_versions` is floored at 1.
    pub fn prune(&self, keep_versions: usize) -> Result<PruneReport, StoreError> {
        let keep = keep_versions.max(1);
        let mut report = PruneReport::default();
        for name in self.models()? {
            self.prune_model(&name, keep, &mut report)?;
        }
        Ok(report)
    }

    fn prune_model(
        &self,
        name: &str,
        keep: usize,
        report: &mut PruneReport,
    ) -> Result<(), StoreError> {
        let lock = self.model_lock(name);
        let _guard = lock.lock();

        let model_dir = self.root().join(name);
        let versions = version_dirs(&model_dir);
        if versions.len() <= keep {
            return Ok(());
        }

        let (outside, _) = versions.split_at(versions.len() - keep);
        let mut removed = Vec::new();
        for version in outside {
            let dir = model_dir.join(version);
            let active = RegistryEntry::read_sidecar(&dir.join(SIDECAR_FILE))
                .map(|e| e.status == EntryStatus::Active)
                .unwrap_or(false);
            if active {
                report.kept_active.push((name.to_string(), version.clone()));
                continue;
            }
            std::fs::remove_dir_all(&dir)?;
            tracing::info!(model = name, version = %version, "pruned version");
            removed.push(version.clone());
        }

        if !removed.is_empty() {
            let _index_guard = self.index_lock.lock();
            self.index.remove(name, &removed)?;
        }
        report
            .removed
            .extend(removed.into_iter().map(|v| (name.to_string(), v)));
        Ok(())
    }
}
