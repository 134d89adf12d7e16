// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Models CLI subcommands: list, probe.

use std::path::Path;
use std::sync::Arc;

use super::{print_json, truncate, EXIT_FAILURE, EXIT_OK};
use crate::engine::BackendSet;
use crate::memory::{CacheConfig, ModelCache};
use crate::models::{scan_models, EventBus, LoaderConfig, ModelLoader};

/// List versioned model files under `models_dir`, newest version first per key.
pub fn run_list(models_dir: &Path) -> i32 {
    let mut found = scan_models(models_dir, true);
    if found.is_empty() {
        println!("No versioned model files under {}.", models_dir.display());
        return EXIT_OK;
    }
    found.sort_by(|(_, a), (_, b)| {
        a.cache_key()
            .cmp(&b.cache_key())
            .then_with(|| b.version_cmp(a))
    });

    println!("{:<44} {:<10} {:<10} {}", "KEY", "VERSION", "HASH", "PATH");
    println!("{}", "-".repeat(96));
    for (path, identity) in &found {
        println!(
            "{:<44} {:<10} {:<10} {}",
            truncate(&identity.cache_key(), 43),
            identity.version.to_string(),
            identity.hash_prefix,
            path.display()
        );
    }
    println!("{} file(s).", found.len());
    EXIT_OK
}

/// Load one model file, run its health probe and print its metadata.
///
/// Exits 0 when the model loads and passes the probe, 1 otherwise.
pub async fn run_probe(path: &Path, backends: BackendSet) -> i32 {
    let cache = Arc::new(ModelCache::new(CacheConfig::default()));
    let models_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let loader = ModelLoader::new(LoaderConfig { models_dir }, cache, backends, EventBus::new());
    match loader.load_candidate(path, true, true).await {
        Ok(lease) => {
            println!("Probe passed: {} bytes resident.", lease.memory_bytes());
            print_json(lease.metadata())
        }
        Err(e) => {
            eprintln!("Probe failed: {}", e);
            EXIT_FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Activation, DenseModel};

    #[tokio::test]
    async fn test_probe_healthy_and_unhealthy() {
        let dir = tempfile::TempDir::new().unwrap();
        let good = dir.path().join("strategy.ES.momentum.trend.v1.0.0+abcd1234.bin");
        let model = DenseModel::new(2, 1, vec![1.0, 1.0], vec![0.0], Activation::Sigmoid).unwrap();
        std::fs::write(&good, model.to_bytes()).unwrap();
        assert_eq!(run_probe(&good, BackendSet::default()).await, EXIT_OK);

        let bad = dir.path().join("strategy.ES.momentum.trend.v1.0.1+ef567890.bin");
        let nan =
            DenseModel::new(2, 1, vec![1.0, 1.0], vec![f32::NAN], Activation::Identity).unwrap();
        std::fs::write(&bad, nan.to_bytes()).unwrap();
        assert_eq!(run_probe(&bad, BackendSet::default()).await, EXIT_FAILURE);
        assert_eq!(run_list(dir.path()), EXIT_OK);
    }
}
