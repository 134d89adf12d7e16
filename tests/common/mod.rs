//! Shared fixtures: versioned dense model files in a temp directory.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use mscore::engine::{Activation, BackendSet, DenseModel};
use mscore::memory::{CacheConfig, ModelCache};
use mscore::models::{EventBus, LoaderConfig, ModelLoader};

pub const KEY: &str = "strategy.ES.momentum.trend";

/// Two-input, one-output sigmoid layer. `bias` of NaN makes the probe fail.
pub fn dense(bias: f32) -> DenseModel {
    DenseModel::new(2, 1, vec![0.5, -0.25], vec![bias], Activation::Sigmoid).unwrap()
}

/// File name for `KEY` at `version` (e.g. "1.0.0") with a hash suffix derived from it.
pub fn file_name(version: &str) -> String {
    let digits: String = version.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("{}.v{}+{:0>8}.bin", KEY, version, digits)
}

pub fn write_model(dir: &Path, version: &str, bias: f32) -> PathBuf {
    let path = dir.join(file_name(version));
    std::fs::write(&path, dense(bias).to_bytes()).unwrap();
    path
}

pub fn write_unhealthy(dir: &Path, version: &str) -> PathBuf {
    write_model(dir, version, f32::NAN)
}

pub fn loader_with(dir: &Path, cache: CacheConfig) -> Arc<ModelLoader> {
    Arc::new(ModelLoader::new(
        LoaderConfig {
            models_dir: dir.to_path_buf(),
        },
        Arc::new(ModelCache::new(cache)),
        BackendSet::default(),
        EventBus::new(),
    ))
}

pub fn loader(dir: &Path) -> Arc<ModelLoader> {
    loader_with(dir, CacheConfig::default())
}

/// Cache key of one version written by [`write_model`].
pub fn versioned(version: &str) -> String {
    file_name(version).trim_end_matches(".bin").to_string()
}
