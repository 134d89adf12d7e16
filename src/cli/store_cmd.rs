// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Artifact store CLI subcommands.
//!
//! `publish`, `latest`, `versions`, `promote`, `prune` and `verify` open the
//! registry at `MSCORE_REGISTRY_DIR` and operate on it in-process.

use std::path::Path;

use super::{print_json, truncate, EXIT_FAILURE, EXIT_OK, EXIT_USAGE};
use crate::store::{ArtifactMetadata, ArtifactStore, StoreConfig, StoreHealthReport};

fn open(config: &StoreConfig) -> Option<ArtifactStore> {
    match ArtifactStore::open(config.clone()) {
        Ok(store) => Some(store),
        Err(e) => {
            eprintln!("Error: cannot open registry {}: {}", config.root.display(), e);
            None
        }
    }
}

/// Read an `ArtifactMetadata` JSON file.
fn read_metadata(path: &Path) -> Result<ArtifactMetadata, String> {
    let bytes =
        std::fs::read(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| format!("invalid metadata {}: {}", path.display(), e))
}

/// Publish `file` as a new version of `name`.
pub fn run_publish(config: &StoreConfig, name: &str, file: &Path, metadata: Option<&Path>) -> i32 {
    let metadata = match metadata.map(read_metadata).transpose() {
        Ok(m) => m.unwrap_or_default(),
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_USAGE;
        }
    };
    let Some(store) = open(config) else { return EXIT_USAGE };
    match store.publish(name, file, metadata) {
        Ok(entry) => print_json(&entry),
        Err(e) => {
            eprintln!("Error: publish failed: {}", e);
            EXIT_FAILURE
        }
    }
}

pub fn run_latest(config: &StoreConfig, name: &str) -> i32 {
    let Some(store) = open(config) else { return EXIT_USAGE };
    match store.get_latest(name) {
        Some(entry) => print_json(&entry),
        None => {
            eprintln!("No versions published for '{}'.", name);
            EXIT_FAILURE
        }
    }
}

pub fn run_versions(config: &StoreConfig, name: &str) -> i32 {
    let Some(store) = open(config) else { return EXIT_USAGE };
    let versions = match store.list_versions(name) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_FAILURE;
        }
    };
    if versions.is_empty() {
        println!("No versions published for '{}'.", name);
        return EXIT_OK;
    }
    println!("{:<32} {:<12} {:<18} {:<5}", "VERSION", "STATUS", "HASH", "GZIP");
    println!("{}", "-".repeat(70));
    for entry in &versions {
        println!(
            "{:<32} {:<12} {:<18} {:<5}",
            entry.version,
            format!("{:?}", entry.status),
            truncate(&entry.hash, 16),
            if entry.is_compressed { "yes" } else { "no" },
        );
    }
    EXIT_OK
}

pub fn run_promote(config: &StoreConfig, name: &str, version: &str) -> i32 {
    let Some(store) = open(config) else { return EXIT_USAGE };
    match store.promote(name, version) {
        Ok(entry) => {
            println!("Promoted {}@{} to Active.", entry.model_name, entry.version);
            EXIT_OK
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_FAILURE
        }
    }
}

pub fn run_prune(config: &StoreConfig, keep: usize) -> i32 {
    let Some(store) = open(config) else { return EXIT_USAGE };
    match store.prune(keep) {
        Ok(report) => {
            for (name, version) in &report.removed {
                println!("removed  {}@{}", name, version);
            }
            for (name, version) in &report.kept_active {
                println!("kept     {}@{} (active)", name, version);
            }
            println!("{} version(s) removed.", report.removed.len());
            EXIT_OK
        }
        Err(e) => {
            eprintln!("Error: prune failed: {}", e);
            EXIT_FAILURE
        }
    }
}

/// Verify the latest entry of every model. Exits 1 when any issue is found.
pub fn run_verify(config: &StoreConfig, json: bool) -> i32 {
    let Some(store) = open(config) else { return EXIT_USAGE };
    let report = match store.health_check() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: health check failed: {}", e);
            return EXIT_FAILURE;
        }
    };
    if json {
        print_json(&report);
    } else {
        print_report(&report);
    }
    if report.is_healthy() {
        EXIT_OK
    } else {
        EXIT_FAILURE
    }
}

fn print_report(report: &StoreHealthReport) {
    if report.entries.is_empty() {
        println!("Registry is empty.");
    }
    for entry in &report.entries {
        let verdict = if entry.is_healthy() { "OK" } else { "FAIL" };
        let expired = if entry.expired { " (expired)" } else { "" };
        println!(
            "{:<5} {}@{}  {:?}, {} day(s) old{}",
            verdict, entry.model_name, entry.version, entry.status, entry.age_days, expired
        );
    }
    for name in &report.empty_models {
        println!("EMPTY {}", name);
    }
}
