// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Point-in-time view of model memory usage.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Memory accounting snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Resident set size of the process, where the platform exposes it.
    pub total_memory: Option<u64>,
    /// Sum of resident session footprints.
    pub ml_memory: usize,
    /// Footprint per resident version key.
    pub per_model_memory: BTreeMap<String, usize>,
    pub loaded_count: usize,
    /// Sessions removed from the cache but still referenced past the grace period.
    pub detected_leaks: Vec<String>,
}

/// Resident set size in bytes.
#[cfg(target_os = "linux")]
pub fn process_resident_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages * 4096)
}

#[cfg(not(target_os = "linux"))]
pub fn process_resident_bytes() -> Option<u64> {
    None
}
