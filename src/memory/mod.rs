// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Memory management for resident models.
//!
//! Provides the resident model cache, pressure tiers and memory snapshots.

mod cache;
mod limits;
mod snapshot;

pub use cache::{CacheConfig, EvictionPolicy, ModelCache};
pub use limits::{MemoryLimitsConfig, PressureLevel};
pub use snapshot::{process_resident_bytes, MemorySnapshot};
