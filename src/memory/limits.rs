// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Memory ceiling and pressure tiers for resident models.

/// Configuration for the resident-memory ceiling.
#[derive(Debug, Clone)]
pub struct MemoryLimitsConfig {
    /// Ceiling for the sum of resident session footprints (bytes).
    pub max_memory_bytes: usize,
    /// Fraction of the ceiling that triggers intelligent cleanup before admission.
    pub very_high: f64,
    /// Fraction still exceeded after intelligent cleanup that triggers emergency cleanup.
    pub critical: f64,
    /// Fraction still exceeded after emergency cleanup that rejects the admission.
    pub emergency: f64,
}

impl Default for MemoryLimitsConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: 2 * 1024 * 1024 * 1024, // 2GB
            very_high: 0.85,
            critical: 0.90,
            emergency: 0.95,
        }
    }
}

/// Pressure tier for a given resident byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PressureLevel {
    /// At or below the very-high fraction.
    Normal,
    /// Above `very_high`: intelligent cleanup runs.
    VeryHigh,
    /// Above `critical`: emergency cleanup runs.
    Critical,
    /// Above `emergency`: admissions are rejected.
    Emergency,
}

impl MemoryLimitsConfig {
    /// Resident bytes as a fraction of the ceiling.
    pub fn pressure(&self, resident_bytes: usize) -> f64 {
        if self.max_memory_bytes == 0 {
            return f64::INFINITY;
        }
        resident_bytes as f64 / self.max_memory_bytes as f64
    }

    /// Pressure tier for `resident_bytes`.
    pub fn level(&self, resident_bytes: usize) -> PressureLevel {
        let p = self.pressure(resident_bytes);
        if p > self.emergency {
            PressureLevel::Emergency
        } else if p > self.critical {
            PressureLevel::Critical
        } else if p > self.very_high {
            PressureLevel::VeryHigh
        } else {
            PressureLevel::Normal
        }
    }

    /// Keep tiers ordered and inside (0, 1].
    pub fn normalized(mut self) -> Self {
        self.emergency = self.emergency.clamp(0.01, 1.0);
        self.critical = self.critical.clamp(0.01, self.emergency);
        self.very_high = self.very_high.clamp(0.01, self.critical);
        self
    }
}
