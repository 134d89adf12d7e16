// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Runtime health: liveness, readiness and a full report.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::memory::PressureLevel;
use crate::shutdown::ShutdownState;

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    /// Running with no pressure, backlog or leak concerns.
    Healthy,
    /// Serving, but memory, queue depth or leaks need attention.
    Degraded,
    /// Draining or stopped.
    Unhealthy,
}

/// Point-in-time inputs gathered from the runtime components.
#[derive(Debug, Clone, Copy)]
pub struct HealthInputs {
    pub shutdown: ShutdownState,
    pub models_loaded: usize,
    pub resident_bytes: usize,
    pub memory_ceiling: usize,
    pub pressure: PressureLevel,
    pub queue_depth: usize,
    pub detected_leaks: usize,
}

/// Detailed health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub state: HealthState,
    pub ready: bool,
    pub accepting_requests: bool,
    pub models_loaded: usize,
    pub resident_bytes: usize,
    pub memory_ceiling: usize,
    pub queue_depth: usize,
    pub detected_leaks: usize,
    pub uptime_secs: u64,
}

/// Health check configuration.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Report degraded and not ready while no model is resident.
    pub require_model_loaded: bool,
    /// Queue depth at which the runtime reports itself degraded and not ready.
    pub max_queue_depth: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            require_model_loaded: false,
            max_queue_depth: 1000,
        }
    }
}

/// Aggregates health information from runtime components.
pub struct HealthChecker {
    config: HealthConfig,
    start_time: Instant,
}

impl HealthChecker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            start_time: Instant::now(),
        }
    }

    /// Process is responsive.
    pub fn is_alive(&self) -> bool {
        true
    }

    /// Accepting traffic and able to admit it.
    pub fn is_ready(&self, inputs: &HealthInputs) -> bool {
        inputs.shutdown == ShutdownState::Running
            && !(self.config.require_model_loaded && inputs.models_loaded == 0)
            && inputs.queue_depth < self.config.max_queue_depth
            && inputs.pressure < PressureLevel::Emergency
    }

    pub fn report(&self, inputs: &HealthInputs) -> HealthReport {
        HealthReport {
            state: self.compute_state(inputs),
            ready: self.is_ready(inputs),
            accepting_requests: inputs.shutdown == ShutdownState::Running,
            models_loaded: inputs.models_loaded,
            resident_bytes: inputs.resident_bytes,
            memory_ceiling: inputs.memory_ceiling,
            queue_depth: inputs.queue_depth,
            detected_leaks: inputs.detected_leaks,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    fn compute_state(&self, inputs: &HealthInputs) -> HealthState {
        if inputs.shutdown != ShutdownState::Running {
            return HealthState::Unhealthy;
        }
        let degraded = (self.config.require_model_loaded && inputs.models_loaded == 0)
            || inputs.queue_depth >= self.config.max_queue_depth
            || inputs.pressure >= PressureLevel::Critical
            || inputs.detected_leaks > 0;
        if degraded {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}
