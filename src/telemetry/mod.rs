// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Structured logging and metrics.
//!
//! All output is local (stderr, file, or the installed metrics recorder);
//! nothing here opens a network connection.

mod logging;
mod metrics;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{
    init_metrics, record_batch, record_eviction, record_load_failure, record_model_load,
    record_publish, record_request_timeout, record_residency,
};
