// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Config CLI subcommands: show, defaults, validate.

use super::{EXIT_FAILURE, EXIT_OK, EXIT_USAGE};
use crate::config::{self, EffectiveConfig, EnvConfig};

/// Print the effective config as `KEY=value` lines.
pub fn run_show() -> i32 {
    match config::load() {
        Ok(cfg) => {
            print_config(&cfg.effective_config());
            EXIT_OK
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_USAGE
        }
    }
}

/// Print the built-in defaults, ignoring the environment.
pub fn run_defaults() {
    print_config(&EnvConfig::default().effective_config());
}

/// Check the effective config for misconfigurations.
///
/// Returns 0 if valid, 1 if any warnings are found, 2 if the config file
/// cannot be read.
pub fn run_validate() -> i32 {
    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_USAGE;
        }
    };
    let warnings = validate(&cfg);
    for warning in &warnings {
        eprintln!("WARNING: {}", warning);
    }
    if warnings.is_empty() {
        println!("Configuration is valid.");
        EXIT_OK
    } else {
        EXIT_FAILURE
    }
}

fn validate(cfg: &EnvConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if !cfg.models_dir.is_dir() {
        warnings.push(format!(
            "MSCORE_MODELS_DIR ({}) is not a directory",
            cfg.models_dir.display()
        ));
    }
    if cfg.batch.request_timeout <= cfg.batch.interval {
        warnings.push(format!(
            concat!(
                "MSCORE_REQUEST_TIMEOUT_MS ({}) does not exceed MSCORE_BATCH_INTERVAL_MS ({}); ",
                "requests will time out before a cycle runs"
            ),
            cfg.batch.request_timeout.as_millis(),
            cfg.batch.interval.as_millis()
        ));
    }
    if cfg.request_queue.max_pending < cfg.batch.drain_limit() {
        warnings.push(format!(
            "MSCORE_MAX_QUEUE_DEPTH ({}) is below one cycle's drain limit ({})",
            cfg.request_queue.max_pending,
            cfg.batch.drain_limit()
        ));
    }
    if cfg.cache.unused_idle_timeout > cfg.cache.absolute_idle_timeout {
        warnings.push("MSCORE_UNUSED_IDLE_SECS exceeds MSCORE_ABSOLUTE_IDLE_SECS".to_string());
    }
    warnings
}

fn print_config(cfg: &EffectiveConfig) {
    for (key, value) in &cfg.entries {
        println!("{}={}", key, value);
    }
}
