// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI subcommands for the `mscore-cli` binary.
//!
//! Every command works directly on the local registry and models
//! directories; none needs a running server.
//!
//! ## Exit codes
//!
//! - `0` success / healthy
//! - `1` failure / issues found
//! - `2` usage or configuration error

pub mod config_cmd;
pub mod models_cmd;
pub mod store_cmd;

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_USAGE: i32 = 2;

/// Print `value` as pretty JSON on stdout.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{}", text);
            EXIT_OK
        }
        Err(e) => {
            eprintln!("Error: failed to encode output: {}", e);
            EXIT_FAILURE
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
