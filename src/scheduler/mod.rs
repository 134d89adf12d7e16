// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Batched inference scheduling.
//!
//! Single-sample requests are queued, grouped by target model on a fixed
//! interval and executed as one stacked call per group chunk.

mod batch;
mod queue;
mod worker;

pub use batch::{chunk, group_by_model, run_stacked, BatchConfig};
pub use queue::{InferenceRequest, RequestQueue, RequestQueueConfig, ResultRx, ResultTx};
pub use worker::{spawn_batch_loop, BatchScheduler};
