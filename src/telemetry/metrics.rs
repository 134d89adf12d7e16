// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Metric recording through the `metrics` facade.
//!
//! No exporter is installed here; the embedding process chooses one.

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};

/// Register descriptions and zero the counters.
pub fn init_metrics() {
    describe_counter!("mscore_model_loads_total", "Models admitted to the cache");
    describe_counter!("mscore_model_load_failures_total", "Load candidates that failed");
    describe_counter!("mscore_evictions_total", "Sessions removed from the cache");
    describe_gauge!(
        "mscore_resident_bytes",
        Unit::Bytes,
        "Sum of resident session footprints"
    );
    describe_gauge!("mscore_resident_models", "Resident session count");
    describe_histogram!("mscore_batch_size", "Requests per executed batch");
    describe_histogram!(
        "mscore_batch_latency_ms",
        Unit::Milliseconds,
        "Batch execution latency"
    );
    describe_counter!(
        "mscore_requests_timed_out_total",
        "Inference requests that timed out"
    );
    describe_counter!("mscore_publish_total", "Artifacts published to the store");

    counter!("mscore_model_loads_total").absolute(0);
    counter!("mscore_model_load_failures_total").absolute(0);
    counter!("mscore_requests_timed_out_total").absolute(0);
    counter!("mscore_publish_total").absolute(0);
    gauge!("mscore_resident_bytes").set(0.0);
    gauge!("mscore_resident_models").set(0.0);
}

pub fn record_model_load(fallback: bool) {
    let kind = if fallback { "fallback" } else { "primary" };
    counter!("mscore_model_loads_total", "kind" => kind).increment(1);
}

pub fn record_load_failure() {
    counter!("mscore_model_load_failures_total").increment(1);
}

pub fn record_eviction(policy: &'static str) {
    counter!("mscore_evictions_total", "policy" => policy).increment(1);
}

pub fn record_residency(bytes: usize, models: usize) {
    gauge!("mscore_resident_bytes").set(bytes as f64);
    gauge!("mscore_resident_models").set(models as f64);
}

pub fn record_batch(size: usize, latency_ms: f64) {
    histogram!("mscore_batch_size").record(size as f64);
    histogram!("mscore_batch_latency_ms").record(latency_ms);
}

pub fn record_request_timeout() {
    counter!("mscore_requests_timed_out_total").increment(1);
}

pub fn record_publish() {
    counter!("mscore_publish_total").increment(1);
}
