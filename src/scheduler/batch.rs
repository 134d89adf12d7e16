// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Grouping requests by model and executing one stacked call per chunk.

use std::path::PathBuf;
use std::time::Duration;

use super::queue::InferenceRequest;
use crate::engine::{ModelError, Tensor};
use crate::models::LoadedSession;

/// Configuration for batch cycles.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Time between batch cycles.
    pub interval: Duration,
    /// Requests per inference call.
    pub max_batch_size: usize,
    /// A cycle drains up to `max_batch_size * overflow_factor` requests.
    pub overflow_factor: usize,
    /// How long a caller waits for its result.
    pub request_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            max_batch_size: 32,
            overflow_factor: 2,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl BatchConfig {
    pub fn drain_limit(&self) -> usize {
        self.max_batch_size.max(1).saturating_mul(self.overflow_factor.max(1))
    }
}

/// Requests grouped by model path; groups in first-seen order, members in submission order.
pub fn group_by_model(requests: Vec<InferenceRequest>) -> Vec<(PathBuf, Vec<InferenceRequest>)> {
    let mut groups: Vec<(PathBuf, Vec<InferenceRequest>)> = Vec::new();
    for request in requests {
        match groups.iter_mut().find(|(path, _)| *path == request.model_path) {
            Some((_, members)) => members.push(request),
            None => groups.push((request.model_path.clone(), vec![request])),
        }
    }
    groups
}

/// Split a group into chunks of at most `max` requests, preserving order.
pub fn chunk(mut requests: Vec<InferenceRequest>, max: usize) -> Vec<Vec<InferenceRequest>> {
    let max = max.max(1);
    let mut chunks = Vec::with_capacity(requests.len().div_ceil(max));
    while !requests.is_empty() {
        let rest = requests.split_off(requests.len().min(max));
        chunks.push(std::mem::replace(&mut requests, rest));
    }
    chunks
}

/// Features per sample the session expects, if its first input declares them.
pub fn expected_features(session: &LoadedSession) -> Option<usize> {
    session.inputs().first().map(|spec| spec.feature_len())
}

/// Run one stacked call over `rows` and split the first output back into rows.
pub fn run_stacked(
    session: &LoadedSession,
    rows: &[&[f32]],
) -> Result<Vec<Vec<f32>>, ModelError> {
    let input = Tensor::stack_rows(rows)?;
    let outputs = session.run(std::slice::from_ref(&input))?;
    let output = outputs
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::ExecutionFailed("model produced no outputs".into()))?;
    if output.rows() != rows.len() {
        return Err(ModelError::ExecutionFailed(format!(
            "batch of {} produced {} output rows",
            rows.len(),
            output.rows()
        )));
    }
    (0..rows.len())
        .map(|i| {
            output
                .row(i)
                .map(<[f32]>::to_vec)
                .ok_or_else(|| ModelError::ExecutionFailed(format!("missing output row {}", i)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(path: &str, n: f32) -> InferenceRequest {
        InferenceRequest::new(PathBuf::from(path), vec![n]).0
    }

    #[test]
    fn test_grouping_keeps_submission_order() {
        let requests = vec![
            req("a", 1.0),
            req("b", 2.0),
            req("a", 3.0),
            req("b", 4.0),
            req("a", 5.0),
        ];
        let groups = group_by_model(requests);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, PathBuf::from("a"));
        let a: Vec<f32> = groups[0].1.iter().map(|r| r.features[0]).collect();
        assert_eq!(a, vec![1.0, 3.0, 5.0]);
    }

    #[test]
    fn test_chunking() {
        let requests: Vec<_> = (0..7).map(|i| req("a", i as f32)).collect();
        let chunks = chunk(requests, 3);
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(chunks[2][0].features[0], 6.0);
    }

    #[test]
    fn test_drain_limit() {
        assert_eq!(BatchConfig::default().drain_limit(), 64);
    }
}
