// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Synthetic health probe run before a session may serve.
//!
//! Inputs are filled with canned values in the range of normalised market
//! features rather than zeros, which can mask broken normalisation.

use std::path::Path;

use crate::engine::{InferenceSession, ModelError, Tensor};

/// Cycled to fill every probe tensor.
const CANNED_FEATURES: [f32; 8] = [0.5, -0.25, 1.0, 0.75, -0.5, 0.1, 1.5, -1.0];

/// One synthetic tensor per declared input; dynamic axes become 1.
pub fn synthetic_inputs(session: &dyn InferenceSession) -> Vec<Tensor> {
    session
        .inputs()
        .iter()
        .map(|spec| {
            let shape = spec.concrete_shape();
            let len = shape.iter().product::<usize>();
            let data = CANNED_FEATURES.iter().copied().cycle().take(len).collect();
            Tensor { shape, data }
        })
        .collect()
}

/// Run one inference over synthetic inputs.
///
/// Fails if the call errors, produces no output, or produces NaN/infinite values.
pub fn probe(path: &Path, session: &dyn InferenceSession) -> Result<(), ModelError> {
    let unhealthy = |reason: String| ModelError::Unhealthy {
        path: path.to_path_buf(),
        reason,
    };

    let inputs = synthetic_inputs(session);
    let outputs = session
        .run(&inputs)
        .map_err(|e| unhealthy(format!("probe inference failed: {}", e)))?;

    if outputs.is_empty() || outputs.iter().all(Tensor::is_empty) {
        return Err(unhealthy("probe produced no outputs".into()));
    }
    if let Some(i) = outputs.iter().position(Tensor::has_non_finite) {
        return Err(unhealthy(format!("output {} contains NaN or infinite values", i)));
    }
    Ok(())
}
