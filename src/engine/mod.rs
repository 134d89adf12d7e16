// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Inference runtime seam for MSCORE.
//!
//! Backends turn artifact bytes into [`InferenceSession`]s. The built-in
//! dense-layer backend is always available; the ONNX backend is compiled in
//! with the `onnx` feature.

mod backend;
pub mod dense;
pub mod error;
mod tensor;

#[cfg(feature = "onnx")]
pub mod onnx;

pub use backend::{BackendSet, InferenceSession, ModelBackend};
pub use dense::{Activation, DenseBackend, DenseModel, DenseSession};
pub use error::ModelError;
pub use tensor::{Tensor, TensorSpec};
