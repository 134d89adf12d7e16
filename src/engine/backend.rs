// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Inference runtime seam: a backend turns artifact bytes into a session.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::error::ModelError;
use super::tensor::{Tensor, TensorSpec};

/// A runnable model instance.
///
/// `run` takes one tensor per declared input, each with the batch on its
/// leading axis, and returns one or more output tensors batched the same way.
pub trait InferenceSession: Send + Sync {
    fn inputs(&self) -> &[TensorSpec];

    fn run(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>, ModelError>;

    /// Bytes owned by this session. Known exactly by construction.
    fn memory_bytes(&self) -> usize;
}

/// Constructs sessions from artifact bytes.
pub trait ModelBackend: Send + Sync {
    fn name(&self) -> &str;

    fn load(&self, path: &Path, bytes: &[u8]) -> Result<Box<dyn InferenceSession>, ModelError>;
}

/// Routes artifact file extensions to backends.
#[derive(Clone)]
pub struct BackendSet {
    by_extension: HashMap<String, Arc<dyn ModelBackend>>,
    default: Arc<dyn ModelBackend>,
}

impl BackendSet {
    pub fn new(default: Arc<dyn ModelBackend>) -> Self {
        Self {
            by_extension: HashMap::new(),
            default,
        }
    }

    /// Register a backend for a file extension (without the dot, case-insensitive).
    pub fn with_extension(mut self, ext: &str, backend: Arc<dyn ModelBackend>) -> Self {
        self.by_extension.insert(ext.to_ascii_lowercase(), backend);
        self
    }

    /// Backend responsible for `path`.
    pub fn for_path(&self, path: &Path) -> Arc<dyn ModelBackend> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| self.by_extension.get(&e.to_ascii_lowercase()))
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

impl Default for BackendSet {
    /// Dense backend for everything; the ONNX backend for `.onnx` when compiled in.
    fn default() -> Self {
        let set = Self::new(Arc::new(super::dense::DenseBackend));
        #[cfg(feature = "onnx")]
        let set = set.with_extension("onnx", Arc::new(super::onnx::OnnxBackend::default()));
        set
    }
}

impl std::fmt::Debug for BackendSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSet")
            .field("extensions", &self.by_extension.keys().collect::<Vec<_>>())
            .field("default", &self.default.name())
            .finish()
    }
}
