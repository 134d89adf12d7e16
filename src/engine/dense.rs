// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Built-in dense-layer model format.
//!
//! Layout (little endian):
//!
//! | Field | Size |
//! |---|---|
//! | magic `MSDN` | 4 |
//! | format version (1) | u32 |
//! | inputs | u32 |
//! | outputs | u32 |
//! | weights `[outputs][inputs]` | f32 * outputs * inputs |
//! | biases | f32 * outputs |
//! | activation | u8 |

use std::path::Path;

use super::backend::{InferenceSession, ModelBackend};
use super::error::ModelError;
use super::tensor::{Tensor, TensorSpec};

const MAGIC: &[u8; 4] = b"MSDN";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 16;
/// Guards against absurd headers allocating gigabytes before validation.
const MAX_UNITS: u32 = 1 << 16;

/// Output non-linearity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Activation {
    Identity = 0,
    Sigmoid = 1,
    Tanh = 2,
    Relu = 3,
}

impl Activation {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Identity),
            1 => Some(Self::Sigmoid),
            2 => Some(Self::Tanh),
            3 => Some(Self::Relu),
            _ => None,
        }
    }

    fn apply(self, x: f32) -> f32 {
        match self {
            Self::Identity => x,
            Self::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Self::Tanh => x.tanh(),
            Self::Relu => x.max(0.0),
        }
    }
}

/// A single fully-connected layer: `y = act(W x + b)`.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseModel {
    pub inputs: usize,
    pub outputs: usize,
    pub weights: Vec<f32>,
    pub biases: Vec<f32>,
    pub activation: Activation,
}

impl DenseModel {
    pub fn new(
        inputs: usize,
        outputs: usize,
        weights: Vec<f32>,
        biases: Vec<f32>,
        activation: Activation,
    ) -> Result<Self, ModelError> {
        if inputs == 0 || outputs == 0 {
            return Err(ModelError::InvalidInput(
                "dense layer needs at least one input and output".into(),
            ));
        }
        if weights.len() != inputs * outputs || biases.len() != outputs {
            return Err(ModelError::InvalidInput(format!(
                "dense layer {}x{} needs {} weights and {} biases, got {} and {}",
                outputs,
                inputs,
                inputs * outputs,
                outputs,
                weights.len(),
                biases.len()
            )));
        }
        Ok(Self {
            inputs,
            outputs,
            weights,
            biases,
            activation,
        })
    }

    /// Serialize to the on-disk format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let floats = self.weights.len() + self.biases.len();
        let mut out = Vec::with_capacity(HEADER_LEN + 4 * floats + 1);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.inputs as u32).to_le_bytes());
        out.extend_from_slice(&(self.outputs as u32).to_le_bytes());
        for w in self.weights.iter().chain(self.biases.iter()) {
            out.extend_from_slice(&w.to_le_bytes());
        }
        out.push(self.activation as u8);
        out
    }

    /// Parse the on-disk format.
    pub fn from_bytes(path: &Path, bytes: &[u8]) -> Result<Self, ModelError> {
        if bytes.len() < HEADER_LEN || &bytes[0..4] != MAGIC {
            return Err(ModelError::corrupt(path, "missing MSDN header"));
        }
        let version = read_u32(bytes, 4);
        if version != FORMAT_VERSION {
            return Err(ModelError::corrupt(
                path,
                format!("unsupported format version {}", version),
            ));
        }
        let inputs = read_u32(bytes, 8);
        let outputs = read_u32(bytes, 12);
        if inputs == 0 || outputs == 0 || inputs > MAX_UNITS || outputs > MAX_UNITS {
            return Err(ModelError::corrupt(
                path,
                format!("invalid layer size {}x{}", outputs, inputs),
            ));
        }
        let (inputs, outputs) = (inputs as usize, outputs as usize);
        let floats = inputs * outputs + outputs;
        let expected = HEADER_LEN + floats * 4 + 1;
        if bytes.len() != expected {
            return Err(ModelError::corrupt(
                path,
                format!("expected {} bytes, found {}", expected, bytes.len()),
            ));
        }

        let body = &bytes[HEADER_LEN..HEADER_LEN + floats * 4];
        let values: Vec<f32> = body
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let (weights, biases) = values.split_at(inputs * outputs);
        let activation = Activation::from_byte(bytes[expected - 1])
            .ok_or_else(|| ModelError::corrupt(path, "unknown activation"))?;

        Self::new(inputs, outputs, weights.to_vec(), biases.to_vec(), activation)
            .map_err(|e| ModelError::corrupt(path, e))
    }

    fn forward_row(&self, row: &[f32], out: &mut Vec<f32>) {
        for o in 0..self.outputs {
            let w = &self.weights[o * self.inputs..(o + 1) * self.inputs];
            let acc: f32 = w.iter().zip(row).map(|(a, b)| a * b).sum::<f32>() + self.biases[o];
            out.push(self.activation.apply(acc));
        }
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Session over a parsed [`DenseModel`].
pub struct DenseSession {
    model: DenseModel,
    inputs: Vec<TensorSpec>,
}

impl DenseSession {
    pub fn new(model: DenseModel) -> Self {
        let inputs = vec![TensorSpec::new("features", vec![-1, model.inputs as i64])];
        Self { model, inputs }
    }
}

impl InferenceSession for DenseSession {
    fn inputs(&self) -> &[TensorSpec] {
        &self.inputs
    }

    fn run(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>, ModelError> {
        let input = inputs
            .first()
            .ok_or_else(|| ModelError::InvalidInput("dense model expects one input".into()))?;
        let rows = input.rows();
        if rows == 0 || input.len() != rows * self.model.inputs {
            return Err(ModelError::InvalidInput(format!(
                "expected [batch, {}] input, got shape {:?}",
                self.model.inputs, input.shape
            )));
        }

        let mut out = Vec::with_capacity(rows * self.model.outputs);
        for r in 0..rows {
            let row = &input.data[r * self.model.inputs..(r + 1) * self.model.inputs];
            self.model.forward_row(row, &mut out);
        }
        Ok(vec![Tensor::new(vec![rows, self.model.outputs], out)?])
    }

    fn memory_bytes(&self) -> usize {
        let floats = self.model.weights.capacity() + self.model.biases.capacity();
        std::mem::size_of::<Self>() + floats * std::mem::size_of::<f32>()
    }
}

/// Backend for the dense-layer format.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenseBackend;

impl ModelBackend for DenseBackend {
    fn name(&self) -> &str {
        "dense"
    }

    fn load(&self, path: &Path, bytes: &[u8]) -> Result<Box<dyn InferenceSession>, ModelError> {
        let model = DenseModel::from_bytes(path, bytes)?;
        Ok(Box::new(DenseSession::new(model)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> DenseModel {
        DenseModel::new(2, 1, vec![2.0, -1.0], vec![0.5], Activation::Identity).unwrap()
    }

    #[test]
    fn test_bytes_parse_back() {
        let m = model();
        let parsed = DenseModel::from_bytes(Path::new("m.bin"), &m.to_bytes()).unwrap();
        assert_eq!(parsed, m);
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let bytes = model().to_bytes();
        let truncated = &bytes[..bytes.len() - 3];
        let err = DenseModel::from_bytes(Path::new("m.bin"), truncated).unwrap_err();
        assert!(matches!(err, ModelError::Corrupt { .. }));
    }

    #[test]
    fn test_forward_batch() {
        let session = DenseSession::new(model());
        let input = Tensor::new(vec![2, 2], vec![1.0, 1.0, 3.0, 2.0]).unwrap();
        let out = session.run(&[input]).unwrap();
        assert_eq!(out[0].data, vec![1.5, 4.5]);
    }

    #[test]
    fn test_wrong_width_rejected() {
        let session = DenseSession::new(model());
        let input = Tensor::new(vec![1, 3], vec![1.0, 1.0, 1.0]).unwrap();
        assert!(session.run(&[input]).is_err());
    }
}
