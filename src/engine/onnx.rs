// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! ONNX inference backend using Candle.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use candle_core::{DType, Device};
use candle_onnx::onnx::{tensor_shape_proto::dimension, type_proto, ModelProto};

use super::backend::{InferenceSession, ModelBackend};
use super::error::ModelError;
use super::tensor::{Tensor, TensorSpec};

/// Loads `.onnx` graphs and evaluates them on the CPU.
#[derive(Debug, Default, Clone, Copy)]
pub struct OnnxBackend;

impl ModelBackend for OnnxBackend {
    fn name(&self) -> &str {
        "onnx"
    }

    fn load(&self, path: &Path, _bytes: &[u8]) -> Result<Box<dyn InferenceSession>, ModelError> {
        let model = candle_onnx::read_file(path).map_err(|e| ModelError::load_failed(path, e))?;
        let graph = model
            .graph
            .as_ref()
            .ok_or_else(|| ModelError::corrupt(path, "onnx file has no graph"))?;

        let initializers: HashSet<&str> = graph
            .initializer
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        let memory_bytes = graph
            .initializer
            .iter()
            .map(|t| t.raw_data.len() + t.float_data.len() * 4 + t.double_data.len() * 8)
            .sum();

        let inputs = graph
            .input
            .iter()
            .filter(|i| !initializers.contains(i.name.as_str()))
            .map(|i| TensorSpec::new(i.name.clone(), declared_dims(i)))
            .collect();
        let outputs = graph.output.iter().map(|o| o.name.clone()).collect();

        Ok(Box::new(OnnxSession {
            model,
            inputs,
            outputs,
            memory_bytes,
        }))
    }
}

fn declared_dims(info: &candle_onnx::onnx::ValueInfoProto) -> Vec<i64> {
    let declared = info.r#type.as_ref().and_then(|t| t.value.as_ref());
    let Some(type_proto::Value::TensorType(tensor)) = declared else {
        return vec![-1];
    };
    let Some(shape) = tensor.shape.as_ref() else {
        return vec![-1];
    };
    shape
        .dim
        .iter()
        .map(|d| match d.value {
            Some(dimension::Value::DimValue(v)) => v,
            _ => -1,
        })
        .collect()
}

struct OnnxSession {
    model: ModelProto,
    inputs: Vec<TensorSpec>,
    outputs: Vec<String>,
    memory_bytes: usize,
}

impl InferenceSession for OnnxSession {
    fn inputs(&self) -> &[TensorSpec] {
        &self.inputs
    }

    fn run(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>, ModelError> {
        if inputs.len() != self.inputs.len() {
            return Err(ModelError::InvalidInput(format!(
                "model declares {} inputs, got {}",
                self.inputs.len(),
                inputs.len()
            )));
        }

        let mut feeds = HashMap::with_capacity(inputs.len());
        for (spec, tensor) in self.inputs.iter().zip(inputs) {
            let shape = tensor.shape.as_slice();
            let t = candle_core::Tensor::from_vec(tensor.data.clone(), shape, &Device::Cpu)
                .map_err(|e| ModelError::InvalidInput(e.to_string()))?;
            feeds.insert(spec.name.clone(), t);
        }

        let mut results = candle_onnx::simple_eval(&self.model, feeds)
            .map_err(|e| ModelError::ExecutionFailed(e.to_string()))?;

        let mut out = Vec::with_capacity(self.outputs.len());
        for name in &self.outputs {
            let t = results
                .remove(name)
                .ok_or_else(|| ModelError::ExecutionFailed(format!("missing output {}", name)))?;
            let shape = t.dims().to_vec();
            let data = t
                .to_dtype(DType::F32)
                .and_then(|t| t.flatten_all())
                .and_then(|t| t.to_vec1::<f32>())
                .map_err(|e| ModelError::ExecutionFailed(e.to_string()))?;
            out.push(Tensor::new(shape, data)?);
        }
        Ok(out)
    }

    fn memory_bytes(&self) -> usize {
        self.memory_bytes
    }
}
