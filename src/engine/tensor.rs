// Copyright 2024-2026 MSCORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Minimal dense f32 tensor used at the inference-runtime seam.

use super::error::ModelError;

/// Declared model input: name plus dimensions (`-1` marks a dynamic axis).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSpec {
    pub name: String,
    pub dims: Vec<i64>,
}

impl TensorSpec {
    pub fn new(name: impl Into<String>, dims: Vec<i64>) -> Self {
        Self {
            name: name.into(),
            dims,
        }
    }

    /// Concrete shape with every dynamic (or non-positive) axis set to 1.
    pub fn concrete_shape(&self) -> Vec<usize> {
        self.dims
            .iter()
            .map(|&d| if d > 0 { d as usize } else { 1 })
            .collect()
    }

    /// Number of features per sample (product of all axes after the batch axis).
    pub fn feature_len(&self) -> usize {
        self.concrete_shape().iter().skip(1).product::<usize>().max(1)
    }
}

/// Row-major dense tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Tensor {
    /// Build a tensor, rejecting data whose length disagrees with the shape.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, ModelError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ModelError::InvalidInput(format!(
                "shape {:?} needs {} elements, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Stack equally sized rows into a `[rows, width]` tensor.
    pub fn stack_rows(rows: &[&[f32]]) -> Result<Self, ModelError> {
        let width = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * width);
        for row in rows {
            if row.len() != width {
                return Err(ModelError::InvalidInput(format!(
                    "ragged batch: expected {} features, got {}",
                    width,
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }
        Self::new(vec![rows.len(), width], data)
    }

    /// Number of rows along the leading axis.
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Borrow row `i` of a tensor whose leading axis is the batch axis.
    pub fn row(&self, i: usize) -> Option<&[f32]> {
        let rows = self.rows();
        if i >= rows || rows == 0 {
            return None;
        }
        let width = self.data.len() / rows;
        self.data.get(i * width..(i + 1) * width)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True if any element is NaN or infinite.
    pub fn has_non_finite(&self) -> bool {
        self.data.iter().any(|v| !v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_dims_become_one() {
        let spec = TensorSpec::new("features", vec![-1, 4]);
        assert_eq!(spec.concrete_shape(), vec![1, 4]);
        assert_eq!(spec.feature_len(), 4);
    }

    #[test]
    fn test_stack_rows_is_row_major() {
        let a = [1.0, 2.0];
        let b = [3.0, 4.0];
        let t = Tensor::stack_rows(&[&a, &b]).unwrap();
        assert_eq!(t.shape, vec![2, 2]);
        assert_eq!(t.row(1), Some(&b[..]));
    }

    #[test]
    fn test_stack_rows_rejects_ragged() {
        let a = [1.0, 2.0];
        let b = [3.0];
        assert!(Tensor::stack_rows(&[&a, &b]).is_err());
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        assert!(Tensor::new(vec![2, 3], vec![0.0; 5]).is_err());
    }
}
