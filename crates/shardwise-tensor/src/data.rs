//! Tensor Data - Serializable tensor payload
//!
//! Plain shape + values form of a [`Tensor`], used wherever a tensor has to
//! cross a collective or be written into a saved state.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use serde::{Deserialize, Serialize};
use shardwise_core::Result;

use crate::tensor::Tensor;

// =============================================================================
// TensorData
// =============================================================================

/// Serializable tensor data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorData {
    /// Shape of the tensor.
    pub shape: Vec<usize>,
    /// Flattened row-major values.
    pub values: Vec<f32>,
}

impl TensorData {
    /// Create `TensorData` from a Tensor.
    #[must_use]
    pub fn from_tensor(tensor: &Tensor) -> Self {
        Self {
            shape: tensor.shape().to_vec(),
            values: tensor.to_vec(),
        }
    }

    /// Convert `TensorData` back to a Tensor.
    pub fn to_tensor(&self) -> Result<Tensor> {
        Tensor::from_vec(self.values.clone(), &self.shape)
    }

    /// Consume into a Tensor without copying the values.
    pub fn into_tensor(self) -> Result<Tensor> {
        Tensor::from_vec(self.values, &self.shape)
    }
}

impl From<&Tensor> for TensorData {
    fn from(tensor: &Tensor) -> Self {
        Self::from_tensor(tensor)
    }
}

// =============================================================================
// Tests
// =============================================================================
