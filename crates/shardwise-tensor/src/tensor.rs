//! Tensor - Dense N-Dimensional Array
//!
//! `Tensor` is a row-major `f32` array over reference-counted storage. Views
//! (`transpose`, `narrow`, `squeeze`) share storage with their source and may
//! be non-contiguous; `contiguous` materializes a packed copy.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use core::fmt;
use std::sync::Arc;

use shardwise_core::error::{Error, Result};

use crate::shape::{
    check_block, contiguous_strides, is_contiguous, linear_index, normalize_dim, numel,
    unravel_index, Shape, Strides,
};

// =============================================================================
// Tensor Struct
// =============================================================================

/// An N-dimensional array of `f32` values.
#[derive(Clone)]
pub struct Tensor {
    /// Underlying data storage (reference-counted).
    storage: Arc<Vec<f32>>,
    /// Shape of the tensor (dimensions).
    shape: Shape,
    /// Strides for each dimension.
    strides: Strides,
    /// Offset into storage (for views).
    offset: usize,
}

impl Tensor {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Creates a new tensor from a vector with the given shape.
    ///
    /// # Returns
    /// New tensor, or error if shape doesn't match data length.
    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> Result<Self> {
        if numel(shape) != data.len() {
            return Err(Error::shape_mismatch(&[data.len()], shape));
        }

        let shape = Shape::from_slice(shape);
        let strides = contiguous_strides(&shape);

        Ok(Self {
            storage: Arc::new(data),
            shape,
            strides,
            offset: 0,
        })
    }

    /// Creates a tensor filled with a constant value.
    #[must_use]
    pub fn full(shape: &[usize], value: f32) -> Self {
        Self::packed(vec![value; numel(shape)], shape)
    }

    /// Creates a tensor filled with zeros.
    #[must_use]
    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    /// Creates a tensor holding `0, 1, 2, ...` in row-major order.
    #[must_use]
    pub fn arange(shape: &[usize]) -> Self {
        let data = (0..numel(shape)).map(|i| i as f32).collect();
        Self::packed(data, shape)
    }

    fn packed(data: Vec<f32>, shape: &[usize]) -> Self {
        debug_assert_eq!(data.len(), numel(shape));
        Self {
            storage: Arc::new(data),
            strides: contiguous_strides(shape),
            shape: Shape::from_slice(shape),
            offset: 0,
        }
    }

    // =========================================================================
    // Properties
    // =========================================================================

    /// Returns the shape of the tensor.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the strides of the tensor.
    #[must_use]
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    /// Returns the number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Returns the total number of elements.
    #[must_use]
    pub fn numel(&self) -> usize {
        numel(&self.shape)
    }

    /// Returns true if the tensor has zero elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.numel() == 0
    }

    /// Returns the size of a dimension (supports negative indexing).
    pub fn size(&self, dim: i64) -> Result<usize> {
        let idx = normalize_dim(dim, self.ndim())?;
        Ok(self.shape[idx])
    }

    /// Returns true if the tensor is laid out row-major without gaps.
    #[must_use]
    pub fn is_contiguous(&self) -> bool {
        is_contiguous(&self.shape, &self.strides)
    }

    // =========================================================================
    // Data Access
    // =========================================================================

    /// Returns the element at the given indices.
    pub fn get(&self, indices: &[usize]) -> Result<f32> {
        if indices.len() != self.ndim() {
            return Err(Error::invalid_operation(format!(
                "Expected {} indices, got {}",
                self.ndim(),
                indices.len()
            )));
        }

        for (&idx, &dim) in indices.iter().zip(self.shape.iter()) {
            if idx >= dim {
                return Err(Error::IndexOutOfBounds {
                    index: idx,
                    size: dim,
                });
            }
        }

        Ok(self.storage[self.offset + linear_index(indices, &self.strides)])
    }

    /// Returns the elements in logical row-major order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<f32> {
        if self.is_contiguous() {
            return self.storage[self.offset..self.offset + self.numel()].to_vec();
        }

        (0..self.numel())
            .map(|i| {
                let indices = unravel_index(i, &self.shape);
                self.storage[self.offset + linear_index(&indices, &self.strides)]
            })
            .collect()
    }

    /// Returns a packed copy, or `self` if already packed at offset zero.
    #[must_use]
    pub fn contiguous(&self) -> Self {
        if self.is_contiguous() && self.offset == 0 && self.storage.len() == self.numel() {
            return self.clone();
        }
        Self::packed(self.to_vec(), &self.shape)
    }

    // =========================================================================
    // Shape Operations
    // =========================================================================

    /// Returns a tensor with the same data and a new shape.
    pub fn reshape(&self, new_shape: &[usize]) -> Result<Self> {
        if numel(new_shape) != self.numel() {
            return Err(Error::shape_mismatch(new_shape, &self.shape));
        }
        Ok(Self::packed(self.to_vec(), new_shape))
    }

    /// Swaps two dimensions. The result is a view and usually non-contiguous.
    pub fn transpose(&self, dim0: i64, dim1: i64) -> Result<Self> {
        let d0 = normalize_dim(dim0, self.ndim())?;
        let d1 = normalize_dim(dim1, self.ndim())?;

        let mut shape = self.shape.clone();
        let mut strides = self.strides.clone();
        shape.swap(d0, d1);
        strides.swap(d0, d1);

        Ok(Self {
            storage: Arc::clone(&self.storage),
            shape,
            strides,
            offset: self.offset,
        })
    }

    /// Returns a view of `length` elements along `dim` starting at `start`.
    pub fn narrow(&self, dim: i64, start: usize, length: usize) -> Result<Self> {
        let d = normalize_dim(dim, self.ndim())?;
        let extent = self.shape[d];
        if start + length > extent {
            return Err(Error::IndexOutOfBounds {
                index: start + length,
                size: extent,
            });
        }

        let mut shape = self.shape.clone();
        shape[d] = length;
        let offset = if length == 0 {
            self.offset
        } else {
            self.offset + start * self.strides[d] as usize
        };

        Ok(Self {
            storage: Arc::clone(&self.storage),
            shape,
            strides: self.strides.clone(),
            offset,
        })
    }

    /// Removes `dim` if its extent is 1; otherwise returns the tensor as is.
    pub fn squeeze(&self, dim: i64) -> Result<Self> {
        let d = normalize_dim(dim, self.ndim())?;
        if self.shape[d] != 1 {
            return Ok(self.clone());
        }

        let mut shape = self.shape.clone();
        let mut strides = self.strides.clone();
        shape.remove(d);
        strides.remove(d);

        Ok(Self {
            storage: Arc::clone(&self.storage),
            shape,
            strides,
            offset: self.offset,
        })
    }

    // =========================================================================
    // Arithmetic
    // =========================================================================

    /// Matrix product of two 2-D tensors.
    pub fn matmul(&self, other: &Self) -> Result<Self> {
        if self.ndim() != 2 || other.ndim() != 2 {
            return Err(Error::invalid_operation("matmul requires 2D tensors"));
        }

        let (m, k1) = (self.shape[0], self.shape[1]);
        let (k2, n) = (other.shape[0], other.shape[1]);
        if k1 != k2 {
            return Err(Error::invalid_operation(format!(
                "matmul inner dimensions must match: {k1} vs {k2}"
            )));
        }

        let a = self.to_vec();
        let b = other.to_vec();
        let mut c = vec![0.0; m * n];
        for i in 0..m {
            for p in 0..k1 {
                let a_ip = a[i * k1 + p];
                for j in 0..n {
                    c[i * n + j] += a_ip * b[p * n + j];
                }
            }
        }

        Ok(Self::packed(c, &[m, n]))
    }

    /// Elementwise addition.
    ///
    /// `other` may have the same shape, or be 1-D matching the last
    /// dimension (bias broadcast).
    pub fn add(&self, other: &Self) -> Result<Self> {
        if self.shape == other.shape {
            return self.zip_map(other, |a, b| a + b);
        }

        let last = self.shape.last().copied().unwrap_or(1);
        if other.ndim() != 1 || other.shape[0] != last {
            return Err(Error::shape_mismatch(&self.shape, &other.shape));
        }

        let row = other.to_vec();
        let data = self
            .to_vec()
            .into_iter()
            .enumerate()
            .map(|(i, v)| v + row[i % last])
            .collect();
        Ok(Self::packed(data, &self.shape))
    }

    /// Combines two same-shaped tensors elementwise.
    pub fn zip_map<F>(&self, other: &Self, f: F) -> Result<Self>
    where
        F: Fn(f32, f32) -> f32,
    {
        if self.shape != other.shape {
            return Err(Error::shape_mismatch(&self.shape, &other.shape));
        }
        let data = self
            .to_vec()
            .into_iter()
            .zip(other.to_vec())
            .map(|(a, b)| f(a, b))
            .collect();
        Ok(Self::packed(data, &self.shape))
    }

    // =========================================================================
    // Block Assembly
    // =========================================================================

    /// Copies `block` into this tensor at `offsets`.
    ///
    /// The receiver is packed first if needed; storage shared with other
    /// tensors is copied on write.
    pub fn write_block(&mut self, offsets: &[usize], block: &Self) -> Result<()> {
        check_block(&self.shape, offsets, &block.shape)?;

        if !(self.is_contiguous() && self.offset == 0 && self.storage.len() == self.numel()) {
            *self = self.contiguous();
        }

        let strides = self.strides.clone();
        let values = block.to_vec();
        let dst = Arc::make_mut(&mut self.storage);
        for (i, value) in values.into_iter().enumerate() {
            let mut idx = unravel_index(i, &block.shape);
            for (d, o) in idx.iter_mut().zip(offsets) {
                *d += o;
            }
            dst[linear_index(&idx, &strides)] = value;
        }

        Ok(())
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.to_vec() == other.to_vec()
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape.as_slice())
            .field("contiguous", &self.is_contiguous())
            .field("data", &self.to_vec())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
