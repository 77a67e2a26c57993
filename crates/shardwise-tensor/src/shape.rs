//! Shape and Strides - Tensor Dimension Management
//!
//! Shape and stride arithmetic shared by the tensor views and by the shard
//! metadata code in the distributed layer.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use smallvec::SmallVec;

use shardwise_core::error::{Error, Result};

// =============================================================================
// Type Aliases
// =============================================================================

/// Shape type - dimensions of a tensor.
/// Uses `SmallVec` for stack allocation of small shapes (up to 6 dimensions).
pub type Shape = SmallVec<[usize; 6]>;

/// Strides type - step sizes for each dimension.
pub type Strides = SmallVec<[isize; 6]>;

// =============================================================================
// Shape Utilities
// =============================================================================

/// Computes the total number of elements from a shape.
#[must_use]
pub fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Computes row-major (C-order) strides for a shape.
#[must_use]
pub fn contiguous_strides(shape: &[usize]) -> Strides {
    let mut strides: Strides = SmallVec::from_elem(0, shape.len());
    let mut stride = 1isize;

    for (i, &dim) in shape.iter().enumerate().rev() {
        strides[i] = stride;
        stride *= dim.max(1) as isize;
    }

    strides
}

/// Checks if strides represent a contiguous row-major layout.
///
/// Dimensions of extent 1 never move the cursor, so their stride is ignored.
#[must_use]
pub fn is_contiguous(shape: &[usize], strides: &[isize]) -> bool {
    let expected = contiguous_strides(shape);
    shape
        .iter()
        .zip(strides.iter().zip(expected.iter()))
        .all(|(&dim, (&actual, &wanted))| dim <= 1 || actual == wanted)
}

/// Computes the linear offset from multi-dimensional indices.
#[must_use]
pub fn linear_index(indices: &[usize], strides: &[isize]) -> usize {
    debug_assert_eq!(indices.len(), strides.len());

    let mut offset = 0isize;
    for (&idx, &stride) in indices.iter().zip(strides.iter()) {
        offset += idx as isize * stride;
    }
    offset as usize
}

/// Converts a linear index to multi-dimensional indices.
#[must_use]
pub fn unravel_index(mut linear: usize, shape: &[usize]) -> Vec<usize> {
    let mut indices = vec![0; shape.len()];

    for (i, &dim) in shape.iter().enumerate().rev() {
        if dim == 0 {
            continue;
        }
        indices[i] = linear % dim;
        linear /= dim;
    }

    indices
}

/// Normalizes a dimension index, supporting negative indexing.
pub fn normalize_dim(dim: i64, ndim: usize) -> Result<usize> {
    let ndim_i64 = ndim as i64;

    let normalized = if dim < 0 { dim + ndim_i64 } else { dim };

    if normalized < 0 || normalized >= ndim_i64 {
        return Err(Error::InvalidDimension { index: dim, ndim });
    }

    Ok(normalized as usize)
}

/// Checks that a rectangular block starting at `offsets` with extent `sizes`
/// fits inside `shape`.
pub fn check_block(shape: &[usize], offsets: &[usize], sizes: &[usize]) -> Result<()> {
    if offsets.len() != shape.len() || sizes.len() != shape.len() {
        return Err(Error::invalid_operation(format!(
            "block rank {} does not match tensor rank {}",
            offsets.len().max(sizes.len()),
            shape.len()
        )));
    }

    for ((&off, &size), &dim) in offsets.iter().zip(sizes).zip(shape) {
        match off.checked_add(size) {
            Some(end) if end <= dim => {}
            end => {
                return Err(Error::IndexOutOfBounds {
                    index: end.unwrap_or(off),
                    size: dim,
                });
            }
        }
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numel() {
        assert_eq!(numel(&[2, 3, 4]), 24);
        assert_eq!(numel(&[]), 1);
        assert_eq!(numel(&[4, 0]), 0);
    }

    #[test]
    fn test_contiguous_strides() {
        assert_eq!(contiguous_strides(&[2, 3, 4]).as_slice(), &[12, 4, 1]);
        assert!(contiguous_strides(&[]).is_empty());
    }

    #[test]
    fn test_is_contiguous_ignores_unit_dims() {
        assert!(is_contiguous(&[2, 3], &[3, 1]));
        assert!(!is_contiguous(&[3, 2], &[1, 3]));
        // [1, 16] viewed with an arbitrary leading stride is still contiguous
        assert!(is_contiguous(&[1, 16], &[99, 1]));
    }

    #[test]
    fn test_unravel_round_trip() {
        let shape = [2, 3, 4];
        let strides = contiguous_strides(&shape);
        for linear in 0..numel(&shape) {
            let idx = unravel_index(linear, &shape);
            assert_eq!(linear_index(&idx, &strides), linear);
        }
    }

    #[test]
    fn test_normalize_dim() {
        assert_eq!(normalize_dim(-1, 3).unwrap(), 2);
        assert_eq!(normalize_dim(0, 3).unwrap(), 0);
        assert!(matches!(
            normalize_dim(3, 3),
            Err(Error::InvalidDimension { index: 3, ndim: 3 })
        ));
        assert!(normalize_dim(-4, 3).is_err());
    }

    #[test]
    fn test_check_block() {
        assert!(check_block(&[4, 4], &[2, 0], &[2, 4]).is_ok());
        assert!(check_block(&[4, 4], &[3, 0], &[2, 4]).is_err());
        assert!(check_block(&[4, 4], &[0], &[4]).is_err());
        assert!(matches!(
            check_block(&[4], &[usize::MAX], &[2]),
            Err(Error::IndexOutOfBounds { size: 4, .. })
        ));
    }
}
