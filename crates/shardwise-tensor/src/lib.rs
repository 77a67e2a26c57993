//! Shardwise Tensor - Dense Strided Tensors
//!
//! A small CPU `f32` tensor with shared storage and strided views. It carries
//! exactly what the sharding layers need: contiguity checks, zero-copy
//! `transpose`/`narrow`/`squeeze` views, block assembly for re-gathering
//! shards and a serializable [`TensorData`] form for collectives.
//!
//! # Example
//! ```rust
//! use shardwise_tensor::Tensor;
//!
//! let t = Tensor::arange(&[2, 3]);
//! assert!(t.is_contiguous());
//!
//! let t_t = t.transpose(0, 1).unwrap();
//! assert!(!t_t.is_contiguous());
//! assert_eq!(t_t.to_vec(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
//! ```
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::float_cmp)]

pub mod data;
pub mod shape;
pub mod tensor;

// =============================================================================
// Re-exports
// =============================================================================

pub use data::TensorData;
pub use shape::{Shape, Strides};
pub use tensor::Tensor;
