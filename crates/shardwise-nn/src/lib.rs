//! shardwise-nn - Module Trees for Parameter Sharding
//!
//! Provides the module abstraction the sharding engine operates on.
//!
//! # Key Components
//!
//! - **Module**: node with a parameter table, named children and hooks
//! - **Parameter**: shared handle; aliases observe each other's updates
//! - **TensorValue**: dense, sharded, replicated or partial value
//! - **Layers**: `linear` (tensor-parallel aware) and `sequential`
//!
//! # Example
//!
//! ```rust
//! use shardwise_nn::prelude::*;
//! use shardwise_tensor::Tensor;
//!
//! let model = sequential(vec![
//!     linear(Tensor::full(&[4, 2], 0.5), None),
//!     linear(Tensor::full(&[2, 4], 0.5), None),
//! ]);
//! let y = model.forward(&TensorValue::Dense(Tensor::full(&[1, 2], 1.0))).unwrap();
//! assert_eq!(y.local_tensor().unwrap().to_vec(), vec![2.0, 2.0]);
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
#![allow(clippy::doc_markdown)]
#![allow(clippy::needless_pass_by_value)]

pub mod layers;
pub mod module;
pub mod parameter;
pub mod sequential;
pub mod value;

// =============================================================================
// Re-exports
// =============================================================================

pub use layers::linear;
pub use module::{Attribute, ForwardFn, ForwardHook, HookHandle, Module};
pub use parameter::Parameter;
pub use sequential::{sequential, sequential_named};
pub use value::TensorValue;

// =============================================================================
// Prelude
// =============================================================================

/// Common imports for building modules.
pub mod prelude {
    pub use crate::{linear, sequential, Module, Parameter, TensorValue};
}
