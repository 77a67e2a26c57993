//! # Shardwise - Plan-Driven Parameter Sharding
//!
//! Shardwise takes a module built from ordinary dense parameters and, following
//! a declarative [`ShardingPlan`], replaces selected parameters with sharded
//! tensors spread over the ranks of a process group. It can also reshard module
//! outputs between layouts and collapse sharded outputs back to local tensors.
//!
//! All ranks run the same program (SPMD). Sharding is collective: every rank
//! calls [`shard_module`] with the same plan, and ranks verify they agree on
//! each parameter's layout before any data moves.
//!
//! ## Crates
//!
//! - `shardwise-core`: error types
//! - `shardwise-tensor`: dense CPU tensor with strided views
//! - `shardwise-distributed`: process groups, sharding specs, sharded values
//! - `shardwise-nn`: module trees, parameters, hooks, layers
//!
//! # Quick Start
//!
//! ```rust
//! use shardwise::prelude::*;
//!
//! // Single-rank world for illustration; every rank runs the same code.
//! let pg = ProcessGroup::mock();
//! let mut model = sequential(vec![
//!     linear(Tensor::full(&[4, 2], 1.0), None),
//!     linear(Tensor::full(&[2, 4], 1.0), None),
//! ]);
//!
//! let plan = ShardingPlan::builder()
//!     .shard("0.weight", ShardingSpec::chunk(0, 1))
//!     .return_local_tensor("0")
//!     .build();
//! shard_module(&mut model, &plan, 0, Some(&pg)).unwrap();
//!
//! let y = model.forward(&TensorValue::Dense(Tensor::full(&[1, 2], 1.0))).unwrap();
//! assert_eq!(y.local_tensor().unwrap().to_vec(), vec![8.0, 8.0]);
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
#![allow(clippy::needless_pass_by_value)]

pub mod api;
pub mod plan;

// =============================================================================
// Re-exports
// =============================================================================

pub use shardwise_distributed as distributed;
pub use shardwise_nn as nn;
pub use shardwise_tensor as tensor;

pub use api::{
    collect_local_shard, replicate_tensor, reshard_output, shard_module,
    shard_module_with_default, shard_parameter, shard_tensor,
};
pub use plan::{ShardingPlan, ShardingPlanBuilder};
pub use shardwise_core::{Error, Result};
pub use shardwise_distributed::{
    current_process_group, load_with_process_group, with_process_group, ProcessGroupScope,
};

// =============================================================================
// Prelude
// =============================================================================

/// Common imports for sharding a model.
///
/// ```rust
/// use shardwise::prelude::*;
///
/// let t = Tensor::arange(&[2, 2]);
/// assert!(t.is_contiguous());
/// ```
pub mod prelude {
    pub use crate::api::{
        collect_local_shard, replicate_tensor, reshard_output, shard_module,
        shard_module_with_default, shard_parameter, shard_tensor,
    };
    pub use crate::plan::ShardingPlan;

    pub use shardwise_core::{Error, Result};
    pub use shardwise_distributed::{
        current_process_group, default_group, init_process_group, load_with_process_group,
        ChunkShardingSpec, EnumerableShardingSpec, PartialTensor, Placement, ProcessGroup,
        ReduceOp, ReplicatedTensor, ShardMetadata, ShardedTensor, ShardingSpec, World,
    };
    pub use shardwise_nn::{linear, sequential, Module, Parameter, TensorValue};
    pub use shardwise_tensor::Tensor;
}
