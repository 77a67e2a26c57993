//! Shardwise Distributed - Process Groups and Sharded Values
//!
//! Everything that spans ranks lives here:
//!
//! - **Backends**: the collective [`Backend`] trait and a [`MockBackend`] that
//!   runs one rank per thread inside a single process.
//! - **Process groups**: [`ProcessGroup`] handles, object collectives and the
//!   per-rank default group.
//! - **Sharding specs**: [`ShardingSpec`] with chunk and enumerable layouts.
//! - **Distributed values**: [`ShardedTensor`], [`PartialTensor`] and
//!   [`ReplicatedTensor`].
//! - **Load context**: [`load_with_process_group`] for rebuilding saved values
//!   on a specific group.
//!
//! # Example
//!
//! ```rust
//! use shardwise_distributed::{ProcessGroup, ShardingSpec};
//! use shardwise_tensor::Tensor;
//!
//! let pg = ProcessGroup::mock();
//! let st = ShardingSpec::chunk(0, 1)
//!     .shard(&Tensor::arange(&[4, 2]), 0, Some(&pg))
//!     .unwrap();
//! assert_eq!(st.size(), &[4, 2]);
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

pub mod backend;
pub mod load;
pub mod partial_tensor;
pub mod process_group;
pub mod replicated_tensor;
pub mod sharded_tensor;
pub mod sharding_spec;

// =============================================================================
// Re-exports
// =============================================================================

pub use backend::{Backend, MockBackend, ReduceOp};
pub use load::{
    active_process_group, current_process_group, load_with_process_group, with_process_group,
    ProcessGroupScope,
};
pub use partial_tensor::PartialTensor;
pub use process_group::{
    default_group, destroy_process_group, init_process_group, is_initialized, resolve_group,
    ProcessGroup, World,
};
pub use replicated_tensor::{ReplicatedTensor, ReplicatedTensorState};
pub use sharded_tensor::{Shard, ShardedTensor, ShardedTensorState};
pub use sharding_spec::{
    ChunkShardingSpec, EnumerableShardingSpec, Placement, ShardMetadata, ShardedTensorMetadata,
    ShardingSpec,
};

// =============================================================================
// Prelude
// =============================================================================

/// Common imports for distributed code.
pub mod prelude {
    pub use crate::{
        current_process_group, default_group, init_process_group, load_with_process_group,
        ChunkShardingSpec, PartialTensor, ProcessGroup, ReduceOp, ReplicatedTensor,
        ShardedTensor, ShardingSpec, World,
    };
}
