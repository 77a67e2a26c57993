//! Tensor Values - Polymorphic module attribute and forward values
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use shardwise_core::error::{Error, Result};
use shardwise_distributed::{PartialTensor, ReplicatedTensor, ShardedTensor, ShardingSpec};
use shardwise_tensor::Tensor;

// =============================================================================
// TensorValue
// =============================================================================

/// A value stored in a parameter or flowing through a forward pass.
#[derive(Debug, Clone)]
pub enum TensorValue {
    /// Ordinary local tensor.
    Dense(Tensor),
    /// Tensor split across ranks.
    Sharded(ShardedTensor),
    /// Tensor held identically by every rank.
    Replicated(ReplicatedTensor),
    /// Per-rank partial result awaiting reduction.
    Partial(PartialTensor),
}

impl TensorValue {
    /// Type name used in error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Dense(_) => "Tensor",
            Self::Sharded(_) => "ShardedTensor",
            Self::Replicated(_) => "ReplicatedTensor",
            Self::Partial(_) => "PartialTensor",
        }
    }

    /// Returns the dense tensor for dense and replicated values.
    #[must_use]
    pub fn as_dense(&self) -> Option<&Tensor> {
        match self {
            Self::Dense(t) => Some(t),
            Self::Replicated(r) => Some(r.tensor()),
            Self::Sharded(_) | Self::Partial(_) => None,
        }
    }

    /// Returns true for values that can be sharded directly.
    #[must_use]
    pub fn is_tensor_like(&self) -> bool {
        self.as_dense().is_some()
    }

    /// Returns the sharded tensor, if this is one.
    #[must_use]
    pub fn as_sharded(&self) -> Option<&ShardedTensor> {
        match self {
            Self::Sharded(st) => Some(st),
            _ => None,
        }
    }

    /// Returns the partial tensor, if this is one.
    #[must_use]
    pub fn as_partial(&self) -> Option<&PartialTensor> {
        match self {
            Self::Partial(pt) => Some(pt),
            _ => None,
        }
    }

    /// Layout of a sharded value.
    #[must_use]
    pub fn sharding_spec(&self) -> Option<&ShardingSpec> {
        self.as_sharded().map(ShardedTensor::sharding_spec)
    }

    /// The tensor this rank holds.
    ///
    /// Sharded values must have exactly one local shard; partial values
    /// return the unreduced local contribution.
    pub fn local_tensor(&self) -> Result<Tensor> {
        match self {
            Self::Dense(t) => Ok(t.clone()),
            Self::Replicated(r) => Ok(r.tensor().clone()),
            Self::Sharded(st) => st.local_tensor(),
            Self::Partial(pt) => Ok(pt.local_tensor().clone()),
        }
    }

    /// Unwraps a dense value.
    pub fn into_dense(self) -> Result<Tensor> {
        match self {
            Self::Dense(t) => Ok(t),
            Self::Replicated(r) => Ok(r.into_tensor()),
            other => Err(Error::invalid_operation(format!(
                "expected a dense tensor, found {}",
                other.kind()
            ))),
        }
    }
}

impl From<Tensor> for TensorValue {
    fn from(t: Tensor) -> Self {
        Self::Dense(t)
    }
}

impl From<ShardedTensor> for TensorValue {
    fn from(st: ShardedTensor) -> Self {
        Self::Sharded(st)
    }
}

impl From<ReplicatedTensor> for TensorValue {
    fn from(rt: ReplicatedTensor) -> Self {
        Self::Replicated(rt)
    }
}

impl From<PartialTensor> for TensorValue {
    fn from(pt: PartialTensor) -> Self {
        Self::Partial(pt)
    }
}

// =============================================================================
// Tests
// =============================================================================
