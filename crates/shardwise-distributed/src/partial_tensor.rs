//! `PartialTensor` - Per-rank partial results awaiting reduction
//!
//! Produced by row-parallel layers: every rank holds a tensor of the full
//! output shape whose elementwise reduction across the group is the real
//! value.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use shardwise_core::error::Result;
use shardwise_tensor::Tensor;
use tracing::debug;

use crate::backend::ReduceOp;
use crate::process_group::ProcessGroup;
use crate::sharded_tensor::ShardedTensor;
use crate::sharding_spec::ShardingSpec;

// =============================================================================
// PartialTensor
// =============================================================================

/// A tensor that still needs a cross-rank reduction.
#[derive(Debug, Clone)]
pub struct PartialTensor {
    local: Tensor,
    reduce_op: ReduceOp,
    process_group: ProcessGroup,
}

impl PartialTensor {
    /// Wraps this rank's partial result.
    #[must_use]
    pub fn new(local: Tensor, reduce_op: ReduceOp, process_group: ProcessGroup) -> Self {
        Self {
            local,
            reduce_op,
            process_group,
        }
    }

    /// This rank's contribution.
    #[must_use]
    pub fn local_tensor(&self) -> &Tensor {
        &self.local
    }

    /// Reduction that combines the partials.
    #[must_use]
    pub fn reduce_op(&self) -> ReduceOp {
        self.reduce_op
    }

    /// Group holding the other partials.
    #[must_use]
    pub fn process_group(&self) -> &ProcessGroup {
        &self.process_group
    }

    /// Reduces the partials; every rank receives the full result.
    pub fn reduce(&self) -> Result<Tensor> {
        self.process_group.all_reduce_tensor(&self.local, self.reduce_op)
    }

    /// Reduces the partials and shards the result according to `spec`.
    pub fn reshard(&self, spec: &ShardingSpec) -> Result<ShardedTensor> {
        debug!(
            rank = self.process_group.rank(),
            op = ?self.reduce_op,
            to = %spec,
            "resharding partial tensor"
        );
        let full = self.reduce()?;
        spec.shard_local(&full, &self.process_group)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_reshard_sums_partials() {
        let groups = ProcessGroup::mock_world(2);

        let locals: Vec<Vec<f32>> = thread::scope(|s| {
            let handles: Vec<_> = groups
                .iter()
                .map(|pg| {
                    s.spawn(move || {
                        let base = Tensor::arange(&[2, 2]);
                        let partial = PartialTensor::new(base, ReduceOp::Sum, pg.clone());
                        let st = partial.reshard(&ShardingSpec::chunk(0, 2)).unwrap();
                        st.local_tensor().unwrap().to_vec()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(locals, vec![vec![0.0, 2.0], vec![4.0, 6.0]]);
    }

    #[test]
    fn test_reduce_max_single_rank() {
        let partial = PartialTensor::new(Tensor::full(&[3], 2.0), ReduceOp::Max, ProcessGroup::mock());
        assert_eq!(partial.reduce_op(), ReduceOp::Max);
        assert_eq!(partial.reduce().unwrap().to_vec(), vec![2.0; 3]);
    }
}
