//! `ShardedTensor` - A tensor split across the ranks of a process group
//!
//! Each rank holds only its own shards plus the global layout. Collective
//! methods (`gather`, `reshard`) must be called on every rank of the group.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use serde::{Deserialize, Serialize};
use shardwise_core::error::{Error, Result};
use shardwise_tensor::{Tensor, TensorData};
use tracing::debug;

use crate::load::current_process_group;
use crate::process_group::ProcessGroup;
use crate::sharding_spec::{ShardMetadata, ShardedTensorMetadata, ShardingSpec};

// =============================================================================
// Shard
// =============================================================================

/// A locally held shard and where it sits in the global tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Shard {
    tensor: Tensor,
    metadata: ShardMetadata,
}

impl Shard {
    /// Pairs a local tensor with its metadata.
    #[must_use]
    pub fn new(tensor: Tensor, metadata: ShardMetadata) -> Self {
        Self { tensor, metadata }
    }

    /// The local data.
    #[must_use]
    pub fn tensor(&self) -> &Tensor {
        &self.tensor
    }

    /// Where the data belongs.
    #[must_use]
    pub fn metadata(&self) -> &ShardMetadata {
        &self.metadata
    }
}

// =============================================================================
// ShardedTensor
// =============================================================================

/// A tensor whose data is distributed across ranks.
#[derive(Debug, Clone)]
pub struct ShardedTensor {
    local_shards: Vec<Shard>,
    metadata: ShardedTensorMetadata,
    sharding_spec: ShardingSpec,
    process_group: ProcessGroup,
}

impl ShardedTensor {
    /// Assembles a sharded tensor from shards already held by this rank.
    ///
    /// Every local shard must be listed in `metadata`, be placed on this
    /// rank and have the listed size.
    pub fn from_local_shards(
        local_shards: Vec<Shard>,
        metadata: ShardedTensorMetadata,
        sharding_spec: ShardingSpec,
        process_group: ProcessGroup,
    ) -> Result<Self> {
        let rank = process_group.rank();
        for shard in &local_shards {
            let md = shard.metadata();
            if md.placement.rank() != rank {
                return Err(Error::invalid_input(format!(
                    "local shard placed on {} cannot live on rank {rank}",
                    md.placement
                )));
            }
            if shard.tensor().shape() != md.shard_sizes.as_slice() {
                return Err(Error::shape_mismatch(&md.shard_sizes, shard.tensor().shape()));
            }
            if !metadata.shards_metadata.contains(md) {
                return Err(Error::invalid_input(format!(
                    "local shard {md:?} is not part of the global metadata"
                )));
            }
        }

        Ok(Self {
            local_shards,
            metadata,
            sharding_spec,
            process_group,
        })
    }

    /// Shards held by this rank.
    #[must_use]
    pub fn local_shards(&self) -> &[Shard] {
        &self.local_shards
    }

    /// The single local shard's data.
    pub fn local_tensor(&self) -> Result<Tensor> {
        match self.local_shards.as_slice() {
            [shard] => Ok(shard.tensor().clone()),
            shards => Err(Error::invalid_operation(format!(
                "local_tensor() requires exactly one local shard, rank {} holds {}",
                self.process_group.rank(),
                shards.len()
            ))),
        }
    }

    /// Global layout.
    #[must_use]
    pub fn metadata(&self) -> &ShardedTensorMetadata {
        &self.metadata
    }

    /// Layout this tensor was sharded with.
    #[must_use]
    pub fn sharding_spec(&self) -> &ShardingSpec {
        &self.sharding_spec
    }

    /// Size of the global tensor.
    #[must_use]
    pub fn size(&self) -> &[usize] {
        &self.metadata.size
    }

    /// Group the shards are spread over.
    #[must_use]
    pub fn process_group(&self) -> &ProcessGroup {
        &self.process_group
    }

    /// Reassembles the full tensor on every rank.
    pub fn gather(&self) -> Result<Tensor> {
        let mine: Vec<(ShardMetadata, TensorData)> = self
            .local_shards
            .iter()
            .map(|s| (s.metadata.clone(), TensorData::from_tensor(&s.tensor)))
            .collect();

        let mut full = Tensor::zeros(&self.metadata.size);
        for (md, data) in self.process_group.all_gather_object(&mine)?.into_iter().flatten() {
            full.write_block(&md.shard_offsets, &data.into_tensor()?)?;
        }
        Ok(full)
    }

    /// Redistributes the data according to `spec`.
    pub fn reshard(&self, spec: &ShardingSpec) -> Result<Self> {
        if *spec == self.sharding_spec {
            return Ok(self.clone());
        }

        debug!(
            rank = self.process_group.rank(),
            from = %self.sharding_spec,
            to = %spec,
            "resharding tensor"
        );
        let full = self.gather()?;
        spec.shard_local(&full, &self.process_group)
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Serializable snapshot of this rank's view.
    #[must_use]
    pub fn state(&self) -> ShardedTensorState {
        ShardedTensorState {
            sharding_spec: self.sharding_spec.clone(),
            metadata: self.metadata.clone(),
            local_shards: self
                .local_shards
                .iter()
                .map(|s| (s.metadata.clone(), TensorData::from_tensor(&s.tensor)))
                .collect(),
        }
    }

    /// Rebuilds a sharded tensor on the current process group.
    ///
    /// Uses the group installed by
    /// [`load_with_process_group`](crate::load::load_with_process_group) if
    /// one is active, else the default group.
    pub fn load(state: ShardedTensorState) -> Result<Self> {
        let pg = current_process_group()?;
        let local_shards = state
            .local_shards
            .into_iter()
            .map(|(md, data)| Ok(Shard::new(data.into_tensor()?, md)))
            .collect::<Result<Vec<Shard>>>()?;

        Self::from_local_shards(local_shards, state.metadata, state.sharding_spec, pg)
    }
}

impl PartialEq for ShardedTensor {
    fn eq(&self, other: &Self) -> bool {
        self.local_shards == other.local_shards
            && self.metadata == other.metadata
            && self.sharding_spec == other.sharding_spec
            && self.process_group.ptr_eq(&other.process_group)
    }
}

/// Serialized form of a [`ShardedTensor`] as seen from one rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardedTensorState {
    /// Sharding layout.
    pub sharding_spec: ShardingSpec,
    /// Global layout.
    pub metadata: ShardedTensorMetadata,
    /// This rank's shards.
    pub local_shards: Vec<(ShardMetadata, TensorData)>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::load_with_process_group;
    use crate::sharding_spec::Placement;
    use std::thread;

    fn run_ranks<T, F>(world_size: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(&ProcessGroup) -> T + Sync,
    {
        let groups = ProcessGroup::mock_world(world_size);
        let f = &f;
        thread::scope(|s| {
            let handles: Vec<_> = groups.iter().map(|pg| s.spawn(move || f(pg))).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    #[test]
    fn test_uneven_chunks() {
        let sizes = run_ranks(2, |pg| {
            let st = ShardingSpec::chunk(0, 2)
                .shard(&Tensor::arange(&[5, 2]), 0, Some(pg))
                .unwrap();
            st.local_tensor().unwrap().shape().to_vec()
        });
        assert_eq!(sizes, vec![vec![3, 2], vec![2, 2]]);
    }

    #[test]
    fn test_gather_reproduces_source() {
        let source = Tensor::arange(&[3, 4]);
        let gathered = run_ranks(3, |pg| {
            let st = ShardingSpec::chunk(1, 3).shard(&source, 0, Some(pg)).unwrap();
            assert_eq!(st.size(), &[3, 4]);
            st.gather().unwrap()
        });
        for full in gathered {
            assert_eq!(full, source);
        }
    }

    #[test]
    fn test_reshard_changes_dim() {
        let source = Tensor::arange(&[4, 4]);
        let locals = run_ranks(2, |pg| {
            let st = ShardingSpec::chunk(0, 2).shard(&source, 0, Some(pg)).unwrap();
            let rs = st.reshard(&ShardingSpec::chunk(1, 2)).unwrap();
            assert_eq!(rs.sharding_spec(), &ShardingSpec::chunk(1, 2));
            rs.local_tensor().unwrap()
        });
        assert_eq!(locals[0], source.narrow(1, 0, 2).unwrap().contiguous());
        assert_eq!(locals[1], source.narrow(1, 2, 2).unwrap().contiguous());
    }

    #[test]
    fn test_reshard_same_spec_is_noop() {
        let pg = ProcessGroup::mock();
        let spec = ShardingSpec::chunk(0, 1);
        let st = spec.shard(&Tensor::arange(&[2]), 0, Some(&pg)).unwrap();
        assert_eq!(st.reshard(&spec).unwrap(), st);
    }

    #[test]
    fn test_from_local_shards_validates() {
        let pg = ProcessGroup::mock();
        let md = ShardMetadata::new(vec![0], vec![2], Placement::cpu(0));
        let metadata = ShardedTensorMetadata {
            shards_metadata: vec![md.clone()],
            size: vec![2],
        };
        let spec = ShardingSpec::chunk(0, 1);

        let wrong_shape = Shard::new(Tensor::zeros(&[3]), md.clone());
        assert!(matches!(
            ShardedTensor::from_local_shards(vec![wrong_shape], metadata.clone(), spec.clone(), pg.clone()),
            Err(Error::ShapeMismatch { .. })
        ));

        let other_rank = ShardMetadata::new(vec![0], vec![2], Placement::cpu(1));
        let misplaced = Shard::new(Tensor::zeros(&[2]), other_rank);
        assert!(ShardedTensor::from_local_shards(vec![misplaced], metadata.clone(), spec.clone(), pg.clone()).is_err());

        let ok = Shard::new(Tensor::zeros(&[2]), md);
        assert!(ShardedTensor::from_local_shards(vec![ok], metadata, spec, pg).is_ok());
    }

    #[test]
    fn test_state_load_uses_scoped_group() {
        let pg = ProcessGroup::mock();
        let st = ShardingSpec::chunk(0, 1)
            .shard(&Tensor::arange(&[2, 2]), 0, Some(&pg))
            .unwrap();
        let json = serde_json::to_string(&st.state()).unwrap();
        let state: ShardedTensorState = serde_json::from_str(&json).unwrap();

        let target = ProcessGroup::mock();
        let loaded = {
            let _scope = load_with_process_group(&target).unwrap();
            ShardedTensor::load(state).unwrap()
        };
        assert!(loaded.process_group().ptr_eq(&target));
        assert_eq!(loaded.local_tensor().unwrap(), st.local_tensor().unwrap());
    }
}
