//! `ReplicatedTensor` - The same tensor held in full on every rank
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use serde::{Deserialize, Serialize};
use shardwise_core::error::{Error, Result};
use shardwise_tensor::{Tensor, TensorData};
use tracing::warn;

use crate::load::current_process_group;
use crate::process_group::ProcessGroup;

// =============================================================================
// ReplicatedTensor
// =============================================================================

/// A dense tensor that every rank of a group holds identically.
#[derive(Debug, Clone)]
pub struct ReplicatedTensor {
    tensor: Tensor,
    process_group: ProcessGroup,
}

impl ReplicatedTensor {
    /// Marks `tensor` as replicated over `process_group`.
    ///
    /// No communication happens; use [`validate`](Self::validate) to check
    /// the ranks agree.
    #[must_use]
    pub fn new(tensor: Tensor, process_group: ProcessGroup) -> Self {
        Self {
            tensor,
            process_group,
        }
    }

    /// The replicated data.
    #[must_use]
    pub fn tensor(&self) -> &Tensor {
        &self.tensor
    }

    /// Consumes the wrapper.
    #[must_use]
    pub fn into_tensor(self) -> Tensor {
        self.tensor
    }

    /// The group over which the tensor is replicated.
    #[must_use]
    pub fn process_group(&self) -> &ProcessGroup {
        &self.process_group
    }

    /// Checks every rank holds the same data. Collective.
    pub fn validate(&self) -> Result<()> {
        let rank = self.process_group.rank();
        let mine = TensorData::from_tensor(&self.tensor);
        let gathered = self.process_group.all_gather_object(&mine)?;

        for (peer, data) in gathered.iter().enumerate() {
            if *data != mine {
                warn!(rank, peer, "replicated tensor diverged");
                return Err(Error::inconsistent(
                    "ReplicatedTensor",
                    rank,
                    format!("{:?}", mine.values),
                    peer,
                    format!("{:?}", data.values),
                ));
            }
        }
        Ok(())
    }

    /// Serializable snapshot.
    #[must_use]
    pub fn state(&self) -> ReplicatedTensorState {
        ReplicatedTensorState {
            data: TensorData::from_tensor(&self.tensor),
        }
    }

    /// Rebuilds a replicated tensor on the current process group.
    pub fn load(state: ReplicatedTensorState) -> Result<Self> {
        let pg = current_process_group()?;
        Ok(Self::new(state.data.into_tensor()?, pg))
    }
}

impl PartialEq for ReplicatedTensor {
    fn eq(&self, other: &Self) -> bool {
        self.tensor == other.tensor && self.process_group.ptr_eq(&other.process_group)
    }
}

/// Serialized form of a [`ReplicatedTensor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicatedTensorState {
    /// Tensor contents.
    pub data: TensorData,
}

// =============================================================================
// Tests
// =============================================================================
