//! `ProcessGroup` - Process Group Abstraction
//!
//! A process group is a cheap handle over a communication backend. This
//! module also owns the per-rank default group that operations fall back to
//! when no explicit group is passed.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use shardwise_core::error::{Error, Result};
use shardwise_tensor::{Tensor, TensorData};
use tracing::debug;

use crate::backend::{Backend, MockBackend, ReduceOp};

// =============================================================================
// ProcessGroup
// =============================================================================

/// A group of processes that can communicate with each other.
#[derive(Clone)]
pub struct ProcessGroup {
    backend: Arc<dyn Backend>,
    ranks: Vec<usize>,
}

impl ProcessGroup {
    /// Creates a new process group with all ranks.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let world_size = backend.world_size();
        Self {
            backend,
            ranks: (0..world_size).collect(),
        }
    }

    /// Creates one process group per rank of a fresh mock world.
    #[must_use]
    pub fn mock_world(world_size: usize) -> Vec<Self> {
        MockBackend::create_world(world_size)
            .into_iter()
            .map(|backend| Self::new(Arc::new(backend)))
            .collect()
    }

    /// Creates a mock process group for testing.
    #[must_use]
    pub fn mock() -> Self {
        Self::new(Arc::new(MockBackend::single()))
    }

    /// Returns the backend.
    #[must_use]
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Returns the rank of this process.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.backend.rank()
    }

    /// Returns the world size.
    #[must_use]
    pub fn world_size(&self) -> usize {
        self.backend.world_size()
    }

    /// Returns the ranks in this group.
    #[must_use]
    pub fn ranks(&self) -> &[usize] {
        &self.ranks
    }

    /// Checks if a rank is part of the group.
    #[must_use]
    pub fn contains(&self, rank: usize) -> bool {
        self.ranks.contains(&rank)
    }

    /// Returns true if both handles refer to the same backend.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::as_ptr(&self.backend).cast::<()>() == Arc::as_ptr(&other.backend).cast::<()>()
    }

    /// Synchronizes all processes in the group.
    pub fn barrier(&self) -> Result<()> {
        self.backend.barrier()
    }

    // =========================================================================
    // Object Collectives
    // =========================================================================

    /// Gathers a serializable value from every rank, indexed by rank.
    pub fn all_gather_object<T>(&self, value: &T) -> Result<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        let payload = serde_json::to_vec(value).map_err(|e| Error::serialization(e.to_string()))?;
        self.backend
            .all_gather_bytes(&payload)?
            .iter()
            .map(|bytes| {
                serde_json::from_slice(bytes).map_err(|e| Error::serialization(e.to_string()))
            })
            .collect()
    }

    /// Broadcasts a value from `src`. Only the source rank needs to supply it.
    pub fn broadcast_object<T>(&self, value: Option<&T>, src: usize) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let payload = match value {
            Some(v) if self.rank() == src => {
                serde_json::to_vec(v).map_err(|e| Error::serialization(e.to_string()))?
            }
            None if self.rank() == src => {
                return Err(Error::invalid_input(format!(
                    "rank {src} is the broadcast source but supplied no value"
                )))
            }
            _ => Vec::new(),
        };

        let bytes = self.backend.broadcast_bytes(&payload, src)?;
        serde_json::from_slice(&bytes).map_err(|e| Error::serialization(e.to_string()))
    }

    // =========================================================================
    // Tensor Collectives
    // =========================================================================

    /// Gathers a tensor from every rank, indexed by rank.
    pub fn all_gather_tensor(&self, tensor: &Tensor) -> Result<Vec<Tensor>> {
        self.all_gather_object(&TensorData::from_tensor(tensor))?
            .into_iter()
            .map(TensorData::into_tensor)
            .collect()
    }

    /// Reduces same-shaped tensors from every rank; every rank gets the result.
    pub fn all_reduce_tensor(&self, tensor: &Tensor, op: ReduceOp) -> Result<Tensor> {
        let gathered = self.all_gather_object(&TensorData::from_tensor(tensor))?;
        if let Some(bad) = gathered.iter().find(|d| d.shape != tensor.shape()) {
            return Err(Error::shape_mismatch(tensor.shape(), &bad.shape));
        }

        let slices: Vec<Vec<f32>> = gathered.into_iter().map(|d| d.values).collect();
        Tensor::from_vec(op.reduce_slices(&slices), tensor.shape())
    }
}

impl fmt::Debug for ProcessGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessGroup")
            .field("backend", &self.backend.name())
            .field("rank", &self.rank())
            .field("world_size", &self.world_size())
            .finish()
    }
}

// =============================================================================
// Default Group
// =============================================================================

thread_local! {
    /// Default process group of the rank driven by this thread.
    static DEFAULT_GROUP: RefCell<Option<ProcessGroup>> = const { RefCell::new(None) };
}

/// Installs `group` as this rank's default process group.
pub fn init_process_group(group: ProcessGroup) -> Result<()> {
    DEFAULT_GROUP.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_some() {
            return Err(Error::invalid_operation(
                "trying to initialize the default process group twice!",
            ));
        }
        debug!(rank = group.rank(), world_size = group.world_size(), "default process group initialized");
        *slot = Some(group);
        Ok(())
    })
}

/// Returns true if a default process group is installed.
#[must_use]
pub fn is_initialized() -> bool {
    DEFAULT_GROUP.with(|slot| slot.borrow().is_some())
}

/// Returns this rank's default process group.
pub fn default_group() -> Result<ProcessGroup> {
    DEFAULT_GROUP.with(|slot| slot.borrow().clone().ok_or(Error::DefaultGroupNotInitialized))
}

/// Removes the default process group, if any.
pub fn destroy_process_group() {
    DEFAULT_GROUP.with(|slot| slot.borrow_mut().take());
}

/// Resolves an optional group to a concrete one, falling back to the default.
pub fn resolve_group(group: Option<&ProcessGroup>) -> Result<ProcessGroup> {
    match group {
        Some(pg) => Ok(pg.clone()),
        None => default_group(),
    }
}

// =============================================================================
// World
// =============================================================================

/// Distributed world as seen from one rank.
pub struct World {
    default_group: ProcessGroup,
}

impl World {
    /// Initializes the world and installs its group as the default group.
    pub fn init(backend: Arc<dyn Backend>) -> Result<Self> {
        let default_group = ProcessGroup::new(backend);
        init_process_group(default_group.clone())?;
        Ok(Self { default_group })
    }

    /// Creates a mock single-rank world without touching the default group.
    #[must_use]
    pub fn mock() -> Self {
        Self {
            default_group: ProcessGroup::mock(),
        }
    }

    /// Returns the default process group.
    #[must_use]
    pub fn default_group(&self) -> &ProcessGroup {
        &self.default_group
    }

    /// Returns the rank of this process.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.default_group.rank()
    }

    /// Returns the world size.
    #[must_use]
    pub fn world_size(&self) -> usize {
        self.default_group.world_size()
    }

    /// Checks if this is the main process (rank 0).
    #[must_use]
    pub fn is_main(&self) -> bool {
        self.rank() == 0
    }

    /// Synchronizes all processes.
    pub fn barrier(&self) -> Result<()> {
        self.default_group.barrier()
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
    fn test_process_group_mock() {
        let pg = ProcessGroup::mock();
        assert_eq!(pg.rank(), 0);
        assert_eq!(pg.world_size(), 1);
        assert_eq!(pg.ranks(), &[0]);
        assert!(pg.contains(0));
        assert!(!pg.contains(1));
    }

    #[test]
    fn test_ptr_eq() {
        let pg = ProcessGroup::mock();
        assert!(pg.ptr_eq(&pg.clone()));
        assert!(!pg.ptr_eq(&ProcessGroup::mock()));
    }

    #[test]
    fn test_all_gather_object_multi_rank() {
        let groups = ProcessGroup::mock_world(3);

        let results: Vec<Vec<(usize, String)>> = thread::scope(|s| {
            let handles: Vec<_> = groups
                .iter()
                .map(|pg| {
                    s.spawn(move || {
                        pg.all_gather_object(&(pg.rank(), format!("r{}", pg.rank())))
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let expected = vec![
            (0, "r0".to_string()),
            (1, "r1".to_string()),
            (2, "r2".to_string()),
        ];
        for gathered in results {
            assert_eq!(gathered, expected);
        }
    }

    #[test]
    fn test_broadcast_object_requires_source_value() {
        let pg = ProcessGroup::mock();
        assert!(pg.broadcast_object::<u32>(None, 0).is_err());
        assert_eq!(pg.broadcast_object(Some(&7u32), 0).unwrap(), 7);
    }

    #[test]
    fn test_all_reduce_tensor() {
        let groups = ProcessGroup::mock_world(2);

        let results: Vec<Tensor> = thread::scope(|s| {
            let handles: Vec<_> = groups
                .iter()
                .map(|pg| {
                    s.spawn(move || {
                        let t = Tensor::full(&[2], (pg.rank() + 1) as f32);
                        pg.all_reduce_tensor(&t, ReduceOp::Sum).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for t in results {
            assert_eq!(t.to_vec(), vec![3.0, 3.0]);
        }
    }

    #[test]
    fn test_default_group_lifecycle() {
        destroy_process_group();
        assert!(!is_initialized());
        assert!(matches!(
            default_group(),
            Err(Error::DefaultGroupNotInitialized)
        ));

        let world = World::init(Arc::new(MockBackend::single())).unwrap();
        assert!(world.is_main());
        assert!(default_group().unwrap().ptr_eq(world.default_group()));
        assert!(World::init(Arc::new(MockBackend::single())).is_err());

        destroy_process_group();
        assert!(!is_initialized());
    }

    #[test]
    fn test_resolve_group_prefers_explicit() {
        destroy_process_group();
        let pg = ProcessGroup::mock();
        assert!(resolve_group(Some(&pg)).unwrap().ptr_eq(&pg));
        assert!(resolve_group(None).is_err());
    }

    #[test]
    fn test_world_mock() {
        let world = World::mock();
        assert_eq!(world.rank(), 0);
        assert_eq!(world.world_size(), 1);
        world.barrier().unwrap();
    }
}
