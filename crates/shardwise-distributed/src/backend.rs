//! Backend - Communication Backend Abstractions
//!
//! Provides the collective backend trait and an in-process mock where every
//! rank is driven from its own thread.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use shardwise_core::error::{Error, Result};
use tracing::trace;

// =============================================================================
// Reduce Operations
// =============================================================================

/// Reduction operation for collective communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    /// Sum all values.
    Sum,
    /// Compute product of all values.
    Product,
    /// Find minimum value.
    Min,
    /// Find maximum value.
    Max,
    /// Compute average of all values.
    Average,
}

impl ReduceOp {
    /// Applies the reduction operation to two f32 values.
    #[must_use]
    pub fn apply_f32(&self, a: f32, b: f32) -> f32 {
        match self {
            ReduceOp::Sum => a + b,
            ReduceOp::Product => a * b,
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
            ReduceOp::Average => (a + b) / 2.0,
        }
    }

    /// Reduces equally sized slices elementwise.
    #[must_use]
    pub fn reduce_slices(&self, slices: &[Vec<f32>]) -> Vec<f32> {
        let Some(first) = slices.first() else {
            return Vec::new();
        };

        if *self == ReduceOp::Average {
            let mut result = vec![0.0; first.len()];
            for slice in slices {
                for (acc, &val) in result.iter_mut().zip(slice) {
                    *acc += val;
                }
            }
            let count = slices.len() as f32;
            for val in &mut result {
                *val /= count;
            }
            return result;
        }

        let mut result = first.clone();
        for slice in slices.iter().skip(1) {
            for (acc, &val) in result.iter_mut().zip(slice) {
                *acc = self.apply_f32(*acc, val);
            }
        }
        result
    }
}

// =============================================================================
// Backend Trait
// =============================================================================

/// Trait for distributed communication backends.
///
/// Every method is a collective: all ranks of the world must call it the same
/// number of times and in the same order.
pub trait Backend: Send + Sync {
    /// Returns the name of the backend.
    fn name(&self) -> &str;

    /// Returns the rank of this process.
    fn rank(&self) -> usize;

    /// Returns the total world size.
    fn world_size(&self) -> usize;

    /// Gathers one payload from every rank, indexed by rank.
    fn all_gather_bytes(&self, send: &[u8]) -> Result<Vec<Vec<u8>>>;

    /// Returns the payload of `src` on every rank. Non-source ranks may pass
    /// an empty payload.
    fn broadcast_bytes(&self, send: &[u8], src: usize) -> Result<Vec<u8>> {
        if src >= self.world_size() {
            return Err(Error::invalid_input(format!(
                "broadcast source rank {src} is outside world of size {}",
                self.world_size()
            )));
        }
        let mut gathered = self.all_gather_bytes(send)?;
        Ok(gathered.swap_remove(src))
    }

    /// Synchronizes all processes.
    fn barrier(&self) -> Result<()> {
        self.all_gather_bytes(&[]).map(|_| ())
    }
}

// =============================================================================
// Rendezvous for Mock Backend
// =============================================================================

/// One collective round shared by all mock ranks.
///
/// A round fills `slots` until every rank arrived, publishes `result`, then
/// drains until every rank picked it up. No rank may enter the next round
/// while the current one is draining.
#[derive(Debug)]
struct Rendezvous {
    slots: Vec<Option<Vec<u8>>>,
    arrived: usize,
    departed: usize,
    draining: bool,
    result: Option<Arc<Vec<Vec<u8>>>>,
    completed: u64,
}

#[derive(Debug)]
struct SharedState {
    rendezvous: Mutex<Rendezvous>,
    ready: Condvar,
}

// =============================================================================
// Mock Backend
// =============================================================================

/// A mock backend for running several ranks inside one process.
///
/// Each rank's backend must be driven from its own thread; a collective
/// blocks until every rank of the world has entered it.
pub struct MockBackend {
    rank: usize,
    world_size: usize,
    state: Arc<SharedState>,
}

impl MockBackend {
    /// Creates one backend per rank, all sharing the same rendezvous.
    #[must_use]
    pub fn create_world(world_size: usize) -> Vec<Self> {
        let state = Arc::new(SharedState {
            rendezvous: Mutex::new(Rendezvous {
                slots: vec![None; world_size],
                arrived: 0,
                departed: 0,
                draining: false,
                result: None,
                completed: 0,
            }),
            ready: Condvar::new(),
        });

        (0..world_size)
            .map(|rank| MockBackend {
                rank,
                world_size,
                state: Arc::clone(&state),
            })
            .collect()
    }

    /// Creates a single mock backend (rank 0, world size 1).
    #[must_use]
    pub fn single() -> Self {
        MockBackend {
            rank: 0,
            world_size: 1,
            state: Arc::new(SharedState {
                rendezvous: Mutex::new(Rendezvous {
                    slots: vec![None],
                    arrived: 0,
                    departed: 0,
                    draining: false,
                    result: None,
                    completed: 0,
                }),
                ready: Condvar::new(),
            }),
        }
    }

    /// Number of collectives the world has completed so far.
    #[must_use]
    pub fn completed_collectives(&self) -> u64 {
        self.state.rendezvous.lock().completed
    }
}

impl Backend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_gather_bytes(&self, send: &[u8]) -> Result<Vec<Vec<u8>>> {
        let shared = &*self.state;
        let mut rv = shared.rendezvous.lock();

        while rv.draining {
            shared.ready.wait(&mut rv);
        }

        if rv.slots[self.rank].is_some() {
            return Err(Error::communication(format!(
                "rank {} entered the same collective twice",
                self.rank
            )));
        }
        rv.slots[self.rank] = Some(send.to_vec());
        rv.arrived += 1;

        if rv.arrived == self.world_size {
            let gathered: Vec<Vec<u8>> = rv
                .slots
                .iter_mut()
                .map(|slot| slot.take().unwrap_or_default())
                .collect();
            rv.result = Some(Arc::new(gathered));
            rv.draining = true;
            rv.completed += 1;
            trace!(round = rv.completed, world_size = self.world_size, "collective complete");
            shared.ready.notify_all();
        } else {
            while !rv.draining {
                shared.ready.wait(&mut rv);
            }
        }

        let result = rv
            .result
            .clone()
            .ok_or_else(|| Error::communication("collective result missing"))?;

        rv.departed += 1;
        if rv.departed == self.world_size {
            rv.arrived = 0;
            rv.departed = 0;
            rv.draining = false;
            rv.result = None;
            shared.ready.notify_all();
        }

        Ok(result.as_ref().clone())
    }
}

// =============================================================================
// Tests
// =============================================================================
