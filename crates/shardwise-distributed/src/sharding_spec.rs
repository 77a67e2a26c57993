//! Sharding Specifications - How a tensor is partitioned across ranks
//!
//! A [`ShardingSpec`] is a plain value: it can be compared, serialized and
//! sent through a collective, which is what lets ranks verify they agree on
//! it before any data moves. Two layouts are supported:
//!
//! - [`ChunkShardingSpec`] splits one dimension into `placements.len()`
//!   chunks (ceil-division sizing, trailing chunks may be empty).
//! - [`EnumerableShardingSpec`] lists every shard rectangle explicitly.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use shardwise_core::error::{Error, Result};
use shardwise_tensor::shape::{check_block, normalize_dim, numel};
use shardwise_tensor::{Tensor, TensorData};
use tracing::debug;

use crate::process_group::{resolve_group, ProcessGroup};
use crate::sharded_tensor::{Shard, ShardedTensor};

// =============================================================================
// Placement
// =============================================================================

/// Where a shard lives: a rank and a device name on that rank.
///
/// Written as `"rank:<n>/<device>"`, e.g. `"rank:1/cuda:1"`. The device part
/// may be omitted and defaults to `cpu`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Placement {
    rank: usize,
    device: String,
}

impl Placement {
    /// Creates a placement on `rank` with the given device.
    pub fn new(rank: usize, device: impl Into<String>) -> Self {
        Self {
            rank,
            device: device.into(),
        }
    }

    /// Creates a CPU placement on `rank`.
    #[must_use]
    pub fn cpu(rank: usize) -> Self {
        Self::new(rank, "cpu")
    }

    /// Returns the rank.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Returns the device name.
    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }
}

impl FromStr for Placement {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s.strip_prefix("rank:").ok_or_else(|| {
            Error::invalid_input(format!("placement {s:?} must start with \"rank:\""))
        })?;

        let (rank, device) = match rest.split_once('/') {
            Some((rank, device)) if !device.is_empty() => (rank, device),
            Some(_) => {
                return Err(Error::invalid_input(format!(
                    "placement {s:?} has an empty device"
                )))
            }
            None => (rest, "cpu"),
        };

        let rank = rank
            .parse::<usize>()
            .map_err(|_| Error::invalid_input(format!("placement {s:?} has an invalid rank")))?;
        Ok(Self::new(rank, device))
    }
}

impl TryFrom<String> for Placement {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Placement> for String {
    fn from(p: Placement) -> Self {
        p.to_string()
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rank:{}/{}", self.rank, self.device)
    }
}

// =============================================================================
// Shard Metadata
// =============================================================================

/// Location and extent of one shard inside the global tensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardMetadata {
    /// Offset of the shard along every dimension.
    pub shard_offsets: Vec<usize>,
    /// Extent of the shard along every dimension.
    pub shard_sizes: Vec<usize>,
    /// Owner of the shard.
    pub placement: Placement,
}

impl ShardMetadata {
    /// Creates shard metadata.
    #[must_use]
    pub fn new(shard_offsets: Vec<usize>, shard_sizes: Vec<usize>, placement: Placement) -> Self {
        Self {
            shard_offsets,
            shard_sizes,
            placement,
        }
    }

    /// Number of elements in the shard.
    #[must_use]
    pub fn numel(&self) -> usize {
        numel(&self.shard_sizes)
    }

    /// Returns true if the two rectangles share at least one element.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.shard_offsets
            .iter()
            .zip(&self.shard_sizes)
            .zip(other.shard_offsets.iter().zip(&other.shard_sizes))
            .all(|((&a_off, &a_len), (&b_off, &b_len))| {
                a_len > 0
                    && b_len > 0
                    && a_off < b_off.saturating_add(b_len)
                    && b_off < a_off.saturating_add(a_len)
            })
    }

    /// Extracts this shard's block from `full` as a packed tensor.
    pub fn narrow(&self, full: &Tensor) -> Result<Tensor> {
        check_block(full.shape(), &self.shard_offsets, &self.shard_sizes)?;

        let mut view = full.clone();
        for (dim, (&off, &len)) in self.shard_offsets.iter().zip(&self.shard_sizes).enumerate() {
            view = view.narrow(dim as i64, off, len)?;
        }
        Ok(view.contiguous())
    }
}

/// Global layout of a sharded tensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardedTensorMetadata {
    /// Every shard of the tensor, across all ranks.
    pub shards_metadata: Vec<ShardMetadata>,
    /// Size of the global tensor.
    pub size: Vec<usize>,
}

// =============================================================================
// Chunk Sharding
// =============================================================================

/// Splits one dimension into one chunk per placement.
///
/// Chunk `i` covers `[i * split, min((i + 1) * split, n))` with
/// `split = ceil(n / placements.len())`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkShardingSpec {
    dim: i64,
    placements: Vec<Placement>,
}

impl ChunkShardingSpec {
    /// Creates a chunk spec splitting `dim` over `placements` in order.
    #[must_use]
    pub fn new(dim: i64, placements: Vec<Placement>) -> Self {
        Self { dim, placements }
    }

    /// Creates a chunk spec from `"rank:<n>/<device>"` strings.
    pub fn from_strings<S: AsRef<str>>(dim: i64, placements: &[S]) -> Result<Self> {
        let placements = placements
            .iter()
            .map(|p| p.as_ref().parse())
            .collect::<Result<Vec<Placement>>>()?;
        Ok(Self::new(dim, placements))
    }

    /// Creates a chunk spec placing chunk `i` on CPU of rank `i`.
    #[must_use]
    pub fn for_world(dim: i64, world_size: usize) -> Self {
        Self::new(dim, (0..world_size).map(Placement::cpu).collect())
    }

    /// Dimension being split (may be negative).
    #[must_use]
    pub fn dim(&self) -> i64 {
        self.dim
    }

    /// Placements in chunk order.
    #[must_use]
    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    /// Computes the shard layout for a tensor of the given size.
    pub fn build_metadata(&self, size: &[usize]) -> Result<ShardedTensorMetadata> {
        if self.placements.is_empty() {
            return Err(Error::invalid_input("ChunkShardingSpec has no placements"));
        }

        let dim = normalize_dim(self.dim, size.len())?;
        let dim_size = size[dim];
        let chunks = self.placements.len();
        let split_size = dim_size.div_ceil(chunks);

        let mut shards_metadata = Vec::with_capacity(chunks);
        let mut offsets = vec![0; size.len()];
        for (idx, placement) in self.placements.iter().enumerate() {
            let chunked = dim_size
                .min(split_size * (idx + 1))
                .saturating_sub(split_size * idx);

            let mut sizes = size.to_vec();
            sizes[dim] = chunked;
            shards_metadata.push(ShardMetadata::new(offsets.clone(), sizes, placement.clone()));
            offsets[dim] += chunked;
        }

        Ok(ShardedTensorMetadata {
            shards_metadata,
            size: size.to_vec(),
        })
    }
}

// =============================================================================
// Enumerable Sharding
// =============================================================================

/// Explicit list of shard rectangles.
///
/// Shards must not overlap; `build_metadata` additionally checks they tile
/// the whole tensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawEnumerableSpec")]
pub struct EnumerableShardingSpec {
    shards: Vec<ShardMetadata>,
}

/// Unchecked wire form; deserialization goes through [`EnumerableShardingSpec::new`].
#[derive(Deserialize)]
struct RawEnumerableSpec {
    shards: Vec<ShardMetadata>,
}

impl TryFrom<RawEnumerableSpec> for EnumerableShardingSpec {
    type Error = Error;

    fn try_from(raw: RawEnumerableSpec) -> Result<Self> {
        Self::new(raw.shards)
    }
}

impl EnumerableShardingSpec {
    /// Creates an enumerable spec, rejecting ragged or overlapping shards.
    pub fn new(shards: Vec<ShardMetadata>) -> Result<Self> {
        let Some(first) = shards.first() else {
            return Ok(Self { shards });
        };

        let rank = first.shard_offsets.len();
        for shard in &shards {
            if shard.shard_offsets.len() != rank || shard.shard_sizes.len() != rank {
                return Err(Error::invalid_input(format!(
                    "shard {shard:?} does not have {rank} dimensions"
                )));
            }
        }

        check_disjoint(&shards)?;
        Ok(Self { shards })
    }

    /// The listed shards.
    #[must_use]
    pub fn shards(&self) -> &[ShardMetadata] {
        &self.shards
    }

    /// Checks the shards tile a tensor of the given size and returns them.
    pub fn build_metadata(&self, size: &[usize]) -> Result<ShardedTensorMetadata> {
        check_disjoint(&self.shards)?;
        let mut covered = 0;
        for shard in &self.shards {
            check_block(size, &shard.shard_offsets, &shard.shard_sizes)
                .map_err(|e| Error::invalid_input(format!("shard {shard:?} out of bounds: {e}")))?;
            covered += shard.numel();
        }

        if covered != numel(size) {
            return Err(Error::invalid_input(format!(
                "shards cover {covered} elements but tensor of size {size:?} has {}",
                numel(size)
            )));
        }

        Ok(ShardedTensorMetadata {
            shards_metadata: self.shards.clone(),
            size: size.to_vec(),
        })
    }
}

fn check_disjoint(shards: &[ShardMetadata]) -> Result<()> {
    for (i, a) in shards.iter().enumerate() {
        for b in &shards[i + 1..] {
            if a.overlaps(b) {
                return Err(Error::invalid_input(format!(
                    "shards {a:?} and {b:?} overlap"
                )));
            }
        }
    }
    Ok(())
}

// =============================================================================
// ShardingSpec
// =============================================================================

/// A sharding layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShardingSpec {
    /// Split along one dimension.
    Chunk(ChunkShardingSpec),
    /// Explicit shard rectangles.
    Enumerable(EnumerableShardingSpec),
}

impl ShardingSpec {
    /// Shorthand for a chunk spec placing chunk `i` on rank `i`.
    #[must_use]
    pub fn chunk(dim: i64, world_size: usize) -> Self {
        Self::Chunk(ChunkShardingSpec::for_world(dim, world_size))
    }

    /// Returns the chunk variant, if this is one.
    #[must_use]
    pub fn as_chunk(&self) -> Option<&ChunkShardingSpec> {
        match self {
            Self::Chunk(spec) => Some(spec),
            Self::Enumerable(_) => None,
        }
    }

    /// Computes the shard layout for a tensor of the given size.
    pub fn build_metadata(&self, size: &[usize]) -> Result<ShardedTensorMetadata> {
        match self {
            Self::Chunk(spec) => spec.build_metadata(size),
            Self::Enumerable(spec) => spec.build_metadata(size),
        }
    }

    /// Shards `tensor` using the copy held by `src_rank` as ground truth.
    ///
    /// Collective: every rank of the group must call it.
    pub fn shard(
        &self,
        tensor: &Tensor,
        src_rank: usize,
        process_group: Option<&ProcessGroup>,
    ) -> Result<ShardedTensor> {
        let pg = resolve_group(process_group)?;
        if src_rank >= pg.world_size() {
            return Err(Error::invalid_input(format!(
                "src_rank={src_rank} is not a rank of a group of size {}",
                pg.world_size()
            )));
        }

        let source = (pg.rank() == src_rank).then(|| TensorData::from_tensor(tensor));
        let full = pg.broadcast_object(source.as_ref(), src_rank)?.into_tensor()?;

        self.shard_local(&full, &pg)
    }

    /// Shards a tensor every rank already holds in full. No communication.
    pub fn shard_local(&self, full: &Tensor, pg: &ProcessGroup) -> Result<ShardedTensor> {
        let metadata = self.build_metadata(full.shape())?;

        for shard in &metadata.shards_metadata {
            if shard.placement.rank() >= pg.world_size() {
                return Err(Error::invalid_input(format!(
                    "placement {} is outside a group of size {}",
                    shard.placement,
                    pg.world_size()
                )));
            }
        }

        let local_shards = metadata
            .shards_metadata
            .iter()
            .filter(|m| m.placement.rank() == pg.rank())
            .map(|m| Ok(Shard::new(m.narrow(full)?, m.clone())))
            .collect::<Result<Vec<Shard>>>()?;

        debug!(
            rank = pg.rank(),
            spec = %self,
            local_shards = local_shards.len(),
            "sharded tensor of size {:?}",
            full.shape()
        );

        ShardedTensor::from_local_shards(local_shards, metadata, self.clone(), pg.clone())
    }
}

impl From<ChunkShardingSpec> for ShardingSpec {
    fn from(spec: ChunkShardingSpec) -> Self {
        Self::Chunk(spec)
    }
}

impl From<EnumerableShardingSpec> for ShardingSpec {
    fn from(spec: EnumerableShardingSpec) -> Self {
        Self::Enumerable(spec)
    }
}

impl fmt::Display for ShardingSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chunk(spec) => {
                write!(f, "ChunkShardingSpec(dim={}, placements=[", spec.dim)?;
                for (i, p) in spec.placements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, "])")
            }
            Self::Enumerable(spec) => {
                write!(f, "EnumerableShardingSpec(shards={})", spec.shards.len())
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
