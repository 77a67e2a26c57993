//! Linear Layer - Fully Connected Layer
//!
//! Applies `y = xW^T + b`. When the weight has been chunk-sharded the layer
//! runs tensor-parallel:
//!
//! - weight split on dim 0 (output features): column-parallel, each rank
//!   produces its own output columns as a [`ShardedTensor`];
//! - weight split on dim 1 (input features): row-parallel, each rank produces
//!   a full-shape [`PartialTensor`] that sums to the real output.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use shardwise_core::error::{Error, Result};
use shardwise_distributed::{
    ChunkShardingSpec, PartialTensor, ReduceOp, Shard, ShardedTensor, ShardingSpec,
};
use shardwise_tensor::shape::normalize_dim;
use shardwise_tensor::Tensor;

use crate::module::Module;
use crate::parameter::Parameter;
use crate::value::TensorValue;

// =============================================================================
// Constructor
// =============================================================================

/// Creates a `Linear` module from a `(out_features, in_features)` weight and
/// an optional `(out_features)` bias.
///
/// # Example
/// ```rust
/// use shardwise_nn::{linear, TensorValue};
/// use shardwise_tensor::Tensor;
///
/// let layer = linear(Tensor::full(&[3, 2], 1.0), Some(Tensor::zeros(&[3])));
/// let y = layer.forward(&TensorValue::Dense(Tensor::full(&[4, 2], 1.0))).unwrap();
/// assert_eq!(y.local_tensor().unwrap().shape(), &[4, 3]);
/// ```
#[must_use]
pub fn linear(weight: Tensor, bias: Option<Tensor>) -> Module {
    Module::new("Linear")
        .with_parameter("weight", Some(Parameter::new(weight)))
        .with_parameter("bias", bias.map(Parameter::new))
        .with_forward(linear_forward)
}

fn linear_forward(module: &Module, input: &TensorValue) -> Result<TensorValue> {
    let weight = module
        .parameter("weight")
        .ok_or_else(|| Error::invalid_operation("Linear has no weight"))?
        .value();
    let bias = match module.parameter("bias") {
        Some(p) => Some(p.value().into_dense()?),
        None => None,
    };
    let x = input_tensor(input)?;

    match &weight {
        TensorValue::Sharded(st) => {
            let Some(spec) = st.sharding_spec().as_chunk() else {
                return Err(Error::invalid_operation(format!(
                    "Linear cannot run with weight layout {}",
                    st.sharding_spec()
                )));
            };
            let ndim = st.size().len();
            if ndim != 2 {
                return Err(Error::invalid_operation(format!(
                    "Linear weight must be 2-D, got {ndim}-D"
                )));
            }
            match normalize_dim(spec.dim(), ndim)? {
                0 => column_parallel(&x, st, spec, bias.as_ref()),
                _ => row_parallel(&x, st, bias.as_ref()),
            }
        }
        other => {
            let w = other.as_dense().ok_or_else(|| {
                Error::invalid_operation(format!("Linear cannot run with a {} weight", other.kind()))
            })?;
            Ok(TensorValue::Dense(affine(&x, w, bias.as_ref())?))
        }
    }
}

// =============================================================================
// Tensor-Parallel Paths
// =============================================================================

/// Each rank computes the output columns matching its weight rows.
fn column_parallel(
    x: &Tensor,
    weight: &ShardedTensor,
    spec: &ChunkShardingSpec,
    bias: Option<&Tensor>,
) -> Result<TensorValue> {
    let Some(&out_features) = weight.size().first() else {
        return Err(Error::invalid_operation("column-parallel Linear needs a 2-D weight"));
    };
    let batch = x.size(0)?;
    let output_spec = ChunkShardingSpec::new(-1, spec.placements().to_vec());
    let output_metadata = output_spec.build_metadata(&[batch, out_features])?;

    let local_shards = weight
        .local_shards()
        .iter()
        .map(|shard| {
            let md = shard.metadata();
            let (Some(&offset), Some(&rows)) = (md.shard_offsets.first(), md.shard_sizes.first())
            else {
                return Err(Error::invalid_operation("weight shard has no rows"));
            };
            let local_bias = bias.map(|b| b.narrow(0, offset, rows)).transpose()?;
            let y = affine(x, shard.tensor(), local_bias.as_ref())?;

            let chunk = weight
                .metadata()
                .shards_metadata
                .iter()
                .position(|m| m == md)
                .ok_or_else(|| Error::invalid_operation("weight shard missing from its metadata"))?;
            let out_md = output_metadata
                .shards_metadata
                .get(chunk)
                .cloned()
                .ok_or_else(|| Error::invalid_operation("output chunk missing from its metadata"))?;
            Ok(Shard::new(y, out_md))
        })
        .collect::<Result<Vec<Shard>>>()?;

    let st = ShardedTensor::from_local_shards(
        local_shards,
        output_metadata,
        ShardingSpec::Chunk(output_spec),
        weight.process_group().clone(),
    )?;
    Ok(TensorValue::Sharded(st))
}

/// Each rank multiplies its input slice by its weight columns.
fn row_parallel(x: &Tensor, weight: &ShardedTensor, bias: Option<&Tensor>) -> Result<TensorValue> {
    let [shard] = weight.local_shards() else {
        return Err(Error::invalid_operation(format!(
            "row-parallel Linear needs exactly one weight shard per rank, found {}",
            weight.local_shards().len()
        )));
    };
    let md = shard.metadata();
    let (Some(&offset), Some(&cols), Some(&in_features)) = (
        md.shard_offsets.get(1),
        md.shard_sizes.get(1),
        weight.size().get(1),
    ) else {
        return Err(Error::invalid_operation("row-parallel Linear needs a 2-D weight"));
    };

    let x_local = match x.size(-1)? {
        n if n == in_features && n != cols => x.narrow(-1, offset, cols)?,
        n if n == cols => x.clone(),
        n => {
            return Err(Error::shape_mismatch(&[x.size(0)?, cols], &[x.size(0)?, n]));
        }
    };

    // Bias belongs to exactly one partial so the sum counts it once.
    let local_bias = if offset == 0 { bias } else { None };
    let partial = affine(&x_local, shard.tensor(), local_bias)?;
    Ok(TensorValue::Partial(PartialTensor::new(
        partial,
        ReduceOp::Sum,
        weight.process_group().clone(),
    )))
}

// =============================================================================
// Helpers
// =============================================================================

fn input_tensor(input: &TensorValue) -> Result<Tensor> {
    match input {
        TensorValue::Partial(_) => Err(Error::invalid_operation(
            "Linear input is a PartialTensor; reshard it first",
        )),
        other => other.local_tensor(),
    }
}

fn affine(x: &Tensor, weight: &Tensor, bias: Option<&Tensor>) -> Result<Tensor> {
    let y = x.matmul(&weight.transpose(0, 1)?)?;
    match bias {
        Some(b) => y.add(b),
        None => Ok(y),
    }
}

// =============================================================================
// Tests
// =============================================================================
