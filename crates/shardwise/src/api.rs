//! Sharding API - Sharding tensors, parameters and whole modules
//!
//! Every function here that takes a process group is collective: it must be
//! called on every rank of the group, with the same arguments, in the same
//! order.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::collections::HashSet;

use shardwise_core::error::{Error, Result};
use shardwise_distributed::{
    resolve_group, ProcessGroup, ReplicatedTensor, ShardedTensor, ShardingSpec,
};
use shardwise_nn::{Attribute, HookHandle, Module, TensorValue};
use shardwise_tensor::Tensor;
use tracing::{debug, info, warn};

use crate::plan::ShardingPlan;

// =============================================================================
// Tensors
// =============================================================================

/// Shards `tensor` using the copy on `src_rank` as ground truth.
///
/// Before any data moves, every rank exchanges its `(src_rank, spec)` pair
/// and fails with [`Error::InconsistentConfiguration`] if any peer differs.
/// `None` uses the default process group.
pub fn shard_tensor(
    tensor: &Tensor,
    spec: &ShardingSpec,
    src_rank: usize,
    process_group: Option<&ProcessGroup>,
) -> Result<ShardedTensor> {
    if !tensor.is_contiguous() {
        return Err(Error::invalid_input("input tensor is not a contiguous Tensor"));
    }

    let pg = resolve_group(process_group)?;
    let current_rank = pg.rank();

    let gathered: Vec<(usize, ShardingSpec)> = pg.all_gather_object(&(src_rank, spec.clone()))?;
    for (idx, (peer_src_rank, peer_spec)) in gathered.iter().enumerate() {
        if *peer_src_rank != src_rank {
            warn!(rank = current_rank, peer = idx, "src_rank disagreement");
            return Err(Error::inconsistent(
                "src_rank",
                current_rank,
                src_rank.to_string(),
                idx,
                peer_src_rank.to_string(),
            ));
        }
        if peer_spec != spec {
            warn!(rank = current_rank, peer = idx, "sharding_spec disagreement");
            return Err(Error::inconsistent(
                "sharding_spec",
                current_rank,
                spec.to_string(),
                idx,
                peer_spec.to_string(),
            ));
        }
    }

    spec.shard(tensor, src_rank, Some(&pg))
}

/// Marks `tensor` as replicated on every rank of the group.
pub fn replicate_tensor(
    tensor: Tensor,
    process_group: Option<&ProcessGroup>,
) -> Result<ReplicatedTensor> {
    Ok(ReplicatedTensor::new(tensor, resolve_group(process_group)?))
}

// =============================================================================
// Parameters
// =============================================================================

/// Replaces parameter `name` of `module` with its sharded form.
///
/// The entry keeps its position in the parameter table and its identity, so
/// aliases of the parameter elsewhere in the tree see the sharded value.
pub fn shard_parameter(
    module: &mut Module,
    name: &str,
    spec: &ShardingSpec,
    src_rank: usize,
    process_group: Option<&ProcessGroup>,
) -> Result<()> {
    let param = match module.attribute(name) {
        None => {
            return Err(Error::NotFound {
                module: module.kind().to_string(),
                name: name.to_string(),
            })
        }
        Some(Attribute::Parameter(p)) if p.with_value(TensorValue::is_tensor_like) => p.clone(),
        Some(other) => {
            return Err(Error::TypeMismatch {
                name: format!("{}.{name}", module.kind()),
                expected: "Tensor".to_string(),
                actual: other.kind().to_string(),
            })
        }
    };

    let tensor = param
        .with_value(|v| v.as_dense().cloned())
        .ok_or_else(|| Error::invalid_operation(format!("param: {name} changed while sharding")))?;
    if !tensor.is_contiguous() {
        return Err(Error::invalid_input(format!(
            "param: {name} is not a contiguous Tensor"
        )));
    }

    let sharded = shard_tensor(&tensor, spec, src_rank, process_group)?;

    let (index, _) = module.take_parameter(name).ok_or_else(|| Error::NotFound {
        module: module.kind().to_string(),
        name: name.to_string(),
    })?;
    param.replace(TensorValue::Sharded(sharded));
    module.insert_parameter(index, name, Some(param));
    Ok(())
}

// =============================================================================
// Output Hooks
// =============================================================================

/// Reshards the module's sharded or partial output to `spec` after every
/// forward. Other outputs are left alone.
pub fn reshard_output(module: &mut Module, spec: ShardingSpec) -> &mut Module {
    register_reshard_hook(module, spec);
    module
}

fn register_reshard_hook(module: &mut Module, spec: ShardingSpec) -> HookHandle {
    module.register_forward_hook(move |_, _, output| match output {
        TensorValue::Sharded(st) => Ok(Some(TensorValue::Sharded(st.reshard(&spec)?))),
        TensorValue::Partial(pt) => Ok(Some(TensorValue::Sharded(pt.reshard(&spec)?))),
        _ => Ok(None),
    })
}

/// Replaces the module's sharded output with this rank's local tensor after
/// every forward.
///
/// For chunk layouts a split dimension of extent 1 is removed, so a `[4, 16]`
/// tensor chunked over 4 ranks yields `[16]` on each rank.
pub fn collect_local_shard(module: &mut Module) -> &mut Module {
    register_collect_hook(module);
    module
}

fn register_collect_hook(module: &mut Module) -> HookHandle {
    module.register_forward_hook(|_, _, output| {
        let TensorValue::Sharded(st) = output else {
            return Ok(None);
        };

        let mut local = st.local_tensor()?;
        if let Some(chunk) = st.sharding_spec().as_chunk() {
            if local.size(chunk.dim())? == 1 {
                local = local.squeeze(chunk.dim())?;
            }
        }
        Ok(Some(TensorValue::Dense(local)))
    })
}

// =============================================================================
// Modules
// =============================================================================

/// Shards `module` according to `plan`.
///
/// Walks the tree in pre-order. At each node, planned parameters are sharded
/// in declaration order, then the reshard and collapse hooks are installed if
/// the node's path is listed. A parameter reachable from several paths is
/// handled once, at the first path. On error, parameters already sharded stay
/// sharded.
pub fn shard_module(
    module: &mut Module,
    plan: &ShardingPlan,
    src_rank: usize,
    process_group: Option<&ProcessGroup>,
) -> Result<()> {
    let mut seen = HashSet::new();
    let mut matched = HashSet::new();
    let mut sharded = 0usize;
    let mut hooks = 0usize;

    module.for_each_module_mut(|path, node| {
        let names: Vec<(String, usize)> = node
            .local_parameters()
            .iter()
            .filter_map(|(name, p)| p.as_ref().map(|p| (name.clone(), p.id())))
            .collect();

        for (local, id) in names {
            if !seen.insert(id) {
                continue;
            }
            let qualified = qualify(path, &local);
            if let Some(spec) = plan.spec_for(&qualified) {
                debug!(param = %qualified, spec = %spec, "sharding parameter");
                shard_parameter(node, &local, spec, src_rank, process_group)?;
                matched.insert(qualified);
                sharded += 1;
            }
        }

        if let Some(spec) = plan.output_spec_for(path) {
            debug!(module = %path, spec = %spec, "installing reshard hook");
            register_reshard_hook(node, spec.clone());
            hooks += 1;
        }
        if plan.returns_local_tensor(path) {
            debug!(module = %path, "installing local shard hook");
            register_collect_hook(node);
            hooks += 1;
        }
        Ok(())
    })?;

    for name in plan.plan.keys().filter(|k| !matched.contains(*k)) {
        warn!(param = %name, "planned parameter was not found in the module");
    }
    info!(parameters = sharded, hooks, "module sharded");
    Ok(())
}

/// [`shard_module`] with `src_rank = 0` on the default process group.
pub fn shard_module_with_default(module: &mut Module, plan: &ShardingPlan) -> Result<()> {
    shard_module(module, plan, 0, None)
}

fn qualify(path: &str, local: &str) -> String {
    if path.is_empty() {
        local.to_string()
    } else {
        format!("{path}.{local}")
    }
}

// =============================================================================
// Tests
// =============================================================================
