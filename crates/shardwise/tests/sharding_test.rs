//! End-to-end sharding tests.
//! Every multi-rank test drives one mock rank per thread.

use std::thread;

use shardwise::distributed::{active_process_group, destroy_process_group, ShardedTensorState};
use shardwise::nn::sequential_named;
use shardwise::prelude::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Runs `f` once per rank of a fresh mock world and collects the results by rank.
fn run_ranks<T, F>(world_size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&ProcessGroup) -> T + Sync,
{
    init_tracing();
    let groups = ProcessGroup::mock_world(world_size);
    let f = &f;
    thread::scope(|s| {
        let handles: Vec<_> = groups.iter().map(|pg| s.spawn(move || f(pg))).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

fn two_layer(w1: Tensor, b1: Tensor, w2: Tensor, b2: Tensor) -> Module {
    sequential_named(vec![
        ("fc1".to_string(), linear(w1, Some(b1))),
        ("fc2".to_string(), linear(w2, Some(b2))),
    ])
}

// =============================================================================
// Agreement Check
// =============================================================================

#[test]
fn test_agreeing_ranks_shard_and_gather() {
    let source = Tensor::arange(&[4, 3]);
    let results = run_ranks(2, |pg| {
        let st = shard_tensor(&source, &ShardingSpec::chunk(0, 2), 0, Some(pg)).unwrap();
        (st.local_tensor().unwrap().shape().to_vec(), st.gather().unwrap())
    });

    for (rank, (local_shape, full)) in results.into_iter().enumerate() {
        assert_eq!(local_shape, vec![2, 3], "rank {rank}");
        assert_eq!(full, source);
    }
}

#[test]
fn test_src_rank_disagreement_fails_on_every_rank() {
    let results = run_ranks(2, |pg| {
        shard_tensor(&Tensor::arange(&[4]), &ShardingSpec::chunk(0, 2), pg.rank(), Some(pg))
    });

    let err = results[0].as_ref().unwrap_err();
    assert_eq!(
        err.to_string(),
        "src_rank=0 on rank: 0 does not match with src_rank=1 on rank: 1"
    );
    let err = results[1].as_ref().unwrap_err();
    assert_eq!(
        *err,
        Error::InconsistentConfiguration {
            field: "src_rank".to_string(),
            rank: 1,
            value: "1".to_string(),
            peer_rank: 0,
            peer_value: "0".to_string(),
        }
    );
}

#[test]
fn test_spec_disagreement_fails_on_every_rank() {
    let results = run_ranks(2, |pg| {
        let spec = ShardingSpec::chunk(pg.rank() as i64, 2);
        shard_tensor(&Tensor::arange(&[2, 2]), &spec, 0, Some(pg))
    });

    for (rank, result) in results.into_iter().enumerate() {
        match result {
            Err(Error::InconsistentConfiguration {
                field,
                rank: detected_on,
                peer_rank,
                ..
            }) => {
                assert_eq!(field, "sharding_spec");
                assert_eq!(detected_on, rank);
                assert_eq!(peer_rank, 1 - rank);
            }
            other => panic!("rank {rank}: unexpected {other:?}"),
        }
    }
}

// =============================================================================
// Plan Application
// =============================================================================

#[test]
fn test_only_planned_parameter_is_sharded() {
    let states = run_ranks(2, |pg| {
        let mut model = Module::new("TwoLayer")
            .with_module("linear", linear(Tensor::arange(&[4, 2]), Some(Tensor::zeros(&[4]))))
            .with_module("head", linear(Tensor::arange(&[2, 4]), Some(Tensor::zeros(&[2]))));
        let plan = ShardingPlan::builder()
            .shard("linear.weight", ShardingSpec::chunk(0, 2))
            .build();
        shard_module(&mut model, &plan, 0, Some(pg)).unwrap();

        model
            .named_parameters()
            .into_iter()
            .map(|(name, p)| (name, p.kind()))
            .collect::<Vec<_>>()
    });

    for kinds in states {
        assert_eq!(
            kinds,
            vec![
                ("linear.weight".to_string(), "ShardedTensor"),
                ("linear.bias".to_string(), "Tensor"),
                ("head.weight".to_string(), "Tensor"),
                ("head.bias".to_string(), "Tensor"),
            ]
        );
    }
}

#[test]
fn test_replicated_parameter_is_sharded() {
    let source = Tensor::arange(&[4, 2]);
    let results = run_ranks(2, |pg| {
        let replicated = replicate_tensor(source.clone(), Some(pg)).unwrap();
        let mut m = Module::new("M").with_parameter(
            "w",
            Some(Parameter::from_value(TensorValue::Replicated(replicated))),
        );
        let spec = ShardingSpec::chunk(0, 2);
        shard_parameter(&mut m, "w", &spec, 0, Some(pg)).unwrap();

        let value = m.parameter("w").unwrap().value();
        assert_eq!(value.sharding_spec(), Some(&spec));
        (value.local_tensor().unwrap().to_vec(), value.as_sharded().unwrap().gather().unwrap())
    });

    assert_eq!(results[0].0, vec![0.0, 1.0, 2.0, 3.0]);
    assert_eq!(results[1].0, vec![4.0, 5.0, 6.0, 7.0]);
    for (_, full) in results {
        assert_eq!(full, source);
    }
}

#[test]
fn test_enumerable_plan_from_json() {
    let shards = |first: &str, second: &str| {
        format!(
            r#"{{"plan": {{"weight": {{"type": "enumerable", "shards": [
                {{"shard_offsets": {first}, "shard_sizes": [2], "placement": "rank:0/cpu"}},
                {{"shard_offsets": {second}, "shard_sizes": [2], "placement": "rank:1/cpu"}}
            ]}}}}}}"#
        )
    };

    let overlapping = ShardingPlan::from_json(&shards("[0]", "[1]")).unwrap_err();
    assert!(matches!(overlapping, Error::Serialization { .. }));

    let plan = ShardingPlan::from_json(&shards("[0]", "[2]")).unwrap();
    let source = Tensor::arange(&[4]);
    let results = run_ranks(2, |pg| {
        let mut m = Module::new("M").with_parameter("weight", Some(Parameter::new(source.clone())));
        shard_module(&mut m, &plan, 0, Some(pg)).unwrap();
        let value = m.parameter("weight").unwrap().value();
        value.as_sharded().unwrap().gather().unwrap()
    });
    for full in results {
        assert_eq!(full.to_vec(), vec![0.0, 1.0, 2.0, 3.0]);
    }
}

#[test]
fn test_shared_parameter_sharded_once_at_first_path() {
    let pg = ProcessGroup::mock();
    let shared = Parameter::new(Tensor::arange(&[2, 2]));
    let mut model = Module::new("Tied")
        .with_module("a", Module::new("A").with_parameter("weight", Some(shared.clone())))
        .with_module("b", Module::new("B").with_parameter("weight", Some(shared.clone())));

    // Both paths are planned; a second attempt would see a ShardedTensor and fail.
    let plan = ShardingPlan::builder()
        .shard("a.weight", ShardingSpec::chunk(0, 1))
        .shard("b.weight", ShardingSpec::chunk(1, 1))
        .build();
    shard_module(&mut model, &plan, 0, Some(&pg)).unwrap();

    let a = model.get_submodule("a").unwrap().parameter("weight").unwrap();
    let b = model.get_submodule("b").unwrap().parameter("weight").unwrap();
    assert!(a.ptr_eq(b));
    assert!(shared.ptr_eq(a));
    assert_eq!(a.value().sharding_spec(), Some(&ShardingSpec::chunk(0, 1)));
}

#[test]
fn test_alias_planned_only_at_second_path_is_untouched() {
    let pg = ProcessGroup::mock();
    let shared = Parameter::new(Tensor::arange(&[2, 2]));
    let mut model = Module::new("Tied")
        .with_module("a", Module::new("A").with_parameter("weight", Some(shared.clone())))
        .with_module("b", Module::new("B").with_parameter("weight", Some(shared.clone())));

    let plan = ShardingPlan::builder()
        .shard("b.weight", ShardingSpec::chunk(0, 1))
        .build();
    shard_module(&mut model, &plan, 0, Some(&pg)).unwrap();
    assert_eq!(shared.kind(), "Tensor");
}

#[test]
fn test_failure_leaves_earlier_parameters_sharded() {
    let pg = ProcessGroup::mock();
    let mut model = two_layer(
        Tensor::arange(&[2, 2]),
        Tensor::zeros(&[2]),
        Tensor::arange(&[2, 2]),
        Tensor::zeros(&[2]),
    );
    let plan = ShardingPlan::builder()
        .shard("fc1.weight", ShardingSpec::chunk(0, 1))
        .shard("fc2.bias", ShardingSpec::chunk(3, 1))
        .build();

    let err = shard_module(&mut model, &plan, 0, Some(&pg)).unwrap_err();
    assert!(matches!(err, Error::InvalidDimension { index: 3, ndim: 1 }));

    let fc1 = model.get_submodule("fc1").unwrap();
    assert_eq!(fc1.parameter("weight").unwrap().kind(), "ShardedTensor");
    let fc2 = model.get_submodule("fc2").unwrap();
    assert_eq!(fc2.parameter("bias").unwrap().kind(), "Tensor");
}

#[test]
fn test_default_group_is_used_when_none_given() {
    let kinds = run_ranks(2, |pg| {
        init_process_group(pg.clone()).unwrap();
        let mut model = Module::new("M").with_module("fc", linear(Tensor::arange(&[2, 2]), None));
        let plan = ShardingPlan::builder()
            .shard("fc.weight", ShardingSpec::chunk(0, 2))
            .build();
        shard_module_with_default(&mut model, &plan).unwrap();

        let value = model.get_submodule("fc").unwrap().parameter("weight").unwrap().value();
        let local = value.local_tensor().unwrap().to_vec();
        destroy_process_group();
        local
    });

    assert_eq!(kinds, vec![vec![0.0, 1.0], vec![2.0, 3.0]]);
}

// =============================================================================
// Output Hooks
// =============================================================================

#[test]
fn test_collect_local_shard_squeezes_unit_split_dim() {
    let shapes = run_ranks(2, |pg| {
        let mut passthrough = Module::new("Identity").with_forward(|_, x| Ok(x.clone()));
        collect_local_shard(&mut passthrough);

        let narrow = shard_tensor(&Tensor::arange(&[2, 16]), &ShardingSpec::chunk(0, 2), 0, Some(pg))
            .unwrap();
        let wide = shard_tensor(&Tensor::arange(&[4, 16]), &ShardingSpec::chunk(0, 2), 0, Some(pg))
            .unwrap();

        let narrow_out = passthrough.forward(&TensorValue::Sharded(narrow)).unwrap();
        let wide_out = passthrough.forward(&TensorValue::Sharded(wide)).unwrap();
        (
            narrow_out.into_dense().unwrap().shape().to_vec(),
            wide_out.into_dense().unwrap().shape().to_vec(),
        )
    });

    for (narrow, wide) in shapes {
        assert_eq!(narrow, vec![16]);
        assert_eq!(wide, vec![2, 16]);
    }
}

#[test]
fn test_reshard_output_changes_layout() {
    let source = Tensor::arange(&[4, 4]);
    let locals = run_ranks(2, |pg| {
        let mut passthrough = Module::new("Identity").with_forward(|_, x| Ok(x.clone()));
        reshard_output(&mut passthrough, ShardingSpec::chunk(1, 2));

        let rows = shard_tensor(&source, &ShardingSpec::chunk(0, 2), 0, Some(pg)).unwrap();
        let out = passthrough.forward(&TensorValue::Sharded(rows)).unwrap();
        assert_eq!(out.sharding_spec(), Some(&ShardingSpec::chunk(1, 2)));

        let dense = passthrough.forward(&TensorValue::Dense(source.clone())).unwrap();
        assert!(dense.as_dense().is_some());
        out.local_tensor().unwrap()
    });

    assert_eq!(locals[0], source.narrow(1, 0, 2).unwrap().contiguous());
    assert_eq!(locals[1], source.narrow(1, 2, 2).unwrap().contiguous());
}

// =============================================================================
// Tensor-Parallel Model
// =============================================================================

#[test]
fn test_column_then_row_parallel_matches_dense() {
    let w1 = Tensor::arange(&[4, 4]);
    let b1 = Tensor::full(&[4], 1.0);
    let w2 = Tensor::arange(&[3, 4]);
    let b2 = Tensor::full(&[3], 0.5);
    let x = Tensor::arange(&[2, 4]);

    let dense = two_layer(w1.clone(), b1.clone(), w2.clone(), b2.clone())
        .forward(&TensorValue::Dense(x.clone()))
        .unwrap()
        .into_dense()
        .unwrap();
    assert_eq!(dense.shape(), &[2, 3]);

    let plan = ShardingPlan::from_json(
        r#"{
            "plan": {
                "fc1.weight": {"type": "chunk", "dim": 0, "placements": ["rank:0/cpu", "rank:1/cpu"]},
                "fc2.weight": {"type": "chunk", "dim": 1, "placements": ["rank:0/cpu", "rank:1/cpu"]}
            },
            "output_plan": {
                "fc2": {"type": "chunk", "dim": 0, "placements": ["rank:0/cpu", "rank:1/cpu"]}
            },
            "return_local_tensor": ["fc1", "fc2"]
        }"#,
    )
    .unwrap();

    let rows = run_ranks(2, |pg| {
        let mut model = two_layer(w1.clone(), b1.clone(), w2.clone(), b2.clone());
        shard_module(&mut model, &plan, 0, Some(pg)).unwrap();

        let fc1_out = model
            .get_submodule("fc1")
            .unwrap()
            .forward(&TensorValue::Dense(x.clone()))
            .unwrap();
        assert_eq!(fc1_out.as_dense().unwrap().shape(), &[2, 2]);

        model
            .forward(&TensorValue::Dense(x.clone()))
            .unwrap()
            .into_dense()
            .unwrap()
    });

    // Each rank ends with its own output row, squeezed to 1-D.
    for (rank, row) in rows.iter().enumerate() {
        assert_eq!(row.shape(), &[3]);
        assert_eq!(row.to_vec(), dense.narrow(0, rank, 1).unwrap().to_vec());
    }
}

// =============================================================================
// Load Context
// =============================================================================

#[test]
fn test_load_context_rejects_nesting_and_releases() {
    let g1 = ProcessGroup::mock();
    let g2 = ProcessGroup::mock();

    let result: Result<()> = (|| {
        let _outer = load_with_process_group(&g2)?;
        let _inner = load_with_process_group(&g1)?;
        Ok(())
    })();

    assert!(matches!(result, Err(Error::Reentrancy { .. })));
    assert!(active_process_group().is_none());
}

#[test]
fn test_sharded_state_loads_onto_scoped_group() {
    destroy_process_group();
    let source_group = ProcessGroup::mock();
    let st = shard_tensor(&Tensor::arange(&[3, 2]), &ShardingSpec::chunk(0, 1), 0, Some(&source_group))
        .unwrap();
    let json = serde_json::to_string(&st.state()).unwrap();

    let state: ShardedTensorState = serde_json::from_str(&json).unwrap();
    assert!(ShardedTensor::load(state.clone()).is_err());

    let target = ProcessGroup::mock();
    let loaded = {
        let _scope = load_with_process_group(&target).unwrap();
        ShardedTensor::load(state).unwrap()
    };
    assert!(loaded.process_group().ptr_eq(&target));
    assert_eq!(loaded.gather().unwrap(), Tensor::arange(&[3, 2]));
}
