//! Strategy combination over a populated pool

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use strata_graph::NodeId;
use strata_lineage::Lineage;
use strata_pool::{InputSpec, Metadata, PoolError, PutRequest, ResourcePool};

fn ingest(pool: &mut ResourcePool, name: &str) -> Metadata {
    let key = pool
        .put(PutRequest::new(name, NodeId::new(0).output(name), "ingress").injected())
        .unwrap();
    pool.get_record(name, &key).unwrap().metadata.clone()
}

/// Write `count` forked variants of `name` derived from `ancestry`
fn fork_variants(pool: &mut ResourcePool, name: &str, ancestry: &Metadata, count: usize) {
    for i in 0..count {
        pool.put(
            PutRequest::new(name, NodeId::new(i + 1).output(name), format!("{name}_variant{i}"))
                .with_metadata(ancestry.clone())
                .forking(true),
        )
        .unwrap();
    }
}

/// Two variants of `name`: one where `label` forked it, one where it did not
fn on_off_variants(pool: &mut ResourcePool, name: &str, ancestry: &Metadata, label: &str) {
    let mut on = ancestry.clone();
    on.tag_fork(name, label);
    pool.put(
        PutRequest::new(name, NodeId::new(10).output(name), label)
            .with_metadata(on)
            .forking(true),
    )
    .unwrap();
    pool.put(
        PutRequest::new(name, NodeId::new(11).output(name), "passthrough")
            .with_metadata(ancestry.clone())
            .forking(true),
    )
    .unwrap();
}

proptest! {
    #[test]
    fn unlinked_inputs_yield_full_product(counts in prop::collection::vec(1usize..4, 1..4)) {
        let mut pool = ResourcePool::new("prop");
        let src = ingest(&mut pool, "src");
        let names: Vec<String> = (0..counts.len()).map(|i| format!("in{i}")).collect();
        for (name, count) in names.iter().zip(&counts) {
            fork_variants(&mut pool, name, &src, *count);
        }

        let inputs: Vec<InputSpec> = names.iter().map(InputSpec::required).collect();
        let strategies = pool.strategies(&inputs).unwrap();
        prop_assert_eq!(strategies.len(), counts.iter().product::<usize>());

        for strategy in &strategies {
            prop_assert_eq!(strategy.len(), names.len());
        }
    }
}

#[test]
fn single_input_strategies_are_its_lineages() {
    let mut pool = ResourcePool::new("sub-01");
    let src = ingest(&mut pool, "src");
    fork_variants(&mut pool, "desc-preproc_bold", &src, 3);

    let strategies = pool.strategies(&[InputSpec::required("desc-preproc_bold")]).unwrap();
    let lineages: Vec<&Lineage> = strategies.iter().map(|s| s.lineage()).collect();
    assert_eq!(lineages, pool.lineages("desc-preproc_bold"));
}

#[test]
fn linked_group_drops_mixed_branches() {
    let mut pool = ResourcePool::new("sub-01");
    let src = ingest(&mut pool, "src");
    on_off_variants(&mut pool, "desc-a_bold", &src, "apply_m");
    on_off_variants(&mut pool, "desc-b_bold", &src, "apply_m");

    let unlinked = pool
        .strategies(&[InputSpec::required("desc-a_bold"), InputSpec::required("desc-b_bold")])
        .unwrap();
    assert_eq!(unlinked.len(), 4);

    let linked = pool
        .strategies(&[InputSpec::linked(["desc-a_bold", "desc-b_bold"])])
        .unwrap();
    assert_eq!(linked.len(), 2);
    for strategy in &linked {
        let (_, a) = strategy.get("desc-a_bold").unwrap();
        let (_, b) = strategy.get("desc-b_bold").unwrap();
        assert_eq!(a.metadata.applies("apply_m"), b.metadata.applies("apply_m"));
    }
}

#[test]
fn linked_group_with_one_present_member_is_not_pruned() {
    let mut pool = ResourcePool::new("sub-01");
    let src = ingest(&mut pool, "src");
    on_off_variants(&mut pool, "desc-a_bold", &src, "apply_m");

    let strategies = pool
        .strategies(&[InputSpec::linked(["desc-a_bold", "desc-missing_bold"])])
        .unwrap();
    assert_eq!(strategies.len(), 2);
}

#[test]
fn absent_optional_input_adds_no_dimension() {
    let mut pool = ResourcePool::new("sub-01");
    let src = ingest(&mut pool, "src");
    fork_variants(&mut pool, "desc-preproc_bold", &src, 2);

    let with_optional = pool
        .strategies(&[
            InputSpec::required("desc-preproc_bold"),
            InputSpec::optional("space-bold_desc-brain_mask"),
        ])
        .unwrap();
    let without = pool.strategies(&[InputSpec::required("desc-preproc_bold")]).unwrap();

    let keys = |s: &[strata_pool::StrategyPool]| s.iter().map(|p| p.key().clone()).collect::<Vec<_>>();
    assert_eq!(keys(&with_optional), keys(&without));
}

#[test]
fn every_input_absent_is_no_strategies() {
    let pool = ResourcePool::new("sub-01");
    let err = pool
        .strategies(&[InputSpec::required("T1w"), InputSpec::optional("mask")])
        .unwrap_err();
    assert_eq!(
        err,
        PoolError::NoStrategiesFound {
            inputs: vec!["T1w".into(), "mask".into()]
        }
    );
}

#[test]
fn missing_required_input_is_not_found() {
    let mut pool = ResourcePool::new("sub-01");
    ingest(&mut pool, "bold");
    let err = pool
        .strategies(&[InputSpec::required("bold"), InputSpec::required("T1w")])
        .unwrap_err();
    assert_eq!(err, PoolError::not_found("T1w"));
}

#[test]
fn merged_strategy_nests_input_lineages() {
    let mut pool = ResourcePool::new("sub-01");
    let t1 = ingest(&mut pool, "T1w");
    let bold = ingest(&mut pool, "bold");

    let strategies = pool
        .strategies(&[InputSpec::required("bold"), InputSpec::required("T1w")])
        .unwrap();
    assert_eq!(strategies.len(), 1);
    assert_eq!(
        strategies[0].lineage(),
        &Lineage::merged([bold.lineage, t1.lineage])
    );
}
