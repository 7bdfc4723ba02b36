use crate::clique::Clique;
use crate::error::Anomaly;
use crate::graph::ComponentGraph;
use crate::keys::StitchKey;
use crate::storage::{Storage, StoreRead, StoreTxn};
use crate::testing::{id, v, Fixture};
use crate::untangle::*;
use crate::value::{Scalar, Value};
use proptest::prelude::*;
use std::collections::BTreeSet;

fn untangler() -> Untangler {
    Untangler::new(UntangleConfig::default()).unwrap()
}

fn ids(ns: &[u128]) -> Vec<crate::types::EntityId> {
    ns.iter().map(|n| id(*n)).collect()
}

/// Drops every clique defined by names alone.
struct NoNameCliques;

impl CliqueFilter for NoNameCliques {
    fn admit(&self, clique: &Clique, _graph: &ComponentGraph) -> bool {
        clique.keys().any(|k| k != StitchKey::Name)
    }
}

#[test]
fn test_shared_identifier_and_shared_name_groups() {
    let fx = Fixture::new();
    for n in 1..=3 {
        fx.add(n, &[(StitchKey::Unii, v("X1"))]);
    }
    for n in 4..=5 {
        fx.add(n, &[(StitchKey::Name, v("ASPIRIN"))]);
    }

    let first = untangler().partition(&fx.graph(id(1))).unwrap();
    assert_eq!(first.groups, vec![ids(&[1, 2, 3])]);
    assert_eq!(first.metrics.exact_merges, 2);

    let second = untangler().partition(&fx.graph(id(5))).unwrap();
    assert_eq!(second.groups, vec![ids(&[4, 5])]);
    assert_eq!(second.metrics.clique_merges, 1);
}

#[test]
fn test_conflicting_roots_stay_apart() {
    let fx = Fixture::new();
    fx.add(1, &[
        (StitchKey::Unii, v("X")),
        (StitchKey::ActiveMoiety, v("X")),
        (StitchKey::Name, v("SHARED")),
    ]);
    fx.add(2, &[
        (StitchKey::Unii, v("Y")),
        (StitchKey::ActiveMoiety, v("Y")),
        (StitchKey::Name, v("SHARED")),
    ]);
    let graph = fx.graph(id(1));
    let config = UntangleConfig::default();
    assert_eq!(root_identity(&graph, &config, id(1)), Some(Scalar::from("X")));
    assert_eq!(root_identity(&graph, &config, id(2)), Some(Scalar::from("Y")));

    let partition = untangler().partition(&graph).unwrap();
    assert_eq!(partition.groups, vec![ids(&[1]), ids(&[2])]);
    assert!(partition.metrics.refused_merges >= 1);
    assert!(matches!(
        partition.anomalies[0],
        Anomaly::ConflictingRootIdentity { .. }
    ));
}

#[test]
fn test_children_of_different_parents_stay_apart() {
    let fx = Fixture::new();
    fx.add(1, &[
        (StitchKey::Unii, v("A1")),
        (StitchKey::ActiveMoiety, v("X")),
        (StitchKey::Name, v("SHARED")),
    ]);
    fx.add(2, &[
        (StitchKey::Unii, v("B1")),
        (StitchKey::ActiveMoiety, v("Y")),
        (StitchKey::Name, v("SHARED")),
    ]);
    let graph = fx.graph(id(1));
    let config = UntangleConfig::default();
    assert_eq!(root_identity(&graph, &config, id(1)), None);
    assert_eq!(canonical_identity(&graph, &config, id(1)), Some(Scalar::from("X")));
    assert_eq!(canonical_identity(&graph, &config, id(2)), Some(Scalar::from("Y")));

    let partition = untangler().partition(&graph).unwrap();
    assert_eq!(partition.groups, vec![ids(&[1]), ids(&[2])]);
    assert!(partition.metrics.refused_merges >= 1);
}

#[test]
fn test_canonical_identity_without_parent_reference() {
    let fx = Fixture::new();
    fx.add(1, &[(StitchKey::Unii, v("U"))]);
    fx.add(2, &[
        (StitchKey::Unii, v("U")),
        (StitchKey::ActiveMoiety, Value::list(["P", "Q"])),
    ]);
    let graph = fx.graph(id(1));
    let config = UntangleConfig::default();

    assert_eq!(canonical_identity(&graph, &config, id(1)), Some(Scalar::from("U")));
    // Several parents: no identity to defend
    assert_eq!(canonical_identity(&graph, &config, id(2)), None);
}

#[test]
fn test_children_collapse_into_single_parent() {
    let fx = Fixture::new();
    fx.add(1, &[(StitchKey::Unii, v("P")), (StitchKey::ActiveMoiety, v("P"))]);
    fx.add(2, &[(StitchKey::Unii, v("S1")), (StitchKey::ActiveMoiety, v("P"))]);
    fx.add(3, &[(StitchKey::Unii, v("S2")), (StitchKey::ActiveMoiety, v("P"))]);

    let graph = fx.graph(id(1));
    let config = UntangleConfig::default();
    // A salt points elsewhere: not a root, but it carries its parent's identity
    assert_eq!(root_identity(&graph, &config, id(2)), None);
    assert_eq!(canonical_identity(&graph, &config, id(2)), Some(Scalar::from("P")));

    let partition = untangler().partition(&graph).unwrap();
    assert_eq!(partition.groups, vec![ids(&[1, 2, 3])]);
    assert_eq!(partition.metrics.seed_merges, 2);
    assert!(partition.unsure.is_empty());
}

#[test]
fn test_multi_parent_follows_supporting_keys() {
    let fx = Fixture::new();
    fx.add(1, &[
        (StitchKey::Unii, v("P")),
        (StitchKey::ActiveMoiety, v("P")),
        (StitchKey::Name, v("PARENT ONE")),
    ]);
    fx.add(2, &[(StitchKey::Unii, v("Q")), (StitchKey::ActiveMoiety, v("Q"))]);
    fx.add(3, &[
        (StitchKey::ActiveMoiety, Value::list(["P", "Q"])),
        (StitchKey::Name, v("PARENT ONE")),
    ]);

    let partition = untangler().partition(&fx.graph(id(3))).unwrap();
    assert!(partition.unsure.contains(&id(3)));
    assert_eq!(partition.metrics.unsure, 1);
    assert_eq!(partition.groups, vec![ids(&[1, 3]), ids(&[2])]);
    assert_eq!(partition.metrics.multi_parent_merges, 1);
}

#[test]
fn test_multi_parent_tie_stays_singleton() {
    let fx = Fixture::new();
    fx.add(1, &[(StitchKey::Unii, v("P")), (StitchKey::ActiveMoiety, v("P"))]);
    fx.add(2, &[(StitchKey::Unii, v("Q")), (StitchKey::ActiveMoiety, v("Q"))]);
    fx.add(3, &[(StitchKey::ActiveMoiety, Value::list(["P", "Q"]))]);

    let partition = untangler().partition(&fx.graph(id(3))).unwrap();
    assert_eq!(partition.groups, vec![ids(&[1]), ids(&[2]), ids(&[3])]);
    assert_eq!(partition.metrics.multi_parent_merges, 0);
}

#[test]
fn test_promiscuous_node_skips_exact_stitching() {
    let fx = Fixture::new();
    fx.add(1, &[(StitchKey::Unii, v("X"))]);
    fx.add(2, &[(StitchKey::Unii, v("X"))]);
    fx.add(3, &[(StitchKey::Unii, Value::list(["X", "Y"]))]);
    fx.add(4, &[(StitchKey::Unii, v("Y"))]);

    let partition = untangler().partition(&fx.graph(id(1))).unwrap();
    assert_eq!(partition.metrics.promiscuous, 1);
    assert_eq!(partition.metrics.exact_merges, 1);
    assert_eq!(partition.groups, vec![ids(&[1, 2]), ids(&[3]), ids(&[4])]);
}

#[test]
fn test_overlapping_clique_joins_dominant_seed() {
    let fx = Fixture::new();
    fx.add(1, &[(StitchKey::Cas, v("C1")), (StitchKey::Name, v("N"))]);
    fx.add(2, &[(StitchKey::Cas, v("C1")), (StitchKey::Name, v("N"))]);
    fx.add(3, &[(StitchKey::Name, v("N"))]);

    let partition = untangler().partition(&fx.graph(id(1))).unwrap();
    assert_eq!(partition.metrics.disjoint_cliques, 1);
    assert_eq!(partition.groups, vec![ids(&[1, 2, 3])]);
    assert!(partition.suspects.is_empty());
}

#[test]
fn test_even_split_marks_suspect() {
    let fx = tie_fixture();
    let partition = untangler().partition(&fx.graph(id(1))).unwrap();

    assert_eq!(partition.metrics.disjoint_cliques, 2);
    assert_eq!(partition.suspects.get(&id(5)), Some(&SuspectReason::Tie));
    assert_eq!(partition.groups, vec![ids(&[1, 2]), ids(&[3, 4]), ids(&[5])]);
}

fn tie_fixture() -> Fixture {
    load(tie_records().iter())
}

/// Seeds {1,2} and {3,4} on CAS; 5 shares a name with 2 and 3
fn tie_records() -> Vec<(u128, Vec<(StitchKey, Value)>)> {
    vec![
        (1, vec![(StitchKey::Cas, v("C1"))]),
        (2, vec![(StitchKey::Cas, v("C1")), (StitchKey::Name, v("N"))]),
        (3, vec![(StitchKey::Cas, v("C2")), (StitchKey::Name, v("N"))]),
        (4, vec![(StitchKey::Cas, v("C2"))]),
        (5, vec![(StitchKey::Name, v("N"))]),
    ]
}

/// Store `records` in iteration order. Edge ids, edge direction and the
/// stored union-find trees all follow that order; entity ids do not.
fn load<'r, I>(records: I) -> Fixture
where
    I: IntoIterator<Item = &'r (u128, Vec<(StitchKey, Value)>)>,
{
    let fx = Fixture::new();
    for (n, values) in records {
        fx.add(*n, values);
    }
    fx
}

#[test]
fn test_secondary_clique_places_residual() {
    let fx = Fixture::new();
    fx.add(1, &[(StitchKey::Cas, v("C")), (StitchKey::Keyword, v("K"))]);
    fx.add(2, &[(StitchKey::Cas, v("C")), (StitchKey::Keyword, v("K"))]);
    fx.add(3, &[(StitchKey::Keyword, v("K"))]);

    let partition = untangler().partition(&fx.graph(id(3))).unwrap();
    assert_eq!(partition.groups, vec![ids(&[1, 2, 3])]);
    assert_eq!(partition.metrics.secondary_merges, 1);
}

#[test]
fn test_salvage_by_neighbor_vote() {
    let fx = Fixture::new();
    fx.add(1, &[(StitchKey::Cas, v("C")), (StitchKey::Name, v("N"))]);
    fx.add(2, &[(StitchKey::Cas, v("C")), (StitchKey::Name, v("N"))]);
    fx.add(3, &[(StitchKey::Name, v("N"))]);

    let partition = untangler()
        .with_filter(NoNameCliques)
        .partition(&fx.graph(id(1)))
        .unwrap();
    assert_eq!(partition.groups, vec![ids(&[1, 2, 3])]);
    assert_eq!(partition.metrics.salvage_merges, 1);
    assert_eq!(partition.metrics.secondary_merges, 0);
}

#[test]
fn test_partition_is_deterministic() {
    let records = tie_records();
    let forward = load(records.iter());
    let backward = load(records.iter().rev());

    let graph = forward.graph(id(3));
    let first = untangler().partition(&graph).unwrap();
    let second = untangler().partition(&graph).unwrap();
    assert_eq!(first.groups, second.groups);
    assert_eq!(first.suspects, second.suspects);

    let reversed = backward.graph(id(1));
    let edge = |g: &ComponentGraph| {
        g.edges()
            .iter()
            .find(|e| e.key == StitchKey::Cas && e.links(id(1), id(2), e.key, &e.value))
            .map(|e| (e.from, e.to))
    };
    // Same records, differently stored
    assert_eq!(edge(&graph), Some((id(2), id(1))));
    assert_eq!(edge(&reversed), Some((id(1), id(2))));

    let third = untangler().partition(&reversed).unwrap();
    assert_eq!(first.groups, third.groups);
    assert_eq!(first.suspects, third.suspects);
    assert_eq!(first.metrics.merges(), third.metrics.merges());
}

#[test]
fn test_resolve_materializes_and_reuses() {
    let fx = tie_fixture();
    let untangler = untangler();

    let mut txn = fx.storage.begin().unwrap();
    let report = untangler.resolve(&mut txn, id(1)).unwrap();
    txn.commit().unwrap();

    assert_eq!(report.groups(), vec![ids(&[1, 2]), ids(&[3, 4]), ids(&[5])]);
    assert_eq!(report.metrics.stitches_created, 3);
    let residual = report
        .anomalies
        .iter()
        .filter(|a| matches!(a, Anomaly::UnassignedResidual { entity, .. } if *entity == id(5)))
        .count();
    assert_eq!(residual, 1);

    let mut txn = fx.storage.begin().unwrap();
    let again = untangler.resolve(&mut txn, id(4)).unwrap();
    txn.commit().unwrap();

    assert_eq!(again.metrics.stitches_created, 0);
    assert_eq!(again.metrics.stitches_reused, 3);
    assert_eq!(report.stitches, again.stitches);

    let txn = fx.storage.begin_read().unwrap();
    assert_eq!(txn.data_source("stitch_v1").unwrap().instances, 3);
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = UntangleConfig::default().with_clique_keys(vec![]);
    assert!(Untangler::new(config).is_err());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn partition_is_stable_and_covers_component(
        records in prop::collection::vec(
            (prop::option::of(0u8..3), prop::option::of(0u8..2), prop::option::of(0u8..2)),
            2..8,
        ),
    ) {
        let records: Vec<(u128, Vec<(StitchKey, Value)>)> = records
            .iter()
            .enumerate()
            .map(|(i, (cas, name, code))| {
                let mut values = Vec::new();
                if let Some(c) = cas {
                    values.push((StitchKey::Cas, v(&format!("CAS-{}", c))));
                }
                if let Some(n) = name {
                    values.push((StitchKey::Name, v(&format!("NAME-{}", n))));
                }
                if let Some(c) = code {
                    values.push((StitchKey::Code, v(&format!("CODE-{}", c))));
                }
                (i as u128 + 1, values)
            })
            .collect();

        let graph = load(records.iter()).graph(id(1));
        let first = untangler().partition(&graph).unwrap();

        let again = untangler()
            .partition(&load(records.iter().rev()).graph(id(1)))
            .unwrap();
        prop_assert_eq!(&first.groups, &again.groups);
        prop_assert_eq!(&first.suspects, &again.suspects);

        let covered: Vec<_> = first.groups.iter().flatten().copied().collect();
        let unique: BTreeSet<_> = covered.iter().copied().collect();
        prop_assert_eq!(covered.len(), unique.len());
        prop_assert_eq!(unique, graph.nodes().collect::<BTreeSet<_>>());
    }
}
