use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use stitch_core::*;

const CLUSTERS: usize = 20;
const CLUSTER_SIZE: usize = 10;

/// Clusters sharing a CAS number, chained together by one name per
/// neighboring pair so that everything lands in a single component.
fn build_component() -> (Stitcher, EntityId) {
    let stitcher = Stitcher::in_memory(StitcherConfig::default()).unwrap();
    stitcher.register_source(DataSource::new("bench", "Bench")).unwrap();

    let mut first = None;
    for c in 0..CLUSTERS {
        for i in 0..CLUSTER_SIZE {
            let mut values = vec![(StitchKey::Cas, Value::single(format!("{}-00-{}", c, c % 10)))];
            if i == 0 {
                let mut names = vec![format!("BRIDGE {}", c)];
                if c > 0 {
                    names.push(format!("BRIDGE {}", c - 1));
                }
                values.push((StitchKey::Name, Value::list(names)));
            }
            let id = stitcher
                .add_entity("bench", &format!("{}-{}", c, i), &values)
                .unwrap();
            first.get_or_insert(id);
        }
    }
    (stitcher, first.unwrap())
}

fn bench_partition(c: &mut Criterion) {
    let (stitcher, seed) = build_component();
    let graph = stitcher.component(seed).unwrap();

    c.bench_function("partition (200 nodes, 20 clusters)", |b| {
        b.iter(|| {
            stitcher.untangler().partition(&graph).unwrap();
        });
    });
}

fn bench_clique_enumeration(c: &mut Criterion) {
    let (stitcher, seed) = build_component();
    let graph = stitcher.component(seed).unwrap();
    let keys = UntangleConfig::default().clique_keys;

    c.bench_function("clique enumeration (200 nodes)", |b| {
        b.iter(|| {
            let mut count = 0;
            cliques(&graph, graph.nodes(), &keys, |_| {
                count += 1;
                true
            });
            count
        });
    });
}

fn bench_resolve_component(c: &mut Criterion) {
    c.bench_function("resolve component (load + partition + materialize)", |b| {
        b.iter_batched(
            build_component,
            |(stitcher, seed)| {
                stitcher.resolve_component(seed, |_| {}).unwrap();
            },
            BatchSize::LargeInput,
        );
    });
}

fn bench_stitch_pair(c: &mut Criterion) {
    c.bench_function("stitch pair", |b| {
        b.iter_batched(
            || {
                let stitcher = Stitcher::in_memory(StitcherConfig::default()).unwrap();
                stitcher.register_source(DataSource::new("bench", "Bench")).unwrap();
                let a = stitcher.add_entity("bench", "a", &[]).unwrap();
                let b = stitcher.add_entity("bench", "b", &[]).unwrap();
                (stitcher, a, b)
            },
            |(stitcher, a, b)| {
                stitcher.stitch(a, b, StitchKey::Cas, "50-00-0").unwrap();
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_partition,
    bench_clique_enumeration,
    bench_resolve_component,
    bench_stitch_pair,
);
criterion_main!(benches);
