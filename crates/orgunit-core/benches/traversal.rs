use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use orgunit_core::{EntityRef, HierarchyEngine, NewNode, Node, NodeId, StaticRegistry};

/// Tree sizes as (fan-out, depth).
const SHAPES: &[(usize, usize)] = &[(4, 4), (8, 4), (16, 3)];

fn populate(fan_out: usize, depth: usize) -> (HierarchyEngine, NodeId, NodeId) {
    let registry = Arc::new(StaticRegistry::new(["Unit"]));
    let mut engine = HierarchyEngine::open_in_memory(registry).expect("open engine");

    let root = engine
        .create(NewNode::root(EntityRef::new("Unit", "root")))
        .expect("create root");
    let mut level = vec![root.id.clone()];
    let mut deepest = root.id.clone();

    for d in 0..depth {
        let mut next = Vec::with_capacity(level.len() * fan_out);
        for parent in &level {
            for i in 0..fan_out {
                let node = engine
                    .create(NewNode::child_of(
                        parent.clone(),
                        EntityRef::new("Unit", format!("{d}-{i}")),
                    ))
                    .expect("create child");
                next.push(node.id);
            }
        }
        if let Some(last) = next.last() {
            deepest = last.clone();
        }
        level = next;
    }

    (engine, root.id, deepest)
}

fn bench_traversal(c: &mut Criterion) {
    let mut group = c.benchmark_group("traversal");

    for &(fan_out, depth) in SHAPES {
        let (engine, root, deepest) = populate(fan_out, depth);
        let label = format!("{fan_out}x{depth}");
        let total = engine.count(false).expect("count");
        group.throughput(Throughput::Elements(total as u64));

        group.bench_with_input(BenchmarkId::new("descendants", &label), &root, |b, root| {
            b.iter(|| black_box(engine.descendants(root).expect("descendants")));
        });

        group.bench_with_input(
            BenchmarkId::new("ancestor_chain", &label),
            &deepest,
            |b, leaf| b.iter(|| black_box(engine.ancestor_chain(leaf).expect("chain"))),
        );

        group.bench_with_input(BenchmarkId::new("tree", &label), &root, |b, root| {
            b.iter(|| black_box(engine.tree(Some(root), false).expect("tree")));
        });

        let flat: Vec<Node> = engine
            .descendants(&root)
            .expect("descendants")
            .into_iter()
            .rev()
            .collect();
        group.bench_with_input(
            BenchmarkId::new("rebuild_from_flat_list", &label),
            &flat,
            |b, flat| {
                b.iter(|| {
                    black_box(
                        HierarchyEngine::rebuild_from_flat_list(flat.iter().cloned())
                            .expect("rebuild"),
                    )
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_traversal);
criterion_main!(benches);
