use std::sync::Arc;

use archstore::test_util::{self, TestTypes};
use archstore::{store, TypeIndex, TypeRegistry};
use criterion::*;

lazy_static::lazy_static! {
    static ref REGISTRY: (Arc<TypeRegistry>, TestTypes) = test_util::registry();
}

fn create_entity(c: &mut Criterion) {
    let mut group = c.benchmark_group("create entity");
    let (registry, types) = &*REGISTRY;

    let sets: [(&str, Vec<TypeIndex>); 4] = [
        ("0 components", vec![]),
        ("1 component", vec![types.position]),
        ("2 components", vec![types.position, types.velocity]),
        ("4 components", vec![types.position, types.velocity, types.health, types.bounds]),
    ];

    for (name, set) in &sets {
        for log_entities in (0..=12).step_by(4) {
            let entities = 1 << log_entities;
            group.throughput(Throughput::Elements(entities));
            group.bench_with_input(
                BenchmarkId::new(*name, format!("{entities} entities")),
                &entities,
                |b, &entities| {
                    b.iter_batched(
                        || {
                            let mut store = store::builder(Arc::clone(registry)).build();
                            let archetype = store.create_archetype(set).expect("valid types");
                            (store, archetype)
                        },
                        |(mut store, archetype)| {
                            store.create_entities(archetype, entities as usize).expect("no jobs")
                        },
                        BatchSize::SmallInput,
                    );
                },
            );
        }
    }
}

criterion_group!(benches, create_entity);
criterion_main!(benches);
