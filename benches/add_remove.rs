use std::sync::Arc;

use archstore::test_util::{self, TestTypes};
use archstore::{store, TypeRegistry};
use criterion::*;

lazy_static::lazy_static! {
    static ref REGISTRY: (Arc<TypeRegistry>, TestTypes) = test_util::registry();
}

fn add_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("add then remove component");
    let (registry, types) = &*REGISTRY;

    for log_entities in (4..=12).step_by(4) {
        let entities = 1 << log_entities;
        group.throughput(Throughput::Elements(entities));
        group.bench_with_input(
            BenchmarkId::new("velocity", format!("{entities} entities")),
            &entities,
            |b, &entities| {
                let mut store = store::builder(Arc::clone(registry)).build();
                let archetype =
                    store.create_archetype(&[types.position, types.health]).expect("valid types");
                let created =
                    store.create_entities(archetype, entities as usize).expect("no pending jobs");

                b.iter(|| {
                    for &entity in &created {
                        store.add_component(entity, types.velocity).expect("absent");
                    }
                    for &entity in &created {
                        store.remove_component(entity, types.velocity).expect("present");
                    }
                })
            },
        );
    }
}

criterion_group!(benches, add_remove);
criterion_main!(benches);
