use std::sync::Arc;

use archstore::query::{ComponentType, EntityQueryDesc};
use archstore::test_util::{self, Position, TestTypes, Velocity};
use archstore::{store, EntityComponentStore, TypeRegistry};
use criterion::*;

lazy_static::lazy_static! {
    static ref REGISTRY: (Arc<TypeRegistry>, TestTypes) = test_util::registry();
}

/// Spreads `entities` over every archetype containing position and velocity.
fn populate(entities: usize) -> EntityComponentStore {
    let (registry, types) = &*REGISTRY;
    let mut store = store::builder(Arc::clone(registry)).build();

    let extras = [types.health, types.frozen, types.bounds];
    for mask in 0..(1 << extras.len()) {
        let mut set = vec![types.position, types.velocity];
        let selected = extras.iter().enumerate().filter(|(i, _)| mask & (1 << i) != 0);
        set.extend(selected.map(|(_, &ty)| ty));
        let archetype = store.create_archetype(&set).expect("valid types");
        store.create_entities(archetype, entities >> extras.len()).expect("no pending jobs");
    }
    store
}

fn query_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");
    let (_, types) = &*REGISTRY;

    for log_entities in (8..=16).step_by(4) {
        let entities = 1 << log_entities;
        group.throughput(Throughput::Elements(entities));

        group.bench_with_input(
            BenchmarkId::new("count (cached)", format!("{entities} entities")),
            &entities,
            |b, &entities| {
                let mut store = populate(entities as usize);
                let query = store
                    .create_query(EntityQueryDesc::new().with_all([types.position]))
                    .expect("valid descriptor");
                b.iter(|| query.calculate_entity_count(&mut store).expect("same store"))
            },
        );

        group.bench_with_input(
            BenchmarkId::new("count (after structural change)", format!("{entities} entities")),
            &entities,
            |b, &entities| {
                let mut store = populate(entities as usize);
                let query = store
                    .create_query(EntityQueryDesc::new().with_all([types.position]))
                    .expect("valid descriptor");
                b.iter(|| {
                    let entity = store.create_entity_with(&[types.position]).expect("no jobs");
                    let count = query.calculate_entity_count(&mut store).expect("same store");
                    store.destroy_entity(entity).expect("live entity");
                    count
                })
            },
        );

        group.bench_with_input(
            BenchmarkId::new("for_each_chunk_mut (a += b)", format!("{entities} entities")),
            &entities,
            |b, &entities| {
                let mut store = populate(entities as usize);
                let query = store
                    .create_query(EntityQueryDesc::new().with_all([
                        ComponentType::read_write(types.position),
                        ComponentType::read_only(types.velocity),
                    ]))
                    .expect("valid descriptor");
                b.iter(|| {
                    query.for_each_chunk_mut(&mut store, |mut chunk| {
                        let velocities: Vec<Velocity> =
                            chunk.components(types.velocity).expect("read").to_vec();
                        let positions =
                            chunk.components_mut::<Position>(types.position).expect("write");
                        for (position, velocity) in positions.iter_mut().zip(velocities) {
                            position.0[0] += velocity.0[0];
                            position.0[1] += velocity.0[1];
                        }
                    })
                    .expect("same store")
                })
            },
        );
    }
}

criterion_group!(benches, query_cache);
criterion_main!(benches);
