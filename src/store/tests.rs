//! Tests structural changes and component access on the store.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::archetype::ArchetypeId;
use crate::chunk::ChunkId;
use crate::comp::TypeIndex;
use crate::dependency::JobHandle;
use crate::entity::Entity;
use crate::query::EntityQueryDesc;
use crate::store::EntityComponentStore;
use crate::test_util::*;
use crate::Error;

fn chunk_of(store: &EntityComponentStore, entity: Entity) -> ChunkId {
    store.location_of(entity).unwrap().chunk
}

#[test]
fn test_create_archetype_normalizes() {
    init();

    let (mut store, types) = store();
    let a = store.create_archetype(&[types.velocity, types.position, types.velocity]).unwrap();
    let b = store.create_archetype(&[types.position, types.velocity]).unwrap();
    assert_eq!(a, b);
    assert_eq!(store.archetype_count(), 1);
    assert_eq!(store.archetype(a).unwrap().types(), [types.position, types.velocity]);

    assert!(matches!(
        store.create_archetype(&[TypeIndex(500)]),
        Err(Error::UnregisteredType(_))
    ));
    assert_eq!(store.archetype_count(), 1);
}

#[test]
fn test_create_and_destroy() {
    init();

    let (mut store, types, log) = traced_store();
    let archetype = store.create_archetype(&[types.position]).unwrap();
    let entities = store.create_entities(archetype, 3).unwrap();
    assert_eq!(store.entity_count(), 3);
    assert_eq!(store.chunk_count(), 1);

    let events = log.take();
    assert_eq!(events[0], Event::CreateArchetype(archetype));
    assert!(matches!(events[1], Event::AllocateChunk(a, _) if a == archetype));
    assert_eq!(events[2..], [
        Event::CreateEntity(entities[0]),
        Event::CreateEntity(entities[1]),
        Event::CreateEntity(entities[2]),
    ]);

    for &entity in &entities {
        store.destroy_entity(entity).unwrap();
        store.check_integrity();
    }
    assert_eq!(store.entity_count(), 0);
    assert_eq!(store.chunk_count(), 0, "empty chunks are freed");
    assert_eq!(store.archetype_count(), 1, "archetypes are never freed");
    assert_eq!(log.count(|event| matches!(event, Event::FreeChunk(..))), 1);
}

#[test]
fn test_stale_handle() {
    init();

    let (mut store, types) = store();
    let old = store.create_entity_with(&[types.position]).unwrap();
    store.destroy_entity(old).unwrap();

    let new = store.create_entity_with(&[types.position]).unwrap();
    assert_eq!(new.index, old.index);
    assert_ne!(new.version, old.version);

    let missing = Err(Error::EntityDoesNotExist(old));
    assert!(!store.exists(old));
    assert_eq!(store.destroy_entity(old), missing);
    assert_eq!(store.add_component(old, types.velocity), missing);
    assert_eq!(store.remove_component(old, types.position), missing);
    assert_eq!(store.set_component(old, Position([1., 1.])), missing);
    assert_eq!(store.get_component::<Position>(old).err(), missing.clone().err());
    assert_eq!(store.has_component(old, types.position).err(), missing.clone().err());
    assert_eq!(store.location_of(old).err(), missing.err());

    assert!(store.exists(new));
    store.set_component(new, Position([1., 1.])).unwrap();
    assert_eq!(*store.get_component::<Position>(new).unwrap(), Position([1., 1.]));
    assert!(!store.exists(Entity::NULL));
}

#[test]
fn test_add_remove_round_trip() {
    init();

    let (mut store, types) = store();
    let entity = store.create_entity_with(&[types.position, types.health]).unwrap();
    let neighbour = store.create_entity_with(&[types.position, types.health]).unwrap();
    store.set_component(entity, Position([1.5, -2.])).unwrap();
    store.set_component(entity, Health(77)).unwrap();
    store.set_component(neighbour, Health(5)).unwrap();

    let original = store.archetype_of(entity).unwrap();
    let position_bytes = store.component_bytes(entity, types.position).unwrap().to_vec();
    let health_bytes = store.component_bytes(entity, types.health).unwrap().to_vec();

    store.add_component(entity, types.velocity).unwrap();
    store.check_integrity();
    assert_ne!(store.archetype_of(entity).unwrap(), original);
    assert!(store.has_component(entity, types.velocity).unwrap());
    assert_eq!(*store.get_component::<Velocity>(entity).unwrap(), Velocity([0.; 2]));

    store.remove_component(entity, types.velocity).unwrap();
    store.check_integrity();
    assert_eq!(store.archetype_of(entity).unwrap(), original);
    assert_eq!(store.component_bytes(entity, types.position).unwrap(), position_bytes);
    assert_eq!(store.component_bytes(entity, types.health).unwrap(), health_bytes);

    // the neighbour was swapped into the vacated row and kept its data
    assert_eq!(*store.get_component::<Health>(neighbour).unwrap(), Health(5));
}

#[test]
fn test_add_remove_errors_leave_store_unchanged() {
    init();

    let (mut store, types) = store();
    let entity = store.create_entity_with(&[types.position]).unwrap();
    let order_version = store.order_version();

    assert_eq!(
        store.add_component(entity, types.position),
        Err(Error::ComponentAlreadyPresent { entity, index: types.position })
    );
    assert_eq!(
        store.remove_component(entity, types.velocity),
        Err(Error::ComponentNotPresent { entity, index: types.velocity })
    );
    assert!(matches!(
        store.add_component(entity, TypeIndex(500)),
        Err(Error::UnregisteredType(_))
    ));
    assert_eq!(
        store.get_component::<Velocity>(entity).err(),
        Some(Error::ComponentNotPresent { entity, index: types.velocity })
    );

    assert_eq!(store.order_version(), order_version);
    assert_eq!(store.archetype_count(), 1);
    store.check_integrity();
}

#[test]
fn test_add_component_data() {
    init();

    let (mut store, types) = store();
    let entity = store.create_entity_with(&[types.position]).unwrap();
    store.add_component_data(entity, Health(9)).unwrap();
    assert_eq!(*store.get_component::<Health>(entity).unwrap(), Health(9));

    // shared types cannot be added as per-entity data
    assert!(matches!(store.add_component_data(entity, Team(1)), Err(Error::TypeMismatch { .. })));
}

#[test]
fn test_raw_bytes() {
    init();

    let (mut store, types) = store();
    let entity = store.create_entity_with(&[types.health, types.waypoint]).unwrap();

    store.set_component_bytes(entity, types.health, &7u32.to_ne_bytes()).unwrap();
    assert_eq!(*store.get_component::<Health>(entity).unwrap(), Health(7));
    assert_eq!(store.component_bytes(entity, types.health).unwrap(), 7u32.to_ne_bytes());

    assert_eq!(
        store.set_component_bytes(entity, types.health, &[0; 8]),
        Err(Error::LengthMismatch { expected: 4, actual: 8 })
    );
    assert!(matches!(
        store.set_component_bytes(entity, types.waypoint, &[0; 4]),
        Err(Error::TypeMismatch { .. })
    ));
}

#[test]
fn test_write_marks_changed() {
    init();

    let (mut store, types) = store();
    let entity = store.create_entity_with(&[types.position, types.velocity]).unwrap();
    let chunk_id = chunk_of(&store, entity);
    assert_eq!(store.chunk(chunk_id).unwrap().change_version(types.position), Ok(1));

    let version = store.increment_global_system_version();
    assert_eq!(version, 2);

    // reads never stamp
    store.get_component::<Position>(entity).unwrap();
    assert_eq!(store.chunk(chunk_id).unwrap().change_version(types.position), Ok(1));

    // writes stamp even when the value is unchanged
    store.get_component_mut::<Position>(entity).unwrap();
    let chunk = store.chunk(chunk_id).unwrap();
    assert_eq!(chunk.change_version(types.position), Ok(2));
    assert_eq!(chunk.change_version(types.velocity), Ok(1));
}

#[test]
fn test_versions() {
    init();

    let (mut store, types) = store();
    assert_eq!(store.order_version(), 1);
    assert_eq!(store.global_system_version(), 1);
    assert_eq!(store.component_type_order_version(types.health), 0);

    let entity = store.create_entity_with(&[types.position]).unwrap();
    assert_eq!(store.order_version(), 2);
    assert_eq!(store.component_type_order_version(types.position), 2);

    store.add_component(entity, types.health).unwrap();
    assert_eq!(store.order_version(), 3);
    assert_eq!(store.component_type_order_version(types.health), 3);
    assert_eq!(store.component_type_order_version(types.position), 3);
    assert_eq!(store.component_type_order_version(types.velocity), 0);

    assert_eq!(store.chunk(chunk_of(&store, entity)).unwrap().order_version(), 3);

    store.global_system_version = u32::MAX;
    assert_eq!(store.increment_global_system_version(), 1, "0 is skipped");
}

#[test]
fn test_shared_components() {
    init();

    let (mut store, types) = store();
    let archetype = store.create_archetype(&[types.position, types.team]).unwrap();
    let entities = store.create_entities(archetype, 3).unwrap();
    assert_eq!(store.chunk_count(), 1);
    assert_eq!(store.get_shared_component::<Team>(entities[0]).unwrap(), Team(0));

    store.set_component(entities[0], Position([4., 2.])).unwrap();
    store.set_shared_component(entities[0], Team(1)).unwrap();
    store.check_integrity();
    assert_eq!(store.chunk_count(), 2);
    assert_eq!(store.get_shared_component::<Team>(entities[0]).unwrap(), Team(1));
    assert_eq!(*store.get_component::<Position>(entities[0]).unwrap(), Position([4., 2.]));
    assert_eq!(store.archetype_of(entities[0]).unwrap(), archetype);

    store.set_shared_component(entities[1], Team(1)).unwrap();
    assert_eq!(chunk_of(&store, entities[0]), chunk_of(&store, entities[1]));
    assert_ne!(chunk_of(&store, entities[0]), chunk_of(&store, entities[2]));
    assert_eq!(store.shared_value_count(), 1);

    // setting the current value is not a structural change
    let order_version = store.order_version();
    store.set_shared_component(entities[1], Team(1)).unwrap();
    assert_eq!(store.order_version(), order_version);

    // resetting to the zero value rejoins the default chunk
    store.set_shared_component(entities[0], Team(0)).unwrap();
    assert_eq!(chunk_of(&store, entities[0]), chunk_of(&store, entities[2]));
    store.check_integrity();
}

#[test]
fn test_shared_values_released_with_their_entities() {
    init();

    let (mut store, types) = store();
    let archetype = store.create_archetype(&[types.position, types.team]).unwrap();
    let entities = store.create_entities(archetype, 1000).unwrap();
    for (team, &entity) in (1..=1000).zip(&entities) {
        store.set_shared_component(entity, Team(team)).unwrap();
    }
    assert_eq!(store.shared_value_count(), 1000);
    store.check_integrity();

    // the previous value is released once nothing holds it
    store.set_shared_component(entities[0], Team(2)).unwrap();
    assert_eq!(store.shared_value_count(), 999);

    // moving to another archetype keeps the value
    store.add_component(entities[1], types.velocity).unwrap();
    assert_eq!(store.get_shared_component::<Team>(entities[1]).unwrap(), Team(2));
    assert_eq!(store.shared_value_count(), 999);
    store.check_integrity();

    for &entity in &entities {
        store.destroy_entity(entity).unwrap();
    }
    assert_eq!(store.shared_value_count(), 0);
    store.check_integrity();

    // a released value is interned again under a fresh index
    let entity = store.create_entity(archetype).unwrap();
    store.set_shared_component(entity, Team(7)).unwrap();
    assert_eq!(store.get_shared_component::<Team>(entity).unwrap(), Team(7));
    assert_eq!(store.shared_value_count(), 1);
    store.check_integrity();
}

#[test]
fn test_shared_filter_does_not_intern() {
    init();

    let (mut store, types) = store();
    let entity = store.create_entity_with(&[types.position, types.team]).unwrap();
    store.set_shared_component(entity, Team(1)).unwrap();

    let mut query = store.create_query(EntityQueryDesc::new().with_all([types.team])).unwrap();
    query.add_shared_component_filter(&store, Team(5000)).unwrap();
    assert!(query.is_empty(&mut store).unwrap());
    assert_eq!(store.shared_value_count(), 1);

    // the filter matches once some entity holds the value
    store.set_shared_component(entity, Team(5000)).unwrap();
    assert_eq!(query.to_entity_array(&mut store).unwrap(), [entity]);
    assert_eq!(store.shared_value_count(), 1);
}

#[test]
fn test_unknown_archetype() {
    init();

    let (mut store, types, log) = traced_store();
    let unknown = ArchetypeId(999);
    assert_eq!(store.create_entity(unknown), Err(Error::InvalidArchetype(unknown)));
    assert_eq!(store.create_entities(unknown, 3), Err(Error::InvalidArchetype(unknown)));
    assert_eq!(store.entity_count(), 0);
    assert_eq!(log.count(|event| matches!(event, Event::CreateEntity(_))), 0);

    // no handle was consumed by the failed calls
    let entity = store.create_entity_with(&[types.position]).unwrap();
    assert_eq!(entity, Entity { index: 0, version: 1 });
    assert_eq!(store.entities().count(), 1);
}

#[test]
fn test_chunk_components() {
    init();

    let (mut store, types) = store();
    let archetype = store.create_archetype(&[types.position, types.bounds]).unwrap();
    let entities = store.create_entities(archetype, 2).unwrap();
    assert_eq!(*store.get_chunk_component::<Bounds>(entities[1]).unwrap(), Bounds([0.; 4]));

    store.set_chunk_component(entities[0], Bounds([0., 0., 8., 8.])).unwrap();
    let bounds = store.get_chunk_component::<Bounds>(entities[1]).unwrap();
    assert_eq!(*bounds, Bounds([0., 0., 8., 8.]));

    assert!(matches!(
        store.get_chunk_component::<Team>(entities[0]),
        Err(Error::TypeMismatch { .. })
    ));
}

#[test]
fn test_buffer_components() {
    init();

    let (mut store, types) = store();
    let entity = store.create_entity_with(&[types.position, types.waypoint]).unwrap();
    assert!(store.buffer::<Waypoint>(entity).unwrap().is_empty());
    assert_eq!(store.external_value_count(), 0);

    store.buffer_mut::<Waypoint>(entity).unwrap().push(Waypoint([1., 2.]));
    store.buffer_mut::<Waypoint>(entity).unwrap().push(Waypoint([3., 4.]));
    assert_eq!(store.buffer::<Waypoint>(entity).unwrap(), [
        Waypoint([1., 2.]),
        Waypoint([3., 4.])
    ]);
    assert_eq!(store.external_value_count(), 1);

    // the handle moves with the row
    store.add_component(entity, types.health).unwrap();
    assert_eq!(store.buffer::<Waypoint>(entity).unwrap().len(), 2);

    store.remove_component(entity, types.waypoint).unwrap();
    assert_eq!(store.external_value_count(), 0);

    store.add_component(entity, types.waypoint).unwrap();
    assert!(store.buffer::<Waypoint>(entity).unwrap().is_empty());
    store.buffer_mut::<Waypoint>(entity).unwrap().push(Waypoint([5., 6.]));
    store.destroy_entity(entity).unwrap();
    assert_eq!(store.external_value_count(), 0);
}

#[test]
fn test_managed_components() {
    init();

    let (mut store, types) = store();
    let entity = store.create_entity_with(&[types.name]).unwrap();
    assert_eq!(store.managed::<Name>(entity).unwrap(), None);

    store.set_managed(entity, Name("alpha".to_string())).unwrap();
    assert_eq!(store.managed::<Name>(entity).unwrap(), Some(&Name("alpha".to_string())));

    store.managed_mut::<Name>(entity).unwrap().expect("value was set").0.push_str("-1");
    let name = store.managed::<Name>(entity).unwrap();
    assert_eq!(name.map(|name| name.0.as_str()), Some("alpha-1"));

    store.set_managed(entity, Name("beta".to_string())).unwrap();
    assert_eq!(store.external_value_count(), 1);

    assert!(matches!(store.buffer::<Name>(entity), Err(Error::TypeMismatch { .. })));
    assert!(matches!(store.managed::<Waypoint>(entity), Err(Error::TypeMismatch { .. })));

    store.destroy_entity(entity).unwrap();
    assert_eq!(store.external_value_count(), 0);
}

#[test]
fn test_pending_jobs_block_structural_changes() {
    init();

    let (mut store, types) = store();
    let entity = store.create_entity_with(&[types.position]).unwrap();

    let (handle, completer) = JobHandle::pending();
    store.dependencies_mut().add_dependency(&[], &[types.position], handle);

    let pending = Err(Error::StructuralChangeWithPendingJobs { pending: 1 });
    assert_eq!(store.create_entity_with(&[types.position]).map(|_| ()), pending);
    assert_eq!(store.add_component(entity, types.velocity), pending);
    assert_eq!(store.destroy_entity(entity), pending);
    assert_eq!(store.entity_count(), 1);

    completer.complete();
    store.destroy_entity(entity).unwrap();
    assert_eq!(store.entity_count(), 0);
}

#[test]
#[should_panic(expected = "Entity table exhausted")]
fn test_max_entities() {
    init();

    let (registry, types) = registry();
    let mut store = crate::store::builder(registry).max_entities(2).build();
    for _ in 0..3 {
        store.create_entity_with(&[types.position]).unwrap();
    }
}

#[test]
fn test_scenario() {
    init();

    let (mut store, types) = store();
    let a = store.create_archetype(&[types.position]).unwrap();
    let entities = store.create_entities(a, 3).unwrap();
    let (e1, e2, e3) = (entities[0], entities[1], entities[2]);

    store.add_component(e2, types.velocity).unwrap();
    let both = store
        .create_query(EntityQueryDesc::new().with_all([types.position, types.velocity]))
        .unwrap();
    assert_eq!(both.to_entity_array(&mut store).unwrap(), [e2]);

    store.destroy_entity(e1).unwrap();
    let positions = store.create_query(EntityQueryDesc::new().with_all([types.position])).unwrap();
    let found: BTreeSet<_> = positions.to_entity_array(&mut store).unwrap().into_iter().collect();
    assert_eq!(found, BTreeSet::from([e2, e3]));

    store.create_entity_with(&[types.health]).unwrap();
    let singleton = store.create_query(EntityQueryDesc::new().with_all([types.health])).unwrap();
    singleton.set_singleton(&mut store, Health(42)).unwrap();
    assert_eq!(singleton.get_singleton::<Health>(&mut store).unwrap(), Health(42));
}

/// The expected state of one entity in [`test_random_operations`].
struct Model {
    entity: Entity,
    health: u32,
    extras: BTreeSet<TypeIndex>,
    team:   u32,
}

#[test]
fn test_random_operations() {
    init();

    let (mut store, types) = store();
    let extras = [types.position, types.velocity, types.frozen, types.team, types.waypoint];
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut models: Vec<Model> = Vec::new();
    let mut next_health = 0;

    for _ in 0..2000 {
        match rng.gen_range(0..10) {
            0..=3 => {
                let entity = store.create_entity_with(&[types.health]).unwrap();
                store.set_component(entity, Health(next_health)).unwrap();
                let extras = BTreeSet::new();
                models.push(Model { entity, health: next_health, extras, team: 0 });
                next_health += 1;
            }
            4 | 5 if !models.is_empty() => {
                let index = rng.gen_range(0..models.len());
                let model = models.swap_remove(index);
                store.destroy_entity(model.entity).unwrap();
                assert!(!store.exists(model.entity));
            }
            6 | 7 if !models.is_empty() => {
                let model = models.choose_mut(&mut rng).expect("not empty");
                let ty = *extras.choose(&mut rng).expect("not empty");
                if model.extras.insert(ty) {
                    store.add_component(model.entity, ty).unwrap();
                } else {
                    store.remove_component(model.entity, ty).unwrap();
                    if ty == types.team {
                        model.team = 0;
                    }
                }
            }
            8 | 9 if !models.is_empty() => {
                let model = models.choose_mut(&mut rng).expect("not empty");
                if model.extras.contains(&types.team) {
                    model.team = rng.gen_range(0..3);
                    store.set_shared_component(model.entity, Team(model.team)).unwrap();
                }
            }
            _ => {}
        }

        store.check_integrity();
    }

    assert_eq!(store.entity_count(), models.len());
    for model in &models {
        assert_eq!(*store.get_component::<Health>(model.entity).unwrap(), Health(model.health));
        for &ty in &extras {
            let expected = model.extras.contains(&ty);
            assert_eq!(store.has_component(model.entity, ty).unwrap(), expected);
        }
        if model.extras.contains(&types.team) {
            assert_eq!(store.get_shared_component::<Team>(model.entity).unwrap(), Team(model.team));
        }
    }
}
