//! Tests chunk layout and row operations.

use std::sync::Arc;

use super::{did_change, ChunkLayout, Pool, CHUNK_HEADER_SIZE, CHUNK_SIZE, ENTITY_SIZE};
use crate::archetype::ArchetypeId;
use crate::comp::{Category, TypeIndex, TypeRegistry, TypeShape};
use crate::entity::Entity;
use crate::test_util::*;
use crate::Error;

fn layout(registry: &TypeRegistry, types: &[TypeIndex]) -> Arc<ChunkLayout> {
    let mut types = types.to_vec();
    types.sort_unstable();
    let descriptors: Vec<_> = types
        .iter()
        .map(|&ty| *registry.descriptor(ty).expect("registered"))
        .collect();
    Arc::new(ChunkLayout::compute(&descriptors).expect("layout fits"))
}

fn entity(index: u32) -> Entity { Entity { index, version: 1 } }

#[test]
fn test_layout_capacity() {
    init();

    let (registry, types) = registry();

    let position = layout(&registry, &[types.position]);
    let usable = CHUNK_SIZE - CHUNK_HEADER_SIZE;
    assert_eq!(position.capacity() as usize, usable / (ENTITY_SIZE + 8));

    // tags, shared and chunk components do not add per-entity bytes
    let wide = layout(&registry, &[types.position, types.frozen, types.team]);
    assert_eq!(wide.capacity(), position.capacity());
    assert_eq!(wide.shared_types(), [types.team]);

    let with_chunk = layout(&registry, &[types.position, types.bounds]);
    assert!(with_chunk.capacity() < position.capacity());
}

#[test]
fn test_layout_alignment() {
    init();

    let mut builder = crate::comp::registry::Builder::new();
    let small = builder
        .register_shape("small", TypeShape {
            size:     2,
            align:    2,
            category: Category::Regular,
            managed:  false,
        })
        .expect("register");
    let wide = builder
        .register_shape("wide", TypeShape {
            size:     64,
            align:    64,
            category: Category::Regular,
            managed:  false,
        })
        .expect("register");
    let registry = builder.build();

    let layout = layout(&registry, &[small, wide]);
    let (small_offset, small_stride) = layout.column_offset(small).expect("has column");
    let (wide_offset, wide_stride) = layout.column_offset(wide).expect("has column");
    assert_eq!((small_stride, wide_stride), (2, 64));
    assert_eq!(wide_offset % 64, 0);
    assert!(small_offset >= CHUNK_HEADER_SIZE + ENTITY_SIZE * layout.capacity() as usize);

    let capacity = layout.capacity() as usize;
    assert!(wide_offset + wide_stride * capacity <= CHUNK_SIZE);
    assert!(small_offset + small_stride * capacity <= wide_offset);
}

#[test]
fn test_allocate_and_swap_remove() {
    init();

    let (registry, types) = registry();
    let layout = layout(&registry, &[types.position, types.health]);

    let mut pool = Pool::default();
    let id = pool.allocate(ArchetypeId(0), layout, Box::default(), 1);
    let chunk = pool.get_mut(id);

    for index in 0..4 {
        let row = chunk.allocate_row(entity(index)).expect("has space");
        assert_eq!(row, index);
        chunk.components_mut::<Health>(types.health, 1).expect("column")[row as usize] =
            Health(index * 10);
    }
    assert_eq!(chunk.len(), 4);

    // new rows start zeroed
    let positions = chunk.components::<Position>(types.position).expect("column");
    assert_eq!(positions[3], Position([0.; 2]));

    assert_eq!(chunk.swap_remove_row(1), Some(entity(3)));
    assert_eq!(chunk.entities(), [entity(0), entity(3), entity(2)]);
    assert_eq!(chunk.components::<Health>(types.health).expect("column"), [
        Health(0),
        Health(30),
        Health(20)
    ]);

    assert_eq!(chunk.swap_remove_row(2), None);
    assert_eq!(chunk.entities(), [entity(0), entity(3)]);
}

#[test]
fn test_chunk_full() {
    init();

    let mut builder = crate::comp::registry::Builder::new();
    let big = builder
        .register_shape("big", TypeShape {
            size:     8000,
            align:    4,
            category: Category::Regular,
            managed:  false,
        })
        .expect("register");
    let registry = builder.build();

    let mut pool = Pool::default();
    let id = pool.allocate(ArchetypeId(0), layout(&registry, &[big]), Box::default(), 1);
    let chunk = pool.get_mut(id);
    assert_eq!(chunk.capacity(), 2);

    chunk.allocate_row(entity(0)).expect("has space");
    chunk.allocate_row(entity(1)).expect("has space");
    assert!(chunk.is_full());
    assert_eq!(chunk.allocate_row(entity(2)), Err(Error::ChunkFull { capacity: 2 }));
}

#[test]
fn test_change_versions() {
    init();

    let (registry, types) = registry();
    let layout = layout(&registry, &[types.position, types.velocity]);

    let mut pool = Pool::default();
    let id = pool.allocate(ArchetypeId(0), layout, Box::default(), 3);
    let chunk = pool.get_mut(id);
    chunk.allocate_row(entity(0)).expect("has space");

    assert_eq!(chunk.change_version(types.position), Ok(3));
    assert_eq!(chunk.did_change(types.position, 3), Ok(false));

    chunk.components_mut::<Position>(types.position, 5).expect("column");
    assert_eq!(chunk.change_version(types.position), Ok(5));
    assert_eq!(chunk.change_version(types.velocity), Ok(3));
    assert_eq!(chunk.did_change(types.position, 3), Ok(true));
    assert_eq!(chunk.did_change(types.velocity, 3), Ok(false));

    // reading never stamps
    chunk.components::<Velocity>(types.velocity).expect("column");
    assert_eq!(chunk.change_version(types.velocity), Ok(3));

    assert_eq!(chunk.change_version(types.health), Err(Error::TypeNotInArchetype(types.health)));
}

#[test]
fn test_did_change_wraps() {
    assert!(did_change(5, 0));
    assert!(did_change(0, 0));
    assert!(!did_change(5, 5));
    assert!(did_change(6, 5));
    assert!(!did_change(4, 5));
    assert!(did_change(1, u32::MAX));
    assert!(!did_change(u32::MAX, 1));
}

#[test]
fn test_typed_access_errors() {
    init();

    let (registry, types) = registry();
    let layout = layout(&registry, &[types.position, types.team, types.bounds, types.frozen]);

    let mut pool = Pool::default();
    let id = pool.allocate(ArchetypeId(0), layout, Box::new([7u32]), 1);
    let chunk = pool.get_mut(id);
    chunk.allocate_row(entity(0)).expect("has space");

    assert!(matches!(
        chunk.components::<Health>(types.position),
        Err(Error::TypeMismatch { index, .. }) if index == types.position
    ));
    assert!(matches!(chunk.column(types.team), Err(Error::TypeMismatch { .. })));
    assert!(matches!(chunk.chunk_value(types.position), Err(Error::TypeMismatch { .. })));
    assert!(matches!(chunk.shared_value(types.bounds), Err(Error::TypeMismatch { .. })));
    assert_eq!(chunk.column(types.health).err(), Some(Error::TypeNotInArchetype(types.health)));

    assert_eq!(chunk.shared_value(types.team), Ok(7));
    assert_eq!(chunk.column(types.frozen).expect("tag").bytes().len(), 0);

    // chunk values start zeroed
    assert!(chunk.chunk_value(types.bounds).expect("chunk value").iter().all(|&byte| byte == 0));
    chunk.chunk_value_mut(types.bounds, 4).expect("chunk value")[0] = 1;
    assert_eq!(chunk.change_version(types.bounds), Ok(4));
}

#[test]
fn test_pool_reuses_ids() {
    init();

    let (registry, types) = registry();
    let layout = layout(&registry, &[types.position]);

    let mut pool = Pool::default();
    let first = pool.allocate(ArchetypeId(0), Arc::clone(&layout), Box::default(), 1);
    let second = pool.allocate(ArchetypeId(0), Arc::clone(&layout), Box::default(), 1);
    assert_eq!(pool.len(), 2);

    pool.free(first);
    assert_eq!(pool.len(), 1);
    assert!(pool.try_get(first).is_none());

    let third = pool.allocate(ArchetypeId(1), layout, Box::default(), 1);
    assert_eq!(third, first);
    assert_eq!(pool.get(third).archetype(), ArchetypeId(1));
    assert!(pool.get(third).is_empty());

    let chunks = pool.many_mut(&[third, second]);
    assert_eq!(chunks.len(), 2);
}
