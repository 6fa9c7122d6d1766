//! An archetype-based entity component store.
//!
//! # Storage model
//! Every entity has a set of component types, its *archetype*.
//! All entities of one archetype are stored together in fixed-size [chunks](chunk),
//! one column per component type,
//! so that iterating over a component touches contiguous memory.
//! Adding or removing a component moves the entity's row to the chunk of another archetype.
//!
//! Component types are registered up front in a [`TypeRegistry`](comp::TypeRegistry),
//! which assigns each type a dense [`TypeIndex`](comp::TypeIndex).
//! Besides plain per-entity values, a type can be a *tag* (no data),
//! a *buffer* (a growable list per entity),
//! a *shared* value (entities with equal values are grouped into the same chunks),
//! a *chunk* value (one value per chunk),
//! or a *managed* value (an arbitrary Rust object held outside the chunk).
//!
//! # Queries
//! An [`EntityQuery`] selects the archetypes containing all of some types,
//! any of some others and none of a third set.
//! Queries are matched incrementally as archetypes are created,
//! and cache their chunk lists until the next structural change.
//! Chunks carry change versions per component type,
//! so a query can skip chunks that were not written since a given version.
//!
//! # Jobs
//! The store itself is not synchronized.
//! Work that runs on other threads declares the component types it reads and writes
//! to the [`DependencyManager`](dependency::DependencyManager),
//! which orders conflicting jobs and rejects structural changes while jobs are pending.
//!
//! # Example
//! ```
//! use archstore::comp::{self, Component};
//! use archstore::query::EntityQueryDesc;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable, Component)]
//! #[repr(C)]
//! struct Position([f32; 2]);
//!
//! #[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable, Component)]
//! #[repr(C)]
//! struct Velocity([f32; 2]);
//!
//! let mut registry = comp::registry::Builder::new();
//! let position = registry.register::<Position>().unwrap();
//! let velocity = registry.register::<Velocity>().unwrap();
//! let mut store = archstore::store::builder(registry.build()).build();
//!
//! let entity = store.create_entity_with(&[position, velocity]).unwrap();
//! store.set_component(entity, Velocity([1.0, 2.0])).unwrap();
//!
//! let query = store.create_query(EntityQueryDesc::new().with_all([position, velocity])).unwrap();
//! query.for_each_chunk_mut(&mut store, |mut chunk| {
//!     let velocities: Vec<Velocity> = chunk.components::<Velocity>(velocity).unwrap().to_vec();
//!     let positions = chunk.components_mut::<Position>(position).unwrap();
//!     for (pos, vel) in positions.iter_mut().zip(velocities) {
//!         pos.0[0] += vel.0[0];
//!         pos.0[1] += vel.0[1];
//!     }
//! })
//! .unwrap();
//!
//! assert_eq!(*store.get_component::<Position>(entity).unwrap(), Position([1.0, 2.0]));
//! ```

#![cfg_attr(doc, warn(missing_docs))]

/// Re-exports used by generated code.
#[doc(hidden)]
pub mod _reexports {
    pub use static_assertions;
}

pub mod archetype;
pub use archetype::{Archetype, ArchetypeId};

pub mod chunk;
pub use chunk::Chunk;

pub mod comp;
pub use comp::{Component, TypeIndex, TypeRegistry};

pub mod dependency;

pub mod entity;
pub use entity::Entity;

mod error;
pub use error::{Error, Result};

pub mod query;
pub use query::{EntityQuery, EntityQueryDesc};

pub mod store;
pub use store::EntityComponentStore;

pub mod tracer;
pub use tracer::Tracer;

#[cfg(any(test, feature = "internal-bench"))]
#[allow(missing_docs)]
pub mod test_util;
