//! The entity component store owns all archetypes, chunks and entities.
//!
//! Every structural change (creating or destroying an entity,
//! adding or removing a component, changing a shared component value)
//! goes through the store, which moves rows between chunks
//! and keeps the entity table pointing at the right row.
//!
//! Two counters drive incremental consumers:
//! - the *order version* is bumped on every structural change,
//!   and invalidates query chunk caches lazily;
//! - the *global system version* is bumped once per update cycle
//!   and stamped on chunk columns whenever write access is granted.

use std::any::type_name;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytemuck::Pod;
use indexmap::IndexMap;
use xias::Xias;

use crate::archetype::{Archetype, ArchetypeId};
use crate::chunk::{self, Chunk, ChunkId};
use crate::comp::{Category, Component, TypeIndex, TypeRegistry};
use crate::dependency::DependencyManager;
use crate::entity::{self, Entity, Location};
use crate::query::{self, EntityQuery, EntityQueryDesc};
use crate::tracer::Tracer;
use crate::{Error, Result};

mod builder;
pub use builder::{Builder, DEFAULT_MAX_ENTITIES};

mod objects;
use objects::ObjectTable;

mod shared;
use shared::SharedValues;

#[cfg(test)]
mod tests;

/// Creates a store builder for the component types in `registry`.
pub fn builder(registry: Arc<TypeRegistry>) -> Builder { Builder::new(registry) }

/// Distinguishes stores, so that query handles are only used with the store that created them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct StoreId(u64);

impl StoreId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// The authoritative storage of entities and their components.
///
/// The store is not internally synchronized.
/// Structural changes require `&mut self` and are rejected
/// while jobs registered in the [`DependencyManager`] are still pending.
pub struct EntityComponentStore {
    pub(crate) id:                    StoreId,
    pub(crate) registry:              Arc<TypeRegistry>,
    pub(crate) tracer:                Box<dyn Tracer>,
    pub(crate) validation:            bool,
    pub(crate) entities:              entity::Table,
    /// Archetypes keyed by their sorted type list. The map index is the [`ArchetypeId`].
    pub(crate) archetypes:            IndexMap<Box<[TypeIndex]>, Archetype>,
    pub(crate) chunks:                chunk::Pool,
    pub(crate) queries:               query::Manager,
    pub(crate) dependencies:          DependencyManager,
    managed:                          ObjectTable,
    buffers:                          ObjectTable,
    pub(crate) shared:                SharedValues,
    pub(crate) order_version:         u32,
    pub(crate) global_system_version: u32,
    type_order_versions:              Vec<u32>,
}

impl EntityComponentStore {
    fn from_builder(builder: Builder) -> Self {
        let type_count = builder.registry.len();
        Self {
            id: StoreId::next(),
            dependencies: DependencyManager::new(type_count),
            registry: builder.registry,
            tracer: builder.tracer,
            validation: builder.validation,
            entities: entity::Table::new(builder.entity_capacity, builder.max_entities),
            archetypes: IndexMap::new(),
            chunks: chunk::Pool::default(),
            queries: query::Manager::default(),
            managed: ObjectTable::default(),
            buffers: ObjectTable::default(),
            shared: SharedValues::default(),
            order_version: 1,
            global_system_version: 1,
            type_order_versions: vec![0; type_count],
        }
    }

    /// The registry this store was built with.
    pub fn registry(&self) -> &Arc<TypeRegistry> { &self.registry }

    /// Whether eager validation is enabled.
    pub fn validation(&self) -> bool { self.validation }

    // Archetypes and chunks

    /// Returns the archetype with exactly the given types, creating it if necessary.
    ///
    /// The input does not need to be sorted; duplicates are ignored.
    pub fn create_archetype(&mut self, types: &[TypeIndex]) -> Result<ArchetypeId> {
        let mut types = types.to_vec();
        types.sort_unstable();
        types.dedup();
        for &ty in &types {
            self.registry.descriptor(ty)?;
        }

        self.get_or_create_archetype(types.into_boxed_slice())
    }

    fn get_or_create_archetype(&mut self, types: Box<[TypeIndex]>) -> Result<ArchetypeId> {
        if let Some(index) = self.archetypes.get_index_of(&types) {
            return Ok(ArchetypeId::from_usize(index));
        }

        let descriptors = types
            .iter()
            .map(|&ty| self.registry.descriptor(ty).copied())
            .collect::<Result<Vec<_>>>()?;

        let id = ArchetypeId::from_usize(self.archetypes.len());
        let mut archetype = Archetype::new(id, &descriptors)?;
        self.queries.on_archetype_created(&mut archetype);

        log::debug!(
            "Created {id:?} with types {types:?}, {} entities per chunk",
            archetype.chunk_capacity()
        );
        self.tracer.create_archetype(id, &types);

        self.archetypes.insert(types, archetype);
        Ok(id)
    }

    /// Returns an archetype by id.
    pub fn archetype(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get_index(id.get()).map(|(_, archetype)| archetype)
    }

    pub(crate) fn archetype_ref(&self, id: ArchetypeId) -> &Archetype {
        &self.archetypes[id.get()]
    }

    /// Iterates over all archetypes in creation order.
    pub fn archetypes(&self) -> impl Iterator<Item = &Archetype> + '_ { self.archetypes.values() }

    /// Number of archetypes ever created.
    pub fn archetype_count(&self) -> usize { self.archetypes.len() }

    /// Returns a live chunk by id.
    pub fn chunk(&self, id: ChunkId) -> Option<&Chunk> { self.chunks.try_get(id) }

    /// Number of live chunks.
    pub fn chunk_count(&self) -> usize { self.chunks.len() }

    // Entity lifecycle

    /// Creates an entity with zeroed components in an archetype.
    ///
    /// Fails with [`Error::InvalidArchetype`] if no archetype has the id `archetype`.
    ///
    /// # Panics
    /// Panics if the entity table is exhausted.
    pub fn create_entity(&mut self, archetype: ArchetypeId) -> Result<Entity> {
        self.dependencies.check_no_pending_jobs()?;
        self.place_new_entity(archetype)
    }

    /// Creates `count` entities in an archetype.
    pub fn create_entities(&mut self, archetype: ArchetypeId, count: usize) -> Result<Vec<Entity>> {
        self.dependencies.check_no_pending_jobs()?;
        if self.archetype(archetype).is_none() {
            return Err(Error::InvalidArchetype(archetype));
        }
        (0..count).map(|_| self.place_new_entity(archetype)).collect()
    }

    /// Creates an entity with the given component types.
    pub fn create_entity_with(&mut self, types: &[TypeIndex]) -> Result<Entity> {
        self.dependencies.check_no_pending_jobs()?;
        let archetype = self.create_archetype(types)?;
        self.place_new_entity(archetype)
    }

    fn place_new_entity(&mut self, archetype_id: ArchetypeId) -> Result<Entity> {
        let (_, archetype) = self
            .archetypes
            .get_index_mut(archetype_id.get())
            .ok_or(Error::InvalidArchetype(archetype_id))?;
        let entity = self.entities.allocate();

        let shared_values = vec![0; archetype.layout().shared_types().len()];
        let location = archetype.move_entity_in(
            &mut self.chunks,
            entity,
            None,
            &shared_values,
            self.global_system_version,
            &*self.tracer,
        );
        self.entities.set_location(entity, location);

        let version = self.next_order_version();
        self.stamp_order_version(archetype_id, location.chunk, version);

        log::trace!("Created {entity:?} at {location:?}");
        self.tracer.create_entity(entity, archetype_id);
        Ok(entity)
    }

    /// Destroys an entity, releasing its row and any external buffer or managed values.
    pub fn destroy_entity(&mut self, entity: Entity) -> Result<()> {
        self.dependencies.check_no_pending_jobs()?;
        let location = self.entities.location(entity)?;

        let handle_types = self.archetype_ref(location.archetype).handle_types().to_vec();
        for ty in handle_types {
            let handle = self.read_handle(location, ty);
            self.free_handle(ty, handle);
        }

        self.shared.release(self.chunks.get(location.chunk).shared_values());

        let (_, archetype) = self
            .archetypes
            .get_index_mut(location.archetype.get())
            .expect("entity table points at a live archetype");
        let moved =
            archetype.remove_row(&mut self.chunks, location.chunk, location.row, &*self.tracer);
        if let Some(moved) = moved {
            self.entities.set_row(moved, location.row);
        }
        self.entities.free(entity);

        let version = self.next_order_version();
        self.stamp_order_version(location.archetype, location.chunk, version);

        log::trace!("Destroyed {entity:?} at {location:?}");
        self.tracer.destroy_entity(entity, location.archetype);
        Ok(())
    }

    /// Whether the entity handle refers to a live entity.
    pub fn exists(&self, entity: Entity) -> bool { self.entities.exists(entity) }

    /// The current storage location of an entity.
    pub fn location_of(&self, entity: Entity) -> Result<Location> { self.entities.location(entity) }

    /// The archetype of an entity.
    pub fn archetype_of(&self, entity: Entity) -> Result<ArchetypeId> {
        Ok(self.entities.location(entity)?.archetype)
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize { self.entities.len() }

    /// Iterates over all live entities.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entities.iter().map(|(entity, _)| entity)
    }

    /// Whether the entity has a component type.
    pub fn has_component(&self, entity: Entity, ty: TypeIndex) -> Result<bool> {
        let location = self.entities.location(entity)?;
        Ok(self.archetype_ref(location.archetype).contains(ty))
    }

    /// Adds a zero-initialized component to an entity, moving it to another archetype.
    pub fn add_component(&mut self, entity: Entity, ty: TypeIndex) -> Result<()> {
        self.dependencies.check_no_pending_jobs()?;
        let location = self.entities.location(entity)?;
        self.registry.descriptor(ty)?;

        let source = self.archetype_ref(location.archetype);
        let position = match source.types().binary_search(&ty) {
            Ok(_) => return Err(Error::ComponentAlreadyPresent { entity, index: ty }),
            Err(position) => position,
        };
        let mut types = source.types().to_vec();
        types.insert(position, ty);

        let target = self.get_or_create_archetype(types.into_boxed_slice())?;
        let shared_values = self.transfer_shared_values(location.chunk, target);
        self.move_entity(entity, location, target, &shared_values);
        Ok(())
    }

    /// Adds a component to an entity and initializes it with `value`.
    pub fn add_component_data<T: Component + Pod>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> Result<()> {
        let ty = self.value_type::<T>(Category::Regular)?;
        self.add_component(entity, ty)?;
        self.set_component(entity, value)
    }

    /// Removes a component from an entity, moving it to another archetype.
    ///
    /// Buffer and managed values owned by the component are released.
    pub fn remove_component(&mut self, entity: Entity, ty: TypeIndex) -> Result<()> {
        self.dependencies.check_no_pending_jobs()?;
        let location = self.entities.location(entity)?;

        let source = self.archetype_ref(location.archetype);
        let Ok(position) = source.types().binary_search(&ty) else {
            return Err(Error::ComponentNotPresent { entity, index: ty });
        };
        let mut types = source.types().to_vec();
        types.remove(position);

        let target = self.get_or_create_archetype(types.into_boxed_slice())?;

        if self.registry.descriptor(ty)?.is_handle() {
            let handle = self.read_handle(location, ty);
            self.free_handle(ty, handle);
        }

        let shared_values = self.transfer_shared_values(location.chunk, target);
        self.move_entity(entity, location, target, &shared_values);
        Ok(())
    }

    /// Maps the shared values of a source chunk onto the shared types of a target archetype.
    /// Shared types new to the entity take the default value.
    fn transfer_shared_values(&self, source: ChunkId, target: ArchetypeId) -> Vec<u32> {
        let source = self.chunks.get(source);
        let source_types = source.layout().shared_types();

        self.archetype_ref(target)
            .layout()
            .shared_types()
            .iter()
            .map(|ty| match source_types.binary_search(ty) {
                Ok(position) => source.shared_values()[position],
                Err(_) => 0,
            })
            .collect()
    }

    /// Moves an entity into a chunk of `target` with the given shared values.
    fn move_entity(
        &mut self,
        entity: Entity,
        location: Location,
        target: ArchetypeId,
        shared_values: &[u32],
    ) -> Location {
        let (_, archetype) =
            self.archetypes.get_index_mut(target.get()).expect("target archetype was just created");
        let new_location = archetype.move_entity_in(
            &mut self.chunks,
            entity,
            Some((location.chunk, location.row)),
            shared_values,
            self.global_system_version,
            &*self.tracer,
        );
        self.shared.retain(shared_values);
        self.shared.release(self.chunks.get(location.chunk).shared_values());

        let (_, source) = self
            .archetypes
            .get_index_mut(location.archetype.get())
            .expect("entity table points at a live archetype");
        let moved =
            source.remove_row(&mut self.chunks, location.chunk, location.row, &*self.tracer);
        if let Some(moved) = moved {
            self.entities.set_row(moved, location.row);
        }
        self.entities.set_location(entity, new_location);

        let version = self.next_order_version();
        self.stamp_order_version(location.archetype, location.chunk, version);
        self.stamp_order_version(target, new_location.chunk, version);

        log::trace!("Moved {entity:?} from {location:?} to {new_location:?}");
        self.tracer.move_entity(entity, location.archetype, target);
        new_location
    }

    fn next_order_version(&mut self) -> u32 {
        self.order_version = self.order_version.wrapping_add(1);
        self.order_version
    }

    /// Records a structural change of `archetype` and, if it is still live, `chunk`.
    fn stamp_order_version(&mut self, archetype: ArchetypeId, chunk: ChunkId, version: u32) {
        for &ty in self.archetypes[archetype.get()].types() {
            self.type_order_versions[ty.get()] = version;
        }
        let live = self.chunks.try_get(chunk).map_or(false, |chunk| chunk.archetype() == archetype);
        if live {
            self.chunks.get_mut(chunk).set_order_version(version);
        }
    }

    // Versions

    /// The current order version, bumped on every structural change.
    pub fn order_version(&self) -> u32 { self.order_version }

    /// The order version of the last structural change to an archetype containing `ty`.
    pub fn component_type_order_version(&self, ty: TypeIndex) -> u32 {
        self.type_order_versions.get(ty.get()).copied().unwrap_or(0)
    }

    /// The current global system version, stamped on columns when write access is granted.
    pub fn global_system_version(&self) -> u32 { self.global_system_version }

    /// Starts a new update cycle and returns the new global system version.
    ///
    /// Version 0 is skipped because it means "any version" in change filters.
    pub fn increment_global_system_version(&mut self) -> u32 {
        self.global_system_version = match self.global_system_version.wrapping_add(1) {
            0 => 1,
            version => version,
        };
        self.global_system_version
    }

    // Component data

    /// Resolves a typed value component and checks its category.
    pub(crate) fn value_type<T: Component + Pod>(&self, category: Category) -> Result<TypeIndex> {
        let ty = self.registry.index_of::<T>()?;
        let desc = self.registry.descriptor(ty)?;
        if desc.category != category || desc.managed {
            return Err(Error::TypeMismatch { index: ty, requested: type_name::<T>() });
        }
        Ok(ty)
    }

    fn handle_type<T: Component>(&self, category: Category, managed: bool) -> Result<TypeIndex> {
        let ty = self.registry.index_of::<T>()?;
        let desc = self.registry.descriptor(ty)?;
        if desc.category != category || desc.managed != managed {
            return Err(Error::TypeMismatch { index: ty, requested: type_name::<T>() });
        }
        Ok(ty)
    }

    /// Resolves an entity that must have `ty`.
    fn locate_with(&self, entity: Entity, ty: TypeIndex) -> Result<Location> {
        let location = self.entities.location(entity)?;
        if !self.archetype_ref(location.archetype).contains(ty) {
            return Err(Error::ComponentNotPresent { entity, index: ty });
        }
        Ok(location)
    }

    /// Reads a regular component of an entity.
    pub fn get_component<T: Component + Pod>(&self, entity: Entity) -> Result<&T> {
        let ty = self.value_type::<T>(Category::Regular)?;
        let location = self.locate_with(entity, ty)?;
        self.dependencies.complete_read_dependency(ty);

        let column = self.chunks.get(location.chunk).components::<T>(ty)?;
        Ok(&column[location.row.small_int::<usize>()])
    }

    /// Borrows a regular component of an entity mutably,
    /// marking its column as changed.
    pub fn get_component_mut<T: Component + Pod>(&mut self, entity: Entity) -> Result<&mut T> {
        let ty = self.value_type::<T>(Category::Regular)?;
        let location = self.locate_with(entity, ty)?;
        self.dependencies.complete_write_dependency(ty);

        let version = self.global_system_version;
        let column = self.chunks.get_mut(location.chunk).components_mut::<T>(ty, version)?;
        Ok(&mut column[location.row.small_int::<usize>()])
    }

    /// Overwrites a regular component of an entity.
    pub fn set_component<T: Component + Pod>(&mut self, entity: Entity, value: T) -> Result<()> {
        *self.get_component_mut::<T>(entity)? = value;
        Ok(())
    }

    /// Reads the raw bytes of a component of an entity.
    pub fn component_bytes(&self, entity: Entity, ty: TypeIndex) -> Result<&[u8]> {
        let location = self.locate_with(entity, ty)?;
        self.dependencies.complete_read_dependency(ty);
        self.chunks.get(location.chunk).row_bytes(ty, location.row)
    }

    /// Overwrites the raw bytes of a component of an entity.
    pub fn set_component_bytes(
        &mut self,
        entity: Entity,
        ty: TypeIndex,
        bytes: &[u8],
    ) -> Result<()> {
        let location = self.locate_with(entity, ty)?;
        if self.registry.descriptor(ty)?.is_handle() {
            return Err(Error::TypeMismatch { index: ty, requested: "raw bytes" });
        }
        self.dependencies.complete_write_dependency(ty);

        let chunk = self.chunks.get_mut(location.chunk);
        let stride = chunk.column(ty)?.stride();
        if stride != bytes.len() {
            return Err(Error::LengthMismatch { expected: stride, actual: bytes.len() });
        }
        let mut column = chunk.column_mut(ty, self.global_system_version)?;
        column.row(location.row.small_int()).copy_from_slice(bytes);
        Ok(())
    }

    // Shared components

    /// Sets the shared component value of an entity.
    ///
    /// Entities with different shared values live in different chunks,
    /// so this is a structural change that moves the entity unless the value is unchanged.
    pub fn set_shared_component<T: Component + Pod>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> Result<()> {
        self.dependencies.check_no_pending_jobs()?;
        let ty = self.value_type::<T>(Category::Shared)?;
        let location = self.locate_with(entity, ty)?;

        let value_index = self.shared.intern(ty, bytemuck::bytes_of(&value));

        let chunk = self.chunks.get(location.chunk);
        let position = chunk
            .layout()
            .shared_types()
            .binary_search(&ty)
            .expect("archetype contains the shared type");
        if chunk.shared_values()[position] == value_index {
            return Ok(());
        }

        let mut shared_values = chunk.shared_values().to_vec();
        shared_values[position] = value_index;
        self.move_entity(entity, location, location.archetype, &shared_values);
        Ok(())
    }

    /// Reads the shared component value of an entity.
    pub fn get_shared_component<T: Component + Pod>(&self, entity: Entity) -> Result<T> {
        let ty = self.value_type::<T>(Category::Shared)?;
        let location = self.locate_with(entity, ty)?;
        let index = self.chunks.get(location.chunk).shared_value(ty)?;
        Ok(self.shared.get(ty, index))
    }

    // Chunk components

    /// Reads the chunk component value of the chunk holding an entity.
    pub fn get_chunk_component<T: Component + Pod>(&self, entity: Entity) -> Result<&T> {
        let ty = self.value_type::<T>(Category::Chunk)?;
        let location = self.locate_with(entity, ty)?;
        self.dependencies.complete_read_dependency(ty);

        let bytes = self.chunks.get(location.chunk).chunk_value(ty)?;
        Ok(bytemuck::from_bytes(bytes))
    }

    /// Overwrites the chunk component value of the chunk holding an entity.
    pub fn set_chunk_component<T: Component + Pod>(
        &mut self,
        entity: Entity,
        value: T,
    ) -> Result<()> {
        let ty = self.value_type::<T>(Category::Chunk)?;
        let location = self.locate_with(entity, ty)?;
        self.dependencies.complete_write_dependency(ty);

        let version = self.global_system_version;
        let bytes = self.chunks.get_mut(location.chunk).chunk_value_mut(ty, version)?;
        bytes.copy_from_slice(bytemuck::bytes_of(&value));
        Ok(())
    }

    // Buffer and managed components

    fn read_handle(&self, location: Location, ty: TypeIndex) -> u32 {
        let bytes = self
            .chunks
            .get(location.chunk)
            .row_bytes(ty, location.row)
            .expect("handle types have a column");
        bytemuck::pod_read_unaligned(bytes)
    }

    fn write_handle(&mut self, location: Location, ty: TypeIndex, handle: u32) {
        let version = self.global_system_version;
        let mut column = self
            .chunks
            .get_mut(location.chunk)
            .column_mut(ty, version)
            .expect("handle types have a column");
        column.row(location.row.small_int()).copy_from_slice(bytemuck::bytes_of(&handle));
    }

    fn free_handle(&mut self, ty: TypeIndex, handle: u32) {
        let desc = self.registry.descriptor(ty).expect("archetype types are registered");
        if desc.managed {
            self.managed.free(handle);
        } else {
            self.buffers.free(handle);
        }
    }

    /// Reads the dynamic buffer of an entity. An untouched buffer is empty.
    pub fn buffer<T: Component>(&self, entity: Entity) -> Result<&[T]> {
        let ty = self.handle_type::<T>(Category::Buffer, false)?;
        let location = self.locate_with(entity, ty)?;
        self.dependencies.complete_read_dependency(ty);

        match self.read_handle(location, ty) {
            0 => Ok(&[]),
            handle => self
                .buffers
                .get(handle)
                .and_then(|object| object.downcast_ref::<Vec<T>>())
                .map(Vec::as_slice)
                .ok_or(Error::TypeMismatch { index: ty, requested: type_name::<T>() }),
        }
    }

    /// Borrows the dynamic buffer of an entity mutably, marking its column as changed.
    pub fn buffer_mut<T: Component>(&mut self, entity: Entity) -> Result<&mut Vec<T>> {
        let ty = self.handle_type::<T>(Category::Buffer, false)?;
        let location = self.locate_with(entity, ty)?;
        self.dependencies.complete_write_dependency(ty);

        let handle = match self.read_handle(location, ty) {
            0 => {
                let handle = self.buffers.insert(Box::new(Vec::<T>::new()));
                self.write_handle(location, ty, handle);
                handle
            }
            handle => {
                let version = self.global_system_version;
                self.chunks.get_mut(location.chunk).mark_changed(ty, version)?;
                handle
            }
        };

        self.buffers
            .get_mut(handle)
            .and_then(|object| object.downcast_mut::<Vec<T>>())
            .ok_or(Error::TypeMismatch { index: ty, requested: type_name::<T>() })
    }

    /// Reads the managed component of an entity, if a value has been set.
    pub fn managed<T: Component>(&self, entity: Entity) -> Result<Option<&T>> {
        let ty = self.handle_type::<T>(Category::Regular, true)?;
        let location = self.locate_with(entity, ty)?;
        self.dependencies.complete_read_dependency(ty);

        match self.read_handle(location, ty) {
            0 => Ok(None),
            handle => self
                .managed
                .get(handle)
                .and_then(|object| object.downcast_ref::<T>())
                .map(Some)
                .ok_or(Error::TypeMismatch { index: ty, requested: type_name::<T>() }),
        }
    }

    /// Borrows the managed component of an entity mutably, marking its column as changed.
    pub fn managed_mut<T: Component>(&mut self, entity: Entity) -> Result<Option<&mut T>> {
        let ty = self.handle_type::<T>(Category::Regular, true)?;
        let location = self.locate_with(entity, ty)?;
        self.dependencies.complete_write_dependency(ty);

        let version = self.global_system_version;
        self.chunks.get_mut(location.chunk).mark_changed(ty, version)?;

        match self.read_handle(location, ty) {
            0 => Ok(None),
            handle => self
                .managed
                .get_mut(handle)
                .and_then(|object| object.downcast_mut::<T>())
                .map(Some)
                .ok_or(Error::TypeMismatch { index: ty, requested: type_name::<T>() }),
        }
    }

    /// Sets the managed component value of an entity.
    pub fn set_managed<T: Component>(&mut self, entity: Entity, value: T) -> Result<()> {
        let ty = self.handle_type::<T>(Category::Regular, true)?;
        let location = self.locate_with(entity, ty)?;
        self.dependencies.complete_write_dependency(ty);

        match self.read_handle(location, ty) {
            0 => {
                let handle = self.managed.insert(Box::new(value));
                self.write_handle(location, ty, handle);
            }
            handle => {
                self.managed.replace(handle, Box::new(value));
                let version = self.global_system_version;
                self.chunks.get_mut(location.chunk).mark_changed(ty, version)?;
            }
        }
        Ok(())
    }

    /// Number of live buffer and managed values.
    pub fn external_value_count(&self) -> usize { self.buffers.len() + self.managed.len() }

    /// Number of distinct non-default shared values held by some entity.
    pub fn shared_value_count(&self) -> usize { self.shared.len() }

    /// The interned index of a shared value, without interning it.
    pub(crate) fn shared_index(&self, ty: TypeIndex, bytes: &[u8]) -> u32 {
        self.shared.lookup(ty, bytes)
    }

    // Queries and dependencies

    /// Creates a query for a descriptor.
    ///
    /// Identical descriptors share their matching archetypes and chunk cache.
    pub fn create_query(&mut self, desc: EntityQueryDesc) -> Result<EntityQuery> {
        self.create_query_union([desc])
    }

    /// Creates a query matching the archetypes that any of `descs` matches.
    ///
    /// Only types required by every descriptor count as required by the query.
    /// Identical descriptor lists, in the same order, share their data.
    pub fn create_query_union(
        &mut self,
        descs: impl IntoIterator<Item = EntityQueryDesc>,
    ) -> Result<EntityQuery> {
        let descs = descs
            .into_iter()
            .map(|desc| desc.validate(&self.registry))
            .collect::<Result<Box<[_]>>>()?;
        if descs.is_empty() {
            let reason = "a query needs at least one descriptor";
            return Err(Error::InvalidQueryDescriptor(reason.into()));
        }

        let id = self.queries.get_or_create(descs, &mut self.archetypes, &*self.tracer);
        Ok(EntityQuery::new(id, self.id))
    }

    /// Rebuilds the chunk cache of a query if a structural change happened since the last rebuild.
    pub(crate) fn refresh_query(&mut self, id: query::QueryId) {
        let order_version = self.order_version;
        self.queries.refresh(id, &self.archetypes, order_version, &*self.tracer);
    }

    /// The job dependency tracker.
    pub fn dependencies(&self) -> &DependencyManager { &self.dependencies }

    /// The job dependency tracker, for registering new jobs.
    pub fn dependencies_mut(&mut self) -> &mut DependencyManager { &mut self.dependencies }

    /// Blocks until every registered job has finished.
    pub fn complete_all_jobs(&mut self) { self.dependencies.complete_all() }

    /// Verifies that every archetype, chunk and entity table entry agree.
    ///
    /// # Panics
    /// Panics if any row is not dense, any entity does not resolve to the row holding it,
    /// or a shared value is not referenced by exactly the rows holding it.
    pub fn check_integrity(&self) {
        let mut total_entities = 0;
        let mut total_chunks = 0;
        let mut shared_refs = IndexMap::<u32, usize>::new();

        for archetype in self.archetypes.values() {
            let mut entities = 0;
            for &chunk_id in archetype.chunks() {
                let chunk = self.chunks.get(chunk_id);
                assert_eq!(chunk.archetype(), archetype.id(), "{chunk_id:?} has the wrong owner");
                assert!(!chunk.is_empty(), "empty {chunk_id:?} was retained");

                for (row, &entity) in chunk.entities().iter().enumerate() {
                    let location = self.entities.location(entity).unwrap_or_else(|_| {
                        panic!("{entity:?} in {chunk_id:?} row {row} is not alive")
                    });
                    let expected = Location {
                        archetype: archetype.id(),
                        chunk:     chunk_id,
                        row:       row.small_int(),
                    };
                    assert_eq!(location, expected, "{entity:?} resolves to the wrong row");
                }

                for &index in chunk.shared_values().iter().filter(|&&index| index != 0) {
                    *shared_refs.entry(index).or_default() += chunk.len().small_int::<usize>();
                }
                entities += chunk.len().small_int::<usize>();
                total_chunks += 1;
            }

            assert_eq!(entities, archetype.entity_count(), "entity count of {:?}", archetype.id());
            total_entities += entities;
        }

        assert_eq!(total_entities, self.entities.len(), "live entity count");
        assert_eq!(total_chunks, self.chunks.len(), "live chunk count");

        for (&index, &refs) in &shared_refs {
            assert_eq!(self.shared.ref_count(index), refs, "references to shared value #{index}");
        }
        assert_eq!(shared_refs.len(), self.shared.len(), "interned shared values");
    }
}

impl std::fmt::Debug for EntityComponentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityComponentStore")
            .field("entities", &self.entities.len())
            .field("archetypes", &self.archetypes.len())
            .field("chunks", &self.chunks)
            .field("order_version", &self.order_version)
            .field("global_system_version", &self.global_system_version)
            .finish()
    }
}

static_assertions::assert_impl_all!(EntityComponentStore: Send, Sync);
