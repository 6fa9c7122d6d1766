//! Queries select the entities whose archetype satisfies an All/Any/None predicate.
//!
//! A query is created from an [`EntityQueryDesc`] through
//! [`EntityComponentStore::create_query`].
//! Identical descriptors share one set of matching archetypes and one chunk cache,
//! which lives in the store.
//! The returned [`EntityQuery`] is a small handle that also carries its own filters.
//! A query can also be the union of several descriptors,
//! matching the archetypes that any of them matches.
//! Handles only work with the store that created them;
//! other stores reject them with [`Error::InvalidQuery`].
//!
//! Matching is incremental:
//! a query is tested against every archetype once, when either of them is created.
//! The chunk cache is rebuilt lazily on the first read after a structural change.
//!
//! ```
//! use archstore::comp::{self, Component};
//! use archstore::query::{ComponentType, EntityQueryDesc};
//!
//! #[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Component)]
//! #[repr(C)]
//! struct Health(u32);
//!
//! let mut registry = comp::registry::Builder::new();
//! let health = registry.register::<Health>().unwrap();
//! let mut store = archstore::store::builder(registry.build()).build();
//!
//! let entity = store.create_entity_with(&[health]).unwrap();
//! store.set_component(entity, Health(10)).unwrap();
//!
//! let query = store
//!     .create_query(EntityQueryDesc::new().with_all([ComponentType::read_only(health)]))
//!     .unwrap();
//! assert_eq!(query.to_entity_array(&mut store).unwrap(), vec![entity]);
//! assert_eq!(query.get_singleton::<Health>(&mut store).unwrap().0, 10);
//! ```


use std::fmt;

use bytemuck::Pod;
use rayon::prelude::*;
use xias::Xias;

use crate::chunk::ChunkId;
use crate::comp::{Category, Component, TypeIndex};
use crate::dependency::{JobHandle, JobScheduler};
use crate::entity::Entity;
use crate::store::{EntityComponentStore, StoreId};
use crate::{Error, Result};

mod array;
pub use array::AsyncArray;

mod desc;
pub use desc::{AccessMode, ComponentType, EntityQueryDesc, QueryOptions};

mod filter;
use filter::ChunkFilter;
pub use filter::EntityQueryFilter;

mod iter;
pub use iter::{ArchetypeChunk, ArchetypeChunkMut};

mod manager;
pub(crate) use manager::{CachedChunk, Manager, QueryData};

mod mask;
pub use mask::EntityQueryMask;


/// Maximum number of changed-version filters per query handle.
pub const MAX_CHANGED_FILTERS: usize = 2;

/// Maximum number of shared-value filters per query handle.
pub const MAX_SHARED_FILTERS: usize = 2;

/// Identifies the shared data of a query descriptor within a store.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueryId(pub(crate) u32);

impl QueryId {
    /// Returns the id as a `usize` for table lookups.
    pub fn get(self) -> usize { self.0.small_int() }
}

impl fmt::Debug for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "query#{}", self.0) }
}

/// A handle to a query in a store, with its own filter.
///
/// All methods take the store that created the query,
/// and fail with [`Error::InvalidQuery`] when given another store.
/// Methods reading the chunk cache take the store mutably
/// because the cache is rebuilt on demand.
#[derive(Debug, Clone)]
pub struct EntityQuery {
    id:     QueryId,
    store:  StoreId,
    filter: EntityQueryFilter,
}

type Store = EntityComponentStore;

impl EntityQuery {
    pub(crate) fn new(id: QueryId, store: StoreId) -> Self {
        Self { id, store, filter: EntityQueryFilter::default() }
    }

    /// The id of the shared query data.
    pub fn id(&self) -> QueryId { self.id }

    /// The filter of this handle.
    pub fn filter(&self) -> &EntityQueryFilter { &self.filter }

    fn data<'s>(&self, store: &'s Store) -> Result<&'s QueryData> {
        if store.id != self.store {
            return Err(Error::InvalidQuery(self.id));
        }
        Ok(store.queries.data(self.id))
    }

    /// Rebuilds the chunk cache if necessary and downgrades the store borrow.
    fn prepare<'s>(&self, store: &'s mut Store) -> &'s Store {
        store.refresh_query(self.id);
        store
    }

    /// Waits for writers of the types whose change versions the filter reads.
    fn complete_filter_dependencies(&self, store: &Store) {
        for ty in self.filter.changed_types() {
            store.dependencies.complete_read_dependency(ty);
        }
    }

    /// Resolves the filter, or returns `None` if it is empty or ignored.
    fn active_filter(&self, store: &Store, use_filter: bool) -> Option<ChunkFilter> {
        if !use_filter || self.filter.is_empty() {
            return None;
        }

        self.complete_filter_dependencies(store);
        Some(self.filter.resolve(store))
    }

    /// Iterates over the cached chunks. The store must already be checked.
    #[auto_enums::auto_enum(Iterator)]
    fn matching_chunks<'s>(
        &self,
        store: &'s mut Store,
        use_filter: bool,
    ) -> impl Iterator<Item = ArchetypeChunk<'s>> + 's {
        let filter = self.active_filter(store, use_filter);

        let store = self.prepare(store);
        let chunks = store
            .queries
            .data(self.id)
            .cached_chunks()
            .iter()
            .map(move |entry| {
                ArchetypeChunk::new(store.chunks.get(entry.chunk), entry.matching_index)
            });

        match filter {
            Some(filter) => chunks.filter(move |chunk| filter.passes(chunk.chunk())),
            None => chunks,
        }
    }

    /// The cache entries of the chunks passing the filter, sorted by chunk id.
    fn filtered_entries(&self, store: &mut Store) -> Vec<CachedChunk> {
        let filter = self.filter.resolve(store);
        let store = self.prepare(store);
        let mut entries: Vec<CachedChunk> = store
            .queries
            .data(self.id)
            .cached_chunks()
            .iter()
            .filter(|entry| filter.passes(store.chunks.get(entry.chunk)))
            .copied()
            .collect();
        entries.sort_unstable_by_key(|entry| entry.chunk);
        entries
    }

    /// Iterates over the matching chunks that pass the filter.
    pub fn chunk_iter<'s>(
        &self,
        store: &'s mut Store,
    ) -> Result<impl Iterator<Item = ArchetypeChunk<'s>> + 's> {
        self.data(store)?;
        Ok(self.matching_chunks(store, true))
    }

    /// Iterates over all matching chunks, ignoring the filter.
    pub fn chunk_iter_without_filtering<'s>(
        &self,
        store: &'s mut Store,
    ) -> Result<impl Iterator<Item = ArchetypeChunk<'s>> + 's> {
        self.data(store)?;
        Ok(self.matching_chunks(store, false))
    }

    // Counting

    /// Number of matching entities in chunks passing the filter.
    ///
    /// Blocks until writers of change-filtered types have completed.
    pub fn calculate_entity_count(&self, store: &mut Store) -> Result<usize> {
        self.data(store)?;
        Ok(self.matching_chunks(store, true).map(|chunk| chunk.count().small_int::<usize>()).sum())
    }

    /// Number of matching entities, ignoring the filter.
    pub fn calculate_entity_count_without_filtering(&self, store: &mut Store) -> Result<usize> {
        self.data(store)?;
        Ok(self.matching_chunks(store, false).map(|chunk| chunk.count().small_int::<usize>()).sum())
    }

    /// Tests each of `entities` against the query, without the chunk cache.
    /// Entities that are not alive never match.
    fn matching_in<'e>(
        &self,
        store: &'e Store,
        entities: &'e [Entity],
        use_filter: bool,
    ) -> Result<impl Iterator<Item = Entity> + 'e> {
        self.data(store)?;
        let id = self.id;
        let filter = self.active_filter(store, use_filter);

        Ok(entities.iter().copied().filter(move |&entity| {
            let Ok(location) = store.location_of(entity) else { return false };
            store.archetype_ref(location.archetype).matches_query(id)
                && filter.map_or(true, |filter| filter.passes(store.chunks.get(location.chunk)))
        }))
    }

    /// Number of `entities` that match the query and whose chunk passes the filter.
    ///
    /// Destroyed entities are not counted.
    pub fn calculate_entity_count_in(&self, store: &Store, entities: &[Entity]) -> Result<usize> {
        Ok(self.matching_in(store, entities, true)?.count())
    }

    /// Number of `entities` that match the query, ignoring the filter.
    pub fn calculate_entity_count_in_without_filtering(
        &self,
        store: &Store,
        entities: &[Entity],
    ) -> Result<usize> {
        Ok(self.matching_in(store, entities, false)?.count())
    }

    /// Whether any of `entities` matches the query and has its chunk pass the filter.
    pub fn matches_any(&self, store: &Store, entities: &[Entity]) -> Result<bool> {
        Ok(self.matching_in(store, entities, true)?.next().is_some())
    }

    /// Whether any of `entities` matches the query, ignoring the filter.
    pub fn matches_any_ignore_filter(&self, store: &Store, entities: &[Entity]) -> Result<bool> {
        Ok(self.matching_in(store, entities, false)?.next().is_some())
    }

    /// Number of matching chunks passing the filter.
    pub fn calculate_chunk_count(&self, store: &mut Store) -> Result<usize> {
        self.data(store)?;
        Ok(self.matching_chunks(store, true).count())
    }

    /// Number of matching chunks, ignoring the filter.
    pub fn calculate_chunk_count_without_filtering(&self, store: &mut Store) -> Result<usize> {
        self.data(store)?;
        Ok(self.matching_chunks(store, false).count())
    }

    /// Whether no entity matches, taking the filter into account.
    pub fn is_empty(&self, store: &mut Store) -> Result<bool> {
        self.data(store)?;
        Ok(self.matching_chunks(store, true).next().is_none())
    }

    /// Whether no entity matches, ignoring the filter.
    pub fn is_empty_ignore_filter(&self, store: &mut Store) -> Result<bool> {
        self.data(store)?;
        Ok(self.matching_chunks(store, false).next().is_none())
    }

    // Bulk data access

    /// Collects the matching entities.
    pub fn to_entity_array(&self, store: &mut Store) -> Result<Vec<Entity>> {
        self.data(store)?;
        Ok(self
            .matching_chunks(store, true)
            .flat_map(|chunk| chunk.entities().iter().copied())
            .collect())
    }

    /// Collects the matching entities on a job scheduled on `scheduler`.
    ///
    /// The entity columns are copied before this returns;
    /// the job assembles them into one array.
    pub fn to_entity_array_async(
        &self,
        store: &mut Store,
        scheduler: &dyn JobScheduler,
    ) -> Result<AsyncArray<Entity>> {
        self.data(store)?;
        let blocks: Vec<Box<[Entity]>> =
            self.matching_chunks(store, true).map(|chunk| chunk.entities().into()).collect();
        Ok(AsyncArray::schedule(&mut store.dependencies, scheduler, &[], blocks))
    }

    /// Resolves `T` and checks that the query requires it in every matching archetype.
    fn required_type<T: Component + Pod>(&self, store: &Store) -> Result<TypeIndex> {
        let data = self.data(store)?;
        let ty = store.value_type::<T>(Category::Regular)?;
        if data.required.binary_search(&ty).is_err() {
            return Err(Error::TypeNotInQuery(ty));
        }
        Ok(ty)
    }

    /// Copies the `T` column of every matching chunk passing the filter.
    fn component_blocks<T: Component + Pod>(
        &self,
        store: &mut Store,
        ty: TypeIndex,
    ) -> Result<Vec<Box<[T]>>> {
        store.dependencies.complete_read_dependency(ty);

        let mut blocks = Vec::new();
        for chunk in self.matching_chunks(store, true) {
            blocks.push(chunk.components::<T>(ty)?.into());
        }
        Ok(blocks)
    }

    /// Collects the values of `T` of the matching entities,
    /// in the order of [`to_entity_array`](Self::to_entity_array).
    pub fn to_component_data_array<T: Component + Pod>(&self, store: &mut Store) -> Result<Vec<T>> {
        let ty = self.required_type::<T>(store)?;
        store.dependencies.complete_read_dependency(ty);

        let mut output = Vec::new();
        for chunk in self.matching_chunks(store, true) {
            output.extend_from_slice(chunk.components::<T>(ty)?);
        }
        Ok(output)
    }

    /// Collects the values of `T` of the matching entities on a job scheduled on `scheduler`,
    /// in the order of [`to_entity_array`](Self::to_entity_array).
    ///
    /// The columns are copied before this returns, after outstanding writers of `T` finish;
    /// the job assembles them into one array and is registered as a reader of `T`,
    /// so structural changes are rejected until it completes.
    pub fn to_component_data_array_async<T: Component + Pod>(
        &self,
        store: &mut Store,
        scheduler: &dyn JobScheduler,
    ) -> Result<AsyncArray<T>> {
        let ty = self.required_type::<T>(store)?;
        let blocks = self.component_blocks::<T>(store, ty)?;
        Ok(AsyncArray::schedule(&mut store.dependencies, scheduler, &[ty], blocks))
    }

    /// Overwrites the values of `T` of the matching entities,
    /// in the order of [`to_entity_array`](Self::to_entity_array).
    ///
    /// Every written chunk is marked as changed.
    pub fn copy_from_component_data_array<T: Component + Pod>(
        &self,
        store: &mut Store,
        values: &[T],
    ) -> Result<()> {
        let ty = self.required_type::<T>(store)?;
        store.dependencies.complete_write_dependency(ty);

        let order: Vec<ChunkId> =
            self.matching_chunks(store, true).map(|chunk| chunk.chunk().id()).collect();
        let expected: usize =
            order.iter().map(|&id| store.chunks.get(id).len().small_int::<usize>()).sum();
        if expected != values.len() {
            return Err(Error::LengthMismatch { expected, actual: values.len() });
        }

        let version = store.global_system_version;
        let mut remaining = values;
        for id in order {
            let column = store.chunks.get_mut(id).components_mut::<T>(ty, version)?;
            let (head, tail) = remaining.split_at(column.len());
            column.copy_from_slice(head);
            remaining = tail;
        }
        Ok(())
    }

    // Singletons

    /// Locates the chunk holding the only matching entity. The entity is always at row 0.
    ///
    /// Queries without filters and with exactly one required type and no other types
    /// take a fast path that only counts entities when validation is enabled.
    fn singleton_chunk(&self, store: &mut Store) -> Result<ChunkId> {
        let fast = self.filter.is_empty() && self.data(store)?.is_single_type();

        if fast && !store.validation {
            let store = self.prepare(store);
            return match store.queries.data(self.id).cached_chunks().first() {
                Some(entry) => Ok(entry.chunk),
                None => Err(Error::ExpectedExactlyOneMatch { count: 0 }),
            };
        }

        let mut chunks = self.matching_chunks(store, true);
        let first = chunks.next().ok_or(Error::ExpectedExactlyOneMatch { count: 0 })?;
        let count = first.count().small_int::<usize>()
            + chunks.map(|chunk| chunk.count().small_int::<usize>()).sum::<usize>();
        if count != 1 {
            return Err(Error::ExpectedExactlyOneMatch { count });
        }
        Ok(first.chunk().id())
    }

    /// The only entity matching the query.
    pub fn get_singleton_entity(&self, store: &mut Store) -> Result<Entity> {
        let chunk = self.singleton_chunk(store)?;
        Ok(store.chunks.get(chunk).entities()[0])
    }

    /// Reads `T` of the only entity matching the query.
    pub fn get_singleton<T: Component + Pod>(&self, store: &mut Store) -> Result<T> {
        let ty = self.required_type::<T>(store)?;
        store.dependencies.complete_read_dependency(ty);

        let chunk = self.singleton_chunk(store)?;
        Ok(store.chunks.get(chunk).components::<T>(ty)?[0])
    }

    /// Overwrites `T` of the only entity matching the query.
    pub fn set_singleton<T: Component + Pod>(&self, store: &mut Store, value: T) -> Result<()> {
        let ty = self.required_type::<T>(store)?;
        store.dependencies.complete_write_dependency(ty);

        let chunk = self.singleton_chunk(store)?;
        let version = store.global_system_version;
        store.chunks.get_mut(chunk).components_mut::<T>(ty, version)?[0] = value;
        Ok(())
    }

    // Filters

    fn check_filtered_type(&self, store: &Store, ty: TypeIndex) -> Result<()> {
        match self.data(store)?.required.binary_search(&ty) {
            Ok(_) => Ok(()),
            Err(_) => Err(Error::TypeNotInQuery(ty)),
        }
    }

    /// Replaces the changed-version filter with `types`.
    pub fn set_changed_version_filter(&mut self, store: &Store, types: &[TypeIndex]) -> Result<()> {
        if types.len() > MAX_CHANGED_FILTERS {
            return Err(Error::FilterCapacityExceeded { kind: "changed", max: MAX_CHANGED_FILTERS });
        }
        for &ty in types {
            self.check_filtered_type(store, ty)?;
        }

        self.filter.clear_changed();
        for &ty in types {
            self.filter.add_changed(ty)?;
        }
        Ok(())
    }

    /// Only passes chunks in which `ty` changed after the required version.
    ///
    /// With several changed types, a chunk passes if any of them changed.
    pub fn add_changed_version_filter(&mut self, store: &Store, ty: TypeIndex) -> Result<()> {
        self.check_filtered_type(store, ty)?;
        self.filter.add_changed(ty)
    }

    /// Sets the version that changed types and order versions are compared against.
    ///
    /// Systems usually pass the global system version of their previous run.
    pub fn set_changed_filter_required_version(&mut self, version: u32) {
        self.filter.set_required_version(version);
    }

    /// Only passes chunks whose shared `T` value equals `value`.
    ///
    /// A value that no entity holds matches no chunk until some entity is given it.
    pub fn add_shared_component_filter<T: Component + Pod>(
        &mut self,
        store: &Store,
        value: T,
    ) -> Result<()> {
        let ty = store.value_type::<T>(Category::Shared)?;
        self.check_filtered_type(store, ty)?;
        self.filter.add_shared(ty, bytemuck::bytes_of(&value))
    }

    /// Removes all filters, then only passes chunks whose shared `T` value equals `value`.
    pub fn set_shared_component_filter<T: Component + Pod>(
        &mut self,
        store: &Store,
        value: T,
    ) -> Result<()> {
        let ty = store.value_type::<T>(Category::Shared)?;
        self.check_filtered_type(store, ty)?;
        self.filter.reset();
        self.filter.add_shared(ty, bytemuck::bytes_of(&value))
    }

    /// Only passes chunks structurally changed after the required version.
    pub fn add_order_version_filter(&mut self) { self.filter.set_order(); }

    /// Removes all filters, then only passes chunks structurally changed
    /// after the required version.
    pub fn set_order_version_filter(&mut self) {
        self.filter.reset();
        self.filter.set_order();
    }

    /// Removes all filters, keeping the required version.
    pub fn reset_filter(&mut self) { self.filter.reset(); }

    /// Whether any filter is set.
    pub fn has_filter(&self) -> bool { !self.filter.is_empty() }

    // Matching

    /// Whether `entity` matches the query and its chunk passes the filter.
    pub fn matches(&self, store: &Store, entity: Entity) -> Result<bool> {
        self.data(store)?;
        let location = store.location_of(entity)?;
        if !store.archetype_ref(location.archetype).matches_query(self.id) {
            return Ok(false);
        }

        Ok(self
            .active_filter(store, true)
            .map_or(true, |filter| filter.passes(store.chunks.get(location.chunk))))
    }

    /// Whether `entity` matches the query, ignoring the filter.
    pub fn matches_no_filter(&self, store: &Store, entity: Entity) -> Result<bool> {
        self.data(store)?;
        let location = store.location_of(entity)?;
        Ok(store.archetype_ref(location.archetype).matches_query(self.id))
    }

    /// Returns a mask for fast membership tests of single entities.
    pub fn entity_query_mask(&self) -> EntityQueryMask { EntityQueryMask::new(self.id, self.store) }

    /// Whether the query was created from a single descriptor requiring exactly `types`.
    pub fn compare_components(&self, store: &Store, types: &[ComponentType]) -> Result<bool> {
        self.compare_query(store, &EntityQueryDesc::new().with_all(types.iter().copied()))
    }

    /// Whether the query was created from a single descriptor equal to `desc`.
    pub fn compare_query(&self, store: &Store, desc: &EntityQueryDesc) -> Result<bool> {
        self.compare_query_union(store, std::slice::from_ref(desc))
    }

    /// Whether the query was created from descriptors equal to `descs`, in the same order.
    pub fn compare_query_union(&self, store: &Store, descs: &[EntityQueryDesc]) -> Result<bool> {
        self.data(store)?;
        let own = store.queries.descs(self.id);
        Ok(own.len() == descs.len()
            && own.iter().zip(descs).all(|(own, desc)| *own == desc.clone().normalized()))
    }

    // Dependencies

    /// Component types the query reads but does not write.
    pub fn reader_types<'s>(&self, store: &'s Store) -> Result<&'s [TypeIndex]> {
        Ok(&self.data(store)?.reads)
    }

    /// Component types the query writes.
    pub fn writer_types<'s>(&self, store: &'s Store) -> Result<&'s [TypeIndex]> {
        Ok(&self.data(store)?.writes)
    }

    /// A handle that completes once it is safe to run a job with the access of this query.
    pub fn get_dependency(&self, store: &Store) -> Result<JobHandle> {
        let data = self.data(store)?;
        Ok(store.dependencies.get_dependency(&data.reads, &data.writes))
    }

    /// Registers a job using the access of this query.
    pub fn add_dependency(&self, store: &mut Store, handle: JobHandle) -> Result<()> {
        self.data(store)?;
        let data = store.queries.data(self.id);
        store.dependencies.add_dependency(&data.reads, &data.writes, handle);
        Ok(())
    }

    /// Blocks until it is safe to access the query types on the calling thread.
    pub fn complete_dependency(&self, store: &Store) -> Result<()> {
        let data = self.data(store)?;
        store.tracer.complete_dependency(&data.reads, &data.writes);
        store.dependencies.complete_dependencies(&data.reads, &data.writes);
        Ok(())
    }

    /// Sum of the order versions of the types required by the query.
    ///
    /// Changes whenever an archetype containing any of the required types changes structurally.
    pub fn combined_component_order_version(&self, store: &Store) -> Result<u32> {
        let required = &self.data(store)?.required;
        Ok(required
            .iter()
            .fold(0, |sum, &ty| sum.wrapping_add(store.component_type_order_version(ty))))
    }

    // Iteration with write access

    /// Runs `f` on every matching chunk passing the filter, on the calling thread.
    pub fn for_each_chunk_mut(
        &self,
        store: &mut Store,
        mut f: impl FnMut(ArchetypeChunkMut<'_>),
    ) -> Result<()> {
        self.complete_dependency(store)?;
        let entries = self.filtered_entries(store);

        let version = store.global_system_version;
        let data = store.queries.data(self.id);
        for entry in entries {
            let chunk = store.chunks.get_mut(entry.chunk);
            let (reads, writes) = (&data.reads[..], &data.writes[..]);
            f(ArchetypeChunkMut::new(chunk, entry.matching_index, reads, writes, version));
        }
        Ok(())
    }

    /// Runs `f` on every matching chunk passing the filter, in parallel on the rayon pool.
    ///
    /// Outstanding jobs on the query types are completed first,
    /// and every chunk has been processed when this returns.
    pub fn par_for_each_chunk_mut(
        &self,
        store: &mut Store,
        f: impl Fn(ArchetypeChunkMut<'_>) + Send + Sync,
    ) -> Result<()> {
        self.complete_dependency(store)?;
        let entries = self.filtered_entries(store);
        let ids: Vec<ChunkId> = entries.iter().map(|entry| entry.chunk).collect();

        let version = store.global_system_version;
        let data = store.queries.data(self.id);
        let (reads, writes) = (&data.reads[..], &data.writes[..]);
        let chunks = store.chunks.many_mut(&ids);

        chunks.into_par_iter().zip(entries.par_iter()).for_each(|(chunk, entry)| {
            f(ArchetypeChunkMut::new(chunk, entry.matching_index, reads, writes, version))
        });
        Ok(())
    }
}
