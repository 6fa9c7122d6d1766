//! An archetype is the exact set of component types of a group of entities.
//!
//! Each archetype owns the chunks storing its entities.
//! Archetypes are created the first time an entity takes on their type set
//! and are kept for the lifetime of the store, even when they become empty.

use std::fmt;
use std::sync::Arc;

use bitvec::vec::BitVec;
use indexmap::IndexSet;
use xias::Xias;

use crate::chunk::{self, ChunkId, ChunkLayout};
use crate::comp::{ComponentTypeDescriptor, TypeIndex};
use crate::entity::{Entity, Location};
use crate::query::QueryId;
use crate::tracer::Tracer;
use crate::{Error, Result};


/// Identifies an archetype within its store.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArchetypeId(pub(crate) u32);

impl ArchetypeId {
    /// Returns the id as a `usize` for table lookups.
    pub fn get(self) -> usize { self.0.small_int() }

    pub(crate) fn from_usize(index: usize) -> Self {
        Self(index.try_into().expect("archetype id space exhausted"))
    }
}

impl fmt::Debug for ArchetypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "archetype#{}", self.0) }
}

/// The storage of all entities with one exact set of component types.
pub struct Archetype {
    id:               ArchetypeId,
    types:            Box<[TypeIndex]>,
    layout:           Arc<ChunkLayout>,
    /// Types whose column holds a handle into an external object table.
    handle_types:     Box<[TypeIndex]>,
    /// Chunks in allocation order.
    chunks:           Vec<ChunkId>,
    /// Chunks that are not full.
    with_space:       IndexSet<ChunkId>,
    entity_count:     usize,
    /// Queries that match this archetype, indexed by query id.
    matching_queries: BitVec,
}

impl Archetype {
    /// Creates an archetype from sorted, distinct type descriptors.
    pub(crate) fn new(id: ArchetypeId, descriptors: &[ComponentTypeDescriptor]) -> Result<Self> {
        let layout = ChunkLayout::compute(descriptors).ok_or_else(|| Error::UnsupportedLayout {
            name:   format!("{:?}", descriptors.iter().map(|desc| desc.index).collect::<Vec<_>>()),
            reason: "the combined component size does not fit in a chunk",
        })?;

        Ok(Self {
            id,
            types: descriptors.iter().map(|desc| desc.index).collect(),
            layout: Arc::new(layout),
            handle_types: descriptors
                .iter()
                .filter(|desc| desc.is_handle())
                .map(|desc| desc.index)
                .collect(),
            chunks: Vec::new(),
            with_space: IndexSet::new(),
            entity_count: 0,
            matching_queries: BitVec::new(),
        })
    }

    /// The id of this archetype.
    pub fn id(&self) -> ArchetypeId { self.id }

    /// The component types, sorted by index.
    pub fn types(&self) -> &[TypeIndex] { &self.types }

    /// Whether the archetype includes `ty`.
    pub fn contains(&self, ty: TypeIndex) -> bool { self.types.binary_search(&ty).is_ok() }

    /// The layout shared by all chunks.
    pub fn layout(&self) -> &Arc<ChunkLayout> { &self.layout }

    /// Maximum number of entities per chunk.
    pub fn chunk_capacity(&self) -> u32 { self.layout.capacity() }

    /// The chunks of this archetype, in allocation order.
    pub fn chunks(&self) -> &[ChunkId] { &self.chunks }

    /// Total number of entities in all chunks.
    pub fn entity_count(&self) -> usize { self.entity_count }

    /// Types whose values live in an external object table.
    pub fn handle_types(&self) -> &[TypeIndex] { &self.handle_types }

    /// Whether the query with the given id matches this archetype.
    pub fn matches_query(&self, query: QueryId) -> bool {
        self.matching_queries.get(query.get()).map_or(false, |bit| *bit)
    }

    pub(crate) fn set_matches_query(&mut self, query: QueryId) {
        if self.matching_queries.len() <= query.get() {
            self.matching_queries.resize(query.get() + 1, false);
        }
        self.matching_queries.set(query.get(), true);
    }

    /// Returns a chunk with at least one free row and the given shared values,
    /// allocating a new chunk if necessary.
    pub(crate) fn get_or_create_chunk_with_space(
        &mut self,
        pool: &mut chunk::Pool,
        shared_values: &[u32],
        version: u32,
        tracer: &dyn Tracer,
    ) -> ChunkId {
        let existing = self
            .with_space
            .iter()
            .rev()
            .copied()
            .find(|&id| pool.get(id).shared_values() == shared_values);
        if let Some(id) = existing {
            return id;
        }

        let id = pool.allocate(self.id, Arc::clone(&self.layout), shared_values.into(), version);
        self.chunks.push(id);
        self.with_space.insert(id);

        log::debug!("Allocated {id:?} for {:?}", self.id);
        tracer.allocate_chunk(self.id, id, self.layout.capacity());
        id
    }

    /// Places `entity` in a chunk of this archetype.
    ///
    /// If `source` is given, the components shared with the source row are copied byte for byte;
    /// components new to the entity are zeroed.
    /// Every column of the destination chunk is marked as changed at `version`.
    /// The caller must remove the source row afterwards.
    ///
    /// The cost is proportional to the row size, not the number of entities in the archetype.
    pub(crate) fn move_entity_in(
        &mut self,
        pool: &mut chunk::Pool,
        entity: Entity,
        source: Option<(ChunkId, u32)>,
        shared_values: &[u32],
        version: u32,
        tracer: &dyn Tracer,
    ) -> Location {
        let chunk_id = self.get_or_create_chunk_with_space(pool, shared_values, version, tracer);

        let row = match source {
            Some((src_chunk, src_row)) => {
                let (dst, src) = pool.pair_mut(chunk_id, src_chunk);
                let row = dst.allocate_row(entity).expect("chunk was selected for having space");
                dst.copy_row_from(row, src, src_row);
                dst.mark_all_changed(version);
                row
            }
            None => {
                let dst = pool.get_mut(chunk_id);
                let row = dst.allocate_row(entity).expect("chunk was selected for having space");
                dst.mark_all_changed(version);
                row
            }
        };

        if pool.get(chunk_id).is_full() {
            self.with_space.remove(&chunk_id);
        }
        self.entity_count += 1;

        Location { archetype: self.id, chunk: chunk_id, row }
    }

    /// Swap-removes a row from a chunk of this archetype, freeing the chunk if it becomes empty.
    ///
    /// Returns the entity moved into `row`, if any.
    pub(crate) fn remove_row(
        &mut self,
        pool: &mut chunk::Pool,
        chunk_id: ChunkId,
        row: u32,
        tracer: &dyn Tracer,
    ) -> Option<Entity> {
        let chunk = pool.get_mut(chunk_id);
        debug_assert_eq!(chunk.archetype(), self.id, "chunk belongs to another archetype");

        let moved = chunk.swap_remove_row(row);
        let empty = chunk.is_empty();
        self.entity_count -= 1;

        if empty {
            let position = self
                .chunks
                .iter()
                .position(|&id| id == chunk_id)
                .expect("chunk must be listed in its archetype");
            self.chunks.remove(position);
            self.with_space.remove(&chunk_id);
            pool.free(chunk_id);

            log::debug!("Freed {chunk_id:?} of {:?}", self.id);
            tracer.free_chunk(self.id, chunk_id);
        } else {
            self.with_space.insert(chunk_id);
        }

        moved
    }
}

impl fmt::Debug for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archetype")
            .field("id", &self.id)
            .field("types", &self.types)
            .field("chunk_capacity", &self.layout.capacity())
            .field("chunks", &self.chunks)
            .field("entity_count", &self.entity_count)
            .finish()
    }
}
