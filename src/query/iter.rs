use bytemuck::Pod;
use xias::Xias;

use crate::archetype::ArchetypeId;
use crate::chunk::Chunk;
use crate::comp::TypeIndex;
use crate::entity::Entity;
use crate::{Error, Result};

/// A matching chunk yielded by query iteration.
///
/// Rows `start..start + count` belong to the query.
/// Iteration always yields whole chunks, so `start` is 0 and `count` is the chunk length.
#[derive(Debug, Clone, Copy)]
pub struct ArchetypeChunk<'s> {
    chunk:          &'s Chunk,
    matching_index: usize,
}

impl<'s> ArchetypeChunk<'s> {
    pub(crate) fn new(chunk: &'s Chunk, matching_index: usize) -> Self {
        Self { chunk, matching_index }
    }

    pub fn chunk(&self) -> &'s Chunk { self.chunk }

    pub fn archetype(&self) -> ArchetypeId { self.chunk.archetype() }

    /// Position of the archetype in the query's matching archetype list.
    pub fn matching_archetype_index(&self) -> usize { self.matching_index }

    pub fn start(&self) -> u32 { 0 }

    pub fn count(&self) -> u32 { self.chunk.len() }

    pub fn entities(&self) -> &'s [Entity] { self.chunk.entities() }

    /// The column of `ty` as a typed slice.
    pub fn components<T: Pod>(&self, ty: TypeIndex) -> Result<&'s [T]> {
        self.chunk.components(ty)
    }

    /// Whether `ty` was written in this chunk after `version`.
    pub fn did_change(&self, ty: TypeIndex, version: u32) -> Result<bool> {
        self.chunk.did_change(ty, version)
    }
}

/// A matching chunk borrowed mutably for iteration.
///
/// Only types with [`ReadWrite`](super::AccessMode::ReadWrite) access
/// in the query can be borrowed mutably.
#[derive(Debug)]
pub struct ArchetypeChunkMut<'s> {
    chunk:          &'s mut Chunk,
    matching_index: usize,
    reads:          &'s [TypeIndex],
    writes:         &'s [TypeIndex],
    version:        u32,
}

impl<'s> ArchetypeChunkMut<'s> {
    pub(crate) fn new(
        chunk: &'s mut Chunk,
        matching_index: usize,
        reads: &'s [TypeIndex],
        writes: &'s [TypeIndex],
        version: u32,
    ) -> Self {
        Self { chunk, matching_index, reads, writes, version }
    }

    pub fn chunk(&self) -> &Chunk { self.chunk }

    pub fn archetype(&self) -> ArchetypeId { self.chunk.archetype() }

    pub fn matching_archetype_index(&self) -> usize { self.matching_index }

    pub fn count(&self) -> u32 { self.chunk.len() }

    pub fn entities(&self) -> &[Entity] { self.chunk.entities() }

    /// The column of `ty` as a typed slice.
    pub fn components<T: Pod>(&self, ty: TypeIndex) -> Result<&[T]> {
        if self.reads.binary_search(&ty).is_err() && self.writes.binary_search(&ty).is_err() {
            return Err(Error::TypeNotInQuery(ty));
        }
        self.chunk.components(ty)
    }

    /// The column of `ty` as a mutable typed slice.
    ///
    /// Marks the column as changed at the global system version of the iteration.
    pub fn components_mut<T: Pod>(&mut self, ty: TypeIndex) -> Result<&mut [T]> {
        if self.writes.binary_search(&ty).is_err() {
            return Err(if self.reads.binary_search(&ty).is_ok() {
                Error::ReadOnlyAccess(ty)
            } else {
                Error::TypeNotInQuery(ty)
            });
        }
        self.chunk.components_mut(ty, self.version)
    }

    /// Whether `ty` was written in this chunk after `version`.
    pub fn did_change(&self, ty: TypeIndex, version: u32) -> Result<bool> {
        self.chunk.did_change(ty, version)
    }

    /// Iterates over the occupied row indices.
    pub fn rows(&self) -> impl Iterator<Item = usize> { 0..self.chunk.len().small_int::<usize>() }
}
