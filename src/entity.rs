//! An entity is a handle to one row of component data.
//!
//! The handle is an `(index, version)` pair.
//! `index` selects a slot in the store's entity table,
//! and `version` is the generation of that slot when the entity was created.
//! Destroying an entity bumps the generation of its slot,
//! so stale copies of the handle stop resolving even after the slot is reused.

use std::fmt;

use crate::archetype::ArchetypeId;
use crate::chunk::ChunkId;

pub(crate) mod table;
pub(crate) use table::Table;


/// A versioned entity handle.
///
/// This type is plain data, so it is stored directly in the entity column of each chunk.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, bytemuck::Pod, bytemuck::Zeroable,
)]
#[repr(C)]
pub struct Entity {
    /// The slot in the entity table.
    pub index:   u32,
    /// The generation of the slot.
    pub version: u32,
}

impl Entity {
    /// A handle that never resolves. Versions start from 1.
    pub const NULL: Self = Self { index: 0, version: 0 };

    /// Whether this is the [null](Self::NULL) handle.
    pub fn is_null(self) -> bool { self.version == 0 }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.index, self.version)
    }
}

/// The physical storage location of a live entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// The archetype the entity belongs to.
    pub archetype: ArchetypeId,
    /// The chunk holding the entity's row.
    pub chunk:     ChunkId,
    /// The row in the chunk.
    pub row:       u32,
}

static_assertions::assert_eq_size!(Entity, u64);
