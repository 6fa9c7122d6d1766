//! Chunks are fixed-size blocks of columnar component data.
//!
//! A chunk stores the rows of up to [`capacity`](Chunk::capacity) entities of one archetype.
//! Each per-entity component type occupies one contiguous column,
//! preceded by the implicit entity column.
//! Rows `0..len` are always occupied;
//! removing a row moves the last row into the gap.
//!
//! ```text
//! | header | entities | column A | column B | ... | chunk values |
//! ```

use std::sync::Arc;

use bytemuck::Pod;
use xias::Xias;

use crate::archetype::ArchetypeId;
use crate::comp::TypeIndex;
use crate::entity::Entity;
use crate::{Error, Result};

mod layout;
pub use layout::ChunkLayout;
pub(crate) use layout::Slot;

pub(crate) mod pool;
pub(crate) use pool::Pool;

#[cfg(test)]
mod tests;

/// Size of a chunk buffer in bytes.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Bytes reserved at the start of every chunk buffer.
pub const CHUNK_HEADER_SIZE: usize = 64;

const ENTITY_SIZE: usize = std::mem::size_of::<Entity>();

/// Identifies a chunk within its store.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkId(pub(crate) u32);

impl ChunkId {
    /// Returns the id as a `usize` for table lookups.
    pub fn get(self) -> usize { self.0.small_int() }
}

impl std::fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "chunk#{}", self.0)
    }
}

/// The raw memory of a chunk.
#[derive(bytemuck::Zeroable)]
#[repr(C, align(64))]
pub(crate) struct ChunkBuffer([u8; CHUNK_SIZE]);

static_assertions::const_assert_eq!(
    std::mem::align_of::<ChunkBuffer>(),
    crate::comp::MAX_COMPONENT_ALIGN
);

/// Returns whether a version stamp is newer than `required`.
///
/// A `required` of 0 matches everything. Versions are compared with wrap-around.
pub fn did_change(version: u32, required: u32) -> bool {
    required == 0 || (version.wrapping_sub(required) as i32) > 0
}

/// A read-only view of one column.
#[derive(Debug, Clone, Copy)]
pub struct ColumnView<'c> {
    bytes:  &'c [u8],
    stride: usize,
}

impl<'c> ColumnView<'c> {
    /// The bytes of all occupied rows.
    pub fn bytes(&self) -> &'c [u8] { self.bytes }

    /// The size of one row.
    pub fn stride(&self) -> usize { self.stride }

    /// The bytes of a single row.
    pub fn row(&self, row: usize) -> &'c [u8] {
        &self.bytes[row * self.stride..(row + 1) * self.stride]
    }
}

/// A mutable view of one column.
#[derive(Debug)]
pub struct ColumnViewMut<'c> {
    bytes:  &'c mut [u8],
    stride: usize,
}

impl<'c> ColumnViewMut<'c> {
    /// The bytes of all occupied rows.
    pub fn bytes(&mut self) -> &mut [u8] { &mut self.bytes[..] }

    /// The size of one row.
    pub fn stride(&self) -> usize { self.stride }

    /// The bytes of a single row.
    pub fn row(&mut self, row: usize) -> &mut [u8] {
        &mut self.bytes[row * self.stride..(row + 1) * self.stride]
    }
}

/// A block of rows for entities of one archetype.
pub struct Chunk {
    id:              ChunkId,
    archetype:       ArchetypeId,
    layout:          Arc<ChunkLayout>,
    buffer:          Box<ChunkBuffer>,
    len:             u32,
    /// Change version of each archetype type, by type position.
    change_versions: Box<[u32]>,
    order_version:   u32,
    /// Interned shared values, by shared type position.
    shared_values:   Box<[u32]>,
}

impl Chunk {
    pub(crate) fn new(
        id: ChunkId,
        archetype: ArchetypeId,
        layout: Arc<ChunkLayout>,
        mut buffer: Box<ChunkBuffer>,
        shared_values: Box<[u32]>,
        version: u32,
    ) -> Self {
        debug_assert_eq!(shared_values.len(), layout.shared_types().len());

        let tail = layout.chunk_values_offset();
        buffer.0[tail..].fill(0);

        Self {
            id,
            archetype,
            change_versions: vec![version; layout.types().len()].into_boxed_slice(),
            layout,
            buffer,
            len: 0,
            order_version: 0,
            shared_values,
        }
    }

    pub(crate) fn into_buffer(self) -> Box<ChunkBuffer> { self.buffer }

    /// The id of this chunk.
    pub fn id(&self) -> ChunkId { self.id }

    /// The archetype owning this chunk.
    pub fn archetype(&self) -> ArchetypeId { self.archetype }

    /// The layout shared by all chunks of the archetype.
    pub fn layout(&self) -> &Arc<ChunkLayout> { &self.layout }

    /// Number of occupied rows.
    pub fn len(&self) -> u32 { self.len }

    /// Whether no rows are occupied.
    pub fn is_empty(&self) -> bool { self.len == 0 }

    /// Maximum number of rows.
    pub fn capacity(&self) -> u32 { self.layout.capacity() }

    /// Whether all rows are occupied.
    pub fn is_full(&self) -> bool { self.len == self.capacity() }

    /// The entity handles of the occupied rows, in row order.
    pub fn entities(&self) -> &[Entity] {
        let start = CHUNK_HEADER_SIZE;
        let end = start + self.len.small_int::<usize>() * ENTITY_SIZE;
        bytemuck::cast_slice(&self.buffer.0[start..end])
    }

    /// Appends a zeroed row for `entity` and returns its index.
    pub fn allocate_row(&mut self, entity: Entity) -> Result<u32> {
        if self.is_full() {
            return Err(Error::ChunkFull { capacity: self.capacity() });
        }

        let row = self.len;
        let row_usize: usize = row.small_int();

        let entity_offset = CHUNK_HEADER_SIZE + row_usize * ENTITY_SIZE;
        self.buffer.0[entity_offset..entity_offset + ENTITY_SIZE]
            .copy_from_slice(bytemuck::bytes_of(&entity));

        for slot in self.layout.slots() {
            if let Slot::Column { offset, stride } = *slot {
                let start = offset + row_usize * stride;
                self.buffer.0[start..start + stride].fill(0);
            }
        }

        self.len += 1;
        Ok(row)
    }

    /// Moves the last row into `row` and shrinks the chunk by one row.
    ///
    /// Returns the entity that now occupies `row`,
    /// or `None` if `row` was the last row.
    /// The caller is responsible for updating that entity's location.
    pub fn swap_remove_row(&mut self, row: u32) -> Option<Entity> {
        assert!(row < self.len, "row {row} out of bounds for chunk of {} rows", self.len);

        let last = self.len - 1;
        self.len = last;
        if row == last {
            return None;
        }

        let (row, last): (usize, usize) = (row.small_int(), last.small_int());

        let entities = CHUNK_HEADER_SIZE;
        self.buffer.0.copy_within(
            entities + last * ENTITY_SIZE..entities + (last + 1) * ENTITY_SIZE,
            entities + row * ENTITY_SIZE,
        );
        for slot in self.layout.slots() {
            if let Slot::Column { offset, stride } = *slot {
                self.buffer.0.copy_within(
                    offset + last * stride..offset + (last + 1) * stride,
                    offset + row * stride,
                );
            }
        }

        Some(self.entities()[row])
    }

    fn position(&self, ty: TypeIndex) -> Result<usize> {
        self.layout.position(ty).ok_or(Error::TypeNotInArchetype(ty))
    }

    fn column_range(&self, ty: TypeIndex) -> Result<(usize, usize, usize)> {
        match self.layout.slots()[self.position(ty)?] {
            Slot::Column { offset, stride } => {
                Ok((offset, offset + stride * self.len.small_int::<usize>(), stride))
            }
            Slot::Tag => Ok((0, 0, 0)),
            Slot::Shared { .. } | Slot::ChunkValue { .. } => {
                Err(Error::TypeMismatch { index: ty, requested: "a per-entity column" })
            }
        }
    }

    /// Returns the bytes and stride of a column.
    ///
    /// Tags yield an empty view with stride 0.
    pub fn column(&self, ty: TypeIndex) -> Result<ColumnView<'_>> {
        let (start, end, stride) = self.column_range(ty)?;
        Ok(ColumnView { bytes: &self.buffer.0[start..end], stride })
    }

    /// Returns a mutable view of a column and marks it as changed at `version`.
    pub fn column_mut(&mut self, ty: TypeIndex, version: u32) -> Result<ColumnViewMut<'_>> {
        let (start, end, stride) = self.column_range(ty)?;
        self.mark_changed(ty, version)?;
        Ok(ColumnViewMut { bytes: &mut self.buffer.0[start..end], stride })
    }

    /// Returns a column as a typed slice.
    pub fn components<T: Pod>(&self, ty: TypeIndex) -> Result<&[T]> {
        let view = self.column(ty)?;
        check_stride::<T>(ty, view.stride)?;
        Ok(bytemuck::cast_slice(view.bytes))
    }

    /// Returns a column as a mutable typed slice and marks it as changed at `version`.
    pub fn components_mut<T: Pod>(&mut self, ty: TypeIndex, version: u32) -> Result<&mut [T]> {
        let (start, end, stride) = self.column_range(ty)?;
        check_stride::<T>(ty, stride)?;
        self.mark_changed(ty, version)?;
        Ok(bytemuck::cast_slice_mut(&mut self.buffer.0[start..end]))
    }

    /// Stamps the change version of a type.
    ///
    /// Any write path calls this as soon as write access is granted,
    /// whether or not the bytes end up changing.
    pub fn mark_changed(&mut self, ty: TypeIndex, version: u32) -> Result<()> {
        let position = self.position(ty)?;
        self.change_versions[position] = version;
        Ok(())
    }

    pub(crate) fn mark_all_changed(&mut self, version: u32) {
        self.change_versions.fill(version);
    }

    /// The version at which `ty` was last written in this chunk.
    pub fn change_version(&self, ty: TypeIndex) -> Result<u32> {
        Ok(self.change_versions[self.position(ty)?])
    }

    /// Whether `ty` was written after `required`.
    pub fn did_change(&self, ty: TypeIndex, required: u32) -> Result<bool> {
        Ok(did_change(self.change_version(ty)?, required))
    }

    /// The order version of the last structural change touching this chunk.
    pub fn order_version(&self) -> u32 { self.order_version }

    pub(crate) fn set_order_version(&mut self, version: u32) { self.order_version = version; }

    /// The interned shared-value indices, by shared type position.
    pub fn shared_values(&self) -> &[u32] { &self.shared_values }

    /// The interned value index of a shared component type. 0 is the zeroed default value.
    pub fn shared_value(&self, ty: TypeIndex) -> Result<u32> {
        match self.layout.slots()[self.position(ty)?] {
            Slot::Shared { position } => Ok(self.shared_values[position]),
            _ => Err(Error::TypeMismatch { index: ty, requested: "a shared component" }),
        }
    }

    fn chunk_value_range(&self, ty: TypeIndex) -> Result<(usize, usize)> {
        match self.layout.slots()[self.position(ty)?] {
            Slot::ChunkValue { offset, size } => Ok((offset, offset + size)),
            _ => Err(Error::TypeMismatch { index: ty, requested: "a chunk component" }),
        }
    }

    /// The bytes of a chunk component value.
    pub fn chunk_value(&self, ty: TypeIndex) -> Result<&[u8]> {
        let (start, end) = self.chunk_value_range(ty)?;
        Ok(&self.buffer.0[start..end])
    }

    /// The mutable bytes of a chunk component value, marked as changed at `version`.
    pub fn chunk_value_mut(&mut self, ty: TypeIndex, version: u32) -> Result<&mut [u8]> {
        let (start, end) = self.chunk_value_range(ty)?;
        self.mark_changed(ty, version)?;
        Ok(&mut self.buffer.0[start..end])
    }

    /// Returns the bytes of one row of a column.
    pub(crate) fn row_bytes(&self, ty: TypeIndex, row: u32) -> Result<&[u8]> {
        let view = self.column(ty)?;
        Ok(view.row(row.small_int()))
    }

    /// Copies the columns shared with `src` from `src_row` into `dst_row`.
    ///
    /// Columns only present in `self` are left untouched,
    /// columns only present in `src` are dropped.
    pub(crate) fn copy_row_from(&mut self, dst_row: u32, src: &Chunk, src_row: u32) {
        let (dst_row, src_row): (usize, usize) = (dst_row.small_int(), src_row.small_int());

        let dst_layout = &self.layout;
        let pairs = itertools::merge_join_by(
            dst_layout.types().iter().zip(dst_layout.slots()),
            src.layout.types().iter().zip(src.layout.slots()),
            |(dst_ty, _), (src_ty, _)| dst_ty.cmp(src_ty),
        );

        for pair in pairs {
            if let itertools::EitherOrBoth::Both((_, dst_slot), (_, src_slot)) = pair {
                if let (
                    Slot::Column { offset: dst_offset, stride },
                    Slot::Column { offset: src_offset, stride: src_stride },
                ) = (*dst_slot, *src_slot)
                {
                    debug_assert_eq!(stride, src_stride, "same type must have the same stride");
                    let src_start = src_offset + src_row * stride;
                    let dst_start = dst_offset + dst_row * stride;
                    self.buffer.0[dst_start..dst_start + stride]
                        .copy_from_slice(&src.buffer.0[src_start..src_start + stride]);
                }
            }
        }
    }
}

fn check_stride<T: Pod>(ty: TypeIndex, stride: usize) -> Result<()> {
    if std::mem::size_of::<T>() != stride || stride == 0 {
        return Err(Error::TypeMismatch { index: ty, requested: std::any::type_name::<T>() });
    }
    Ok(())
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("id", &self.id)
            .field("archetype", &self.archetype)
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("order_version", &self.order_version)
            .field("change_versions", &self.change_versions)
            .finish()
    }
}
