use xias::Xias;

use super::{CHUNK_HEADER_SIZE, CHUNK_SIZE, ENTITY_SIZE};
use crate::comp::{Category, ComponentTypeDescriptor, TypeIndex};

/// Where the data of one archetype type lives in a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    /// A zero-sized tag without storage.
    Tag,
    /// A per-entity column.
    Column { offset: usize, stride: usize },
    /// A shared value, stored as an interned index on the chunk.
    Shared { position: usize },
    /// A single value stored in the chunk tail.
    ChunkValue { offset: usize, size: usize },
}

/// The column placement shared by all chunks of an archetype.
#[derive(Debug)]
pub struct ChunkLayout {
    capacity:            u32,
    types:               Box<[TypeIndex]>,
    slots:               Box<[Slot]>,
    shared_types:        Box<[TypeIndex]>,
    chunk_values_offset: usize,
}

impl ChunkLayout {
    /// Computes the layout for a sorted list of distinct type descriptors.
    ///
    /// The capacity starts at `(usable bytes) / (bytes per entity)`
    /// and is reduced until the alignment padding between columns also fits.
    /// Returns `None` if not even one entity fits.
    pub(crate) fn compute(descriptors: &[ComponentTypeDescriptor]) -> Option<Self> {
        debug_assert!(
            descriptors.windows(2).all(|pair| pair[0].index < pair[1].index),
            "descriptors must be sorted and distinct"
        );

        let mut slots = vec![Slot::Tag; descriptors.len()];

        let mut tail = CHUNK_SIZE;
        let mut shared_types = Vec::new();
        for (desc, slot) in descriptors.iter().zip(&mut slots) {
            match desc.category {
                Category::Chunk => {
                    let size: usize = desc.value_size.small_int();
                    tail = align_down(tail.checked_sub(size)?, desc.align.small_int());
                    *slot = Slot::ChunkValue { offset: tail, size };
                }
                Category::Shared => {
                    *slot = Slot::Shared { position: shared_types.len() };
                    shared_types.push(desc.index);
                }
                _ => {}
            }
        }

        let footprint = ENTITY_SIZE
            + descriptors.iter().map(|desc| desc.size_in_chunk.small_int::<usize>()).sum::<usize>();
        let mut capacity = tail.checked_sub(CHUNK_HEADER_SIZE)? / footprint;

        let offsets = loop {
            if capacity == 0 {
                return None;
            }

            let (offsets, end) = place_columns(descriptors, capacity);
            if end <= tail {
                break offsets;
            }
            capacity -= 1;
        };

        for (slot, offset) in slots.iter_mut().zip(offsets) {
            if let Some((offset, stride)) = offset {
                *slot = Slot::Column { offset, stride };
            }
        }

        Some(Self {
            capacity: capacity.small_int(),
            types: descriptors.iter().map(|desc| desc.index).collect(),
            slots: slots.into_boxed_slice(),
            shared_types: shared_types.into_boxed_slice(),
            chunk_values_offset: tail,
        })
    }

    /// Maximum number of entities in one chunk.
    pub fn capacity(&self) -> u32 { self.capacity }

    /// The archetype types in ascending index order.
    pub fn types(&self) -> &[TypeIndex] { &self.types }

    /// The shared component types in ascending index order.
    pub fn shared_types(&self) -> &[TypeIndex] { &self.shared_types }

    /// The position of `ty` in [`types`](Self::types).
    pub fn position(&self, ty: TypeIndex) -> Option<usize> { self.types.binary_search(&ty).ok() }

    /// The byte offset and stride of the per-entity column of `ty`, if it has one.
    pub fn column_offset(&self, ty: TypeIndex) -> Option<(usize, usize)> {
        match self.slots[self.position(ty)?] {
            Slot::Column { offset, stride } => Some((offset, stride)),
            _ => None,
        }
    }

    pub(crate) fn slots(&self) -> &[Slot] { &self.slots }

    pub(crate) fn chunk_values_offset(&self) -> usize { self.chunk_values_offset }
}

/// Places the entity column and every per-entity column for `capacity` rows.
///
/// Returns the offset and stride of each descriptor (`None` if it has no column)
/// and the end offset of the last column.
fn place_columns(
    descriptors: &[ComponentTypeDescriptor],
    capacity: usize,
) -> (Vec<Option<(usize, usize)>>, usize) {
    let mut offset = CHUNK_HEADER_SIZE + ENTITY_SIZE * capacity;

    let offsets = descriptors
        .iter()
        .map(|desc| {
            if !desc.has_column() {
                return None;
            }

            let stride: usize = desc.size_in_chunk.small_int();
            let start = align_up(offset, desc.align.small_int());
            offset = start + stride * capacity;
            Some((start, stride))
        })
        .collect();

    (offsets, offset)
}

fn align_up(offset: usize, align: usize) -> usize { (offset + align - 1) & !(align - 1) }

fn align_down(offset: usize, align: usize) -> usize { offset & !(align - 1) }
