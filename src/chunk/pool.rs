//! Allocates chunks and recycles their buffers.

use std::sync::Arc;

use super::{Chunk, ChunkBuffer, ChunkId, ChunkLayout};
use crate::archetype::ArchetypeId;

/// Number of freed buffers kept for reuse.
const MAX_SPARE_BUFFERS: usize = 64;

/// Owns every chunk of a store, addressed by [`ChunkId`].
///
/// Ids of freed chunks are reused.
#[derive(Default)]
pub(crate) struct Pool {
    chunks:   Vec<Option<Chunk>>,
    free_ids: Vec<ChunkId>,
    spare:    Vec<Box<ChunkBuffer>>,
    live:     usize,
}

impl Pool {
    /// Allocates a new empty chunk.
    ///
    /// # Panics
    /// Panics if the chunk id space is exhausted.
    pub(crate) fn allocate(
        &mut self,
        archetype: ArchetypeId,
        layout: Arc<ChunkLayout>,
        shared_values: Box<[u32]>,
        version: u32,
    ) -> ChunkId {
        let buffer = self.spare.pop().unwrap_or_else(bytemuck::allocation::zeroed_box);

        let id = match self.free_ids.pop() {
            Some(id) => id,
            None => {
                let id = ChunkId(self.chunks.len().try_into().expect("chunk id space exhausted"));
                self.chunks.push(None);
                id
            }
        };

        let chunk = Chunk::new(id, archetype, layout, buffer, shared_values, version);
        let slot = &mut self.chunks[id.get()];
        debug_assert!(slot.is_none(), "free chunk id {id:?} is occupied");
        *slot = Some(chunk);
        self.live += 1;

        id
    }

    /// Frees an empty chunk.
    pub(crate) fn free(&mut self, id: ChunkId) {
        let chunk = self.chunks[id.get()].take().expect("freeing a chunk that does not exist");
        debug_assert!(chunk.is_empty(), "freeing a non-empty chunk");

        if self.spare.len() < MAX_SPARE_BUFFERS {
            self.spare.push(chunk.into_buffer());
        }
        self.free_ids.push(id);
        self.live -= 1;
    }

    pub(crate) fn get(&self, id: ChunkId) -> &Chunk {
        self.chunks.get(id.get()).and_then(Option::as_ref).expect("chunk id must be live")
    }

    pub(crate) fn get_mut(&mut self, id: ChunkId) -> &mut Chunk {
        self.chunks.get_mut(id.get()).and_then(Option::as_mut).expect("chunk id must be live")
    }

    /// Returns a chunk that is live, or `None` for freed and unknown ids.
    pub(crate) fn try_get(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(id.get()).and_then(Option::as_ref)
    }

    /// Borrows two distinct chunks mutably.
    pub(crate) fn pair_mut(&mut self, a: ChunkId, b: ChunkId) -> (&mut Chunk, &mut Chunk) {
        assert_ne!(a, b, "pair_mut requires distinct chunks");

        let (low, high, swapped) = if a < b { (a, b, false) } else { (b, a, true) };
        let (left, right) = self.chunks.split_at_mut(high.get());
        let low = left[low.get()].as_mut().expect("chunk id must be live");
        let high = right[0].as_mut().expect("chunk id must be live");

        if swapped {
            (high, low)
        } else {
            (low, high)
        }
    }

    /// Borrows the chunks with the given ids mutably, in id order.
    ///
    /// `ids` must be sorted and distinct.
    pub(crate) fn many_mut(&mut self, ids: &[ChunkId]) -> Vec<&mut Chunk> {
        debug_assert!(ids.windows(2).all(|pair| pair[0] < pair[1]), "ids must be sorted");

        let mut wanted = ids.iter().peekable();
        let mut output = Vec::with_capacity(ids.len());
        for (index, slot) in self.chunks.iter_mut().enumerate() {
            let Some(&&next) = wanted.peek() else { break };
            if next.get() == index {
                output.push(slot.as_mut().expect("chunk id must be live"));
                wanted.next();
            }
        }

        debug_assert_eq!(output.len(), ids.len(), "all ids must be live");
        output
    }

    /// Number of live chunks.
    pub(crate) fn len(&self) -> usize { self.live }

    /// Iterates over all live chunks.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Chunk> + '_ {
        self.chunks.iter().filter_map(Option::as_ref)
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("live", &self.live)
            .field("slots", &self.chunks.len())
            .field("spare", &self.spare.len())
            .finish()
    }
}
