//! Slab tables for component values stored outside chunks.
//!
//! Chunk columns of buffer and managed components hold a `u32` handle into one of these tables.
//! Handle 0 means no value has been allocated yet,
//! which is also what a freshly zeroed row contains.

use std::any::Any;

use xias::Xias;

type Object = Box<dyn Any + Send + Sync>;

/// A slab of type-erased objects addressed by non-zero handles.
#[derive(Default)]
pub(crate) struct ObjectTable {
    slots: Vec<Option<Object>>,
    free:  Vec<u32>,
    live:  usize,
}

impl ObjectTable {
    /// Stores an object and returns its handle.
    pub(crate) fn insert(&mut self, object: Object) -> u32 {
        self.live += 1;

        if let Some(handle) = self.free.pop() {
            let slot = &mut self.slots[handle.small_int::<usize>() - 1];
            debug_assert!(slot.is_none(), "free handle {handle} is occupied");
            *slot = Some(object);
            return handle;
        }

        self.slots.push(Some(object));
        self.slots.len().try_into().expect("object handle space exhausted")
    }

    pub(crate) fn get(&self, handle: u32) -> Option<&(dyn Any + Send + Sync)> {
        let index = handle.small_int::<usize>().checked_sub(1)?;
        self.slots.get(index)?.as_deref()
    }

    pub(crate) fn get_mut(&mut self, handle: u32) -> Option<&mut (dyn Any + Send + Sync)> {
        let index = handle.small_int::<usize>().checked_sub(1)?;
        self.slots.get_mut(index)?.as_deref_mut()
    }

    /// Replaces the object behind an existing handle.
    pub(crate) fn replace(&mut self, handle: u32, object: Object) {
        let slot = &mut self.slots[handle.small_int::<usize>() - 1];
        debug_assert!(slot.is_some(), "replacing a freed handle {handle}");
        *slot = Some(object);
    }

    /// Drops the object behind a handle. Handle 0 is ignored.
    pub(crate) fn free(&mut self, handle: u32) {
        if handle == 0 {
            return;
        }

        let slot = &mut self.slots[handle.small_int::<usize>() - 1];
        if slot.take().is_some() {
            self.free.push(handle);
            self.live -= 1;
        }
    }

    /// Number of live objects.
    pub(crate) fn len(&self) -> usize { self.live }
}

impl std::fmt::Debug for ObjectTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectTable")
            .field("live", &self.live)
            .field("slots", &self.slots.len())
            .finish()
    }
}
