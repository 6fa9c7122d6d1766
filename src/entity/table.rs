//! The slot table that resolves entity handles to storage locations.

use xias::Xias;

use super::{Entity, Location};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy)]
struct Slot {
    version:  u32,
    location: Option<Location>,
}

/// Maps entity indices to their current generation and location.
///
/// Freed slots are reused in LIFO order.
#[derive(Debug)]
pub(crate) struct Table {
    slots:        Vec<Slot>,
    free:         Vec<u32>,
    max_entities: usize,
    alive:        usize,
}

impl Table {
    pub(crate) fn new(capacity: usize, max_entities: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity.min(max_entities)),
            free: Vec::new(),
            max_entities,
            alive: 0,
        }
    }

    /// Allocates a handle without a location.
    /// The caller must call [`set_location`](Self::set_location) before the handle is exposed.
    ///
    /// # Panics
    /// Panics if the table already holds the maximum number of entities.
    pub(crate) fn allocate(&mut self) -> Entity {
        self.alive += 1;

        if let Some(index) = self.free.pop() {
            let slot = &self.slots[index.small_int::<usize>()];
            return Entity { index, version: slot.version };
        }

        if self.slots.len() >= self.max_entities {
            panic!("Entity table exhausted: cannot hold more than {} entities", self.max_entities);
        }

        let index: u32 = self.slots.len().try_into().expect("entity index overflows u32");
        self.slots.push(Slot { version: 1, location: None });
        Entity { index, version: 1 }
    }

    /// Returns the location of a live entity.
    pub(crate) fn location(&self, entity: Entity) -> Result<Location> {
        match self.slots.get(entity.index.small_int::<usize>()) {
            Some(&Slot { version, location: Some(location) }) if version == entity.version => {
                Ok(location)
            }
            _ => Err(Error::EntityDoesNotExist(entity)),
        }
    }

    pub(crate) fn exists(&self, entity: Entity) -> bool { self.location(entity).is_ok() }

    /// Updates the location of an allocated entity.
    pub(crate) fn set_location(&mut self, entity: Entity, location: Location) {
        let slot = self
            .slots
            .get_mut(entity.index.small_int::<usize>())
            .expect("entity index must come from this table");
        debug_assert_eq!(slot.version, entity.version, "set_location on a stale entity");
        slot.location = Some(location);
    }

    /// Updates the row of an entity moved within its chunk.
    pub(crate) fn set_row(&mut self, entity: Entity, row: u32) {
        let slot = self
            .slots
            .get_mut(entity.index.small_int::<usize>())
            .expect("entity index must come from this table");
        let location = slot.location.as_mut().expect("moved entity must be alive");
        location.row = row;
    }

    /// Releases the slot of a live entity and bumps its generation.
    pub(crate) fn free(&mut self, entity: Entity) {
        let slot = self
            .slots
            .get_mut(entity.index.small_int::<usize>())
            .expect("entity index must come from this table");
        debug_assert_eq!(slot.version, entity.version, "freeing a stale entity");

        slot.location = None;
        slot.version = match slot.version.wrapping_add(1) {
            0 => 1,
            version => version,
        };
        self.free.push(entity.index);
        self.alive -= 1;
    }

    /// Number of live entities.
    pub(crate) fn len(&self) -> usize { self.alive }

    /// Iterates over all live entities with their locations.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (Entity, Location)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let location = slot.location?;
            Some((Entity { index: index.small_int(), version: slot.version }, location))
        })
    }
}
