use super::{MAX_CHANGED_FILTERS, MAX_SHARED_FILTERS};
use crate::chunk::{self, Chunk};
use crate::comp::TypeIndex;
use crate::store::EntityComponentStore;
use crate::{Error, Result};

/// Chunk-level filters attached to an [`EntityQuery`](super::EntityQuery) handle.
///
/// A chunk passes if every shared-value filter matches,
/// at least one changed-type filter reports a change (when any are set),
/// and its order version is newer than the required version (when the order filter is set).
///
/// Shared-value filters keep the filtered value itself,
/// and are resolved against the store's interned values on every evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityQueryFilter {
    changed:          [Option<TypeIndex>; MAX_CHANGED_FILTERS],
    shared:           Vec<(TypeIndex, Box<[u8]>)>,
    order:            bool,
    required_version: u32,
}

impl EntityQueryFilter {
    /// Whether no filter is set.
    pub fn is_empty(&self) -> bool {
        self.changed.iter().all(Option::is_none) && self.shared.is_empty() && !self.order
    }

    /// The types filtered for changes.
    pub fn changed_types(&self) -> impl Iterator<Item = TypeIndex> + '_ {
        self.changed.iter().flatten().copied()
    }

    /// The filtered shared types and the bytes of their required values.
    pub fn shared_values(&self) -> impl Iterator<Item = (TypeIndex, &[u8])> + '_ {
        self.shared.iter().map(|(ty, bytes)| (*ty, &bytes[..]))
    }

    /// Whether the order version filter is set.
    pub fn has_order_filter(&self) -> bool { self.order }

    /// The version that changed types and the order version are compared against.
    pub fn required_version(&self) -> u32 { self.required_version }

    pub(crate) fn add_changed(&mut self, ty: TypeIndex) -> Result<()> {
        if self.changed.contains(&Some(ty)) {
            return Ok(());
        }
        let slot = self
            .changed
            .iter_mut()
            .find(|slot| slot.is_none())
            .ok_or(Error::FilterCapacityExceeded { kind: "changed", max: MAX_CHANGED_FILTERS })?;
        *slot = Some(ty);
        Ok(())
    }

    pub(crate) fn clear_changed(&mut self) { self.changed = [None; MAX_CHANGED_FILTERS]; }

    /// Filters `ty` for `bytes`, replacing an earlier value of the same type.
    pub(crate) fn add_shared(&mut self, ty: TypeIndex, bytes: &[u8]) -> Result<()> {
        if let Some(existing) = self.shared.iter_mut().find(|(existing, _)| *existing == ty) {
            existing.1 = bytes.into();
            return Ok(());
        }
        if self.shared.len() == MAX_SHARED_FILTERS {
            return Err(Error::FilterCapacityExceeded { kind: "shared", max: MAX_SHARED_FILTERS });
        }
        self.shared.push((ty, bytes.into()));
        Ok(())
    }

    pub(crate) fn set_order(&mut self) { self.order = true; }

    pub(crate) fn set_required_version(&mut self, version: u32) { self.required_version = version; }

    /// Clears all filters, keeping the required version.
    pub(crate) fn reset(&mut self) {
        *self = Self { required_version: self.required_version, ..Self::default() };
    }

    /// Resolves shared values to the indices stored on chunks.
    ///
    /// A value that no entity holds resolves to an index no chunk carries.
    pub(crate) fn resolve(&self, store: &EntityComponentStore) -> ChunkFilter {
        let mut shared = [None; MAX_SHARED_FILTERS];
        for (slot, (ty, bytes)) in shared.iter_mut().zip(self.shared_values()) {
            *slot = Some((ty, store.shared_index(ty, bytes)));
        }

        ChunkFilter {
            changed: self.changed,
            shared,
            order: self.order,
            required_version: self.required_version,
        }
    }
}

/// An [`EntityQueryFilter`] resolved against one store.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChunkFilter {
    changed:          [Option<TypeIndex>; MAX_CHANGED_FILTERS],
    shared:           [Option<(TypeIndex, u32)>; MAX_SHARED_FILTERS],
    order:            bool,
    required_version: u32,
}

impl ChunkFilter {
    pub(crate) fn is_empty(&self) -> bool {
        self.changed.iter().all(Option::is_none)
            && self.shared.iter().all(Option::is_none)
            && !self.order
    }

    /// Whether a chunk of a matching archetype passes the filter.
    pub(crate) fn passes(&self, chunk: &Chunk) -> bool {
        let shared_ok = self
            .shared
            .iter()
            .flatten()
            .all(|&(ty, value)| chunk.shared_value(ty).map_or(false, |actual| actual == value));
        if !shared_ok {
            return false;
        }

        let mut changed = self.changed.iter().flatten().peekable();
        if changed.peek().is_some()
            && !changed.any(|&ty| chunk.did_change(ty, self.required_version).unwrap_or(true))
        {
            return false;
        }

        !self.order || chunk::did_change(chunk.order_version(), self.required_version)
    }
}
