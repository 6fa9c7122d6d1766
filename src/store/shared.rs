//! Interning of shared component values.

use std::collections::HashMap;

use bytemuck::Pod;
use indexmap::IndexMap;

use crate::comp::TypeIndex;

/// An index that is never assigned to a value.
///
/// Looking up a value that is not interned yields this index,
/// which no chunk carries.
pub(crate) const MISSING: u32 = u32::MAX;

#[derive(Debug)]
struct Interned {
    ty:    TypeIndex,
    bytes: Box<[u8]>,
    /// Number of entity rows holding this value.
    refs:  usize,
}

/// Interns shared component values as small integers stored on chunks.
///
/// Index 0 is reserved for the all-zero value of every type,
/// so chunks of new entities need no interning.
/// Other values are reference counted by the rows holding them
/// and released when the last such row leaves.
/// Indices are not reused, so a stale index never aliases a newer value.
#[derive(Debug)]
pub(crate) struct SharedValues {
    by_value:   IndexMap<(TypeIndex, Box<[u8]>), u32>,
    by_index:   HashMap<u32, Interned>,
    next_index: u32,
}

impl Default for SharedValues {
    fn default() -> Self {
        Self { by_value: IndexMap::new(), by_index: HashMap::new(), next_index: 1 }
    }
}

fn is_default(bytes: &[u8]) -> bool { bytes.iter().all(|&byte| byte == 0) }

impl SharedValues {
    /// Returns the index of a value, assigning a new one if it is not interned yet.
    ///
    /// A new value starts without references;
    /// the caller must [`retain`](Self::retain) it for the rows it is stored on.
    pub(crate) fn intern(&mut self, ty: TypeIndex, bytes: &[u8]) -> u32 {
        if is_default(bytes) {
            return 0;
        }
        if let Some(&index) = self.by_value.get(&(ty, Box::from(bytes))) {
            return index;
        }

        let index = self.next_index;
        assert_ne!(index, MISSING, "shared value index space exhausted");
        self.next_index += 1;

        self.by_value.insert((ty, bytes.into()), index);
        self.by_index.insert(index, Interned { ty, bytes: bytes.into(), refs: 0 });
        index
    }

    /// Returns the index of a value without interning it,
    /// or [`MISSING`] if no row holds the value.
    pub(crate) fn lookup(&self, ty: TypeIndex, bytes: &[u8]) -> u32 {
        if is_default(bytes) {
            return 0;
        }
        self.by_value.get(&(ty, Box::from(bytes))).copied().unwrap_or(MISSING)
    }

    /// Records one more row holding each of `indices`.
    pub(crate) fn retain(&mut self, indices: &[u32]) {
        for &index in indices.iter().filter(|&&index| index != 0) {
            let value = self.by_index.get_mut(&index).expect("retained shared value is interned");
            value.refs += 1;
        }
    }

    /// Records one less row holding each of `indices`, releasing values no row holds.
    pub(crate) fn release(&mut self, indices: &[u32]) {
        for &index in indices.iter().filter(|&&index| index != 0) {
            let value = self.by_index.get_mut(&index).expect("released shared value is interned");
            value.refs -= 1;
            if value.refs > 0 {
                continue;
            }

            if let Some(Interned { ty, bytes, .. }) = self.by_index.remove(&index) {
                self.by_value.swap_remove(&(ty, bytes));
                log::trace!("Released shared value #{index} of {ty:?}");
            }
        }
    }

    pub(crate) fn get<T: Pod>(&self, ty: TypeIndex, index: u32) -> T {
        if index == 0 {
            return T::zeroed();
        }

        let value = self.by_index.get(&index).expect("shared value index must be interned");
        debug_assert_eq!(value.ty, ty, "shared value belongs to another type");
        bytemuck::pod_read_unaligned(&value.bytes)
    }

    /// Number of rows holding the value at `index`.
    pub(crate) fn ref_count(&self, index: u32) -> usize {
        self.by_index.get(&index).map_or(0, |value| value.refs)
    }

    /// Number of distinct non-default values held by some row.
    pub(crate) fn len(&self) -> usize { self.by_index.len() }
}
