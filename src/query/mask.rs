use super::QueryId;
use crate::entity::Entity;
use crate::store::{EntityComponentStore, StoreId};
use crate::{Error, Result};

/// Tests whether single entities match a query without consulting its chunk cache.
///
/// Every archetype records the queries that match it when either side is created,
/// so a test is one table lookup and one bit read.
/// The mask ignores filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityQueryMask {
    query: QueryId,
    store: StoreId,
}

impl EntityQueryMask {
    pub(crate) fn new(query: QueryId, store: StoreId) -> Self { Self { query, store } }

    /// Whether `entity` is alive and its archetype matches the query.
    ///
    /// Fails with [`Error::InvalidQuery`] if the query was created by another store.
    pub fn matches(&self, store: &EntityComponentStore, entity: Entity) -> Result<bool> {
        if store.id != self.store {
            return Err(Error::InvalidQuery(self.query));
        }

        Ok(match store.location_of(entity) {
            Ok(location) => store.archetype_ref(location.archetype).matches_query(self.query),
            Err(_) => false,
        })
    }
}
