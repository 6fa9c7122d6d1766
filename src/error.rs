//! Errors reported by store, query and dependency operations.
//!
//! Every error is reported before the operation mutates any state,
//! so a failed call leaves the store exactly as it was.

use crate::archetype::ArchetypeId;
use crate::comp::TypeIndex;
use crate::entity::Entity;
use crate::query::QueryId;

/// Result alias with [`Error`] as the default error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A precondition violation detected synchronously at the offending call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The same registration key was registered again with a different shape.
    #[error("component type {name} is already registered at {index:?} with a different layout")]
    DuplicateRegistrationConflict {
        /// Debug name of the conflicting registration.
        name:  String,
        /// Index of the existing registration.
        index: TypeIndex,
    },
    /// The type index or Rust type is not known to the registry.
    #[error("component type {0} is not registered")]
    UnregisteredType(String),
    /// The component type cannot be stored in a chunk.
    #[error("component type {name} has an unsupported layout: {reason}")]
    UnsupportedLayout {
        /// Debug name of the type.
        name:   String,
        /// Why the layout is rejected.
        reason: &'static str,
    },
    /// A row was requested from a chunk that is already at capacity.
    #[error("chunk is full ({capacity} rows)")]
    ChunkFull {
        /// Capacity of the chunk.
        capacity: u32,
    },
    /// The archetype id was not issued by this store.
    #[error("{0:?} does not exist in this store")]
    InvalidArchetype(ArchetypeId),
    /// The query handle was created by another store.
    #[error("{0:?} was created by another store")]
    InvalidQuery(QueryId),
    /// The archetype of the chunk or entity does not include the type.
    #[error("component type {0:?} is not part of the archetype")]
    TypeNotInArchetype(TypeIndex),
    /// The requested operation does not fit the category or layout of the type.
    #[error("component type {index:?} cannot be accessed as {requested}")]
    TypeMismatch {
        /// The accessed type.
        index:     TypeIndex,
        /// Description of the attempted access.
        requested: &'static str,
    },
    /// The entity handle is stale or was never allocated.
    #[error("entity {0:?} does not exist")]
    EntityDoesNotExist(Entity),
    /// The entity already has the component.
    #[error("entity {entity:?} already has component {index:?}")]
    ComponentAlreadyPresent {
        /// The entity operated on.
        entity: Entity,
        /// The component type.
        index:  TypeIndex,
    },
    /// The entity does not have the component.
    #[error("entity {entity:?} does not have component {index:?}")]
    ComponentNotPresent {
        /// The entity operated on.
        entity: Entity,
        /// The component type.
        index:  TypeIndex,
    },
    /// The query descriptor is malformed.
    #[error("invalid query descriptor: {0}")]
    InvalidQueryDescriptor(String),
    /// The component type is not among the required types of the query.
    #[error("component type {0:?} is not a required type of the query")]
    TypeNotInQuery(TypeIndex),
    /// Too many filters of one kind were added to a query.
    #[error("a query supports at most {max} {kind} filters")]
    FilterCapacityExceeded {
        /// The filter kind.
        kind: &'static str,
        /// The maximum number of filters of this kind.
        max:  usize,
    },
    /// Write access was requested for a type the query only reads.
    #[error("component type {0:?} is read-only in this query")]
    ReadOnlyAccess(TypeIndex),
    /// A singleton operation matched a number of entities other than one.
    #[error("expected exactly one matching entity, found {count}")]
    ExpectedExactlyOneMatch {
        /// The number of matching entities.
        count: usize,
    },
    /// The input slice length does not match the destination.
    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        /// The expected length.
        expected: usize,
        /// The provided length.
        actual:   usize,
    },
    /// A structural change was attempted while asynchronous jobs are still running.
    #[error("structural change attempted while {pending} jobs are still pending")]
    StructuralChangeWithPendingJobs {
        /// The number of incomplete jobs.
        pending: usize,
    },
}
