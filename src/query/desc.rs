use std::ops;

use crate::comp::{TypeIndex, TypeRegistry};
use crate::{Error, Result};

/// How a query accesses a component type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessMode {
    /// The query may read and write the component.
    ReadWrite,
    /// The query only reads the component.
    ReadOnly,
    /// Marks a type to exclude.
    ///
    /// Not accepted in descriptors; list excluded types under [`EntityQueryDesc::with_none`].
    Exclude,
}

/// A component type together with the access a query requests for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentType {
    pub index:  TypeIndex,
    pub access: AccessMode,
}

impl ComponentType {
    pub fn read_only(index: TypeIndex) -> Self { Self { index, access: AccessMode::ReadOnly } }

    pub fn read_write(index: TypeIndex) -> Self { Self { index, access: AccessMode::ReadWrite } }

    pub fn exclude(index: TypeIndex) -> Self { Self { index, access: AccessMode::Exclude } }
}

impl From<TypeIndex> for ComponentType {
    fn from(index: TypeIndex) -> Self { Self::read_write(index) }
}

/// Flags adjusting which archetypes a query matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct QueryOptions(u8);

impl QueryOptions {
    /// Default matching: prefabs and disabled entities are skipped
    /// unless the query names the tag explicitly.
    pub const NONE: Self = Self(0);
    /// Match archetypes containing [`Prefab`](crate::comp::Prefab).
    pub const INCLUDE_PREFAB: Self = Self(1);
    /// Match archetypes containing [`Disabled`](crate::comp::Disabled).
    pub const INCLUDE_DISABLED: Self = Self(2);

    /// Whether all flags in `other` are set.
    pub fn contains(self, other: Self) -> bool { self.0 & other.0 == other.0 }
}

impl ops::BitOr for QueryOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self { Self(self.0 | rhs.0) }
}

/// Describes the archetypes a query matches.
///
/// An archetype matches if it contains every `all` type,
/// at least one `any` type (when `any` is non-empty),
/// and no `none` type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct EntityQueryDesc {
    all:     Vec<ComponentType>,
    any:     Vec<ComponentType>,
    none:    Vec<ComponentType>,
    options: QueryOptions,
}

impl EntityQueryDesc {
    pub fn new() -> Self { Self::default() }

    /// Requires every one of `types`.
    pub fn with_all<C: Into<ComponentType>>(mut self, types: impl IntoIterator<Item = C>) -> Self {
        self.all.extend(types.into_iter().map(Into::into));
        self
    }

    /// Requires at least one of `types`.
    pub fn with_any<C: Into<ComponentType>>(mut self, types: impl IntoIterator<Item = C>) -> Self {
        self.any.extend(types.into_iter().map(Into::into));
        self
    }

    /// Rejects archetypes with any of `types`.
    pub fn with_none<C: Into<ComponentType>>(mut self, types: impl IntoIterator<Item = C>) -> Self {
        self.none.extend(types.into_iter().map(|ty| ComponentType::read_only(ty.into().index)));
        self
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = self.options | options;
        self
    }

    pub fn all(&self) -> &[ComponentType] { &self.all }

    pub fn any(&self) -> &[ComponentType] { &self.any }

    pub fn none(&self) -> &[ComponentType] { &self.none }

    pub fn options(&self) -> QueryOptions { self.options }

    /// Sorts every list so that equal predicates compare equal.
    pub(crate) fn normalized(mut self) -> Self {
        self.all.sort_unstable();
        self.any.sort_unstable();
        self.none.sort_unstable();
        self
    }

    /// Checks the descriptor against a registry and returns its normalized form.
    ///
    /// A type may appear at most once across all lists,
    /// and [`AccessMode::Exclude`] is rejected.
    pub fn validate(self, registry: &TypeRegistry) -> Result<Self> {
        let desc = self.normalized();

        let mut seen: Vec<TypeIndex> = Vec::new();
        for ty in desc.all.iter().chain(&desc.any).chain(&desc.none) {
            registry.descriptor(ty.index)?;

            if ty.access == AccessMode::Exclude {
                return Err(Error::InvalidQueryDescriptor(format!(
                    "{} uses Exclude access; list it under `none` instead",
                    registry.name(ty.index)
                )));
            }
            if seen.contains(&ty.index) {
                return Err(Error::InvalidQueryDescriptor(format!(
                    "{} appears more than once",
                    registry.name(ty.index)
                )));
            }
            seen.push(ty.index);
        }

        Ok(desc)
    }
}
