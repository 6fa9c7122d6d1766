//! Component types and their registration.
//!
//! Every component type is assigned a small [`TypeIndex`] by a [`TypeRegistry`]
//! before any store is constructed.
//! The index is the identity of the type everywhere else in the crate:
//! archetypes are sorted lists of type indices,
//! and queries are predicates over them.
//!
//! Rust types opt in by implementing [`Component`],
//! usually through `#[derive(Component)]`:
//!
//! ```
//! use archstore::comp::{self, Component};
//!
//! #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable, Component)]
//! #[repr(C)]
//! struct Position([f32; 3]);
//!
//! #[derive(Component)]
//! #[component(tag)]
//! struct Frozen;
//!
//! let mut builder = comp::registry::Builder::new();
//! let position = builder.register::<Position>().unwrap();
//! let frozen = builder.register::<Frozen>().unwrap();
//! let registry = builder.build();
//! assert_eq!(registry.index_of::<Position>(), Ok(position));
//! assert_eq!(registry.descriptor(frozen).unwrap().size_in_chunk, 0);
//! ```

use std::fmt;

use xias::Xias;

pub mod registry;
pub use registry::TypeRegistry;


#[doc(inline)]
pub use archstore_codegen::Component;

/// The largest supported alignment of a component type.
///
/// Chunk buffers are aligned to this value,
/// so every column offset aligned to its own type is also aligned in memory.
pub const MAX_COMPONENT_ALIGN: usize = 64;

/// Size of the external-table handle stored in chunk columns
/// of buffer and managed components.
pub const HANDLE_SIZE: usize = std::mem::size_of::<u32>();

/// A Rust type that can be registered as a component.
///
/// Value components (the [`Regular`](Category::Regular), [`Shared`](Category::Shared)
/// and [`Chunk`](Category::Chunk) categories) are additionally accessed as [`bytemuck::Pod`]
/// through the typed store APIs.
pub trait Component: Send + Sync + 'static {
    /// The storage category of this component type.
    const CATEGORY: Category = Category::Regular;

    /// Whether the component is stored in the external managed table
    /// instead of inline in the chunk.
    const MANAGED: bool = false;
}

/// Where and how the values of a component type are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// A zero-sized marker. Occupies no chunk memory.
    Tag,
    /// An inline value, one per entity.
    Regular,
    /// A per-entity growable list of elements stored outside the chunk.
    Buffer,
    /// A value shared by every entity in a chunk.
    /// Entities with different values are stored in different chunks.
    Shared,
    /// A single value attached to a chunk rather than to its entities.
    Chunk,
}

/// The registry-assigned identity of a component type.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeIndex(pub u16);

impl TypeIndex {
    /// The built-in [`Prefab`] tag.
    pub const PREFAB: Self = Self(0);
    /// The built-in [`Disabled`] tag.
    pub const DISABLED: Self = Self(1);

    /// Returns the index as a `usize` for table lookups.
    pub fn get(self) -> usize { self.0.small_int() }
}

impl fmt::Debug for TypeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "#{}", self.0) }
}

/// The size, alignment and category of a component type.
///
/// Two registrations with the same key must have equal shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeShape {
    /// Size of one value (or one buffer element) in bytes.
    pub size:     u32,
    /// Alignment of one value in bytes.
    pub align:    u32,
    /// The storage category.
    pub category: Category,
    /// Whether the value lives in the managed table.
    pub managed:  bool,
}

impl TypeShape {
    /// The shape of a Rust component type.
    pub fn of<T: Component>() -> Self {
        Self {
            size:     std::mem::size_of::<T>().small_int(),
            align:    std::mem::align_of::<T>().small_int(),
            category: T::CATEGORY,
            managed:  T::MANAGED,
        }
    }

    /// Bytes occupied per entity row.
    fn size_in_chunk(&self) -> u32 {
        match self.category {
            Category::Tag | Category::Shared | Category::Chunk => 0,
            Category::Buffer => HANDLE_SIZE.small_int(),
            Category::Regular if self.managed => HANDLE_SIZE.small_int(),
            Category::Regular => self.size,
        }
    }

    /// Alignment of the per-entity column.
    fn column_align(&self) -> u32 {
        match self.category {
            Category::Buffer => HANDLE_SIZE.small_int(),
            Category::Regular if self.managed => HANDLE_SIZE.small_int(),
            _ => self.align,
        }
    }
}

/// The immutable registration record of a component type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentTypeDescriptor {
    /// The type index.
    pub index:         TypeIndex,
    /// Bytes occupied per entity row; 0 for types without a per-entity column.
    pub size_in_chunk: u32,
    /// Size of one value or buffer element.
    pub value_size:    u32,
    /// Alignment of the per-entity column, or of the value for chunk and shared types.
    pub align:         u32,
    /// The storage category.
    pub category:      Category,
    /// Whether the value is stored in the managed table.
    pub managed:       bool,
}

impl ComponentTypeDescriptor {
    /// Whether the type has a per-entity chunk column.
    pub fn has_column(&self) -> bool { self.size_in_chunk > 0 }

    /// Whether the column stores a handle into an external object table.
    pub fn is_handle(&self) -> bool { self.category == Category::Buffer || self.managed }
}

/// Marks an entity as a template that queries skip by default.
#[derive(Debug, Component)]
#[component(tag, archstore_as(crate))]
pub struct Prefab;

/// Marks an entity as disabled so that queries skip it by default.
#[derive(Debug, Component)]
#[component(tag, archstore_as(crate))]
pub struct Disabled;
