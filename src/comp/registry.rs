//! Assigns type indices to component types.

use std::any::{type_name, TypeId};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use xias::Xias;

use super::{
    Category, Component, ComponentTypeDescriptor, Disabled, Prefab, TypeIndex, TypeShape,
    MAX_COMPONENT_ALIGN,
};
use crate::chunk::{CHUNK_HEADER_SIZE, CHUNK_SIZE};
use crate::entity::Entity;
use crate::{Error, Result};

/// The key a component type is registered under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeKey {
    /// A Rust type registered through [`Builder::register`].
    Rust(TypeId),
    /// A type registered by name through [`Builder::register_shape`].
    Named(Cow<'static, str>),
}

/// The frozen set of component types known to stores.
///
/// Built once through a [`Builder`] and shared between stores as an `Arc<TypeRegistry>`.
#[derive(Debug)]
pub struct TypeRegistry {
    descriptors: Vec<ComponentTypeDescriptor>,
    shapes:      Vec<TypeShape>,
    names:       Vec<Cow<'static, str>>,
    keys:        HashMap<TypeKey, TypeIndex>,
}

impl TypeRegistry {
    /// Returns the descriptor of a registered type in O(1).
    pub fn descriptor(&self, index: TypeIndex) -> Result<&ComponentTypeDescriptor> {
        self.descriptors
            .get(index.get())
            .ok_or_else(|| Error::UnregisteredType(format!("{index:?}")))
    }

    /// Returns the index of a registered Rust type.
    pub fn index_of<T: Component>(&self) -> Result<TypeIndex> {
        self.keys
            .get(&TypeKey::Rust(TypeId::of::<T>()))
            .copied()
            .ok_or_else(|| Error::UnregisteredType(type_name::<T>().to_string()))
    }

    /// Returns the index of a type registered by name.
    pub fn index_of_name(&self, name: &str) -> Result<TypeIndex> {
        self.keys
            .get(&TypeKey::Named(Cow::Owned(name.to_string())))
            .copied()
            .ok_or_else(|| Error::UnregisteredType(name.to_string()))
    }

    /// Returns the debug name of a registered type.
    pub fn name(&self, index: TypeIndex) -> &str {
        self.names.get(index.get()).map_or("<unregistered>", |name| name.as_ref())
    }

    /// Number of registered types, including the built-in tags.
    pub fn len(&self) -> usize { self.descriptors.len() }

    /// A registry always contains the built-in tags.
    pub fn is_empty(&self) -> bool { false }

    /// Iterates over all descriptors in index order.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentTypeDescriptor> + '_ {
        self.descriptors.iter()
    }
}

/// Collects component registrations before they are frozen into a [`TypeRegistry`].
#[derive(Debug)]
pub struct Builder {
    registry: TypeRegistry,
}

impl Default for Builder {
    fn default() -> Self { Self::new() }
}

impl Builder {
    /// Creates a builder with the built-in [`Prefab`] and [`Disabled`] tags registered.
    pub fn new() -> Self {
        let mut builder = Self {
            registry: TypeRegistry {
                descriptors: Vec::new(),
                shapes:      Vec::new(),
                names:       Vec::new(),
                keys:        HashMap::new(),
            },
        };

        let prefab = builder.register::<Prefab>().expect("built-in tags are valid");
        let disabled = builder.register::<Disabled>().expect("built-in tags are valid");
        debug_assert_eq!(prefab, TypeIndex::PREFAB);
        debug_assert_eq!(disabled, TypeIndex::DISABLED);

        builder
    }

    /// Registers a Rust component type.
    ///
    /// Registering the same type again returns the same index.
    pub fn register<T: Component>(&mut self) -> Result<TypeIndex> {
        let key = TypeKey::Rust(TypeId::of::<T>());
        self.insert(key, Cow::Borrowed(type_name::<T>()), TypeShape::of::<T>())
    }

    /// Registers a type by name with an explicit shape.
    ///
    /// Registering the same name with the same shape returns the same index;
    /// a different shape fails with [`Error::DuplicateRegistrationConflict`].
    pub fn register_shape(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        shape: TypeShape,
    ) -> Result<TypeIndex> {
        let name = name.into();
        self.insert(TypeKey::Named(name.clone()), name, shape)
    }

    fn insert(
        &mut self,
        key: TypeKey,
        name: Cow<'static, str>,
        shape: TypeShape,
    ) -> Result<TypeIndex> {
        if let Some(&index) = self.registry.keys.get(&key) {
            if self.registry.shapes[index.get()] == shape {
                return Ok(index);
            }
            return Err(Error::DuplicateRegistrationConflict { name: name.into_owned(), index });
        }

        validate_shape(&name, &shape)?;

        let index = self.registry.descriptors.len();
        let index = TypeIndex(index.try_into().expect("too many component types registered"));
        self.registry.descriptors.push(ComponentTypeDescriptor {
            index,
            size_in_chunk: shape.size_in_chunk(),
            value_size: shape.size,
            align: shape.column_align(),
            category: shape.category,
            managed: shape.managed,
        });
        self.registry.shapes.push(shape);
        self.registry.names.push(name);
        self.registry.keys.insert(key, index);

        log::debug!("Registered component type {} as {index:?}", self.registry.name(index));
        Ok(index)
    }

    /// Freezes the registry.
    pub fn build(self) -> Arc<TypeRegistry> { Arc::new(self.registry) }
}

fn validate_shape(name: &str, shape: &TypeShape) -> Result<()> {
    let reject = |reason| Err(Error::UnsupportedLayout { name: name.to_string(), reason });

    if !shape.align.is_power_of_two() {
        return reject("alignment must be a power of two");
    }
    if shape.align.small_int::<usize>() > MAX_COMPONENT_ALIGN {
        return reject("alignment exceeds the chunk buffer alignment");
    }
    if shape.size % shape.align != 0 {
        return reject("size must be a multiple of alignment");
    }

    match shape.category {
        Category::Tag if shape.size != 0 => return reject("tags must be zero-sized"),
        Category::Tag | Category::Buffer => {}
        _ if shape.size == 0 && !shape.managed => {
            return reject("zero-sized components must be tags");
        }
        _ => {}
    }

    if shape.managed && shape.category != Category::Regular {
        return reject("only regular components can be managed");
    }

    let usable = CHUNK_SIZE - CHUNK_HEADER_SIZE - std::mem::size_of::<Entity>();
    let footprint: usize = match shape.category {
        Category::Chunk | Category::Shared => shape.size.small_int(),
        _ => shape.size_in_chunk().small_int(),
    };
    if footprint > usable {
        return reject("component does not fit in a chunk");
    }

    Ok(())
}
