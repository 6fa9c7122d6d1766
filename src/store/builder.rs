use std::sync::Arc;

use super::EntityComponentStore;
use crate::comp::TypeRegistry;
use crate::tracer::{self, Tracer};

/// The default upper bound of live entities in one store.
pub const DEFAULT_MAX_ENTITIES: usize = u32::MAX as usize;

/// Configures and constructs an [`EntityComponentStore`].
pub struct Builder {
    pub(crate) registry:        Arc<TypeRegistry>,
    pub(crate) tracer:          Box<dyn Tracer>,
    pub(crate) entity_capacity: usize,
    pub(crate) max_entities:    usize,
    pub(crate) validation:      bool,
}

impl Builder {
    /// Creates a builder for a store of the component types in `registry`.
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            tracer: Box::new(tracer::Noop),
            entity_capacity: 0,
            max_entities: DEFAULT_MAX_ENTITIES,
            validation: default_validation(),
        }
    }

    /// Sets the tracer receiving store events.
    pub fn tracer(mut self, tracer: impl Tracer + 'static) -> Self {
        self.tracer = Box::new(tracer);
        self
    }

    /// Reserves entity table slots up front.
    pub fn entity_capacity(mut self, capacity: usize) -> Self {
        self.entity_capacity = capacity;
        self
    }

    /// Sets the maximum number of live entities.
    /// Creating more entities than this is a fatal error.
    pub fn max_entities(mut self, max: usize) -> Self {
        self.max_entities = max;
        self
    }

    /// Enables or disables eager validation of debug-only invariants,
    /// such as singleton cardinality on the fast path.
    pub fn validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Constructs the store.
    pub fn build(self) -> EntityComponentStore { EntityComponentStore::from_builder(self) }
}

cfg_if::cfg_if! {
    if #[cfg(debug_assertions)] {
        fn default_validation() -> bool { cfg!(feature = "debug-validation") }
    } else {
        fn default_validation() -> bool { cfg!(feature = "release-validation") }
    }
}
