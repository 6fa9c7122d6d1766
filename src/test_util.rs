//! Shared fixtures for unit tests and benchmarks.

use std::sync::Arc;

use parking_lot::{Mutex, Once};

use crate::archetype::ArchetypeId;
use crate::chunk::ChunkId;
use crate::comp::{self, TypeIndex, TypeRegistry};
use crate::entity::Entity;
use crate::query::QueryId;
use crate::store::{self, EntityComponentStore};
use crate::tracer::{self, Tracer};

mod sync;
pub use sync::{AntiSemaphore, Latch};

pub(crate) fn init() {
    static SET_LOGGER_ONCE: Once = Once::new();
    SET_LOGGER_ONCE.call_once(env_logger::init);
}

/// A regular component.
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable, comp::Component)]
#[component(archstore_as(crate))]
#[repr(C)]
pub struct Position(pub [f32; 2]);

/// A regular component.
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable, comp::Component)]
#[component(archstore_as(crate))]
#[repr(C)]
pub struct Velocity(pub [f32; 2]);

/// A regular component with a different size from the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable, comp::Component)]
#[component(archstore_as(crate))]
#[repr(C)]
pub struct Health(pub u32);

/// A tag.
#[derive(Debug, comp::Component)]
#[component(tag, archstore_as(crate))]
pub struct Frozen;

/// A shared component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable, comp::Component)]
#[component(shared, archstore_as(crate))]
#[repr(C)]
pub struct Team(pub u32);

/// A chunk component.
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable, comp::Component)]
#[component(chunk, archstore_as(crate))]
#[repr(C)]
pub struct Bounds(pub [f32; 4]);

/// A buffer element.
#[derive(Debug, Clone, Copy, PartialEq, comp::Component)]
#[component(buffer, archstore_as(crate))]
pub struct Waypoint(pub [f32; 2]);

/// A managed component.
#[derive(Debug, Clone, PartialEq, Eq, comp::Component)]
#[component(managed, archstore_as(crate))]
pub struct Name(pub String);

/// The indices of the test component types.
#[derive(Debug, Clone, Copy)]
pub struct TestTypes {
    pub position: TypeIndex,
    pub velocity: TypeIndex,
    pub health:   TypeIndex,
    pub frozen:   TypeIndex,
    pub team:     TypeIndex,
    pub bounds:   TypeIndex,
    pub waypoint: TypeIndex,
    pub name:     TypeIndex,
}

/// Registers every test component type.
pub fn registry() -> (Arc<TypeRegistry>, TestTypes) {
    let mut builder = comp::registry::Builder::new();
    let types = TestTypes {
        position: builder.register::<Position>().expect("register Position"),
        velocity: builder.register::<Velocity>().expect("register Velocity"),
        health:   builder.register::<Health>().expect("register Health"),
        frozen:   builder.register::<Frozen>().expect("register Frozen"),
        team:     builder.register::<Team>().expect("register Team"),
        bounds:   builder.register::<Bounds>().expect("register Bounds"),
        waypoint: builder.register::<Waypoint>().expect("register Waypoint"),
        name:     builder.register::<Name>().expect("register Name"),
    };
    (builder.build(), types)
}

/// Creates a store with every test component type and validation enabled.
pub fn store() -> (EntityComponentStore, TestTypes) {
    let (registry, types) = registry();
    let store = store::builder(registry).validation(true).build();
    (store, types)
}

/// Creates a store whose tracer records into the returned [`EventLog`]
/// and logs every event at trace level.
pub fn traced_store() -> (EntityComponentStore, TestTypes, EventLog) {
    let (registry, types) = registry();
    let log = EventLog::default();
    let tracer = tracer::Aggregate((log.clone(), tracer::Log(log::Level::Trace)));
    let store = store::builder(registry).validation(true).tracer(tracer).build();
    (store, types, log)
}

/// A tracer event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CreateArchetype(ArchetypeId),
    AllocateChunk(ArchetypeId, ChunkId),
    FreeChunk(ArchetypeId, ChunkId),
    CreateEntity(Entity),
    DestroyEntity(Entity),
    MoveEntity(Entity, ArchetypeId, ArchetypeId),
    CreateQuery(QueryId),
    RebuildChunkCache(QueryId, usize),
    CompleteDependency,
}

/// Records tracer events for later assertions.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventLog {
    fn push(&self, event: Event) { self.events.lock().push(event); }

    /// Removes and returns the events recorded so far.
    pub fn take(&self) -> Vec<Event> { std::mem::take(&mut *self.events.lock()) }

    /// Number of recorded events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().iter().filter(|event| predicate(event)).count()
    }
}

impl Tracer for EventLog {
    fn create_archetype(&self, archetype: ArchetypeId, _: &[TypeIndex]) {
        self.push(Event::CreateArchetype(archetype));
    }

    fn allocate_chunk(&self, archetype: ArchetypeId, chunk: ChunkId, _: u32) {
        self.push(Event::AllocateChunk(archetype, chunk));
    }

    fn free_chunk(&self, archetype: ArchetypeId, chunk: ChunkId) {
        self.push(Event::FreeChunk(archetype, chunk));
    }

    fn create_entity(&self, entity: Entity, _: ArchetypeId) {
        self.push(Event::CreateEntity(entity));
    }

    fn destroy_entity(&self, entity: Entity, _: ArchetypeId) {
        self.push(Event::DestroyEntity(entity));
    }

    fn move_entity(&self, entity: Entity, from: ArchetypeId, to: ArchetypeId) {
        self.push(Event::MoveEntity(entity, from, to));
    }

    fn create_query(&self, query: QueryId, _: usize) { self.push(Event::CreateQuery(query)); }

    fn rebuild_chunk_cache(&self, query: QueryId, _: u32, chunks: usize) {
        self.push(Event::RebuildChunkCache(query, chunks));
    }

    fn complete_dependency(&self, _: &[TypeIndex], _: &[TypeIndex]) {
        self.push(Event::CompleteDependency);
    }
}
