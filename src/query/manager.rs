//! Shared per-descriptor query data.
//!
//! Each distinct descriptor list has one [`QueryData`],
//! holding the append-only list of matching archetypes
//! and a chunk cache that is rebuilt lazily after structural changes.

use indexmap::IndexMap;
use xias::Xias;

use super::{AccessMode, ComponentType, EntityQueryDesc, QueryId, QueryOptions};
use crate::archetype::{Archetype, ArchetypeId};
use crate::chunk::ChunkId;
use crate::comp::TypeIndex;
use crate::tracer::Tracer;

/// A chunk of a matching archetype, as stored in the chunk cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CachedChunk {
    pub(crate) chunk:          ChunkId,
    pub(crate) archetype:      ArchetypeId,
    /// Position of the archetype in the matching archetype list.
    pub(crate) matching_index: usize,
}

#[derive(Debug, Default)]
struct ChunkCache {
    entries:       Vec<CachedChunk>,
    order_version: u32,
    valid:         bool,
}

/// The All/Any/None predicate of one descriptor.
#[derive(Debug)]
struct Predicate {
    all:     Box<[TypeIndex]>,
    any:     Box<[TypeIndex]>,
    none:    Box<[TypeIndex]>,
    options: QueryOptions,
}

impl Predicate {
    fn new(desc: &EntityQueryDesc) -> Self {
        fn indices(types: &[ComponentType]) -> Box<[TypeIndex]> {
            types.iter().map(|ty| ty.index).collect()
        }

        Self {
            all:     indices(desc.all()),
            any:     indices(desc.any()),
            none:    indices(desc.none()),
            options: desc.options(),
        }
    }

    fn matches(&self, types: &[TypeIndex]) -> bool {
        let has = |ty: &TypeIndex| types.binary_search(ty).is_ok();

        if !self.all.iter().all(has) {
            return false;
        }
        if !self.any.is_empty() && !self.any.iter().any(has) {
            return false;
        }
        if self.none.iter().any(has) {
            return false;
        }

        let named = |ty: TypeIndex| self.all.contains(&ty) || self.any.contains(&ty);
        for (tag, option) in [
            (TypeIndex::PREFAB, QueryOptions::INCLUDE_PREFAB),
            (TypeIndex::DISABLED, QueryOptions::INCLUDE_DISABLED),
        ] {
            if has(&tag) && !named(tag) && !self.options.contains(option) {
                return false;
            }
        }

        true
    }
}

/// The data shared by all [`EntityQuery`](super::EntityQuery) handles of one descriptor list.
#[derive(Debug)]
pub(crate) struct QueryData {
    /// An archetype matches if any predicate accepts it.
    predicates:          Box<[Predicate]>,
    /// Types in the `all` list of every descriptor, sorted.
    /// Every matching archetype contains them.
    pub(crate) required: Box<[TypeIndex]>,
    pub(crate) reads:    Box<[TypeIndex]>,
    pub(crate) writes:   Box<[TypeIndex]>,
    /// Matching archetypes in the order they were matched. Never shrinks.
    pub(crate) matching: Vec<ArchetypeId>,
    cache:               ChunkCache,
}

impl QueryData {
    fn new(descs: &[EntityQueryDesc]) -> Self {
        fn with_access(descs: &[EntityQueryDesc], access: AccessMode) -> Box<[TypeIndex]> {
            let mut types: Vec<_> = descs
                .iter()
                .flat_map(|desc| desc.all().iter().chain(desc.any()))
                .filter(|ty| ty.access == access)
                .map(|ty| ty.index)
                .collect();
            types.sort_unstable();
            types.dedup();
            types.into_boxed_slice()
        }

        let predicates: Box<[Predicate]> = descs.iter().map(Predicate::new).collect();
        let required = match predicates.split_first() {
            Some((first, rest)) => first
                .all
                .iter()
                .copied()
                .filter(|ty| rest.iter().all(|predicate| predicate.all.contains(ty)))
                .collect(),
            None => Box::default(),
        };

        // a type written by one descriptor and read by another is only listed as written
        let writes = with_access(descs, AccessMode::ReadWrite);
        let reads = with_access(descs, AccessMode::ReadOnly)
            .iter()
            .copied()
            .filter(|ty| writes.binary_search(ty).is_err())
            .collect();

        Self {
            predicates,
            required,
            reads,
            writes,
            matching: Vec::new(),
            cache: ChunkCache::default(),
        }
    }

    /// Whether any predicate accepts an archetype with the sorted `types`.
    pub(crate) fn matches_types(&self, types: &[TypeIndex]) -> bool {
        self.predicates.iter().any(|predicate| predicate.matches(types))
    }

    /// Whether the query is a single descriptor requiring exactly one type and nothing else.
    pub(crate) fn is_single_type(&self) -> bool {
        match &self.predicates[..] {
            [predicate] => {
                predicate.all.len() == 1 && predicate.any.is_empty() && predicate.none.is_empty()
            }
            _ => false,
        }
    }

    /// The chunk cache. Only current after [`Manager::refresh`].
    pub(crate) fn cached_chunks(&self) -> &[CachedChunk] { &self.cache.entries }
}

/// Deduplicates query descriptors and maintains their matching archetypes.
#[derive(Debug, Default)]
pub(crate) struct Manager {
    /// Keyed by the list of normalized descriptors. The map index is the [`QueryId`].
    queries: IndexMap<Box<[EntityQueryDesc]>, QueryData>,
}

impl Manager {
    /// Returns the id of the query data for `descs`, creating it if necessary.
    ///
    /// Every descriptor must already be validated.
    pub(crate) fn get_or_create(
        &mut self,
        descs: Box<[EntityQueryDesc]>,
        archetypes: &mut IndexMap<Box<[TypeIndex]>, Archetype>,
        tracer: &dyn Tracer,
    ) -> QueryId {
        if let Some(index) = self.queries.get_index_of(&descs) {
            return QueryId(index.small_int());
        }

        let id = QueryId(self.queries.len().small_int());
        let mut data = QueryData::new(&descs);
        for archetype in archetypes.values_mut() {
            if data.matches_types(archetype.types()) {
                data.matching.push(archetype.id());
                archetype.set_matches_query(id);
            }
        }

        log::debug!("Created {id:?} for {descs:?}, matching {} archetypes", data.matching.len());
        tracer.create_query(id, data.matching.len());

        self.queries.insert(descs, data);
        id
    }

    /// Tests a newly created archetype against every query.
    pub(crate) fn on_archetype_created(&mut self, archetype: &mut Archetype) {
        for (index, data) in self.queries.values_mut().enumerate() {
            if data.matches_types(archetype.types()) {
                data.matching.push(archetype.id());
                data.cache.valid = false;
                archetype.set_matches_query(QueryId(index.small_int()));
            }
        }
    }

    /// Callers check that the query handle belongs to this store first.
    fn entry(&self, id: QueryId) -> (&[EntityQueryDesc], &QueryData) {
        let (descs, data) = self.queries.get_index(id.get()).expect("query ids are issued here");
        (&descs[..], data)
    }

    pub(crate) fn data(&self, id: QueryId) -> &QueryData { self.entry(id).1 }

    pub(crate) fn descs(&self, id: QueryId) -> &[EntityQueryDesc] { self.entry(id).0 }

    /// Number of distinct descriptors.
    pub(crate) fn len(&self) -> usize { self.queries.len() }

    /// Rebuilds the chunk cache of a query if it is invalid or older than `order_version`.
    pub(crate) fn refresh(
        &mut self,
        id: QueryId,
        archetypes: &IndexMap<Box<[TypeIndex]>, Archetype>,
        order_version: u32,
        tracer: &dyn Tracer,
    ) {
        let (_, data) = self.queries.get_index_mut(id.get()).expect("query ids are issued here");
        let cache = &mut data.cache;
        if cache.valid && cache.order_version == order_version {
            return;
        }

        cache.entries.clear();
        for (matching_index, &archetype) in data.matching.iter().enumerate() {
            let (_, archetype_data) = archetypes
                .get_index(archetype.get())
                .expect("matching archetypes are never removed");
            cache.entries.extend(archetype_data.chunks().iter().map(|&chunk| CachedChunk {
                chunk,
                archetype,
                matching_index,
            }));
        }
        cache.order_version = order_version;
        cache.valid = true;

        log::trace!("Rebuilt chunk cache of {id:?} with {} chunks", cache.entries.len());
        tracer.rebuild_chunk_cache(id, order_version, cache.entries.len());
    }
}
