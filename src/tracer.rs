//! Exposes testing, profiling and tracing capabilities.
//!
//! A [`Tracer`] receives structured events from a store.
//! All methods default to no-op,
//! so implementations only override the events they care about.

use crate::archetype::ArchetypeId;
use crate::chunk::ChunkId;
use crate::comp::TypeIndex;
use crate::entity::Entity;
use crate::query::QueryId;

/// Defines the [`Tracer`] trait and implements it for [`Log`] and [`Aggregate`].
///
/// All tracer method parameters must be [`Copy`].
macro_rules! define_tracer {
    (
        $(
            $(#[$meta:meta])*
            fn $name:ident(&self $(, $arg:ident: $arg_ty:ty)* $(,)?);
        )*
    ) => {
        /// Receives events about structural changes and cache maintenance in a store.
        ///
        /// Can be used for profiling and testing.
        pub trait Tracer: Send + Sync {
            $(
                $(#[$meta])*
                #[allow(unused_variables)]
                fn $name(&self, $($arg: $arg_ty,)*) {}
            )*
        }

        impl Tracer for Log {
            $(
                fn $name(&self, $($arg: $arg_ty,)*) {
                    log::log!(self.0, concat!(stringify!($name), "(", $(
                        stringify!($arg),
                        " = {",
                        stringify!($arg),
                        ":?}, ",
                    )* ")"), $($arg = $arg,)*);
                }
            )*
        }

        impl_tuple_accumulate! {
            @TYPES (T1, T2, T3, T4, T5, T6, T7, T8);
            $(
                @VARS (t1, t2, t3, t4, t5, t6, t7, t8);
                @METHOD {fn $name(&self, $($arg: $arg_ty,)*);}
            )*
        }
    };
}

/// Calls the same method with the same arguments on each of `$var`.
///
/// The argument list is passed as a single token tree
/// so that it is not repeated together with the receivers.
macro_rules! call_each {
    ($name:ident, $args:tt, $($var:ident),*) => {
        $( $var.$name $args; )*
    };
}

macro_rules! impl_tuple {
    (
        @TYPES ($($ty:ident),* $(,)?);
        $(
            @VARS ($($vars:ident),* $(,)?);
            @METHOD {fn $name:ident(&self, $($arg:ident: $arg_ty:ty,)*);}
        )*
    ) => {
        impl<$($ty: Tracer),*> Tracer for Aggregate<($($ty,)*)> {
            $(
                #[allow(unused_variables)]
                fn $name(&self, $($arg: $arg_ty),*) {
                    let Aggregate(($($vars,)*)) = self;
                    call_each!($name, ($($arg),*), $($vars),*);
                }
            )*
        }
    };
}

macro_rules! impl_tuple_accumulate {
    (@TYPES (); $(@VARS (); @METHOD {$($body:tt)*})*) => {
        impl_tuple! {
            @TYPES ();
            $(
                @VARS ();
                @METHOD {$($body)*}
            )*
        }
    };
    (
        @TYPES ($first_ty:ident $(, $rest_ty:ident)* $(,)?);
        $(
            @VARS ($first_var:ident $(, $rest_var:ident)* $(,)?);
            @METHOD {$($body:tt)*}
        )*
    ) => {
        impl_tuple! {
            @TYPES ($first_ty $(, $rest_ty)* );
            $(
                @VARS ($first_var $(, $rest_var)*);
                @METHOD {$($body)*}
            )*
        }

        impl_tuple_accumulate! {
            @TYPES ($($rest_ty),*);
            $(
                @VARS ($($rest_var),*);
                @METHOD {$($body)*}
            )*
        }
    };
}

define_tracer! {
    /// A new archetype was created.
    fn create_archetype(&self, archetype: ArchetypeId, types: &[TypeIndex]);

    /// A chunk was allocated for an archetype.
    fn allocate_chunk(&self, archetype: ArchetypeId, chunk: ChunkId, capacity: u32);

    /// An empty chunk was returned to the pool.
    fn free_chunk(&self, archetype: ArchetypeId, chunk: ChunkId);

    /// An entity was created.
    fn create_entity(&self, entity: Entity, archetype: ArchetypeId);

    /// An entity was destroyed.
    fn destroy_entity(&self, entity: Entity, archetype: ArchetypeId);

    /// An entity was moved to another chunk, possibly of another archetype.
    fn move_entity(&self, entity: Entity, from: ArchetypeId, to: ArchetypeId);

    /// A query was registered for a new descriptor.
    fn create_query(&self, query: QueryId, matching_archetypes: usize);

    /// A query rebuilt its chunk cache after a structural change.
    fn rebuild_chunk_cache(&self, query: QueryId, order_version: u32, chunks: usize);

    /// The store waited for outstanding jobs on some component types.
    fn complete_dependency(&self, reads: &[TypeIndex], writes: &[TypeIndex]);
}

/// An empty tracer.
pub struct Noop;

impl Tracer for Noop {}

/// Groups multiple tracers into a tuple and dispatches each call to them in serial.
pub struct Aggregate<T>(
    /// A tuple of child tracers to execute in serial.
    pub T,
);

/// A tracer that logs all events.
pub struct Log(
    /// The log level to log events with.
    pub log::Level,
);
