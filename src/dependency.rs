//! Tracks asynchronous jobs that read or write component types.
//!
//! The store itself is not synchronized.
//! Jobs declare the component types they read and write,
//! and the [`DependencyManager`] orders them:
//! a new job depends on the last writer of every type it touches,
//! and a new writer also depends on every outstanding reader of the types it writes.
//! Structural changes are rejected while any job is still pending.
//!
//! Jobs are `'static` and never borrow chunk memory.
//! Chunk access happens on the thread owning the store after completing the dependencies,
//! as in `EntityQuery::par_for_each_chunk_mut`;
//! asynchronous query arrays hand their jobs copies of the columns.

use crate::comp::TypeIndex;
use crate::{Error, Result};

mod handle;
pub use handle::{Completer, JobHandle};

mod scheduler;
pub use scheduler::{Immediate, Job, JobScheduler, ThreadPool};

#[cfg(test)]
mod tests;

#[derive(Debug, Default, Clone)]
struct TypeDeps {
    writer:  JobHandle,
    readers: Vec<JobHandle>,
}

impl TypeDeps {
    fn prune(&mut self) {
        self.readers.retain(|reader| !reader.is_completed());
        if self.writer.is_completed() {
            self.writer = JobHandle::completed();
        }
    }
}

/// Records, per component type, the outstanding jobs that read or write it.
#[derive(Debug, Default)]
pub struct DependencyManager {
    types: Vec<TypeDeps>,
}

impl DependencyManager {
    /// Creates a manager for a registry of `type_count` types.
    pub fn new(type_count: usize) -> Self {
        Self { types: vec![TypeDeps::default(); type_count] }
    }

    fn deps(&self, ty: TypeIndex) -> Option<&TypeDeps> { self.types.get(ty.get()) }

    fn deps_mut(&mut self, ty: TypeIndex) -> &mut TypeDeps {
        if self.types.len() <= ty.get() {
            self.types.resize(ty.get() + 1, TypeDeps::default());
        }
        &mut self.types[ty.get()]
    }

    /// Returns a handle that completes once it is safe to read `reads` and write `writes`.
    pub fn get_dependency(&self, reads: &[TypeIndex], writes: &[TypeIndex]) -> JobHandle {
        let read_deps =
            reads.iter().filter_map(|&ty| self.deps(ty)).map(|deps| deps.writer.clone());
        let write_deps = writes.iter().filter_map(|&ty| self.deps(ty)).flat_map(|deps| {
            std::iter::once(deps.writer.clone()).chain(deps.readers.iter().cloned())
        });
        JobHandle::combine(read_deps.chain(write_deps))
    }

    /// Registers `handle` as a job reading `reads` and writing `writes`.
    ///
    /// The job must have been scheduled after [`get_dependency`](Self::get_dependency)
    /// for the same types.
    pub fn add_dependency(
        &mut self,
        reads: &[TypeIndex],
        writes: &[TypeIndex],
        handle: JobHandle,
    ) {
        if handle.is_completed() {
            return;
        }

        for &ty in reads {
            if writes.contains(&ty) {
                continue;
            }
            let deps = self.deps_mut(ty);
            deps.prune();
            deps.readers.push(handle.clone());
        }
        for &ty in writes {
            let deps = self.deps_mut(ty);
            deps.writer = handle.clone();
            deps.readers.clear();
        }
    }

    /// Schedules `job` on `scheduler` after the jobs it conflicts with,
    /// and registers it for the given types.
    pub fn schedule(
        &mut self,
        scheduler: &dyn JobScheduler,
        reads: &[TypeIndex],
        writes: &[TypeIndex],
        job: impl FnOnce() + Send + 'static,
    ) -> JobHandle {
        let dependency = self.get_dependency(reads, writes);
        let handle = scheduler.schedule(dependency, Box::new(job));
        self.add_dependency(reads, writes, handle.clone());
        handle
    }

    /// Blocks until no job is writing `ty`.
    pub fn complete_read_dependency(&self, ty: TypeIndex) {
        if let Some(deps) = self.deps(ty) {
            deps.writer.complete();
        }
    }

    /// Blocks until no job is reading or writing `ty`.
    pub fn complete_write_dependency(&self, ty: TypeIndex) {
        if let Some(deps) = self.deps(ty) {
            deps.writer.complete();
            for reader in &deps.readers {
                reader.complete();
            }
        }
    }

    /// Blocks until it is safe to read `reads` and write `writes` on the calling thread.
    pub fn complete_dependencies(&self, reads: &[TypeIndex], writes: &[TypeIndex]) {
        for &ty in reads {
            self.complete_read_dependency(ty);
        }
        for &ty in writes {
            self.complete_write_dependency(ty);
        }
    }

    /// Blocks until every registered job has finished.
    pub fn complete_all(&mut self) {
        for deps in &mut self.types {
            deps.writer.complete();
            for reader in &deps.readers {
                reader.complete();
            }
            deps.prune();
        }
    }

    /// Number of distinct registered jobs that have not finished.
    pub fn pending_job_count(&self) -> usize {
        let mut pending: Vec<&JobHandle> = Vec::new();
        let handles =
            self.types.iter().flat_map(|deps| std::iter::once(&deps.writer).chain(&deps.readers));
        for handle in handles {
            if !handle.is_completed() && !pending.iter().any(|seen| seen.ptr_eq(handle)) {
                pending.push(handle);
            }
        }
        pending.len()
    }

    /// Fails if any registered job has not finished.
    ///
    /// Called before every structural change,
    /// because moving rows would race with jobs reading or writing chunk memory.
    pub fn check_no_pending_jobs(&mut self) -> Result<()> {
        for deps in &mut self.types {
            deps.prune();
        }

        match self.pending_job_count() {
            0 => Ok(()),
            pending => Err(Error::StructuralChangeWithPendingJobs { pending }),
        }
    }

    /// Number of component types tracked.
    pub fn type_count(&self) -> usize { self.types.len() }
}

static_assertions::assert_impl_all!(DependencyManager: Send, Sync);
static_assertions::assert_impl_all!(JobHandle: Send, Sync);
