//! Runs jobs once their dependencies have completed.

use std::sync::Arc;

use super::JobHandle;

/// A job body.
pub type Job = Box<dyn FnOnce() + Send>;

/// Executes jobs after a dependency completes.
pub trait JobScheduler: Send + Sync {
    /// Schedules `job` to run after `dependency` completes,
    /// returning a handle that completes after `job` returns.
    fn schedule(&self, dependency: JobHandle, job: Job) -> JobHandle;
}

/// Runs jobs on a rayon thread pool.
///
/// Jobs are only submitted to the pool once their dependency completes,
/// so worker threads never block on dependencies.
#[derive(Clone)]
pub struct ThreadPool {
    pool: Arc<rayon::ThreadPool>,
}

impl ThreadPool {
    /// Creates a pool with `concurrency` worker threads.
    pub fn new(concurrency: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency)
            .thread_name(|i| format!("archstore worker #{}", i))
            .build()
            .expect("Failed to create thread pool");
        Self { pool: Arc::new(pool) }
    }

    /// Wraps an existing rayon thread pool.
    pub fn from_rayon(pool: Arc<rayon::ThreadPool>) -> Self { Self { pool } }
}

impl JobScheduler for ThreadPool {
    fn schedule(&self, dependency: JobHandle, job: Job) -> JobHandle {
        let (handle, completer) = JobHandle::pending();
        let pool = Arc::clone(&self.pool);
        dependency.on_complete(move || {
            pool.spawn(move || {
                job();
                completer.complete();
            })
        });
        handle
    }
}

/// Runs jobs synchronously on the scheduling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl JobScheduler for Immediate {
    fn schedule(&self, dependency: JobHandle, job: Job) -> JobHandle {
        dependency.complete();
        job();
        JobHandle::completed()
    }
}
