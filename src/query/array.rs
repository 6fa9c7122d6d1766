use std::sync::Arc;

use parking_lot::Mutex;

use crate::comp::TypeIndex;
use crate::dependency::{DependencyManager, JobHandle, JobScheduler};

/// An array assembled by a scheduled job.
///
/// The contents are only available once [`handle`](Self::handle) completes.
#[derive(Debug)]
pub struct AsyncArray<T> {
    handle: JobHandle,
    output: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone + Send + 'static> AsyncArray<T> {
    /// Schedules a job that concatenates `blocks`,
    /// registered as a reader of `reads`.
    pub(crate) fn schedule(
        dependencies: &mut DependencyManager,
        scheduler: &dyn JobScheduler,
        reads: &[TypeIndex],
        blocks: Vec<Box<[T]>>,
    ) -> Self {
        let output = Arc::new(Mutex::new(Vec::new()));
        let job_output = Arc::clone(&output);
        let handle = dependencies.schedule(scheduler, reads, &[], move || {
            *job_output.lock() = blocks.concat();
        });
        Self { handle, output }
    }
}

impl<T> AsyncArray<T> {
    /// The handle of the assembling job.
    pub fn handle(&self) -> &JobHandle { &self.handle }

    /// Whether the array is ready.
    pub fn is_completed(&self) -> bool { self.handle.is_completed() }

    /// Blocks until the job has finished and returns the array.
    pub fn complete(self) -> Vec<T> {
        self.handle.complete();
        std::mem::take(&mut *self.output.lock())
    }
}
