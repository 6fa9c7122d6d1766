//! Completion tokens for asynchronous jobs.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

type Continuation = Box<dyn FnOnce() + Send>;

struct State {
    inner:   Mutex<Inner>,
    condvar: Condvar,
}

#[derive(Default)]
struct Inner {
    completed:     bool,
    continuations: Vec<Continuation>,
}

/// A cloneable token that completes when a job finishes.
///
/// The default handle is already complete.
#[derive(Clone, Default)]
pub struct JobHandle {
    state: Option<Arc<State>>,
}

impl JobHandle {
    /// A handle that is already complete.
    pub fn completed() -> Self { Self { state: None } }

    /// Creates an incomplete handle and the [`Completer`] that completes it.
    pub fn pending() -> (Self, Completer) {
        let state =
            Arc::new(State { inner: Mutex::new(Inner::default()), condvar: Condvar::new() });
        (Self { state: Some(Arc::clone(&state)) }, Completer { state: Some(state) })
    }

    /// Returns a handle that completes when all `handles` have completed.
    pub fn combine(handles: impl IntoIterator<Item = JobHandle>) -> Self {
        let mut pending: Vec<_> =
            handles.into_iter().filter(|handle| !handle.is_completed()).collect();
        pending.dedup_by(|a, b| a.ptr_eq(b));

        match pending.len() {
            0 => Self::completed(),
            1 => pending.pop().expect("len == 1"),
            count => {
                let (combined, completer) = Self::pending();
                let join = Arc::new(Join {
                    remaining: AtomicUsize::new(count),
                    completer: Mutex::new(Some(completer)),
                });
                for handle in pending {
                    let join = Arc::clone(&join);
                    handle.on_complete(move || {
                        if join.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                            join.completer.lock().take();
                        }
                    });
                }
                combined
            }
        }
    }

    /// Whether the job has finished.
    pub fn is_completed(&self) -> bool {
        match &self.state {
            None => true,
            Some(state) => state.inner.lock().completed,
        }
    }

    /// Blocks the calling thread until the job has finished.
    pub fn complete(&self) {
        let Some(state) = &self.state else { return };

        let mut inner = state.inner.lock();
        while !inner.completed {
            state.condvar.wait(&mut inner);
        }
    }

    /// Runs `f` once the job has finished.
    ///
    /// If the job is already finished, `f` runs immediately on the calling thread.
    /// Otherwise it runs on the thread that completes the job.
    pub fn on_complete(&self, f: impl FnOnce() + Send + 'static) {
        if let Some(state) = &self.state {
            let mut inner = state.inner.lock();
            if !inner.completed {
                inner.continuations.push(Box::new(f));
                return;
            }
        }

        f();
    }

    /// Whether two handles refer to the same job.
    pub fn ptr_eq(&self, other: &JobHandle) -> bool {
        match (&self.state, &other.state) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle").field("completed", &self.is_completed()).finish()
    }
}

struct Join {
    remaining: AtomicUsize,
    completer: Mutex<Option<Completer>>,
}

/// Completes the associated [`JobHandle`] when dropped.
///
/// Dropping the completer without calling [`complete`](Self::complete),
/// for example when a job panics, still completes the handle,
/// so waiters are never blocked forever.
pub struct Completer {
    state: Option<Arc<State>>,
}

impl Completer {
    /// Marks the job as finished.
    pub fn complete(self) { drop(self) }
}

impl Drop for Completer {
    fn drop(&mut self) {
        let Some(state) = self.state.take() else { return };

        let continuations = {
            let mut inner = state.inner.lock();
            inner.completed = true;
            std::mem::take(&mut inner.continuations)
        };
        state.condvar.notify_all();

        for continuation in continuations {
            continuation();
        }
    }
}
