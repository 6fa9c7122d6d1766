use std::time::Duration;

use parking_lot::{Condvar, Mutex};

const DEADLOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Blocks until a fixed number of threads are waiting at the same time.
///
/// Used to assert that jobs run concurrently instead of one blocking the other:
/// if fewer than `saturation` threads ever arrive, the waiters panic after a timeout.
#[derive(Debug)]
pub struct AntiSemaphore {
    saturation: usize,
    waiting:    Mutex<usize>,
    condvar:    Condvar,
}

impl AntiSemaphore {
    pub fn new(saturation: usize) -> Self {
        Self { saturation, waiting: Mutex::new(0), condvar: Condvar::new() }
    }

    /// Blocks until `saturation` threads are waiting.
    ///
    /// # Panics
    /// Panics if the semaphore is not saturated within the timeout.
    pub fn wait(&self) {
        let mut waiting = self.waiting.lock();
        *waiting += 1;
        log::trace!("AntiSemaphore: {}/{} waiting", *waiting, self.saturation);
        assert!(*waiting <= self.saturation, "AntiSemaphore exceeded saturation");

        if *waiting == self.saturation {
            *waiting = 0;
            self.condvar.notify_all();
            return;
        }

        if self.condvar.wait_for(&mut waiting, DEADLOCK_TIMEOUT).timed_out() {
            panic!("Deadlock: AntiSemaphore not saturated within {DEADLOCK_TIMEOUT:?}");
        }
    }
}

/// A one-shot gate that holds jobs pending until a test opens it.
#[derive(Debug, Default)]
pub struct Latch {
    open:    Mutex<bool>,
    condvar: Condvar,
}

impl Latch {
    /// Releases every current and future waiter.
    pub fn open(&self) {
        *self.open.lock() = true;
        self.condvar.notify_all();
    }

    /// Blocks until the latch is opened.
    ///
    /// # Panics
    /// Panics if the latch is not opened within the timeout.
    pub fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            if self.condvar.wait_for(&mut open, DEADLOCK_TIMEOUT).timed_out() {
                panic!("Deadlock: Latch not opened within {DEADLOCK_TIMEOUT:?}");
            }
        }
    }
}
