use parking_lot::{Condvar, Mutex};
use std::time::Instant;

/// Tracks submitted-but-unfinished jobs.
///
/// Incremented once per submitted job and decremented once per completed job.
/// The count never goes negative and reaches zero only when every submitted
/// job has been fully processed, at which point all waiters are woken.
#[derive(Debug, Default)]
pub(crate) struct CompletionCounter {
    outstanding: Mutex<usize>,
    drained: Condvar,
}

impl CompletionCounter {
    pub(crate) fn new() -> Self {
        Self {
            outstanding: Mutex::new(0),
            drained: Condvar::new(),
        }
    }

    /// Records a newly submitted job.
    pub(crate) fn add(&self) {
        *self.outstanding.lock() += 1;
    }

    /// Records a finished job, waking waiters if none remain.
    ///
    /// # Panics
    /// Panics in debug builds if called more often than [`Self::add`].
    pub(crate) fn done(&self) {
        let mut outstanding = self.outstanding.lock();
        debug_assert!(*outstanding > 0, "completion counter went negative");
        *outstanding = outstanding.saturating_sub(1);
        if *outstanding == 0 {
            self.drained.notify_all();
        }
    }

    /// Current number of outstanding jobs.
    pub(crate) fn outstanding(&self) -> usize {
        *self.outstanding.lock()
    }

    /// Blocks until the count reaches zero.
    pub(crate) fn wait(&self) {
        let mut outstanding = self.outstanding.lock();
        while *outstanding > 0 {
            self.drained.wait(&mut outstanding);
        }
    }

    /// Blocks until the count reaches zero or `deadline` passes.
    ///
    /// Returns `true` if the count reached zero.
    pub(crate) fn wait_until(&self, deadline: Instant) -> bool {
        let mut outstanding = self.outstanding.lock();
        while *outstanding > 0 {
            if self.drained.wait_until(&mut outstanding, deadline).timed_out() {
                return *outstanding == 0;
            }
        }
        true
    }

    pub(crate) fn guard(&self) -> CompletionGuard<'_> {
        CompletionGuard { counter: self }
    }
}

/// Marks one job complete when dropped, including during unwinding.
pub(crate) struct CompletionGuard<'a> {
    counter: &'a CompletionCounter,
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        self.counter.done();
    }
}
