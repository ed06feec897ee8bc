use portable_atomic::{AtomicU64, Ordering};

/// Point-in-time view of a dispatcher.
///
/// Fields are sampled one after another without a global lock, so under
/// concurrent activity they may not add up exactly. Counters only grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatcherStats {
    /// Size of the worker set, fixed at start.
    pub workers: usize,
    /// Workers currently advertised in the pool.
    pub idle: usize,
    /// Workers currently running a job.
    pub processing: usize,
    /// Jobs accepted by `submit` (handed off to a worker).
    pub submitted: u64,
    /// Jobs whose handler returned, whatever the outcome.
    pub completed: u64,
    /// Completed jobs whose handler returned an error or panicked.
    pub failed: u64,
    /// Jobs submitted but not yet completed.
    pub outstanding: usize,
    /// Total advertisements published by workers.
    pub advertisements: u64,
    /// Total slots claimed by submitters.
    pub claims: u64,
}

/// Monotonic job counters shared by the dispatcher and its workers.
#[derive(Debug, Default)]
pub(crate) struct Metrics {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Metrics {
    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self, failed: bool) {
        if failed {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub(crate) fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub(crate) fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}
