use crate::job::WorkerId;
use portable_atomic::{AtomicU8, AtomicU64, Ordering};

/// Lifecycle state of a single worker.
///
/// A worker cycles between [`WorkerState::Advertising`] and
/// [`WorkerState::Processing`] until it observes a stop signal while
/// advertising, after which it is [`WorkerState::Stopped`] for good.
///
/// - [`WorkerState::Starting`]: the thread is spawned but has not advertised
///   yet.
/// - [`WorkerState::Advertising`]: the worker's slot is (or is about to be) in
///   the pool and it is waiting for a job or a stop signal.
/// - [`WorkerState::Processing`]: the worker is running a job. It never
///   advertises in this state and only observes a stop signal once the job is
///   done.
/// - [`WorkerState::Stopped`]: terminal; the thread has exited or is exiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WorkerState {
    Starting = 0,
    Advertising = 1,
    Processing = 2,
    Stopped = 3,
}

impl WorkerState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Starting,
            1 => Self::Advertising,
            2 => Self::Processing,
            _ => Self::Stopped,
        }
    }
}

/// How a worker thread ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// The worker observed shutdown and returned normally.
    Stopped,
    /// The worker thread unwound outside of any task. Its slot was lost to
    /// the pool from that point on.
    Panicked(String),
}

/// Summary returned for each worker when the dispatcher is joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker_id: WorkerId,
    /// Jobs this worker received and ran to completion (successfully or not).
    pub jobs_processed: u64,
    pub exit: WorkerExit,
}

/// Per-worker state shared between the worker thread and the dispatcher.
#[derive(Debug)]
pub(crate) struct WorkerCell {
    #[cfg(feature = "cache-padded")]
    state: crossbeam_utils::CachePadded<AtomicU8>,
    #[cfg(not(feature = "cache-padded"))]
    state: AtomicU8,
    processed: AtomicU64,
}

impl WorkerCell {
    pub(crate) fn new() -> Self {
        let state = AtomicU8::new(WorkerState::Starting as u8);
        Self {
            #[cfg(feature = "cache-padded")]
            state: crossbeam_utils::CachePadded::new(state),
            #[cfg(not(feature = "cache-padded"))]
            state,
            processed: AtomicU64::new(0),
        }
    }

    pub(crate) fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }
}
