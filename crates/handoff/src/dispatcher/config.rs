use crate::error::{Error, Result};
use crate::handler::TaskFailure;
use crossbeam_channel::Sender;

/// Default prefix for worker thread names. Threads are named
/// `{prefix}-{index}`.
pub const DEFAULT_THREAD_NAME: &str = "handoff-worker";

/// Settings used to start a [`Dispatcher`].
///
/// The worker count is the only required setting; it is fixed for the
/// lifetime of the dispatcher.
///
/// # Example
/// ```
/// use handoff::DispatcherConfig;
///
/// let (failures_tx, failures_rx) = crossbeam_channel::bounded(64);
/// let config = DispatcherConfig::new(4)
///     .thread_name("chores")
///     .stack_size(256 * 1024)
///     .failure_sink(failures_tx);
/// assert_eq!(config.workers(), 4);
/// # drop(failures_rx);
/// ```
///
/// [`Dispatcher`]: crate::Dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub(crate) workers: usize,
    pub(crate) thread_name: String,
    pub(crate) stack_size: Option<usize>,
    pub(crate) failure_sink: Option<Sender<TaskFailure>>,
}

impl DispatcherConfig {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            thread_name: String::from(DEFAULT_THREAD_NAME),
            stack_size: None,
            failure_sink: None,
        }
    }

    /// Sets the prefix used to name worker threads.
    pub fn thread_name(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name = prefix.into();
        self
    }

    /// Sets the stack size, in bytes, of each worker thread. Defaults to the
    /// platform's default for spawned threads.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Sends a [`TaskFailure`] to `sink` for every job whose handler returns
    /// an error or panics.
    ///
    /// Workers never block on the sink: when a bounded sink is full, or its
    /// receiver is gone, the report is dropped. Failures are always counted
    /// in [`DispatcherStats::failed`].
    ///
    /// [`DispatcherStats::failed`]: crate::DispatcherStats::failed
    pub fn failure_sink(mut self, sink: Sender<TaskFailure>) -> Self {
        self.failure_sink = Some(sink);
        self
    }

    pub const fn workers(&self) -> usize {
        self.workers
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfiguration {
                reason: String::from("worker count must be greater than 0"),
            });
        }

        if self.thread_name.is_empty() {
            return Err(Error::InvalidConfiguration {
                reason: String::from("worker thread name prefix must not be empty"),
            });
        }

        Ok(())
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::new(1)
    }
}
