//! The job dispatcher.
//!
//! A [`Dispatcher`] owns a fixed set of worker threads and the pool in which
//! idle workers advertise themselves. Submitting a job claims one advertised
//! worker and hands the job over through that worker's zero-capacity channel,
//! so `submit` returns only once a specific worker has accepted the job.
//!
//! Shutdown is cooperative: workers finish their current job, then stop the
//! next time they would advertise.

mod config;
#[cfg(test)]
mod tests;

pub use config::*;

use crate::{
    counter::CompletionCounter,
    error::{Error, Result},
    handler::{Handler, panic_message},
    job::{Job, WorkerId},
    pool::{AdvertisementPool, ClaimError, Slot},
    stats::{DispatcherStats, Metrics},
    status::{WorkerCell, WorkerExit, WorkerReport, WorkerState},
    worker::{Shared, Worker},
};
use core::fmt;
use core::time::Duration;
use crossbeam_channel::{Sender, bounded};
use parking_lot::Mutex;
use portable_atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// A dynamic worker-pool job dispatcher.
///
/// Workers register themselves as idle; each submitted job goes to exactly
/// one currently idle worker. Which idle worker is picked is unspecified.
///
/// The dispatcher may be shared across threads (for example behind an
/// [`Arc`]) and `submit` may be called concurrently.
///
/// # Lifecycle
///
/// 1. [`Dispatcher::start`] spawns the workers.
/// 2. [`Dispatcher::submit`] hands off jobs, blocking while no worker is idle.
/// 3. [`Dispatcher::await_completion`] waits for submitted jobs to finish.
/// 4. [`Dispatcher::shutdown`] stops the workers; [`Dispatcher::join`] waits
///    for their threads.
///
/// Dropping the dispatcher performs step 4 implicitly.
///
/// # Example
/// ```
/// use handoff::{Dispatcher, Job, handler_fn};
/// use std::sync::atomic::{AtomicU64, Ordering};
/// use std::sync::Arc;
///
/// let total = Arc::new(AtomicU64::new(0));
/// let sum = Arc::clone(&total);
/// let dispatcher = Dispatcher::start(
///     3,
///     handler_fn(move |_worker, job: Job<u64>| {
///         sum.fetch_add(*job.payload(), Ordering::Relaxed);
///         Ok(())
///     }),
/// )?;
///
/// for i in 1..=10 {
///     dispatcher.submit(Job::new(i, i))?;
/// }
///
/// dispatcher.await_completion();
/// dispatcher.shutdown();
/// dispatcher.join();
/// assert_eq!(total.load(Ordering::Relaxed), 55);
/// # Ok::<(), handoff::Error>(())
/// ```
pub struct Dispatcher<P> {
    shared: Arc<Shared<P>>,
    stop_signals: Vec<Sender<()>>,
    cells: Vec<Arc<WorkerCell>>,
    handles: Mutex<Vec<JoinHandle<WorkerReport>>>,
    closed: AtomicBool,
}

impl<P: Send + 'static> Dispatcher<P> {
    /// Starts a dispatcher with `workers` worker threads and default settings.
    ///
    /// Returns once every worker thread has been spawned; workers begin
    /// advertising independently.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfiguration`] if `workers` is 0.
    /// - [`Error::Spawn`] if a worker thread could not be created. Workers
    ///   spawned before the failure are stopped and joined.
    pub fn start<H>(workers: usize, handler: H) -> Result<Self>
    where
        H: Handler<P>,
    {
        Self::with_config(DispatcherConfig::new(workers), handler)
    }

    /// Starts a dispatcher from an explicit [`DispatcherConfig`].
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::start`].
    pub fn with_config<H>(config: DispatcherConfig, handler: H) -> Result<Self>
    where
        H: Handler<P>,
    {
        config.validate()?;

        let workers = config.workers;
        let shared = Arc::new(Shared {
            pool: AdvertisementPool::with_capacity(workers),
            counter: CompletionCounter::new(),
            metrics: Metrics::default(),
            failures: config.failure_sink,
        });
        let handler: Arc<dyn Handler<P>> = Arc::new(handler);

        // Built up in place so that an early return drops (and thereby
        // shuts down and joins) whatever was already spawned.
        let mut dispatcher = Self {
            shared,
            stop_signals: Vec::with_capacity(workers),
            cells: Vec::with_capacity(workers),
            handles: Mutex::new(Vec::with_capacity(workers)),
            closed: AtomicBool::new(false),
        };

        for index in 0..workers {
            let (stop_tx, stop_rx) = bounded(1);
            let cell = Arc::new(WorkerCell::new());
            let worker = Worker::new(
                WorkerId(index),
                stop_rx,
                Arc::clone(&dispatcher.shared),
                Arc::clone(&handler),
                Arc::clone(&cell),
            );

            let mut builder =
                thread::Builder::new().name(format!("{}-{index}", config.thread_name));
            if let Some(bytes) = config.stack_size {
                builder = builder.stack_size(bytes);
            }

            let handle = builder.spawn(move || worker.run()).inspect_err(|_e| {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to spawn worker {index}: {_e}");
            })?;

            dispatcher.stop_signals.push(stop_tx);
            dispatcher.cells.push(cell);
            dispatcher.handles.get_mut().push(handle);
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Dispatcher is running with {workers} workers");

        Ok(dispatcher)
    }

    /// Hands `job` to an idle worker, blocking until one is available.
    ///
    /// Returns once the worker has received the job, not once it has finished
    /// processing it. On error the job is dropped and the completion counter
    /// is left as it was.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DispatcherClosed`] if the dispatcher has been shut
    /// down, including when shutdown happens while this call is waiting.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "trace", skip_all, fields(job_id = %job.id()))
    )]
    pub fn submit(&self, job: Job<P>) -> Result<()> {
        self.ensure_open()?;

        self.shared.counter.add();
        let Some(slot) = self.shared.pool.claim() else {
            self.shared.counter.done();
            return Err(Error::DispatcherClosed);
        };

        self.hand_off(slot, job)
    }

    /// Like [`Dispatcher::submit`], but waits at most `timeout` for a worker
    /// to become idle.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if no worker advertised itself in time.
    /// - [`Error::DispatcherClosed`] as for [`Dispatcher::submit`].
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "trace", skip_all, fields(job_id = %job.id()))
    )]
    pub fn submit_timeout(&self, job: Job<P>, timeout: Duration) -> Result<()> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.submit(job);
        };

        self.ensure_open()?;

        self.shared.counter.add();
        match self.shared.pool.claim_until(deadline) {
            Ok(slot) => self.hand_off(slot, job),
            Err(e) => {
                self.shared.counter.done();
                Err(match e {
                    ClaimError::Closed => Error::DispatcherClosed,
                    ClaimError::TimedOut => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("No idle worker within {timeout:?}");
                        Error::Timeout
                    }
                })
            }
        }
    }

    /// Rendezvous with the claimed worker.
    ///
    /// The worker advertised immediately before blocking on its slot, so
    /// the send completes as soon as the worker is selecting. It fails only
    /// if the worker stopped in the meantime, which requires a shutdown.
    fn hand_off(&self, slot: Slot<Job<P>>, job: Job<P>) -> Result<()> {
        let _worker = slot.worker;
        match slot.handoff.send(job) {
            Ok(()) => {
                self.shared.metrics.record_submitted();
                #[cfg(feature = "tracing")]
                tracing::trace!("Job handed off to worker {_worker}");
                Ok(())
            }
            Err(_) => {
                self.shared.counter.done();
                #[cfg(feature = "tracing")]
                tracing::debug!("Worker {_worker} stopped before accepting a job");
                Err(Error::DispatcherClosed)
            }
        }
    }
}

impl<P> Dispatcher<P> {
    /// Blocks until every submitted job has finished.
    ///
    /// Jobs submitted while waiting extend the wait.
    pub fn await_completion(&self) {
        self.shared.counter.wait();
    }

    /// Waits at most `timeout` for every submitted job to finish.
    ///
    /// Returns `true` if no jobs were outstanding when the wait ended.
    pub fn await_completion_timeout(&self, timeout: Duration) -> bool {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.shared.counter.wait_until(deadline),
            None => {
                self.shared.counter.wait();
                true
            }
        }
    }

    /// Stops accepting work and signals every worker to stop.
    ///
    /// Workers that are processing a job finish it first. Submitters blocked
    /// waiting for a worker are woken and fail with
    /// [`Error::DispatcherClosed`]. Call this after the last submission (and
    /// after [`Dispatcher::await_completion`] if all jobs must finish), then
    /// [`Dispatcher::join`] to wait for the threads. Calling it again is a
    /// no-op.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Stopping {} workers", self.stop_signals.len());

        for (_index, stop) in self.stop_signals.iter().enumerate() {
            // Capacity 1 and a single send: only fails if the worker is gone.
            if stop.try_send(()).is_err() {
                #[cfg(feature = "tracing")]
                tracing::trace!("Worker {_index} already stopped");
            }
        }

        self.shared.pool.close();
    }

    /// Waits for all worker threads to exit and returns one report per
    /// worker, in [`WorkerId`] order.
    ///
    /// Only returns once the workers have stopped, so call
    /// [`Dispatcher::shutdown`] first. A worker thread that unwound is
    /// reported with [`WorkerExit::Panicked`]. Subsequent calls return an
    /// empty list.
    pub fn join(&self) -> Vec<WorkerReport> {
        let handles = core::mem::take(&mut *self.handles.lock());
        handles
            .into_iter()
            .enumerate()
            .map(|(index, handle)| match handle.join() {
                Ok(report) => report,
                Err(payload) => {
                    let msg = panic_message(payload.as_ref());

                    #[cfg(feature = "tracing")]
                    tracing::error!("Worker {index} terminated abnormally: {msg}");

                    let cell = &self.cells[index];
                    cell.set_state(WorkerState::Stopped);
                    WorkerReport {
                        worker_id: WorkerId(index),
                        jobs_processed: cell.processed(),
                        exit: WorkerExit::Panicked(msg),
                    }
                }
            })
            .collect()
    }

    /// Whether [`Dispatcher::shutdown`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn worker_count(&self) -> usize {
        self.cells.len()
    }

    /// Number of submitted jobs that have not finished yet.
    pub fn outstanding(&self) -> usize {
        self.shared.counter.outstanding()
    }

    /// Current state of each worker, indexed by [`WorkerId`].
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.cells.iter().map(|cell| cell.state()).collect()
    }

    pub fn stats(&self) -> DispatcherStats {
        let (advertisements, claims) = self.shared.pool.totals();
        let metrics = &self.shared.metrics;
        DispatcherStats {
            workers: self.shared.pool.capacity(),
            idle: self.shared.pool.idle(),
            processing: self
                .cells
                .iter()
                .filter(|cell| cell.state() == WorkerState::Processing)
                .count(),
            submitted: metrics.submitted(),
            completed: metrics.completed(),
            failed: metrics.failed(),
            outstanding: self.shared.counter.outstanding(),
            advertisements,
            claims,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() || self.shared.pool.is_closed() {
            return Err(Error::DispatcherClosed);
        }
        Ok(())
    }
}

impl<P> fmt::Debug for Dispatcher<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.cells.len())
            .field("outstanding", &self.outstanding())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<P> Drop for Dispatcher<P> {
    fn drop(&mut self) {
        self.shutdown();
        self.join();
    }
}
