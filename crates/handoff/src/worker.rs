use crate::{
    counter::CompletionCounter,
    handler::{FailureKind, Handler, TaskFailure, panic_message},
    job::{Job, WorkerId},
    pool::{AdvertisementPool, Slot},
    stats::Metrics,
    status::{WorkerCell, WorkerExit, WorkerReport, WorkerState},
};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// State shared by the dispatcher and every worker it spawned.
pub(crate) struct Shared<P> {
    pub(crate) pool: AdvertisementPool<Job<P>>,
    pub(crate) counter: CompletionCounter,
    pub(crate) metrics: Metrics,
    /// Caller-owned sink for failure reports, if one was configured.
    pub(crate) failures: Option<Sender<TaskFailure>>,
}

/// A long-lived worker processing one job at a time.
///
/// Each cycle the worker publishes its private rendezvous slot to the pool,
/// then waits for either a job on that slot or a stop signal. A job is run to
/// completion before the worker looks at the stop signal again, so shutdown
/// never abandons in-flight work.
pub(crate) struct Worker<P> {
    id: WorkerId,
    handoff_tx: Sender<Job<P>>,
    handoff_rx: Receiver<Job<P>>,
    stop_rx: Receiver<()>,
    shared: Arc<Shared<P>>,
    handler: Arc<dyn Handler<P>>,
    cell: Arc<WorkerCell>,
}

impl<P: Send + 'static> Worker<P> {
    /// Creates a worker with a fresh zero-capacity handoff channel.
    ///
    /// # Arguments
    ///
    /// * `id` - Worker identifier
    /// * `stop_rx` - Receives this worker's stop signal
    /// * `shared` - Pool, completion counter and metrics
    /// * `handler` - Task callback run for every received job
    /// * `cell` - State cell observed by the dispatcher
    pub(crate) fn new(
        id: WorkerId,
        stop_rx: Receiver<()>,
        shared: Arc<Shared<P>>,
        handler: Arc<dyn Handler<P>>,
        cell: Arc<WorkerCell>,
    ) -> Self {
        let (handoff_tx, handoff_rx) = bounded(0);
        Self {
            id,
            handoff_tx,
            handoff_rx,
            stop_rx,
            shared,
            handler,
            cell,
        }
    }

    /// Runs the advertise/process loop until stopped.
    ///
    /// The worker stops when it receives a stop signal while advertising, or
    /// when the pool refuses its advertisement because it has been closed.
    pub(crate) fn run(self) -> WorkerReport {
        #[cfg(feature = "tracing")]
        tracing::trace!("Worker {} started", self.id);

        // Marks the worker stopped on every exit, including an unwind.
        let _stopped = StopOnExit(&self.cell);

        loop {
            self.cell.set_state(WorkerState::Advertising);

            let slot = Slot {
                worker: self.id,
                handoff: self.handoff_tx.clone(),
            };
            if self.shared.pool.advertise(slot).is_err() {
                #[cfg(feature = "tracing")]
                tracing::debug!("Worker {} found the pool closed", self.id);
                break;
            }

            // The worker owns a handoff sender, so `job` can only be `Err` if
            // the channel is somehow torn down; treat that like a stop.
            let next = select! {
                recv(self.handoff_rx) -> job => job.ok(),
                recv(self.stop_rx) -> _ => None,
            };

            match next {
                Some(job) => self.process(job),
                None => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Worker {} received shutdown signal", self.id);
                    break;
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::trace!("Worker {} stopped", self.id);

        WorkerReport {
            worker_id: self.id,
            jobs_processed: self.cell.processed(),
            exit: WorkerExit::Stopped,
        }
    }

    /// Runs a single job.
    ///
    /// The completion guard is taken first so the counter is decremented on
    /// every exit path, after the outcome has been recorded. Everything that
    /// touches caller code (the handler, the error's `Display` and its drop)
    /// runs inside the unwind boundary.
    fn process(&self, job: Job<P>) {
        self.cell.set_state(WorkerState::Processing);
        let _completion = self.shared.counter.guard();

        let job_id = job.id();

        #[cfg(feature = "tracing")]
        tracing::debug!("Worker {} is processing job {}", self.id, job_id);

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.handler
                .handle(self.id, job)
                .map_err(|e| e.to_string())
        }));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(msg)) => Some(FailureKind::Failed(msg)),
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                // The payload is caller-provided and may panic when dropped.
                let _ = catch_unwind(AssertUnwindSafe(move || drop(payload)));
                Some(FailureKind::Panicked(msg))
            }
        };

        self.cell.record_processed();
        self.shared.metrics.record_completed(failure.is_some());

        match failure {
            None => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Worker {} has finished job {}", self.id, job_id);
            }
            Some(kind) => {
                let failure = TaskFailure {
                    job_id,
                    worker_id: self.id,
                    kind,
                };

                #[cfg(feature = "tracing")]
                tracing::warn!("{failure}");

                self.report(failure);
            }
        }
    }

    /// Offers a failure to the caller's sink without ever blocking the
    /// worker. Reports that do not fit are dropped; `stats().failed` still
    /// counts them.
    fn report(&self, failure: TaskFailure) {
        let Some(sink) = &self.shared.failures else {
            return;
        };

        match sink.try_send(failure) {
            Ok(()) => {}
            Err(TrySendError::Full(_failure)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    "Failure sink is full, dropping report for job {}",
                    _failure.job_id
                );
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Sets the worker's state to `Stopped` when dropped.
struct StopOnExit<'a>(&'a WorkerCell);

impl Drop for StopOnExit<'_> {
    fn drop(&mut self) {
        self.0.set_state(WorkerState::Stopped);
    }
}
