use crate::job::{Job, JobId, WorkerId};
use core::fmt;
use std::any::Any;

/// Boxed error returned by a failing task.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of running a single task.
pub type TaskResult = Result<(), TaskError>;

/// The task-execution callback run by workers.
///
/// A handler is shared by every worker and invoked synchronously on the
/// worker's thread, once per received job. Returning an error (or panicking)
/// does not stop the worker: the failure is reported as a [`TaskFailure`] and
/// the worker goes back to advertising itself.
///
/// Closures can be adapted with [`handler_fn`].
pub trait Handler<P>: Send + Sync + 'static {
    fn handle(&self, worker: WorkerId, job: Job<P>) -> TaskResult;
}

/// A [`Handler`] backed by a closure. Created with [`handler_fn`].
#[derive(Clone, Copy)]
pub struct HandlerFn<F> {
    f: F,
}

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFn").finish_non_exhaustive()
    }
}

/// Wraps a closure so it can be used as a [`Handler`].
///
/// # Example
/// ```
/// use handoff::{handler_fn, Job};
///
/// let handler = handler_fn(|_worker, job: Job<&'static str>| {
///     println!("{}", job.payload());
///     Ok(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<P, F>(f: F) -> HandlerFn<F>
where
    F: Fn(WorkerId, Job<P>) -> TaskResult + Send + Sync + 'static,
{
    HandlerFn { f }
}

impl<P, F> Handler<P> for HandlerFn<F>
where
    F: Fn(WorkerId, Job<P>) -> TaskResult + Send + Sync + 'static,
{
    fn handle(&self, worker: WorkerId, job: Job<P>) -> TaskResult {
        (self.f)(worker, job)
    }
}

/// How a task failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The handler returned an error.
    Failed(String),
    /// The handler panicked; the panic was caught on the worker thread.
    Panicked(String),
}

/// Report of a task that did not complete successfully.
///
/// Workers always record completion and re-advertise regardless of the task's
/// outcome; these reports are the only place a failure surfaces.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Job {job_id} failed on worker {worker_id}: {kind}")]
pub struct TaskFailure {
    pub job_id: JobId,
    pub worker_id: WorkerId,
    pub kind: FailureKind,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(msg) => write!(f, "error: {msg}"),
            Self::Panicked(msg) => write!(f, "panic: {msg}"),
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        String::from("non-string panic payload")
    }
}
