use core::fmt;

/// Caller-assigned identifier of a [`Job`].
///
/// The dispatcher never generates or inspects identifiers beyond logging and
/// failure reports, so uniqueness is the caller's responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Stable, zero-based identity of a worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

impl WorkerId {
    /// Index of this worker within the dispatcher's worker set.
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single unit of work.
///
/// A job is created by the caller, handed to exactly one worker and consumed
/// by that worker's handler. Its contents are immutable once submitted.
///
/// # Example
/// ```
/// use handoff::{Job, JobId};
///
/// let job = Job::new(7, "Walk the dog");
/// assert_eq!(job.id(), JobId(7));
/// assert_eq!(*job.payload(), "Walk the dog");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job<P> {
    id: JobId,
    payload: P,
}

impl<P> Job<P> {
    pub const fn new(id: u64, payload: P) -> Self {
        Self {
            id: JobId(id),
            payload,
        }
    }

    pub const fn id(&self) -> JobId {
        self.id
    }

    pub const fn payload(&self) -> &P {
        &self.payload
    }

    /// Consumes the job, returning its payload.
    pub fn into_payload(self) -> P {
        self.payload
    }

    pub fn into_parts(self) -> (JobId, P) {
        (self.id, self.payload)
    }
}
