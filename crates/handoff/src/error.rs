//! Error types for the dispatcher.
//!
//! ## Error Cases
//! - `InvalidConfiguration`: the dispatcher could not be built from the given
//!   settings (for example a worker count of zero).
//! - `DispatcherClosed`: a job was submitted after shutdown, or the pool was
//!   closed while the submission was waiting for a worker.
//! - `Timeout`: a bounded-wait submission found no idle worker in time.
//! - `Spawn`: the operating system refused to start a worker thread.
//!
//! Failures raised by the caller's task are not errors of the dispatcher. They
//! are reported as [`TaskFailure`] values on the dispatcher's failure channel.
//!
//! [`TaskFailure`]: crate::TaskFailure

/// A result type defaulting to the dispatcher's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors `handoff` can produce.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The dispatcher configuration was rejected; no dispatcher was created.
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// The dispatcher no longer accepts work.
    #[error("Dispatcher is closed")]
    DispatcherClosed,

    /// No worker advertised itself before the deadline.
    #[error("Timed out waiting for an idle worker")]
    Timeout,

    /// A worker thread could not be spawned.
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
