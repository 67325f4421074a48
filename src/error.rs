use thiserror::Error;

/// Errors raised by the dispatcher and its wire protocol.
///
/// An empty waiting queue is not represented here: `dequeue` returns `Ok(None)`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Job {0} is already known to the dispatcher")]
    DuplicateJobId(u64),

    #[error("Job {0} is unknown or not running")]
    UnknownOrNotRunningJob(u64),

    #[error("Malformed job payload: {0}")]
    MalformedPayload(String),

    /// The job was committed but the commit handler failed afterwards.
    /// The transition is not rolled back and the commit must not be retried.
    #[error("Job {job_id} committed but the commit handler failed: {message}")]
    CallbackFailure { job_id: u64, message: String },
}

impl DispatchError {
    /// True for errors raised after the state transition was applied.
    pub fn is_committed(&self) -> bool {
        matches!(self, DispatchError::CallbackFailure { .. })
    }
}

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors raised on the worker side while talking to a dispatcher.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Dispatcher returned status {status} for {uri}")]
    UnexpectedStatus { status: u16, uri: String },

    #[error("Dispatcher rejected job {job_id}: {message}")]
    Rejected { job_id: u64, message: String },

    #[error(transparent)]
    Malformed(#[from] DispatchError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
