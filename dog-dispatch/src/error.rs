use std::time::Duration;

use thiserror::Error;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors surfaced synchronously to callers of the queue
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    /// Caller error: the payload is missing required fields. Nothing was enqueued.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The durable store could not accept or serve the request
    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid lease token")]
    InvalidLeaseToken,

    #[error("Lease has expired")]
    LeaseExpired,

    #[error("Job is already in terminal state")]
    JobAlreadyTerminal,

    /// Terminal: the job used up all of its attempts and sits in the failed set
    #[error("Job {job_id} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        job_id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Processor already registered for job kind: {0}")]
    ProcessorAlreadyRegistered(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Worker shutdown")]
    WorkerShutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<validator::ValidationErrors> for QueueError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::InvalidPayload(errors.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        Self::QueueUnavailable(err.to_string())
    }
}

/// The readiness gate was not opened within the allowed wait
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Application failed to become ready within {waited:?}")]
pub struct NotReadyTimeout {
    pub waited: Duration,
}

/// Failure raised by a job effect (mail transport, reply channel, data handler)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct EffectError(pub String);

impl EffectError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Attempt-level failure. Consumed by the retry policy, never returned to the enqueuer.
#[derive(Error, Debug, Clone)]
pub enum JobError {
    /// The process did not become ready in time
    #[error("Not ready: {0}")]
    NotReady(#[from] NotReadyTimeout),

    /// The job's effect failed; retried while attempts remain
    #[error("Effect failed: {0}")]
    Effect(String),

    /// Retrying cannot help (undecodable payload, no processor for the kind)
    #[error("Permanent error: {0}")]
    Permanent(String),
}

impl JobError {
    pub fn effect(msg: impl Into<String>) -> Self {
        Self::Effect(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent(_))
    }
}

impl From<EffectError> for JobError {
    fn from(err: EffectError) -> Self {
        Self::Effect(err.0)
    }
}
