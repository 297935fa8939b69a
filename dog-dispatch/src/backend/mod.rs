#[cfg(feature = "memory")]
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use async_trait::async_trait;
use futures_core::Stream;
use std::pin::Pin;
use std::time::Duration;

use crate::{
    QueueResult, JobId, JobHandle, JobRecord, JobState, LeasedJob, NewJob,
    QueueCounts, JobEvent, types::LeaseToken
};

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Durable store primitives: a named FIFO with priority, delay and retry
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Store a job in the named queue. With a dedup key, a job still
    /// retained under the same key is returned instead of a new one.
    async fn enqueue(&self, queue: &str, job: NewJob) -> QueueResult<JobHandle>;

    /// Lease the next eligible job, promoting due delayed jobs first.
    /// Starts a new attempt.
    async fn dequeue(&self, queue: &str, lease_duration: Duration) -> QueueResult<Option<LeasedJob>>;

    /// Acknowledge job completion (lease token required)
    async fn ack_complete(
        &self,
        queue: &str,
        job_id: &JobId,
        lease_token: &LeaseToken,
        return_value: Option<serde_json::Value>,
    ) -> QueueResult<()>;

    /// Acknowledge a failed attempt. The backend applies the job's retry
    /// policy: reschedule after backoff, or move to the failed set.
    /// Returns the status the job ended up in.
    async fn ack_fail(
        &self,
        queue: &str,
        job_id: &JobId,
        lease_token: &LeaseToken,
        error: String,
        permanent: bool,
    ) -> QueueResult<crate::JobStatus>;

    /// Renew the lease of a running job: it now expires `lease_duration` from now
    async fn heartbeat_extend(
        &self,
        queue: &str,
        job_id: &JobId,
        lease_token: &LeaseToken,
        lease_duration: Duration,
    ) -> QueueResult<()>;

    /// Treat active jobs with expired leases as failed attempts. Returns how many were reclaimed.
    async fn reclaim_stalled(&self, queue: &str) -> QueueResult<usize>;

    async fn get_record(&self, queue: &str, job_id: &JobId) -> QueueResult<JobRecord>;

    /// Jobs in a state, oldest first
    async fn list(&self, queue: &str, state: JobState, limit: usize) -> QueueResult<Vec<JobRecord>>;

    async fn counts(&self, queue: &str) -> QueueResult<QueueCounts>;

    /// Event stream for observability (boxed for stable Rust)
    fn events(&self) -> BoxStream<JobEvent>;
}
