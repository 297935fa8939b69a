pub mod registry;

pub use registry::ProcessorRegistry;

use async_trait::async_trait;

use crate::{JobError, JobKind, JobOutput, LeasedJob};

/// Runs jobs of one kind.
///
/// A processor executes a single attempt and reports the outcome. It never
/// retries internally and never re-enqueues; the backend applies the job's
/// retry policy to whatever error comes back.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Job kind this processor handles
    fn kind(&self) -> JobKind;

    /// Execute one attempt of a leased job
    async fn process(&self, job: &LeasedJob) -> Result<JobOutput, JobError>;
}
