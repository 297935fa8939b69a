use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::unexpected_payload;
use crate::{
    effects::DataHandler, job::Processor, readiness::ReadyGuard, DataProcessed, JobError, JobKind,
    JobOutput, JobPayload, LeasedJob,
};

pub struct DataProcessor {
    ready: ReadyGuard,
    handler: Arc<dyn DataHandler>,
}

impl DataProcessor {
    pub fn new(ready: ReadyGuard, handler: Arc<dyn DataHandler>) -> Self {
        Self { ready, handler }
    }
}

#[async_trait]
impl Processor for DataProcessor {
    fn kind(&self) -> JobKind {
        JobKind::DataProcess
    }

    async fn process(&self, job: &LeasedJob) -> Result<JobOutput, JobError> {
        self.ready.ensure_ready(job.id()).await?;

        let data = match job.payload() {
            JobPayload::DataProcess(data) => data,
            other => return Err(unexpected_payload(JobKind::DataProcess, other)),
        };

        debug!("Processing job {} for org {}", job.id(), data.org_id);
        let processed_data = self.handler.handle(data).await?;
        debug!("Data processing job {} completed", job.id());

        Ok(JobOutput::Data(DataProcessed {
            success: true,
            job_id: job.id().clone(),
            processed_data,
        }))
    }
}
