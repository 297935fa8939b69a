use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::{
    backend::QueueBackend, BulkReplyJobData, EmailJobData, JobHandle, JobKind, JobOptions,
    JobOptionsOverride, JobPayload, NewJob, PartialReplyJobData, ProcessingJobData, QueueResult,
    ReplyJobData,
};

/// Validates payloads, applies default options and submits jobs to their queue.
///
/// Every call returns as soon as the backend has accepted the job; nothing
/// here waits for the job to run.
#[derive(Clone)]
pub struct Producer {
    backend: Arc<dyn QueueBackend>,
}

impl Producer {
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        Self { backend }
    }

    pub async fn enqueue_email(&self, data: EmailJobData) -> QueueResult<JobHandle> {
        self.enqueue_email_with(data, JobOptionsOverride::default()).await
    }

    pub async fn enqueue_email_with(&self, data: EmailJobData, overrides: JobOptionsOverride) -> QueueResult<JobHandle> {
        self.submit(JobPayload::EmailSend(data), &overrides).await
    }

    pub async fn enqueue_processing(&self, data: ProcessingJobData) -> QueueResult<JobHandle> {
        self.enqueue_processing_with(data, JobOptionsOverride::default()).await
    }

    pub async fn enqueue_processing_with(
        &self,
        data: ProcessingJobData,
        overrides: JobOptionsOverride,
    ) -> QueueResult<JobHandle> {
        self.submit(JobPayload::DataProcess(data), &overrides).await
    }

    pub async fn enqueue_reply(&self, data: ReplyJobData) -> QueueResult<JobHandle> {
        self.enqueue_reply_with(data, JobOptionsOverride::default()).await
    }

    pub async fn enqueue_reply_with(&self, data: ReplyJobData, overrides: JobOptionsOverride) -> QueueResult<JobHandle> {
        self.submit(JobPayload::ReplySend(data), &overrides).await
    }

    /// Submit one batch job that fans out into `count` reply jobs when it runs
    pub async fn enqueue_bulk_reply(
        &self,
        count: u32,
        template: Option<PartialReplyJobData>,
    ) -> QueueResult<JobHandle> {
        self.enqueue_bulk_reply_with(count, template, JobOptionsOverride::default()).await
    }

    pub async fn enqueue_bulk_reply_with(
        &self,
        count: u32,
        template: Option<PartialReplyJobData>,
        overrides: JobOptionsOverride,
    ) -> QueueResult<JobHandle> {
        let data = BulkReplyJobData { count, template: template.unwrap_or_default() };
        self.submit(JobPayload::BulkReplyBatch(data), &overrides).await
    }

    /// Decode a loosely typed request body and submit it with default options
    pub async fn enqueue_json(&self, kind: JobKind, body: serde_json::Value) -> QueueResult<JobHandle> {
        let payload = JobPayload::from_json(kind, body)?;
        self.submit(payload, &JobOptionsOverride::default()).await
    }

    #[instrument(skip(self, payload, overrides), fields(job_kind = %payload.kind()))]
    async fn submit(&self, payload: JobPayload, overrides: &JobOptionsOverride) -> QueueResult<JobHandle> {
        if let Err(e) = payload.validate() {
            warn!("Rejected {} job: {}", payload.kind(), e);
            return Err(e);
        }

        let kind = payload.kind();
        let options = JobOptions::defaults_for_payload(&payload).merge(overrides);
        let handle = self.backend.enqueue(kind.queue(), NewJob::new(payload, options)).await?;

        info!("Enqueued {} job {} on {}", kind, handle.id, handle.queue);
        Ok(handle)
    }
}
