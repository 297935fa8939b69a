use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::unexpected_payload;
use crate::{
    effects::ReplySender, job::Processor, readiness::ReadyGuard, JobError, JobKind, JobOutput,
    JobPayload, LeasedJob, ReplySent,
};

pub struct ReplyProcessor {
    ready: ReadyGuard,
    sender: Arc<dyn ReplySender>,
}

impl ReplyProcessor {
    pub fn new(ready: ReadyGuard, sender: Arc<dyn ReplySender>) -> Self {
        Self { ready, sender }
    }
}

#[async_trait]
impl Processor for ReplyProcessor {
    fn kind(&self) -> JobKind {
        JobKind::ReplySend
    }

    async fn process(&self, job: &LeasedJob) -> Result<JobOutput, JobError> {
        self.ready.ensure_ready(job.id()).await?;

        let reply = match job.payload() {
            JobPayload::ReplySend(reply) => reply,
            other => return Err(unexpected_payload(JobKind::ReplySend, other)),
        };

        debug!("Processing message job {}", job.id());
        self.sender.send(reply).await?;
        debug!("Message job {} completed", job.id());

        Ok(JobOutput::Reply(ReplySent {
            success: true,
            job_id: job.id().clone(),
            sent_at: Utc::now(),
        }))
    }
}
