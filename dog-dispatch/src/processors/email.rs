use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, instrument};

use super::unexpected_payload;
use crate::{
    effects::EmailTransport, job::Processor, readiness::ReadyGuard, EmailSent, JobError, JobKind,
    JobOutput, JobPayload, LeasedJob,
};

pub struct EmailProcessor {
    ready: ReadyGuard,
    transport: Arc<dyn EmailTransport>,
}

impl EmailProcessor {
    pub fn new(ready: ReadyGuard, transport: Arc<dyn EmailTransport>) -> Self {
        Self { ready, transport }
    }
}

#[async_trait]
impl Processor for EmailProcessor {
    fn kind(&self) -> JobKind {
        JobKind::EmailSend
    }

    #[instrument(skip(self, job), fields(job_id = %job.id()))]
    async fn process(&self, job: &LeasedJob) -> Result<JobOutput, JobError> {
        self.ready.ensure_ready(job.id()).await?;

        let email = match job.payload() {
            JobPayload::EmailSend(email) => email,
            other => return Err(unexpected_payload(JobKind::EmailSend, other)),
        };

        debug!("Start processing email job {}", job.id());
        if let Err(e) = self.transport.send(email).await {
            error!("Email job {} failed: {}", job.id(), e);
            return Err(e.into());
        }

        debug!("Email job {} completed successfully", job.id());
        Ok(JobOutput::Email(EmailSent {
            success: true,
            job_id: job.id().clone(),
            sent_at: Utc::now(),
        }))
    }
}
