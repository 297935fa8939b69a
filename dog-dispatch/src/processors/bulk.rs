use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{info, instrument, warn};

use super::unexpected_payload;
use crate::{
    job::Processor, producer::Producer, readiness::ReadyGuard, BulkSummary, JobError, JobKind,
    JobOptionsOverride, JobOutput, JobPayload, LeasedJob, PartialReplyJobData, ReplyJobData,
};

/// Pause `pause` after every `every` submissions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkThrottle {
    pub every: u32,
    pub pause: Duration,
}

impl Default for BulkThrottle {
    fn default() -> Self {
        Self { every: 100, pause: Duration::from_millis(50) }
    }
}

impl BulkThrottle {
    /// Whether to pause after `submitted` of `total` submissions
    fn should_pause(&self, submitted: u32, total: u32) -> bool {
        self.every > 0 && submitted % self.every == 0 && submitted < total
    }
}

/// Build the `index`-th reply of a batch; empty or zero template fields get generated values
pub fn synthesize_reply<R: Rng + ?Sized>(template: &PartialReplyJobData, index: u32, rng: &mut R) -> ReplyJobData {
    let name = match template.name.as_deref() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("User{}", index + 1),
    };

    let product_name = match template.product_name.as_deref() {
        Some(product) if !product.is_empty() => product.to_string(),
        _ => format!("Product{}", rng.gen_range(1..=10)),
    };

    let amount = match template.amount {
        Some(amount) if amount != 0.0 => amount,
        _ => {
            let raw: f64 = rng.gen_range(10.0..110.0);
            // Rounding can land on the open upper bound
            ((raw * 100.0).round() / 100.0).min(109.99)
        }
    };

    ReplyJobData { name, product_name, amount }
}

/// Expands one batch job into `count` individually scheduled reply jobs
pub struct BulkReplyProcessor {
    ready: ReadyGuard,
    producer: Producer,
    throttle: BulkThrottle,
}

impl BulkReplyProcessor {
    pub fn new(ready: ReadyGuard, producer: Producer) -> Self {
        Self { ready, producer, throttle: BulkThrottle::default() }
    }

    pub fn with_throttle(mut self, throttle: BulkThrottle) -> Self {
        self.throttle = throttle;
        self
    }
}

#[async_trait]
impl Processor for BulkReplyProcessor {
    fn kind(&self) -> JobKind {
        JobKind::BulkReplyBatch
    }

    #[instrument(skip(self, job), fields(job_id = %job.id()))]
    async fn process(&self, job: &LeasedJob) -> Result<JobOutput, JobError> {
        self.ready.ensure_ready(job.id()).await?;

        let batch = match job.payload() {
            JobPayload::BulkReplyBatch(batch) => batch,
            other => return Err(unexpected_payload(JobKind::BulkReplyBatch, other)),
        };

        let count = batch.count;
        info!("Starting to process bulk job of {} messages", count);

        let mut created = 0u32;
        let mut failed = 0u32;
        let mut last_error = None;

        for index in 0..count {
            let reply = {
                let mut rng = rand::thread_rng();
                synthesize_reply(&batch.template, index, &mut rng)
            };
            // Stable per batch and position, so a retried batch finds its earlier sub-jobs
            let overrides = JobOptionsOverride::new().with_dedup_key(format!("bulk:{}:{}", job.id(), index));

            match self.producer.enqueue_reply_with(reply, overrides).await {
                Ok(_) => created += 1,
                Err(e) => {
                    warn!("Bulk job {} failed to submit message {}: {}", job.id(), index, e);
                    failed += 1;
                    last_error = Some(e.to_string());
                }
            }

            if self.throttle.should_pause(index + 1, count) {
                tokio::time::sleep(self.throttle.pause).await;
            }
        }

        if created == 0 && count > 0 {
            let reason = last_error.unwrap_or_else(|| "unknown error".to_string());
            return Err(JobError::effect(format!("All {} submissions failed: {}", count, reason)));
        }

        info!("Bulk job {} completed, added {} messages to queue", job.id(), created);
        Ok(JobOutput::Bulk(BulkSummary {
            success: true,
            job_id: job.id().clone(),
            total_messages: count,
            message_jobs_created: created,
            failed_submissions: failed,
        }))
    }
}
