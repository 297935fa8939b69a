#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use dog_dispatch::{
    effects::ReplySender, EffectError, JobId, JobRecord, MemoryBackend, QueueBackend, QueueConfig,
    ReplyJobData,
};

/// Worker settings that keep integration tests fast
pub fn fast_config() -> QueueConfig {
    QueueConfig::default()
        .with_concurrency(2)
        .with_poll_interval(Duration::from_millis(10))
        .with_ready_max_wait(Duration::from_secs(5))
}

pub fn reply(name: &str) -> ReplyJobData {
    ReplyJobData {
        name: name.to_string(),
        product_name: "Premium Plan".to_string(),
        amount: 99.99,
    }
}

/// Poll until the job reaches a terminal state
pub async fn wait_for_terminal(backend: &MemoryBackend, queue: &str, job_id: &JobId) -> JobRecord {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(record) = backend.get_record(queue, job_id).await {
                if record.status.is_terminal() {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job did not reach a terminal state in time")
}

/// Reply channel that fails its first `failures` sends
#[derive(Default)]
pub struct FlakyReplySender {
    failures: u32,
    calls: AtomicU32,
}

impl FlakyReplySender {
    pub fn failing(failures: u32) -> Self {
        Self { failures, calls: AtomicU32::new(0) }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReplySender for FlakyReplySender {
    async fn send(&self, reply: &ReplyJobData) -> Result<(), EffectError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(EffectError::new(format!("channel down for {} (call {})", reply.name, call)));
        }
        Ok(())
    }
}
