mod common;

use std::sync::Arc;

use async_trait::async_trait;

use common::{fast_config, reply, wait_for_terminal, FlakyReplySender};
use dog_dispatch::{
    BackoffPolicy, Effects, EmailJobData, JobError, JobKind, JobOptionsOverride, JobOutput,
    JobStatus, LeasedJob, MemoryBackend, NewJob, JobPayload, Processor, ProcessorRegistry,
    QueueAdapter, QueueBackend, QueueError,
};

const QUEUE: &str = "ReplyMessageQueue";

fn fast_retries(max_attempts: u32) -> JobOptionsOverride {
    JobOptionsOverride::new()
        .with_max_attempts(max_attempts)
        .with_backoff(BackoffPolicy::fixed(10))
}

#[test_log::test(tokio::test)]
async fn test_exhausts_exactly_max_attempts() {
    let backend = MemoryBackend::new();
    let adapter = QueueAdapter::with_config(backend.clone(), fast_config());
    let sender = Arc::new(FlakyReplySender::failing(u32::MAX));

    let registry = adapter
        .standard_processors(Effects::default().with_reply(sender.clone()))
        .unwrap();
    let workers = adapter.start_workers(&registry);
    adapter.readiness().mark_ready();

    let handle = adapter
        .producer()
        .enqueue_reply_with(reply("Jane"), fast_retries(3))
        .await
        .unwrap();

    let record = wait_for_terminal(&backend, QUEUE, &handle.id).await;
    workers.shutdown().await.unwrap();

    assert!(matches!(record.status, JobStatus::Failed { exhausted: true, .. }));
    assert_eq!(record.attempts_made, 3);
    assert_eq!(sender.calls(), 3);
    assert!(record.last_error.as_deref().unwrap_or_default().contains("channel down"));

    match record.terminal_error() {
        Some(QueueError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected RetriesExhausted, got {:?}", other),
    }
}

#[test_log::test(tokio::test)]
async fn test_succeeds_on_retry() {
    let backend = MemoryBackend::new();
    let adapter = QueueAdapter::with_config(backend.clone(), fast_config());
    let sender = Arc::new(FlakyReplySender::failing(1));

    let registry = adapter
        .standard_processors(Effects::default().with_reply(sender.clone()))
        .unwrap();
    let workers = adapter.start_workers(&registry);
    adapter.readiness().mark_ready();

    let handle = adapter
        .producer()
        .enqueue_reply_with(reply("Jane"), fast_retries(3))
        .await
        .unwrap();

    let record = wait_for_terminal(&backend, QUEUE, &handle.id).await;
    workers.shutdown().await.unwrap();

    assert!(matches!(record.status, JobStatus::Completed { .. }));
    assert_eq!(record.attempts_made, 2);
    assert_eq!(sender.calls(), 2);

    let value = record.return_value.expect("completed job keeps its return value");
    assert_eq!(value["success"], serde_json::json!(true));
    assert_eq!(value["jobId"], serde_json::json!(handle.id.as_str()));
}

#[test_log::test(tokio::test)]
async fn test_single_attempt_fails_immediately() {
    let backend = MemoryBackend::new();
    let adapter = QueueAdapter::with_config(backend.clone(), fast_config());
    let sender = Arc::new(FlakyReplySender::failing(u32::MAX));

    let registry = adapter
        .standard_processors(Effects::default().with_reply(sender.clone()))
        .unwrap();
    let workers = adapter.start_workers(&registry);
    adapter.readiness().mark_ready();

    let handle = adapter
        .producer()
        .enqueue_reply_with(reply("Jane"), fast_retries(1))
        .await
        .unwrap();

    let record = wait_for_terminal(&backend, QUEUE, &handle.id).await;
    workers.shutdown().await.unwrap();

    assert_eq!(record.attempts_made, 1);
    assert_eq!(sender.calls(), 1);
    assert_eq!(backend.counts(QUEUE).await.unwrap().failed, 1);
}

/// Fails every attempt with an error retrying cannot fix
struct RejectingProcessor;

#[async_trait]
impl Processor for RejectingProcessor {
    fn kind(&self) -> JobKind {
        JobKind::ReplySend
    }

    async fn process(&self, _job: &LeasedJob) -> Result<JobOutput, JobError> {
        Err(JobError::permanent("recipient does not exist"))
    }
}

#[test_log::test(tokio::test)]
async fn test_permanent_error_skips_retries() {
    let backend = MemoryBackend::new();
    let adapter = QueueAdapter::with_config(backend.clone(), fast_config());

    let mut registry = ProcessorRegistry::new();
    registry.register(RejectingProcessor).unwrap();
    let workers = adapter.start_workers(&registry);

    let handle = adapter
        .producer()
        .enqueue_reply_with(reply("Jane"), fast_retries(5))
        .await
        .unwrap();

    let record = wait_for_terminal(&backend, QUEUE, &handle.id).await;
    workers.shutdown().await.unwrap();

    assert!(matches!(record.status, JobStatus::Failed { exhausted: false, .. }));
    assert_eq!(record.attempts_made, 1);
}

#[test_log::test(tokio::test)]
async fn test_mismatched_payload_is_permanent() {
    let backend = MemoryBackend::new();
    let adapter = QueueAdapter::with_config(backend.clone(), fast_config());
    let registry = adapter.standard_processors(Effects::default()).unwrap();
    let workers = adapter.start_workers(&registry);
    adapter.readiness().mark_ready();

    // An email payload on the reply queue can never be processed
    let payload = JobPayload::EmailSend(EmailJobData {
        to: "jane@example.com".to_string(),
        subject: "Hi".to_string(),
        body: "Body".to_string(),
        attachments: None,
    });
    let handle = backend.enqueue(QUEUE, NewJob::with_defaults(payload)).await.unwrap();

    let record = wait_for_terminal(&backend, QUEUE, &handle.id).await;
    workers.shutdown().await.unwrap();

    assert!(matches!(record.status, JobStatus::Failed { exhausted: false, .. }));
    assert_eq!(record.attempts_made, 1);
}

#[test]
fn test_duplicate_processor_registration_rejected() {
    let mut registry = ProcessorRegistry::new();
    registry.register(RejectingProcessor).unwrap();

    let result = registry.register(RejectingProcessor);
    assert!(matches!(result, Err(QueueError::ProcessorAlreadyRegistered(_))));
}
