mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_config, reply, wait_for_terminal, FlakyReplySender};
use dog_dispatch::{
    BackoffPolicy, Effects, JobOptionsOverride, JobStatus, MemoryBackend, QueueAdapter,
    QueueBackend, QueueError, ReadinessGate,
};

const QUEUE: &str = "ReplyMessageQueue";

#[test_log::test(tokio::test)]
async fn test_job_waits_for_ready() {
    let backend = MemoryBackend::new();
    let adapter = QueueAdapter::with_config(backend.clone(), fast_config());
    let sender = Arc::new(FlakyReplySender::default());

    let registry = adapter
        .standard_processors(Effects::default().with_reply(sender.clone()))
        .unwrap();
    let workers = adapter.start_workers(&registry);

    let handle = adapter.producer().enqueue_reply(reply("Jane")).await.unwrap();

    // Leased, but held at the gate
    tokio::time::sleep(Duration::from_millis(150)).await;
    let record = backend.get_record(QUEUE, &handle.id).await.unwrap();
    assert!(matches!(record.status, JobStatus::Active { .. }));
    assert_eq!(sender.calls(), 0);

    adapter.readiness().mark_ready();

    let record = wait_for_terminal(&backend, QUEUE, &handle.id).await;
    workers.shutdown().await.unwrap();

    assert!(matches!(record.status, JobStatus::Completed { .. }));
    assert_eq!(record.attempts_made, 1);
    assert_eq!(sender.calls(), 1);
}

#[test_log::test(tokio::test)]
async fn test_jobs_after_ready_run_without_waiting() {
    let backend = MemoryBackend::new();
    let adapter = QueueAdapter::with_config(backend.clone(), fast_config());
    adapter.readiness().mark_ready();

    let registry = adapter.standard_processors(Effects::default()).unwrap();
    let workers = adapter.start_workers(&registry);

    let producer = adapter.producer();
    let mut ids = Vec::new();
    for name in ["Jane", "John", "Ada"] {
        ids.push(producer.enqueue_reply(reply(name)).await.unwrap().id);
    }

    for id in &ids {
        let record = wait_for_terminal(&backend, QUEUE, id).await;
        assert!(matches!(record.status, JobStatus::Completed { .. }));
    }
    workers.shutdown().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_readiness_timeout_counts_as_attempt() {
    let backend = MemoryBackend::new();
    let config = fast_config().with_ready_max_wait(Duration::from_millis(50));
    let adapter = QueueAdapter::with_config(backend.clone(), config);
    let sender = Arc::new(FlakyReplySender::default());

    let registry = adapter
        .standard_processors(Effects::default().with_reply(sender.clone()))
        .unwrap();
    let workers = adapter.start_workers(&registry);

    // Never marked ready
    let overrides = JobOptionsOverride::new()
        .with_max_attempts(2)
        .with_backoff(BackoffPolicy::fixed(10));
    let handle = adapter.producer().enqueue_reply_with(reply("Jane"), overrides).await.unwrap();

    let record = wait_for_terminal(&backend, QUEUE, &handle.id).await;
    workers.shutdown().await.unwrap();

    assert!(matches!(record.status, JobStatus::Failed { exhausted: true, .. }));
    assert_eq!(record.attempts_made, 2);
    assert_eq!(sender.calls(), 0);
    assert!(record.last_error.as_deref().unwrap_or_default().contains("Not ready"));
    assert!(matches!(record.terminal_error(), Some(QueueError::RetriesExhausted { .. })));
}

#[tokio::test]
async fn test_shared_gate_releases_every_adapter() {
    let gate = ReadinessGate::new();
    let first = QueueAdapter::new(MemoryBackend::new()).with_readiness(gate.clone());
    let second = QueueAdapter::new(MemoryBackend::new()).with_readiness(gate.clone());

    let waiter = {
        let gate = second.readiness().clone();
        tokio::spawn(async move { gate.wait_until_ready(Duration::from_secs(5)).await })
    };

    first.readiness().mark_ready();

    assert!(waiter.await.unwrap().is_ok());
    assert!(second.readiness().is_ready());
}
