use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use crate::{
    QueueResult, QueueError, JobId, JobHandle, JobRecord, JobState, JobStatus,
    LeasedJob, NewJob, QueueCounts, JobEvent, backend::{QueueBackend, BoxStream},
    types::{deadline_after, LeaseToken}
};

/// Per-queue sets. Every retained job id sits in exactly one of them.
#[derive(Default)]
pub(crate) struct QueueSets {
    /// Ordered by (priority, submission sequence)
    waiting: BTreeMap<(u32, u64), JobId>,
    /// Ordered by (run_at, sequence)
    delayed: BTreeMap<(DateTime<Utc>, u64), JobId>,
    active: Vec<JobId>,
    completed: VecDeque<JobId>,
    failed: VecDeque<JobId>,
}

#[derive(Default)]
pub(crate) struct MemoryState {
    jobs: HashMap<JobId, JobRecord>,
    queues: HashMap<String, QueueSets>,
    /// (queue, dedup key) -> job_id
    dedup: HashMap<(String, String), JobId>,
    next_seq: u64,
}

impl MemoryState {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn sets(&mut self, queue: &str) -> &mut QueueSets {
        self.queues.entry(queue.to_string()).or_default()
    }

    fn push_waiting(&mut self, queue: &str, job_id: JobId, priority: u32) {
        let seq = self.next_seq();
        self.sets(queue).waiting.insert((priority, seq), job_id);
    }

    fn push_delayed(&mut self, queue: &str, job_id: JobId, run_at: DateTime<Utc>) {
        let seq = self.next_seq();
        self.sets(queue).delayed.insert((run_at, seq), job_id);
    }

    /// Move delayed jobs whose time has come into the waiting set
    fn promote_due(&mut self, queue: &str, now: DateTime<Utc>) {
        let mut due = Vec::new();
        if let Some(sets) = self.queues.get_mut(queue) {
            while let Some(entry) = sets.delayed.first_entry() {
                if entry.key().0 > now {
                    break;
                }
                due.push(entry.remove());
            }
        }

        for job_id in due {
            let priority = match self.jobs.get_mut(&job_id) {
                Some(record) => {
                    record.status = JobStatus::Waiting;
                    record.options.priority_key()
                }
                None => continue,
            };
            self.push_waiting(queue, job_id, priority);
        }
    }

    fn remove_active(&mut self, queue: &str, job_id: &JobId) {
        if let Some(sets) = self.queues.get_mut(queue) {
            sets.active.retain(|id| id != job_id);
        }
    }

    /// Record a terminal job and prune the oldest beyond `keep`; `None` keeps every job
    fn retain_terminal(&mut self, queue: &str, job_id: JobId, failed: bool, keep: Option<u32>) {
        let mut pruned = Vec::new();
        {
            let sets = self.sets(queue);
            let set = if failed { &mut sets.failed } else { &mut sets.completed };
            set.push_back(job_id);
            let keep = keep.map_or(usize::MAX, |keep| keep as usize);
            while set.len() > keep {
                match set.pop_front() {
                    Some(old) => pruned.push(old),
                    None => break,
                }
            }
        }

        for old in pruned {
            self.remove_job(&old);
        }
    }

    fn remove_job(&mut self, job_id: &JobId) {
        if let Some(record) = self.jobs.remove(job_id) {
            debug!("Pruned job {} from {}", job_id, record.queue);
            if let Some(key) = record.options.dedup_key {
                let scope = (record.queue, key);
                if self.dedup.get(&scope) == Some(job_id) {
                    self.dedup.remove(&scope);
                }
            }
        }
    }

    /// Look up a job and verify the caller holds its live lease
    fn leased_record(
        &mut self,
        queue: &str,
        job_id: &JobId,
        lease_token: &LeaseToken,
        now: DateTime<Utc>,
    ) -> QueueResult<&mut JobRecord> {
        let record = self
            .jobs
            .get_mut(job_id)
            .filter(|record| record.queue == queue)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;

        record.check_lease(lease_token, now)?;
        Ok(record)
    }

    /// Apply a failed attempt to an active job and move it to its next set
    fn fail_active(&mut self, queue: &str, job_id: &JobId, error: String, permanent: bool) -> Option<JobEvent> {
        let now = Utc::now();
        let (retry_at, keep) = {
            let record = self.jobs.get_mut(job_id)?;
            let retry_at = record.fail_attempt(error.clone(), permanent);
            (retry_at, record.options.retention.failed)
        };

        self.remove_active(queue, job_id);
        match retry_at {
            Some(run_at) => {
                self.push_delayed(queue, job_id.clone(), run_at);
                Some(JobEvent::Delayed { job_id: job_id.clone(), run_at, error, at: now })
            }
            None => {
                self.retain_terminal(queue, job_id.clone(), true, keep);
                Some(JobEvent::Failed { job_id: job_id.clone(), error, at: now })
            }
        }
    }
}

/// In-memory backend for tests and single-node deployments
#[derive(Clone)]
pub struct MemoryBackend {
    pub(crate) state: Arc<RwLock<MemoryState>>,

    /// Event broadcaster for observability
    pub(crate) event_broadcaster: broadcast::Sender<JobEvent>,

    available: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (event_broadcaster, _) = broadcast::channel(1000);

        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            event_broadcaster,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate the store going away; enqueue and dequeue fail with `QueueUnavailable` while offline
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Force a lease to expire (test helper)
    pub fn force_lease_expiry(&self, job_id: &JobId) -> QueueResult<()> {
        let mut state = self.state.write();
        let record = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;

        if let JobStatus::Active { ref mut lease_until } = record.status {
            *lease_until = Utc::now() - chrono::Duration::seconds(1);
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    fn check_available(&self) -> QueueResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(QueueError::QueueUnavailable("memory backend is offline".to_string()))
        }
    }

    fn emit(&self, event: JobEvent) {
        let _ = self.event_broadcaster.send(event);
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn enqueue(&self, queue: &str, job: NewJob) -> QueueResult<JobHandle> {
        self.check_available()?;
        let mut state = self.state.write();

        if let Some(ref key) = job.options.dedup_key {
            let scope = (queue.to_string(), key.clone());
            if let Some(record) = state.dedup.get(&scope).and_then(|id| state.jobs.get(id)) {
                debug!("Dedup key {} matched existing job {}", key, record.id);
                return Ok(record.handle());
            }
        }

        let job_id = JobId::new();
        let record = JobRecord::new(job_id.clone(), queue, job);
        let handle = record.handle();

        match record.status {
            JobStatus::Delayed { run_at } => state.push_delayed(queue, job_id.clone(), run_at),
            _ => state.push_waiting(queue, job_id.clone(), record.options.priority_key()),
        }
        if let Some(key) = record.options.dedup_key.clone() {
            state.dedup.insert((queue.to_string(), key), job_id.clone());
        }
        let created_at = record.created_at;
        state.jobs.insert(job_id.clone(), record);
        drop(state);

        self.emit(JobEvent::Enqueued {
            job_id,
            queue: queue.to_string(),
            kind: handle.kind,
            at: created_at,
        });

        Ok(handle)
    }

    async fn dequeue(&self, queue: &str, lease_duration: Duration) -> QueueResult<Option<LeasedJob>> {
        self.check_available()?;
        let now = Utc::now();
        let mut state = self.state.write();

        state.promote_due(queue, now);
        let job_id = match state.queues.get_mut(queue).and_then(|sets| sets.waiting.pop_first()) {
            Some((_, job_id)) => job_id,
            None => return Ok(None),
        };

        let lease_token = LeaseToken::new();
        let lease_until = deadline_after(now, lease_duration);

        let record = {
            let record = state
                .jobs
                .get_mut(&job_id)
                .ok_or_else(|| QueueError::Internal(format!("Waiting job {} has no record", job_id)))?;
            record.start_attempt(lease_token.clone(), lease_until);
            record.clone()
        };
        state.sets(queue).active.push(job_id.clone());
        drop(state);

        self.emit(JobEvent::Active {
            job_id,
            attempt: record.attempts_made,
            lease_until,
            at: now,
        });

        Ok(Some(LeasedJob { record, lease_token, lease_until }))
    }

    async fn ack_complete(
        &self,
        queue: &str,
        job_id: &JobId,
        lease_token: &LeaseToken,
        return_value: Option<serde_json::Value>,
    ) -> QueueResult<()> {
        let now = Utc::now();
        let mut state = self.state.write();

        let keep = {
            let record = state.leased_record(queue, job_id, lease_token, now)?;
            record.complete(return_value);
            Some(record.options.retention.completed)
        };
        state.remove_active(queue, job_id);
        state.retain_terminal(queue, job_id.clone(), false, keep);
        drop(state);

        self.emit(JobEvent::Completed { job_id: job_id.clone(), at: now });
        Ok(())
    }

    async fn ack_fail(
        &self,
        queue: &str,
        job_id: &JobId,
        lease_token: &LeaseToken,
        error: String,
        permanent: bool,
    ) -> QueueResult<JobStatus> {
        let now = Utc::now();
        let mut state = self.state.write();

        state.leased_record(queue, job_id, lease_token, now)?;
        let event = state.fail_active(queue, job_id, error, permanent);
        // Retention 0 may have pruned the record already
        let status = state
            .jobs
            .get(job_id)
            .map(|record| record.status.clone())
            .unwrap_or(JobStatus::Failed { failed_at: now, error: String::new(), exhausted: !permanent });
        drop(state);

        if let Some(event) = event {
            self.emit(event);
        }
        Ok(status)
    }

    async fn heartbeat_extend(
        &self,
        queue: &str,
        job_id: &JobId,
        lease_token: &LeaseToken,
        lease_duration: Duration,
    ) -> QueueResult<()> {
        let now = Utc::now();
        let mut state = self.state.write();
        let record = state.leased_record(queue, job_id, lease_token, now)?;
        if let JobStatus::Active { ref mut lease_until } = record.status {
            *lease_until = deadline_after(now, lease_duration);
            record.updated_at = now;
        }
        Ok(())
    }

    async fn reclaim_stalled(&self, queue: &str) -> QueueResult<usize> {
        let now = Utc::now();
        let mut events = Vec::new();
        {
            let mut state = self.state.write();
            let expired: Vec<JobId> = match state.queues.get(queue) {
                Some(sets) => sets
                    .active
                    .iter()
                    .filter(|id| state.jobs.get(*id).is_some_and(|record| record.lease_expired(now)))
                    .cloned()
                    .collect(),
                None => Vec::new(),
            };

            for job_id in expired {
                debug!("Reclaiming expired lease for job: {}", job_id);
                events.push(JobEvent::Stalled { job_id: job_id.clone(), at: now });
                if let Some(event) = state.fail_active(queue, &job_id, "Lease expired".to_string(), false) {
                    events.push(event);
                }
            }
        }

        let reclaimed = events.iter().filter(|e| matches!(e, JobEvent::Stalled { .. })).count();
        for event in events {
            self.emit(event);
        }
        Ok(reclaimed)
    }

    async fn get_record(&self, queue: &str, job_id: &JobId) -> QueueResult<JobRecord> {
        let state = self.state.read();
        state
            .jobs
            .get(job_id)
            .filter(|record| record.queue == queue)
            .cloned()
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))
    }

    async fn list(&self, queue: &str, job_state: JobState, limit: usize) -> QueueResult<Vec<JobRecord>> {
        let state = self.state.read();
        let sets = match state.queues.get(queue) {
            Some(sets) => sets,
            None => return Ok(Vec::new()),
        };

        let ids: Box<dyn Iterator<Item = &JobId>> = match job_state {
            JobState::Waiting => Box::new(sets.waiting.values()),
            JobState::Delayed => Box::new(sets.delayed.values()),
            JobState::Active => Box::new(sets.active.iter()),
            JobState::Completed => Box::new(sets.completed.iter()),
            JobState::Failed => Box::new(sets.failed.iter()),
        };

        Ok(ids
            .filter_map(|id| state.jobs.get(id).cloned())
            .take(limit)
            .collect())
    }

    async fn counts(&self, queue: &str) -> QueueResult<QueueCounts> {
        let state = self.state.read();
        Ok(state
            .queues
            .get(queue)
            .map(|sets| QueueCounts {
                waiting: sets.waiting.len(),
                delayed: sets.delayed.len(),
                active: sets.active.len(),
                completed: sets.completed.len(),
                failed: sets.failed.len(),
            })
            .unwrap_or_default())
    }

    fn events(&self) -> BoxStream<JobEvent> {
        let receiver = self.event_broadcaster.subscribe();
        use tokio_stream::{wrappers::BroadcastStream, StreamExt};
        let stream = BroadcastStream::new(receiver)
            .filter_map(|result| result.ok());

        Box::pin(stream)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BackoffPolicy, JobOptions, JobOptionsOverride, JobPayload, ReplyJobData};

    const QUEUE: &str = "ReplyMessageQueue";
    const LEASE: Duration = Duration::from_secs(30);

    fn reply_job(name: &str, overrides: JobOptionsOverride) -> NewJob {
        let payload = JobPayload::ReplySend(ReplyJobData {
            name: name.to_string(),
            product_name: "Premium Plan".to_string(),
            amount: 99.99,
        });
        let options = JobOptions::defaults_for_payload(&payload).merge(&overrides);
        NewJob::new(payload, options)
    }

    #[tokio::test]
    async fn test_enqueue_dequeue() {
        let backend = MemoryBackend::new();

        let handle = backend.enqueue(QUEUE, reply_job("Jane", JobOptionsOverride::new())).await.unwrap();
        assert_eq!(handle.queue, QUEUE);

        let leased = backend.dequeue(QUEUE, LEASE).await.unwrap().unwrap();
        assert_eq!(leased.record.id, handle.id);
        assert_eq!(leased.record.attempts_made, 1);
        assert!(backend.dequeue(QUEUE, LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dedup_returns_existing_handle() {
        let backend = MemoryBackend::new();
        let overrides = JobOptionsOverride::new().with_dedup_key("bulk:1:0");

        let first = backend.enqueue(QUEUE, reply_job("Jane", overrides.clone())).await.unwrap();
        let second = backend.enqueue(QUEUE, reply_job("Jane", overrides)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(backend.counts(QUEUE).await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn test_priority_then_submission_order() {
        let backend = MemoryBackend::new();
        let low = backend.enqueue(QUEUE, reply_job("low", JobOptionsOverride::new().with_priority(9))).await.unwrap();
        let high = backend.enqueue(QUEUE, reply_job("high", JobOptionsOverride::new().with_priority(1))).await.unwrap();
        let unset = backend.enqueue(QUEUE, reply_job("unset", JobOptionsOverride::new())).await.unwrap();
        let high2 = backend.enqueue(QUEUE, reply_job("high2", JobOptionsOverride::new().with_priority(1))).await.unwrap();

        let mut order = Vec::new();
        while let Some(leased) = backend.dequeue(QUEUE, LEASE).await.unwrap() {
            order.push(leased.record.id);
        }
        assert_eq!(order, vec![unset.id, high.id, high2.id, low.id]);
    }

    #[tokio::test]
    async fn test_stale_token_rejected() {
        let backend = MemoryBackend::new();
        let handle = backend.enqueue(QUEUE, reply_job("Jane", JobOptionsOverride::new())).await.unwrap();
        backend.dequeue(QUEUE, LEASE).await.unwrap().unwrap();

        let result = backend.ack_complete(QUEUE, &handle.id, &LeaseToken::new(), None).await;
        assert!(matches!(result, Err(QueueError::InvalidLeaseToken)));
    }

    #[tokio::test]
    async fn test_retention_prunes_oldest_completed() {
        let backend = MemoryBackend::new();
        let overrides = JobOptionsOverride::new().with_retention(2, 200);

        let mut ids = Vec::new();
        for i in 0..3 {
            let job = reply_job(&format!("User{}", i), overrides.clone());
            ids.push(backend.enqueue(QUEUE, job).await.unwrap().id);
        }
        for _ in 0..3 {
            let leased = backend.dequeue(QUEUE, LEASE).await.unwrap().unwrap();
            backend.ack_complete(QUEUE, leased.id(), &leased.lease_token, None).await.unwrap();
        }

        assert_eq!(backend.counts(QUEUE).await.unwrap().completed, 2);
        assert!(matches!(
            backend.get_record(QUEUE, &ids[0]).await,
            Err(QueueError::JobNotFound(_))
        ));
        assert!(backend.get_record(QUEUE, &ids[2]).await.is_ok());
    }

    #[tokio::test]
    async fn test_reclaim_stalled_job() {
        let backend = MemoryBackend::new();
        let overrides = JobOptionsOverride::new().with_backoff(BackoffPolicy::fixed(0));
        let handle = backend.enqueue(QUEUE, reply_job("Jane", overrides)).await.unwrap();
        backend.dequeue(QUEUE, LEASE).await.unwrap().unwrap();

        backend.force_lease_expiry(&handle.id).unwrap();
        assert_eq!(backend.reclaim_stalled(QUEUE).await.unwrap(), 1);

        let retried = backend.dequeue(QUEUE, LEASE).await.unwrap().unwrap();
        assert_eq!(retried.record.id, handle.id);
        assert_eq!(retried.record.attempts_made, 2);
        assert_eq!(retried.record.last_error.as_deref(), Some("Lease expired"));
    }

    #[tokio::test]
    async fn test_offline_backend_is_unavailable() {
        let backend = MemoryBackend::new();
        backend.set_available(false);

        let result = backend.enqueue(QUEUE, reply_job("Jane", JobOptionsOverride::new())).await;
        assert!(matches!(result, Err(QueueError::QueueUnavailable(_))));

        backend.set_available(true);
        assert!(backend.enqueue(QUEUE, reply_job("Jane", JobOptionsOverride::new())).await.is_ok());
    }
}
