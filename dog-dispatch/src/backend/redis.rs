//! Redis-backed queue storage.
//!
//! Layout per queue, under `{prefix}{queue}`:
//!
//! - `:job:{id}` the JSON job record
//! - `:wait` sorted set scored by priority, then submission sequence
//! - `:delayed` sorted set scored by run-at millis
//! - `:active` sorted set scored by lease deadline millis
//! - `:completed` / `:failed` lists, oldest first
//! - `:prio` hash of job id to priority, `:seq` submission counter
//! - `:dedup:{key}` job id holding a dedup key
//!
//! Wait scores are `priority * 2^32 + seq` in a double, so priorities are
//! capped at [`MAX_PRIORITY`] and the sequence wraps at 2^32.
//!
//! Events are broadcast to subscribers in this process only.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    QueueResult, QueueError, JobId, JobHandle, JobRecord, JobState, JobStatus,
    LeasedJob, NewJob, QueueCounts, JobEvent, backend::{QueueBackend, BoxStream},
    config::RedisSettings, types::{deadline_after, LeaseToken}
};

/// Highest priority that keeps the wait score exact
pub const MAX_PRIORITY: u32 = 2_097_151;

/// Store a new job unless a live job already holds its dedup key.
/// KEYS: prio, seq, wait, delayed, dedup.
/// ARGV: job key prefix, job id, record json, priority, run-at millis or '', '1' to dedup.
/// Returns the id of the stored or existing job.
const ENQUEUE_SCRIPT: &str = r#"
local id = ARGV[2]
if ARGV[6] == '1' then
  local existing = redis.call('GET', KEYS[5])
  if existing and redis.call('EXISTS', ARGV[1] .. existing) == 1 then
    return existing
  end
end
redis.call('SET', ARGV[1] .. id, ARGV[3])
redis.call('HSET', KEYS[1], id, ARGV[4])
if ARGV[5] ~= '' then
  redis.call('ZADD', KEYS[4], ARGV[5], id)
else
  local seq = redis.call('INCR', KEYS[2]) % 4294967296
  redis.call('ZADD', KEYS[3], tonumber(ARGV[4]) * 4294967296 + seq, id)
end
if ARGV[6] == '1' then
  redis.call('SET', KEYS[5], id)
end
return id
"#;

/// Promote due delayed jobs, then move the head of the wait set to active.
/// KEYS: delayed, wait, prio, seq, active. ARGV: now millis, lease deadline millis.
const DEQUEUE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, id in ipairs(due) do
  redis.call('ZREM', KEYS[1], id)
  local prio = tonumber(redis.call('HGET', KEYS[3], id) or '0')
  local seq = redis.call('INCR', KEYS[4]) % 4294967296
  redis.call('ZADD', KEYS[2], prio * 4294967296 + seq, id)
end
local head = redis.call('ZPOPMIN', KEYS[2])
if #head == 0 then
  return false
end
redis.call('ZADD', KEYS[5], ARGV[2], head[1])
return head[1]
"#;

struct Keys {
    base: String,
}

impl Keys {
    fn new(prefix: &str, queue: &str) -> Self {
        Self { base: format!("{}{}", prefix, queue) }
    }

    fn job_prefix(&self) -> String {
        format!("{}:job:", self.base)
    }

    fn job(&self, job_id: &JobId) -> String {
        format!("{}{}", self.job_prefix(), job_id)
    }

    fn dedup(&self, key: &str) -> String {
        format!("{}:dedup:{}", self.base, key)
    }

    fn set(&self, name: &str) -> String {
        format!("{}:{}", self.base, name)
    }
}

fn wait_priority(priority: u32) -> u32 {
    priority.min(MAX_PRIORITY)
}

/// Queue backend on a shared Redis connection
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
    prefix: String,
    enqueue_script: Script,
    dequeue_script: Script,
    event_broadcaster: broadcast::Sender<JobEvent>,
}

impl RedisBackend {
    /// Connect and verify the server answers PING
    pub async fn connect(settings: &RedisSettings) -> QueueResult<Self> {
        info!("Connecting queue backend to Redis at {}:{}", settings.host, settings.port);

        let client = Client::open(settings.url())?;
        let conn = ConnectionManager::new(client).await?;

        let mut ping = conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut ping).await?;

        let (event_broadcaster, _) = broadcast::channel(1000);
        Ok(Self {
            conn,
            prefix: settings.prefix.clone(),
            enqueue_script: Script::new(ENQUEUE_SCRIPT),
            dequeue_script: Script::new(DEQUEUE_SCRIPT),
            event_broadcaster,
        })
    }

    fn keys(&self, queue: &str) -> Keys {
        Keys::new(&self.prefix, queue)
    }

    fn emit(&self, event: JobEvent) {
        let _ = self.event_broadcaster.send(event);
    }

    async fn load(&self, keys: &Keys, job_id: &JobId) -> QueueResult<Option<JobRecord>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(keys.job(job_id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn load_existing(&self, keys: &Keys, job_id: &JobId) -> QueueResult<JobRecord> {
        self.load(keys, job_id)
            .await?
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))
    }

    async fn store(&self, keys: &Keys, record: &JobRecord) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(record)?;
        let _: () = conn.set(keys.job(&record.id), raw).await?;
        Ok(())
    }

    /// Push a terminal job onto its list and drop the oldest beyond `keep`; `None` keeps every job
    async fn retain_terminal(&self, keys: &Keys, job_id: &JobId, list: &str, keep: Option<u32>) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let list_key = keys.set(list);
        let len: usize = conn.rpush(&list_key, job_id.as_str()).await?;
        let keep = match keep {
            Some(keep) if len > keep as usize => keep as usize,
            _ => return Ok(()),
        };

        let overflow = len - keep;
        let pruned: Vec<String> = redis::cmd("LPOP")
            .arg(&list_key)
            .arg(overflow)
            .query_async(&mut conn)
            .await?;

        for old in pruned {
            let old = JobId::from(old);
            let record = self.load(keys, &old).await?;
            let mut pipe = redis::pipe();
            pipe.atomic()
                .del(keys.job(&old)).ignore()
                .hdel(keys.set("prio"), old.as_str()).ignore();
            if let Some(key) = record.and_then(|r| r.options.dedup_key) {
                pipe.del(keys.dedup(&key)).ignore();
            }
            let _: () = pipe.query_async(&mut conn).await?;
            debug!("Pruned job {} from {}", old, keys.base);
        }
        Ok(())
    }

    /// Record a failed attempt on an active job and file it under delayed or failed
    async fn fail_active(
        &self,
        keys: &Keys,
        mut record: JobRecord,
        error: String,
        permanent: bool,
    ) -> QueueResult<(JobStatus, JobEvent)> {
        let now = Utc::now();
        let retry_at = record.fail_attempt(error.clone(), permanent);
        self.store(keys, &record).await?;

        let mut conn = self.conn.clone();
        let _: () = conn.zrem(keys.set("active"), record.id.as_str()).await?;

        let event = match retry_at {
            Some(run_at) => {
                let _: () = conn
                    .zadd(keys.set("delayed"), record.id.as_str(), run_at.timestamp_millis())
                    .await?;
                JobEvent::Delayed { job_id: record.id.clone(), run_at, error, at: now }
            }
            None => {
                self.retain_terminal(keys, &record.id, "failed", record.options.retention.failed)
                    .await?;
                JobEvent::Failed { job_id: record.id.clone(), error, at: now }
            }
        };
        Ok((record.status, event))
    }
}

/// Delayed records whose time has passed are reported as waiting
fn normalize(mut record: JobRecord, now: DateTime<Utc>) -> JobRecord {
    if let JobStatus::Delayed { run_at } = record.status {
        if run_at <= now {
            record.status = JobStatus::Waiting;
        }
    }
    record
}

#[async_trait]
impl QueueBackend for RedisBackend {
    async fn enqueue(&self, queue: &str, job: NewJob) -> QueueResult<JobHandle> {
        let keys = self.keys(queue);
        let mut conn = self.conn.clone();

        let job_id = JobId::new();
        let record = JobRecord::new(job_id.clone(), queue, job);
        let handle = record.handle();
        let raw = serde_json::to_string(&record)?;
        let run_at = match record.status {
            JobStatus::Delayed { run_at } => run_at.timestamp_millis().to_string(),
            _ => String::new(),
        };
        let dedup_key = record.options.dedup_key.as_deref().unwrap_or_default();

        let stored: String = self
            .enqueue_script
            .key(keys.set("prio"))
            .key(keys.set("seq"))
            .key(keys.set("wait"))
            .key(keys.set("delayed"))
            .key(keys.dedup(dedup_key))
            .arg(keys.job_prefix())
            .arg(job_id.as_str())
            .arg(raw)
            .arg(wait_priority(record.options.priority_key()))
            .arg(run_at)
            .arg(if record.options.dedup_key.is_some() { "1" } else { "0" })
            .invoke_async(&mut conn)
            .await?;

        if stored != job_id.as_str() {
            let existing = self.load_existing(&keys, &JobId::from(stored)).await?;
            debug!("Dedup key {} matched existing job {}", dedup_key, existing.id);
            return Ok(existing.handle());
        }

        self.emit(JobEvent::Enqueued {
            job_id,
            queue: queue.to_string(),
            kind: handle.kind,
            at: record.created_at,
        });
        Ok(handle)
    }

    async fn dequeue(&self, queue: &str, lease_duration: Duration) -> QueueResult<Option<LeasedJob>> {
        let keys = self.keys(queue);
        let mut conn = self.conn.clone();
        let now = Utc::now();
        let lease_until = deadline_after(now, lease_duration);

        let popped: Option<String> = self
            .dequeue_script
            .key(keys.set("delayed"))
            .key(keys.set("wait"))
            .key(keys.set("prio"))
            .key(keys.set("seq"))
            .key(keys.set("active"))
            .arg(now.timestamp_millis())
            .arg(lease_until.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        let job_id = match popped {
            Some(id) => JobId::from(id),
            None => return Ok(None),
        };

        let mut record = match self.load(&keys, &job_id).await? {
            Some(record) => record,
            None => {
                // Pruned between scheduling and now; drop the dangling id
                let _: () = conn.zrem(keys.set("active"), job_id.as_str()).await?;
                return Ok(None);
            }
        };

        let lease_token = LeaseToken::new();
        record.start_attempt(lease_token.clone(), lease_until);
        self.store(&keys, &record).await?;

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
        let keys = self.keys(queue);
        let now = Utc::now();

        let mut record = self.load_existing(&keys, job_id).await?;
        record.check_lease(lease_token, now)?;
        record.complete(return_value);
        self.store(&keys, &record).await?;

        let mut conn = self.conn.clone();
        let _: () = conn.zrem(keys.set("active"), job_id.as_str()).await?;
        self.retain_terminal(&keys, job_id, "completed", Some(record.options.retention.completed))
            .await?;

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
        let keys = self.keys(queue);
        let record = self.load_existing(&keys, job_id).await?;
        record.check_lease(lease_token, Utc::now())?;

        let (status, event) = self.fail_active(&keys, record, error, permanent).await?;
        self.emit(event);
        Ok(status)
    }

    async fn heartbeat_extend(
        &self,
        queue: &str,
        job_id: &JobId,
        lease_token: &LeaseToken,
        lease_duration: Duration,
    ) -> QueueResult<()> {
        let keys = self.keys(queue);
        let now = Utc::now();

        let mut record = self.load_existing(&keys, job_id).await?;
        record.check_lease(lease_token, now)?;

        if let JobStatus::Active { ref mut lease_until } = record.status {
            *lease_until = deadline_after(now, lease_duration);
            record.updated_at = now;
            let deadline = lease_until.timestamp_millis();
            self.store(&keys, &record).await?;

            let mut conn = self.conn.clone();
            let _: () = conn.zadd(keys.set("active"), job_id.as_str(), deadline).await?;
        }
        Ok(())
    }

    async fn reclaim_stalled(&self, queue: &str) -> QueueResult<usize> {
        let keys = self.keys(queue);
        let now = Utc::now();
        let mut conn = self.conn.clone();

        let expired: Vec<String> = conn
            .zrangebyscore(keys.set("active"), "-inf", now.timestamp_millis())
            .await?;

        let mut reclaimed = 0;
        for id in expired {
            let job_id = JobId::from(id);
            let record = match self.load(&keys, &job_id).await? {
                Some(record) if record.lease_expired(now) => record,
                _ => continue,
            };

            // Whoever removes the id from the active set owns the reclaim
            let removed: usize = conn.zrem(keys.set("active"), job_id.as_str()).await?;
            if removed == 0 {
                continue;
            }

            debug!("Reclaiming expired lease for job: {}", job_id);
            self.emit(JobEvent::Stalled { job_id: job_id.clone(), at: now });
            let (_, event) = self.fail_active(&keys, record, "Lease expired".to_string(), false).await?;
            self.emit(event);
            reclaimed += 1;
        }

        Ok(reclaimed)
    }

    async fn get_record(&self, queue: &str, job_id: &JobId) -> QueueResult<JobRecord> {
        let keys = self.keys(queue);
        let record = self.load_existing(&keys, job_id).await?;
        Ok(normalize(record, Utc::now()))
    }

    async fn list(&self, queue: &str, state: JobState, limit: usize) -> QueueResult<Vec<JobRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let keys = self.keys(queue);
        let mut conn = self.conn.clone();
        let stop = limit as isize - 1;

        let ids: Vec<String> = match state {
            JobState::Waiting => conn.zrange(keys.set("wait"), 0, stop).await?,
            JobState::Delayed => conn.zrange(keys.set("delayed"), 0, stop).await?,
            JobState::Active => conn.zrange(keys.set("active"), 0, stop).await?,
            JobState::Completed => conn.lrange(keys.set("completed"), 0, stop).await?,
            JobState::Failed => conn.lrange(keys.set("failed"), 0, stop).await?,
        };

        let now = Utc::now();
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.load(&keys, &JobId::from(id)).await? {
                records.push(normalize(record, now));
            }
        }
        Ok(records)
    }

    async fn counts(&self, queue: &str) -> QueueResult<QueueCounts> {
        let keys = self.keys(queue);
        let mut conn = self.conn.clone();

        let (waiting, delayed, active, completed, failed): (usize, usize, usize, usize, usize) = redis::pipe()
            .zcard(keys.set("wait"))
            .zcard(keys.set("delayed"))
            .zcard(keys.set("active"))
            .llen(keys.set("completed"))
            .llen(keys.set("failed"))
            .query_async(&mut conn)
            .await?;

        Ok(QueueCounts { waiting, delayed, active, completed, failed })
    }

    fn events(&self) -> BoxStream<JobEvent> {
        let receiver = self.event_broadcaster.subscribe();
        use tokio_stream::{wrappers::BroadcastStream, StreamExt};
        let stream = BroadcastStream::new(receiver)
            .filter_map(|result| result.ok());

        Box::pin(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = Keys::new("app_queue_", "emailQueue");
        assert_eq!(keys.job(&JobId::from("42")), "app_queue_emailQueue:job:42");
        assert_eq!(keys.set("wait"), "app_queue_emailQueue:wait");
        assert_eq!(keys.dedup("bulk:7:0"), "app_queue_emailQueue:dedup:bulk:7:0");
    }

    #[test]
    fn test_wait_priority_is_capped() {
        assert_eq!(wait_priority(5), 5);
        assert_eq!(wait_priority(u32::MAX), MAX_PRIORITY);

        // Highest capped score plus the largest sequence still fits a double exactly
        let top = MAX_PRIORITY as f64 * 4_294_967_296.0;
        assert_ne!(top + 4_294_967_295.0, top + 4_294_967_294.0);
    }
}
