use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobId, JobKind, JobOptions, JobPayload, LeaseToken};
use crate::{QueueError, QueueResult};

/// `now + delay`, saturating at the latest representable time
pub(crate) fn deadline_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Job status lifecycle. A job is in exactly one of these at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Eligible for dequeue
    Waiting,

    /// Backing off (or initially delayed) until `run_at`
    Delayed { run_at: DateTime<Utc> },

    /// Leased by a worker
    Active { lease_until: DateTime<Utc> },

    Completed { completed_at: DateTime<Utc> },

    /// Terminal failure; `exhausted` is set when every attempt was used
    Failed { failed_at: DateTime<Utc>, error: String, exhausted: bool },
}

impl JobStatus {
    pub fn state(&self) -> JobState {
        match self {
            Self::Waiting => JobState::Waiting,
            Self::Delayed { .. } => JobState::Delayed,
            Self::Active { .. } => JobState::Active,
            Self::Completed { .. } => JobState::Completed,
            Self::Failed { .. } => JobState::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    /// Eligible for dequeue at `now`
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Waiting => true,
            Self::Delayed { run_at } => *run_at <= now,
            _ => false,
        }
    }
}

/// The set a job currently belongs to, for listing and counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Delayed => "delayed",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// A job as submitted, before the backend assigns identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub payload: JobPayload,
    pub options: JobOptions,
}

impl NewJob {
    pub fn new(payload: JobPayload, options: JobOptions) -> Self {
        Self { payload, options }
    }

    /// New job with the default options of its kind
    pub fn with_defaults(payload: JobPayload) -> Self {
        let options = JobOptions::defaults_for_payload(&payload);
        Self { payload, options }
    }

    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }
}

/// Returned by every enqueue, before the job runs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: JobId,
    pub queue: String,
    pub kind: JobKind,
}

/// Job record - runtime state owned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub queue: String,
    pub kind: JobKind,
    pub payload: JobPayload,
    pub options: JobOptions,
    pub status: JobStatus,

    /// Attempts started so far; only the backend changes this
    pub attempts_made: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub return_value: Option<serde_json::Value>,
    pub lease_token: Option<LeaseToken>,
}

impl JobRecord {
    pub fn new(id: JobId, queue: impl Into<String>, job: NewJob) -> Self {
        let now = Utc::now();
        let status = if job.options.delay_ms > 0 {
            JobStatus::Delayed { run_at: deadline_after(now, Duration::from_millis(job.options.delay_ms)) }
        } else {
            JobStatus::Waiting
        };

        Self {
            id,
            queue: queue.into(),
            kind: job.payload.kind(),
            payload: job.payload,
            options: job.options,
            status,
            attempts_made: 0,
            created_at: now,
            updated_at: now,
            finished_at: None,
            last_error: None,
            return_value: None,
            lease_token: None,
        }
    }

    pub fn handle(&self) -> JobHandle {
        JobHandle { id: self.id.clone(), queue: self.queue.clone(), kind: self.kind }
    }

    pub fn lease_until(&self) -> Option<DateTime<Utc>> {
        match self.status {
            JobStatus::Active { lease_until } => Some(lease_until),
            _ => None,
        }
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.lease_until().is_some_and(|until| until < now)
    }

    /// Verify `lease_token` is the live lease on this job
    pub fn check_lease(&self, lease_token: &LeaseToken, now: DateTime<Utc>) -> QueueResult<()> {
        if self.status.is_terminal() {
            return Err(QueueError::JobAlreadyTerminal);
        }
        if self.lease_token.as_ref() != Some(lease_token) {
            return Err(QueueError::InvalidLeaseToken);
        }
        if self.lease_expired(now) {
            return Err(QueueError::LeaseExpired);
        }
        Ok(())
    }

    pub fn can_retry(&self) -> bool {
        self.attempts_made < self.options.max_attempts
    }

    /// Lease the job to a worker, starting a new attempt
    pub fn start_attempt(&mut self, lease_token: LeaseToken, lease_until: DateTime<Utc>) {
        self.attempts_made += 1;
        self.status = JobStatus::Active { lease_until };
        self.lease_token = Some(lease_token);
        self.updated_at = Utc::now();
    }

    pub fn complete(&mut self, return_value: Option<serde_json::Value>) {
        let now = Utc::now();
        self.status = JobStatus::Completed { completed_at: now };
        self.return_value = return_value;
        self.lease_token = None;
        self.finished_at = Some(now);
        self.updated_at = now;
    }

    /// Record a failed attempt and decide the next state.
    ///
    /// Returns the retry time when the job goes back to the delayed set.
    pub fn fail_attempt(&mut self, error: String, permanent: bool) -> Option<DateTime<Utc>> {
        let now = Utc::now();
        self.last_error = Some(error.clone());
        self.lease_token = None;
        self.updated_at = now;

        if !permanent && self.can_retry() {
            let run_at = deadline_after(now, self.options.backoff.delay_for(self.attempts_made));
            self.status = JobStatus::Delayed { run_at };
            Some(run_at)
        } else {
            self.status = JobStatus::Failed {
                failed_at: now,
                error,
                exhausted: !permanent,
            };
            self.finished_at = Some(now);
            None
        }
    }

    /// Error describing a terminal failure, for callers inspecting the failed set
    pub fn terminal_error(&self) -> Option<QueueError> {
        match &self.status {
            JobStatus::Failed { error, exhausted: true, .. } => Some(QueueError::RetriesExhausted {
                job_id: self.id.to_string(),
                attempts: self.attempts_made,
                last_error: error.clone(),
            }),
            JobStatus::Failed { error, .. } => Some(QueueError::Internal(error.clone())),
            _ => None,
        }
    }
}

/// A job that has been leased for processing
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub record: JobRecord,
    pub lease_token: LeaseToken,
    pub lease_until: DateTime<Utc>,
}

impl LeasedJob {
    pub fn id(&self) -> &JobId {
        &self.record.id
    }

    pub fn payload(&self) -> &JobPayload {
        &self.record.payload
    }
}

/// Job counts per state for one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BackoffPolicy, JobOptionsOverride, ReplyJobData};

    fn reply_job(overrides: JobOptionsOverride) -> NewJob {
        let payload = JobPayload::ReplySend(ReplyJobData {
            name: "Jane".to_string(),
            product_name: "Premium Plan".to_string(),
            amount: 99.99,
        });
        let options = JobOptions::defaults_for_payload(&payload).merge(&overrides);
        NewJob::new(payload, options)
    }

    #[test]
    fn test_new_record_is_waiting() {
        let record = JobRecord::new(JobId::new(), "ReplyMessageQueue", reply_job(JobOptionsOverride::new()));
        assert_eq!(record.status, JobStatus::Waiting);
        assert_eq!(record.attempts_made, 0);
        assert_eq!(record.options.max_attempts, 3);
    }

    #[test]
    fn test_delay_option_starts_delayed() {
        let record = JobRecord::new(
            JobId::new(),
            "ReplyMessageQueue",
            reply_job(JobOptionsOverride::new().with_delay_ms(60_000)),
        );
        assert_eq!(record.status.state(), JobState::Delayed);
        assert!(!record.status.is_eligible(Utc::now()));
    }

    #[test]
    fn test_huge_delays_saturate() {
        let record = JobRecord::new(
            JobId::new(),
            "ReplyMessageQueue",
            reply_job(JobOptionsOverride::new().with_delay_ms(u64::MAX)),
        );
        assert_eq!(record.status, JobStatus::Delayed { run_at: DateTime::<Utc>::MAX_UTC });

        let mut record = JobRecord::new(
            JobId::new(),
            "q",
            reply_job(JobOptionsOverride::new().with_backoff(BackoffPolicy::exponential(u64::MAX / 2))),
        );
        record.start_attempt(LeaseToken::new(), Utc::now());
        assert_eq!(record.fail_attempt("boom".to_string(), false), Some(DateTime::<Utc>::MAX_UTC));

        let now = Utc::now();
        assert_eq!(deadline_after(now, Duration::from_secs(5)), now + chrono::Duration::seconds(5));
    }

    #[test]
    fn test_fail_attempt_schedules_exponential_retry() {
        let mut record = JobRecord::new(JobId::new(), "q", reply_job(JobOptionsOverride::new()));
        record.start_attempt(LeaseToken::new(), Utc::now() + chrono::Duration::seconds(30));

        let before = Utc::now();
        let retry_at = record.fail_attempt("boom".to_string(), false).unwrap();
        let delay = retry_at - before;
        assert!(delay >= chrono::Duration::milliseconds(4_900) && delay <= chrono::Duration::milliseconds(5_100));

        record.start_attempt(LeaseToken::new(), Utc::now() + chrono::Duration::seconds(30));
        let before = Utc::now();
        let retry_at = record.fail_attempt("boom".to_string(), false).unwrap();
        let delay = retry_at - before;
        assert!(delay >= chrono::Duration::milliseconds(9_900) && delay <= chrono::Duration::milliseconds(10_100));
    }

    #[test]
    fn test_exhaustion_is_terminal() {
        let overrides = JobOptionsOverride::new()
            .with_max_attempts(1)
            .with_backoff(BackoffPolicy::fixed(10));
        let mut record = JobRecord::new(JobId::new(), "q", reply_job(overrides));
        record.start_attempt(LeaseToken::new(), Utc::now());

        assert!(record.fail_attempt("boom".to_string(), false).is_none());
        assert!(matches!(record.status, JobStatus::Failed { exhausted: true, .. }));
        assert!(matches!(
            record.terminal_error(),
            Some(QueueError::RetriesExhausted { attempts: 1, .. })
        ));
    }

    #[test]
    fn test_permanent_failure_skips_remaining_attempts() {
        let mut record = JobRecord::new(JobId::new(), "q", reply_job(JobOptionsOverride::new()));
        record.start_attempt(LeaseToken::new(), Utc::now());

        assert!(record.fail_attempt("undecodable".to_string(), true).is_none());
        assert!(matches!(record.status, JobStatus::Failed { exhausted: false, .. }));
    }
}
