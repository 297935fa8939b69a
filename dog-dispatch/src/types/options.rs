use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{JobKind, JobPayload};

/// How the delay between attempts grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// Retry delay policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub kind: BackoffKind,
    pub delay_ms: u64,
}

impl BackoffPolicy {
    pub fn fixed(delay_ms: u64) -> Self {
        Self { kind: BackoffKind::Fixed, delay_ms }
    }

    pub fn exponential(delay_ms: u64) -> Self {
        Self { kind: BackoffKind::Exponential, delay_ms }
    }

    /// Delay before the next attempt, after `attempts_made` attempts have failed.
    ///
    /// `fixed` always waits `delay_ms`; `exponential` waits
    /// `delay_ms * 2^(attempts_made - 1)`, saturating on overflow.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        let millis = match self.kind {
            BackoffKind::Fixed => self.delay_ms,
            BackoffKind::Exponential => {
                let exponent = attempts_made.saturating_sub(1);
                let factor = 2_u64.checked_pow(exponent).unwrap_or(u64::MAX);
                self.delay_ms.saturating_mul(factor)
            }
        };
        Duration::from_millis(millis)
    }
}

/// How many terminal jobs a queue keeps for inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retention {
    pub completed: u32,
    /// `None` keeps every failed job
    #[serde(default)]
    pub failed: Option<u32>,
}

/// Fully resolved scheduling options carried by every job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    /// Lower runs sooner; `None` sorts ahead of every prioritized job
    pub priority: Option<u32>,
    pub retention: Retention,
    /// Initial delay before the job becomes eligible
    #[serde(default)]
    pub delay_ms: u64,
    /// While a job with the same key is retained, enqueue returns it instead of a copy
    #[serde(default)]
    pub dedup_key: Option<String>,
}

const DEFAULT_PROCESSING_PRIORITY: u32 = 5;

impl JobOptions {
    /// Fixed default policy per job kind
    pub fn defaults_for(kind: JobKind) -> Self {
        let (max_attempts, backoff, completed) = match kind {
            JobKind::EmailSend => (3, BackoffPolicy::exponential(5_000), 100),
            JobKind::DataProcess => (2, BackoffPolicy::fixed(10_000), 100),
            JobKind::ReplySend => (3, BackoffPolicy::exponential(5_000), 100),
            JobKind::BulkReplyBatch => (2, BackoffPolicy::fixed(10_000), 50),
        };

        Self {
            max_attempts,
            backoff,
            priority: None,
            retention: Retention { completed, failed: None },
            delay_ms: 0,
            dedup_key: None,
        }
    }

    /// Defaults for a concrete payload. Processing jobs take their priority
    /// from the payload options, falling back to 5.
    pub fn defaults_for_payload(payload: &JobPayload) -> Self {
        let mut options = Self::defaults_for(payload.kind());
        if let JobPayload::DataProcess(data) = payload {
            let priority = data
                .options
                .as_ref()
                .and_then(|o| o.priority)
                .filter(|p| *p > 0)
                .unwrap_or(DEFAULT_PROCESSING_PRIORITY);
            options.priority = Some(priority);
        }
        options
    }

    /// Apply caller overrides field by field; caller values win
    pub fn merge(mut self, overrides: &JobOptionsOverride) -> Self {
        if let Some(max_attempts) = overrides.max_attempts {
            self.max_attempts = max_attempts.max(1);
        }
        if let Some(backoff) = overrides.backoff {
            self.backoff = backoff;
        }
        if let Some(priority) = overrides.priority {
            self.priority = Some(priority);
        }
        if let Some(completed) = overrides.retention_completed {
            self.retention.completed = completed;
        }
        if let Some(failed) = overrides.retention_failed {
            self.retention.failed = Some(failed);
        }
        if let Some(delay_ms) = overrides.delay_ms {
            self.delay_ms = delay_ms;
        }
        if let Some(ref key) = overrides.dedup_key {
            self.dedup_key = Some(key.clone());
        }
        self
    }

    /// Sort key used for dequeue ordering
    pub fn priority_key(&self) -> u32 {
        self.priority.unwrap_or(0)
    }
}

/// Per-call overrides; `None` keeps the default
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptionsOverride {
    pub max_attempts: Option<u32>,
    pub backoff: Option<BackoffPolicy>,
    pub priority: Option<u32>,
    pub retention_completed: Option<u32>,
    pub retention_failed: Option<u32>,
    pub delay_ms: Option<u64>,
    pub dedup_key: Option<String>,
}

impl JobOptionsOverride {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_retention(mut self, completed: u32, failed: u32) -> Self {
        self.retention_completed = Some(completed);
        self.retention_failed = Some(failed);
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }
}
