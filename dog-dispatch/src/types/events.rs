use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobId, JobKind};

/// Lifecycle events broadcast by a backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    Enqueued {
        job_id: JobId,
        queue: String,
        kind: JobKind,
        at: DateTime<Utc>,
    },

    /// Leased by a worker for a new attempt
    Active {
        job_id: JobId,
        attempt: u32,
        lease_until: DateTime<Utc>,
        at: DateTime<Utc>,
    },

    /// Attempt failed, waiting for its backoff delay
    Delayed {
        job_id: JobId,
        run_at: DateTime<Utc>,
        error: String,
        at: DateTime<Utc>,
    },

    Completed {
        job_id: JobId,
        at: DateTime<Utc>,
    },

    Failed {
        job_id: JobId,
        error: String,
        at: DateTime<Utc>,
    },

    /// The lease expired while active; the worker is presumed dead
    Stalled {
        job_id: JobId,
        at: DateTime<Utc>,
    },
}

impl JobEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Active { .. } => "active",
            Self::Delayed { .. } => "delayed",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Stalled { .. } => "stalled",
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Enqueued { job_id, .. }
            | Self::Active { job_id, .. }
            | Self::Delayed { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::Stalled { job_id, .. } => job_id,
        }
    }

    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Enqueued { at, .. }
            | Self::Active { at, .. }
            | Self::Delayed { at, .. }
            | Self::Completed { at, .. }
            | Self::Failed { at, .. }
            | Self::Stalled { at, .. } => at,
        }
    }
}
