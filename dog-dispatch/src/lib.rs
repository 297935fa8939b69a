//! # dog-dispatch: Typed Job Dispatch
//!
//! Durable background jobs for four job kinds (email, data processing,
//! reply messages and bulk reply batches) with:
//!
//! - **Typed payloads and options**: one payload type per job kind, default
//!   retry/backoff/retention policy per kind, caller overrides merged field by field
//! - **Backend-owned retries**: attempts, backoff and terminal failure are
//!   decided by the queue backend, never by the worker
//! - **Readiness gate**: workers hold jobs until the host process has
//!   finished bootstrapping, with a bounded wait
//! - **Throttled bulk fan-out**: one batch job expands into many reply jobs
//! - **Lease semantics**: lease tokens, heartbeats and stalled-job reclaim
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dog_dispatch::prelude::*;
//!
//! # async fn run() -> QueueResult<()> {
//! let adapter = QueueAdapter::new(MemoryBackend::new());
//! let registry = adapter.standard_processors(Effects::default())?;
//! let workers = adapter.start_workers(&registry);
//!
//! // Jobs wait until the process says it is ready
//! adapter.readiness().mark_ready();
//!
//! let handle = adapter
//!     .producer()
//!     .enqueue_reply(ReplyJobData {
//!         name: "Jane".to_string(),
//!         product_name: "Premium Plan".to_string(),
//!         amount: 99.99,
//!     })
//!     .await?;
//! println!("queued {} on {}", handle.id, handle.queue);
//!
//! workers.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod types;
pub mod error;
pub mod config;
pub mod readiness;
pub mod backend;
pub mod producer;
pub mod job;
pub mod effects;
pub mod processors;
pub mod worker;
pub mod adapter;
pub mod observability;

// Core API exports
pub use adapter::QueueAdapter;
pub use types::{
    Attachment, BackoffKind, BackoffPolicy, BulkReplyJobData, BulkSummary, DataProcessed,
    EmailJobData, EmailSent, JobEvent, JobHandle, JobId, JobKind, JobOptions, JobOptionsOverride,
    JobOutput, JobPayload, JobRecord, JobState, JobStatus, LeasedJob, NewJob, PartialReplyJobData,
    ProcessingJobData, ProcessingOptions, QueueCounts, ReplyJobData, ReplySent, Retention,
};
pub use error::{EffectError, JobError, NotReadyTimeout, QueueError, QueueResult};
pub use config::{QueueConfig, Settings};
pub use readiness::{ReadinessGate, ReadyGuard};
pub use backend::QueueBackend;
pub use producer::Producer;
pub use job::{Processor, ProcessorRegistry};
pub use effects::Effects;
pub use worker::{Worker, WorkerHandle};

// Backend implementations
#[cfg(feature = "memory")]
pub use backend::memory::MemoryBackend;

#[cfg(feature = "redis")]
pub use backend::redis::RedisBackend;

/// Prelude for producing and processing jobs
pub mod prelude {
    pub use crate::{
        QueueAdapter, QueueBackend, Producer, Processor, ProcessorRegistry, WorkerHandle,
    };

    pub use crate::{
        JobId, JobKind, JobHandle, JobStatus, JobOutput, JobOptionsOverride, BackoffPolicy,
        JobError, QueueError, QueueResult,
    };

    pub use crate::{
        EmailJobData, ProcessingJobData, ReplyJobData, PartialReplyJobData,
    };

    pub use crate::{Effects, ReadinessGate, QueueConfig, Settings};

    #[cfg(feature = "memory")]
    pub use crate::MemoryBackend;

    pub use async_trait::async_trait;
}
