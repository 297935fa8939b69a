pub mod ids;
pub mod kind;
pub mod payload;
pub mod options;
pub mod record;
pub mod events;
pub mod output;

pub use ids::{JobId, LeaseToken};
pub use kind::JobKind;
pub use payload::{
    Attachment, BulkReplyJobData, EmailJobData, JobPayload, PartialReplyJobData,
    ProcessingJobData, ProcessingOptions, ReplyJobData,
};
pub use options::{BackoffKind, BackoffPolicy, JobOptions, JobOptionsOverride, Retention};
pub use record::{JobHandle, JobRecord, JobState, JobStatus, LeasedJob, NewJob, QueueCounts};
pub(crate) use record::deadline_after;
pub use events::JobEvent;
pub use output::{BulkSummary, DataProcessed, EmailSent, JobOutput, ReplySent};
