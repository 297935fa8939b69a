//! One processor per job kind, each gated on process readiness.

mod bulk;
mod data;
mod email;
mod reply;

pub use bulk::{synthesize_reply, BulkReplyProcessor, BulkThrottle};
pub use data::DataProcessor;
pub use email::EmailProcessor;
pub use reply::ReplyProcessor;

use crate::{JobError, JobKind, JobPayload};

/// Payload of a job routed to the wrong processor; retrying cannot fix it
pub(crate) fn unexpected_payload(expected: JobKind, payload: &JobPayload) -> JobError {
    JobError::permanent(format!(
        "Expected {} payload, got {}",
        expected,
        payload.kind()
    ))
}
