use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The four job types the dispatcher knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    EmailSend,
    DataProcess,
    ReplySend,
    BulkReplyBatch,
}

impl JobKind {
    /// Get all job kinds
    pub fn all() -> &'static [JobKind] {
        &[Self::EmailSend, Self::DataProcess, Self::ReplySend, Self::BulkReplyBatch]
    }

    /// Name of the queue jobs of this kind are submitted to
    pub fn queue(self) -> &'static str {
        match self {
            Self::EmailSend => "emailQueue",
            Self::DataProcess => "processingQueue",
            Self::ReplySend => "ReplyMessageQueue",
            Self::BulkReplyBatch => "BulkMessageQueue",
        }
    }

    /// Job name recorded with each submission
    pub fn job_name(self) -> &'static str {
        match self {
            Self::EmailSend => "send-email",
            Self::DataProcess => "process-data",
            Self::ReplySend => "send-reply-message",
            Self::BulkReplyBatch => "process-bulk-messages",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.job_name())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|kind| kind.job_name() == s || kind.queue() == s)
            .ok_or_else(|| format!("Unknown job kind: {}", s))
    }
}
