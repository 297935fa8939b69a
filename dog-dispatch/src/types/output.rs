use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JobId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailSent {
    pub success: bool,
    pub job_id: JobId,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataProcessed {
    pub success: bool,
    pub job_id: JobId,
    pub processed_data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplySent {
    pub success: bool,
    pub job_id: JobId,
    pub sent_at: DateTime<Utc>,
}

/// Summary of a bulk fan-out run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSummary {
    pub success: bool,
    pub job_id: JobId,
    pub total_messages: u32,
    pub message_jobs_created: u32,
    pub failed_submissions: u32,
}

/// Structured success result of one job attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobOutput {
    Email(EmailSent),
    Data(DataProcessed),
    Reply(ReplySent),
    Bulk(BulkSummary),
}

impl JobOutput {
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Email(out) => &out.job_id,
            Self::Data(out) => &out.job_id,
            Self::Reply(out) => &out.job_id,
            Self::Bulk(out) => &out.job_id,
        }
    }

    pub fn to_value(&self) -> crate::QueueResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_summary_shape() {
        let output = JobOutput::Bulk(BulkSummary {
            success: true,
            job_id: JobId::from("42"),
            total_messages: 10,
            message_jobs_created: 10,
            failed_submissions: 0,
        });
        let value = output.to_value().unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["jobId"], "42");
        assert_eq!(value["totalMessages"], 10);
        assert_eq!(value["messageJobsCreated"], 10);
    }
}
