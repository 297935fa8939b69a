//! Typed job payloads, one per [`JobKind`].
//!
//! Field names serialize in camelCase so payloads read the same as the
//! request bodies the HTTP front end accepts.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::JobKind;
use crate::{QueueError, QueueResult};

fn validate_amount(amount: f64) -> Result<(), ValidationError> {
    if !amount.is_finite() {
        return Err(ValidationError::new("amount_not_finite"));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Attachment {
    #[validate(length(min = 1))]
    pub filename: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct EmailJobData {
    #[validate(length(min = 1))]
    pub to: String,
    #[validate(length(min = 1))]
    pub subject: String,
    #[validate(length(min = 1))]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub attachments: Option<Vec<Attachment>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_on_complete: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingJobData {
    #[validate(length(min = 1))]
    pub org_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Opaque to the queue; handed to the data handler as-is
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ProcessingOptions>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReplyJobData {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub product_name: String,
    #[validate(custom(function = "validate_amount"))]
    pub amount: f64,
}

/// Template for bulk fan-out; every field falls back to a generated default
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PartialReplyJobData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_amount"))]
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct BulkReplyJobData {
    #[validate(range(min = 1))]
    pub count: u32,
    #[serde(default)]
    #[validate(nested)]
    pub template: PartialReplyJobData,
}

/// Payload of a job, tagged with its kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum JobPayload {
    EmailSend(EmailJobData),
    DataProcess(ProcessingJobData),
    ReplySend(ReplyJobData),
    BulkReplyBatch(BulkReplyJobData),
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::EmailSend(_) => JobKind::EmailSend,
            Self::DataProcess(_) => JobKind::DataProcess,
            Self::ReplySend(_) => JobKind::ReplySend,
            Self::BulkReplyBatch(_) => JobKind::BulkReplyBatch,
        }
    }

    /// Check required fields; failures map to [`QueueError::InvalidPayload`]
    pub fn validate(&self) -> QueueResult<()> {
        match self {
            Self::EmailSend(data) => data.validate()?,
            Self::DataProcess(data) => data.validate()?,
            Self::ReplySend(data) => data.validate()?,
            Self::BulkReplyBatch(data) => data.validate()?,
        }
        Ok(())
    }

    /// Decode a loosely typed request body for the given kind
    pub fn from_json(kind: JobKind, value: serde_json::Value) -> QueueResult<Self> {
        let invalid = |e: serde_json::Error| QueueError::InvalidPayload(e.to_string());
        let payload = match kind {
            JobKind::EmailSend => Self::EmailSend(serde_json::from_value(value).map_err(invalid)?),
            JobKind::DataProcess => Self::DataProcess(serde_json::from_value(value).map_err(invalid)?),
            JobKind::ReplySend => Self::ReplySend(serde_json::from_value(value).map_err(invalid)?),
            JobKind::BulkReplyBatch => Self::BulkReplyBatch(serde_json::from_value(value).map_err(invalid)?),
        };
        payload.validate()?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reply_requires_name() {
        let payload = JobPayload::ReplySend(ReplyJobData {
            name: String::new(),
            product_name: "Premium Plan".to_string(),
            amount: 99.99,
        });
        assert!(matches!(payload.validate(), Err(QueueError::InvalidPayload(_))));
    }

    #[test]
    fn test_reply_rejects_nan_amount() {
        let payload = JobPayload::ReplySend(ReplyJobData {
            name: "Jane".to_string(),
            product_name: "Premium Plan".to_string(),
            amount: f64::NAN,
        });
        assert!(payload.validate().is_err());
    }

    #[test]
    fn test_from_json_missing_field() {
        let result = JobPayload::from_json(JobKind::ReplySend, json!({ "name": "Jane", "amount": 5 }));
        match result {
            Err(QueueError::InvalidPayload(msg)) => assert!(msg.contains("productName")),
            other => panic!("Expected InvalidPayload, got: {:?}", other),
        }
    }

    #[test]
    fn test_from_json_non_numeric_amount() {
        let body = json!({ "name": "Jane", "productName": "Plan", "amount": "lots" });
        assert!(JobPayload::from_json(JobKind::ReplySend, body).is_err());
    }

    #[test]
    fn test_email_attachment_filename_required() {
        let email = EmailJobData {
            to: "recipient@example.com".to_string(),
            subject: "Welcome".to_string(),
            body: "Hello".to_string(),
            attachments: Some(vec![Attachment { filename: String::new(), content: "x".to_string() }]),
        };
        assert!(JobPayload::EmailSend(email).validate().is_err());
    }

    #[test]
    fn test_processing_camel_case() {
        let body = json!({
            "orgId": "org-1",
            "projectId": "proj-9",
            "data": { "rows": [1, 2, 3] },
            "options": { "priority": 2, "notifyOnComplete": true }
        });
        let payload = JobPayload::from_json(JobKind::DataProcess, body).unwrap();
        match payload {
            JobPayload::DataProcess(data) => {
                assert_eq!(data.project_id.as_deref(), Some("proj-9"));
                assert_eq!(data.options.unwrap().priority, Some(2));
            }
            other => panic!("Unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_bulk_count_must_be_positive() {
        let body = json!({ "count": 0 });
        assert!(JobPayload::from_json(JobKind::BulkReplyBatch, body).is_err());
    }

    #[test]
    fn test_bulk_template_amount_must_be_finite() {
        let mut batch = BulkReplyJobData {
            count: 3,
            template: PartialReplyJobData { amount: Some(f64::INFINITY), ..Default::default() },
        };
        assert!(JobPayload::BulkReplyBatch(batch.clone()).validate().is_err());

        batch.template.amount = Some(12.5);
        assert!(JobPayload::BulkReplyBatch(batch.clone()).validate().is_ok());

        batch.template.amount = None;
        assert!(JobPayload::BulkReplyBatch(batch).validate().is_ok());
    }
}
