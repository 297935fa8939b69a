//! Side effects performed by processors.
//!
//! Each job kind reaches the outside world through one of these traits so
//! deployments can plug in a real mailer or message channel. The logging
//! implementations below stand in for them in development and tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::{EffectError, EmailJobData, ProcessingJobData, ReplyJobData};

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, email: &EmailJobData) -> Result<(), EffectError>;
}

#[async_trait]
pub trait DataHandler: Send + Sync {
    /// Process the payload and return the data to report back
    async fn handle(&self, data: &ProcessingJobData) -> Result<serde_json::Value, EffectError>;
}

#[async_trait]
pub trait ReplySender: Send + Sync {
    async fn send(&self, reply: &ReplyJobData) -> Result<(), EffectError>;
}

/// Logs the email instead of delivering it
#[derive(Debug, Clone, Default)]
pub struct LogEmailTransport {
    latency: Duration,
}

impl LogEmailTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated delivery time
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl EmailTransport for LogEmailTransport {
    async fn send(&self, email: &EmailJobData) -> Result<(), EffectError> {
        info!("Sending email to: {}", email.to);
        info!("Subject: {}", email.subject);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(())
    }
}

/// Hands the payload back unchanged as the processed data
#[derive(Debug, Clone, Default)]
pub struct EchoDataHandler {
    latency: Duration,
}

impl EchoDataHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl DataHandler for EchoDataHandler {
    async fn handle(&self, data: &ProcessingJobData) -> Result<serde_json::Value, EffectError> {
        debug!("Processing data for org {}", data.org_id);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        serde_json::to_value(data).map_err(|e| EffectError::new(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogReplySender;

#[async_trait]
impl ReplySender for LogReplySender {
    async fn send(&self, reply: &ReplyJobData) -> Result<(), EffectError> {
        info!(
            "Sending message to: {} about product: {} with amount: {}",
            reply.name, reply.product_name, reply.amount
        );
        Ok(())
    }
}

/// The effect implementations handed to the standard processors
#[derive(Clone)]
pub struct Effects {
    pub email: Arc<dyn EmailTransport>,
    pub data: Arc<dyn DataHandler>,
    pub reply: Arc<dyn ReplySender>,
}

impl Default for Effects {
    fn default() -> Self {
        Self {
            email: Arc::new(LogEmailTransport::new()),
            data: Arc::new(EchoDataHandler::new()),
            reply: Arc::new(LogReplySender),
        }
    }
}

impl Effects {
    pub fn with_email(mut self, email: Arc<dyn EmailTransport>) -> Self {
        self.email = email;
        self
    }

    pub fn with_data(mut self, data: Arc<dyn DataHandler>) -> Self {
        self.data = data;
        self
    }

    pub fn with_reply(mut self, reply: Arc<dyn ReplySender>) -> Self {
        self.reply = reply;
        self
    }
}
