//! NATS publishing: fraud alerts and request replies

use crate::types::alert::FraudAlert;
use anyhow::Result;
use async_nats::{Client, Message};
use tracing::{debug, warn};

/// Producer for publishing fraud alerts to NATS
#[derive(Clone)]
pub struct AlertProducer {
    client: Client,
    subject: String,
}

impl AlertProducer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Publish an alert for a Fraudulent verdict
    pub async fn publish(&self, alert: &FraudAlert) -> Result<()> {
        let payload = serde_json::to_vec(alert)?;
        self.client
            .publish(self.subject.clone(), payload.into())
            .await?;

        debug!(
            subject = %self.subject,
            transaction_id = %alert.transaction_id,
            risk_level = ?alert.risk_level,
            degraded = !alert.excluded_models.is_empty(),
            "Fraud alert published"
        );
        Ok(())
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Send `payload` to the request's reply inbox. Requests published without
/// a reply subject are dropped with a warning.
pub async fn respond(client: &Client, request: &Message, payload: Vec<u8>) -> Result<()> {
    match &request.reply {
        Some(inbox) => {
            client.publish(inbox.clone(), payload.into()).await?;
            Ok(())
        }
        None => {
            warn!(subject = %request.subject, "Request has no reply subject, dropping reply");
            Ok(())
        }
    }
}
