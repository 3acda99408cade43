//! NATS subscriptions for incoming scoring requests

use anyhow::Result;
use async_nats::{Client, Subscriber};
use tracing::info;

/// The request/reply operations served over NATS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Predict,
    Explain,
    Info,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Predict => "predict",
            Operation::Explain => "explain",
            Operation::Info => "info",
        }
    }
}

/// Consumer for one request subject
pub struct RequestConsumer {
    client: Client,
    subject: String,
    operation: Operation,
}

impl RequestConsumer {
    pub fn new(client: Client, subject: &str, operation: Operation) -> Self {
        Self {
            client,
            subject: subject.to_string(),
            operation,
        }
    }

    /// Subscribe to the request subject
    pub async fn subscribe(&self) -> Result<Subscriber> {
        let subscriber = self.client.subscribe(self.subject.clone()).await?;
        info!(
            subject = %self.subject,
            operation = self.operation.as_str(),
            "Subscribed to request subject"
        );
        Ok(subscriber)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_labels() {
        assert_eq!(Operation::Predict.as_str(), "predict");
        assert_eq!(Operation::Explain.as_str(), "explain");
        assert_eq!(Operation::Info.as_str(), "info");
    }
}
