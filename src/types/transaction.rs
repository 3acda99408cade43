//! Transaction requests and stored transaction records

use crate::decision::Verdict;
use crate::features::FeatureVector;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request on the predict subject
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    /// Caller-supplied id; one is generated when absent
    #[serde(default)]
    pub transaction_id: Option<String>,

    /// `[Time, V1..V28, Amount]`, validated before use
    pub features: Vec<Value>,
}

/// Request on the explain subject
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainRequest {
    pub transaction_id: String,
}

/// Review status shown alongside the verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Flagged,
    #[serde(rename = "Under Review")]
    UnderReview,
    Clear,
}

impl TransactionStatus {
    /// Flagged at or above the decision threshold, under review at or above
    /// the review threshold, clear otherwise.
    pub fn from_probability(probability: f64, threshold: f64, review_threshold: f64) -> Self {
        if probability >= threshold {
            TransactionStatus::Flagged
        } else if probability >= review_threshold {
            TransactionStatus::UnderReview
        } else {
            TransactionStatus::Clear
        }
    }
}

/// Scored transaction kept for retrospective explanation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: String,

    /// Transaction amount (last raw feature)
    pub amount: f64,

    pub timestamp: DateTime<Utc>,

    /// Fraud probability as a percentage
    pub risk_score: f64,

    pub status: TransactionStatus,

    pub prediction: Verdict,

    /// Raw features as received
    pub features: FeatureVector,
}

/// New transaction id: `TXN_` and 12 upper-case hex characters.
pub fn generate_transaction_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("TXN_{}", hex[..12].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_bands() {
        assert_eq!(
            TransactionStatus::from_probability(0.3, 0.3, 0.5),
            TransactionStatus::Flagged
        );
        assert_eq!(
            TransactionStatus::from_probability(0.55, 0.7, 0.5),
            TransactionStatus::UnderReview
        );
        assert_eq!(
            TransactionStatus::from_probability(0.1, 0.7, 0.5),
            TransactionStatus::Clear
        );
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&TransactionStatus::UnderReview).unwrap(),
            "\"Under Review\""
        );
    }

    #[test]
    fn test_generated_id_format() {
        let id = generate_transaction_id();
        assert_eq!(id.len(), 16);
        assert!(id.starts_with("TXN_"));
        assert!(id[4..]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        assert_ne!(id, generate_transaction_id());
    }

    #[test]
    fn test_request_without_id() {
        let request: PredictRequest =
            serde_json::from_str(r#"{"features": [1.0, 2.0]}"#).unwrap();
        assert!(request.transaction_id.is_none());
        assert_eq!(request.features.len(), 2);
    }
}
