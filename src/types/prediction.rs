//! Scoring and explanation results, and their wire forms

use crate::decision::Verdict;
use crate::error::ScoringError;
use crate::explain::Attributions;
use crate::types::transaction::TransactionStatus;
use serde::{Deserialize, Serialize};

/// Outcome of one `predict` call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreResult {
    /// Fraud probability in [0, 1]
    pub probability: f64,
    pub verdict: Verdict,
    pub threshold_used: f64,
    pub hybrid_feature_count: usize,
    /// Probabilities of the members that took part
    pub member_scores: Vec<(String, f64)>,
    /// Members dropped under the degradation policy
    pub excluded_members: Vec<String>,
}

impl ScoreResult {
    pub fn probability_percent(&self) -> f64 {
        self.probability * 100.0
    }

    pub fn is_degraded(&self) -> bool {
        !self.excluded_members.is_empty()
    }

    /// Members at or above the decision threshold, as `name:score`.
    pub fn members_above_threshold(&self) -> Vec<String> {
        self.member_scores
            .iter()
            .filter(|(_, score)| *score >= self.threshold_used)
            .map(|(name, score)| format!("{}:{:.2}", name, score))
            .collect()
    }
}

/// Outcome of one `explain` call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplanationResult {
    pub transaction_id: Option<String>,
    pub verdict: Verdict,
    pub threshold_used: f64,
    pub attributions: Attributions,
}

/// Reply on the predict subject
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictResponse {
    pub transaction_id: String,
    pub prediction: Verdict,
    /// Percentage, 0-100
    pub probability: f64,
    pub threshold_used: f64,
    pub hybrid_feature_count: usize,
    pub status: TransactionStatus,
}

/// Reply on the explain subject. The four sequences are parallel arrays.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExplainResponse {
    pub transaction_id: Option<String>,
    pub base_value: f64,
    pub prediction: Verdict,
    pub prediction_probability: f64,
    pub feature_names: Vec<String>,
    pub shap_values: Vec<f64>,
    pub feature_values: Vec<f64>,
    /// Members dropped from a degraded ensemble; empty for a full explanation
    #[serde(default)]
    pub excluded_members: Vec<String>,
}

impl From<&ExplanationResult> for ExplainResponse {
    fn from(result: &ExplanationResult) -> Self {
        let entries = &result.attributions.entries;
        Self {
            transaction_id: result.transaction_id.clone(),
            base_value: result.attributions.base_value,
            prediction: result.verdict,
            prediction_probability: result.attributions.final_probability,
            feature_names: entries.iter().map(|e| e.feature_name.clone()).collect(),
            shap_values: entries.iter().map(|e| e.attribution_value).collect(),
            feature_values: entries.iter().map(|e| e.feature_value).collect(),
            excluded_members: result.attributions.excluded_members.clone(),
        }
    }
}

/// Structured failure reply
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}

impl ErrorResponse {
    pub fn timeout(timeout_ms: u64) -> Self {
        Self {
            error: "timeout".to_string(),
            message: format!("request exceeded {} ms", timeout_ms),
            status_code: 504,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            error: "bad_request".to_string(),
            message: message.into(),
            status_code: 400,
        }
    }

    pub fn internal() -> Self {
        Self {
            error: "internal_error".to_string(),
            message: "request could not be processed".to_string(),
            status_code: 500,
        }
    }
}

impl From<&ScoringError> for ErrorResponse {
    fn from(err: &ScoringError) -> Self {
        Self {
            error: err.kind().to_string(),
            message: err.public_message(),
            status_code: err.status_code(),
        }
    }
}
