//! Fraud alert data structures

use crate::types::prediction::ScoreResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Risk level classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Determine risk level from a probability in [0, 1]
    pub fn from_score(score: f64, thresholds: &RiskLevelThresholds) -> Self {
        if score >= thresholds.critical {
            RiskLevel::Critical
        } else if score >= thresholds.high {
            RiskLevel::High
        } else if score >= thresholds.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Configurable risk level thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLevelThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for RiskLevelThresholds {
    fn default() -> Self {
        Self {
            medium: 0.5,
            high: 0.7,
            critical: 0.9,
        }
    }
}

/// Alert published when a transaction is judged fraudulent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudAlert {
    /// Unique alert identifier
    pub alert_id: String,

    pub transaction_id: String,

    /// Ensemble probability (0.0 - 1.0)
    pub risk_score: f64,

    pub risk_level: RiskLevel,

    /// Per-member probabilities
    pub model_scores: HashMap<String, f64>,

    /// Members that individually crossed the threshold
    pub triggered_models: Vec<String>,

    /// Members dropped from a degraded ensemble
    #[serde(default)]
    pub excluded_models: Vec<String>,

    pub threshold_used: f64,

    pub amount: f64,

    pub timestamp: DateTime<Utc>,
}

impl FraudAlert {
    /// Build an alert from a scored transaction
    pub fn from_score(
        transaction_id: String,
        score: &ScoreResult,
        thresholds: &RiskLevelThresholds,
    ) -> Self {
        Self {
            alert_id: uuid::Uuid::new_v4().to_string(),
            transaction_id,
            risk_score: score.probability,
            risk_level: RiskLevel::from_score(score.probability, thresholds),
            model_scores: score.member_scores.iter().cloned().collect(),
            triggered_models: score.members_above_threshold(),
            excluded_models: score.excluded_members.clone(),
            threshold_used: score.threshold_used,
            amount: 0.0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = amount;
        self
    }
}
