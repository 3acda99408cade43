//! Error taxonomy for the scoring and explanation pipeline

use thiserror::Error;

/// Errors surfaced by `predict` and `explain`.
///
/// Client errors (`Shape`, `Value`, `NotFound`) reject a single request.
/// `ModelUnavailable` is fatal at startup; seen later it is reported as a
/// server error.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScoringError {
    #[error("invalid input shape: expected {expected} features, got {actual}")]
    Shape { expected: usize, actual: usize },

    #[error("invalid value at feature {index}: {reason}")]
    Value { index: usize, reason: String },

    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("inference failed in {member}: {reason}")]
    Inference { member: String, reason: String },

    #[error("feature extraction failed: {0}")]
    Extraction(String),

    #[error("transaction not found: {0}")]
    NotFound(String),

    #[error(
        "explanation inconsistent: base + attributions = {actual}, probability = {expected} (tolerance {tolerance})"
    )]
    ExplanationInconsistency {
        expected: f64,
        actual: f64,
        tolerance: f64,
    },
}

impl ScoringError {
    /// Stable identifier used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            ScoringError::Shape { .. } => "shape_error",
            ScoringError::Value { .. } => "value_error",
            ScoringError::ModelUnavailable(_) => "model_unavailable",
            ScoringError::Inference { .. } => "inference_error",
            ScoringError::Extraction(_) => "extraction_error",
            ScoringError::NotFound(_) => "not_found",
            ScoringError::ExplanationInconsistency { .. } => "explanation_inconsistency",
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ScoringError::Shape { .. } | ScoringError::Value { .. } | ScoringError::NotFound(_)
        )
    }

    /// HTTP-equivalent status class.
    pub fn status_code(&self) -> u16 {
        match self {
            ScoringError::Shape { .. } | ScoringError::Value { .. } => 400,
            ScoringError::NotFound(_) => 404,
            ScoringError::ModelUnavailable(_) => 503,
            ScoringError::Inference { .. }
            | ScoringError::Extraction(_)
            | ScoringError::ExplanationInconsistency { .. } => 500,
        }
    }

    /// Message safe to hand back to a caller.
    ///
    /// Server-side failures are reduced to a generic reason; the full detail
    /// is logged where the error is raised.
    pub fn public_message(&self) -> String {
        match self {
            ScoringError::Shape { .. } | ScoringError::Value { .. } | ScoringError::NotFound(_) => {
                self.to_string()
            }
            ScoringError::ModelUnavailable(_) => "scoring models are not available".to_string(),
            ScoringError::Inference { .. } => "ensemble inference failed".to_string(),
            ScoringError::Extraction(_) => "feature extraction failed".to_string(),
            ScoringError::ExplanationInconsistency { .. } => {
                "explanation failed its consistency check".to_string()
            }
        }
    }
}

pub type ScoringResult<T> = Result<T, ScoringError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors() {
        let shape = ScoringError::Shape {
            expected: 30,
            actual: 29,
        };
        assert!(shape.is_client_error());
        assert_eq!(shape.status_code(), 400);
        assert_eq!(shape.kind(), "shape_error");

        let missing = ScoringError::NotFound("tx_1".to_string());
        assert!(missing.is_client_error());
        assert_eq!(missing.status_code(), 404);
    }

    #[test]
    fn test_server_errors_hide_internals() {
        let err = ScoringError::Inference {
            member: "xgboost".to_string(),
            reason: "tree 12 references feature 70".to_string(),
        };
        assert!(!err.is_client_error());
        assert_eq!(err.status_code(), 500);
        assert!(!err.public_message().contains("xgboost"));
        assert!(!err.public_message().contains("tree 12"));

        let unavailable = ScoringError::ModelUnavailable("missing file".to_string());
        assert_eq!(unavailable.status_code(), 503);

        let extraction = ScoringError::Extraction("embedding has 3 values, expected 32".to_string());
        assert_eq!(extraction.kind(), "extraction_error");
        assert_eq!(extraction.status_code(), 500);
        assert!(!extraction.public_message().contains("embedding"));
        assert!(!unavailable.public_message().contains("missing file"));
    }
}
