//! Type definitions for the scoring pipeline

pub mod alert;
pub mod prediction;
pub mod transaction;

pub use alert::{FraudAlert, RiskLevel, RiskLevelThresholds};
pub use prediction::{
    ErrorResponse, ExplainResponse, ExplanationResult, PredictResponse, ScoreResult,
};
pub use transaction::{
    generate_transaction_id, ExplainRequest, PredictRequest, TransactionRecord, TransactionStatus,
};
