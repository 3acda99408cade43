//! Fraud Scoring Pipeline Library
//!
//! Hybrid fraud scoring: a neural extractor embeds each 30-feature
//! transaction, a soft-voting ensemble scores the original features plus the
//! embedding, and an exact Shapley attribution explains every score.

pub mod config;
pub mod consumer;
pub mod decision;
pub mod error;
pub mod explain;
pub mod features;
pub mod handlers;
pub mod hybrid;
pub mod metrics;
pub mod models;
pub mod producer;
pub mod service;
pub mod store;
pub mod types;

pub use config::AppConfig;
pub use decision::{DecisionThreshold, Verdict};
pub use error::{ScoringError, ScoringResult};
pub use features::FeatureVector;
pub use producer::AlertProducer;
pub use service::{ModelRegistry, PredictionService, ScoringModels};
pub use store::{FeatureResolver, InMemoryTransactionStore};
pub use types::{ExplanationResult, FraudAlert, ScoreResult};
