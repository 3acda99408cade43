//! Model artifacts and inference components

pub mod aggregator;
pub mod extractor;
pub mod inference;
pub mod loader;
pub mod members;
pub mod scaler;
pub mod tree;

pub use aggregator::{Reducible, ScoreAggregator};
pub use extractor::NeuralExtractor;
pub use inference::{Ensemble, EnsemblePolicy, MemberFailurePolicy};
pub use loader::ModelLoader;
pub use members::{Classifier, MemberAttribution, ModelHandle};
pub use scaler::Scaler;

use std::time::Duration;
use thiserror::Error;

/// Failure inside a single model.
///
/// Converted into [`crate::error::ScoringError::Inference`] at the ensemble
/// boundary, where the member name is known.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("expected {expected} inputs, got {actual}")]
    InputWidth { expected: usize, actual: usize },

    #[error("produced a non-finite output")]
    NonFinite,

    #[error("produced probability {0} outside [0, 1]")]
    OutOfRange(f64),

    #[error("exceeded its {budget:?} budget after {elapsed:?}")]
    TimedOut { elapsed: Duration, budget: Duration },

    #[error("runtime error: {0}")]
    Runtime(String),
}

impl ModelError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ModelError::TimedOut { .. } => "timeout",
            _ => "error",
        }
    }
}

pub(crate) fn check_width(x: &[f64], expected: usize) -> Result<(), ModelError> {
    if x.len() != expected {
        return Err(ModelError::InputWidth {
            expected,
            actual: x.len(),
        });
    }
    Ok(())
}

pub(crate) fn sigmoid(margin: f64) -> f64 {
    1.0 / (1.0 + (-margin).exp())
}
