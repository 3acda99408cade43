//! Raw transaction features and their validation.
//!
//! A transaction arrives as 30 numbers in a fixed order:
//! `[Time, V1..V28, Amount]`. Nothing touches a model until the input has
//! passed [`validate`] or [`validate_values`].

use crate::error::{ScoringError, ScoringResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Number of raw features per transaction.
pub const FEATURE_COUNT: usize = 30;

/// Position of the `Amount` feature.
pub const AMOUNT_INDEX: usize = FEATURE_COUNT - 1;

/// Largest magnitude a model ever sees. Scaling a finite input can
/// overflow; such values saturate here instead of being rejected.
pub const MODEL_INPUT_LIMIT: f64 = 1e9;

/// Validated, immutable feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct FeatureVector([f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn time(&self) -> f64 {
        self.0[0]
    }

    pub fn amount(&self) -> f64 {
        self.0[AMOUNT_INDEX]
    }

    /// All-zero vector; the baseline transaction.
    pub fn zeros() -> Self {
        Self([0.0; FEATURE_COUNT])
    }

    /// `f(index, value)` for every feature, clamped to
    /// ±[`MODEL_INPUT_LIMIT`]. NaN maps to zero.
    pub(crate) fn map_saturating(&self, f: impl Fn(usize, f64) -> f64) -> Self {
        let mut values = [0.0; FEATURE_COUNT];
        for (index, (slot, &value)) in values.iter_mut().zip(&self.0).enumerate() {
            let mapped = f(index, value);
            *slot = if mapped.is_nan() {
                0.0
            } else {
                mapped.clamp(-MODEL_INPUT_LIMIT, MODEL_INPUT_LIMIT)
            };
        }
        Self(values)
    }
}

impl TryFrom<Vec<f64>> for FeatureVector {
    type Error = ScoringError;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        validate(&values)
    }
}

impl From<FeatureVector> for Vec<f64> {
    fn from(features: FeatureVector) -> Self {
        features.0.to_vec()
    }
}

/// Validate a numeric input.
///
/// Length is checked before values, so a short vector with a NaN in it is
/// a shape error.
pub fn validate(raw: &[f64]) -> ScoringResult<FeatureVector> {
    if raw.len() != FEATURE_COUNT {
        return Err(ScoringError::Shape {
            expected: FEATURE_COUNT,
            actual: raw.len(),
        });
    }

    let mut values = [0.0; FEATURE_COUNT];
    for (index, (&value, slot)) in raw.iter().zip(values.iter_mut()).enumerate() {
        check_finite(index, value)?;
        *slot = value;
    }

    Ok(FeatureVector(values))
}

/// Validate an untyped input, e.g. a JSON request body.
pub fn validate_values(raw: &[Value]) -> ScoringResult<FeatureVector> {
    if raw.len() != FEATURE_COUNT {
        return Err(ScoringError::Shape {
            expected: FEATURE_COUNT,
            actual: raw.len(),
        });
    }

    let mut values = Vec::with_capacity(FEATURE_COUNT);
    for (index, value) in raw.iter().enumerate() {
        let number = value.as_f64().ok_or_else(|| ScoringError::Value {
            index,
            reason: format!("expected a number, got {}", json_type(value)),
        })?;
        values.push(number);
    }

    validate(&values)
}

fn check_finite(index: usize, value: f64) -> ScoringResult<()> {
    if value.is_nan() {
        return Err(ScoringError::Value {
            index,
            reason: "NaN is not allowed".to_string(),
        });
    }
    if value.is_infinite() {
        return Err(ScoringError::Value {
            index,
            reason: "infinite values are not allowed".to_string(),
        });
    }
    Ok(())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Raw feature names in input order.
pub fn feature_names() -> Vec<String> {
    let mut names = Vec::with_capacity(FEATURE_COUNT);
    names.push("Time".to_string());
    names.extend((1..=28).map(|i| format!("V{}", i)));
    names.push("Amount".to_string());
    names
}
