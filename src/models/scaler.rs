//! Stored feature scaler applied before extraction

use crate::error::{ScoringError, ScoringResult};
use crate::features::{FeatureVector, FEATURE_COUNT};
use serde::Deserialize;

/// Per-feature affine scaler: `(x - center) / scale`.
///
/// Covers both standard and robust scalers exported from training.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "ScalerArtifact")]
pub struct Scaler {
    center: Vec<f64>,
    scale: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct ScalerArtifact {
    center: Vec<f64>,
    scale: Vec<f64>,
}

impl TryFrom<ScalerArtifact> for Scaler {
    type Error = ScoringError;

    fn try_from(artifact: ScalerArtifact) -> Result<Self, Self::Error> {
        Scaler::new(artifact.center, artifact.scale)
    }
}

impl Scaler {
    pub fn new(center: Vec<f64>, scale: Vec<f64>) -> ScoringResult<Self> {
        if center.len() != FEATURE_COUNT || scale.len() != FEATURE_COUNT {
            return Err(ScoringError::ModelUnavailable(format!(
                "scaler expects {} centers and scales, got {} and {}",
                FEATURE_COUNT,
                center.len(),
                scale.len()
            )));
        }
        if let Some(i) = center.iter().position(|c| !c.is_finite()) {
            return Err(ScoringError::ModelUnavailable(format!(
                "scaler center {} is not finite",
                i
            )));
        }
        if let Some(i) = scale.iter().position(|s| !s.is_finite() || *s == 0.0) {
            return Err(ScoringError::ModelUnavailable(format!(
                "scaler scale {} must be finite and non-zero",
                i
            )));
        }
        Ok(Self { center, scale })
    }

    /// Scaled copy. Values that overflow saturate at the model input limit.
    pub fn transform(&self, features: &FeatureVector) -> FeatureVector {
        features.map_saturating(|i, x| (x - self.center[i]) / self.scale[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{validate, MODEL_INPUT_LIMIT};

    #[test]
    fn test_transform() {
        let mut center = vec![0.0; FEATURE_COUNT];
        let mut scale = vec![1.0; FEATURE_COUNT];
        center[29] = 22.0;
        scale[29] = 70.0;
        let scaler = Scaler::new(center, scale).unwrap();

        let mut raw = vec![1.5; FEATURE_COUNT];
        raw[29] = 162.0;
        let scaled = scaler.transform(&validate(&raw).unwrap());

        assert_eq!(scaled.as_slice()[0], 1.5);
        assert!((scaled.amount() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_zero_scale() {
        let mut scale = vec![1.0; FEATURE_COUNT];
        scale[3] = 0.0;
        let err = Scaler::new(vec![0.0; FEATURE_COUNT], scale).unwrap_err();
        assert!(matches!(err, ScoringError::ModelUnavailable(_)));
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert!(Scaler::new(vec![0.0; 29], vec![1.0; 29]).is_err());
    }

    #[test]
    fn test_deserialize() {
        let json = serde_json::json!({
            "center": vec![0.0; FEATURE_COUNT],
            "scale": vec![2.0; FEATURE_COUNT],
        });
        let scaler: Scaler = serde_json::from_value(json).unwrap();
        let scaled = scaler.transform(&validate(&[4.0; FEATURE_COUNT]).unwrap());
        assert_eq!(scaled.time(), 2.0);
    }

    #[test]
    fn test_overflow_saturates() {
        let mut center = vec![0.0; FEATURE_COUNT];
        center[1] = -1.0e308;
        let scaler = Scaler::new(center, vec![0.5; FEATURE_COUNT]).unwrap();

        let mut raw = vec![f64::MAX; FEATURE_COUNT];
        raw[2] = -f64::MAX;
        raw[3] = 3.0;
        let scaled = scaler.transform(&validate(&raw).unwrap());

        assert!(scaled.as_slice().iter().all(|v| v.is_finite()));
        assert_eq!(scaled.as_slice()[0], MODEL_INPUT_LIMIT);
        assert_eq!(scaled.as_slice()[1], MODEL_INPUT_LIMIT);
        assert_eq!(scaled.as_slice()[2], -MODEL_INPUT_LIMIT);
        assert_eq!(scaled.as_slice()[3], 6.0);
    }
}
