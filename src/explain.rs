//! Explanation engine: ranked per-feature attributions for one prediction.

use crate::error::{ScoringError, ScoringResult};
use crate::hybrid::HybridFeatureVector;
use crate::models::inference::Ensemble;
use serde::Serialize;
use tracing::warn;

/// Default additivity tolerance.
pub const DEFAULT_TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributionEntry {
    pub feature_index: usize,
    pub feature_name: String,
    pub feature_value: f64,
    pub attribution_value: f64,
}

/// Full attribution, sorted by descending |attribution|.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attributions {
    pub entries: Vec<AttributionEntry>,
    pub base_value: f64,
    pub final_probability: f64,
    pub excluded_members: Vec<String>,
}

impl Attributions {
    pub fn attribution_sum(&self) -> f64 {
        self.entries.iter().map(|e| e.attribution_value).sum()
    }
}

/// Explain `hybrid` against the whole ensemble.
///
/// Returns every feature, never a top-K cut. Fails with
/// `ExplanationInconsistency` when `base + Σ attributions` drifts from the
/// probability by more than `tolerance · max(1, |p|)`.
pub fn explain(
    hybrid: &HybridFeatureVector,
    ensemble: &Ensemble,
    feature_names: &[String],
    tolerance: f64,
) -> ScoringResult<Attributions> {
    let combined = ensemble.attribute(hybrid)?;
    let attribution = combined.attribution;

    if attribution.values.len() != hybrid.len() || feature_names.len() != hybrid.len() {
        return Err(ScoringError::ModelUnavailable(format!(
            "attribution width {} and {} names do not match {} hybrid features",
            attribution.values.len(),
            feature_names.len(),
            hybrid.len()
        )));
    }

    let reconstructed = attribution.base_value + attribution.values.iter().sum::<f64>();
    check_additivity(attribution.probability, reconstructed, tolerance)?;

    let mut entries: Vec<AttributionEntry> = attribution
        .values
        .iter()
        .zip(hybrid.as_slice())
        .zip(feature_names)
        .enumerate()
        .map(|(index, ((&value, &feature_value), name))| AttributionEntry {
            feature_index: index,
            feature_name: name.clone(),
            feature_value,
            attribution_value: value,
        })
        .collect();
    rank(&mut entries);

    Ok(Attributions {
        entries,
        base_value: attribution.base_value,
        final_probability: attribution.probability,
        excluded_members: combined.excluded,
    })
}

pub fn check_additivity(probability: f64, reconstructed: f64, tolerance: f64) -> ScoringResult<()> {
    let drift = (reconstructed - probability).abs();
    if drift.is_nan() || drift > tolerance * probability.abs().max(1.0) {
        warn!(
            probability = probability,
            reconstructed = reconstructed,
            tolerance = tolerance,
            "Attribution additivity violated"
        );
        return Err(ScoringError::ExplanationInconsistency {
            expected: probability,
            actual: reconstructed,
            tolerance,
        });
    }
    Ok(())
}

/// Descending |attribution|; equal magnitudes keep feature order.
fn rank(entries: &mut [AttributionEntry]) {
    entries.sort_by(|a, b| {
        b.attribution_value
            .abs()
            .total_cmp(&a.attribution_value.abs())
            .then(a.feature_index.cmp(&b.feature_index))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: usize, value: f64) -> AttributionEntry {
        AttributionEntry {
            feature_index: index,
            feature_name: format!("f{}", index),
            feature_value: 0.0,
            attribution_value: value,
        }
    }

    #[test]
    fn test_rank_by_magnitude_then_index() {
        let mut entries = vec![
            entry(0, 0.1),
            entry(1, -0.5),
            entry(2, 0.5),
            entry(3, 0.0),
            entry(4, -0.0),
            entry(5, 0.3),
        ];
        rank(&mut entries);

        let order: Vec<usize> = entries.iter().map(|e| e.feature_index).collect();
        assert_eq!(order, vec![1, 2, 5, 0, 3, 4]);
    }

    #[test]
    fn test_additivity_check() {
        assert!(check_additivity(0.5, 0.50005, 1e-4).is_ok());
        assert!(matches!(
            check_additivity(0.5, 0.51, 1e-4),
            Err(ScoringError::ExplanationInconsistency { .. })
        ));
        assert!(check_additivity(0.5, f64::NAN, 1e-4).is_err());
    }
}
