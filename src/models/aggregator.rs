//! Soft-voting aggregation for the multi-model ensemble.
//!
//! Probabilities and attributions go through the same weighted reduction,
//! so the ensemble's explanation stays additive whenever every member's
//! explanation is.

use crate::models::members::MemberAttribution;
use std::collections::HashMap;

/// A member output that can be combined by weighted sum.
pub trait Reducible: Sized {
    fn scaled(&self, factor: f64) -> Self;

    fn accumulate(&mut self, other: Self);
}

impl Reducible for f64 {
    fn scaled(&self, factor: f64) -> Self {
        self * factor
    }

    fn accumulate(&mut self, other: Self) {
        *self += other;
    }
}

impl Reducible for MemberAttribution {
    fn scaled(&self, factor: f64) -> Self {
        MemberAttribution {
            probability: self.probability * factor,
            base_value: self.base_value * factor,
            values: self.values.iter().map(|v| v * factor).collect(),
        }
    }

    fn accumulate(&mut self, other: Self) {
        self.probability += other.probability;
        self.base_value += other.base_value;
        for (v, o) in self.values.iter_mut().zip(other.values) {
            *v += o;
        }
    }
}

/// Aggregates member outputs into a single ensemble output.
#[derive(Debug, Clone)]
pub struct ScoreAggregator {
    /// Model weights for weighted average
    weights: HashMap<String, f64>,
    /// Weight for members not in the weights map
    default_weight: f64,
}

impl ScoreAggregator {
    pub fn new(weights: HashMap<String, f64>) -> Self {
        Self {
            weights,
            default_weight: 1.0,
        }
    }

    /// Simple average over all members.
    pub fn equal_weights() -> Self {
        Self::new(HashMap::new())
    }

    pub fn weight_for(&self, member: &str) -> f64 {
        self.weights
            .get(member)
            .copied()
            .unwrap_or(self.default_weight)
    }

    /// `Σ wᵢ·xᵢ / Σ wᵢ` over the given `(weight, output)` pairs.
    ///
    /// Weights are renormalised over whatever is passed in, so excluding a
    /// member before the call redistributes its weight. `None` when there is
    /// nothing to combine.
    pub fn reduce<T: Reducible>(outputs: Vec<(f64, T)>) -> Option<T> {
        let total: f64 = outputs.iter().map(|(weight, _)| weight).sum();
        if outputs.is_empty() || total.is_nan() || total <= 0.0 {
            return None;
        }

        let mut outputs = outputs.into_iter();
        let (weight, first) = outputs.next()?;
        let mut combined = first.scaled(weight / total);
        for (weight, output) in outputs {
            combined.accumulate(output.scaled(weight / total));
        }
        Some(combined)
    }

    /// Agreement between members: `1 - std_dev` of their probabilities.
    pub fn agreement(scores: &[f64]) -> Option<f64> {
        if scores.len() < 2 {
            return None;
        }
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        let variance =
            scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / scores.len() as f64;
        Some(1.0 - variance.sqrt().min(1.0))
    }

    pub fn weights(&self) -> &HashMap<String, f64> {
        &self.weights
    }
}

impl Default for ScoreAggregator {
    fn default() -> Self {
        Self::equal_weights()
    }
}
