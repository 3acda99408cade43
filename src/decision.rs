//! Threshold decision engine.
//!
//! `probability >= threshold` is Fraudulent: a score exactly on the
//! threshold is flagged.

use crate::error::{ScoringError, ScoringResult};
use serde::{Deserialize, Serialize};

/// Binary verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Fraudulent,
    Legitimate,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Fraudulent => "Fraudulent",
            Verdict::Legitimate => "Legitimate",
        }
    }

    pub fn is_fraud(&self) -> bool {
        matches!(self, Verdict::Fraudulent)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Calibrated cut-off, fixed for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DecisionThreshold(f64);

impl DecisionThreshold {
    pub fn new(value: f64) -> ScoringResult<Self> {
        if !(0.0..=1.0).contains(&value) {
            return Err(ScoringError::ModelUnavailable(format!(
                "decision threshold {} is outside [0, 1]",
                value
            )));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub verdict: Verdict,
    pub threshold_used: f64,
}

pub fn decide(probability: f64, threshold: &DecisionThreshold) -> Decision {
    let verdict = if probability >= threshold.value() {
        Verdict::Fraudulent
    } else {
        Verdict::Legitimate
    };
    Decision {
        verdict,
        threshold_used: threshold.value(),
    }
}

/// Result of an offline threshold sweep
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Calibration {
    pub threshold: f64,
    pub f1: f64,
    pub precision: f64,
    pub recall: f64,
}

/// Threshold used when no candidate separates the classes.
pub const DEFAULT_CALIBRATED_THRESHOLD: f64 = 0.3;

/// Sweep 0.05..0.5 in steps of 0.02 and keep the best F1.
///
/// Candidates that put every sample in one class are skipped; ties keep the
/// lower threshold. Reporting only: the live threshold comes from the model
/// metadata.
pub fn calibrate_threshold(labels: &[bool], scores: &[f64]) -> Calibration {
    let mut best = Calibration {
        threshold: DEFAULT_CALIBRATED_THRESHOLD,
        f1: 0.0,
        precision: 0.0,
        recall: 0.0,
    };

    let candidates = (0..).map(|i| 0.05 + 0.02 * i as f64).take_while(|t| *t < 0.5);
    for threshold in candidates {
        let predicted: Vec<bool> = scores.iter().map(|&s| s >= threshold).collect();
        let positives = predicted.iter().filter(|&&p| p).count();
        if positives == 0 || positives == predicted.len() {
            continue;
        }

        let (mut tp, mut fp, mut fn_) = (0usize, 0usize, 0usize);
        for (&label, &flag) in labels.iter().zip(&predicted) {
            match (label, flag) {
                (true, true) => tp += 1,
                (false, true) => fp += 1,
                (true, false) => fn_ += 1,
                (false, false) => {}
            }
        }

        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        if f1 > best.f1 {
            best = Calibration {
                threshold,
                f1,
                precision,
                recall,
            };
        }
    }

    best
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_is_closed_upper_bound() {
        let threshold = DecisionThreshold::new(0.42).unwrap();

        assert_eq!(decide(0.42, &threshold).verdict, Verdict::Fraudulent);
        assert_eq!(decide(0.4200001, &threshold).verdict, Verdict::Fraudulent);
        assert_eq!(decide(0.4199999, &threshold).verdict, Verdict::Legitimate);
        assert_eq!(decide(0.0, &threshold).threshold_used, 0.42);
    }

    #[test]
    fn test_threshold_bounds() {
        assert!(DecisionThreshold::new(0.0).is_ok());
        assert!(DecisionThreshold::new(1.0).is_ok());
        assert!(DecisionThreshold::new(1.01).is_err());
        assert!(DecisionThreshold::new(f64::NAN).is_err());
    }

    #[test]
    fn test_verdict_serialization() {
        assert_eq!(
            serde_json::to_string(&Verdict::Fraudulent).unwrap(),
            "\"Fraudulent\""
        );
        assert_eq!(Verdict::Legitimate.to_string(), "Legitimate");
    }

    #[test]
    fn test_calibration_finds_separating_threshold() {
        let labels = [false, false, false, false, true, true];
        let scores = [0.01, 0.08, 0.12, 0.2, 0.35, 0.9];

        let calibration = calibrate_threshold(&labels, &scores);

        assert_eq!(calibration.f1, 1.0);
        assert!(calibration.threshold > 0.2 && calibration.threshold <= 0.35);
        // Lowest perfect candidate wins
        assert!((calibration.threshold - 0.21).abs() < 1e-9);
    }

    #[test]
    fn test_calibration_default_when_inseparable() {
        let calibration = calibrate_threshold(&[true, false], &[0.9, 0.95]);
        assert_eq!(calibration.threshold, DEFAULT_CALIBRATED_THRESHOLD);
        assert_eq!(calibration.f1, 0.0);
    }
}
