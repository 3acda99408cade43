//! Ensemble members.
//!
//! Every member exposes the same capability: a positive-class probability
//! for a hybrid vector, and an additive attribution of that probability.
//! Members with a logistic link explain in margin space and rescale into
//! probability space so that `base + Σ values == probability` holds per
//! member.

use crate::error::{ScoringError, ScoringResult};
use crate::models::tree::{DecisionTree, SplitRule, TreeArtifact};
use crate::models::{check_width, sigmoid, ModelError};
use serde::Deserialize;

/// Additive explanation of one member's probability.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberAttribution {
    pub probability: f64,
    pub base_value: f64,
    pub values: Vec<f64>,
}

impl MemberAttribution {
    /// `base + Σ values - probability`
    pub fn residual(&self) -> f64 {
        self.base_value + self.values.iter().sum::<f64>() - self.probability
    }
}

/// Capability shared by every ensemble member.
pub trait Classifier: Send + Sync {
    fn kind(&self) -> &'static str;

    fn input_dim(&self) -> usize;

    fn predict_probability(&self, x: &[f64]) -> Result<f64, ModelError>;

    fn attribute(&self, x: &[f64]) -> Result<MemberAttribution, ModelError>;
}

/// A named, weighted member of the ensemble.
pub struct ModelHandle {
    pub name: String,
    pub weight: f64,
    pub model: Box<dyn Classifier>,
}

impl ModelHandle {
    pub fn new(name: impl Into<String>, weight: f64, model: Box<dyn Classifier>) -> ScoringResult<Self> {
        let name = name.into();
        if !(weight.is_finite() && weight > 0.0) {
            return Err(ScoringError::ModelUnavailable(format!(
                "member {} has invalid weight {}",
                name, weight
            )));
        }
        Ok(Self { name, weight, model })
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .field("kind", &self.model.kind())
            .finish()
    }
}

/// Exported classifier, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClassifierArtifact {
    RandomForest {
        input_dim: usize,
        #[serde(default)]
        split_rule: SplitRule,
        trees: Vec<TreeArtifact>,
    },
    GradientBoosting {
        input_dim: usize,
        #[serde(default)]
        split_rule: SplitRule,
        base_score: f64,
        trees: Vec<TreeArtifact>,
    },
    LogisticRegression {
        coefficients: Vec<f64>,
        intercept: f64,
        feature_means: Vec<f64>,
    },
}

impl ClassifierArtifact {
    pub fn build(self) -> ScoringResult<Box<dyn Classifier>> {
        Ok(match self {
            ClassifierArtifact::RandomForest {
                input_dim,
                split_rule,
                trees,
            } => Box::new(RandomForest::new(input_dim, split_rule, &trees)?),
            ClassifierArtifact::GradientBoosting {
                input_dim,
                split_rule,
                base_score,
                trees,
            } => Box::new(GradientBoosting::new(input_dim, split_rule, base_score, &trees)?),
            ClassifierArtifact::LogisticRegression {
                coefficients,
                intercept,
                feature_means,
            } => Box::new(LogisticRegression::new(coefficients, intercept, feature_means)?),
        })
    }
}

fn build_trees(
    input_dim: usize,
    rule: SplitRule,
    trees: &[TreeArtifact],
) -> ScoringResult<Vec<DecisionTree>> {
    if trees.is_empty() {
        return Err(ScoringError::ModelUnavailable(
            "tree ensemble has no trees".to_string(),
        ));
    }
    trees
        .iter()
        .map(|tree| DecisionTree::from_artifact(tree, input_dim, rule))
        .collect()
}

fn checked_probability(p: f64) -> Result<f64, ModelError> {
    if !p.is_finite() {
        return Err(ModelError::NonFinite);
    }
    if !(0.0..=1.0).contains(&p) {
        return Err(ModelError::OutOfRange(p));
    }
    Ok(p)
}

/// Map margin-space attributions into probability space.
///
/// Scales every value by `(σ(m) - σ(m₀)) / (m - m₀)`, so the rescaled values
/// sum to `σ(m) - σ(m₀)` exactly when the margin values summed to `m - m₀`.
fn rescale_through_sigmoid(
    margin: f64,
    base_margin: f64,
    margin_values: Vec<f64>,
) -> Result<MemberAttribution, ModelError> {
    let probability = checked_probability(sigmoid(margin))?;
    let base_value = sigmoid(base_margin);
    let delta = margin - base_margin;
    let factor = if delta.abs() > 1e-12 {
        (probability - base_value) / delta
    } else {
        probability * (1.0 - probability)
    };

    let values: Vec<f64> = margin_values.into_iter().map(|v| v * factor).collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::NonFinite);
    }

    Ok(MemberAttribution {
        probability,
        base_value,
        values,
    })
}

/// Bagged trees whose leaves hold positive-class fractions.
pub struct RandomForest {
    input_dim: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn new(input_dim: usize, rule: SplitRule, trees: &[TreeArtifact]) -> ScoringResult<Self> {
        let trees = build_trees(input_dim, rule, trees)?;
        Ok(Self { input_dim, trees })
    }
}

impl Classifier for RandomForest {
    fn kind(&self) -> &'static str {
        "random_forest"
    }

    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn predict_probability(&self, x: &[f64]) -> Result<f64, ModelError> {
        check_width(x, self.input_dim)?;
        let total: f64 = self.trees.iter().map(|tree| tree.predict(x)).sum();
        checked_probability(total / self.trees.len() as f64)
    }

    fn attribute(&self, x: &[f64]) -> Result<MemberAttribution, ModelError> {
        let probability = self.predict_probability(x)?;
        let count = self.trees.len() as f64;

        let mut values = vec![0.0; self.input_dim];
        for tree in &self.trees {
            tree.shap_values(x, &mut values);
        }
        values.iter_mut().for_each(|v| *v /= count);

        let base_value = self.trees.iter().map(DecisionTree::expected_value).sum::<f64>() / count;

        Ok(MemberAttribution {
            probability,
            base_value,
            values,
        })
    }
}

/// Boosted trees summed in logit space.
pub struct GradientBoosting {
    input_dim: usize,
    base_score: f64,
    trees: Vec<DecisionTree>,
}

impl GradientBoosting {
    pub fn new(
        input_dim: usize,
        rule: SplitRule,
        base_score: f64,
        trees: &[TreeArtifact],
    ) -> ScoringResult<Self> {
        if !base_score.is_finite() {
            return Err(ScoringError::ModelUnavailable(
                "gradient boosting base_score is not finite".to_string(),
            ));
        }
        let trees = build_trees(input_dim, rule, trees)?;
        Ok(Self {
            input_dim,
            base_score,
            trees,
        })
    }

    fn margin(&self, x: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|tree| tree.predict(x)).sum::<f64>()
    }
}

impl Classifier for GradientBoosting {
    fn kind(&self) -> &'static str {
        "gradient_boosting"
    }

    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn predict_probability(&self, x: &[f64]) -> Result<f64, ModelError> {
        check_width(x, self.input_dim)?;
        checked_probability(sigmoid(self.margin(x)))
    }

    fn attribute(&self, x: &[f64]) -> Result<MemberAttribution, ModelError> {
        check_width(x, self.input_dim)?;
        let mut margin_values = vec![0.0; self.input_dim];
        for tree in &self.trees {
            tree.shap_values(x, &mut margin_values);
        }
        let base_margin =
            self.base_score + self.trees.iter().map(DecisionTree::expected_value).sum::<f64>();

        rescale_through_sigmoid(self.margin(x), base_margin, margin_values)
    }
}

/// Linear model over the hybrid vector.
///
/// Attributions are exact linear SHAP against the training means.
pub struct LogisticRegression {
    coefficients: Vec<f64>,
    intercept: f64,
    feature_means: Vec<f64>,
}

impl LogisticRegression {
    pub fn new(coefficients: Vec<f64>, intercept: f64, feature_means: Vec<f64>) -> ScoringResult<Self> {
        if coefficients.is_empty() || coefficients.len() != feature_means.len() {
            return Err(ScoringError::ModelUnavailable(format!(
                "logistic regression has {} coefficients and {} feature means",
                coefficients.len(),
                feature_means.len()
            )));
        }
        let finite = coefficients
            .iter()
            .chain(&feature_means)
            .chain(std::iter::once(&intercept))
            .all(|v| v.is_finite());
        if !finite {
            return Err(ScoringError::ModelUnavailable(
                "logistic regression has non-finite parameters".to_string(),
            ));
        }
        Ok(Self {
            coefficients,
            intercept,
            feature_means,
        })
    }

    fn margin(&self, x: &[f64]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(x)
                .map(|(w, v)| w * v)
                .sum::<f64>()
    }
}

impl Classifier for LogisticRegression {
    fn kind(&self) -> &'static str {
        "logistic_regression"
    }

    fn input_dim(&self) -> usize {
        self.coefficients.len()
    }

    fn predict_probability(&self, x: &[f64]) -> Result<f64, ModelError> {
        check_width(x, self.input_dim())?;
        checked_probability(sigmoid(self.margin(x)))
    }

    fn attribute(&self, x: &[f64]) -> Result<MemberAttribution, ModelError> {
        check_width(x, self.input_dim())?;
        let margin_values: Vec<f64> = self
            .coefficients
            .iter()
            .zip(x.iter().zip(&self.feature_means))
            .map(|(w, (v, mean))| w * (v - mean))
            .collect();
        let base_margin = self.margin(&self.feature_means);

        rescale_through_sigmoid(self.margin(x), base_margin, margin_values)
    }
}
