//! Prediction service facade.
//!
//! `predict` runs validate → scale → extract → assemble → ensemble → decide.
//! `explain` resolves stored features and runs the same path through the
//! explanation engine. Both work on one model snapshot taken at the start
//! of the call.

use crate::config::AppConfig;
use crate::decision::{decide, DecisionThreshold};
use crate::error::{ScoringError, ScoringResult};
use crate::explain::{self, DEFAULT_TOLERANCE};
use crate::features::{self, FeatureVector, FEATURE_COUNT};
use crate::hybrid::{assemble, hybrid_feature_names, HybridFeatureVector};
use crate::models::{Ensemble, MemberFailurePolicy, ModelLoader, NeuralExtractor, Scaler};
use crate::store::FeatureResolver;
use crate::types::{ExplanationResult, ScoreResult};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info};

/// Everything one request needs, loaded and validated together.
#[derive(Debug)]
pub struct ScoringModels {
    scaler: Option<Scaler>,
    extractor: NeuralExtractor,
    ensemble: Ensemble,
    threshold: DecisionThreshold,
    feature_names: Vec<String>,
}

impl ScoringModels {
    /// Fails with `ModelUnavailable` unless the ensemble expects exactly the
    /// hybrid width the extractor produces.
    pub fn new(
        scaler: Option<Scaler>,
        extractor: NeuralExtractor,
        ensemble: Ensemble,
        threshold: DecisionThreshold,
    ) -> ScoringResult<Self> {
        let hybrid_width = FEATURE_COUNT + extractor.embedding_dim();
        if ensemble.input_dim() != hybrid_width {
            return Err(ScoringError::ModelUnavailable(format!(
                "ensemble expects {} features but the extractor yields {} + {} = {}",
                ensemble.input_dim(),
                FEATURE_COUNT,
                extractor.embedding_dim(),
                hybrid_width
            )));
        }

        Ok(Self {
            scaler,
            feature_names: hybrid_feature_names(extractor.embedding_dim()),
            extractor,
            ensemble,
            threshold,
        })
    }

    /// Scale, embed and concatenate.
    pub fn hybrid(&self, features: &FeatureVector) -> ScoringResult<HybridFeatureVector> {
        let scaled = match &self.scaler {
            Some(scaler) => scaler.transform(features),
            None => features.map_saturating(|_, x| x),
        };
        let embedding = self.extractor.extract(&scaled).map_err(|e| {
            error!(backend = self.extractor.backend(), error = %e, "Feature extraction failed");
            ScoringError::Extraction(e.to_string())
        })?;
        Ok(assemble(&scaled, &embedding))
    }

    pub fn hybrid_feature_count(&self) -> usize {
        self.feature_names.len()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn ensemble(&self) -> &Ensemble {
        &self.ensemble
    }

    pub fn extractor(&self) -> &NeuralExtractor {
        &self.extractor
    }

    pub fn threshold(&self) -> DecisionThreshold {
        self.threshold
    }

    pub fn has_scaler(&self) -> bool {
        self.scaler.is_some()
    }
}

/// Holds the live model snapshot. Readers clone the `Arc`; `publish` swaps
/// in a fully built replacement.
#[derive(Debug)]
pub struct ModelRegistry {
    current: RwLock<Arc<ScoringModels>>,
}

impl ModelRegistry {
    pub fn new(models: ScoringModels) -> Self {
        Self {
            current: RwLock::new(Arc::new(models)),
        }
    }

    pub fn snapshot(&self) -> Arc<ScoringModels> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the live snapshot, returning the previous one.
    pub fn publish(&self, models: ScoringModels) -> Arc<ScoringModels> {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *current, Arc::new(models))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberInfo {
    pub name: String,
    pub kind: &'static str,
    pub weight: f64,
}

/// Loaded-model summary for the info endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub expected_input_features: usize,
    pub embedding_dim: usize,
    pub hybrid_features: usize,
    pub threshold: f64,
    pub scaler_loaded: bool,
    pub extractor_backend: &'static str,
    pub members: Vec<MemberInfo>,
    pub failure_policy: MemberFailurePolicy,
    pub min_members: usize,
    pub member_timeout_ms: Option<u64>,
    pub attribution_timeout_ms: Option<u64>,
}

/// Public scoring and explanation operations.
pub struct PredictionService {
    registry: ModelRegistry,
    resolver: Arc<dyn FeatureResolver>,
    tolerance: f64,
}

impl PredictionService {
    pub fn new(models: ScoringModels, resolver: Arc<dyn FeatureResolver>) -> Self {
        Self {
            registry: ModelRegistry::new(models),
            resolver,
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    /// Additivity tolerance used by `explain`
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Load every artifact named by the configuration. Any failure is
    /// `ModelUnavailable` and the caller must not serve traffic.
    pub fn from_config(config: &AppConfig, resolver: Arc<dyn FeatureResolver>) -> ScoringResult<Self> {
        let models = ModelLoader::new(config).load()?;
        info!(
            members = models.ensemble().members().len(),
            hybrid_features = models.hybrid_feature_count(),
            threshold = models.threshold().value(),
            "Scoring models ready"
        );
        Ok(Self::new(models, resolver).with_tolerance(config.explanation.tolerance))
    }

    pub fn predict(&self, raw: &[f64]) -> ScoringResult<ScoreResult> {
        let features = features::validate(raw)?;
        self.score(&features)
    }

    /// `predict` for untyped input such as a JSON array.
    pub fn predict_values(&self, raw: &[Value]) -> ScoringResult<ScoreResult> {
        let features = features::validate_values(raw)?;
        self.score(&features)
    }

    /// Score an already validated vector.
    pub fn score(&self, features: &FeatureVector) -> ScoringResult<ScoreResult> {
        let models = self.registry.snapshot();
        let hybrid = models.hybrid(features)?;
        let ensemble_score = models.ensemble().score(&hybrid)?;
        let decision = decide(ensemble_score.probability, &models.threshold());

        debug!(
            probability = ensemble_score.probability,
            verdict = %decision.verdict,
            threshold = decision.threshold_used,
            "Transaction scored"
        );

        Ok(ScoreResult {
            probability: ensemble_score.probability,
            verdict: decision.verdict,
            threshold_used: decision.threshold_used,
            hybrid_feature_count: hybrid.len(),
            member_scores: ensemble_score.member_scores,
            excluded_members: ensemble_score.excluded,
        })
    }

    /// Explain a stored transaction.
    pub fn explain(&self, transaction_id: &str) -> ScoringResult<ExplanationResult> {
        let features = self
            .resolver
            .resolve(transaction_id)
            .ok_or_else(|| ScoringError::NotFound(transaction_id.to_string()))?;
        self.explain_features(&features, Some(transaction_id.to_string()))
    }

    /// Explain a feature vector directly, without a store lookup.
    pub fn explain_features(
        &self,
        features: &FeatureVector,
        transaction_id: Option<String>,
    ) -> ScoringResult<ExplanationResult> {
        let models = self.registry.snapshot();
        let hybrid = models.hybrid(features)?;
        let attributions = explain::explain(
            &hybrid,
            models.ensemble(),
            models.feature_names(),
            self.tolerance,
        )?;
        let decision = decide(attributions.final_probability, &models.threshold());

        Ok(ExplanationResult {
            transaction_id,
            verdict: decision.verdict,
            threshold_used: decision.threshold_used,
            attributions,
        })
    }

    pub fn model_info(&self) -> ModelInfo {
        let models = self.registry.snapshot();
        let policy = models.ensemble().policy();
        ModelInfo {
            expected_input_features: FEATURE_COUNT,
            embedding_dim: models.extractor().embedding_dim(),
            hybrid_features: models.hybrid_feature_count(),
            threshold: models.threshold().value(),
            scaler_loaded: models.has_scaler(),
            extractor_backend: models.extractor().backend(),
            members: models
                .ensemble()
                .members()
                .iter()
                .map(|m| MemberInfo {
                    name: m.name.clone(),
                    kind: m.model.kind(),
                    weight: m.weight,
                })
                .collect(),
            failure_policy: policy.on_failure,
            min_members: policy.min_members,
            member_timeout_ms: policy.member_timeout.map(|d| d.as_millis() as u64),
            attribution_timeout_ms: policy.attribution_timeout.map(|d| d.as_millis() as u64),
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Swap in a freshly built model set. In-flight calls finish on the
    /// snapshot they started with.
    pub fn reload(&self, models: ScoringModels) {
        let previous = self.registry.publish(models);
        info!(
            previous_members = previous.ensemble().members().len(),
            "Scoring models replaced"
        );
    }
}

impl std::fmt::Debug for PredictionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionService")
            .field("registry", &self.registry)
            .field("tolerance", &self.tolerance)
            .finish()
    }
}
