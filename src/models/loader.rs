//! Model artifact loader
//!
//! Reads every artifact named by the configuration, validates it and
//! assembles a [`ScoringModels`]. Any failure is `ModelUnavailable`: the
//! process refuses to start rather than serve with a partial model set.

use crate::config::{AppConfig, DetectionConfig, EnsembleConfig, ModelsConfig};
use crate::decision::DecisionThreshold;
use crate::error::{ScoringError, ScoringResult};
use crate::features::FEATURE_COUNT;
use crate::models::aggregator::ScoreAggregator;
use crate::models::extractor::{DenseNetwork, OnnxExtractor};
use crate::models::members::{ClassifierArtifact, ModelHandle};
use crate::models::{Ensemble, NeuralExtractor, Scaler};
use crate::service::ScoringModels;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

/// Training-time facts stored next to the models
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModelMetadata {
    #[serde(default)]
    pub optimal_threshold: Option<f64>,
    #[serde(default = "default_input_features")]
    pub input_features: usize,
    #[serde(default)]
    pub hybrid_features: Option<usize>,
}

fn default_input_features() -> usize {
    FEATURE_COUNT
}

/// Loader for all scoring artifacts
pub struct ModelLoader<'a> {
    models: &'a ModelsConfig,
    detection: &'a DetectionConfig,
    ensemble: &'a EnsembleConfig,
}

impl<'a> ModelLoader<'a> {
    pub fn new(config: &'a AppConfig) -> Self {
        Self {
            models: &config.models,
            detection: &config.detection,
            ensemble: &config.ensemble,
        }
    }

    /// Load and cross-check every artifact.
    pub fn load(&self) -> ScoringResult<ScoringModels> {
        let metadata = self.load_metadata()?;
        let scaler = self.load_scaler()?;
        let extractor = self.load_extractor()?;

        let embedding_dim = extractor.embedding_dim();
        if embedding_dim != self.models.embedding_dim {
            return Err(ScoringError::ModelUnavailable(format!(
                "extractor yields {} features, configuration expects {}",
                embedding_dim, self.models.embedding_dim
            )));
        }

        let threshold = match &metadata {
            Some(metadata) => {
                check_metadata(metadata, embedding_dim)?;
                metadata.optimal_threshold.unwrap_or(self.detection.threshold)
            }
            None => self.detection.threshold,
        };

        let members = self.load_members()?;
        let ensemble = Ensemble::new(members, self.ensemble.policy())?;
        let models = ScoringModels::new(
            scaler,
            extractor,
            ensemble,
            DecisionThreshold::new(threshold)?,
        )?;

        info!(
            threshold = threshold,
            embedding_dim = embedding_dim,
            hybrid_features = models.hybrid_feature_count(),
            "All model artifacts loaded"
        );
        Ok(models)
    }

    pub fn load_metadata(&self) -> ScoringResult<Option<ModelMetadata>> {
        let Some(file) = self.models.metadata.as_deref() else {
            warn!("No metadata configured, using the configured threshold");
            return Ok(None);
        };
        let path = self.models.path(file);
        let metadata: ModelMetadata = read_json(&path).map_err(unavailable)?;

        info!(
            path = %path.display(),
            threshold = ?metadata.optimal_threshold,
            input_features = metadata.input_features,
            hybrid_features = ?metadata.hybrid_features,
            "Loaded model metadata"
        );
        Ok(Some(metadata))
    }

    /// A configured scaler whose file is missing means unscaled input; a
    /// scaler that exists but does not parse is fatal.
    pub fn load_scaler(&self) -> ScoringResult<Option<Scaler>> {
        let Some(file) = self.models.scaler.as_deref() else {
            warn!("No scaler configured, proceeding without scaling");
            return Ok(None);
        };
        let path = self.models.path(file);
        if !path.exists() {
            warn!(path = %path.display(), "Scaler not found, proceeding without scaling");
            return Ok(None);
        }

        let scaler: Scaler = read_json(&path).map_err(unavailable)?;
        info!(path = %path.display(), "Loaded scaler");
        Ok(Some(scaler))
    }

    pub fn load_extractor(&self) -> ScoringResult<NeuralExtractor> {
        let path = self.models.path(&self.models.extractor);
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();

        let extractor = match extension {
            "onnx" => NeuralExtractor::Onnx(
                OnnxExtractor::load(&path, self.models.onnx_threads).map_err(unavailable)?,
            ),
            "json" => NeuralExtractor::Dense(read_json::<DenseNetwork>(&path).map_err(unavailable)?),
            other => {
                return Err(ScoringError::ModelUnavailable(format!(
                    "unsupported extractor format {:?} for {}",
                    other,
                    path.display()
                )))
            }
        };

        info!(
            path = %path.display(),
            backend = extractor.backend(),
            embedding_dim = extractor.embedding_dim(),
            "Loaded feature extractor"
        );
        Ok(extractor)
    }

    pub fn load_members(&self) -> ScoringResult<Vec<ModelHandle>> {
        let aggregator = ScoreAggregator::new(self.models.weights.clone());
        for name in aggregator.weights().keys() {
            if !self.models.members.contains(name) {
                warn!(model = %name, "Weight configured for a model that is not a member");
            }
        }

        self.models
            .members
            .iter()
            .map(|name| self.load_member(name, aggregator.weight_for(name)))
            .collect()
    }

    pub fn load_member(&self, name: &str, weight: f64) -> ScoringResult<ModelHandle> {
        let path = self.models.member_path(name);
        let artifact: ClassifierArtifact = read_json(&path).map_err(unavailable)?;
        let model = artifact
            .build()
            .map_err(|e| ScoringError::ModelUnavailable(format!("member {}: {}", name, e)))?;

        info!(
            model = %name,
            kind = model.kind(),
            input_dim = model.input_dim(),
            weight = weight,
            path = %path.display(),
            "Loaded ensemble member"
        );
        ModelHandle::new(name, weight, model)
    }
}

fn check_metadata(metadata: &ModelMetadata, embedding_dim: usize) -> ScoringResult<()> {
    if metadata.input_features != FEATURE_COUNT {
        return Err(ScoringError::ModelUnavailable(format!(
            "models were trained on {} input features, expected {}",
            metadata.input_features, FEATURE_COUNT
        )));
    }
    if let Some(hybrid) = metadata.hybrid_features {
        if hybrid != FEATURE_COUNT + embedding_dim {
            return Err(ScoringError::ModelUnavailable(format!(
                "models were trained on {} hybrid features, extractor gives {}",
                hybrid,
                FEATURE_COUNT + embedding_dim
            )));
        }
    }
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

fn unavailable(err: anyhow::Error) -> ScoringError {
    ScoringError::ModelUnavailable(format!("{:#}", err))
}
