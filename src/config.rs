//! Configuration management for the scoring pipeline

use crate::models::{EnsemblePolicy, MemberFailurePolicy};
use crate::types::alert::RiskLevelThresholds;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub models: ModelsConfig,
    pub detection: DetectionConfig,
    pub ensemble: EnsembleConfig,
    pub explanation: ExplanationConfig,
    pub store: StoreConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Request/reply subject for scoring
    pub predict_subject: String,
    /// Request/reply subject for explanations
    pub explain_subject: String,
    /// Request/reply subject for model info and statistics
    pub info_subject: String,
    /// Subject for outgoing fraud alerts
    pub alert_subject: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            predict_subject: "fraud.predict".to_string(),
            explain_subject: "fraud.explain".to_string(),
            info_subject: "fraud.info".to_string(),
            alert_subject: "fraud.alerts".to_string(),
        }
    }
}

/// Model artifacts configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Directory containing every artifact
    pub models_dir: String,
    /// Extractor file: `.onnx` runs through ONNX Runtime, `.json` is a dense network
    pub extractor: String,
    /// Scaler file; a missing file means unscaled input
    pub scaler: Option<String>,
    /// Metadata file with the calibrated threshold and feature counts
    pub metadata: Option<String>,
    /// Ensemble members in order, loaded from `<name>.json`
    pub members: Vec<String>,
    /// Member weights for soft voting (default 1.0)
    pub weights: HashMap<String, f64>,
    /// Expected extractor output width
    pub embedding_dim: usize,
    /// Number of threads for the ONNX extractor session
    pub onnx_threads: usize,
}

impl ModelsConfig {
    pub fn path(&self, file: &str) -> PathBuf {
        Path::new(&self.models_dir).join(file)
    }

    pub fn member_path(&self, member: &str) -> PathBuf {
        self.path(&format!("{}.json", member))
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            models_dir: "models".to_string(),
            extractor: "nn_feature_extractor.json".to_string(),
            scaler: Some("scaler.json".to_string()),
            metadata: Some("metadata.json".to_string()),
            members: vec![
                "random_forest".to_string(),
                "xgboost".to_string(),
                "logistic".to_string(),
            ],
            weights: HashMap::new(),
            embedding_dim: 32,
            onnx_threads: 1,
        }
    }
}

/// Detection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Decision threshold when the metadata does not carry one
    pub threshold: f64,
    /// Risk level classification thresholds for alerts
    pub risk_levels: RiskLevelThresholds,
    /// Probabilities at or above this (but under the threshold) are "Under Review"
    pub review_threshold: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            risk_levels: RiskLevelThresholds::default(),
            review_threshold: 0.5,
        }
    }
}

/// Member failure handling
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    pub failure_policy: MemberFailurePolicy,
    /// Per-member prediction budget in milliseconds
    pub member_timeout_ms: Option<u64>,
    /// Per-member attribution budget in milliseconds, unbounded when unset
    pub attribution_timeout_ms: Option<u64>,
    /// Survivors required when members are excluded
    pub min_members: usize,
}

impl EnsembleConfig {
    pub fn policy(&self) -> EnsemblePolicy {
        EnsemblePolicy {
            on_failure: self.failure_policy,
            member_timeout: self.member_timeout_ms.map(Duration::from_millis),
            attribution_timeout: self.attribution_timeout_ms.map(Duration::from_millis),
            min_members: self.min_members,
        }
    }
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            failure_policy: MemberFailurePolicy::FailRequest,
            member_timeout_ms: None,
            attribution_timeout_ms: None,
            min_members: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExplanationConfig {
    /// Additivity tolerance, relative to max(1, |p|)
    pub tolerance: f64,
}

impl Default for ExplanationConfig {
    fn default() -> Self {
        Self {
            tolerance: crate::explain::DEFAULT_TOLERANCE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Transactions kept for retrospective explanation
    pub capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum requests processed concurrently
    pub workers: usize,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            timeout_ms: 100,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path, then apply `FRAUD__*`
    /// environment overrides (e.g. `FRAUD__NATS__URL`).
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("FRAUD").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.nats.url, "nats://localhost:4222");
        assert_eq!(config.nats.predict_subject, "fraud.predict");
        assert_eq!(config.detection.threshold, 0.5);
        assert_eq!(config.models.members.len(), 3);
        assert_eq!(config.models.embedding_dim, 32);
        assert_eq!(config.ensemble.failure_policy, MemberFailurePolicy::FailRequest);
        assert_eq!(config.store.capacity, 100);
    }

    #[test]
    fn test_member_paths() {
        let models = ModelsConfig::default();
        assert_eq!(
            models.member_path("xgboost"),
            Path::new("models").join("xgboost.json")
        );
    }

    #[test]
    fn test_ensemble_policy() {
        let ensemble = EnsembleConfig {
            failure_policy: MemberFailurePolicy::ExcludeAndRenormalize,
            member_timeout_ms: Some(25),
            attribution_timeout_ms: None,
            min_members: 2,
        };
        let policy = ensemble.policy();
        assert_eq!(policy.member_timeout, Some(Duration::from_millis(25)));
        assert_eq!(policy.attribution_timeout, None);
        assert_eq!(policy.min_members, 2);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[models]
models_dir = "/opt/models"
members = ["xgboost", "logistic"]

[models.weights]
xgboost = 2.0

[ensemble]
failure_policy = "exclude_and_renormalize"
member_timeout_ms = 40
"#
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.models.models_dir, "/opt/models");
        assert_eq!(config.models.members, vec!["xgboost", "logistic"]);
        assert_eq!(config.models.weights.get("xgboost"), Some(&2.0));
        assert_eq!(
            config.ensemble.failure_policy,
            MemberFailurePolicy::ExcludeAndRenormalize
        );
        assert_eq!(config.ensemble.member_timeout_ms, Some(40));
        // Untouched sections keep their defaults
        assert_eq!(config.pipeline.workers, 4);
        assert_eq!(config.nats.alert_subject, "fraud.alerts");
    }
}
