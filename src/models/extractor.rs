//! Neural feature extractor producing the secondary embedding.
//!
//! Two backends: a dense network evaluated natively from exported weights,
//! and an ONNX Runtime session for extractors exported as `.onnx`. Both are
//! deterministic; the output width is fixed when the model is loaded.

use crate::error::{ScoringError, ScoringResult};
use crate::features::{FeatureVector, FEATURE_COUNT};
use crate::hybrid::Embedding;
use crate::models::ModelError;
use anyhow::{Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use serde::Deserialize;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// Layer activation
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Tanh,
    Sigmoid,
    #[default]
    Linear,
}

impl Activation {
    fn apply(self, v: f64) -> f64 {
        match self {
            Activation::Relu => v.max(0.0),
            Activation::Tanh => v.tanh(),
            Activation::Sigmoid => crate::models::sigmoid(v),
            Activation::Linear => v,
        }
    }
}

/// Fully connected layer; `weights` is `[out][in]`.
#[derive(Debug, Clone, Deserialize)]
pub struct DenseLayer {
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
    #[serde(default)]
    pub activation: Activation,
}

impl DenseLayer {
    fn input_dim(&self) -> usize {
        self.weights.first().map(Vec::len).unwrap_or(0)
    }

    fn output_dim(&self) -> usize {
        self.weights.len()
    }

    fn forward(&self, input: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| {
                let z: f64 = row.iter().zip(input).map(|(w, x)| w * x).sum::<f64>() + b;
                self.activation.apply(z)
            })
            .collect()
    }
}

/// Dense network truncated at its feature layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "DenseArtifact")]
pub struct DenseNetwork {
    layers: Vec<DenseLayer>,
}

#[derive(Debug, Deserialize)]
struct DenseArtifact {
    layers: Vec<DenseLayer>,
}

impl TryFrom<DenseArtifact> for DenseNetwork {
    type Error = ScoringError;

    fn try_from(artifact: DenseArtifact) -> Result<Self, Self::Error> {
        DenseNetwork::new(artifact.layers)
    }
}

impl DenseNetwork {
    pub fn new(layers: Vec<DenseLayer>) -> ScoringResult<Self> {
        if layers.is_empty() {
            return Err(ScoringError::ModelUnavailable(
                "extractor has no layers".to_string(),
            ));
        }

        let mut width = FEATURE_COUNT;
        for (i, layer) in layers.iter().enumerate() {
            if layer.output_dim() == 0 {
                return Err(ScoringError::ModelUnavailable(format!(
                    "extractor layer {} has no units",
                    i
                )));
            }
            if layer.weights.iter().any(|row| row.len() != width) {
                return Err(ScoringError::ModelUnavailable(format!(
                    "extractor layer {} expects {} inputs, previous width is {}",
                    i,
                    layer.input_dim(),
                    width
                )));
            }
            if layer.bias.len() != layer.output_dim() {
                return Err(ScoringError::ModelUnavailable(format!(
                    "extractor layer {} has {} biases for {} units",
                    i,
                    layer.bias.len(),
                    layer.output_dim()
                )));
            }
            let finite = layer
                .weights
                .iter()
                .flatten()
                .chain(&layer.bias)
                .all(|v| v.is_finite());
            if !finite {
                return Err(ScoringError::ModelUnavailable(format!(
                    "extractor layer {} has non-finite parameters",
                    i
                )));
            }
            width = layer.output_dim();
        }

        Ok(Self { layers })
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map(DenseLayer::output_dim).unwrap_or(0)
    }

    pub fn forward(&self, input: &[f64]) -> Vec<f64> {
        self.layers
            .iter()
            .fold(input.to_vec(), |activations, layer| layer.forward(&activations))
    }
}

/// Extractor exported to ONNX.
///
/// The session needs exclusive access per run, so concurrent requests
/// serialise on it.
pub struct OnnxExtractor {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    output_dim: usize,
}

impl OnnxExtractor {
    /// Load the model and run a warm-up pass on a zero vector to learn the
    /// embedding width.
    pub fn load<P: AsRef<Path>>(path: P, onnx_threads: usize) -> Result<Self> {
        let path = path.as_ref();

        ort::init().commit()?;
        info!(path = %path.display(), threads = onnx_threads, "Loading ONNX extractor");

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(onnx_threads)?
            .commit_from_file(path)
            .context(format!("Failed to load extractor from {:?}", path))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .context("extractor declares no inputs")?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .context("extractor declares no outputs")?;

        let mut extractor = Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            output_dim: 0,
        };
        let warm_up = extractor.run(&[0.0; FEATURE_COUNT])?;
        extractor.output_dim = warm_up.len();

        info!(
            input = %extractor.input_name,
            output = %extractor.output_name,
            output_dim = extractor.output_dim,
            "ONNX extractor warm-up complete"
        );

        Ok(extractor)
    }

    fn run(&self, input: &[f64]) -> Result<Vec<f64>> {
        let values: Vec<f32> = input.iter().map(|&v| v as f32).collect();
        let shape = vec![1_i64, values.len() as i64];
        let input_tensor =
            Tensor::from_array((shape, values)).context("Failed to create input tensor")?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let outputs = session.run(ort::inputs![&self.input_name => input_tensor])?;
        let output = outputs
            .get(&self.output_name)
            .with_context(|| format!("missing output {}", self.output_name))?;
        let (_, data) = output.try_extract_tensor::<f32>()?;

        Ok(data.iter().map(|&v| v as f64).collect())
    }
}

/// The loaded extractor backend.
pub enum NeuralExtractor {
    Dense(DenseNetwork),
    Onnx(OnnxExtractor),
}

impl NeuralExtractor {
    pub fn embedding_dim(&self) -> usize {
        match self {
            NeuralExtractor::Dense(network) => network.output_dim(),
            NeuralExtractor::Onnx(onnx) => onnx.output_dim,
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            NeuralExtractor::Dense(_) => "dense",
            NeuralExtractor::Onnx(_) => "onnx",
        }
    }

    /// Embed the (scaled) feature vector.
    pub fn extract(&self, features: &FeatureVector) -> Result<Embedding, ModelError> {
        let values = match self {
            NeuralExtractor::Dense(network) => network.forward(features.as_slice()),
            NeuralExtractor::Onnx(onnx) => onnx
                .run(features.as_slice())
                .map_err(|e| ModelError::Runtime(format!("{:#}", e)))?,
        };

        let expected = self.embedding_dim();
        if values.len() != expected {
            return Err(ModelError::Runtime(format!(
                "embedding has {} values, expected {}",
                values.len(),
                expected
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite);
        }

        Ok(Embedding::new(values))
    }
}

impl std::fmt::Debug for NeuralExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeuralExtractor")
            .field("backend", &self.backend())
            .field("embedding_dim", &self.embedding_dim())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::validate;

    fn identity_rows(out: usize, inp: usize) -> Vec<Vec<f64>> {
        (0..out)
            .map(|o| (0..inp).map(|i| if i == o { 1.0 } else { 0.0 }).collect())
            .collect()
    }

    #[test]
    fn test_dense_forward() {
        let network = DenseNetwork::new(vec![
            DenseLayer {
                weights: identity_rows(4, FEATURE_COUNT),
                bias: vec![0.0, 0.0, -1.0, 0.0],
                activation: Activation::Relu,
            },
            DenseLayer {
                weights: vec![vec![1.0, 1.0, 1.0, 1.0], vec![0.5, 0.0, 0.0, 0.0]],
                bias: vec![0.0, 0.25],
                activation: Activation::Linear,
            },
        ])
        .unwrap();
        assert_eq!(network.output_dim(), 2);

        let mut raw = vec![0.0; FEATURE_COUNT];
        raw[0] = 2.0;
        raw[1] = -3.0;
        raw[2] = 0.5;
        raw[3] = 1.0;
        let out = network.forward(validate(&raw).unwrap().as_slice());

        // relu([2, -3, -0.5, 1]) = [2, 0, 0, 1]
        assert_eq!(out, vec![3.0, 1.25]);
    }

    #[test]
    fn test_extract_is_deterministic() {
        let extractor = NeuralExtractor::Dense(
            DenseNetwork::new(vec![DenseLayer {
                weights: vec![vec![0.1; FEATURE_COUNT]; 8],
                bias: vec![0.0; 8],
                activation: Activation::Tanh,
            }])
            .unwrap(),
        );
        let features = validate(&[1.0; FEATURE_COUNT]).unwrap();

        let a = extractor.extract(&features).unwrap();
        let b = extractor.extract(&features).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert_eq!(extractor.embedding_dim(), 8);
    }

    #[test]
    fn test_rejects_mismatched_layers() {
        let err = DenseNetwork::new(vec![DenseLayer {
            weights: vec![vec![0.0; FEATURE_COUNT - 1]; 4],
            bias: vec![0.0; 4],
            activation: Activation::Relu,
        }])
        .unwrap_err();
        assert!(matches!(err, ScoringError::ModelUnavailable(_)));

        let err = DenseNetwork::new(vec![DenseLayer {
            weights: vec![vec![0.0; FEATURE_COUNT]; 4],
            bias: vec![0.0; 3],
            activation: Activation::Relu,
        }])
        .unwrap_err();
        assert!(matches!(err, ScoringError::ModelUnavailable(_)));

        assert!(DenseNetwork::new(vec![]).is_err());
    }

    #[test]
    fn test_deserialize_dense() {
        let json = serde_json::json!({
            "layers": [{
                "weights": vec![vec![1.0; FEATURE_COUNT]; 2],
                "bias": [0.0, 1.0],
                "activation": "sigmoid"
            }]
        });
        let network: DenseNetwork = serde_json::from_value(json).unwrap();
        let out = network.forward(&[0.0; FEATURE_COUNT]);
        assert!((out[0] - 0.5).abs() < 1e-12);
    }
}
