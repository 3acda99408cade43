//! Hybrid feature assembly.
//!
//! The ensemble was trained on `scaled features ⧺ embedding`, originals
//! first. Any other order produces plausible but wrong scores, so the order
//! lives in exactly one place: [`assemble`].

use crate::features::{feature_names, FeatureVector, FEATURE_COUNT};

/// Output of the neural extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f64>);

impl Embedding {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Model input for the ensemble: originals then embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridFeatureVector {
    values: Vec<f64>,
}

impl HybridFeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn originals(&self) -> &[f64] {
        &self.values[..FEATURE_COUNT]
    }

    pub fn embedding(&self) -> &[f64] {
        &self.values[FEATURE_COUNT..]
    }
}

pub fn assemble(features: &FeatureVector, embedding: &Embedding) -> HybridFeatureVector {
    let mut values = Vec::with_capacity(FEATURE_COUNT + embedding.len());
    values.extend_from_slice(features.as_slice());
    values.extend_from_slice(embedding.as_slice());
    HybridFeatureVector { values }
}

/// Names for every hybrid position; embedding units are `nn_0`, `nn_1`, ...
pub fn hybrid_feature_names(embedding_dim: usize) -> Vec<String> {
    let mut names = feature_names();
    names.extend((0..embedding_dim).map(|i| format!("nn_{}", i)));
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::validate;

    #[test]
    fn test_concatenation_order() {
        let raw: Vec<f64> = (0..FEATURE_COUNT).map(|i| i as f64).collect();
        let features = validate(&raw).unwrap();
        let embedding = Embedding::new(vec![100.0, 101.0, 102.0]);

        let hybrid = assemble(&features, &embedding);

        assert_eq!(hybrid.len(), FEATURE_COUNT + 3);
        let expected: Vec<f64> = (0..FEATURE_COUNT)
            .map(|i| i as f64)
            .chain([100.0, 101.0, 102.0])
            .collect();
        assert_eq!(hybrid.as_slice(), expected.as_slice());
        assert_eq!(hybrid.originals(), raw.as_slice());
        assert_eq!(hybrid.embedding(), &[100.0, 101.0, 102.0]);
    }

    #[test]
    fn test_names_align_with_values() {
        let names = hybrid_feature_names(32);
        assert_eq!(names.len(), FEATURE_COUNT + 32);
        assert_eq!(names[0], "Time");
        assert_eq!(names[FEATURE_COUNT - 1], "Amount");
        assert_eq!(names[FEATURE_COUNT], "nn_0");
        assert_eq!(names[FEATURE_COUNT + 31], "nn_31");
    }
}
