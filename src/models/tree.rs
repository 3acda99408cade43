//! Decision trees and exact path-dependent TreeSHAP.
//!
//! Trees are stored as flat arrays (children, split feature, threshold,
//! leaf value, cover) and converted into a node list on load. Covers must
//! be positive and consistent, otherwise attributions would not add up.

use crate::error::{ScoringError, ScoringResult};
use serde::Deserialize;

const COVER_TOLERANCE: f64 = 1e-6;

/// Which side of the threshold goes left.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SplitRule {
    /// `x <= threshold` goes left
    #[default]
    Le,
    /// `x < threshold` goes left
    Lt,
}

impl SplitRule {
    fn goes_left(self, x: f64, threshold: f64) -> bool {
        match self {
            SplitRule::Le => x <= threshold,
            SplitRule::Lt => x < threshold,
        }
    }
}

/// Flat tree as exported from training. `-1` children mark a leaf.
#[derive(Debug, Clone, Deserialize)]
pub struct TreeArtifact {
    pub children_left: Vec<i64>,
    pub children_right: Vec<i64>,
    pub feature: Vec<i64>,
    pub threshold: Vec<f64>,
    pub value: Vec<f64>,
    pub cover: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Node {
    Leaf {
        value: f64,
        cover: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        cover: f64,
    },
}

impl Node {
    fn cover(&self) -> f64 {
        match *self {
            Node::Leaf { cover, .. } | Node::Split { cover, .. } => cover,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    rule: SplitRule,
}

impl DecisionTree {
    /// Validate an exported tree against the model's input width.
    pub fn from_artifact(
        artifact: &TreeArtifact,
        input_dim: usize,
        rule: SplitRule,
    ) -> ScoringResult<Self> {
        let n = artifact.value.len();
        let lengths = [
            artifact.children_left.len(),
            artifact.children_right.len(),
            artifact.feature.len(),
            artifact.threshold.len(),
            artifact.cover.len(),
        ];
        if n == 0 || lengths.iter().any(|&len| len != n) {
            return Err(invalid("tree arrays are empty or of unequal length"));
        }

        let mut nodes = Vec::with_capacity(n);
        for i in 0..n {
            let cover = artifact.cover[i];
            if !(cover.is_finite() && cover > 0.0) {
                return Err(invalid(&format!("node {} has cover {}", i, cover)));
            }
            let (left, right) = (artifact.children_left[i], artifact.children_right[i]);

            if left < 0 && right < 0 {
                let value = artifact.value[i];
                if !value.is_finite() {
                    return Err(invalid(&format!("leaf {} has a non-finite value", i)));
                }
                nodes.push(Node::Leaf { value, cover });
                continue;
            }

            // Children after their parent keeps the structure acyclic
            let child = |c: i64| -> ScoringResult<usize> {
                if c <= i as i64 || c >= n as i64 {
                    return Err(invalid(&format!("node {} has child {} out of order", i, c)));
                }
                Ok(c as usize)
            };
            let (left, right) = (child(left)?, child(right)?);

            let feature = artifact.feature[i];
            if feature < 0 || feature as usize >= input_dim {
                return Err(invalid(&format!(
                    "node {} splits on feature {} (input width {})",
                    i, feature, input_dim
                )));
            }
            let threshold = artifact.threshold[i];
            if threshold.is_nan() {
                return Err(invalid(&format!("node {} has a NaN threshold", i)));
            }

            nodes.push(Node::Split {
                feature: feature as usize,
                threshold,
                left,
                right,
                cover,
            });
        }

        for (i, node) in nodes.iter().enumerate() {
            if let Node::Split {
                left, right, cover, ..
            } = *node
            {
                let children = nodes[left].cover() + nodes[right].cover();
                if (children - cover).abs() > COVER_TOLERANCE * cover {
                    return Err(invalid(&format!(
                        "node {} cover {} differs from its children's {}",
                        i, cover, children
                    )));
                }
            }
        }

        Ok(Self { nodes, rule })
    }

    pub fn predict(&self, x: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match self.nodes[index] {
                Node::Leaf { value, .. } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    index = if self.rule.goes_left(x[feature], threshold) {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }

    /// Cover-weighted mean of the leaves: the base value TreeSHAP explains
    /// against.
    pub fn expected_value(&self) -> f64 {
        let root = self.nodes[0].cover();
        self.nodes
            .iter()
            .map(|node| match *node {
                Node::Leaf { value, cover } => value * cover / root,
                Node::Split { .. } => 0.0,
            })
            .sum()
    }

    /// Add this tree's SHAP values for `x` into `phi`.
    ///
    /// `Σ phi == predict(x) - expected_value()` up to rounding.
    pub fn shap_values(&self, x: &[f64], phi: &mut [f64]) {
        self.recurse(0, x, phi, &[], 0, 1.0, 1.0, None);
    }

    #[allow(clippy::too_many_arguments)]
    fn recurse(
        &self,
        index: usize,
        x: &[f64],
        phi: &mut [f64],
        parent_path: &[PathElement],
        unique_depth: usize,
        parent_zero_fraction: f64,
        parent_one_fraction: f64,
        parent_feature: Option<usize>,
    ) {
        let mut path = vec![PathElement::default(); unique_depth + 1];
        path[..unique_depth].copy_from_slice(&parent_path[..unique_depth]);
        extend_path(
            &mut path,
            unique_depth,
            parent_zero_fraction,
            parent_one_fraction,
            parent_feature,
        );

        match self.nodes[index] {
            Node::Leaf { value, .. } => {
                for i in 1..=unique_depth {
                    let weight = unwound_path_sum(&path, unique_depth, i);
                    let element = path[i];
                    if let Some(feature) = element.feature {
                        phi[feature] +=
                            weight * (element.one_fraction - element.zero_fraction) * value;
                    }
                }
            }
            Node::Split {
                feature,
                threshold,
                left,
                right,
                cover,
            } => {
                let (hot, cold) = if self.rule.goes_left(x[feature], threshold) {
                    (left, right)
                } else {
                    (right, left)
                };
                let hot_zero_fraction = self.nodes[hot].cover() / cover;
                let cold_zero_fraction = self.nodes[cold].cover() / cover;

                let mut incoming_zero_fraction = 1.0;
                let mut incoming_one_fraction = 1.0;
                let mut unique_depth = unique_depth;

                // A feature split on twice is tracked once on the path
                if let Some(path_index) =
                    (1..=unique_depth).find(|&i| path[i].feature == Some(feature))
                {
                    incoming_zero_fraction = path[path_index].zero_fraction;
                    incoming_one_fraction = path[path_index].one_fraction;
                    unwind_path(&mut path, unique_depth, path_index);
                    unique_depth -= 1;
                }

                self.recurse(
                    hot,
                    x,
                    phi,
                    &path,
                    unique_depth + 1,
                    hot_zero_fraction * incoming_zero_fraction,
                    incoming_one_fraction,
                    Some(feature),
                );
                self.recurse(
                    cold,
                    x,
                    phi,
                    &path,
                    unique_depth + 1,
                    cold_zero_fraction * incoming_zero_fraction,
                    0.0,
                    Some(feature),
                );
            }
        }
    }
}

fn invalid(reason: &str) -> ScoringError {
    ScoringError::ModelUnavailable(format!("invalid tree: {}", reason))
}

#[derive(Debug, Clone, Copy, Default)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    pweight: f64,
}

fn extend_path(
    path: &mut [PathElement],
    unique_depth: usize,
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    path[unique_depth] = PathElement {
        feature,
        zero_fraction,
        one_fraction,
        pweight: if unique_depth == 0 { 1.0 } else { 0.0 },
    };
    let depth = unique_depth as f64;
    for i in (0..unique_depth).rev() {
        let step = i as f64;
        path[i + 1].pweight += one_fraction * path[i].pweight * (step + 1.0) / (depth + 1.0);
        path[i].pweight = zero_fraction * path[i].pweight * (depth - step) / (depth + 1.0);
    }
}

fn unwind_path(path: &mut [PathElement], unique_depth: usize, path_index: usize) {
    let one_fraction = path[path_index].one_fraction;
    let zero_fraction = path[path_index].zero_fraction;
    let depth = unique_depth as f64;
    let mut next_one_portion = path[unique_depth].pweight;

    for i in (0..unique_depth).rev() {
        let step = i as f64;
        if one_fraction != 0.0 {
            let tmp = path[i].pweight;
            path[i].pweight = next_one_portion * (depth + 1.0) / ((step + 1.0) * one_fraction);
            next_one_portion =
                tmp - path[i].pweight * zero_fraction * (depth - step) / (depth + 1.0);
        } else {
            path[i].pweight = path[i].pweight * (depth + 1.0) / (zero_fraction * (depth - step));
        }
    }

    for i in path_index..unique_depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
}

fn unwound_path_sum(path: &[PathElement], unique_depth: usize, path_index: usize) -> f64 {
    let one_fraction = path[path_index].one_fraction;
    let zero_fraction = path[path_index].zero_fraction;
    let depth = unique_depth as f64;
    let mut next_one_portion = path[unique_depth].pweight;
    let mut total = 0.0;

    for i in (0..unique_depth).rev() {
        let step = i as f64;
        if one_fraction != 0.0 {
            let tmp = next_one_portion * (depth + 1.0) / ((step + 1.0) * one_fraction);
            total += tmp;
            next_one_portion = path[i].pweight - tmp * zero_fraction * (depth - step) / (depth + 1.0);
        } else if zero_fraction != 0.0 {
            total += (path[i].pweight / zero_fraction) / ((depth - step) / (depth + 1.0));
        }
    }

    total
}
