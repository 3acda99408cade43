//! Ensemble scoring over the hybrid feature vector

use crate::error::{ScoringError, ScoringResult};
use crate::hybrid::HybridFeatureVector;
use crate::models::aggregator::{Reducible, ScoreAggregator};
use crate::models::members::{Classifier, MemberAttribution, ModelHandle};
use crate::models::ModelError;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// What to do when a member fails or runs over its budget.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemberFailurePolicy {
    /// Reject the whole request
    #[default]
    FailRequest,
    /// Drop the member and renormalise weights over the survivors
    ExcludeAndRenormalize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnsemblePolicy {
    pub on_failure: MemberFailurePolicy,
    /// Wall-clock budget per member prediction
    pub member_timeout: Option<Duration>,
    /// Wall-clock budget per member attribution; `None` is unbounded
    pub attribution_timeout: Option<Duration>,
    /// Survivors required when excluding members
    pub min_members: usize,
}

impl Default for EnsemblePolicy {
    fn default() -> Self {
        Self {
            on_failure: MemberFailurePolicy::FailRequest,
            member_timeout: None,
            attribution_timeout: None,
            min_members: 1,
        }
    }
}

/// Combined probability plus per-member detail.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleScore {
    pub probability: f64,
    /// Survivors' probabilities in ensemble order
    pub member_scores: Vec<(String, f64)>,
    pub excluded: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleAttribution {
    pub attribution: MemberAttribution,
    pub excluded: Vec<String>,
}

struct MemberRun<'a, T> {
    outputs: Vec<(&'a ModelHandle, T)>,
    excluded: Vec<String>,
}

impl<'a, T: Reducible> MemberRun<'a, T> {
    fn combine(outputs: Vec<(&'a ModelHandle, T)>) -> ScoringResult<T> {
        let weighted = outputs
            .into_iter()
            .map(|(handle, output)| (handle.weight, output))
            .collect();
        ScoreAggregator::reduce(weighted).ok_or_else(|| ScoringError::Inference {
            member: "ensemble".to_string(),
            reason: "no member produced an output".to_string(),
        })
    }
}

/// Immutable set of trained members sharing one input width.
pub struct Ensemble {
    members: Vec<ModelHandle>,
    policy: EnsemblePolicy,
}

impl Ensemble {
    pub fn new(members: Vec<ModelHandle>, policy: EnsemblePolicy) -> ScoringResult<Self> {
        let first = members
            .first()
            .ok_or_else(|| ScoringError::ModelUnavailable("ensemble has no members".to_string()))?;
        let input_dim = first.model.input_dim();

        if let Some(other) = members.iter().find(|m| m.model.input_dim() != input_dim) {
            return Err(ScoringError::ModelUnavailable(format!(
                "member {} expects {} inputs but {} expects {}",
                other.name,
                other.model.input_dim(),
                first.name,
                input_dim
            )));
        }
        for (i, member) in members.iter().enumerate() {
            if members[..i].iter().any(|m| m.name == member.name) {
                return Err(ScoringError::ModelUnavailable(format!(
                    "member {} is listed twice",
                    member.name
                )));
            }
        }
        if policy.min_members == 0 || policy.min_members > members.len() {
            return Err(ScoringError::ModelUnavailable(format!(
                "min_members must be between 1 and {}, got {}",
                members.len(),
                policy.min_members
            )));
        }

        Ok(Self { members, policy })
    }

    pub fn input_dim(&self) -> usize {
        self.members[0].model.input_dim()
    }

    pub fn members(&self) -> &[ModelHandle] {
        &self.members
    }

    pub fn policy(&self) -> &EnsemblePolicy {
        &self.policy
    }

    /// Soft-voted fraud probability.
    pub fn score(&self, hybrid: &HybridFeatureVector) -> ScoringResult<EnsembleScore> {
        let run = self.run_members(hybrid, self.policy.member_timeout, |model, x| {
            model.predict_probability(x)
        })?;

        let member_scores = run
            .outputs
            .iter()
            .map(|(handle, p)| (handle.name.clone(), *p))
            .collect();
        let probability = MemberRun::combine(run.outputs)?;

        debug!(
            probability = probability,
            member_scores = ?member_scores,
            excluded = ?run.excluded,
            "Ensemble scoring complete"
        );

        Ok(EnsembleScore {
            probability,
            member_scores,
            excluded: run.excluded,
        })
    }

    /// Weighted combination of every member's attribution.
    ///
    /// Uses the same weights and exclusion handling as [`Ensemble::score`].
    /// Attribution runs under its own budget, so a member that scored within
    /// `member_timeout` is not dropped for being slower to explain.
    pub fn attribute(&self, hybrid: &HybridFeatureVector) -> ScoringResult<EnsembleAttribution> {
        let run = self.run_members(hybrid, self.policy.attribution_timeout, |model, x| {
            model.attribute(x)
        })?;
        let attribution = MemberRun::combine(run.outputs)?;

        Ok(EnsembleAttribution {
            attribution,
            excluded: run.excluded,
        })
    }

    fn run_members<T, F>(
        &self,
        hybrid: &HybridFeatureVector,
        budget: Option<Duration>,
        op: F,
    ) -> ScoringResult<MemberRun<'_, T>>
    where
        F: Fn(&dyn Classifier, &[f64]) -> Result<T, ModelError>,
    {
        let x = hybrid.as_slice();
        let mut outputs = Vec::with_capacity(self.members.len());
        let mut excluded = Vec::new();

        for handle in &self.members {
            let started = Instant::now();
            let result = op(handle.model.as_ref(), x).and_then(|output| {
                let elapsed = started.elapsed();
                match budget {
                    Some(budget) if elapsed > budget => Err(ModelError::TimedOut { elapsed, budget }),
                    _ => Ok(output),
                }
            });

            match result {
                Ok(output) => outputs.push((handle, output)),
                Err(e) => {
                    error!(
                        member = %handle.name,
                        model_kind = handle.model.kind(),
                        kind = e.kind(),
                        error = %e,
                        "Ensemble member failed"
                    );
                    match self.policy.on_failure {
                        MemberFailurePolicy::FailRequest => {
                            return Err(ScoringError::Inference {
                                member: handle.name.clone(),
                                reason: e.to_string(),
                            });
                        }
                        MemberFailurePolicy::ExcludeAndRenormalize => {
                            excluded.push(handle.name.clone());
                        }
                    }
                }
            }
        }

        if !excluded.is_empty() {
            if outputs.len() < self.policy.min_members {
                return Err(ScoringError::Inference {
                    member: "ensemble".to_string(),
                    reason: format!(
                        "{} of {} members survived, {} required",
                        outputs.len(),
                        self.members.len(),
                        self.policy.min_members
                    ),
                });
            }
            warn!(
                excluded = ?excluded,
                survivors = outputs.len(),
                "Degraded ensemble: weights renormalised over surviving members"
            );
        }

        Ok(MemberRun { outputs, excluded })
    }
}

impl std::fmt::Debug for Ensemble {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ensemble")
            .field("members", &self.members)
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::features::validate;
    use crate::hybrid::{assemble, Embedding};
    use crate::models::members::LogisticRegression;

    /// Member with a fixed output, or one that always fails.
    pub(crate) struct Constant {
        pub(crate) probability: Option<f64>,
        pub(crate) width: usize,
    }

    impl Classifier for Constant {
        fn kind(&self) -> &'static str {
            "constant"
        }

        fn input_dim(&self) -> usize {
            self.width
        }

        fn predict_probability(&self, _x: &[f64]) -> Result<f64, ModelError> {
            self.probability
                .ok_or_else(|| ModelError::Runtime("model crashed".to_string()))
        }

        fn attribute(&self, x: &[f64]) -> Result<MemberAttribution, ModelError> {
            let probability = self.predict_probability(x)?;
            Ok(MemberAttribution {
                probability,
                base_value: probability,
                values: vec![0.0; self.width],
            })
        }
    }

    /// Scores instantly but takes `delay` to explain.
    struct SlowExplainer {
        delay: Duration,
    }

    impl Classifier for SlowExplainer {
        fn kind(&self) -> &'static str {
            "slow_explainer"
        }

        fn input_dim(&self) -> usize {
            32
        }

        fn predict_probability(&self, _x: &[f64]) -> Result<f64, ModelError> {
            Ok(0.7)
        }

        fn attribute(&self, _x: &[f64]) -> Result<MemberAttribution, ModelError> {
            std::thread::sleep(self.delay);
            Ok(MemberAttribution {
                probability: 0.7,
                base_value: 0.7,
                values: vec![0.0; 32],
            })
        }
    }

    fn hybrid() -> HybridFeatureVector {
        assemble(&validate(&[0.0; 30]).unwrap(), &Embedding::new(vec![0.0; 2]))
    }

    fn member(name: &str, weight: f64, probability: Option<f64>) -> ModelHandle {
        ModelHandle::new(name, weight, Box::new(Constant { probability, width: 32 })).unwrap()
    }

    #[test]
    fn test_soft_voting() {
        let ensemble = Ensemble::new(
            vec![
                member("a", 1.0, Some(0.9)),
                member("b", 1.0, Some(0.3)),
                member("c", 2.0, Some(0.1)),
            ],
            EnsemblePolicy::default(),
        )
        .unwrap();

        let score = ensemble.score(&hybrid()).unwrap();
        assert!((score.probability - 0.35).abs() < 1e-12);
        assert_eq!(score.member_scores.len(), 3);
        assert_eq!(score.member_scores[0], ("a".to_string(), 0.9));
        assert!(score.excluded.is_empty());
    }

    #[test]
    fn test_fail_request_policy() {
        let ensemble = Ensemble::new(
            vec![member("a", 1.0, Some(0.9)), member("broken", 1.0, None)],
            EnsemblePolicy::default(),
        )
        .unwrap();

        let err = ensemble.score(&hybrid()).unwrap_err();
        assert!(matches!(err, ScoringError::Inference { ref member, .. } if member == "broken"));
        assert!(ensemble.attribute(&hybrid()).is_err());
    }

    #[test]
    fn test_exclude_and_renormalize_policy() {
        let policy = EnsemblePolicy {
            on_failure: MemberFailurePolicy::ExcludeAndRenormalize,
            ..EnsemblePolicy::default()
        };
        let ensemble = Ensemble::new(
            vec![
                member("a", 1.0, Some(0.9)),
                member("broken", 5.0, None),
                member("c", 3.0, Some(0.1)),
            ],
            policy,
        )
        .unwrap();

        let score = ensemble.score(&hybrid()).unwrap();
        // (0.9 + 3*0.1) / 4
        assert!((score.probability - 0.3).abs() < 1e-12);
        assert_eq!(score.excluded, vec!["broken".to_string()]);

        let attribution = ensemble.attribute(&hybrid()).unwrap();
        assert_eq!(attribution.attribution.probability, score.probability);
        assert_eq!(attribution.excluded, score.excluded);
    }

    #[test]
    fn test_min_members_enforced() {
        let policy = EnsemblePolicy {
            on_failure: MemberFailurePolicy::ExcludeAndRenormalize,
            min_members: 2,
            ..EnsemblePolicy::default()
        };
        let ensemble = Ensemble::new(
            vec![member("a", 1.0, Some(0.9)), member("broken", 1.0, None)],
            policy,
        )
        .unwrap();

        assert!(matches!(
            ensemble.score(&hybrid()),
            Err(ScoringError::Inference { .. })
        ));
    }

    #[test]
    fn test_timeout_applies_policy() {
        let policy = EnsemblePolicy {
            on_failure: MemberFailurePolicy::FailRequest,
            member_timeout: Some(Duration::ZERO),
            attribution_timeout: None,
            min_members: 1,
        };
        let ensemble = Ensemble::new(vec![member("a", 1.0, Some(0.5))], policy).unwrap();

        // Any measurable run exceeds a zero budget
        match ensemble.score(&hybrid()) {
            Err(ScoringError::Inference { member, reason }) => {
                assert_eq!(member, "a");
                assert!(reason.contains("budget"));
            }
            Ok(_) => {} // elapsed can read as exactly zero on coarse clocks
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_rejects_mismatched_widths() {
        let narrow = ModelHandle::new(
            "narrow",
            1.0,
            Box::new(LogisticRegression::new(vec![1.0; 30], 0.0, vec![0.0; 30]).unwrap()),
        )
        .unwrap();
        let err = Ensemble::new(
            vec![member("a", 1.0, Some(0.5)), narrow],
            EnsemblePolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ScoringError::ModelUnavailable(_)));
    }

    #[test]
    fn test_rejects_empty_and_duplicates() {
        assert!(Ensemble::new(vec![], EnsemblePolicy::default()).is_err());
        assert!(Ensemble::new(
            vec![member("a", 1.0, Some(0.5)), member("a", 1.0, Some(0.5))],
            EnsemblePolicy::default()
        )
        .is_err());
    }

    #[test]
    fn test_member_budget_does_not_bound_attribution() {
        let members = || {
            vec![
                member("fast", 1.0, Some(0.1)),
                ModelHandle::new(
                    "slow",
                    1.0,
                    Box::new(SlowExplainer {
                        delay: Duration::from_millis(40),
                    }),
                )
                .unwrap(),
            ]
        };
        let policy = EnsemblePolicy {
            on_failure: MemberFailurePolicy::ExcludeAndRenormalize,
            member_timeout: Some(Duration::from_millis(20)),
            attribution_timeout: None,
            min_members: 1,
        };

        let ensemble = Ensemble::new(members(), policy.clone()).unwrap();
        let score = ensemble.score(&hybrid()).unwrap();
        let attribution = ensemble.attribute(&hybrid()).unwrap();
        assert!(score.excluded.is_empty());
        assert!(attribution.excluded.is_empty());
        assert_eq!(attribution.attribution.probability, score.probability);

        // A dedicated attribution budget still applies the failure policy
        let bounded = Ensemble::new(
            members(),
            EnsemblePolicy {
                attribution_timeout: Some(Duration::from_millis(5)),
                ..policy
            },
        )
        .unwrap();
        let attribution = bounded.attribute(&hybrid()).unwrap();
        assert_eq!(attribution.excluded, vec!["slow".to_string()]);
        assert!((attribution.attribution.probability - 0.1).abs() < 1e-12);
    }
}
