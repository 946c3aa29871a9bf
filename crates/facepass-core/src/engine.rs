//! Authorization policy and decision engine.
//!
//! Turns a classifier distribution into an [`AuthDecision`]. Pure: no I/O, no
//! shared state, safe to call concurrently from any number of threads.

use crate::error::ConfigError;
use crate::types::{AuthDecision, ProbabilityDistribution, RankedPrediction, RejectionReason};

/// Number of ranked predictions reported with every decision.
pub const TOP_K: usize = 3;

pub const DEFAULT_THRESHOLD: f32 = 0.80;
pub const DEFAULT_MIN_CONFIDENCE_GAP: f32 = 0.20;
pub const CONTINUOUS_THRESHOLD: f32 = 0.75;

/// The pair (threshold, minimum confidence gap). Validated on construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuthPolicy {
    threshold: f32,
    min_confidence_gap: f32,
}

impl AuthPolicy {
    pub fn new(threshold: f32, min_confidence_gap: f32) -> Result<Self, ConfigError> {
        check_unit("threshold", threshold)?;
        check_unit("min_confidence_gap", min_confidence_gap)?;
        Ok(Self {
            threshold,
            min_confidence_gap,
        })
    }

    /// Login policy: 0.80 confidence and a 0.20 margin over the runner-up.
    pub fn login() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            min_confidence_gap: DEFAULT_MIN_CONFIDENCE_GAP,
        }
    }

    /// Continuous verification: looser threshold, no gap check.
    pub fn continuous() -> Self {
        Self {
            threshold: CONTINUOUS_THRESHOLD,
            min_confidence_gap: 0.0,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn min_confidence_gap(&self) -> f32 {
        self.min_confidence_gap
    }
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self::login()
    }
}

fn check_unit(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { name, value })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizationEngine {
    policy: AuthPolicy,
}

impl AuthorizationEngine {
    pub fn new(policy: AuthPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &AuthPolicy {
        &self.policy
    }

    /// Apply the policy to a distribution for a detected face.
    ///
    /// The distribution is never empty; its constructor guarantees that.
    ///
    /// Labels are ranked by descending probability; equal probabilities keep
    /// the distribution's entry order. With a single label the runner-up is
    /// the winner itself and the gap is reported as the confidence.
    pub fn authorize(&self, distribution: &ProbabilityDistribution) -> AuthDecision {
        let ranked = rank(distribution);
        let top_predictions: Vec<RankedPrediction> = ranked
            .iter()
            .take(TOP_K)
            .map(|(label, p)| RankedPrediction {
                label: (*label).to_string(),
                confidence: *p,
            })
            .collect();

        // `ProbabilityDistribution::new` rejects empty input, so rank 0 always exists.
        let (top1_label, confidence) = ranked[0];
        let confidence_gap = match ranked.get(1) {
            Some((_, second)) => confidence - second,
            None => confidence,
        };

        let mut reasons = Vec::with_capacity(2);
        if confidence < self.policy.threshold {
            reasons.push(RejectionReason::ConfidenceTooLow {
                observed: confidence,
                required: self.policy.threshold,
            });
        }
        if confidence_gap < self.policy.min_confidence_gap {
            reasons.push(RejectionReason::GapTooSmall {
                observed: confidence_gap,
                required: self.policy.min_confidence_gap,
            });
        }

        let decision = if reasons.is_empty() {
            AuthDecision::granted(top1_label.to_string(), confidence, confidence_gap, top_predictions)
        } else {
            AuthDecision::denied(confidence, confidence_gap, top_predictions, reasons)
        };

        tracing::debug!(
            name = decision.name(),
            confidence,
            confidence_gap,
            authorized = decision.is_authorized(),
            reasons = ?decision.rejection_reasons(),
            "authorization decided"
        );

        decision
    }
}

/// Stable descending sort by probability.
fn rank(distribution: &ProbabilityDistribution) -> Vec<(&str, f32)> {
    let mut ranked: Vec<(&str, f32)> = distribution
        .entries()
        .iter()
        .map(|(label, p)| (label.as_str(), *p))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
}
