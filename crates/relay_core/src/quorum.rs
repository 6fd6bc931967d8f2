use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Classification, ProbeOutcome};

/// How many probe targets must succeed for a candidate to be live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QuorumRule {
    /// A single successful target is enough.
    Any,
    /// More than half of the targets.
    #[default]
    Majority,
    /// Every target.
    All,
    /// At least `n` targets.
    AtLeast(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuorumError {
    #[error("at least one probe target is required")]
    NoTargets,
    #[error("quorum threshold {threshold} is outside 1..={targets}")]
    ThresholdOutOfRange { threshold: usize, targets: usize },
    #[error("expected {expected} probe outcomes, got {actual}")]
    OutcomeCount { expected: usize, actual: usize },
}

/// A quorum rule resolved against a concrete target count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumPolicy {
    threshold: usize,
    targets: usize,
}

impl QuorumRule {
    pub fn resolve(self, targets: usize) -> Result<QuorumPolicy, QuorumError> {
        if targets == 0 {
            return Err(QuorumError::NoTargets);
        }
        let threshold = match self {
            QuorumRule::Any => 1,
            QuorumRule::Majority => targets / 2 + 1,
            QuorumRule::All => targets,
            QuorumRule::AtLeast(n) => n,
        };
        QuorumPolicy::new(threshold, targets)
    }
}

impl QuorumPolicy {
    pub fn new(threshold: usize, targets: usize) -> Result<Self, QuorumError> {
        if targets == 0 {
            return Err(QuorumError::NoTargets);
        }
        if threshold == 0 || threshold > targets {
            return Err(QuorumError::ThresholdOutOfRange { threshold, targets });
        }
        Ok(Self { threshold, targets })
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn targets(&self) -> usize {
        self.targets
    }
}

/// Pure decision rule: live iff at least `threshold` of exactly `targets`
/// outcomes succeeded.
pub fn decide(
    policy: &QuorumPolicy,
    outcomes: &[ProbeOutcome],
) -> Result<Classification, QuorumError> {
    if outcomes.len() != policy.targets {
        return Err(QuorumError::OutcomeCount {
            expected: policy.targets,
            actual: outcomes.len(),
        });
    }
    let successes = outcomes.iter().filter(|o| o.success).count();
    if successes >= policy.threshold {
        Ok(Classification::Live)
    } else {
        Ok(Classification::Dead)
    }
}
