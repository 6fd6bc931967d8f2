use std::sync::Arc;
use std::time::{Duration, Instant};

use engine_logging::engine_debug;
use futures_util::future::join_all;
use relay_core::{
    Candidate, ProbeFailure, ProbeOutcome, ProbeTarget, QuorumError, QuorumPolicy, Verdict,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::probe::{ProbeClient, ProbeError, ProbeResponse};

/// Order in which the targets of one candidate are probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeSchedule {
    /// One target after another, pausing `delay_ms` between probes.
    Sequential { delay_ms: u64 },
    /// All targets at once.
    Concurrent,
}

impl Default for ProbeSchedule {
    fn default() -> Self {
        ProbeSchedule::Sequential { delay_ms: 100 }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationSettings {
    pub probe_timeout: Duration,
    pub require_body: bool,
    pub schedule: ProbeSchedule,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(8),
            require_body: true,
            schedule: ProbeSchedule::default(),
        }
    }
}

pub struct Validator {
    client: Arc<dyn ProbeClient>,
    targets: Arc<[ProbeTarget]>,
    policy: QuorumPolicy,
    settings: ValidationSettings,
    cancel: CancellationToken,
    probe_slots: Option<Semaphore>,
}

impl Validator {
    /// Fails when `policy` was resolved for a different number of targets.
    pub fn new(
        client: Arc<dyn ProbeClient>,
        targets: Vec<ProbeTarget>,
        policy: QuorumPolicy,
        settings: ValidationSettings,
        cancel: CancellationToken,
    ) -> Result<Self, QuorumError> {
        if policy.targets() != targets.len() {
            return Err(QuorumError::OutcomeCount {
                expected: policy.targets(),
                actual: targets.len(),
            });
        }
        Ok(Self {
            client,
            targets: targets.into(),
            policy,
            settings,
            cancel,
            probe_slots: None,
        })
    }

    /// Caps the probes in flight across every caller of this validator,
    /// whatever the schedule. Without a limit, concurrent schedules can run
    /// one probe per target for each candidate being validated.
    pub fn with_probe_limit(mut self, limit: usize) -> Self {
        self.probe_slots = Some(Semaphore::new(limit.max(1)));
        self
    }

    /// Probes every target through `candidate` and returns its single
    /// verdict. One probe failing never stops the others.
    pub async fn validate(&self, candidate: Candidate) -> Result<Verdict, QuorumError> {
        let outcomes = match self.settings.schedule {
            ProbeSchedule::Concurrent => {
                join_all(self.targets.iter().map(|target| self.probe_one(&candidate, target)))
                    .await
            }
            ProbeSchedule::Sequential { delay_ms } => {
                let mut outcomes = Vec::with_capacity(self.targets.len());
                for (idx, target) in self.targets.iter().enumerate() {
                    if idx > 0 && delay_ms > 0 && !self.cancel.is_cancelled() {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                    outcomes.push(self.probe_one(&candidate, target).await);
                }
                outcomes
            }
        };

        let verdict = Verdict::decide(candidate, outcomes, &self.policy)?;
        engine_debug!(
            "{} {} ({}/{} targets)",
            verdict.address(),
            verdict.classification(),
            verdict.successes(),
            self.policy.targets()
        );
        Ok(verdict)
    }

    async fn probe_one(&self, candidate: &Candidate, target: &ProbeTarget) -> ProbeOutcome {
        let waited = Instant::now();
        let _slot = match &self.probe_slots {
            Some(slots) => tokio::select! {
                _ = self.cancel.cancelled() => None,
                slot = slots.acquire() => slot.ok(),
            },
            None => None,
        };
        if self.cancel.is_cancelled() {
            return classify_probe(
                &target.id,
                Err(ProbeError::Cancelled),
                waited.elapsed(),
                self.settings.require_body,
            );
        }

        let started = Instant::now();
        let timeout = self.settings.probe_timeout;
        let result = tokio::select! {
            _ = self.cancel.cancelled() => Err(ProbeError::Cancelled),
            result = tokio::time::timeout(
                timeout,
                self.client.probe(&candidate.address, target, timeout),
            ) => result.unwrap_or(Err(ProbeError::Timeout)),
        };
        classify_probe(&target.id, result, started.elapsed(), self.settings.require_body)
    }
}

/// Maps a raw probe result to an outcome: success needs a status below 400
/// and, when `require_body` is set, a non-blank body.
pub fn classify_probe(
    target_id: &str,
    result: Result<ProbeResponse, ProbeError>,
    latency: Duration,
    require_body: bool,
) -> ProbeOutcome {
    match result {
        Ok(response) if response.status >= 400 => {
            ProbeOutcome::failure(target_id, latency, ProbeFailure::HttpStatus(response.status))
        }
        Ok(response) if require_body && !response.body_non_empty => {
            ProbeOutcome::failure(target_id, latency, ProbeFailure::EmptyBody)
        }
        Ok(_) => ProbeOutcome::success(target_id, latency),
        Err(err) => ProbeOutcome::failure(target_id, latency, err.into()),
    }
}
