use std::sync::Arc;
use std::time::Duration;

use engine_logging::{engine_debug, engine_info, engine_warn};
use relay_core::{CanonicalAddress, Candidate, Deduplicator, SourceDescriptor};
use tokio_util::sync::CancellationToken;

use crate::decode::decode_text;
use crate::fetch::SourceFetcher;
use crate::parse::parser_for;
use crate::pool::PoolSender;
use crate::retry::RetryPolicy;
use crate::{FailureKind, FetchError, FetchOutput};

#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub fetch_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarvestStatus {
    Harvested,
    Abandoned(FetchError),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestReport {
    pub source_id: String,
    pub attempts: u32,
    /// Backoff delays actually waited between attempts, in order.
    pub backoff: Vec<Duration>,
    pub tokens: usize,
    pub malformed: usize,
    pub admitted: usize,
    pub duplicates: usize,
    pub status: HarvestStatus,
}

impl HarvestReport {
    fn new(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            attempts: 0,
            backoff: Vec::new(),
            tokens: 0,
            malformed: 0,
            admitted: 0,
            duplicates: 0,
            status: HarvestStatus::Harvested,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Admitted,
    Duplicate,
    Closed,
}

/// Entry point shared by every harvester: the dedup gate in front of the
/// validation queue.
#[derive(Clone)]
pub struct Intake {
    dedup: Arc<Deduplicator>,
    queue: PoolSender<Candidate>,
}

impl Intake {
    pub fn new(dedup: Arc<Deduplicator>, queue: PoolSender<Candidate>) -> Self {
        Self { dedup, queue }
    }

    /// Forwards `candidate` downstream unless its address was already
    /// admitted. Waits while the validation queue is full.
    pub async fn offer(&self, candidate: Candidate) -> Offer {
        if !self.dedup.admit(&candidate.address) {
            return Offer::Duplicate;
        }
        match self.queue.submit(candidate).await {
            Ok(()) => Offer::Admitted,
            Err(_) => Offer::Closed,
        }
    }
}

pub struct Harvester {
    fetcher: Arc<dyn SourceFetcher>,
    settings: HarvestSettings,
    cancel: CancellationToken,
}

impl Harvester {
    pub fn new(
        fetcher: Arc<dyn SourceFetcher>,
        settings: HarvestSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            settings,
            cancel,
        }
    }

    /// Fetches, parses and offers every valid token of one source. Never
    /// fails: an unavailable source is reported as `Abandoned`.
    pub async fn harvest(&self, source: &SourceDescriptor, intake: &Intake) -> HarvestReport {
        let mut report = HarvestReport::new(&source.id);
        engine_debug!("Harvesting source {} from {}", source.id, source.uri);

        let output = match self.fetch_with_retry(source, &mut report).await {
            Ok(output) => output,
            Err(err) if err.kind == FailureKind::Cancelled => {
                report.status = HarvestStatus::Cancelled;
                return report;
            }
            Err(err) => {
                engine_warn!(
                    "Source {} abandoned after {} attempt(s): {}",
                    source.id,
                    report.attempts,
                    err
                );
                report.status = HarvestStatus::Abandoned(err);
                return report;
            }
        };

        engine_debug!(
            "Source {} fetched {} byte(s) from {}",
            source.id,
            output.bytes.len(),
            output.final_url
        );
        let decoded = decode_text(&output.bytes, output.content_type.as_deref());
        if decoded.had_errors {
            engine_debug!(
                "Source {} decoded as {} with replacement characters",
                source.id,
                decoded.encoding_label
            );
        }

        let tokens = parser_for(source.parser).parse(&decoded.text);
        report.tokens = tokens.len();

        for token in tokens {
            if self.cancel.is_cancelled() {
                report.status = HarvestStatus::Cancelled;
                break;
            }
            let Ok(address) = CanonicalAddress::parse(&token) else {
                report.malformed += 1;
                continue;
            };
            match intake.offer(Candidate::new(address, &source.id)).await {
                Offer::Admitted => report.admitted += 1,
                Offer::Duplicate => report.duplicates += 1,
                Offer::Closed => {
                    engine_warn!("Intake closed while harvesting {}", source.id);
                    break;
                }
            }
        }

        engine_info!(
            "Source {}: {} token(s), {} admitted, {} duplicate, {} malformed",
            source.id,
            report.tokens,
            report.admitted,
            report.duplicates,
            report.malformed
        );
        report
    }

    async fn fetch_with_retry(
        &self,
        source: &SourceDescriptor,
        report: &mut HarvestReport,
    ) -> Result<FetchOutput, FetchError> {
        let policy = self.settings.retry;
        loop {
            if self.cancel.is_cancelled() {
                return Err(FetchError::new(FailureKind::Cancelled, ""));
            }
            report.attempts += 1;
            let attempt = report.attempts;

            let result = tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(FetchError::new(FailureKind::Cancelled, ""));
                }
                result = self.fetcher.fetch(&source.uri, self.settings.fetch_timeout) => result,
            };

            let err = match result {
                Ok(output) => return Ok(output),
                Err(err) => err,
            };
            if !err.is_transient() || !policy.allows_retry_after(attempt) {
                return Err(err);
            }

            let delay = policy.delay_after(attempt);
            engine_warn!(
                "Source {} attempt {} failed ({}), retrying in {:?}",
                source.id,
                attempt,
                err,
                delay
            );
            report.backoff.push(delay);
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(FetchError::new(FailureKind::Cancelled, ""));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
