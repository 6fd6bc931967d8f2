//! The harvest -> dedupe -> validate -> collect pipeline.
//!
//! Both stages run at the same time on their own worker pools. Shutdown is
//! ordered: the harvest pool finishes (closing the intake), the validation
//! pool drains, then the verdict stream closes and the collector hands back
//! the frozen result set.
use std::sync::Arc;
use std::time::{Duration, Instant};

use engine_logging::{engine_error, engine_info, engine_warn};
use relay_core::{Candidate, Deduplicator, QuorumPolicy, ResultSet, SourceDescriptor};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::collect::Collector;
use crate::config::{ConfigError, RunConfig};
use crate::fetch::{ReqwestFetcher, SourceFetcher};
use crate::harvest::{HarvestReport, HarvestStatus, Harvester, Intake};
use crate::pool::{PoolSettings, WorkerPool};
use crate::probe::{ProbeClient, ReqwestProbeClient};
use crate::validate::Validator;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no candidates harvested from {} source(s)", .harvest.len())]
    AllSourcesFailed { harvest: Vec<HarvestReport> },
    #[error("run cancelled before any candidate was admitted")]
    Cancelled { harvest: Vec<HarvestReport> },
    #[error("expected {admitted} verdicts, collected {collected}")]
    IncompleteResults { admitted: usize, collected: usize },
    #[error("collector task failed: {0}")]
    Collector(String),
}

#[derive(Debug)]
pub struct RunReport {
    pub results: ResultSet,
    /// One report per configured source, in configuration order.
    pub harvest: Vec<HarvestReport>,
    pub admitted: usize,
    pub elapsed: Duration,
}

pub struct Pipeline {
    config: RunConfig,
    policy: QuorumPolicy,
    fetcher: Arc<dyn SourceFetcher>,
    probe_client: Arc<dyn ProbeClient>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Validates `config` up front; nothing touches the network until
    /// [`Pipeline::run`].
    pub fn new(
        config: RunConfig,
        fetcher: Arc<dyn SourceFetcher>,
        probe_client: Arc<dyn ProbeClient>,
    ) -> Result<Self, ConfigError> {
        let policy = config.validate()?;
        Ok(Self {
            config,
            policy,
            fetcher,
            probe_client,
            cancel: CancellationToken::new(),
        })
    }

    /// Pipeline backed by the reqwest source fetcher and probe client.
    pub fn with_network(config: RunConfig) -> Result<Self, ConfigError> {
        let fetcher = Arc::new(ReqwestFetcher::new(config.fetch_settings()));
        let probe_client = Arc::new(ReqwestProbeClient::new(config.probe_settings()));
        Self::new(config, fetcher, probe_client)
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Cancelling this token stops harvesting and fails in-flight probes.
    /// Every admitted candidate still receives exactly one verdict.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        let sources = &self.config.sources;
        let validation = &self.config.validation;
        engine_info!(
            "Run starting: sources={} workers={} targets={} quorum={}/{}",
            sources.len(),
            validation.workers,
            validation.targets.len(),
            self.policy.threshold(),
            self.policy.targets()
        );

        let validator = Arc::new(
            Validator::new(
                self.probe_client.clone(),
                validation.targets.clone(),
                self.policy,
                self.config.validation_settings(),
                self.cancel.clone(),
            )
            .map_err(ConfigError::from)?
            .with_probe_limit(validation.workers),
        );

        let (verdict_tx, collector) = Collector::channel();
        let collector = collector.spawn();

        let validate_pool = WorkerPool::spawn(
            "validate",
            self.config.validation_pool(),
            move |candidate: Candidate| {
                let validator = validator.clone();
                let verdict_tx = verdict_tx.clone();
                async move {
                    let address = candidate.address.clone();
                    match validator.validate(candidate).await {
                        Ok(verdict) => {
                            let _ = verdict_tx.send(verdict);
                        }
                        Err(err) => engine_error!("No verdict for {address}: {err}"),
                    }
                }
            },
        );

        let dedup = Arc::new(Deduplicator::new());
        let harvest = self
            .harvest_stage(sources, Intake::new(dedup.clone(), validate_pool.sender()))
            .await;
        let admitted = dedup.admitted();
        engine_info!("Harvest finished: {admitted} unique candidate(s) admitted");

        // The intake handed to the harvest stage is gone, so the validation
        // queue is closed and this resolves once it has drained.
        let validated = validate_pool.finish().await;
        let results = collector
            .await
            .map_err(|err| PipelineError::Collector(err.to_string()))?;

        if admitted == 0 && self.cancel.is_cancelled() {
            engine_warn!("Run cancelled before any candidate was admitted");
            return Err(PipelineError::Cancelled { harvest });
        }
        if admitted == 0 {
            engine_error!("No candidates harvested from any source");
            return Err(PipelineError::AllSourcesFailed { harvest });
        }
        if results.len() != admitted {
            engine_error!(
                "Verdict count mismatch: admitted={} collected={} panicked_workers={}",
                admitted,
                results.len(),
                validated.panicked_workers
            );
            return Err(PipelineError::IncompleteResults {
                admitted,
                collected: results.len(),
            });
        }

        let live = results.live().count();
        let harvested = harvest
            .iter()
            .filter(|r| r.status == HarvestStatus::Harvested)
            .count();
        let elapsed = started.elapsed();
        engine_info!(
            "Run finished in {:.1?}: sources {}/{} harvested, {} admitted, {} live, {} dead",
            elapsed,
            harvested,
            harvest.len(),
            admitted,
            live,
            results.len() - live
        );

        Ok(RunReport {
            results,
            harvest,
            admitted,
            elapsed,
        })
    }

    /// Runs one harvester per source and returns once every one of them has
    /// finished. `intake` is dropped before returning.
    async fn harvest_stage(
        &self,
        sources: &[SourceDescriptor],
        intake: Intake,
    ) -> Vec<HarvestReport> {
        let harvester = Arc::new(Harvester::new(
            self.fetcher.clone(),
            self.config.harvest_settings(),
            self.cancel.clone(),
        ));
        let (report_tx, mut report_rx) = mpsc::unbounded_channel();

        let pool = WorkerPool::spawn(
            "harvest",
            PoolSettings::new(sources.len(), sources.len()),
            move |source: SourceDescriptor| {
                let harvester = harvester.clone();
                let intake = intake.clone();
                let report_tx = report_tx.clone();
                async move {
                    let report = harvester.harvest(&source, &intake).await;
                    let _ = report_tx.send(report);
                }
            },
        );

        for source in sources {
            if pool.submit(source.clone()).await.is_err() {
                engine_warn!("Harvest pool closed before {} was queued", source.id);
                break;
            }
        }
        pool.finish().await;

        let mut reports = Vec::with_capacity(sources.len());
        while let Some(report) = report_rx.recv().await {
            reports.push(report);
        }
        reports.sort_by_key(|report| sources.iter().position(|s| s.id == report.source_id));

        let abandoned = reports
            .iter()
            .filter(|r| matches!(r.status, HarvestStatus::Abandoned(_)))
            .count();
        if abandoned > 0 {
            engine_warn!("{abandoned} of {} source(s) abandoned", sources.len());
        }
        reports
    }
}
