//! Run configuration, loaded from a RON file and validated before any network
//! activity.
//!
//! Every section falls back to its defaults, so a file only needs the
//! `sources` list. Durations are plain millisecond counts.
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use relay_core::{ProbeTarget, QuorumError, QuorumPolicy, QuorumRule, SourceDescriptor};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fetch::FetchSettings;
use crate::harvest::HarvestSettings;
use crate::pool::PoolSettings;
use crate::probe::ProbeSettings;
use crate::retry::RetryPolicy;
use crate::validate::{ProbeSchedule, ValidationSettings};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("no sources configured")]
    NoSources,
    #[error("duplicate source id {0:?}")]
    DuplicateSource(String),
    #[error("duplicate probe target id {0:?}")]
    DuplicateTarget(String),
    #[error("{kind} {id:?} has an invalid uri: {reason}")]
    InvalidUri {
        kind: &'static str,
        id: String,
        reason: String,
    },
    #[error("worker count must be at least 1")]
    NoWorkers,
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),
    #[error(transparent)]
    Quorum(#[from] QuorumError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_bytes: u64,
    pub redirect_limit: usize,
    pub retry: RetryConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            max_bytes: 16 * 1024 * 1024,
            redirect_limit: 5,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub probe_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub require_body: bool,
    pub schedule: ProbeSchedule,
    pub quorum: QuorumRule,
    pub targets: Vec<ProbeTarget>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            workers: 150,
            queue_capacity: 1_500,
            probe_timeout_ms: 8_000,
            connect_timeout_ms: 5_000,
            require_body: true,
            schedule: ProbeSchedule::default(),
            quorum: QuorumRule::Majority,
            targets: vec![
                ProbeTarget::new("httpbin", "http://httpbin.org/ip"),
                ProbeTarget::new("icanhazip", "http://icanhazip.com"),
                ProbeTarget::new("ipify", "http://api.ipify.org"),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub live_path: PathBuf,
    pub dead_path: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            live_path: PathBuf::from("live_proxies.txt"),
            dead_path: None,
            report_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub sources: Vec<SourceDescriptor>,
    pub fetch: FetchConfig,
    pub validation: ValidationConfig,
    pub output: OutputConfig,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ron_str(&text)
    }

    pub fn from_ron_str(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    /// Checks the whole configuration and resolves the quorum rule against
    /// the configured targets.
    pub fn validate(&self) -> Result<QuorumPolicy, ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::NoSources);
        }
        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.id.as_str()) {
                return Err(ConfigError::DuplicateSource(source.id.clone()));
            }
            check_uri("source", &source.id, &source.uri)?;
        }

        let mut seen = HashSet::new();
        for target in &self.validation.targets {
            if !seen.insert(target.id.as_str()) {
                return Err(ConfigError::DuplicateTarget(target.id.clone()));
            }
            check_uri("probe target", &target.id, &target.uri)?;
        }

        if self.validation.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.validation.queue_capacity == 0 {
            return Err(ConfigError::ZeroValue("validation.queue_capacity"));
        }
        if self.validation.probe_timeout_ms == 0 {
            return Err(ConfigError::ZeroValue("validation.probe_timeout_ms"));
        }
        if self.fetch.timeout_ms == 0 {
            return Err(ConfigError::ZeroValue("fetch.timeout_ms"));
        }
        if self.fetch.connect_timeout_ms == 0 {
            return Err(ConfigError::ZeroValue("fetch.connect_timeout_ms"));
        }
        if self.validation.connect_timeout_ms == 0 {
            return Err(ConfigError::ZeroValue("validation.connect_timeout_ms"));
        }
        if self.fetch.retry.max_attempts == 0 {
            return Err(ConfigError::ZeroValue("fetch.retry.max_attempts"));
        }

        Ok(self
            .validation
            .quorum
            .resolve(self.validation.targets.len())?)
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            connect_timeout: Duration::from_millis(self.fetch.connect_timeout_ms),
            redirect_limit: self.fetch.redirect_limit,
            max_bytes: self.fetch.max_bytes,
        }
    }

    pub fn harvest_settings(&self) -> HarvestSettings {
        let retry = &self.fetch.retry;
        HarvestSettings {
            fetch_timeout: Duration::from_millis(self.fetch.timeout_ms),
            retry: RetryPolicy {
                max_attempts: retry.max_attempts,
                backoff_base: Duration::from_millis(retry.backoff_base_ms),
                backoff_max: Duration::from_millis(retry.backoff_max_ms),
            },
        }
    }

    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            connect_timeout: Duration::from_millis(self.validation.connect_timeout_ms),
            ..ProbeSettings::default()
        }
    }

    pub fn validation_settings(&self) -> ValidationSettings {
        ValidationSettings {
            probe_timeout: Duration::from_millis(self.validation.probe_timeout_ms),
            require_body: self.validation.require_body,
            schedule: self.validation.schedule,
        }
    }

    pub fn validation_pool(&self) -> PoolSettings {
        PoolSettings::new(self.validation.workers, self.validation.queue_capacity)
    }
}

fn check_uri(kind: &'static str, id: &str, uri: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUri {
        kind,
        id: id.to_string(),
        reason,
    };
    let parsed = url::Url::parse(uri).map_err(|err| invalid(err.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(format!("unsupported scheme {other}"))),
    }
}
