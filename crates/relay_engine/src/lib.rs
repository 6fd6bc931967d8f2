//! Relay engine: source harvesting, probe validation and result persistence.
mod collect;
mod config;
mod decode;
mod fetch;
mod harvest;
mod parse;
mod persist;
mod pipeline;
mod pool;
mod probe;
mod report;
mod retry;
mod types;
mod validate;

pub use collect::Collector;
pub use config::{
    ConfigError, FetchConfig, OutputConfig, RetryConfig, RunConfig, ValidationConfig,
};
pub use decode::{decode_text, DecodedText};
pub use fetch::{FetchSettings, ReqwestFetcher, SourceFetcher};
pub use harvest::{HarvestReport, HarvestSettings, HarvestStatus, Harvester, Intake, Offer};
pub use parse::{parser_for, HtmlTableParser, LineParser, PatternParser, TokenParser};
pub use persist::{
    ensure_output_dir, AtomicFileWriter, FileSink, PersistError, PersistFailed, PersistSummary,
    Persister, ResultSink, SinkFailure,
};
pub use pipeline::{Pipeline, PipelineError, RunReport};
pub use pool::{PoolClosed, PoolReport, PoolSender, PoolSettings, WorkerPool};
pub use probe::{ProbeClient, ProbeError, ProbeResponse, ProbeSettings, ReqwestProbeClient};
pub use report::{build_report, write_report};
pub use retry::RetryPolicy;
pub use types::{FailureKind, FetchError, FetchOutput};
pub use validate::{classify_probe, ProbeSchedule, ValidationSettings, Validator};

pub use tokio_util::sync::CancellationToken;
