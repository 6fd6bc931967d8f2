use std::path::PathBuf;

use clap::Parser;
use engine_logging::LogDestination;
use log::LevelFilter;
use relay_core::QuorumRule;
use relay_engine::RunConfig;

#[derive(Parser, Debug)]
#[command(name = "relay-harvester")]
#[command(version)]
#[command(about = "Harvests public HTTP relay lists and keeps the relays that answer", long_about = None)]
pub struct Args {
    /// RON run configuration.
    #[arg(short, long, default_value = "config/relay.ron")]
    pub config: PathBuf,

    /// Concurrent validation workers.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// `any`, `majority`, `all`, or the number of targets that must answer.
    #[arg(long, value_parser = parse_quorum)]
    pub quorum: Option<QuorumRule>,

    #[arg(long)]
    pub probe_timeout_ms: Option<u64>,

    #[arg(long)]
    pub live_output: Option<PathBuf>,

    #[arg(long)]
    pub dead_output: Option<PathBuf>,

    /// Write a JSON run report here.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Also log to this file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Command-line values win over the configuration file.
    pub fn apply(&self, config: &mut RunConfig) {
        if let Some(workers) = self.workers {
            config.validation.workers = workers;
        }
        if let Some(quorum) = self.quorum {
            config.validation.quorum = quorum;
        }
        if let Some(timeout) = self.probe_timeout_ms {
            config.validation.probe_timeout_ms = timeout;
        }
        if let Some(path) = &self.live_output {
            config.output.live_path = path.clone();
        }
        if let Some(path) = &self.dead_output {
            config.output.dead_path = Some(path.clone());
        }
        if let Some(path) = &self.report {
            config.output.report_path = Some(path.clone());
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        if self.verbose {
            LevelFilter::Debug
        } else if self.quiet {
            LevelFilter::Warn
        } else {
            LevelFilter::Info
        }
    }

    pub fn log_destination(&self) -> LogDestination {
        match &self.log_file {
            Some(path) => LogDestination::Both(path.clone()),
            None => LogDestination::Terminal,
        }
    }
}

fn parse_quorum(value: &str) -> Result<QuorumRule, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "any" => Ok(QuorumRule::Any),
        "majority" => Ok(QuorumRule::Majority),
        "all" => Ok(QuorumRule::All),
        other => other
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .map(QuorumRule::AtLeast)
            .ok_or_else(|| format!("expected any, majority, all or a positive count, got {value:?}")),
    }
}
