mod cli;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use engine_logging::{engine_error, engine_info, engine_warn};
use relay_engine::{Persister, Pipeline, PipelineError, RunConfig};

const EXIT_RUN_FAILED: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_PERSIST: u8 = 3;

fn main() -> ExitCode {
    let args = cli::Args::parse();
    engine_logging::initialize(args.log_destination(), args.log_level());

    let pipeline = match load_config(&args).and_then(|config| {
        Pipeline::with_network(config).context("invalid configuration")
    }) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            engine_error!("{err:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            engine_error!("Failed to start async runtime: {err}");
            return ExitCode::from(EXIT_RUN_FAILED);
        }
    };
    runtime.block_on(run(pipeline))
}

fn load_config(args: &cli::Args) -> anyhow::Result<RunConfig> {
    let mut config = RunConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    args.apply(&mut config);
    Ok(config)
}

async fn run(pipeline: Pipeline) -> ExitCode {
    let cancel = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            engine_warn!("Interrupted; failing in-flight probes and stopping harvest");
            cancel.cancel();
        }
    });

    let run = match pipeline.run().await {
        Ok(run) => run,
        Err(PipelineError::Config(err)) => {
            engine_error!("Invalid configuration: {err}");
            return ExitCode::from(EXIT_CONFIG);
        }
        Err(err @ PipelineError::Cancelled { .. }) => {
            engine_warn!("Interrupted: {err}; nothing to save");
            return ExitCode::from(EXIT_RUN_FAILED);
        }
        Err(err) => {
            engine_error!("Run failed: {err}");
            return ExitCode::from(EXIT_RUN_FAILED);
        }
    };

    match Persister::from_config(&pipeline.config().output).persist(&run.results, &run.harvest) {
        Ok(summary) => {
            engine_info!(
                "Saved {} live relay(s){}",
                summary.live,
                summary
                    .dead
                    .map(|dead| format!(" and {dead} dead"))
                    .unwrap_or_default()
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            engine_error!("{err}");
            ExitCode::from(EXIT_PERSIST)
        }
    }
}
