mod archiver;
mod batch;
mod cli;
mod config;
mod dispatcher;
mod error;
mod executor;
mod object;
mod scanner;
mod state_machine;
mod store;
mod ui;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use archiver::CommandArchiver;
use batch::HttpBatchClient;
use cli::{Cli, Command, DispatchArgs};
use config::PipelineConfig;
use dispatcher::Dispatcher;
use executor::Executor;
use object::ObjectId;
use state_machine::{Layout, Pipeline, Stage};
use store::LocalStore;
use ui::{Printer, ScanProgress};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Logs to stderr; `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = PipelineConfig::load(cli.config.as_deref())?;
    debug!(
        store_root = %config.store_root.display(),
        namespace = %config.namespace_container,
        batch_endpoint = ?config.batch.endpoint,
        "loaded configuration"
    );

    let store = LocalStore::new(&config.store_root, config.list_page_size);
    let pipeline = Pipeline::new(store, Layout::new(&config.namespace_container));

    match cli.command {
        Command::Restore { object } => run_stage(&config, pipeline, Stage::Restore, &object).await,
        Command::Archive { object } => run_stage(&config, pipeline, Stage::Archive, &object).await,
        Command::Purge { object } => run_stage(&config, pipeline, Stage::Purge, &object).await,
        Command::DispatchRestore(args) => dispatch(&config, pipeline, Stage::Restore, &args).await,
        Command::DispatchArchive(args) => dispatch(&config, pipeline, Stage::Archive, &args).await,
        Command::DispatchPurge(args) => dispatch(&config, pipeline, Stage::Purge, &args).await,
        Command::Status => status(&pipeline).await,
    }
}

async fn run_stage(
    config: &PipelineConfig,
    pipeline: Pipeline<LocalStore>,
    stage: Stage,
    id: &ObjectId,
) -> Result<()> {
    let archiver = CommandArchiver::new(&config.archiver.program, config.archiver.args.clone());
    let executor = Executor::new(pipeline, archiver, &config.strip_prefix);
    let paths = executor.run(stage, id).await?;
    Printer::default().stage_completed(stage, &paths);
    Ok(())
}

async fn dispatch(
    config: &PipelineConfig,
    pipeline: Pipeline<LocalStore>,
    stage: Stage,
    args: &DispatchArgs,
) -> Result<()> {
    let endpoint = config
        .batch
        .endpoint
        .clone()
        .context("no batch endpoint configured, set [batch] endpoint or MOTHBALL_BATCH_ENDPOINT")?;
    let client = HttpBatchClient::new(
        endpoint,
        config.batch.token.clone(),
        config.batch.retry.clone(),
    )?;
    let dispatcher = Dispatcher::new(pipeline, client, &config.job_program);
    let report = dispatcher
        .dispatch(stage, &args.queue, &args.job_definition, args.limit)
        .await?;
    Printer::default().dispatch_report(&report);
    Ok(())
}

async fn status(pipeline: &Pipeline<LocalStore>) -> Result<()> {
    let progress = ScanProgress::start("scanning markers");
    let mut summaries = Vec::with_capacity(Stage::ALL.len());
    for stage in Stage::ALL {
        progress.scanning(stage);
        match scanner::summarize_stage(pipeline, stage).await {
            Ok(summary) => summaries.push(summary),
            Err(err) => {
                progress.finish();
                return Err(err).with_context(|| format!("scanning {stage} markers"));
            }
        }
    }
    progress.finish();
    Printer::default().status(&summaries);
    Ok(())
}
