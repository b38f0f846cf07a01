mod config;

use clap::{Args, Parser, Subcommand};
use config::{CommonConfig, Config, ConfigError};
use data_receiver::errors::DataReceiverError;
use data_receiver::registry::EntityRegistry;
use metrics_exporter_statsd::StatsdBuilder;
use shared::metrics_defs::describe_all;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const METRICS_PREFIX: &str = "receiver";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Parser)]
#[command(name = "receiver", about = "Receives record batches and upserts them by natural key")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the data receiver service
    DataReceiver(ConfigArgs),
    /// Load and validate a config file, then list the configured entities
    CheckConfig(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    /// Path to the YAML config file
    #[arg(long, short)]
    config: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not set up metrics: {0}")]
    Metrics(String),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    DataReceiver(#[from] DataReceiverError),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match &cli.command {
        CliCommand::DataReceiver(args) => run_data_receiver(&args.config),
        CliCommand::CheckConfig(args) => check_config(&args.config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Exiting");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_data_receiver(path: &Path) -> Result<(), CliError> {
    let config = Config::from_file(path)?;
    let _sentry = init_logging(&config.common);
    init_metrics(&config.common)?;
    let data_receiver_config = config.data_receiver()?.clone();

    tracing::info!(config = %path.display(), "Starting data receiver");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        tokio::select! {
            result = data_receiver::run(data_receiver_config) => result.map_err(CliError::from),
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                Ok(())
            }
        }
    })
}

fn check_config(path: &Path) -> Result<(), CliError> {
    let config = Config::from_file(path)?;
    let data_receiver_config = config.data_receiver()?;
    let registry = EntityRegistry::from_config(data_receiver_config).map_err(ConfigError::from)?;

    println!("{}: ok", path.display());
    for descriptor in registry.descriptors() {
        println!(
            "  entity {} key ({}), {} fields",
            descriptor.name(),
            descriptor.key_fields().join(", "),
            descriptor.fields().count()
        );
    }
    for (identifier, entity) in registry.routes() {
        println!("  table {identifier} -> {entity}");
    }

    Ok(())
}

/// Installs the tracing subscriber, with a Sentry layer when a DSN is configured.
///
/// The returned guard flushes pending Sentry events on drop.
fn init_logging(common: &CommonConfig) -> Option<sentry::ClientInitGuard> {
    let logging = common.logging.as_ref();

    let level = logging
        .and_then(|logging| logging.level.as_deref())
        .unwrap_or(DEFAULT_LOG_LEVEL);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let sentry_guard = logging
        .and_then(|logging| logging.sentry_dsn.as_deref())
        .map(|dsn| {
            sentry::init((
                dsn,
                sentry::ClientOptions {
                    release: sentry::release_name!(),
                    ..Default::default()
                },
            ))
        });
    let sentry_layer = sentry_guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_layer)
        .init();

    sentry_guard
}

fn init_metrics(common: &CommonConfig) -> Result<(), CliError> {
    let Some(metrics_config) = &common.metrics else {
        return Ok(());
    };

    let recorder = StatsdBuilder::from(
        metrics_config.statsd_host.clone(),
        metrics_config.statsd_port,
    )
    .build(Some(METRICS_PREFIX))
    .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    describe_all(data_receiver::metrics_defs::ALL_METRICS);
    describe_all(row_store::metrics_defs::ALL_METRICS);

    tracing::info!(
        host = %metrics_config.statsd_host,
        port = metrics_config.statsd_port,
        "Sending metrics to statsd"
    );
    Ok(())
}
