use anyhow::{Context, Result};
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_types::region::Region;
use clap::Parser;
use rds_inventory::app::rds_discovery::aws_services::{
    session_name, CloudWatchMetrics, DynamoDbPersistence, RdsSourceFactory, SnsNotifier,
    StsCredentialProvider, StsIdentityResolver,
};
use rds_inventory::app::rds_discovery::config::split_list;
use rds_inventory::app::rds_discovery::sinks::{
    JsonLinesPersistence, LogMetrics, LogNotifier, NoopPersistence,
};
use rds_inventory::app::rds_discovery::{
    CredentialProvider, ExecutionStatus, MetricsConfig, MetricsSink, NotificationConfig,
    NotificationSink, PersistenceConfig, PersistenceSink, RunConfig, RunCoordinator,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;

const DEFAULT_LOG_FILTER: &str =
    "rds_inventory=info,aws_config=warn,aws_smithy_runtime=warn,aws_smithy_runtime_api=warn,aws_sigv4=warn,hyper=warn";

const FALLBACK_REGION: &str = "us-east-1";

/// Discover RDS instances across AWS accounts and regions
#[derive(Debug, Parser)]
#[command(
    name = "rds-inventory",
    version,
    long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("RDS_INVENTORY_COMMIT"), ")")
)]
struct Cli {
    /// Config file (TOML, YAML or JSON); defaults to the platform config dir
    #[arg(long, env = "RDS_INVENTORY_CONFIG")]
    config: Option<PathBuf>,

    /// Comma-separated 12-digit account ids
    #[arg(long)]
    accounts: Option<String>,

    /// Comma-separated region names
    #[arg(long)]
    regions: Option<String>,

    /// Role assumed in every target account
    #[arg(long)]
    role: Option<String>,

    #[arg(long)]
    external_id: Option<String>,

    /// Region scans in flight per account
    #[arg(long)]
    concurrency: Option<usize>,

    /// Per-region timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Write the run envelope here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.trim().is_empty() => {
            tracing_subscriber::EnvFilter::builder().parse(directives)
        }
        _ => tracing_subscriber::EnvFilter::builder().parse(DEFAULT_LOG_FILTER),
    }
    .context("Failed to parse log filter")?;

    let (writer, ansi) = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {:?}", parent))?;
            }
            let file = std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {:?}", path))?;

            // Owner read/write only
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(metadata) = file.metadata() {
                    let mut perms = metadata.permissions();
                    perms.set_mode(0o600);
                    if let Err(e) = std::fs::set_permissions(path, perms) {
                        eprintln!("[SECURITY] Failed to set log file permissions: {}", e);
                    }
                }
            }

            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(
        tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi),
    );
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    // Bridge log crate events from dependencies; must come after the subscriber
    tracing_log::LogTracer::init().context("Failed to initialize log-to-tracing bridge")?;

    Ok(())
}

/// File config, then environment, then flags; validated at the end
fn resolve_config(cli: &Cli) -> Result<RunConfig> {
    let path = cli
        .config
        .clone()
        .or_else(|| RunConfig::default_path().filter(|p| p.exists()));

    let mut config = match &path {
        Some(path) => RunConfig::load_from_path(path)?,
        None => RunConfig::default(),
    };
    config.apply_env_overrides()?;

    if let Some(accounts) = &cli.accounts {
        config.target_accounts = split_list(accounts);
    }
    if let Some(regions) = &cli.regions {
        config.target_regions = split_list(regions);
    }
    if let Some(role) = &cli.role {
        config.role_name = role.clone();
    }
    if let Some(external_id) = &cli.external_id {
        config.external_id = Some(external_id.clone());
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency_limit = concurrency;
    }
    if let Some(timeout) = cli.timeout {
        config.per_region_timeout_seconds = timeout;
    }

    config.validate()?;
    Ok(config)
}

fn build_coordinator(config: &RunConfig, sdk_config: &aws_config::SdkConfig) -> Result<RunCoordinator> {
    let persistence: Arc<dyn PersistenceSink> = match &config.sinks.persistence {
        PersistenceConfig::None => Arc::new(NoopPersistence),
        PersistenceConfig::Jsonl { path } => Arc::new(JsonLinesPersistence::open(path)?),
        PersistenceConfig::Dynamodb { table } => {
            Arc::new(DynamoDbPersistence::new(sdk_config, table.clone()))
        }
    };
    let metrics: Arc<dyn MetricsSink> = match &config.sinks.metrics {
        MetricsConfig::Log => Arc::new(LogMetrics),
        MetricsConfig::Cloudwatch { namespace } => {
            Arc::new(CloudWatchMetrics::new(sdk_config, namespace.clone()))
        }
    };
    let notifier: Arc<dyn NotificationSink> = match &config.sinks.notification {
        NotificationConfig::Log => Arc::new(LogNotifier),
        NotificationConfig::Sns { topic_arn } => {
            Arc::new(SnsNotifier::new(sdk_config, topic_arn.clone()))
        }
    };

    let base = sdk_config.clone();
    Ok(RunCoordinator::new(
        Arc::new(StsIdentityResolver::new(sdk_config)),
        move |run_id: &str| -> Arc<dyn CredentialProvider> {
            Arc::new(StsCredentialProvider::new(&base, session_name(run_id)))
        },
        Arc::new(RdsSourceFactory::new(sdk_config.clone())),
    )
    .with_persistence(persistence)
    .with_metrics(metrics)
    .with_notifier(notifier))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_file.as_deref()) {
        eprintln!("Failed to initialize logging: {:#}", e);
        return ExitCode::from(1);
    }

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {:#}", e);
            eprintln!("Invalid configuration: {:#}", e);
            return ExitCode::from(1);
        }
    };

    let region = RegionProviderChain::default_provider().or_else(Region::new(FALLBACK_REGION));
    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(region)
        .load()
        .await;

    let coordinator = match build_coordinator(&config, &sdk_config) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            tracing::error!("Failed to set up sinks: {:#}", e);
            eprintln!("Failed to set up sinks: {:#}", e);
            return ExitCode::from(1);
        }
    };

    let run = coordinator.run(&config).await;

    if let Err(e) = write_envelope(&run, cli.output.as_deref()) {
        tracing::error!("Failed to write run envelope: {:#}", e);
        eprintln!("Failed to write run envelope: {:#}", e);
        return ExitCode::from(1);
    }

    if run.execution_status == ExecutionStatus::Failed {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    }
}

fn write_envelope(
    run: &rds_inventory::app::rds_discovery::DiscoveryRun,
    output: Option<&Path>,
) -> Result<()> {
    let json = serde_json::to_string_pretty(run).context("Failed to serialize run")?;
    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?
        }
        None => println!("{}", json),
    }
    Ok(())
}
