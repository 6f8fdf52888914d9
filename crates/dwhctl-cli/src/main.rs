use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dwhctl_aws::create_aws_backend;
use dwhctl_config::{ConfigFile, DEFAULT_CONFIG_FILE};
use dwhctl_core::*;
use dwhctl_emulator::EmulatorBackend;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

mod logging;
mod spinner;

use spinner::Spinner;

#[derive(Parser)]
#[command(name = "dwhctl")]
#[command(about = "Provision and decommission a Redshift data warehouse cluster")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Cluster configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Run against the local emulator, keeping its state in this file
    #[arg(long, value_name = "STATE_FILE")]
    emulator: Option<String>,

    /// Custom AWS endpoint (for LocalStack testing)
    #[arg(long)]
    endpoint_url: Option<String>,

    /// Delay between cluster status checks
    #[arg(long, default_value_t = 400)]
    poll_interval_ms: u64,

    /// Give up waiting on the cluster after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the IAM role and cluster, then record the endpoint and role ARN
    Create,
    /// Delete the cluster and its IAM role
    Delete,
    /// Show the current cluster status
    Status,
}

impl Cli {
    fn workflow_options(&self) -> WorkflowOptions {
        let mut poll = PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            ..Default::default()
        };
        if let Some(secs) = self.timeout_secs {
            poll = poll.with_timeout(Duration::from_secs(secs));
        }
        WorkflowOptions {
            poll,
            cancel: CancellationToken::new(),
        }
    }

    fn backend_config(&self, config: &ClusterConfig) -> BackendConfig {
        match &self.emulator {
            Some(state_file) => BackendConfig::Emulator {
                state_file: Some(state_file.clone()),
                region: config.credentials.region.clone(),
            },
            None => BackendConfig::aws(&config.credentials, self.endpoint_url.clone()),
        }
    }
}

/// Factory for creating backend instances
struct BackendFactory;

impl BackendFactory {
    async fn create(config: BackendConfig) -> Result<Box<dyn ControlPlane>> {
        match config {
            BackendConfig::Emulator { state_file, region } => {
                let emulator = EmulatorBackend::new(state_file, &region).await?;
                Ok(Box::new(emulator))
            }
            BackendConfig::Aws {
                region,
                key,
                secret,
                endpoint,
            } => {
                let aws = create_aws_backend(region, key, secret, endpoint).await?;
                Ok(Box::new(aws))
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = logging::init_logging() {
        eprintln!("failed to initialise logging: {err}");
        return ExitCode::FAILURE;
    }

    let cli = Cli::parse();
    if let Err(err) = try_main(cli).await {
        error!(error = %format!("{err:#}"), "command execution failed");
        eprintln!("❌ {err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main(cli: Cli) -> Result<()> {
    let mut file = ConfigFile::load(&cli.config)
        .await
        .context("failed to load cluster config")?;
    let config = file.cluster_config().context("invalid cluster config")?;

    let mut backend = BackendFactory::create(cli.backend_config(&config))
        .await
        .context("failed to set up backend")?;

    let options = cli.workflow_options();
    let interrupt = cancel_on_interrupt(options.cancel.clone());
    let spinner = Spinner::new();

    let result = match cli.command {
        Commands::Create => create(backend.as_mut(), &mut file, &config, &options, &spinner).await,
        Commands::Delete => delete(backend.as_mut(), &config, &options, &spinner).await,
        Commands::Status => match show_status(backend.as_ref(), &config).await {
            Ok(()) => show_emulator_summary(cli.emulator.as_deref(), &config).await,
            Err(e) => Err(e),
        },
    };

    interrupt.abort();
    result
}

/// Cancel in-progress waits on Ctrl-C
fn cancel_on_interrupt(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            cancel.cancel();
        }
    })
}

async fn create(
    backend: &mut dyn ControlPlane,
    file: &mut ConfigFile,
    config: &ClusterConfig,
    options: &WorkflowOptions,
    spinner: &Spinner,
) -> Result<()> {
    let outcome = provision(backend, config, options, spinner)
        .await
        .context("provisioning failed")?;

    for warning in &outcome.warnings {
        println!("⚠️  {:?} skipped: {}", warning.step, warning.error);
    }

    file.apply_patch(&outcome.patch);
    file.save().await.context("failed to record cluster endpoint")?;

    if outcome.is_available() {
        println!("✅ Cluster {} is available", config.cluster.identifier);
    } else {
        println!(
            "⚠️  Cluster {} ended in status '{}'",
            config.cluster.identifier, outcome.final_status
        );
    }
    println!("🔗 DWH_ENDPOINT :: {}", outcome.patch.endpoint);
    println!("🔑 DWH_ROLE_ARN :: {}", outcome.patch.role_arn);
    println!("💾 Saved to {}", file.path().display());
    Ok(())
}

async fn delete(
    backend: &mut dyn ControlPlane,
    config: &ClusterConfig,
    options: &WorkflowOptions,
    spinner: &Spinner,
) -> Result<()> {
    let outcome = decommission(backend, config, options, spinner)
        .await
        .context("decommissioning failed")?;

    println!(
        "🗑️  Cluster {} and role {} removed ({} status checks)",
        config.cluster.identifier, config.cluster.role_name, outcome.describe_calls
    );
    Ok(())
}

async fn show_status(backend: &dyn ControlPlane, config: &ClusterConfig) -> Result<()> {
    let identifier = &config.cluster.identifier;

    match backend.describe_cluster(identifier).await {
        Ok(cluster) => {
            println!("📊 Cluster {}: {}", cluster.identifier, cluster.status);
            if let Some(endpoint) = cluster.endpoint {
                match endpoint.port {
                    Some(port) => println!("🔗 Endpoint: {}:{}", endpoint.address, port),
                    None => println!("🔗 Endpoint: {}", endpoint.address),
                }
            }
            for arn in &cluster.iam_role_arns {
                println!("🔑 Role: {}", arn);
            }
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            println!("💤 Cluster {} does not exist", identifier);
            Ok(())
        }
        Err(e) => Err(e).context("failed to describe cluster"),
    }
}

async fn show_emulator_summary(state_file: Option<&str>, config: &ClusterConfig) -> Result<()> {
    let Some(state_file) = state_file else {
        return Ok(());
    };
    let emulator = EmulatorBackend::new(Some(state_file.to_string()), &config.credentials.region)
        .await
        .context("failed to read emulator state")?;
    println!("\n{}", emulator.summary());
    Ok(())
}
