//! K8s Agent Adapter CLI
//!
//! A command-line tool for bringing an agent's workload up and down,
//! scaling it and inspecting its instances.

mod commands;
mod config;
mod output;

use adapter_lib::{
    orchestrator::with_rate_limit, InMemoryCluster, KubeOrchestrator, OrchestrationApi,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::{lifecycle, status, Session};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// K8s Agent Adapter CLI
#[derive(Parser)]
#[command(name = "kaa")]
#[command(author, version, about = "CLI for the K8s Agent Adapter", long_about = None)]
pub struct Cli {
    /// Adapter config file (TOML); its [workload] section supplies defaults
    #[arg(long, short, env = "K8S_AGENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Agent whose workload to manage
    #[arg(long, env = "KAA_AGENT_NAME")]
    pub agent_name: Option<String>,

    /// Namespace (overrides the config file)
    #[arg(long, short)]
    pub namespace: Option<String>,

    /// Path to kubeconfig file (uses default if not specified)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Run against an in-process cluster instead of Kubernetes
    #[arg(long)]
    pub dry_run: bool,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision the workload and wait until it is ready
    Up {
        /// Container image (overrides the config file)
        #[arg(long)]
        image: Option<String>,

        /// Replica count (overrides the config file)
        #[arg(long)]
        replicas: Option<i32>,

        /// Readiness timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Delete the workload and its autoscaler
    Down,

    /// Set the workload's replica count
    Scale {
        /// Desired replica count
        #[arg(allow_negative_numbers = true)]
        replicas: i32,
    },

    /// Attach an autoscaler to the workload
    Autoscale {
        /// Minimum replicas
        #[arg(long, default_value_t = 1)]
        min: i32,

        /// Maximum replicas
        #[arg(long, default_value_t = 3)]
        max: i32,

        /// Target CPU utilization percent
        #[arg(long, default_value_t = 80)]
        cpu: i32,
    },

    /// Show the workload and its instances
    Status,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(verbose))
        .init();
}

async fn connect(cli: &Cli, file: &config::FileConfig) -> Result<Session> {
    let mut settings = file.workload.clone();
    if let Some(namespace) = &cli.namespace {
        settings.namespace = namespace.clone();
    }
    settings.validate()?;

    let agent_name = cli
        .agent_name
        .clone()
        .or_else(|| file.agent_name.clone())
        .unwrap_or_else(|| "agent".to_string());
    let dry_run = cli.dry_run || file.dry_run.unwrap_or(false);
    let kubeconfig = cli.kubeconfig.clone().or_else(|| file.kubeconfig.clone());

    let api: Arc<dyn OrchestrationApi> = if dry_run {
        Arc::new(InMemoryCluster::new())
    } else {
        let path = kubeconfig
            .as_deref()
            .map(config::expand_home)
            .transpose()?;
        Arc::new(
            KubeOrchestrator::connect(path.as_deref())
                .await
                .context("Failed to connect to the Kubernetes API")?,
        )
    };
    let api = with_rate_limit(api, settings.build_rate_limiter()?);

    Ok(Session {
        agent_name,
        settings,
        api,
        kubeconfig,
        dry_run,
        format: cli.format,
    })
}

async fn run(cli: Cli) -> Result<()> {
    let file = config::FileConfig::load(cli.config.as_deref())?;
    let session = connect(&cli, &file).await?;

    // Execute command
    match cli.command {
        Commands::Up {
            image,
            replicas,
            timeout,
        } => lifecycle::up(&session, image, replicas, timeout).await,
        Commands::Down => lifecycle::down(&session).await,
        Commands::Scale { replicas } => lifecycle::scale(&session, replicas).await,
        Commands::Autoscale { min, max, cpu } => {
            lifecycle::autoscale(&session, min, max, cpu).await
        }
        Commands::Status => status::show_status(&session).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
