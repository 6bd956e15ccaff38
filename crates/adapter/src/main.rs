//! K8s Agent Adapter - hosts an agent process on a Kubernetes workload
//!
//! Provisions the agent's Deployment (and optional autoscaler) on startup,
//! serves health, status and metrics while running, and tears the workload
//! down on SIGINT unless persistence is configured.

use adapter_lib::{
    health::{components, HealthRegistry},
    observability::{AdapterMetrics, StructuredLogger},
    orchestrator::with_rate_limit,
    InMemoryCluster, KubeOrchestrator, Lifecycle, LifecycleController, OrchestrationApi,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const ADAPTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting k8s-agent-adapter");

    let config = config::AgentConfig::load()?;
    info!(
        agent = %config.agent_name,
        namespace = %config.workload.namespace,
        dry_run = config.dry_run,
        "Adapter configured"
    );

    let (backend, api): (&str, Arc<dyn OrchestrationApi>) = if config.dry_run {
        ("in-memory", Arc::new(InMemoryCluster::new()))
    } else {
        let client = KubeOrchestrator::connect(config.kubeconfig.as_deref())
            .await
            .context("failed to connect to the Kubernetes API")?;
        ("kubernetes", Arc::new(client))
    };
    let api = with_rate_limit(api, config.workload.build_rate_limiter()?);

    let mut controller = LifecycleController::new(&config.agent_name, &config.workload, api)?;

    let health_registry = HealthRegistry::new();
    health_registry.register(components::ORCHESTRATOR).await;
    health_registry.register(components::WORKLOAD).await;

    let metrics = AdapterMetrics::new();
    let logger = StructuredLogger::new(controller.workload_name(), &config.workload.namespace);
    logger.log_startup(ADAPTER_VERSION, backend);

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics,
        controller.snapshot(),
    ));

    // Start health and metrics server
    let api_handle = tokio::spawn(api::serve(config.server.api_port, app_state.clone()));

    if let Err(e) = controller.initialize(false).await {
        error!(error = %e, kind = e.kind(), "Workload provisioning failed");
        let component = if e.is_timeout() {
            components::WORKLOAD
        } else {
            components::ORCHESTRATOR
        };
        health_registry
            .set_unhealthy(component, e.to_string())
            .await;
    }
    app_state.publish(controller.snapshot()).await;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("SIGINT received, shutting down");

    let result = controller.shutdown().await;
    app_state.publish(controller.snapshot()).await;
    api_handle.abort();

    let outcome = result.context("workload teardown failed")?;
    info!(outcome = ?outcome, "Shutdown complete");

    Ok(())
}
