//! HTTP API for health checks, workload status and Prometheus metrics

use adapter_lib::{
    health::{ComponentStatus, HealthRegistry},
    observability::AdapterMetrics,
    LifecycleSnapshot,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: AdapterMetrics,
    pub status: Arc<RwLock<LifecycleSnapshot>>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: AdapterMetrics,
        status: LifecycleSnapshot,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            status: Arc::new(RwLock::new(status)),
        }
    }

    /// Publish the controller's latest snapshot to `/status` and `/readyz`
    pub async fn publish(&self, snapshot: LifecycleSnapshot) {
        self.health_registry.set_lifecycle(snapshot.state).await;
        *self.status.write().await = snapshot;
    }
}

/// Health check response - returns 200 if healthy, 503 if degraded/unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 only while the workload is ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.status.read().await.clone();
    Json(snapshot)
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use adapter_lib::{
        health::components, AdapterSettings, InMemoryCluster, Lifecycle, LifecycleController,
        LifecycleState,
    };
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    fn controller() -> LifecycleController {
        let settings = AdapterSettings {
            image: Some("ghcr.io/org/agent:latest".to_string()),
            ..Default::default()
        };
        LifecycleController::new("demo", &settings, Arc::new(InMemoryCluster::new())).unwrap()
    }

    async fn setup_test_app() -> (Router, Arc<AppState>, LifecycleController) {
        let health_registry = HealthRegistry::new();
        health_registry.register(components::ORCHESTRATOR).await;
        health_registry.register(components::WORKLOAD).await;

        let controller = controller();
        let state = Arc::new(AppState::new(
            health_registry,
            AdapterMetrics::new(),
            controller.snapshot(),
        ));
        (create_router(state.clone()), state, controller)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_healthz_returns_ok_when_healthy() {
        let (app, _state, _controller) = setup_test_app().await;

        let (status, health) = get_json(app, "/healthz").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["lifecycle"], "uninitialized");
    }

    #[tokio::test]
    async fn test_healthz_returns_ok_when_degraded() {
        let (app, state, _controller) = setup_test_app().await;
        state
            .health_registry
            .set_degraded(components::WORKLOAD, "Readiness wait timed out")
            .await;

        let (status, health) = get_json(app, "/healthz").await;

        // Degraded still returns 200 (operational)
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["status"], "degraded");
    }

    #[tokio::test]
    async fn test_healthz_returns_503_when_unhealthy() {
        let (app, state, _controller) = setup_test_app().await;
        state
            .health_registry
            .set_unhealthy(components::ORCHESTRATOR, "Forbidden")
            .await;

        let (status, health) = get_json(app, "/healthz").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(health["status"], "unhealthy");
    }

    #[tokio::test]
    async fn test_readyz_returns_503_until_initialized() {
        let (app, _state, _controller) = setup_test_app().await;

        let (status, readiness) = get_json(app, "/readyz").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(readiness["ready"], false);
        assert_eq!(readiness["lifecycle"], "uninitialized");
    }

    #[tokio::test]
    async fn test_readyz_and_status_follow_controller() {
        let (app, state, mut controller) = setup_test_app().await;

        controller.initialize(false).await.unwrap();
        state.publish(controller.snapshot()).await;

        let (status, readiness) = get_json(app.clone(), "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(readiness["ready"], true);

        let (status, snapshot) = get_json(app.clone(), "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(snapshot["workload"], "mcp-agent-demo");
        assert_eq!(snapshot["state"], "ready");
        assert_eq!(snapshot["replicas"], 1);
        assert_eq!(snapshot["retained"], false);

        controller.shutdown().await.unwrap();
        state.publish(controller.snapshot()).await;
        assert_eq!(controller.state(), LifecycleState::Terminated);

        let (status, _) = get_json(app, "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (app, state, _controller) = setup_test_app().await;
        state.metrics.inc_reconcile("created");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("agent_adapter_reconcile_total"));
    }
}
