//! Observability infrastructure for the workload adapter
//!
//! Provides:
//! - Prometheus metrics (reconcile outcomes, API faults, readiness and throttling latency)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter_vec, register_int_gauge, Histogram, IntCounterVec,
    IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

use crate::models::{LifecycleState, ShutdownOutcome};

/// Buckets for readiness waits (in seconds); pods typically take seconds to minutes
const READINESS_BUCKETS: &[f64] = &[1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0, 90.0, 120.0, 300.0];

/// Buckets for rate limiter waits (in seconds)
const THROTTLE_BUCKETS: &[f64] = &[0.0001, 0.001, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AdapterMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct AdapterMetricsInner {
    reconcile_total: IntCounterVec,
    api_errors_total: IntCounterVec,
    readiness_wait_seconds: Histogram,
    rate_limit_wait_seconds: Histogram,
    lifecycle_state: IntGauge,
    desired_replicas: IntGauge,
    autoscaler_enabled: IntGauge,
}

impl AdapterMetricsInner {
    fn new() -> Self {
        Self {
            reconcile_total: register_int_counter_vec!(
                "agent_adapter_reconcile_total",
                "Workload reconciliations by action taken",
                &["action"]
            )
            .expect("Failed to register reconcile_total"),

            api_errors_total: register_int_counter_vec!(
                "agent_adapter_api_errors_total",
                "Orchestration API faults by operation",
                &["operation"]
            )
            .expect("Failed to register api_errors_total"),

            readiness_wait_seconds: register_histogram!(
                "agent_adapter_readiness_wait_seconds",
                "Time spent waiting for the workload to report a ready instance",
                READINESS_BUCKETS.to_vec()
            )
            .expect("Failed to register readiness_wait_seconds"),

            rate_limit_wait_seconds: register_histogram!(
                "agent_adapter_rate_limit_wait_seconds",
                "Time callers spent waiting for a rate limiter slot",
                THROTTLE_BUCKETS.to_vec()
            )
            .expect("Failed to register rate_limit_wait_seconds"),

            lifecycle_state: register_int_gauge!(
                "agent_adapter_lifecycle_state",
                "Lifecycle state (0=uninitialized, 1=provisioning, 2=ready, 3=shutting_down, 4=terminated)"
            )
            .expect("Failed to register lifecycle_state"),

            desired_replicas: register_int_gauge!(
                "agent_adapter_desired_replicas",
                "Replica count last requested for the workload"
            )
            .expect("Failed to register desired_replicas"),

            autoscaler_enabled: register_int_gauge!(
                "agent_adapter_autoscaler_enabled",
                "Whether an autoscaler was created for the workload"
            )
            .expect("Failed to register autoscaler_enabled"),
        }
    }
}

/// Adapter metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AdapterMetrics {
    _private: (),
}

impl Default for AdapterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AdapterMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AdapterMetricsInner {
        GLOBAL_METRICS.get_or_init(AdapterMetricsInner::new)
    }

    /// Count a reconciliation by the action it took
    pub fn inc_reconcile(&self, action: &str) {
        self.inner().reconcile_total.with_label_values(&[action]).inc();
    }

    /// Count an orchestration API fault
    pub fn inc_api_error(&self, operation: &str) {
        self.inner()
            .api_errors_total
            .with_label_values(&[operation])
            .inc();
    }

    pub fn observe_readiness_wait(&self, duration_secs: f64) {
        self.inner().readiness_wait_seconds.observe(duration_secs);
    }

    pub fn observe_rate_limit_wait(&self, duration_secs: f64) {
        self.inner().rate_limit_wait_seconds.observe(duration_secs);
    }

    pub fn set_lifecycle_state(&self, state: LifecycleState) {
        self.inner().lifecycle_state.set(state.as_gauge());
    }

    pub fn set_desired_replicas(&self, replicas: i32) {
        self.inner().desired_replicas.set(i64::from(replicas));
    }

    pub fn set_autoscaler_enabled(&self, enabled: bool) {
        self.inner().autoscaler_enabled.set(i64::from(enabled));
    }
}

/// Structured logger for lifecycle events
///
/// Provides consistent JSON-formatted records for provisioning, readiness,
/// scaling and teardown of one workload.
#[derive(Clone)]
pub struct StructuredLogger {
    workload: String,
    namespace: String,
}

impl StructuredLogger {
    pub fn new(workload: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            workload: workload.into(),
            namespace: namespace.into(),
        }
    }

    /// Log the start of provisioning
    pub fn log_provisioning(&self, agent_name: &str, image: &str, replicas: i32) {
        info!(
            event = "workload_provisioning",
            workload = %self.workload,
            namespace = %self.namespace,
            agent = %agent_name,
            image = %image,
            replicas = replicas,
            "Provisioning workload for agent"
        );
    }

    /// Log a successful provisioning
    pub fn log_ready(&self, instance: &str, waited: Duration) {
        info!(
            event = "workload_ready",
            workload = %self.workload,
            namespace = %self.namespace,
            instance = %instance,
            waited_secs = waited.as_secs_f64(),
            "Workload provisioning complete"
        );
    }

    /// Log a failed provisioning attempt
    pub fn log_provisioning_failed(&self, kind: &str, error: &str) {
        warn!(
            event = "workload_provisioning_failed",
            workload = %self.workload,
            namespace = %self.namespace,
            error_kind = %kind,
            error = %error,
            "Workload provisioning failed"
        );
    }

    /// Log a replica change
    pub fn log_scaled(&self, replicas: i32) {
        info!(
            event = "workload_scaled",
            workload = %self.workload,
            namespace = %self.namespace,
            replicas = replicas,
            "Workload scaled"
        );
    }

    /// Log autoscaler enablement
    pub fn log_autoscale_enabled(&self, min: i32, max: i32, target: i32) {
        info!(
            event = "autoscale_enabled",
            workload = %self.workload,
            namespace = %self.namespace,
            min_replicas = min,
            max_replicas = max,
            target_utilization_percent = target,
            "Autoscaling enabled"
        );
    }

    /// Log the end of a shutdown
    pub fn log_shutdown(&self, outcome: ShutdownOutcome) {
        match outcome {
            ShutdownOutcome::Retained => info!(
                event = "workload_retained",
                workload = %self.workload,
                namespace = %self.namespace,
                "Persistence requested, leaving workload running"
            ),
            ShutdownOutcome::TornDown => info!(
                event = "workload_torn_down",
                workload = %self.workload,
                namespace = %self.namespace,
                "Workload torn down"
            ),
        }
    }

    /// Log adapter startup
    pub fn log_startup(&self, version: &str, backend: &str) {
        info!(
            event = "adapter_started",
            workload = %self.workload,
            namespace = %self.namespace,
            adapter_version = %version,
            backend = %backend,
            "Workload adapter started"
        );
    }
}
