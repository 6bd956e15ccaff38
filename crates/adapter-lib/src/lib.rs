//! Workload lifecycle library for remotely hosted agents
//!
//! This crate provides the core functionality for:
//! - Provisioning, scaling and tearing down an agent's Kubernetes workload
//! - Waiting for the workload to report a ready instance
//! - Sliding-window rate limiting of outbound orchestration calls
//! - Health checks and observability

pub mod config;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod rate_limiter;

pub use config::{AdapterSettings, RateLimiterSettings, KEYED_TABLES};
pub use error::{AdapterError, AdapterResult, ApiError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use lifecycle::{
    Lifecycle, LifecycleController, LifecycleSnapshot, ReadinessWatcher, ReconcileAction,
    ResourceManager,
};
pub use models::*;
pub use observability::{AdapterMetrics, StructuredLogger};
pub use orchestrator::{
    with_rate_limit, Creation, InMemoryCluster, KubeOrchestrator, Lookup, OrchestrationApi,
    Removal, Throttled,
};
pub use rate_limiter::RateLimiter;
