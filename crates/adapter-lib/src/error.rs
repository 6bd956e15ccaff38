//! Error types for workload provisioning and call throttling

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Failure reported by the orchestration API.
///
/// Absence and conflicts are not represented here: they come back as data
/// (`Lookup::NotFound`, `Removal::NotFound`, `Creation::AlreadyExists`) on the
/// calls where they are benign.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ApiError {
    /// Operation that failed, e.g. `create_workload`
    pub operation: String,
    /// HTTP status code when the API answered at all
    pub code: Option<u16>,
    /// Machine-readable reason (`NotFound`, `Conflict`, `Transport`, ...)
    pub reason: String,
    pub message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} failed ({}): {}", self.operation, code, self.message),
            None => write!(f, "{} failed ({}): {}", self.operation, self.reason, self.message),
        }
    }
}

impl ApiError {
    pub fn new(
        operation: impl Into<String>,
        code: Option<u16>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            code,
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn not_found(operation: impl Into<String>, name: &str) -> Self {
        Self::new(operation, Some(404), "NotFound", format!("{name} not found"))
    }

    pub fn conflict(operation: impl Into<String>, name: &str) -> Self {
        Self::new(operation, Some(409), "Conflict", format!("{name} already exists"))
    }

    /// Error for a call that never reached the API (connection reset, task panic).
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(operation, None, "Transport", message)
    }

    pub fn is_not_found(&self) -> bool {
        self.code == Some(404)
    }

    pub fn is_conflict(&self) -> bool {
        self.code == Some(409)
    }
}

/// Errors surfaced by the lifecycle controller, resource manager and rate limiter.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("timed out after {timeout:?} waiting for an instance matching '{selector}' to become ready")]
    Timeout { selector: String, timeout: Duration },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("workload {0} has not been reconciled yet")]
    NotReconciled(String),
}

impl AdapterError {
    /// Returns true for the readiness deadline failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, AdapterError::Timeout { .. })
    }

    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AdapterError::Api(_) => "api",
            AdapterError::Timeout { .. } => "timeout",
            AdapterError::Config(_) => "config",
            AdapterError::Validation(_) => "validation",
            AdapterError::NotReconciled(_) => "not_reconciled",
        }
    }
}
