//! Workload lifecycle management
//!
//! This module provides:
//! - `ResourceManager`: create-or-update, scale and delete of the workload and its autoscaler
//! - `ReadinessWatcher`: bounded polling until an instance reports ready
//! - `LifecycleController`: the initialize/shutdown state machine built on both

mod controller;
mod readiness;
mod resources;


pub use controller::{LifecycleController, LifecycleSnapshot};
pub use readiness::{ReadinessWatcher, DEFAULT_POLL_INTERVAL};
pub use resources::{ReconcileAction, ResourceManager};

use crate::error::{AdapterResult, ApiError};
use crate::models::{LifecycleState, ShutdownOutcome};
use std::future::Future;

pub use async_trait::async_trait;

/// Lifecycle of a remotely hosted agent workload
#[async_trait]
pub trait Lifecycle: Send {
    /// Provision the workload and wait for it to become ready
    async fn initialize(&mut self, force: bool) -> AdapterResult<()>;

    /// Tear the workload down, or leave it running when persistence is requested
    async fn shutdown(&mut self) -> AdapterResult<ShutdownOutcome>;

    /// Set the workload's replica count
    async fn scale(&mut self, replicas: i32) -> AdapterResult<()>;

    fn state(&self) -> LifecycleState;
}

/// Run a remote call on its own task.
///
/// The call keeps running to completion even if the awaiting future is
/// dropped; there is no way to abort it once dispatched.
pub(crate) async fn dispatch<T, F>(operation: &'static str, call: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(call).await {
        Ok(result) => result,
        Err(e) => Err(ApiError::transport(
            operation,
            format!("remote call task failed: {}", e),
        )),
    }
}
