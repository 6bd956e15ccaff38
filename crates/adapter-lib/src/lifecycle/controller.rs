//! Lifecycle state machine for one agent workload

use super::{Lifecycle, ReadinessWatcher, ResourceManager};
use crate::config::AdapterSettings;
use crate::error::{AdapterError, AdapterResult};
use crate::models::{AutoscaleSpec, LifecycleState, ShutdownOutcome, WorkloadSpec};
use crate::observability::{AdapterMetrics, StructuredLogger};
use crate::orchestrator::OrchestrationApi;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Point-in-time view of a controller, as served on `/status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleSnapshot {
    pub agent_name: String,
    pub workload: String,
    pub namespace: String,
    pub state: LifecycleState,
    pub replicas: i32,
    pub autoscale: Option<AutoscaleSpec>,
    pub retained: bool,
}

/// Drives one workload through provisioning, readiness and teardown.
///
/// Owns exactly one `WorkloadSpec` and at most one active `AutoscaleSpec`.
/// Operations are expected to be awaited one at a time; nothing here
/// serializes concurrent callers.
pub struct LifecycleController {
    agent_name: String,
    workload: WorkloadSpec,
    autoscale: AutoscaleSpec,
    autoscale_enabled: bool,
    persistence_on_shutdown: bool,
    readiness_timeout: Duration,
    resources: ResourceManager,
    watcher: ReadinessWatcher,
    state: LifecycleState,
    reconciled: bool,
    autoscaler_created: bool,
    retained: bool,
    metrics: AdapterMetrics,
    logger: StructuredLogger,
}

impl LifecycleController {
    /// Build a controller for `agent_name` from validated settings
    pub fn new(
        agent_name: &str,
        settings: &AdapterSettings,
        api: Arc<dyn OrchestrationApi>,
    ) -> AdapterResult<Self> {
        if agent_name.is_empty() {
            return Err(AdapterError::Config("agent name must not be empty".into()));
        }
        settings.validate()?;

        let workload = settings.workload_spec(agent_name);
        let metrics = AdapterMetrics::new();
        metrics.set_lifecycle_state(LifecycleState::Uninitialized);
        metrics.set_desired_replicas(workload.replicas);
        metrics.set_autoscaler_enabled(false);

        Ok(Self {
            agent_name: agent_name.to_string(),
            logger: StructuredLogger::new(&workload.name, &workload.namespace),
            resources: ResourceManager::new(Arc::clone(&api), &workload.namespace),
            watcher: ReadinessWatcher::with_poll_interval(api, settings.poll_interval()),
            workload,
            autoscale: settings.autoscale_spec(),
            autoscale_enabled: settings.autoscale,
            persistence_on_shutdown: settings.persistence_on_shutdown,
            readiness_timeout: settings.readiness_timeout(),
            state: LifecycleState::Uninitialized,
            reconciled: false,
            autoscaler_created: false,
            retained: false,
            metrics,
        })
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn workload(&self) -> &WorkloadSpec {
        &self.workload
    }

    pub fn workload_name(&self) -> &str {
        &self.workload.name
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    /// Autoscaling bounds, when autoscaling is on
    pub fn autoscale(&self) -> Option<AutoscaleSpec> {
        self.autoscale_enabled.then_some(self.autoscale)
    }

    /// True after a shutdown that left the workload running
    pub fn is_retained(&self) -> bool {
        self.retained
    }

    pub fn persistence_on_shutdown(&self) -> bool {
        self.persistence_on_shutdown
    }

    /// Ask the next shutdown to keep (or tear down) the remote workload
    pub fn set_persistence(&mut self, keep: bool) {
        self.persistence_on_shutdown = keep;
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        LifecycleSnapshot {
            agent_name: self.agent_name.clone(),
            workload: self.workload.name.clone(),
            namespace: self.workload.namespace.clone(),
            state: self.state,
            replicas: self.workload.replicas,
            autoscale: self.autoscale(),
            retained: self.retained,
        }
    }

    fn transition(&mut self, next: LifecycleState) {
        if self.state != next {
            debug!(
                workload = %self.workload.name,
                from = %self.state,
                to = %next,
                "Lifecycle transition"
            );
        }
        self.state = next;
        self.metrics.set_lifecycle_state(next);
    }

    /// Store new autoscaling bounds and create the autoscaler.
    ///
    /// Works in any lifecycle state; an existing autoscaler is left as is.
    pub async fn enable_autoscale(
        &mut self,
        min_replicas: i32,
        max_replicas: i32,
        target_utilization_percent: i32,
    ) -> AdapterResult<()> {
        let bounds = AutoscaleSpec::new(min_replicas, max_replicas, target_utilization_percent)?;
        self.autoscale = bounds;
        self.autoscale_enabled = true;

        self.resources
            .create_autoscaler(&self.workload.name, bounds)
            .await?;
        self.autoscaler_created = true;
        self.metrics.set_autoscaler_enabled(true);
        self.logger
            .log_autoscale_enabled(min_replicas, max_replicas, target_utilization_percent);
        Ok(())
    }

    async fn provision(&mut self) -> AdapterResult<String> {
        self.resources.reconcile(&self.workload).await?;
        self.reconciled = true;

        if self.autoscale_enabled {
            self.resources
                .create_autoscaler(&self.workload.name, self.autoscale)
                .await?;
            self.autoscaler_created = true;
            self.metrics.set_autoscaler_enabled(true);
        }

        let selector = self.workload.label_selector();
        self.watcher
            .wait_ready(&selector, &self.workload.namespace, self.readiness_timeout)
            .await
    }
}

#[async_trait]
impl Lifecycle for LifecycleController {
    /// Provision the workload and wait for one ready instance.
    ///
    /// A no-op when already `Ready` unless `force` is set. On failure the
    /// state reverts to what it was before the call.
    async fn initialize(&mut self, force: bool) -> AdapterResult<()> {
        if self.state == LifecycleState::Ready && !force {
            debug!(workload = %self.workload.name, "Already ready, skipping initialize");
            return Ok(());
        }
        if self.workload.image.is_empty() {
            return Err(AdapterError::Config(
                "image is required to provision the workload".into(),
            ));
        }

        let previous = self.state;
        self.transition(LifecycleState::Provisioning);
        self.retained = false;
        self.logger.log_provisioning(
            &self.agent_name,
            &self.workload.image,
            self.workload.replicas,
        );

        let started = Instant::now();
        match self.provision().await {
            Ok(instance) => {
                self.transition(LifecycleState::Ready);
                self.logger.log_ready(&instance, started.elapsed());
                Ok(())
            }
            Err(e) => {
                self.transition(previous);
                self.logger.log_provisioning_failed(e.kind(), &e.to_string());
                Err(e)
            }
        }
    }

    /// Tear down the autoscaler and workload, unless persistence is set.
    ///
    /// Always ends in `Terminated`. The first delete failure is returned
    /// after the remaining deletes have been attempted.
    async fn shutdown(&mut self) -> AdapterResult<ShutdownOutcome> {
        if self.persistence_on_shutdown {
            self.retained = true;
            self.transition(LifecycleState::Terminated);
            self.logger.log_shutdown(ShutdownOutcome::Retained);
            return Ok(ShutdownOutcome::Retained);
        }

        self.transition(LifecycleState::ShuttingDown);
        let mut first_error = None;

        if self.autoscaler_created || self.autoscale_enabled {
            match self.resources.delete_autoscaler(&self.workload.name).await {
                Ok(_) => {
                    self.autoscaler_created = false;
                    self.metrics.set_autoscaler_enabled(false);
                }
                Err(e) => {
                    warn!(workload = %self.workload.name, error = %e, "Autoscaler teardown failed");
                    first_error = Some(e);
                }
            }
        }

        if let Err(e) = self.resources.delete(&self.workload.name).await {
            warn!(workload = %self.workload.name, error = %e, "Workload teardown failed");
            first_error.get_or_insert(e);
        }

        self.retained = false;
        self.transition(LifecycleState::Terminated);

        match first_error {
            Some(e) => Err(e),
            None => {
                self.logger.log_shutdown(ShutdownOutcome::TornDown);
                Ok(ShutdownOutcome::TornDown)
            }
        }
    }

    /// Set the replica count; requires a prior reconcile, not `Ready`
    async fn scale(&mut self, replicas: i32) -> AdapterResult<()> {
        if replicas < 0 {
            return Err(AdapterError::Validation(format!(
                "replica count must be non-negative, got {}",
                replicas
            )));
        }
        if !self.reconciled {
            return Err(AdapterError::NotReconciled(self.workload.name.clone()));
        }

        self.resources.scale(&self.workload.name, replicas).await?;
        self.workload.replicas = replicas;
        self.metrics.set_desired_replicas(replicas);
        self.logger.log_scaled(replicas);
        if self.autoscale_enabled {
            info!(
                workload = %self.workload.name,
                "Autoscaler is active and may override the manual replica count"
            );
        }
        Ok(())
    }

    fn state(&self) -> LifecycleState {
        self.state
    }
}
