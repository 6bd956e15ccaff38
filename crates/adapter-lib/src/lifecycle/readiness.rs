//! Readiness polling
//!
//! Polls instance listings on a fixed interval until one instance reports a
//! `Ready` condition, or the timeout measured from the start of the wait is
//! exceeded. A failed listing is logged and the loop carries on; only the
//! deadline ends the wait with an error. The deadline is checked before each
//! poll, so a timeout fires somewhere in `timeout + [0, poll_interval]`.

use super::dispatch;
use crate::error::{AdapterError, AdapterResult};
use crate::observability::AdapterMetrics;
use crate::orchestrator::OrchestrationApi;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default delay between two readiness polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Waits for a workload's instances to become ready
#[derive(Clone)]
pub struct ReadinessWatcher {
    api: Arc<dyn OrchestrationApi>,
    poll_interval: Duration,
    metrics: AdapterMetrics,
}

impl ReadinessWatcher {
    pub fn new(api: Arc<dyn OrchestrationApi>) -> Self {
        Self::with_poll_interval(api, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(api: Arc<dyn OrchestrationApi>, poll_interval: Duration) -> Self {
        Self {
            api,
            poll_interval,
            metrics: AdapterMetrics::new(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Wait until an instance matching `label_selector` is ready.
    ///
    /// Returns the name of the first ready instance found.
    pub async fn wait_ready(
        &self,
        label_selector: &str,
        namespace: &str,
        timeout: Duration,
    ) -> AdapterResult<String> {
        let start = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            if start.elapsed() > timeout {
                self.metrics
                    .observe_readiness_wait(start.elapsed().as_secs_f64());
                warn!(
                    selector = %label_selector,
                    namespace = %namespace,
                    attempts = attempt,
                    timeout_secs = timeout.as_secs_f64(),
                    "Timed out waiting for pod to become ready"
                );
                return Err(AdapterError::Timeout {
                    selector: label_selector.to_string(),
                    timeout,
                });
            }

            attempt += 1;
            let api = Arc::clone(&self.api);
            let ns = namespace.to_string();
            let selector = label_selector.to_string();

            match dispatch("list_instances", async move {
                api.list_instances(&ns, &selector).await
            })
            .await
            {
                Ok(instances) => {
                    if let Some(ready) = instances.iter().find(|i| i.is_ready()) {
                        self.metrics
                            .observe_readiness_wait(start.elapsed().as_secs_f64());
                        info!(
                            pod = %ready.name,
                            selector = %label_selector,
                            attempts = attempt,
                            "Found ready pod"
                        );
                        return Ok(ready.name.clone());
                    }
                    debug!(
                        selector = %label_selector,
                        instances = instances.len(),
                        attempt = attempt,
                        "No ready pod yet"
                    );
                }
                Err(e) => {
                    self.metrics.inc_api_error(&e.operation);
                    warn!(
                        selector = %label_selector,
                        attempt = attempt,
                        error = %e,
                        "Readiness poll failed, retrying"
                    );
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::models::{InstanceCondition, InstanceStatus, WorkloadResource, WorkloadSpec};
    use crate::orchestrator::InMemoryCluster;
    use std::collections::BTreeMap;

    async fn cluster_with_workload(auto_ready: bool) -> Arc<InMemoryCluster> {
        let cluster = Arc::new(InMemoryCluster::with_auto_ready(auto_ready));
        let spec = WorkloadSpec {
            name: "demo".to_string(),
            image: "x".to_string(),
            namespace: "default".to_string(),
            replicas: 1,
            env: BTreeMap::new(),
            resource_requests: BTreeMap::new(),
            resource_limits: BTreeMap::new(),
            labels: WorkloadSpec::default_labels("demo"),
            container_port: None,
        };
        cluster
            .create_workload("default", &WorkloadResource::desired(spec))
            .await
            .unwrap();
        cluster
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_on_first_ready_instance() {
        let cluster = cluster_with_workload(true).await;
        let watcher = ReadinessWatcher::new(cluster.clone());
        let start = Instant::now();

        let pod = watcher
            .wait_ready("app=demo", "default", Duration::from_secs(120))
            .await
            .unwrap();

        assert_eq!(pod, "demo-0");
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_within_one_poll_interval() {
        let cluster = Arc::new(InMemoryCluster::with_auto_ready(false));
        let watcher = ReadinessWatcher::new(cluster.clone());
        let timeout = Duration::from_secs(5);
        let start = Instant::now();

        let err = watcher
            .wait_ready("app=demo", "default", timeout)
            .await
            .unwrap_err();

        let elapsed = start.elapsed();
        assert!(err.is_timeout());
        assert!(elapsed >= timeout, "timed out early: {:?}", elapsed);
        assert!(
            elapsed <= timeout + watcher.poll_interval(),
            "timed out late: {:?}",
            elapsed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_errors_are_swallowed_until_ready() {
        let cluster = cluster_with_workload(false).await;
        cluster.fail_next(
            "list_instances",
            ApiError::transport("list_instances", "connection reset"),
        );
        let watcher = ReadinessWatcher::with_poll_interval(cluster.clone(), Duration::from_secs(1));

        let waiter = {
            let watcher = watcher.clone();
            tokio::spawn(async move {
                watcher
                    .wait_ready("app=demo", "default", Duration::from_secs(30))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(2500)).await;
        cluster.mark_ready("default", "demo");

        let pod = waiter.await.unwrap().unwrap();
        assert_eq!(pod, "demo-0");
        // create, then: failed poll at 0s, not ready at 1s and 2s, ready at 3s
        assert_eq!(cluster.calls().await.len(), 1 + 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignores_instances_without_ready_condition() {
        let cluster = cluster_with_workload(false).await;
        cluster.set_instances(
            "default",
            "demo",
            vec![InstanceStatus {
                name: "demo-0".to_string(),
                conditions: vec![InstanceCondition {
                    kind: "ContainersReady".to_string(),
                    status: true,
                }],
                started_at: None,
            }],
        );
        let watcher = ReadinessWatcher::with_poll_interval(cluster.clone(), Duration::from_secs(1));

        let err = watcher
            .wait_ready("app=demo", "default", Duration::from_secs(3))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
