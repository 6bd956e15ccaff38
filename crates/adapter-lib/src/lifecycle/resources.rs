//! Workload and autoscaler operations against the orchestration API

use super::dispatch;
use crate::error::{AdapterError, AdapterResult, ApiError};
use crate::models::{
    AutoscaleSpec, AutoscalerResource, InstanceStatus, WorkloadResource, WorkloadSpec,
};
use crate::observability::AdapterMetrics;
use crate::orchestrator::{Creation, Lookup, OrchestrationApi, Removal};
use std::sync::Arc;
use tracing::{debug, error, info};

/// What a reconciliation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Created,
    Updated,
}

impl ReconcileAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileAction::Created => "created",
            ReconcileAction::Updated => "updated",
        }
    }
}

/// Issues workload and autoscaler calls in one namespace.
///
/// Holds no state between calls; every operation is a fresh round trip.
#[derive(Clone)]
pub struct ResourceManager {
    api: Arc<dyn OrchestrationApi>,
    namespace: String,
    metrics: AdapterMetrics,
}

impl ResourceManager {
    pub fn new(api: Arc<dyn OrchestrationApi>, namespace: impl Into<String>) -> Self {
        Self {
            api,
            namespace: namespace.into(),
            metrics: AdapterMetrics::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn fault(&self, err: ApiError) -> AdapterError {
        error!(
            operation = %err.operation,
            namespace = %self.namespace,
            error = %err,
            "Orchestration API call failed"
        );
        self.metrics.inc_api_error(&err.operation);
        err.into()
    }

    /// Create the workload, or update it in place when it already exists.
    ///
    /// Read-then-write: the update carries the resource version seen by the
    /// read, so a concurrent change surfaces as a conflict fault.
    pub async fn reconcile(&self, spec: &WorkloadSpec) -> AdapterResult<ReconcileAction> {
        let api = Arc::clone(&self.api);
        let namespace = self.namespace.clone();
        let desired = spec.clone();

        let action = dispatch("reconcile", async move {
            match api.get_workload(&namespace, &desired.name).await? {
                Lookup::Found(existing) => {
                    info!(deployment = %desired.name, "Patching existing deployment");
                    let name = desired.name.clone();
                    let mut update = WorkloadResource::desired(desired);
                    update.resource_version = existing.resource_version;
                    api.update_workload(&namespace, &name, &update).await?;
                    Ok(ReconcileAction::Updated)
                }
                Lookup::NotFound => {
                    info!(deployment = %desired.name, "Creating deployment");
                    api.create_workload(&namespace, &WorkloadResource::desired(desired))
                        .await?;
                    Ok(ReconcileAction::Created)
                }
            }
        })
        .await
        .map_err(|e| self.fault(e))?;

        self.metrics.inc_reconcile(action.as_str());
        Ok(action)
    }

    /// Delete the workload; an absent workload counts as deleted
    pub async fn delete(&self, name: &str) -> AdapterResult<Removal> {
        let api = Arc::clone(&self.api);
        let namespace = self.namespace.clone();
        let target = name.to_string();

        let removal = dispatch("delete_workload", async move {
            api.delete_workload(&namespace, &target).await
        })
        .await
        .map_err(|e| self.fault(e))?;

        match removal {
            Removal::Deleted => info!(deployment = %name, "Deleted deployment"),
            Removal::NotFound => debug!(deployment = %name, "Deployment not found during delete"),
        }
        Ok(removal)
    }

    /// Set the replica count of an existing workload
    pub async fn scale(&self, name: &str, replicas: i32) -> AdapterResult<()> {
        if replicas < 0 {
            return Err(AdapterError::Validation(format!(
                "replica count must be non-negative, got {}",
                replicas
            )));
        }

        let api = Arc::clone(&self.api);
        let namespace = self.namespace.clone();
        let target = name.to_string();

        dispatch("patch_scale", async move {
            api.patch_scale(&namespace, &target, replicas).await
        })
        .await
        .map_err(|e| self.fault(e))?;

        info!(deployment = %name, replicas = replicas, "Scaled deployment");
        Ok(())
    }

    /// Create an autoscaler for the workload; an existing one is left as is
    pub async fn create_autoscaler(
        &self,
        name: &str,
        bounds: AutoscaleSpec,
    ) -> AdapterResult<Creation> {
        bounds.validate()?;

        let api = Arc::clone(&self.api);
        let namespace = self.namespace.clone();
        let autoscaler = AutoscalerResource {
            name: name.to_string(),
            target_name: name.to_string(),
            bounds,
        };

        let creation = dispatch("create_autoscaler", async move {
            api.create_autoscaler(&namespace, &autoscaler).await
        })
        .await
        .map_err(|e| self.fault(e))?;

        match creation {
            Creation::Created => info!(
                hpa = %name,
                min_replicas = bounds.min_replicas,
                max_replicas = bounds.max_replicas,
                "Created HPA"
            ),
            Creation::AlreadyExists => info!(hpa = %name, "HPA already exists"),
        }
        Ok(creation)
    }

    /// Delete the autoscaler; an absent autoscaler counts as deleted
    pub async fn delete_autoscaler(&self, name: &str) -> AdapterResult<Removal> {
        let api = Arc::clone(&self.api);
        let namespace = self.namespace.clone();
        let target = name.to_string();

        let removal = dispatch("delete_autoscaler", async move {
            api.delete_autoscaler(&namespace, &target).await
        })
        .await
        .map_err(|e| self.fault(e))?;

        match removal {
            Removal::Deleted => info!(hpa = %name, "Deleted HPA"),
            Removal::NotFound => debug!(hpa = %name, "HPA not found during delete"),
        }
        Ok(removal)
    }

    /// Current remote view of the workload, if any
    pub async fn get(&self, name: &str) -> AdapterResult<Option<WorkloadResource>> {
        let api = Arc::clone(&self.api);
        let namespace = self.namespace.clone();
        let target = name.to_string();

        let found = dispatch("get_workload", async move {
            api.get_workload(&namespace, &target).await
        })
        .await
        .map_err(|e| self.fault(e))?;
        Ok(found.into_option())
    }

    /// Instances matching `label_selector`, ready or not
    pub async fn instances(&self, label_selector: &str) -> AdapterResult<Vec<InstanceStatus>> {
        let api = Arc::clone(&self.api);
        let namespace = self.namespace.clone();
        let selector = label_selector.to_string();

        dispatch("list_instances", async move {
            api.list_instances(&namespace, &selector).await
        })
        .await
        .map_err(|e| self.fault(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{ApiCall, InMemoryCluster};
    use std::collections::BTreeMap;

    fn spec(replicas: i32) -> WorkloadSpec {
        WorkloadSpec {
            name: "demo".to_string(),
            image: "x".to_string(),
            namespace: "default".to_string(),
            replicas,
            env: BTreeMap::new(),
            resource_requests: BTreeMap::new(),
            resource_limits: BTreeMap::new(),
            labels: WorkloadSpec::default_labels("demo"),
            container_port: None,
        }
    }

    fn manager() -> (Arc<InMemoryCluster>, ResourceManager) {
        let cluster = Arc::new(InMemoryCluster::new());
        let manager = ResourceManager::new(cluster.clone(), "default");
        (cluster, manager)
    }

    #[tokio::test]
    async fn test_reconcile_creates_then_updates() {
        let (cluster, manager) = manager();

        let first = manager.reconcile(&spec(1)).await.unwrap();
        let second = manager.reconcile(&spec(1)).await.unwrap();

        assert_eq!(first, ReconcileAction::Created);
        assert_eq!(second, ReconcileAction::Updated);
        assert_eq!(
            cluster.calls().await,
            vec![
                ApiCall::GetWorkload("demo".into()),
                ApiCall::CreateWorkload("demo".into()),
                ApiCall::GetWorkload("demo".into()),
                ApiCall::UpdateWorkload("demo".into()),
            ]
        );
        assert_eq!(cluster.workload("default", "demo").unwrap().spec, spec(1));
    }

    #[tokio::test]
    async fn test_reconcile_overwrites_mutable_fields() {
        let (cluster, manager) = manager();
        manager.reconcile(&spec(1)).await.unwrap();

        let mut changed = spec(3);
        changed.image = "y".to_string();
        changed.env.insert("MODE".to_string(), "remote".to_string());
        manager.reconcile(&changed).await.unwrap();

        let stored = cluster.workload("default", "demo").unwrap();
        assert_eq!(stored.spec.replicas, 3);
        assert_eq!(stored.spec.image, "y");
        assert_eq!(stored.spec.env["MODE"], "remote");
    }

    #[tokio::test]
    async fn test_reconcile_propagates_api_fault() {
        let (cluster, manager) = manager();
        cluster.fail_next(
            "create_workload",
            ApiError::new("create_workload", Some(403), "Forbidden", "denied"),
        );

        let err = manager.reconcile(&spec(1)).await.unwrap_err();
        match err {
            AdapterError::Api(api) => assert_eq!(api.code, Some(403)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_delete_absent_is_success() {
        let (_cluster, manager) = manager();
        assert_eq!(
            manager.delete("absent-name").await.unwrap(),
            Removal::NotFound
        );
        assert_eq!(
            manager.delete_autoscaler("absent-name").await.unwrap(),
            Removal::NotFound
        );
    }

    #[tokio::test]
    async fn test_delete_fault_is_not_swallowed() {
        let (cluster, manager) = manager();
        cluster.fail_next(
            "delete_workload",
            ApiError::new("delete_workload", Some(500), "InternalError", "etcd down"),
        );
        assert!(manager.delete("demo").await.is_err());
    }

    #[tokio::test]
    async fn test_scale_rejects_negative_without_call() {
        let (cluster, manager) = manager();
        let err = manager.scale("demo", -1).await.unwrap_err();

        assert!(matches!(err, AdapterError::Validation(_)));
        assert!(cluster.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_scale_absent_workload_is_an_error() {
        let (_cluster, manager) = manager();
        let err = manager.scale("absent", 2).await.unwrap_err();
        match err {
            AdapterError::Api(api) => assert!(api.is_not_found()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_scale_existing_workload() {
        let (cluster, manager) = manager();
        manager.reconcile(&spec(1)).await.unwrap();
        manager.scale("demo", 0).await.unwrap();

        assert_eq!(cluster.workload("default", "demo").unwrap().spec.replicas, 0);
    }

    #[tokio::test]
    async fn test_create_autoscaler_tolerates_existing() {
        let (cluster, manager) = manager();
        let bounds = AutoscaleSpec::new(1, 3, 80).unwrap();

        let first = manager.create_autoscaler("demo", bounds).await.unwrap();
        let second = manager.create_autoscaler("demo", bounds).await.unwrap();

        assert_eq!(first, Creation::Created);
        assert_eq!(second, Creation::AlreadyExists);
        assert_eq!(
            cluster.autoscaler("default", "demo").unwrap().target_name,
            "demo"
        );
    }

    #[tokio::test]
    async fn test_create_autoscaler_rejects_bad_bounds_without_call() {
        let (cluster, manager) = manager();
        let bounds = AutoscaleSpec {
            min_replicas: 4,
            max_replicas: 2,
            target_utilization_percent: 80,
        };

        assert!(manager.create_autoscaler("demo", bounds).await.is_err());
        assert!(cluster.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_get_returns_remote_view() {
        let (_cluster, manager) = manager();
        assert!(manager.get("demo").await.unwrap().is_none());

        manager.reconcile(&spec(2)).await.unwrap();
        let found = manager.get("demo").await.unwrap().unwrap();
        assert_eq!(found.spec.replicas, 2);
        assert!(found.resource_version.is_some());
    }

    #[tokio::test]
    async fn test_instances_lists_by_selector() {
        let (_cluster, manager) = manager();
        assert!(manager.instances("app=demo").await.unwrap().is_empty());

        manager.reconcile(&spec(2)).await.unwrap();
        let instances = manager.instances("app=demo").await.unwrap();
        assert_eq!(instances.len(), 2);
        assert!(instances.iter().all(|i| i.is_ready()));
        assert!(manager.instances("app=other").await.unwrap().is_empty());
    }
}
