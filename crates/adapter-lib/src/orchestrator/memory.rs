//! In-process cluster
//!
//! Keeps workloads, autoscalers and instances in memory, journals every call
//! it receives and can be told to fail the next call of a given operation.
//! Instances are (re)generated whenever a workload is written; whether they
//! come up ready is controlled by `auto_ready`.

use super::{async_trait, Creation, Lookup, OrchestrationApi, Removal};
use crate::error::ApiError;
use crate::models::{
    parse_label_selector, AutoscalerResource, InstanceCondition, InstanceStatus,
    WorkloadResource, READY_CONDITION,
};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// A call received by the in-memory cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    GetWorkload(String),
    CreateWorkload(String),
    UpdateWorkload(String),
    DeleteWorkload(String),
    PatchScale(String, i32),
    ListInstances(String),
    CreateAutoscaler(String),
    DeleteAutoscaler(String),
}

impl ApiCall {
    /// Operation name, as used by [`InMemoryCluster::fail_next`]
    pub fn operation(&self) -> &'static str {
        match self {
            ApiCall::GetWorkload(_) => "get_workload",
            ApiCall::CreateWorkload(_) => "create_workload",
            ApiCall::UpdateWorkload(_) => "update_workload",
            ApiCall::DeleteWorkload(_) => "delete_workload",
            ApiCall::PatchScale(..) => "patch_scale",
            ApiCall::ListInstances(_) => "list_instances",
            ApiCall::CreateAutoscaler(_) => "create_autoscaler",
            ApiCall::DeleteAutoscaler(_) => "delete_autoscaler",
        }
    }

    /// True for calls that change cluster state
    pub fn is_mutation(&self) -> bool {
        !matches!(self, ApiCall::GetWorkload(_) | ApiCall::ListInstances(_))
    }
}

/// In-memory stand-in for the orchestration API
pub struct InMemoryCluster {
    workloads: DashMap<Key, WorkloadResource>,
    autoscalers: DashMap<Key, AutoscalerResource>,
    instances: DashMap<Key, Vec<InstanceStatus>>,
    faults: DashMap<String, ApiError>,
    calls: Mutex<Vec<ApiCall>>,
    version: AtomicU64,
    auto_ready: bool,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    /// Cluster whose instances report ready as soon as they are created
    pub fn new() -> Self {
        Self::with_auto_ready(true)
    }

    pub fn with_auto_ready(auto_ready: bool) -> Self {
        Self {
            workloads: DashMap::new(),
            autoscalers: DashMap::new(),
            instances: DashMap::new(),
            faults: DashMap::new(),
            calls: Mutex::new(Vec::new()),
            version: AtomicU64::new(0),
            auto_ready,
        }
    }

    /// Fail the next call of `operation` (e.g. `"create_workload"`) with `error`
    pub fn fail_next(&self, operation: &str, error: ApiError) {
        self.faults.insert(operation.to_string(), error);
    }

    /// Every call received so far, in order
    pub async fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().await.clone()
    }

    pub async fn clear_calls(&self) {
        self.calls.lock().await.clear();
    }

    pub fn workload(&self, namespace: &str, name: &str) -> Option<WorkloadResource> {
        self.workloads.get(&key(namespace, name)).map(|w| w.clone())
    }

    pub fn autoscaler(&self, namespace: &str, name: &str) -> Option<AutoscalerResource> {
        self.autoscalers.get(&key(namespace, name)).map(|a| a.clone())
    }

    /// Replace the instances reported for a workload
    pub fn set_instances(&self, namespace: &str, workload: &str, instances: Vec<InstanceStatus>) {
        self.instances.insert(key(namespace, workload), instances);
    }

    /// Flip every instance of a workload to ready
    pub fn mark_ready(&self, namespace: &str, workload: &str) {
        if let Some(mut instances) = self.instances.get_mut(&key(namespace, workload)) {
            for instance in instances.iter_mut() {
                instance.conditions = vec![ready_condition(true)];
            }
        }
    }

    async fn record(&self, call: ApiCall) -> Result<(), ApiError> {
        let operation = call.operation();
        self.calls.lock().await.push(call);
        match self.faults.remove(operation) {
            Some((_, error)) => Err(error),
            None => Ok(()),
        }
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn spawn_instances(&self, namespace: &str, workload: &WorkloadResource) {
        let ready = self.auto_ready;
        let instances = (0..workload.spec.replicas.max(0))
            .map(|i| InstanceStatus {
                name: format!("{}-{}", workload.spec.name, i),
                conditions: vec![ready_condition(ready)],
                started_at: Some(chrono::Utc::now()),
            })
            .collect();
        self.instances
            .insert(key(namespace, &workload.spec.name), instances);
    }
}

fn ready_condition(status: bool) -> InstanceCondition {
    InstanceCondition {
        kind: READY_CONDITION.to_string(),
        status,
    }
}

#[async_trait]
impl OrchestrationApi for InMemoryCluster {
    async fn get_workload(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Lookup<WorkloadResource>, ApiError> {
        self.record(ApiCall::GetWorkload(name.to_string())).await?;
        Ok(match self.workload(namespace, name) {
            Some(workload) => Lookup::Found(workload),
            None => Lookup::NotFound,
        })
    }

    async fn create_workload(
        &self,
        namespace: &str,
        workload: &WorkloadResource,
    ) -> Result<(), ApiError> {
        let name = &workload.spec.name;
        self.record(ApiCall::CreateWorkload(name.clone())).await?;

        let k = key(namespace, name);
        if self.workloads.contains_key(&k) {
            return Err(ApiError::conflict("create_workload", name));
        }

        let mut stored = workload.clone();
        stored.resource_version = Some(self.next_version());
        self.spawn_instances(namespace, &stored);
        self.workloads.insert(k, stored);
        debug!(workload = %name, "Created in-memory workload");
        Ok(())
    }

    async fn update_workload(
        &self,
        namespace: &str,
        name: &str,
        workload: &WorkloadResource,
    ) -> Result<(), ApiError> {
        self.record(ApiCall::UpdateWorkload(name.to_string())).await?;

        let mut entry = self
            .workloads
            .get_mut(&key(namespace, name))
            .ok_or_else(|| ApiError::not_found("update_workload", name))?;

        if workload.resource_version.is_some()
            && workload.resource_version != entry.resource_version
        {
            return Err(ApiError::new(
                "update_workload",
                Some(409),
                "Conflict",
                format!("{} was modified concurrently", name),
            ));
        }

        let mut stored = workload.clone();
        stored.resource_version = Some(self.next_version());
        *entry = stored.clone();
        drop(entry);
        self.spawn_instances(namespace, &stored);
        Ok(())
    }

    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<Removal, ApiError> {
        self.record(ApiCall::DeleteWorkload(name.to_string())).await?;
        self.instances.remove(&key(namespace, name));
        Ok(match self.workloads.remove(&key(namespace, name)) {
            Some(_) => Removal::Deleted,
            None => Removal::NotFound,
        })
    }

    async fn patch_scale(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ApiError> {
        self.record(ApiCall::PatchScale(name.to_string(), replicas))
            .await?;

        let mut entry = self
            .workloads
            .get_mut(&key(namespace, name))
            .ok_or_else(|| ApiError::not_found("patch_scale", name))?;
        entry.spec.replicas = replicas;
        entry.resource_version = Some(self.next_version());
        let stored = entry.clone();
        drop(entry);
        self.spawn_instances(namespace, &stored);
        Ok(())
    }

    async fn list_instances(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<InstanceStatus>, ApiError> {
        self.record(ApiCall::ListInstances(label_selector.to_string()))
            .await?;

        let terms = parse_label_selector(label_selector);
        let matching: Vec<Key> = self
            .workloads
            .iter()
            .filter(|w| w.key().0 == namespace)
            .filter(|w| {
                terms
                    .iter()
                    .all(|(k, v)| w.spec.labels.get(k).map(|l| l == v).unwrap_or(false))
            })
            .map(|w| w.key().clone())
            .collect();

        Ok(matching
            .iter()
            .filter_map(|k| self.instances.get(k).map(|i| i.clone()))
            .flatten()
            .collect())
    }

    async fn create_autoscaler(
        &self,
        namespace: &str,
        autoscaler: &AutoscalerResource,
    ) -> Result<Creation, ApiError> {
        self.record(ApiCall::CreateAutoscaler(autoscaler.name.clone()))
            .await?;

        let k = key(namespace, &autoscaler.name);
        if self.autoscalers.contains_key(&k) {
            return Ok(Creation::AlreadyExists);
        }
        self.autoscalers.insert(k, autoscaler.clone());
        Ok(Creation::Created)
    }

    async fn delete_autoscaler(&self, namespace: &str, name: &str) -> Result<Removal, ApiError> {
        self.record(ApiCall::DeleteAutoscaler(name.to_string()))
            .await?;
        Ok(match self.autoscalers.remove(&key(namespace, name)) {
            Some(_) => Removal::Deleted,
            None => Removal::NotFound,
        })
    }
}
