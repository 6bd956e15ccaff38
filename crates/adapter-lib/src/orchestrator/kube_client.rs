//! Kubernetes backend
//!
//! Maps workloads onto `apps/v1` Deployments, instances onto Pods and
//! autoscalers onto `autoscaling/v1` HorizontalPodAutoscalers.

use super::{async_trait, Creation, Lookup, OrchestrationApi, Removal};
use crate::error::{AdapterError, AdapterResult, ApiError};
use crate::models::{
    AutoscaleSpec, AutoscalerResource, InstanceCondition, InstanceStatus, WorkloadResource,
    WorkloadSpec,
};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::autoscaling::v1::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec,
};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, Pod, PodSpec, PodTemplateSpec, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Orchestration API backed by a kube-rs client
#[derive(Clone)]
pub struct KubeOrchestrator {
    client: Client,
}

impl KubeOrchestrator {
    /// Wrap an already constructed client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client, failing fast when no cluster configuration is usable.
    ///
    /// Without an explicit kubeconfig this tries the in-cluster service
    /// account first and falls back to the default kubeconfig.
    pub async fn connect(kubeconfig: Option<&Path>) -> AdapterResult<Self> {
        let client = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    AdapterError::Config(format!(
                        "failed to read kubeconfig {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                let config =
                    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await
                        .map_err(|e| {
                            AdapterError::Config(format!("invalid kubeconfig: {}", e))
                        })?;
                Client::try_from(config).map_err(|e| {
                    AdapterError::Config(format!("failed to build Kubernetes client: {}", e))
                })?
            }
            None => Client::try_default().await.map_err(|e| {
                AdapterError::Config(format!(
                    "failed to initialize Kubernetes client; make sure a kubeconfig or \
                     in-cluster configuration is available: {}",
                    e
                ))
            })?,
        };

        info!(
            default_namespace = %client.default_namespace(),
            "Connected Kubernetes client"
        );
        Ok(Self { client })
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn autoscalers(&self, namespace: &str) -> Api<HorizontalPodAutoscaler> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Convert a kube error into an [`ApiError`] for `operation`
fn api_error(operation: &str, err: kube::Error) -> ApiError {
    match err {
        kube::Error::Api(response) => ApiError::new(
            operation,
            Some(response.code),
            response.reason,
            response.message,
        ),
        other => ApiError::transport(operation, other.to_string()),
    }
}

fn quantities(values: &BTreeMap<String, String>) -> Option<BTreeMap<String, Quantity>> {
    if values.is_empty() {
        return None;
    }
    Some(
        values
            .iter()
            .map(|(k, v)| (k.clone(), Quantity(v.clone())))
            .collect(),
    )
}

fn quantity_strings(values: Option<&BTreeMap<String, Quantity>>) -> BTreeMap<String, String> {
    values
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.0.clone())).collect())
        .unwrap_or_default()
}

/// Render the Deployment for a workload
pub(crate) fn deployment_for(workload: &WorkloadResource) -> Deployment {
    let spec = &workload.spec;

    let env = spec
        .env
        .iter()
        .map(|(k, v)| EnvVar {
            name: k.clone(),
            value: Some(v.clone()),
            ..Default::default()
        })
        .collect::<Vec<_>>();

    let container = Container {
        name: spec.name.clone(),
        image: Some(spec.image.clone()),
        env: Some(env),
        ports: spec.container_port.map(|port| {
            vec![ContainerPort {
                container_port: port,
                ..Default::default()
            }]
        }),
        resources: Some(ResourceRequirements {
            requests: quantities(&spec.resource_requests),
            limits: quantities(&spec.resource_limits),
            ..Default::default()
        }),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: Some(spec.labels.clone()),
            resource_version: workload.resource_version.clone(),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(spec.replicas),
            selector: LabelSelector {
                match_labels: Some(spec.labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(spec.labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    restart_policy: Some("Always".to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Read back the fields this adapter manages from a Deployment
pub(crate) fn workload_from(namespace: &str, deployment: Deployment) -> WorkloadResource {
    let metadata = deployment.metadata;
    let spec = deployment.spec.unwrap_or_default();
    let container = spec
        .template
        .spec
        .and_then(|pod| pod.containers.into_iter().next())
        .unwrap_or_default();

    let env = container
        .env
        .unwrap_or_default()
        .into_iter()
        .filter_map(|e| e.value.map(|v| (e.name, v)))
        .collect();
    let resources = container.resources.unwrap_or_default();

    WorkloadResource {
        spec: WorkloadSpec {
            name: metadata.name.unwrap_or_default(),
            image: container.image.unwrap_or_default(),
            namespace: metadata.namespace.unwrap_or_else(|| namespace.to_string()),
            replicas: spec.replicas.unwrap_or(1),
            env,
            resource_requests: quantity_strings(resources.requests.as_ref()),
            resource_limits: quantity_strings(resources.limits.as_ref()),
            labels: metadata.labels.unwrap_or_default(),
            container_port: container
                .ports
                .and_then(|ports| ports.first().map(|p| p.container_port)),
        },
        resource_version: metadata.resource_version,
        ready_replicas: deployment.status.and_then(|s| s.ready_replicas),
    }
}

/// Summarize a Pod as an instance status
pub(crate) fn instance_from(pod: Pod) -> InstanceStatus {
    let status = pod.status.unwrap_or_default();
    InstanceStatus {
        name: pod.metadata.name.unwrap_or_default(),
        conditions: status
            .conditions
            .unwrap_or_default()
            .into_iter()
            .map(|c| InstanceCondition {
                kind: c.type_,
                status: c.status == "True",
            })
            .collect(),
        started_at: status.start_time.map(|t| t.0),
    }
}

/// Render the HorizontalPodAutoscaler targeting a Deployment
pub(crate) fn autoscaler_for(autoscaler: &AutoscalerResource) -> HorizontalPodAutoscaler {
    let AutoscaleSpec {
        min_replicas,
        max_replicas,
        target_utilization_percent,
    } = autoscaler.bounds;

    HorizontalPodAutoscaler {
        metadata: ObjectMeta {
            name: Some(autoscaler.name.clone()),
            ..Default::default()
        },
        spec: Some(HorizontalPodAutoscalerSpec {
            min_replicas: Some(min_replicas),
            max_replicas,
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".to_string()),
                kind: "Deployment".to_string(),
                name: autoscaler.target_name.clone(),
            },
            target_cpu_utilization_percentage: Some(target_utilization_percent),
        }),
        ..Default::default()
    }
}

#[async_trait]
impl OrchestrationApi for KubeOrchestrator {
    async fn get_workload(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Lookup<WorkloadResource>, ApiError> {
        let found = self
            .deployments(namespace)
            .get_opt(name)
            .await
            .map_err(|e| api_error("get_workload", e))?;

        Ok(match found {
            Some(deployment) => Lookup::Found(workload_from(namespace, deployment)),
            None => Lookup::NotFound,
        })
    }

    async fn create_workload(
        &self,
        namespace: &str,
        workload: &WorkloadResource,
    ) -> Result<(), ApiError> {
        let mut deployment = deployment_for(workload);
        deployment.metadata.resource_version = None;

        self.deployments(namespace)
            .create(&PostParams::default(), &deployment)
            .await
            .map_err(|e| api_error("create_workload", e))?;
        Ok(())
    }

    async fn update_workload(
        &self,
        namespace: &str,
        name: &str,
        workload: &WorkloadResource,
    ) -> Result<(), ApiError> {
        // A resourceVersion in the patch body makes the server reject the
        // write with 409 if the object changed since it was read.
        let deployment = deployment_for(workload);

        self.deployments(namespace)
            .patch(name, &PatchParams::default(), &Patch::Strategic(&deployment))
            .await
            .map_err(|e| api_error("update_workload", e))?;
        Ok(())
    }

    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<Removal, ApiError> {
        match self
            .deployments(namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(Removal::Deleted),
            Err(kube::Error::Api(response)) if response.code == 404 => {
                debug!(deployment = %name, "Deployment not found during delete");
                Ok(Removal::NotFound)
            }
            Err(e) => Err(api_error("delete_workload", e)),
        }
    }

    async fn patch_scale(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ApiError> {
        let body = serde_json::json!({ "spec": { "replicas": replicas } });

        self.deployments(namespace)
            .patch_scale(name, &PatchParams::default(), &Patch::Merge(&body))
            .await
            .map_err(|e| api_error("patch_scale", e))?;
        Ok(())
    }

    async fn list_instances(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<InstanceStatus>, ApiError> {
        let pods = self
            .pods(namespace)
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| api_error("list_instances", e))?;

        Ok(pods.items.into_iter().map(instance_from).collect())
    }

    async fn create_autoscaler(
        &self,
        namespace: &str,
        autoscaler: &AutoscalerResource,
    ) -> Result<Creation, ApiError> {
        match self
            .autoscalers(namespace)
            .create(&PostParams::default(), &autoscaler_for(autoscaler))
            .await
        {
            Ok(_) => Ok(Creation::Created),
            Err(kube::Error::Api(response)) if response.code == 409 => {
                Ok(Creation::AlreadyExists)
            }
            Err(e) => Err(api_error("create_autoscaler", e)),
        }
    }

    async fn delete_autoscaler(&self, namespace: &str, name: &str) -> Result<Removal, ApiError> {
        match self
            .autoscalers(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(Removal::Deleted),
            Err(kube::Error::Api(response)) if response.code == 404 => {
                debug!(autoscaler = %name, "HPA not found during delete");
                Ok(Removal::NotFound)
            }
            Err(e) => Err(api_error("delete_autoscaler", e)),
        }
    }
}
