//! Orchestration API seam
//!
//! The lifecycle core talks to the cluster only through [`OrchestrationApi`].
//! Two backends are provided: [`KubeOrchestrator`] for a real Kubernetes
//! cluster and [`InMemoryCluster`] for tests and dry runs. [`Throttled`]
//! wraps either one behind a shared [`RateLimiter`].

mod kube_client;
mod memory;

pub use kube_client::KubeOrchestrator;
pub use memory::{ApiCall, InMemoryCluster};

use crate::error::ApiError;
use crate::models::{AutoscalerResource, InstanceStatus, WorkloadResource};
use crate::rate_limiter::RateLimiter;
use serde::Serialize;
use std::sync::Arc;

pub use async_trait::async_trait;

/// Result of a read that may find nothing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }
}

/// Result of a delete against a resource that may already be gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Removal {
    Deleted,
    NotFound,
}

/// Result of a create that tolerates prior existence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Creation {
    Created,
    AlreadyExists,
}

/// Capability set the lifecycle core requires from the cluster
#[async_trait]
pub trait OrchestrationApi: Send + Sync {
    async fn get_workload(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Lookup<WorkloadResource>, ApiError>;

    /// Create a workload; an existing one with the same name is a conflict fault
    async fn create_workload(
        &self,
        namespace: &str,
        workload: &WorkloadResource,
    ) -> Result<(), ApiError>;

    async fn update_workload(
        &self,
        namespace: &str,
        name: &str,
        workload: &WorkloadResource,
    ) -> Result<(), ApiError>;

    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<Removal, ApiError>;

    async fn patch_scale(&self, namespace: &str, name: &str, replicas: i32)
        -> Result<(), ApiError>;

    async fn list_instances(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<InstanceStatus>, ApiError>;

    async fn create_autoscaler(
        &self,
        namespace: &str,
        autoscaler: &AutoscalerResource,
    ) -> Result<Creation, ApiError>;

    async fn delete_autoscaler(&self, namespace: &str, name: &str) -> Result<Removal, ApiError>;
}

#[async_trait]
impl<T: OrchestrationApi + ?Sized> OrchestrationApi for Arc<T> {
    async fn get_workload(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Lookup<WorkloadResource>, ApiError> {
        (**self).get_workload(namespace, name).await
    }

    async fn create_workload(
        &self,
        namespace: &str,
        workload: &WorkloadResource,
    ) -> Result<(), ApiError> {
        (**self).create_workload(namespace, workload).await
    }

    async fn update_workload(
        &self,
        namespace: &str,
        name: &str,
        workload: &WorkloadResource,
    ) -> Result<(), ApiError> {
        (**self).update_workload(namespace, name, workload).await
    }

    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<Removal, ApiError> {
        (**self).delete_workload(namespace, name).await
    }

    async fn patch_scale(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ApiError> {
        (**self).patch_scale(namespace, name, replicas).await
    }

    async fn list_instances(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<InstanceStatus>, ApiError> {
        (**self).list_instances(namespace, label_selector).await
    }

    async fn create_autoscaler(
        &self,
        namespace: &str,
        autoscaler: &AutoscalerResource,
    ) -> Result<Creation, ApiError> {
        (**self).create_autoscaler(namespace, autoscaler).await
    }

    async fn delete_autoscaler(&self, namespace: &str, name: &str) -> Result<Removal, ApiError> {
        (**self).delete_autoscaler(namespace, name).await
    }
}

/// Wrap `api` in a [`Throttled`] layer when a limiter is configured
pub fn with_rate_limit(
    api: Arc<dyn OrchestrationApi>,
    limiter: Option<Arc<RateLimiter>>,
) -> Arc<dyn OrchestrationApi> {
    match limiter {
        Some(limiter) => Arc::new(Throttled::new(api, limiter)),
        None => api,
    }
}

/// Gates every call to the inner API through a shared rate limiter
pub struct Throttled<A> {
    inner: A,
    limiter: Arc<RateLimiter>,
}

impl<A> Throttled<A> {
    pub fn new(inner: A, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, limiter }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }
}

#[async_trait]
impl<A: OrchestrationApi> OrchestrationApi for Throttled<A> {
    async fn get_workload(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Lookup<WorkloadResource>, ApiError> {
        self.limiter
            .throttle(self.inner.get_workload(namespace, name))
            .await
    }

    async fn create_workload(
        &self,
        namespace: &str,
        workload: &WorkloadResource,
    ) -> Result<(), ApiError> {
        self.limiter
            .throttle(self.inner.create_workload(namespace, workload))
            .await
    }

    async fn update_workload(
        &self,
        namespace: &str,
        name: &str,
        workload: &WorkloadResource,
    ) -> Result<(), ApiError> {
        self.limiter
            .throttle(self.inner.update_workload(namespace, name, workload))
            .await
    }

    async fn delete_workload(&self, namespace: &str, name: &str) -> Result<Removal, ApiError> {
        self.limiter
            .throttle(self.inner.delete_workload(namespace, name))
            .await
    }

    async fn patch_scale(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), ApiError> {
        self.limiter
            .throttle(self.inner.patch_scale(namespace, name, replicas))
            .await
    }

    async fn list_instances(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<InstanceStatus>, ApiError> {
        self.limiter
            .throttle(self.inner.list_instances(namespace, label_selector))
            .await
    }

    async fn create_autoscaler(
        &self,
        namespace: &str,
        autoscaler: &AutoscalerResource,
    ) -> Result<Creation, ApiError> {
        self.limiter
            .throttle(self.inner.create_autoscaler(namespace, autoscaler))
            .await
    }

    async fn delete_autoscaler(&self, namespace: &str, name: &str) -> Result<Removal, ApiError> {
        self.limiter
            .throttle(self.inner.delete_autoscaler(namespace, name))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::Instant;

    #[test]
    fn test_lookup_into_option() {
        assert_eq!(Lookup::Found(3).into_option(), Some(3));
        assert_eq!(Lookup::<i32>::NotFound.into_option(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_api_spaces_out_calls() {
        let limiter = Arc::new(RateLimiter::new(2, Duration::from_secs(1)).unwrap());
        let api = Throttled::new(InMemoryCluster::new(), Arc::clone(&limiter));
        let start = Instant::now();

        for _ in 0..3 {
            api.delete_workload("default", "absent").await.unwrap();
        }

        assert!(start.elapsed() >= Duration::from_secs(1));
        assert_eq!(api.inner().calls().await.len(), 3);
        assert_eq!(api.limiter().capacity(), 2);
    }
}
