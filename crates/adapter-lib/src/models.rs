//! Core data models for the workload adapter

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{AdapterError, AdapterResult};

/// Condition kind reported by an instance once it can serve traffic
pub const READY_CONDITION: &str = "Ready";

/// Desired state of the workload hosting the agent process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub name: String,
    pub image: String,
    pub namespace: String,
    pub replicas: i32,
    pub env: BTreeMap<String, String>,
    pub resource_requests: BTreeMap<String, String>,
    pub resource_limits: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub container_port: Option<i32>,
}

impl WorkloadSpec {
    /// Deterministic resource name for an agent, e.g. `mcp-agent-researcher`
    pub fn resource_name(prefix: &str, agent_name: &str) -> String {
        format!("{}-{}", prefix, agent_name)
    }

    /// Labels used when none are configured: a single `app=<name>` entry
    pub fn default_labels(name: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("app".to_string(), name.to_string())])
    }

    /// Label selector matching the instances of this workload
    pub fn label_selector(&self) -> String {
        label_selector(&self.labels)
    }
}

/// Render a `k=v,k2=v2` selector from a label map
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a `k=v,k2=v2` selector back into its terms
pub fn parse_label_selector(selector: &str) -> Vec<(String, String)> {
    selector
        .split(',')
        .filter_map(|term| {
            let (k, v) = term.split_once('=')?;
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}

/// Autoscaling bounds attached to a workload by shared name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoscaleSpec {
    pub min_replicas: i32,
    pub max_replicas: i32,
    pub target_utilization_percent: i32,
}

impl AutoscaleSpec {
    /// Build and validate autoscaling bounds
    pub fn new(
        min_replicas: i32,
        max_replicas: i32,
        target_utilization_percent: i32,
    ) -> AdapterResult<Self> {
        let spec = Self {
            min_replicas,
            max_replicas,
            target_utilization_percent,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> AdapterResult<()> {
        if self.min_replicas < 1 {
            return Err(AdapterError::Validation(format!(
                "autoscaler min_replicas must be at least 1, got {}",
                self.min_replicas
            )));
        }
        if self.max_replicas < self.min_replicas {
            return Err(AdapterError::Validation(format!(
                "autoscaler max_replicas ({}) is below min_replicas ({})",
                self.max_replicas, self.min_replicas
            )));
        }
        if !(1..=100).contains(&self.target_utilization_percent) {
            return Err(AdapterError::Validation(format!(
                "target utilization must be within 1..=100 percent, got {}",
                self.target_utilization_percent
            )));
        }
        Ok(())
    }
}

/// Lifecycle of the provisioned workload as seen by its controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Provisioning,
    Ready,
    ShuttingDown,
    Terminated,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Provisioning => "provisioning",
            LifecycleState::Ready => "ready",
            LifecycleState::ShuttingDown => "shutting_down",
            LifecycleState::Terminated => "terminated",
        }
    }

    /// Numeric encoding for the lifecycle gauge
    pub fn as_gauge(&self) -> i64 {
        match self {
            LifecycleState::Uninitialized => 0,
            LifecycleState::Provisioning => 1,
            LifecycleState::Ready => 2,
            LifecycleState::ShuttingDown => 3,
            LifecycleState::Terminated => 4,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a shutdown ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownOutcome {
    /// Autoscaler and workload were deleted
    TornDown,
    /// Persistence was requested; the workload was left running
    Retained,
}

/// Workload as stored by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadResource {
    pub spec: WorkloadSpec,
    /// Version observed on read; sent back as a precondition on update
    pub resource_version: Option<String>,
    pub ready_replicas: Option<i32>,
}

impl WorkloadResource {
    /// Desired-state resource, not yet read from the cluster
    pub fn desired(spec: WorkloadSpec) -> Self {
        Self {
            spec,
            resource_version: None,
            ready_replicas: None,
        }
    }
}

/// Autoscaler targeting a workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoscalerResource {
    pub name: String,
    pub target_name: String,
    pub bounds: AutoscaleSpec,
}

/// A named boolean condition reported by an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceCondition {
    pub kind: String,
    pub status: bool,
}

/// Observed status of one running instance of the workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub name: String,
    pub conditions: Vec<InstanceCondition>,
    pub started_at: Option<DateTime<Utc>>,
}

impl InstanceStatus {
    /// True when the instance exposes a `Ready` condition set to true
    pub fn is_ready(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| c.kind == READY_CONDITION && c.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_name_and_default_labels() {
        let name = WorkloadSpec::resource_name("mcp-agent", "researcher");
        assert_eq!(name, "mcp-agent-researcher");

        let labels = WorkloadSpec::default_labels(&name);
        assert_eq!(labels.len(), 1);
        assert_eq!(labels["app"], "mcp-agent-researcher");
    }

    #[test]
    fn test_label_selector_is_sorted_and_parseable() {
        let labels = BTreeMap::from([
            ("tier".to_string(), "agents".to_string()),
            ("app".to_string(), "demo".to_string()),
        ]);
        let selector = label_selector(&labels);
        assert_eq!(selector, "app=demo,tier=agents");

        let terms = parse_label_selector(&selector);
        assert_eq!(
            terms,
            vec![
                ("app".to_string(), "demo".to_string()),
                ("tier".to_string(), "agents".to_string())
            ]
        );
    }

    #[test]
    fn test_autoscale_bounds_validation() {
        assert!(AutoscaleSpec::new(1, 3, 80).is_ok());
        assert!(AutoscaleSpec::new(2, 2, 100).is_ok());
        assert!(AutoscaleSpec::new(0, 3, 80).is_err());
        assert!(AutoscaleSpec::new(3, 2, 80).is_err());
        assert!(AutoscaleSpec::new(1, 3, 0).is_err());
        assert!(AutoscaleSpec::new(1, 3, 101).is_err());
    }

    #[test]
    fn test_instance_readiness() {
        let mut instance = InstanceStatus {
            name: "demo-0".to_string(),
            conditions: vec![InstanceCondition {
                kind: "PodScheduled".to_string(),
                status: true,
            }],
            started_at: None,
        };
        assert!(!instance.is_ready());

        instance.conditions.push(InstanceCondition {
            kind: READY_CONDITION.to_string(),
            status: false,
        });
        assert!(!instance.is_ready());

        instance.conditions[1].status = true;
        assert!(instance.is_ready());
    }

    #[test]
    fn test_lifecycle_state_serializes_snake_case() {
        let json = serde_json::to_string(&LifecycleState::ShuttingDown).unwrap();
        assert_eq!(json, "\"shutting_down\"");
        assert_eq!(LifecycleState::Ready.to_string(), "ready");
    }
}
