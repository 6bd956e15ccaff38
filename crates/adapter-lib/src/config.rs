//! Workload settings recognized by the adapter
//!
//! Every option is listed here with its default; unknown keys are rejected
//! at deserialization time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AdapterError, AdapterResult};
use crate::models::{AutoscaleSpec, WorkloadSpec};
use crate::rate_limiter::RateLimiter;

/// Settings tables whose keys are chosen by the user
pub const KEYED_TABLES: [&str; 4] = ["labels", "env", "resource_requests", "resource_limits"];

/// Outbound call budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimiterSettings {
    /// Calls allowed per period
    pub max_calls: usize,
    /// Sliding window length in milliseconds
    pub period_ms: u64,
}

impl RateLimiterSettings {
    pub fn build(&self) -> AdapterResult<RateLimiter> {
        RateLimiter::new(self.max_calls, Duration::from_millis(self.period_ms))
    }
}

/// Workload settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdapterSettings {
    /// Namespace the workload lives in
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Container image; required to provision
    #[serde(default)]
    pub image: Option<String>,

    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Pod labels; defaults to `app=<workload name>` when empty
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Resource requests, e.g. `cpu = "250m"`
    #[serde(default)]
    pub resource_requests: BTreeMap<String, String>,

    #[serde(default)]
    pub resource_limits: BTreeMap<String, String>,

    #[serde(default)]
    pub container_port: Option<i32>,

    /// Create an autoscaler during initialization
    #[serde(default)]
    pub autoscale: bool,

    #[serde(default = "default_hpa_min_replicas")]
    pub hpa_min_replicas: i32,

    #[serde(default = "default_hpa_max_replicas")]
    pub hpa_max_replicas: i32,

    #[serde(default = "default_target_utilization")]
    pub target_utilization_percent: i32,

    /// Leave the workload running on shutdown
    #[serde(default)]
    pub persistence_on_shutdown: bool,

    #[serde(default = "default_readiness_timeout")]
    pub readiness_timeout_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default)]
    pub rate_limiter: Option<RateLimiterSettings>,

    /// Prefix of the workload name, `<prefix>-<agent name>`
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_replicas() -> i32 {
    1
}

fn default_hpa_min_replicas() -> i32 {
    1
}

fn default_hpa_max_replicas() -> i32 {
    3
}

fn default_target_utilization() -> i32 {
    80
}

fn default_readiness_timeout() -> u64 {
    120
}

fn default_poll_interval() -> u64 {
    2
}

fn default_name_prefix() -> String {
    "mcp-agent".to_string()
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            image: None,
            replicas: default_replicas(),
            labels: BTreeMap::new(),
            env: BTreeMap::new(),
            resource_requests: BTreeMap::new(),
            resource_limits: BTreeMap::new(),
            container_port: None,
            autoscale: false,
            hpa_min_replicas: default_hpa_min_replicas(),
            hpa_max_replicas: default_hpa_max_replicas(),
            target_utilization_percent: default_target_utilization(),
            persistence_on_shutdown: false,
            readiness_timeout_secs: default_readiness_timeout(),
            poll_interval_secs: default_poll_interval(),
            rate_limiter: None,
            name_prefix: default_name_prefix(),
        }
    }
}

impl AdapterSettings {
    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> AdapterResult<()> {
        if self.namespace.is_empty() {
            return Err(AdapterError::Config("namespace must not be empty".into()));
        }
        if self.name_prefix.is_empty() {
            return Err(AdapterError::Config("name_prefix must not be empty".into()));
        }
        if self.replicas < 0 {
            return Err(AdapterError::Config(format!(
                "replicas must be non-negative, got {}",
                self.replicas
            )));
        }
        if let Some(port) = self.container_port {
            if !(1..=65535).contains(&port) {
                return Err(AdapterError::Config(format!(
                    "container_port out of range: {}",
                    port
                )));
            }
        }
        if self.readiness_timeout_secs == 0 {
            return Err(AdapterError::Config(
                "readiness_timeout_secs must be positive".into(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(AdapterError::Config(
                "poll_interval_secs must be positive".into(),
            ));
        }
        if self.autoscale {
            self.autoscale_spec()
                .validate()
                .map_err(|e| AdapterError::Config(e.to_string()))?;
        }
        if let Some(limiter) = &self.rate_limiter {
            limiter.build()?;
        }
        Ok(())
    }

    /// Workload name for an agent
    pub fn workload_name(&self, agent_name: &str) -> String {
        WorkloadSpec::resource_name(&self.name_prefix, agent_name)
    }

    /// Desired workload for an agent
    pub fn workload_spec(&self, agent_name: &str) -> WorkloadSpec {
        let name = self.workload_name(agent_name);
        let labels = if self.labels.is_empty() {
            WorkloadSpec::default_labels(&name)
        } else {
            self.labels.clone()
        };

        WorkloadSpec {
            name,
            image: self.image.clone().unwrap_or_default(),
            namespace: self.namespace.clone(),
            replicas: self.replicas,
            env: self.env.clone(),
            resource_requests: self.resource_requests.clone(),
            resource_limits: self.resource_limits.clone(),
            labels,
            container_port: self.container_port,
        }
    }

    /// Autoscaling bounds as configured (not validated)
    pub fn autoscale_spec(&self) -> AutoscaleSpec {
        AutoscaleSpec {
            min_replicas: self.hpa_min_replicas,
            max_replicas: self.hpa_max_replicas,
            target_utilization_percent: self.target_utilization_percent,
        }
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    fn keyed_table_mut(&mut self, table: &str) -> Option<&mut BTreeMap<String, String>> {
        match table {
            "labels" => Some(&mut self.labels),
            "env" => Some(&mut self.env),
            "resource_requests" => Some(&mut self.resource_requests),
            "resource_limits" => Some(&mut self.resource_limits),
            _ => None,
        }
    }

    /// Put back the spelling of user-chosen keys.
    ///
    /// Layered loaders fold map keys to lowercase. `keys` are `(table, key)`
    /// pairs as originally written; pairs naming another table, or with no
    /// folded entry present, are skipped.
    pub fn restore_key_case<I, T, K>(&mut self, keys: I)
    where
        I: IntoIterator<Item = (T, K)>,
        T: AsRef<str>,
        K: AsRef<str>,
    {
        for (table, key) in keys {
            let key = key.as_ref();
            let Some(map) = self.keyed_table_mut(table.as_ref()) else {
                continue;
            };
            let folded = key.to_lowercase();
            if folded == key {
                continue;
            }
            if let Some(value) = map.remove(&folded) {
                map.insert(key.to_string(), value);
            }
        }
    }

    /// Shared limiter for outbound calls, when one is configured
    pub fn build_rate_limiter(&self) -> AdapterResult<Option<Arc<RateLimiter>>> {
        self.rate_limiter
            .as_ref()
            .map(|s| s.build().map(Arc::new))
            .transpose()
    }
}
