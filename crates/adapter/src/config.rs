//! Adapter configuration
//!
//! Read from an optional TOML file (`K8S_AGENT_CONFIG`, default
//! `k8s-agent.toml`) overlaid with `K8S_AGENT_*` environment variables, where
//! `__` separates nested keys, e.g. `K8S_AGENT_WORKLOAD__IMAGE`. Keys of the
//! user-keyed `[workload]` maps (`env`, `labels`, ...) keep their spelling.

use adapter_lib::{AdapterSettings, KEYED_TABLES};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "K8S_AGENT_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "k8s-agent.toml";

const ENV_PREFIX: &str = "K8S_AGENT";
const ENV_SEPARATOR: &str = "__";

/// Adapter configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Name of the agent the workload is provisioned for
    #[serde(default = "default_agent_name")]
    pub agent_name: String,

    /// Explicit kubeconfig; in-cluster or default discovery otherwise
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    /// Run against an in-process cluster instead of Kubernetes
    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub workload: AdapterSettings,
}

/// Health and metrics server settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
        }
    }
}

fn default_agent_name() -> String {
    "agent".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl AgentConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self> {
        let (path, required) = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => (PathBuf::from(path), true),
            Err(_) => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()))
            }
        };

        Self::parse(&contents, environment_vars())
            .with_context(|| format!("failed to load configuration from {}", path.display()))
    }

    /// Parse configuration from TOML text, still honoring the environment
    pub fn from_toml(contents: &str) -> Result<Self> {
        Self::parse(contents, environment_vars())
    }

    fn parse(contents: &str, vars: config::Map<String, String>) -> Result<Self> {
        let keys = keyed_names(contents, &vars)?;

        let mut config: AgentConfig = config::Config::builder()
            .add_source(config::File::from_str(contents, config::FileFormat::Toml))
            .add_source(environment(vars))
            .build()?
            .try_deserialize()?;
        config.workload.restore_key_case(keys);
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.agent_name.is_empty() {
            anyhow::bail!("agent_name must not be empty");
        }
        self.workload.validate()?;
        Ok(())
    }
}

/// Process environment, minus the config file path itself
fn environment_vars() -> config::Map<String, String> {
    std::env::vars()
        .filter(|(key, _)| key != CONFIG_PATH_ENV)
        .collect()
}

fn environment(vars: config::Map<String, String>) -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
        .source(Some(vars))
}

/// `(table, key)` pairs of the `[workload]` maps as written in the file and
/// in `K8S_AGENT_WORKLOAD__<TABLE>__<KEY>` variables
fn keyed_names(
    contents: &str,
    vars: &config::Map<String, String>,
) -> Result<Vec<(String, String)>> {
    let raw: toml::Table = toml::from_str(contents).context("invalid TOML")?;
    let mut keys = Vec::new();

    if let Some(workload) = raw.get("workload").and_then(|w| w.as_table()) {
        for table in KEYED_TABLES {
            if let Some(entries) = workload.get(table).and_then(|t| t.as_table()) {
                keys.extend(entries.keys().map(|k| (table.to_string(), k.clone())));
            }
        }
    }

    let prefix = format!("{}_WORKLOAD{}", ENV_PREFIX, ENV_SEPARATOR);
    for name in vars.keys() {
        let Some(path) = name.strip_prefix(&prefix) else {
            continue;
        };
        if let Some((table, key)) = path.split_once(ENV_SEPARATOR) {
            keys.push((table.to_lowercase(), key.to_string()));
        }
    }

    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = AgentConfig::from_toml("").unwrap();
        assert_eq!(config.agent_name, "agent");
        assert_eq!(config.server.api_port, 8080);
        assert!(!config.dry_run);
        assert_eq!(config.workload, AdapterSettings::default());
    }

    #[test]
    fn test_full_file() {
        let config = AgentConfig::from_toml(
            r#"
            agent_name = "researcher"
            dry_run = true

            [server]
            api_port = 9091

            [workload]
            namespace = "agents"
            image = "ghcr.io/org/agent:latest"
            replicas = 2
            autoscale = true
            hpa_max_replicas = 5
            readiness_timeout_secs = 60

            [workload.env]
            MODE = "remote"

            [workload.rate_limiter]
            max_calls = 10
            period_ms = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.agent_name, "researcher");
        assert!(config.dry_run);
        assert_eq!(config.server.api_port, 9091);
        assert_eq!(config.workload.namespace, "agents");
        assert_eq!(config.workload.replicas, 2);
        assert_eq!(config.workload.hpa_max_replicas, 5);
        assert_eq!(config.workload.env["MODE"], "remote");
        assert_eq!(config.workload.rate_limiter.unwrap().max_calls, 10);
    }

    fn vars(pairs: &[(&str, &str)]) -> config::Map<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_environment_overlay() {
        let config = AgentConfig::parse(
            "[workload]\nimage = \"a\"",
            vars(&[
                ("K8S_AGENT_AGENT_NAME", "planner"),
                ("K8S_AGENT_WORKLOAD__REPLICAS", "3"),
                ("K8S_AGENT_WORKLOAD__IMAGE", "b"),
                ("UNRELATED", "x"),
            ]),
        )
        .unwrap();

        assert_eq!(config.agent_name, "planner");
        assert_eq!(config.workload.replicas, 3);
        assert_eq!(config.workload.image.as_deref(), Some("b"));
    }

    #[test]
    fn test_map_keys_keep_their_case() {
        let config = AgentConfig::parse(
            r#"
            [workload.env]
            EXAMPLE_VAR = "value"
            lower = "kept"

            [workload.labels]
            Tier = "gold"

            [workload.resource_limits]
            cpu = "500m"
            "#,
            vars(&[
                ("K8S_AGENT_WORKLOAD__ENV__API_KEY", "secret"),
                ("K8S_AGENT_WORKLOAD__ENV__EXAMPLE_VAR", "override"),
            ]),
        )
        .unwrap();

        let env = &config.workload.env;
        assert_eq!(env.len(), 3, "unexpected env keys: {:?}", env.keys());
        assert_eq!(env["EXAMPLE_VAR"], "override");
        assert_eq!(env["API_KEY"], "secret");
        assert_eq!(env["lower"], "kept");
        assert_eq!(config.workload.labels["Tier"], "gold");
        assert_eq!(config.workload.resource_limits["cpu"], "500m");
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(AgentConfig::from_toml("agent_nmae = \"typo\"").is_err());
        assert!(AgentConfig::from_toml("[workload]\nimage_tag = \"v1\"").is_err());
        assert!(AgentConfig::from_toml("[server]\nport = 1").is_err());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(AgentConfig::from_toml("[workload]\nreplicas = -2").is_err());
        assert!(AgentConfig::from_toml("agent_name = \"\"").is_err());
    }
}
