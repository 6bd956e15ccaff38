//! Configuration management for the CLI
//!
//! The CLI reads the same TOML file as the adapter; only the agent name,
//! kubeconfig, dry-run flag and `[workload]` section are used here.

use adapter_lib::{AdapterSettings, KEYED_TABLES};
use anyhow::{Context, Result};
use serde::de::IgnoredAny;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Adapter config file, as seen by the CLI
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub agent_name: Option<String>,
    pub kubeconfig: Option<PathBuf>,
    pub dry_run: Option<bool>,
    /// Adapter server settings, accepted and ignored
    #[serde(default, rename = "server")]
    _server: Option<IgnoredAny>,
    #[serde(default)]
    pub workload: AdapterSettings,
}

impl FileConfig {
    /// Load the config file, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let path = expand_home(path)?;
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Failed to load config file {}", path.display()))
    }

    fn parse(contents: &str) -> Result<Self> {
        let raw: toml::Table = toml::from_str(contents)?;
        let mut file: FileConfig = config::Config::builder()
            .add_source(config::File::from_str(contents, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        file.workload.restore_key_case(keyed_names(&raw));
        Ok(file)
    }
}

/// `(table, key)` pairs of the `[workload]` maps as written
fn keyed_names(raw: &toml::Table) -> Vec<(&str, &str)> {
    let Some(workload) = raw.get("workload").and_then(|w| w.as_table()) else {
        return Vec::new();
    };
    KEYED_TABLES
        .iter()
        .filter_map(|&table| {
            workload
                .get(table)
                .and_then(|t| t.as_table())
                .map(|entries| (table, entries))
        })
        .flat_map(|(table, entries)| entries.keys().map(move |k| (table, k.as_str())))
        .collect()
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &Path) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => {
            let home = dirs_next::home_dir().context("Could not determine home directory")?;
            Ok(home.join(rest))
        }
        Err(_) => Ok(path.to_path_buf()),
    }
}

/// Get kubeconfig path
pub fn kubeconfig_path(override_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = override_path {
        return expand_home(path);
    }

    if let Ok(path) = std::env::var("KUBECONFIG") {
        return Ok(PathBuf::from(path));
    }

    let home = dirs_next::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".kube").join("config"))
}

/// Name of the current kubeconfig context, if the file can be read
pub fn current_context(override_path: Option<&Path>) -> Option<String> {
    let path = kubeconfig_path(override_path).ok()?;
    kube::config::Kubeconfig::read_from(path)
        .ok()?
        .current_context
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_without_path_uses_defaults() {
        let config = FileConfig::load(None).unwrap();
        assert!(config.agent_name.is_none());
        assert_eq!(config.workload, AdapterSettings::default());
    }

    #[test]
    fn test_load_adapter_config_file() {
        let file = write_config(
            r#"
            agent_name = "researcher"

            [server]
            api_port = 9000

            [workload]
            namespace = "agents"
            image = "ghcr.io/org/agent:latest"
            "#,
        );

        let config = FileConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.agent_name.as_deref(), Some("researcher"));
        assert_eq!(config.workload.namespace, "agents");
        assert_eq!(
            config.workload.image.as_deref(),
            Some("ghcr.io/org/agent:latest")
        );
    }

    #[test]
    fn test_load_keeps_env_key_case() {
        let file = write_config(
            r#"
            [workload.env]
            OPENAI_API_KEY = "k"
            log_level = "debug"

            [workload.labels]
            Team = "research"
            "#,
        );

        let config = FileConfig::load(Some(file.path())).unwrap();
        let env = &config.workload.env;
        assert_eq!(env.len(), 2, "unexpected env keys: {:?}", env.keys());
        assert_eq!(env["OPENAI_API_KEY"], "k");
        assert_eq!(env["log_level"], "debug");
        assert_eq!(config.workload.labels["Team"], "research");
    }

    #[test]
    fn test_load_rejects_unknown_keys() {
        let file = write_config("[workload]\nreplica = 2\n");
        assert!(FileConfig::load(Some(file.path())).is_err());

        let file = write_config("[server]\nport = 1\n");
        assert!(FileConfig::load(Some(file.path())).is_ok());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(FileConfig::load(Some(Path::new("/nonexistent/kaa.toml"))).is_err());
    }

    #[test]
    fn test_kubeconfig_override_wins() {
        let path = kubeconfig_path(Some(Path::new("/tmp/kubeconfig"))).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/kubeconfig"));
    }

    #[test]
    fn test_expand_home() {
        let plain = expand_home(Path::new("/etc/kaa.toml")).unwrap();
        assert_eq!(plain, PathBuf::from("/etc/kaa.toml"));

        if let Some(home) = dirs_next::home_dir() {
            let expanded = expand_home(Path::new("~/kaa.toml")).unwrap();
            assert_eq!(expanded, home.join("kaa.toml"));
        }
    }
}
