//! CLI command implementations

pub mod lifecycle;
pub mod status;

use adapter_lib::{AdapterSettings, OrchestrationApi, ResourceManager};
use std::path::PathBuf;
use std::sync::Arc;

use crate::output::OutputFormat;

/// Everything a command needs: resolved settings and a connected backend
pub struct Session {
    pub agent_name: String,
    pub settings: AdapterSettings,
    pub api: Arc<dyn OrchestrationApi>,
    pub kubeconfig: Option<PathBuf>,
    pub dry_run: bool,
    pub format: OutputFormat,
}

impl Session {
    pub fn workload_name(&self) -> String {
        self.settings.workload_name(&self.agent_name)
    }

    pub fn resources(&self) -> ResourceManager {
        ResourceManager::new(Arc::clone(&self.api), &self.settings.namespace)
    }
}
