//! Organ configuration

use crate::engine::{Engine, LaunchEngine, MockEngine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Which backend builds and runs graphs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Installed `gst-launch-1.0` / `gst-inspect-1.0`
    #[default]
    Launch,
    /// In-process simulation with a fixed element catalogue
    Mock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganConfig {
    pub engine: EngineKind,

    /// Synchronous run bound when the caller gives none
    pub default_timeout_secs: f64,

    /// Bus messages kept per background pipeline
    pub message_log_capacity: usize,

    pub gst_launch_bin: String,
    pub gst_inspect_bin: String,
}

impl Default for OrganConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::Launch,
            default_timeout_secs: 5.0,
            message_log_capacity: 100,
            gst_launch_bin: "gst-launch-1.0".to_string(),
            gst_inspect_bin: "gst-inspect-1.0".to_string(),
        }
    }
}

impl OrganConfig {
    pub fn build_engine(&self) -> Arc<dyn Engine> {
        match self.engine {
            EngineKind::Launch => Arc::new(LaunchEngine::with_binaries(
                self.gst_launch_bin.clone(),
                self.gst_inspect_bin.clone(),
            )),
            EngineKind::Mock => Arc::new(MockEngine::new()),
        }
    }

    /// `None` when the default is zero or negative, meaning no bound
    pub fn default_timeout(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(self.default_timeout_secs)
            .ok()
            .filter(|timeout| !timeout.is_zero())
    }
}
