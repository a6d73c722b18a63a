//! Pipeline validation and lifecycle
//!
//! - [`description`]: gst-launch text parsing and rendering
//! - [`Validator`]: construct-and-release checks with classified hints
//! - [`Executor`]: synchronous runs and background pipelines
//! - [`PipelineRegistry`]: the background pipeline table, owned by one updater thread

pub mod description;
mod executor;
mod registry;
mod validator;

pub use description::{DescriptionError, PipelineDescription};
pub use executor::{AsyncStart, Executor, RunReport, RunStatus};
pub use registry::{PipelineHandle, PipelineRegistry, PipelineStatus, PipelineSummary, StopReport};
pub use validator::{ElementEntry, FailureKind, ValidationReport, Validator};

use crate::engine::{EngineError, EngineState};
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Pipeline '{0}' not found")]
    NotFound(String),

    #[error("Invalid pipeline: {}", .0.errors.join("; "))]
    Validation(Box<ValidationReport>),

    #[error("{message}")]
    Runtime { message: String, debug: Option<String> },

    #[error("Failed to start pipeline")]
    StartFailed,

    #[error("Working directory does not exist: {}", .0.display())]
    WorkingDirectory(PathBuf),

    #[error(transparent)]
    Description(#[from] DescriptionError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Pipeline registry is not running")]
    Registry,
}

/// Lifecycle state of a tracked pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Starting,
    Engine(EngineState),
    Eos,
    Error,
    Stopped,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Starting => f.write_str("starting"),
            RunState::Engine(state) => f.write_str(state.nick()),
            RunState::Eos => f.write_str("eos"),
            RunState::Error => f.write_str("error"),
            RunState::Stopped => f.write_str("stopped"),
        }
    }
}

impl Serialize for RunState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Short opaque id handed out for background pipelines
pub fn new_pipeline_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_ids_are_short_and_distinct() {
        let a = new_pipeline_id();
        let b = new_pipeline_id();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_run_state_names() {
        assert_eq!(RunState::Starting.to_string(), "starting");
        assert_eq!(RunState::Engine(EngineState::Playing).to_string(), "playing");
        assert_eq!(serde_json::to_value(RunState::Eos).unwrap(), "eos");
    }
}
