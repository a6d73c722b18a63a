//! Runs validated pipelines, to completion or in the background

use super::registry::{PipelineHandle, PipelineRegistry, PipelineStatus, PipelineSummary, StopReport};
use super::validator::Validator;
use super::{new_pipeline_id, PipelineError, RunState};
use crate::engine::{BusMessage, Engine, EngineState, Graph, StateChange};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Eos,
    Timeout,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub success: bool,
    pub status: RunStatus,
    pub pipeline: String,
    pub message: String,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AsyncStart {
    pub success: bool,
    pub pipeline_id: String,
    pub state: RunState,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
}

enum Outcome {
    Eos,
    Error { message: String, debug: Option<String> },
    Timeout,
    Closed,
}

/// Block until the first error or end-of-stream, or until `timeout` passes
fn wait_for_terminal(bus: &Receiver<BusMessage>, timeout: Option<Duration>) -> Outcome {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        let received = match deadline {
            Some(deadline) => bus.recv_deadline(deadline),
            None => bus.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(BusMessage::Eos) => return Outcome::Eos,
            Ok(BusMessage::Error { message, debug, .. }) => return Outcome::Error { message, debug },
            Ok(_) => continue,
            Err(RecvTimeoutError::Timeout) => return Outcome::Timeout,
            Err(RecvTimeoutError::Disconnected) => return Outcome::Closed,
        }
    }
}

fn check_working_directory(dir: Option<&Path>) -> Result<(), PipelineError> {
    match dir {
        Some(dir) if !dir.is_dir() => Err(PipelineError::WorkingDirectory(dir.to_path_buf())),
        _ => Ok(()),
    }
}

pub struct Executor {
    validator: Validator,
    registry: PipelineRegistry,
    message_log_capacity: usize,
}

impl Executor {
    pub fn new(engine: Arc<dyn Engine>, message_log_capacity: usize) -> Self {
        Self {
            validator: Validator::new(engine),
            registry: PipelineRegistry::new(),
            message_log_capacity,
        }
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        self.validator.engine()
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Validate and build, leaving the graph in NULL
    fn prepare(&self, text: &str, working_directory: Option<&Path>) -> Result<Box<dyn Graph>, PipelineError> {
        check_working_directory(working_directory)?;
        self.validator
            .build(text, working_directory)
            .map_err(PipelineError::Validation)
    }

    fn play(graph: &mut dyn Graph) -> Result<(), PipelineError> {
        if graph.set_state(EngineState::Playing) == StateChange::Failure {
            graph.set_state(EngineState::Null);
            return Err(PipelineError::StartFailed);
        }
        Ok(())
    }

    /// Run `text` until end-of-stream, an error, or `timeout`.
    /// Hitting the timeout is a successful run that was still going.
    pub fn run_sync(
        &self,
        text: &str,
        timeout: Option<Duration>,
        working_directory: Option<&Path>,
    ) -> Result<RunReport, PipelineError> {
        let mut graph = self.prepare(text, working_directory)?;
        let bus = graph.bus();
        Self::play(graph.as_mut())?;
        info!("▶️  Running pipeline: {}", text);

        let started = Instant::now();
        let outcome = wait_for_terminal(&bus, timeout);
        let elapsed = started.elapsed().as_secs_f64();
        graph.set_state(EngineState::Null);

        let (status, message) = match outcome {
            Outcome::Eos => (RunStatus::Eos, "Pipeline completed (EOS)".to_string()),
            Outcome::Timeout => (RunStatus::Timeout, format!("Pipeline ran for {:.1}s (timeout)", elapsed)),
            Outcome::Error { message, debug } => {
                warn!("Pipeline failed: {}", message);
                return Err(PipelineError::Runtime { message, debug });
            }
            Outcome::Closed => {
                return Err(PipelineError::Runtime {
                    message: "Pipeline bus closed before end-of-stream".to_string(),
                    debug: None,
                })
            }
        };
        info!("✅ {}", message);

        Ok(RunReport {
            success: true,
            status,
            pipeline: text.to_string(),
            message,
            elapsed_secs: elapsed,
        })
    }

    /// Start `text` in the background and track it until stopped
    pub fn run_async(&self, text: &str, working_directory: Option<&Path>) -> Result<AsyncStart, PipelineError> {
        let mut graph = self.prepare(text, working_directory)?;
        let bus = graph.bus();
        Self::play(graph.as_mut())?;

        let state = graph
            .query_state()
            .map(|snapshot| RunState::Engine(snapshot.current))
            .unwrap_or(RunState::Starting);
        let id = new_pipeline_id();
        let handle = PipelineHandle::new(
            id.clone(),
            text.to_string(),
            working_directory.map(Path::to_path_buf),
            state,
            graph,
            self.message_log_capacity,
        );
        self.registry.insert(handle, bus)?;
        info!("▶️  Started pipeline {}: {}", id, text);

        Ok(AsyncStart {
            success: true,
            pipeline_id: id,
            state,
            message: "Pipeline started".to_string(),
            working_directory: working_directory.map(Path::to_path_buf),
        })
    }

    pub fn status(&self, id: &str) -> Result<PipelineStatus, PipelineError> {
        self.registry.status(id)
    }

    pub fn stop(&self, id: &str) -> Result<StopReport, PipelineError> {
        self.registry.stop(id)
    }

    pub fn list_running(&self) -> Result<Vec<PipelineSummary>, PipelineError> {
        self.registry.list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;

    fn executor() -> Executor {
        Executor::new(Arc::new(MockEngine::new()), 100)
    }

    #[test]
    fn test_run_sync_timeout_is_success() {
        let report = executor()
            .run_sync("fakesrc ! fakesink", Some(Duration::from_millis(100)), None)
            .unwrap();
        assert!(report.success);
        assert_eq!(report.status, RunStatus::Timeout);
        assert!(report.message.ends_with("(timeout)"));
    }

    #[test]
    fn test_run_sync_eos() {
        let report = executor()
            .run_sync("fakesrc num-buffers=10 ! fakesink", Some(Duration::from_secs(5)), None)
            .unwrap();
        assert_eq!(report.status, RunStatus::Eos);
        assert_eq!(report.message, "Pipeline completed (EOS)");
    }

    #[test]
    fn test_run_sync_runtime_error() {
        let err = executor()
            .run_sync("filesrc location=/nonexistent/clip.mp4 ! fakesink", None, None)
            .unwrap_err();
        match err {
            PipelineError::Runtime { message, debug } => {
                assert_eq!(message, "Resource not found.");
                assert!(debug.is_some());
            }
            other => panic!("expected runtime failure, got {other:?}"),
        }
    }

    #[test]
    fn test_run_sync_invalid_pipeline() {
        let err = executor().run_sync("nosuchelement ! fakesink", None, None).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(report) if !report.valid));
    }

    #[test]
    fn test_missing_working_directory() {
        let err = executor()
            .run_async("fakesrc ! fakesink", Some(Path::new("/nonexistent/dir")))
            .unwrap_err();
        assert!(matches!(err, PipelineError::WorkingDirectory(_)));
    }

    #[test]
    fn test_relative_paths_follow_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("in.raw"), b"data").unwrap();
        let report = executor()
            .run_sync(
                "filesrc location=in.raw ! filesink location=out.raw",
                Some(Duration::from_secs(5)),
                Some(dir.path()),
            )
            .unwrap();
        assert_eq!(report.status, RunStatus::Eos);
        assert!(dir.path().join("out.raw").exists());
    }

    #[test]
    fn test_async_lifecycle() {
        let executor = executor();
        let started = executor.run_async("videotestsrc ! fakesink", None).unwrap();
        assert_eq!(started.pipeline_id.len(), 8);
        assert_eq!(started.message, "Pipeline started");

        assert!(executor.status(&started.pipeline_id).unwrap().found);
        assert_eq!(executor.list_running().unwrap().len(), 1);

        executor.stop(&started.pipeline_id).unwrap();
        assert!(!executor.status(&started.pipeline_id).unwrap().found);
        assert!(matches!(
            executor.stop(&started.pipeline_id),
            Err(PipelineError::NotFound(_))
        ));
    }
}
