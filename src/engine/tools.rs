//! GStreamer command-line tool wrappers
//!
//! Everything the launch engine knows about the installed GStreamer comes from
//! shelling out to `gst-inspect-1.0` and `gst-launch-1.0` (no linking).

use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0} not found in system PATH")]
    NotInstalled(String),
    
    #[error("GStreamer tool execution failed: {0}")]
    ExecutionFailed(String),
    
    #[error("Invalid output: {0}")]
    InvalidOutput(String),
}

/// A program missing from PATH surfaces as NotFound when it is started
fn start_error(program: &str, e: std::io::Error) -> EngineError {
    match e.kind() {
        std::io::ErrorKind::NotFound => EngineError::NotInstalled(program.to_string()),
        _ => EngineError::ExecutionFailed(e.to_string()),
    }
}

pub struct GstCommand {
    program: String,
    args: Vec<String>,
}

impl GstCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }
    
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
    
    /// Run to completion and return the output even when the tool exits non-zero
    pub fn output(self) -> Result<Output, EngineError> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| start_error(&self.program, e))
    }
    
    /// Run to completion, failing on a non-zero exit status
    pub fn execute(self) -> Result<Output, EngineError> {
        let output = self.output()?;
        
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::ExecutionFailed(stderr.trim().to_string()));
        }
        
        Ok(output)
    }
    
    /// Start the tool with piped stdout/stderr, optionally inside `working_dir`
    pub fn spawn(self, working_dir: Option<&Path>) -> Result<Child, EngineError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }
        
        command.spawn().map_err(|e| start_error(&self.program, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_missing_tool_reported() {
        let result = GstCommand::new("gst-tool-that-does-not-exist").arg("x").output();
        assert!(matches!(result, Err(EngineError::NotInstalled(name)) if name == "gst-tool-that-does-not-exist"));
    }
    
    #[test]
    fn test_nonzero_exit_still_returns_output() {
        let output = GstCommand::new("sh").arg("-c").arg("echo out; exit 3").output().unwrap();
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "out");
        
        let result = GstCommand::new("sh").arg("-c").arg("echo broken >&2; exit 1").execute();
        assert!(matches!(result, Err(EngineError::ExecutionFailed(msg)) if msg == "broken"));
    }
    
    #[test]
    fn test_spawn_missing_tool() {
        let result = GstCommand::new("gst-tool-that-does-not-exist").spawn(None);
        assert!(matches!(result, Err(EngineError::NotInstalled(_))));
    }
}
