//! Background pipeline table
//!
//! One updater thread owns every [`PipelineHandle`]. Callers and bus
//! forwarders talk to it through a command channel, so nothing here is shared
//! behind a lock.

use super::RunState;
use crate::engine::{BusMessage, EngineState, Graph};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use super::PipelineError;

/// Messages returned by a status query
const RECENT_MESSAGES: usize = 10;
/// Description length shown in listings
const SUMMARY_WIDTH: usize = 100;

pub struct PipelineHandle {
    pub id: String,
    pub description: String,
    pub working_directory: Option<PathBuf>,
    pub state: RunState,
    pub pending: Option<EngineState>,
    pub last_error: Option<String>,
    pub messages: VecDeque<String>,
    pub started_at: DateTime<Utc>,
    capacity: usize,
    graph: Box<dyn Graph>,
}

impl PipelineHandle {
    pub fn new(
        id: String,
        description: String,
        working_directory: Option<PathBuf>,
        state: RunState,
        graph: Box<dyn Graph>,
        capacity: usize,
    ) -> Self {
        Self {
            id,
            description,
            working_directory,
            state,
            pending: None,
            last_error: None,
            messages: VecDeque::new(),
            started_at: Utc::now(),
            capacity: capacity.max(1),
            graph,
        }
    }

    fn log(&mut self, line: String) {
        while self.messages.len() >= self.capacity {
            self.messages.pop_front();
        }
        self.messages.push_back(line);
    }

    /// Fold one bus message into the record
    pub fn apply(&mut self, message: &BusMessage) {
        match message {
            BusMessage::Error { message, .. } => {
                self.state = RunState::Error;
                self.last_error = Some(message.clone());
                self.log(format!("ERROR: {}", message));
            }
            BusMessage::Eos => {
                self.state = RunState::Eos;
                self.log("End of stream".to_string());
            }
            BusMessage::StateChanged {
                from_pipeline: true,
                old,
                new,
                pending,
                ..
            } => {
                self.state = RunState::Engine(*new);
                self.pending = *pending;
                self.log(format!("State: {} -> {}", old, new));
            }
            BusMessage::StateChanged { .. } => {}
            BusMessage::Warning { message, .. } => self.log(format!("WARNING: {}", message)),
        }
    }

    pub fn status(&self) -> PipelineStatus {
        let (state, pending_state) = match self.graph.query_state() {
            Some(live) => (RunState::Engine(live.current), live.pending),
            None => (self.state, self.pending),
        };
        let skip = self.messages.len().saturating_sub(RECENT_MESSAGES);
        PipelineStatus {
            found: true,
            pipeline_id: self.id.clone(),
            state: Some(state),
            pending_state,
            error: self.last_error.clone(),
            recent_messages: self.messages.iter().skip(skip).cloned().collect(),
            pipeline: Some(self.description.clone()),
            working_directory: self.working_directory.clone(),
            started_at: Some(self.started_at),
        }
    }

    pub fn summary(&self) -> PipelineSummary {
        let pipeline = if self.description.chars().count() > SUMMARY_WIDTH {
            let head: String = self.description.chars().take(SUMMARY_WIDTH).collect();
            format!("{}...", head)
        } else {
            self.description.clone()
        };
        PipelineSummary {
            pipeline_id: self.id.clone(),
            state: self.state,
            pipeline,
            started_at: self.started_at,
        }
    }

    fn stop(&mut self) {
        self.graph.set_state(EngineState::Null);
        self.state = RunState::Stopped;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub found: bool,
    pub pipeline_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<RunState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_state: Option<EngineState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recent_messages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl PipelineStatus {
    pub fn not_found(id: &str) -> Self {
        Self {
            found: false,
            pipeline_id: id.to_string(),
            state: None,
            pending_state: None,
            error: None,
            recent_messages: Vec::new(),
            pipeline: None,
            working_directory: None,
            started_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StopReport {
    pub success: bool,
    pub pipeline_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub pipeline_id: String,
    pub state: RunState,
    pub pipeline: String,
    pub started_at: DateTime<Utc>,
}

enum RegistryCommand {
    Insert(Box<PipelineHandle>),
    Event { id: String, message: BusMessage },
    Status { id: String, reply: Sender<PipelineStatus> },
    Stop { id: String, reply: Sender<Option<StopReport>> },
    List { reply: Sender<Vec<PipelineSummary>> },
    Shutdown,
}

pub struct PipelineRegistry {
    commands: Sender<RegistryCommand>,
    updater: Option<JoinHandle<()>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        let (commands, inbox) = unbounded();
        let updater = thread::spawn(move || run_updater(inbox));
        Self {
            commands,
            updater: Some(updater),
        }
    }

    /// Track `handle` and forward every message from `bus` to it
    pub fn insert(&self, handle: PipelineHandle, bus: Receiver<BusMessage>) -> Result<(), PipelineError> {
        let id = handle.id.clone();
        self.commands
            .send(RegistryCommand::Insert(Box::new(handle)))
            .map_err(|_| PipelineError::Registry)?;

        let commands = self.commands.clone();
        thread::spawn(move || {
            for message in bus.iter() {
                let event = RegistryCommand::Event {
                    id: id.clone(),
                    message,
                };
                if commands.send(event).is_err() {
                    break;
                }
            }
            debug!("Bus of pipeline {} closed", id);
        });
        Ok(())
    }

    pub fn status(&self, id: &str) -> Result<PipelineStatus, PipelineError> {
        let (reply, response) = bounded(1);
        self.request(RegistryCommand::Status {
            id: id.to_string(),
            reply,
        })?;
        response.recv().map_err(|_| PipelineError::Registry)
    }

    pub fn stop(&self, id: &str) -> Result<StopReport, PipelineError> {
        let (reply, response) = bounded(1);
        self.request(RegistryCommand::Stop {
            id: id.to_string(),
            reply,
        })?;
        response
            .recv()
            .map_err(|_| PipelineError::Registry)?
            .ok_or_else(|| PipelineError::NotFound(id.to_string()))
    }

    pub fn list(&self) -> Result<Vec<PipelineSummary>, PipelineError> {
        let (reply, response) = bounded(1);
        self.request(RegistryCommand::List { reply })?;
        response.recv().map_err(|_| PipelineError::Registry)
    }

    fn request(&self, command: RegistryCommand) -> Result<(), PipelineError> {
        self.commands.send(command).map_err(|_| PipelineError::Registry)
    }
}

impl Default for PipelineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PipelineRegistry {
    fn drop(&mut self) {
        let _ = self.commands.send(RegistryCommand::Shutdown);
        if let Some(updater) = self.updater.take() {
            if updater.join().is_err() {
                warn!("Pipeline registry thread panicked");
            }
        }
    }
}

fn run_updater(inbox: Receiver<RegistryCommand>) {
    let mut pipelines: HashMap<String, PipelineHandle> = HashMap::new();

    for command in inbox.iter() {
        match command {
            RegistryCommand::Insert(handle) => {
                debug!("Tracking pipeline {}", handle.id);
                pipelines.insert(handle.id.clone(), *handle);
            }
            RegistryCommand::Event { id, message } => match pipelines.get_mut(&id) {
                Some(handle) => {
                    debug!("Pipeline {}: {:?}", id, message);
                    handle.apply(&message);
                }
                // stopped while the message was in flight
                None => debug!("Dropping message for unknown pipeline {}", id),
            },
            RegistryCommand::Status { id, reply } => {
                let status = pipelines
                    .get(&id)
                    .map(PipelineHandle::status)
                    .unwrap_or_else(|| PipelineStatus::not_found(&id));
                let _ = reply.send(status);
            }
            RegistryCommand::Stop { id, reply } => {
                let report = pipelines.remove(&id).map(|mut handle| {
                    handle.stop();
                    info!("🛑 Stopped pipeline {}", id);
                    StopReport {
                        success: true,
                        pipeline_id: id,
                        message: "Pipeline stopped".to_string(),
                    }
                });
                let _ = reply.send(report);
            }
            RegistryCommand::List { reply } => {
                let _ = reply.send(pipelines.values().map(PipelineHandle::summary).collect());
            }
            RegistryCommand::Shutdown => break,
        }
    }

    for (id, mut handle) in pipelines.drain() {
        debug!("Stopping pipeline {} on shutdown", id);
        handle.stop();
    }
}
