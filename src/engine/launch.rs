//! Engine backed by the installed GStreamer command-line tools

use super::inspect::{parse_catalogue, parse_factory};
use super::messages::LaunchOutputParser;
use super::tools::{EngineError, GstCommand};
use super::{
    assemble, Assembly, BusMessage, ConstructionError, ElementFactory, Engine, EngineState, Graph, GraphLink,
    GraphNode, StateChange, StateSnapshot,
};
use crate::pipeline::description::PipelineDescription;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

pub struct LaunchEngine {
    launch_bin: String,
    inspect_bin: String,
    catalogue: Mutex<Option<Vec<String>>>,
    factories: Mutex<HashMap<String, Option<ElementFactory>>>,
}

impl LaunchEngine {
    pub fn new() -> Self {
        Self::with_binaries("gst-launch-1.0", "gst-inspect-1.0")
    }

    pub fn with_binaries(launch_bin: impl Into<String>, inspect_bin: impl Into<String>) -> Self {
        Self {
            launch_bin: launch_bin.into(),
            inspect_bin: inspect_bin.into(),
            catalogue: Mutex::new(None),
            factories: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for LaunchEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for LaunchEngine {
    fn name(&self) -> &str {
        "gst-launch"
    }

    fn element_names(&self) -> Result<Vec<String>, EngineError> {
        let mut cached = self.catalogue.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(names) = cached.as_ref() {
            return Ok(names.clone());
        }
        let output = GstCommand::new(&self.inspect_bin).execute()?;
        let names = parse_catalogue(&String::from_utf8_lossy(&output.stdout));
        debug!("{} lists {} elements", self.inspect_bin, names.len());
        *cached = Some(names.clone());
        Ok(names)
    }

    fn find_factory(&self, name: &str) -> Result<Option<ElementFactory>, EngineError> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || "_-+".contains(c)) {
            return Ok(None);
        }
        if let Some(hit) = self
            .factories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(hit.clone());
        }

        let output = GstCommand::new(&self.inspect_bin).arg(name).output()?;
        let factory = if output.status.success() {
            Some(parse_factory(name, &String::from_utf8_lossy(&output.stdout))?)
        } else {
            None
        };
        self.factories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), factory.clone());
        Ok(factory)
    }

    fn construct(
        &self,
        description: &PipelineDescription,
        working_directory: Option<&Path>,
    ) -> Result<Box<dyn Graph>, ConstructionError> {
        let assembly = assemble(description, |name| self.find_factory(name))?;
        Ok(Box::new(LaunchGraph::new(
            self.launch_bin.clone(),
            description.render(),
            working_directory.map(Path::to_path_buf),
            assembly,
        )))
    }
}

/// One `gst-launch-1.0` child process per playing graph
struct LaunchGraph {
    launch_bin: String,
    text: String,
    working_directory: Option<PathBuf>,
    nodes: Vec<GraphNode>,
    links: Vec<GraphLink>,
    bus_tx: Sender<BusMessage>,
    bus_rx: Receiver<BusMessage>,
    state: Arc<Mutex<StateSnapshot>>,
    stopping: Arc<AtomicBool>,
    child: Option<Child>,
    monitor: Option<JoinHandle<()>>,
}

impl LaunchGraph {
    fn new(launch_bin: String, text: String, working_directory: Option<PathBuf>, assembly: Assembly) -> Self {
        let (bus_tx, bus_rx) = unbounded();
        Self {
            launch_bin,
            text,
            working_directory,
            nodes: assembly.nodes,
            links: assembly.links,
            bus_tx,
            bus_rx,
            state: Arc::new(Mutex::new(StateSnapshot {
                current: EngineState::Null,
                pending: None,
            })),
            stopping: Arc::new(AtomicBool::new(false)),
            child: None,
            monitor: None,
        }
    }

    fn set_snapshot(&self, current: EngineState, pending: Option<EngineState>) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = StateSnapshot { current, pending };
    }

    fn start(&mut self) -> StateChange {
        let spawned = GstCommand::new(&self.launch_bin)
            .arg("-m")
            .arg(self.text.clone())
            .spawn(self.working_directory.as_deref());
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to start {}: {}", self.launch_bin, e);
                return StateChange::Failure;
            }
        };
        debug!("Spawned {} (pid {}) for: {}", self.launch_bin, child.id(), self.text);

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let bus = self.bus_tx.clone();
        let state = Arc::clone(&self.state);
        let stopping = Arc::clone(&self.stopping);

        self.stopping.store(false, Ordering::SeqCst);
        self.set_snapshot(EngineState::Null, Some(EngineState::Playing));
        self.monitor = Some(thread::spawn(move || monitor(stdout, stderr, bus, state, stopping)));
        self.child = Some(child);
        StateChange::Async
    }

    fn halt(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                debug!("gst-launch already exited: {}", e);
            }
            match child.wait() {
                Ok(status) => debug!("gst-launch exited with {}", status),
                Err(e) => warn!("Failed to reap gst-launch: {}", e),
            }
        }
        if let Some(handle) = self.monitor.take() {
            if handle.join().is_err() {
                warn!("gst-launch monitor thread panicked");
            }
        }
    }
}

fn forward_lines<R: Read>(
    reader: R,
    bus: &Sender<BusMessage>,
    state: &Mutex<StateSnapshot>,
    terminal: &AtomicBool,
) {
    let mut parser = LaunchOutputParser::new();
    for line in BufReader::new(reader).lines().map_while(Result::ok) {
        for message in parser.feed(&line) {
            publish(message, bus, state, terminal);
        }
    }
    for message in parser.finish() {
        publish(message, bus, state, terminal);
    }
}

fn publish(message: BusMessage, bus: &Sender<BusMessage>, state: &Mutex<StateSnapshot>, terminal: &AtomicBool) {
    if let BusMessage::StateChanged {
        from_pipeline: true,
        new,
        pending,
        ..
    } = &message
    {
        *state.lock().unwrap_or_else(PoisonError::into_inner) = StateSnapshot {
            current: *new,
            pending: *pending,
        };
    }
    if message.is_terminal() {
        terminal.store(true, Ordering::SeqCst);
    }
    // nobody listening any more is fine
    let _ = bus.send(message);
}

fn monitor(
    stdout: Option<impl Read + Send + 'static>,
    stderr: Option<impl Read + Send + 'static>,
    bus: Sender<BusMessage>,
    state: Arc<Mutex<StateSnapshot>>,
    stopping: Arc<AtomicBool>,
) {
    let terminal = Arc::new(AtomicBool::new(false));

    let stderr_reader = stderr.map(|stderr| {
        let bus = bus.clone();
        let state = Arc::clone(&state);
        let terminal = Arc::clone(&terminal);
        thread::spawn(move || forward_lines(stderr, &bus, &state, &terminal))
    });
    if let Some(stdout) = stdout {
        forward_lines(stdout, &bus, &state, &terminal);
    }
    if let Some(handle) = stderr_reader {
        let _ = handle.join();
    }

    if !terminal.load(Ordering::SeqCst) && !stopping.load(Ordering::SeqCst) {
        warn!("gst-launch exited without EOS or error");
        let _ = bus.send(BusMessage::Error {
            source: "pipeline0".to_string(),
            message: "gst-launch-1.0 exited before end-of-stream".to_string(),
            debug: None,
        });
    }
}

impl Graph for LaunchGraph {
    fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    fn links(&self) -> &[GraphLink] {
        &self.links
    }

    fn set_state(&mut self, state: EngineState) -> StateChange {
        match state {
            EngineState::Playing if self.child.is_none() => self.start(),
            EngineState::Playing => StateChange::Success,
            EngineState::Null | EngineState::VoidPending => {
                self.halt();
                self.set_snapshot(EngineState::Null, None);
                StateChange::Success
            }
            // without a running process READY and PAUSED only record the target
            EngineState::Ready | EngineState::Paused => {
                if self.child.is_none() {
                    self.set_snapshot(state, None);
                    StateChange::Success
                } else {
                    StateChange::Failure
                }
            }
        }
    }

    fn query_state(&self) -> Option<StateSnapshot> {
        let snapshot = *self.state.lock().unwrap_or_else(PoisonError::into_inner);
        snapshot.pending.is_none().then_some(snapshot)
    }

    fn bus(&self) -> Receiver<BusMessage> {
        self.bus_rx.clone()
    }
}

impl Drop for LaunchGraph {
    fn drop(&mut self) {
        self.halt();
    }
}
