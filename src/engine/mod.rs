//! Media engine abstraction
//!
//! The organ never links GStreamer. Element metadata and graph execution come
//! from an [`Engine`]: [`LaunchEngine`] drives the installed command-line tools,
//! [`MockEngine`] simulates a small element catalogue in-process.

mod inspect;
mod launch;
mod messages;
mod mock;
mod tools;

pub use inspect::{parse_catalogue, parse_factory};
pub use launch::LaunchEngine;
pub use messages::LaunchOutputParser;
pub use mock::MockEngine;
pub use tools::{EngineError, GstCommand};

use crate::caps::Caps;
use crate::negotiation;
use crate::pipeline::description::{ChainItem, PipelineDescription, Reference};
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PadDirection {
    Src,
    Sink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PadPresence {
    Always,
    Sometimes,
    Request,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PadTemplate {
    pub name_template: String,
    pub direction: PadDirection,
    pub presence: PadPresence,
    pub caps: Caps,
}

impl PadTemplate {
    /// True when `pad` is this template's name or an instance of its `%u`/`%d`/`%s` pattern
    pub fn matches_pad(&self, pad: &str) -> bool {
        match self.name_template.split_once('%') {
            None => self.name_template == pad,
            Some((prefix, rest)) => {
                let suffix = rest.get(1..).unwrap_or("");
                self.name_template == pad
                    || (pad.len() > prefix.len() + suffix.len() && pad.starts_with(prefix) && pad.ends_with(suffix))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementFactory {
    pub name: String,
    pub long_name: String,
    pub klass: String,
    pub description: String,
    pub plugin: String,
    pub rank: u32,
    pub templates: Vec<PadTemplate>,
    /// Property names, empty when the engine could not list them
    pub properties: Vec<String>,
}

impl ElementFactory {
    pub fn templates(&self, direction: PadDirection) -> impl Iterator<Item = &PadTemplate> {
        self.templates.iter().filter(move |t| t.direction == direction)
    }

    /// Unknown property lists accept everything, as do `child::property` paths
    pub fn accepts_property(&self, key: &str) -> bool {
        self.properties.is_empty() || key.contains("::") || self.properties.iter().any(|p| p == key)
    }
}

/// GStreamer element states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineState {
    VoidPending,
    Null,
    Ready,
    Paused,
    Playing,
}

impl EngineState {
    pub fn nick(&self) -> &'static str {
        match self {
            EngineState::VoidPending => "void-pending",
            EngineState::Null => "null",
            EngineState::Ready => "ready",
            EngineState::Paused => "paused",
            EngineState::Playing => "playing",
        }
    }

    /// Accepts nicks as well as `GST_STATE_*` constant names
    pub fn from_nick(text: &str) -> Option<Self> {
        let lowered = text.trim().to_ascii_lowercase().replace('_', "-");
        let nick = lowered.strip_prefix("gst-state-").unwrap_or(&lowered);
        match nick {
            "void-pending" => Some(EngineState::VoidPending),
            "null" => Some(EngineState::Null),
            "ready" => Some(EngineState::Ready),
            "paused" => Some(EngineState::Paused),
            "playing" => Some(EngineState::Playing),
            _ => None,
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.nick())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    Success,
    Async,
    NoPreroll,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSnapshot {
    pub current: EngineState,
    pub pending: Option<EngineState>,
}

/// Asynchronous notification posted by a running graph
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    Error {
        source: String,
        message: String,
        debug: Option<String>,
    },
    Eos,
    StateChanged {
        source: String,
        /// Posted by the top-level pipeline rather than one of its elements
        from_pipeline: bool,
        old: EngineState,
        new: EngineState,
        pending: Option<EngineState>,
    },
    Warning {
        source: String,
        message: String,
        debug: Option<String>,
    },
}

impl BusMessage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BusMessage::Error { .. } | BusMessage::Eos)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub name: String,
    pub factory: String,
    pub klass: String,
    #[serde(skip)]
    pub properties: Vec<(String, String)>,
}

impl GraphNode {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn has_class(&self, class: &str) -> bool {
        self.klass.to_ascii_lowercase().contains(class)
    }

    pub fn is_source(&self) -> bool {
        self.has_class("source")
    }

    pub fn is_sink(&self) -> bool {
        self.has_class("sink")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphLink {
    pub src: String,
    pub src_pad: String,
    pub sink: String,
    pub sink_pad: String,
    /// Caps both sides agree on. `None` for links GStreamer completes later.
    pub caps: Option<Caps>,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ConstructionError {
    pub message: String,
}

impl ConstructionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub trait Engine: Send + Sync {
    fn name(&self) -> &str;

    /// Every element factory the engine can instantiate, catalogue order
    fn element_names(&self) -> Result<Vec<String>, EngineError>;

    fn find_factory(&self, name: &str) -> Result<Option<ElementFactory>, EngineError>;

    fn construct(
        &self,
        description: &PipelineDescription,
        working_directory: Option<&Path>,
    ) -> Result<Box<dyn Graph>, ConstructionError>;
}

pub trait Graph: Send {
    fn nodes(&self) -> &[GraphNode];

    fn links(&self) -> &[GraphLink];

    fn set_state(&mut self, state: EngineState) -> StateChange;

    /// Current state, or `None` while a transition is still in flight
    fn query_state(&self) -> Option<StateSnapshot>;

    fn bus(&self) -> Receiver<BusMessage>;

    fn to_dot(&self) -> String {
        graph_to_dot(self.nodes(), self.links())
    }
}

/// Nodes and checked links of a description, before any engine runs it
#[derive(Debug, Clone)]
pub struct Assembly {
    pub nodes: Vec<GraphNode>,
    pub links: Vec<GraphLink>,
}

enum Endpoint<'a> {
    Node(usize),
    Ref(&'a Reference),
}

/// Resolve factories, name nodes and check every link of `description`.
pub fn assemble<F>(description: &PipelineDescription, lookup: F) -> Result<Assembly, ConstructionError>
where
    F: Fn(&str) -> Result<Option<ElementFactory>, EngineError>,
{
    let mut nodes: Vec<GraphNode> = Vec::new();
    let mut templates: Vec<Vec<PadTemplate>> = Vec::new();
    let mut counters: HashMap<String, usize> = HashMap::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();
    let mut chains = Vec::new();

    for chain in description.chains() {
        let mut endpoints = Vec::new();
        for item in &chain.items {
            let (node, node_templates) = match item {
                ChainItem::Reference(reference) => {
                    endpoints.push(Endpoint::Ref(reference));
                    continue;
                }
                ChainItem::Element(spec) => {
                    let factory = lookup(&spec.factory)
                        .map_err(|e| ConstructionError::new(format!("could not inspect \"{}\": {}", spec.factory, e)))?
                        .ok_or_else(|| ConstructionError::new(format!("no element \"{}\"", spec.factory)))?;
                    let name = match spec.property("name") {
                        Some(name) => name.to_string(),
                        None => next_name(&mut counters, &factory.name),
                    };
                    if let Some((key, _)) = spec.properties.iter().find(|(key, _)| !factory.accepts_property(key)) {
                        return Err(ConstructionError::new(format!(
                            "no property \"{}\" in element \"{}\"",
                            key, name
                        )));
                    }
                    let node = GraphNode {
                        name,
                        factory: factory.name,
                        klass: factory.klass,
                        properties: spec.properties.clone(),
                    };
                    (node, factory.templates)
                }
                ChainItem::Filter(filter) => {
                    let node = GraphNode {
                        name: next_name(&mut counters, "capsfilter"),
                        factory: "capsfilter".to_string(),
                        klass: "Generic".to_string(),
                        properties: vec![("caps".to_string(), filter.caps.to_launch_string())],
                    };
                    let pads = [("sink", PadDirection::Sink), ("src", PadDirection::Src)]
                        .into_iter()
                        .map(|(name, direction)| PadTemplate {
                            name_template: name.to_string(),
                            direction,
                            presence: PadPresence::Always,
                            caps: filter.caps.clone(),
                        })
                        .collect();
                    (node, pads)
                }
            };

            if by_name.contains_key(&node.name) {
                return Err(ConstructionError::new(format!(
                    "syntax error: duplicate element name \"{}\"",
                    node.name
                )));
            }
            by_name.insert(node.name.clone(), nodes.len());
            endpoints.push(Endpoint::Node(nodes.len()));
            nodes.push(node);
            templates.push(node_templates);
        }
        chains.push(endpoints);
    }

    let resolve = |endpoint: &Endpoint| -> Result<(usize, Option<String>), ConstructionError> {
        match endpoint {
            Endpoint::Node(idx) => Ok((*idx, None)),
            Endpoint::Ref(reference) => by_name
                .get(&reference.element)
                .map(|idx| (*idx, reference.pad.clone()))
                .ok_or_else(|| {
                    ConstructionError::new(format!("no element named \"{}\" to link to", reference.element))
                }),
        }
    };

    let mut links = Vec::new();
    for endpoints in &chains {
        for pair in endpoints.windows(2) {
            let (src, src_pad) = resolve(&pair[0])?;
            let (sink, sink_pad) = resolve(&pair[1])?;
            links.push(check_link(
                &nodes,
                &templates,
                (src, src_pad.as_deref()),
                (sink, sink_pad.as_deref()),
            )?);
        }
    }

    Ok(Assembly { nodes, links })
}

fn next_name(counters: &mut HashMap<String, usize>, factory: &str) -> String {
    let counter = counters.entry(factory.to_string()).or_insert(0);
    let name = format!("{}{}", factory, counter);
    *counter += 1;
    name
}

fn check_link(
    nodes: &[GraphNode],
    templates: &[Vec<PadTemplate>],
    (src, src_pad): (usize, Option<&str>),
    (sink, sink_pad): (usize, Option<&str>),
) -> Result<GraphLink, ConstructionError> {
    let failure = || ConstructionError::new(format!("could not link {} to {}", nodes[src].name, nodes[sink].name));

    let outputs: Vec<&PadTemplate> = templates[src]
        .iter()
        .filter(|t| t.direction == PadDirection::Src && src_pad.map_or(true, |p| t.matches_pad(p)))
        .collect();
    let inputs: Vec<&PadTemplate> = templates[sink]
        .iter()
        .filter(|t| t.direction == PadDirection::Sink && sink_pad.map_or(true, |p| t.matches_pad(p)))
        .collect();

    if outputs.is_empty() || inputs.is_empty() {
        return Err(failure());
    }

    let pad_name = |template: &PadTemplate, requested: Option<&str>| {
        requested.map(str::to_string).unwrap_or_else(|| template.name_template.clone())
    };

    // pads that only appear at runtime are linked once they show up
    if outputs.iter().all(|t| t.presence == PadPresence::Sometimes) {
        return Ok(GraphLink {
            src: nodes[src].name.clone(),
            src_pad: pad_name(outputs[0], src_pad),
            sink: nodes[sink].name.clone(),
            sink_pad: pad_name(inputs[0], sink_pad),
            caps: None,
        });
    }

    for output in &outputs {
        for input in &inputs {
            let common = negotiation::intersect_caps(&output.caps, &input.caps);
            if !common.is_empty() {
                return Ok(GraphLink {
                    src: nodes[src].name.clone(),
                    src_pad: pad_name(output, src_pad),
                    sink: nodes[sink].name.clone(),
                    sink_pad: pad_name(input, sink_pad),
                    caps: Some(common),
                });
            }
        }
    }
    Err(failure())
}

fn dot_escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Graphviz rendering of a constructed graph
pub fn graph_to_dot(nodes: &[GraphNode], links: &[GraphLink]) -> String {
    let mut dot = String::from("digraph pipeline {\n");
    dot.push_str("  rankdir=LR;\n");
    dot.push_str("  node [shape=box, style=\"rounded,filled\", fillcolor=\"#f0f0f0\", fontsize=10];\n");
    dot.push_str("  edge [fontsize=8];\n");

    for node in nodes {
        dot.push_str(&format!(
            "  \"{}\" [label=\"{}\\n({})\"];\n",
            dot_escape(&node.name),
            dot_escape(&node.name),
            dot_escape(&node.factory)
        ));
    }

    for link in links {
        let label = match &link.caps {
            Some(caps) => format!("{}\\n{}", dot_escape(&link.src_pad), dot_escape(&caps.to_string())),
            None => format!("{} (delayed)", dot_escape(&link.src_pad)),
        };
        dot.push_str(&format!(
            "  \"{}\" -> \"{}\" [label=\"{}\"];\n",
            dot_escape(&link.src),
            dot_escape(&link.sink),
            label
        ));
    }

    dot.push_str("}\n");
    dot
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> MockEngine {
        MockEngine::new()
    }

    fn build(text: &str) -> Result<Assembly, ConstructionError> {
        let engine = engine();
        let description = PipelineDescription::parse(text).unwrap();
        assemble(&description, |name| engine.find_factory(name))
    }

    #[test]
    fn test_auto_names_and_links() {
        let assembly = build("videotestsrc ! videoconvert ! videoconvert ! fakesink").unwrap();
        let names: Vec<_> = assembly.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["videotestsrc0", "videoconvert0", "videoconvert1", "fakesink0"]);
        assert_eq!(assembly.links.len(), 3);
        assert!(assembly.links.iter().all(|l| l.caps.is_some()));
    }

    #[test]
    fn test_missing_element() {
        let err = build("videotestsrc ! nosuchelementxyz ! fakesink").unwrap_err();
        assert_eq!(err.message, "no element \"nosuchelementxyz\"");
    }

    #[test]
    fn test_incompatible_link() {
        let err = build("audiotestsrc ! ximagesink").unwrap_err();
        assert_eq!(err.message, "could not link audiotestsrc0 to ximagesink0");
    }

    #[test]
    fn test_caps_filter_restricts_link() {
        assert!(build("videotestsrc ! video/x-raw,format=I420 ! x264enc ! fakesink").is_ok());
        let err = build("videotestsrc ! audio/x-raw ! fakesink").unwrap_err();
        assert!(err.message.starts_with("could not link videotestsrc0 to capsfilter0"));
    }

    #[test]
    fn test_sometimes_pads_link_later() {
        let assembly = build("filesrc location=a.mp4 ! decodebin ! videoconvert ! fakesink").unwrap();
        let delayed = assembly.links.iter().find(|l| l.src == "decodebin0").unwrap();
        assert!(delayed.caps.is_none());
    }

    #[test]
    fn test_unknown_property_is_rejected() {
        let err = build("videotestsrc patern=ball ! fakesink").unwrap_err();
        assert_eq!(err.message, "no property \"patern\" in element \"videotestsrc0\"");
        let err = build("fakesrc ! fakesink name=out bogus=1").unwrap_err();
        assert_eq!(err.message, "no property \"bogus\" in element \"out\"");
        assert!(build("videotestsrc pattern=ball num-buffers=10 ! fakesink sync=false").is_ok());
    }

    #[test]
    fn test_references() {
        let assembly = build("audiotestsrc ! tee name=t  t. ! queue ! fakesink  t. ! queue ! autoaudiosink").unwrap();
        assert_eq!(assembly.links.iter().filter(|l| l.src == "t").count(), 2);
        let err = build("audiotestsrc ! fakesink  missing. ! queue ! fakesink").unwrap_err();
        assert_eq!(err.message, "no element named \"missing\" to link to");
    }

    #[test]
    fn test_request_pads_are_checked() {
        assert!(build("videotestsrc ! x264enc ! mp4mux ! fakesink").is_ok());
        assert!(build("videotestsrc ! mp4mux ! fakesink").is_err());
    }

    #[test]
    fn test_pad_template_matching() {
        let template = PadTemplate {
            name_template: "src_%u".into(),
            direction: PadDirection::Src,
            presence: PadPresence::Request,
            caps: Caps::new_any(),
        };
        assert!(template.matches_pad("src_0"));
        assert!(template.matches_pad("src_%u"));
        assert!(!template.matches_pad("sink_0"));
        assert!(!template.matches_pad("src_"));
    }

    #[test]
    fn test_state_nicks() {
        assert_eq!(EngineState::from_nick("GST_STATE_PLAYING"), Some(EngineState::Playing));
        assert_eq!(EngineState::from_nick("void-pending"), Some(EngineState::VoidPending));
        assert_eq!(EngineState::from_nick("VOID_PENDING"), Some(EngineState::VoidPending));
        assert_eq!(EngineState::Paused.to_string(), "paused");
        assert_eq!(EngineState::from_nick("sleeping"), None);
    }

    #[test]
    fn test_dot_export() {
        let assembly = build("videotestsrc ! fakesink").unwrap();
        let dot = graph_to_dot(&assembly.nodes, &assembly.links);
        assert!(dot.starts_with("digraph pipeline {"));
        assert!(dot.contains("\"videotestsrc0\" -> \"fakesink0\""));
        assert!(dot.contains("(videotestsrc)"));
    }
}
