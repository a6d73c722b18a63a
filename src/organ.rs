//! UMA Organ Interface for soma_gst
//!
//! Implements the Universal Module Architecture (UMA) interface over the
//! GStreamer introspection core, enabling dynamic discovery and invocation by
//! SOMA orchestrators.
//!
//! ## UMA Compliance
//!
//! - **Stimulus/Response Pattern**: All operations use standardized input/output
//! - **Capability Cards**: Self-describing, with a JSON input schema per function
//! - **Metrics**: Built-in latency tracking and error reporting
//!
//! ## Available Operations
//!
//! 1. `caps.parse` - Structure of a caps string
//! 2. `caps.compatible` - Intersection of two caps strings
//! 3. `elements.can_link` - Pad-template link check between two elements
//! 4. `elements.suggest_converter` - Converter chains for elements that do not link
//! 5. `pipeline.validate` - Build a pipeline, report problems and hints
//! 6. `pipeline.run` - Run to EOS/timeout, or start in the background
//! 7. `pipeline.status` / `pipeline.stop` / `pipeline.list` - Background pipelines
//! 8. `pipeline.graph` - Graphviz DOT of a pipeline
//! 9. `gst.capabilities` - Capability card query
//!
//! ## Example
//!
//! ```rust,no_run
//! use soma_gst::organ::{GstOrgan, Organ, Stimulus};
//! use soma_gst::config::OrganConfig;
//! use serde_json::json;
//! use std::collections::HashMap;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let organ = GstOrgan::new(OrganConfig::default());
//!
//! let response = organ.stimulate(Stimulus {
//!     op: "pipeline.validate".to_string(),
//!     input: json!({"pipeline": "videotestsrc ! videoconvert ! autovideosink"}),
//!     context: HashMap::new(),
//! }).await?;
//! println!("valid: {}", response.output["valid"]);
//! # Ok(())
//! # }
//! ```

use crate::caps::{self, CapsError};
use crate::config::OrganConfig;
use crate::engine::Engine;
use crate::error::GstError;
use crate::metrics::{Metrics, Timer};
use crate::negotiation::{self, NegotiationError};
use crate::pipeline::{Executor, PipelineError};
use crate::validation::validate_input;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// UMA Stimulus - input to organ operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stimulus {
    pub op: String,
    pub input: Value,
    #[serde(default)]
    pub context: HashMap<String, String>,
}

/// UMA Response - output from organ operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    pub output: Value,
    pub latency_ms: u64,
    pub cost: Option<f64>,
}

/// Organ trait - all SOMA organs implement this
#[async_trait]
pub trait Organ: Send + Sync {
    async fn stimulate(&self, stimulus: Stimulus) -> Result<Response, OrganError>;
    fn describe(&self) -> OrganCard;
}

/// Organ-level errors
#[derive(Debug, Error)]
pub enum OrganError {
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Caps(#[from] CapsError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Worker task failed: {0}")]
    Join(String),
}

impl OrganError {
    /// Stable name of the failure, for clients that branch on it
    pub fn kind(&self) -> &'static str {
        match self {
            OrganError::UnsupportedOperation(_) => "UnsupportedOperation",
            OrganError::InvalidInput(_) => "InvalidInput",
            OrganError::Caps(_) => "ParseFailure",
            OrganError::Negotiation(NegotiationError::NotFound(_)) => "NotFound",
            OrganError::Negotiation(NegotiationError::Engine(_)) => "EngineError",
            OrganError::Pipeline(PipelineError::NotFound(_)) => "NotFound",
            OrganError::Pipeline(PipelineError::Validation(_)) => "ConstructionFailure",
            OrganError::Pipeline(PipelineError::Runtime { .. }) => "RuntimeFailure",
            OrganError::Pipeline(PipelineError::Description(_)) => "ParseFailure",
            OrganError::Pipeline(_) => "PipelineError",
            OrganError::Serialization(_) => "SerializationError",
            OrganError::Join(_) => "InternalError",
        }
    }
}

impl From<GstError> for OrganError {
    fn from(e: GstError) -> Self {
        match e {
            GstError::Validation(msg) => OrganError::InvalidInput(msg),
        }
    }
}

/// Organ capability card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganCard {
    pub name: String,
    pub version: String,
    pub description: String,
    pub division: String,
    pub subsystem: String,
    pub tags: Vec<String>,
    pub execution_modes: Vec<String>,
    pub functions: Vec<FunctionCard>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

/// Function capability card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCard {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub examples: Vec<String>,
    pub idempotent: bool,
    pub side_effects: Vec<String>,
    pub input_schema: Option<Value>,
    pub output_schema: Value,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn required_str<'a>(input: &'a Value, key: &str) -> Result<&'a str, OrganError> {
    input[key]
        .as_str()
        .ok_or_else(|| OrganError::InvalidInput(format!("Missing {}", key)))
}

fn optional_str<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str)
}

const OPERATIONS: &[&str] = &[
    "caps.parse",
    "caps.compatible",
    "elements.can_link",
    "elements.suggest_converter",
    "pipeline.validate",
    "pipeline.run",
    "pipeline.status",
    "pipeline.stop",
    "pipeline.list",
    "pipeline.graph",
    "gst.capabilities",
    "metrics",
];

/// GStreamer introspection and control organ
pub struct GstOrgan {
    config: OrganConfig,
    executor: Arc<Executor>,
    metrics: Arc<Metrics>,
}

impl GstOrgan {
    pub fn new(config: OrganConfig) -> Self {
        let engine = config.build_engine();
        Self::with_engine(config, engine)
    }

    pub fn with_engine(config: OrganConfig, engine: Arc<dyn Engine>) -> Self {
        let executor = Executor::new(engine, config.message_log_capacity);
        Self {
            config,
            executor: Arc::new(executor),
            metrics: Metrics::new(),
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Run engine-bound work off the async executor
    async fn blocking<T, F>(&self, work: F) -> Result<T, OrganError>
    where
        F: FnOnce(&Executor) -> Result<T, OrganError> + Send + 'static,
        T: Send + 'static,
    {
        let executor = Arc::clone(&self.executor);
        tokio::task::spawn_blocking(move || work(&executor))
            .await
            .map_err(|e| OrganError::Join(e.to_string()))?
    }

    /// `timeout_seconds`: absent uses the configured default, null or <= 0 waits forever
    fn run_timeout(&self, input: &Value) -> Result<Option<Duration>, OrganError> {
        match input.get("timeout_seconds") {
            None => Ok(self.config.default_timeout()),
            Some(Value::Null) => Ok(None),
            Some(value) => {
                let seconds = value
                    .as_f64()
                    .ok_or_else(|| OrganError::InvalidInput("timeout_seconds must be a number".to_string()))?;
                Ok(Duration::try_from_secs_f64(seconds).ok().filter(|t| !t.is_zero()))
            }
        }
    }

    /// Handle caps.parse operation
    fn handle_caps_parse(&self, input: &Value) -> Result<Value, OrganError> {
        let text = required_str(input, "caps")?;
        let caps = caps::parse(text)?;
        Ok(caps.to_json())
    }

    /// Handle caps.compatible operation
    fn handle_caps_compatible(&self, input: &Value) -> Result<Value, OrganError> {
        let caps1 = caps::parse(required_str(input, "caps1")?)?;
        let caps2 = caps::parse(required_str(input, "caps2")?)?;
        Ok(serde_json::to_value(negotiation::intersects(&caps1, &caps2))?)
    }

    /// Handle elements.can_link operation
    async fn handle_can_link(&self, input: Value) -> Result<Value, OrganError> {
        self.blocking(move |executor| {
            let report = negotiation::check_elements_can_link(
                executor.engine().as_ref(),
                required_str(&input, "src_element")?,
                required_str(&input, "sink_element")?,
                optional_str(&input, "src_pad"),
                optional_str(&input, "sink_pad"),
            )?;
            Ok(serde_json::to_value(report)?)
        })
        .await
    }

    /// Handle elements.suggest_converter operation
    async fn handle_suggest_converter(&self, input: Value) -> Result<Value, OrganError> {
        self.blocking(move |executor| {
            let advice = negotiation::advise_converters(
                executor.engine().as_ref(),
                required_str(&input, "src_element")?,
                required_str(&input, "sink_element")?,
            )?;
            Ok(serde_json::to_value(advice)?)
        })
        .await
    }

    /// Handle pipeline.validate operation
    async fn handle_validate(&self, input: Value) -> Result<Value, OrganError> {
        self.blocking(move |executor| {
            let text = required_str(&input, "pipeline")?;
            let working_directory = optional_str(&input, "working_directory").map(PathBuf::from);
            let report = executor.validator().validate_in(text, working_directory.as_deref());
            Ok(serde_json::to_value(report)?)
        })
        .await
    }

    /// Handle pipeline.run operation
    async fn handle_run(&self, input: Value) -> Result<Value, OrganError> {
        let timeout = self.run_timeout(&input)?;
        self.blocking(move |executor| {
            let text = required_str(&input, "pipeline")?;
            let working_directory = optional_str(&input, "working_directory").map(PathBuf::from);
            let output = if input["async_mode"].as_bool().unwrap_or(false) {
                serde_json::to_value(executor.run_async(text, working_directory.as_deref())?)?
            } else {
                serde_json::to_value(executor.run_sync(text, timeout, working_directory.as_deref())?)?
            };
            Ok(output)
        })
        .await
    }

    /// Handle pipeline.status operation
    async fn handle_status(&self, input: Value) -> Result<Value, OrganError> {
        self.blocking(move |executor| {
            let status = executor.status(required_str(&input, "pipeline_id")?)?;
            Ok(serde_json::to_value(status)?)
        })
        .await
    }

    /// Handle pipeline.stop operation
    async fn handle_stop(&self, input: Value) -> Result<Value, OrganError> {
        self.blocking(move |executor| {
            let report = executor.stop(required_str(&input, "pipeline_id")?)?;
            Ok(serde_json::to_value(report)?)
        })
        .await
    }

    /// Handle pipeline.list operation
    async fn handle_list(&self) -> Result<Value, OrganError> {
        self.blocking(|executor| {
            let pipelines = executor.list_running()?;
            Ok(json!({
                "count": pipelines.len(),
                "pipelines": pipelines,
            }))
        })
        .await
    }

    /// Handle pipeline.graph operation
    async fn handle_graph(&self, input: Value) -> Result<Value, OrganError> {
        self.blocking(move |executor| {
            let text = required_str(&input, "pipeline")?;
            let dot = executor.validator().graph_dot(text)?;
            Ok(json!({
                "pipeline": text,
                "dot": dot,
                "message": "Use 'dot -Tpng graph.dot -o graph.png' to render",
            }))
        })
        .await
    }

    /// Handle gst.capabilities operation
    fn handle_capabilities(&self) -> Result<Value, OrganError> {
        let card = self.describe();
        serde_json::to_value(&card).map_err(OrganError::Serialization)
    }

    async fn dispatch(&self, op: &str, input: Value) -> Result<Value, OrganError> {
        if let Some(schema) = self
            .describe()
            .functions
            .into_iter()
            .find(|f| f.name == op)
            .and_then(|f| f.input_schema)
        {
            validate_input(&input, &schema)?;
        }

        match op {
            "caps.parse" => self.handle_caps_parse(&input),
            "caps.compatible" => self.handle_caps_compatible(&input),
            "elements.can_link" => self.handle_can_link(input).await,
            "elements.suggest_converter" => self.handle_suggest_converter(input).await,
            "pipeline.validate" => self.handle_validate(input).await,
            "pipeline.run" => self.handle_run(input).await,
            "pipeline.status" => self.handle_status(input).await,
            "pipeline.stop" => self.handle_stop(input).await,
            "pipeline.list" => self.handle_list().await,
            "pipeline.graph" => self.handle_graph(input).await,
            "gst.capabilities" => self.handle_capabilities(),
            "metrics" => Ok(json!(self.metrics.snapshot())),
            _ => Err(OrganError::UnsupportedOperation(op.to_string())),
        }
    }
}

fn error_output(op: &str, error: &OrganError) -> Value {
    let mut output = json!({
        "error": error.to_string(),
        "kind": error.kind(),
        "op": op,
    });
    match error {
        OrganError::UnsupportedOperation(_) => {
            output["available_operations"] = json!(OPERATIONS);
        }
        OrganError::Pipeline(PipelineError::Validation(report)) => {
            output["validation"] = json!(report);
        }
        OrganError::Pipeline(PipelineError::Runtime { debug: Some(debug), .. }) => {
            output["debug"] = json!(debug);
        }
        _ => {}
    }
    output
}

#[async_trait]
impl Organ for GstOrgan {
    async fn stimulate(&self, stimulus: Stimulus) -> Result<Response, OrganError> {
        let timer = Timer::new();
        let op = stimulus.op;

        let (ok, output) = match self.dispatch(&op, stimulus.input).await {
            Ok(output) => (true, output),
            Err(e) => {
                debug!("{} failed: {}", op, e);
                (false, error_output(&op, &e))
            }
        };

        let latency = timer.elapsed_ms();
        self.metrics.record_request(&op, ok, latency);

        Ok(Response {
            ok,
            output,
            latency_ms: latency,
            cost: None,
        })
    }

    fn describe(&self) -> OrganCard {
        let element_pair = json!({
            "type": "object",
            "properties": {
                "src_element": { "type": "string", "description": "Upstream element factory name" },
                "sink_element": { "type": "string", "description": "Downstream element factory name" }
            },
            "required": ["src_element", "sink_element"]
        });
        let pipeline_text = json!({
            "type": "object",
            "properties": {
                "pipeline": { "type": "string", "description": "gst-launch pipeline description" },
                "working_directory": { "type": "string", "description": "Directory relative file locations resolve against" }
            },
            "required": ["pipeline"]
        });
        let pipeline_id = json!({
            "type": "object",
            "properties": {
                "pipeline_id": { "type": "string", "description": "Id returned by an async pipeline.run" }
            },
            "required": ["pipeline_id"]
        });

        OrganCard {
            name: "soma_gst".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "GStreamer introspection and control organ: caps negotiation, pipeline validation and execution".to_string(),
            division: "media".to_string(),
            subsystem: "gstreamer".to_string(),
            tags: strings(&["media", "gstreamer", "caps", "pipeline", "negotiation", "validation"]),
            execution_modes: strings(&["embedded", "sidecar", "server"]),
            author: Some("SOMA Media Team".to_string()),
            repository: None,
            functions: vec![
                FunctionCard {
                    name: "caps.parse".to_string(),
                    description: "Parse a GStreamer caps string into structures and typed fields".to_string(),
                    tags: strings(&["caps", "parsing"]),
                    examples: strings(&[
                        "Inspect the fields of video/x-raw,format=I420,width=640",
                        "Check whether caps are fixed",
                    ]),
                    idempotent: true,
                    side_effects: vec![],
                    input_schema: Some(json!({
                        "type": "object",
                        "properties": {
                            "caps": { "type": "string", "description": "Caps string, ANY or EMPTY" }
                        },
                        "required": ["caps"]
                    })),
                    output_schema: json!({
                        "type": "object",
                        "properties": {
                            "valid": { "type": "boolean" },
                            "is_any": { "type": "boolean" },
                            "is_empty": { "type": "boolean" },
                            "is_fixed": { "type": "boolean" },
                            "structures": { "type": "array" }
                        }
                    }),
                },
                FunctionCard {
                    name: "caps.compatible".to_string(),
                    description: "Check whether two caps strings intersect and return the common caps".to_string(),
                    tags: strings(&["caps", "negotiation"]),
                    examples: strings(&["Does video/x-raw,format=I420 fit video/x-raw,format={I420,NV12}?"]),
                    idempotent: true,
                    side_effects: vec![],
                    input_schema: Some(json!({
                        "type": "object",
                        "properties": {
                            "caps1": { "type": "string" },
                            "caps2": { "type": "string" }
                        },
                        "required": ["caps1", "caps2"]
                    })),
                    output_schema: json!({
                        "type": "object",
                        "properties": {
                            "compatible": { "type": "boolean" },
                            "caps1_any": { "type": "boolean" },
                            "caps2_any": { "type": "boolean" },
                            "intersection": { "type": "string" }
                        }
                    }),
                },
                FunctionCard {
                    name: "elements.can_link".to_string(),
                    description: "Check whether two element factories have compatible pad templates".to_string(),
                    tags: strings(&["elements", "negotiation", "pads"]),
                    examples: strings(&["Can videotestsrc link to x264enc?"]),
                    idempotent: true,
                    side_effects: strings(&["queries the element registry"]),
                    input_schema: Some({
                        let mut schema = element_pair.clone();
                        schema["properties"]["src_pad"] = json!({ "type": "string", "description": "Restrict to one src pad or template" });
                        schema["properties"]["sink_pad"] = json!({ "type": "string", "description": "Restrict to one sink pad or template" });
                        schema
                    }),
                    output_schema: json!({
                        "type": "object",
                        "properties": {
                            "can_link": { "type": "boolean" },
                            "compatible_pads": { "type": "array" }
                        }
                    }),
                },
                FunctionCard {
                    name: "elements.suggest_converter".to_string(),
                    description: "Suggest converter chains between two elements that cannot link directly".to_string(),
                    tags: strings(&["elements", "negotiation", "converters"]),
                    examples: strings(&[
                        "Bridge videotestsrc and ximagesink",
                        "Decode h264parse output for a raw video sink",
                    ]),
                    idempotent: true,
                    side_effects: strings(&["queries the element registry"]),
                    input_schema: Some(element_pair),
                    output_schema: json!({
                        "type": "object",
                        "properties": {
                            "direct_link_possible": { "type": "boolean" },
                            "suggestions": { "type": "array" }
                        }
                    }),
                },
                FunctionCard {
                    name: "pipeline.validate".to_string(),
                    description: "Build a pipeline without running it and report errors, warnings and hints".to_string(),
                    tags: strings(&["pipeline", "validation"]),
                    examples: strings(&["Validate 'videotestsrc ! videoconvert ! autovideosink'"]),
                    idempotent: true,
                    side_effects: strings(&["constructs and releases a pipeline"]),
                    input_schema: Some(pipeline_text.clone()),
                    output_schema: json!({
                        "type": "object",
                        "properties": {
                            "valid": { "type": "boolean" },
                            "errors": { "type": "array", "items": { "type": "string" } },
                            "warnings": { "type": "array", "items": { "type": "string" } },
                            "suggestions": { "type": "array", "items": { "type": "string" } },
                            "elements": { "type": "array" }
                        }
                    }),
                },
                FunctionCard {
                    name: "pipeline.run".to_string(),
                    description: "Run a pipeline until EOS, error or timeout, or start it in the background".to_string(),
                    tags: strings(&["pipeline", "execution"]),
                    examples: strings(&[
                        "Encode 100 test frames to out.mp4",
                        "Start a live preview in the background",
                    ]),
                    idempotent: false,
                    side_effects: strings(&["runs a media pipeline", "may write files"]),
                    input_schema: Some({
                        let mut schema = pipeline_text.clone();
                        schema["properties"]["async_mode"] = json!({ "type": "boolean", "description": "Start in the background and return an id (default: false)" });
                        schema["properties"]["timeout_seconds"] = json!({ "type": ["number", "null"], "description": "Bound for synchronous runs (default: 5.0, null waits for EOS)" });
                        schema
                    }),
                    output_schema: json!({
                        "type": "object",
                        "properties": {
                            "success": { "type": "boolean" },
                            "status": { "type": "string", "enum": ["eos", "timeout"] },
                            "pipeline_id": { "type": "string" },
                            "message": { "type": "string" }
                        }
                    }),
                },
                FunctionCard {
                    name: "pipeline.status".to_string(),
                    description: "State, last error and recent bus messages of a background pipeline".to_string(),
                    tags: strings(&["pipeline", "monitoring"]),
                    examples: strings(&["Poll a pipeline started with async_mode"]),
                    idempotent: true,
                    side_effects: vec![],
                    input_schema: Some(pipeline_id.clone()),
                    output_schema: json!({
                        "type": "object",
                        "properties": {
                            "found": { "type": "boolean" },
                            "state": { "type": "string" },
                            "error": { "type": "string" },
                            "recent_messages": { "type": "array", "items": { "type": "string" } }
                        }
                    }),
                },
                FunctionCard {
                    name: "pipeline.stop".to_string(),
                    description: "Stop a background pipeline and forget it".to_string(),
                    tags: strings(&["pipeline", "control"]),
                    examples: strings(&["Stop a live preview"]),
                    idempotent: false,
                    side_effects: strings(&["stops a media pipeline"]),
                    input_schema: Some(pipeline_id),
                    output_schema: json!({
                        "type": "object",
                        "properties": {
                            "success": { "type": "boolean" },
                            "pipeline_id": { "type": "string" },
                            "message": { "type": "string" }
                        }
                    }),
                },
                FunctionCard {
                    name: "pipeline.list".to_string(),
                    description: "List background pipelines".to_string(),
                    tags: strings(&["pipeline", "monitoring"]),
                    examples: strings(&["Which pipelines are still running?"]),
                    idempotent: true,
                    side_effects: vec![],
                    input_schema: Some(json!({ "type": "object", "properties": {} })),
                    output_schema: json!({
                        "type": "object",
                        "properties": {
                            "count": { "type": "integer" },
                            "pipelines": { "type": "array" }
                        }
                    }),
                },
                FunctionCard {
                    name: "pipeline.graph".to_string(),
                    description: "Export a pipeline as a Graphviz DOT graph".to_string(),
                    tags: strings(&["pipeline", "visualization"]),
                    examples: strings(&["Draw the topology of a tee pipeline"]),
                    idempotent: true,
                    side_effects: strings(&["constructs and releases a pipeline"]),
                    input_schema: Some(json!({
                        "type": "object",
                        "properties": {
                            "pipeline": { "type": "string", "description": "gst-launch pipeline description" }
                        },
                        "required": ["pipeline"]
                    })),
                    output_schema: json!({
                        "type": "object",
                        "properties": {
                            "dot": { "type": "string" },
                            "message": { "type": "string" }
                        }
                    }),
                },
                FunctionCard {
                    name: "gst.capabilities".to_string(),
                    description: "Return organ capability card with all available functions and metadata".to_string(),
                    tags: strings(&["metadata", "discovery"]),
                    examples: strings(&["Discover available GStreamer operations"]),
                    idempotent: true,
                    side_effects: vec![],
                    input_schema: None,
                    output_schema: json!({
                        "type": "object",
                        "properties": {
                            "name": { "type": "string" },
                            "version": { "type": "string" },
                            "functions": { "type": "array" }
                        }
                    }),
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;

    fn organ() -> GstOrgan {
        GstOrgan::with_engine(OrganConfig::default(), Arc::new(MockEngine::new()))
    }

    async fn call(organ: &GstOrgan, op: &str, input: Value) -> Response {
        organ
            .stimulate(Stimulus {
                op: op.to_string(),
                input,
                context: HashMap::new(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_organ_capabilities() {
        let response = call(&organ(), "gst.capabilities", json!({})).await;
        assert!(response.ok);
        assert_eq!(response.output["name"], "soma_gst");
    }

    #[tokio::test]
    async fn test_unsupported_operation() {
        let response = call(&organ(), "invalid.operation", json!({})).await;
        assert!(!response.ok);
        assert_eq!(response.output["kind"], "UnsupportedOperation");
        assert!(response.output["available_operations"].as_array().unwrap().len() >= 10);
    }

    #[tokio::test]
    async fn test_schema_checked_before_dispatch() {
        let organ = organ();
        let response = call(&organ, "caps.compatible", json!({"caps1": "ANY"})).await;
        assert!(!response.ok);
        assert_eq!(response.output["kind"], "InvalidInput");
        assert!(response.output["error"].as_str().unwrap().contains("caps2"));

        let snapshot = organ.metrics().snapshot();
        assert_eq!(snapshot.failed_requests, 1);
        assert_eq!(snapshot.operations.caps, 1);
    }

    #[test]
    fn test_schema_error_conversion() {
        let err = OrganError::from(GstError::Validation("Missing required field: caps".to_string()));
        assert_eq!(err.kind(), "InvalidInput");
        assert_eq!(err.to_string(), "Invalid input: Missing required field: caps");
    }

    #[tokio::test]
    async fn test_caps_parse_error_is_reported() {
        let response = call(&organ(), "caps.parse", json!({"caps": "video/x-raw, width=(int)[ 10"})).await;
        assert!(!response.ok);
        assert_eq!(response.output["kind"], "ParseFailure");
    }

    #[test]
    fn test_run_timeout_defaults() {
        let organ = organ();
        assert_eq!(organ.run_timeout(&json!({})).unwrap(), Some(Duration::from_secs(5)));
        assert_eq!(organ.run_timeout(&json!({"timeout_seconds": null})).unwrap(), None);
        assert_eq!(organ.run_timeout(&json!({"timeout_seconds": 0})).unwrap(), None);
        assert_eq!(organ.run_timeout(&json!({"timeout_seconds": -1.0})).unwrap(), None);
        assert_eq!(
            organ.run_timeout(&json!({"timeout_seconds": 0.5})).unwrap(),
            Some(Duration::from_millis(500))
        );
    }

    #[test]
    fn test_organ_card() {
        let card = organ().describe();
        assert_eq!(card.name, "soma_gst");
        let names: Vec<&str> = card.functions.iter().map(|f| f.name.as_str()).collect();
        for op in OPERATIONS.iter().filter(|op| **op != "metrics") {
            assert!(names.contains(op), "missing card for {op}");
        }
    }
}
