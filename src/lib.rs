//! soma_gst - GStreamer graph introspection and control for the SOMA platform
//!
//! Models caps negotiation (parsing, intersection, converter heuristics) and
//! the pipeline lifecycle (validation, synchronous and background runs) on top
//! of an engine backend. The default backend shells out to the system
//! `gst-inspect-1.0` / `gst-launch-1.0` binaries (no linking).

pub mod caps;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod negotiation;
pub mod organ;
pub mod pipeline;
pub mod validation;

pub use caps::{Caps, CapsError, Structure, Value};
pub use config::{EngineKind, OrganConfig};
pub use engine::{Engine, EngineError, LaunchEngine, MockEngine};
pub use error::{GstError, Result};
pub use negotiation::{intersects, Compatibility, ConverterSuggestion, NegotiationError};
pub use organ::{GstOrgan, Organ, OrganError, Response, Stimulus};
pub use pipeline::{Executor, PipelineDescription, PipelineError, ValidationReport, Validator};
