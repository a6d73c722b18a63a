//! Construct-and-release pipeline validation

use super::description::PipelineDescription;
use super::PipelineError;
use crate::engine::{Engine, EngineState, Graph};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Most "did you mean" candidates offered for one missing element
const MAX_SIMILAR: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ElementNotFound,
    LinkFailed,
    Syntax,
    PropertyNotFound,
    Unknown,
}

/// Ordered: the first rule with a matching needle classifies the failure
pub const FAILURE_RULES: &[(FailureKind, &[&str])] = &[
    (FailureKind::ElementNotFound, &["no element", "no such element"]),
    (FailureKind::LinkFailed, &["could not link", "link failed"]),
    (FailureKind::Syntax, &["syntax error", "unexpected"]),
    (FailureKind::PropertyNotFound, &["no property"]),
];

pub fn classify_failure(message: &str) -> FailureKind {
    let lowered = message.to_lowercase();
    FAILURE_RULES
        .iter()
        .find(|(_, needles)| needles.iter().any(|needle| lowered.contains(needle)))
        .map(|(kind, _)| *kind)
        .unwrap_or(FailureKind::Unknown)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementEntry {
    pub name: String,
    pub factory: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub pipeline: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
    pub elements: Vec<ElementEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
}

/// Text between the first pair of double (or single) quotes
fn quoted_name(message: &str) -> Option<&str> {
    ['"', '\''].iter().find_map(|quote| {
        let start = message.find(*quote)? + 1;
        let len = message[start..].find(*quote)?;
        Some(&message[start..start + len]).filter(|name| !name.is_empty())
    })
}

fn hamming(a: &str, b: &str) -> Option<usize> {
    if a.chars().count() != b.chars().count() {
        return None;
    }
    Some(a.chars().zip(b.chars()).filter(|(x, y)| x != y).count())
}

/// Catalogue names that contain `name`, are contained in it, or differ from it
/// in at most two positions. Catalogue order, at most five.
pub fn similar_elements(catalogue: &[String], name: &str) -> Vec<String> {
    let needle = name.to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }
    catalogue
        .iter()
        .filter(|candidate| {
            let candidate = candidate.to_lowercase();
            candidate.contains(&needle)
                || needle.contains(&candidate)
                || hamming(&candidate, &needle).is_some_and(|d| d <= 2)
        })
        .take(MAX_SIMILAR)
        .cloned()
        .collect()
}

pub struct Validator {
    engine: Arc<dyn Engine>,
}

impl Validator {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn validate(&self, text: &str) -> ValidationReport {
        self.validate_in(text, None)
    }

    /// Validate with relative paths resolved against `working_directory`
    pub fn validate_in(&self, text: &str, working_directory: Option<&Path>) -> ValidationReport {
        match self.build(text, working_directory) {
            Ok(mut graph) => {
                let report = self.success_report(text, graph.as_ref());
                graph.set_state(EngineState::Null);
                report
            }
            Err(report) => *report,
        }
    }

    /// Construct the graph for `text`, or explain why it cannot be built.
    /// The graph comes back in the NULL state.
    pub fn build(
        &self,
        text: &str,
        working_directory: Option<&Path>,
    ) -> Result<Box<dyn Graph>, Box<ValidationReport>> {
        let mut description = match PipelineDescription::parse(text) {
            Ok(description) => description,
            Err(e) => return Err(Box::new(self.failure_report(text, &e.to_string()))),
        };
        if let Some(dir) = working_directory {
            let rewritten = description.resolve_paths(dir);
            debug!("Resolved {} path(s) against {}", rewritten, dir.display());
        }
        self.engine.construct(&description, working_directory).map_err(|e| {
            debug!("Pipeline construction failed: {}", e);
            Box::new(self.failure_report(text, &e.message))
        })
    }

    /// Graphviz rendering of the graph `text` builds
    pub fn graph_dot(&self, text: &str) -> Result<String, PipelineError> {
        let mut graph = self.build(text, None).map_err(PipelineError::Validation)?;
        graph.set_state(EngineState::Paused);
        let dot = graph.to_dot();
        graph.set_state(EngineState::Null);
        Ok(dot)
    }

    fn success_report(&self, text: &str, graph: &dyn Graph) -> ValidationReport {
        let nodes = graph.nodes();
        let mut warnings = Vec::new();
        if !nodes.iter().any(|n| n.is_source()) {
            warnings.push("Pipeline has no source element".to_string());
        }
        if !nodes.iter().any(|n| n.is_sink()) {
            warnings.push("Pipeline has no sink element".to_string());
        }

        ValidationReport {
            valid: true,
            pipeline: text.to_string(),
            errors: Vec::new(),
            warnings,
            suggestions: Vec::new(),
            elements: nodes
                .iter()
                .map(|n| ElementEntry {
                    name: n.name.clone(),
                    factory: n.factory.clone(),
                })
                .collect(),
            failure_kind: None,
        }
    }

    fn failure_report(&self, text: &str, message: &str) -> ValidationReport {
        let kind = classify_failure(message);
        let suggestions = match kind {
            FailureKind::ElementNotFound => self.missing_element_hints(message),
            FailureKind::LinkFailed => vec![
                "Elements may have incompatible caps. Try adding converter elements:".to_string(),
                "  For video: videoconvert, videoscale".to_string(),
                "  For audio: audioconvert, audioresample".to_string(),
            ],
            FailureKind::Syntax => vec![
                "Check pipeline syntax:".to_string(),
                "  - Elements are separated by '!'".to_string(),
                "  - Properties use 'property=value' format".to_string(),
                "  - Caps use 'media/type,field=value' format".to_string(),
            ],
            FailureKind::PropertyNotFound => {
                let mut hints = Vec::new();
                if let Some(property) = quoted_name(message) {
                    hints.push(format!("Property '{}' does not exist on this element.", property));
                }
                hints.push("Run 'gst-inspect-1.0 <element>' to list the properties it accepts.".to_string());
                hints
            }
            FailureKind::Unknown => Vec::new(),
        };

        ValidationReport {
            valid: false,
            pipeline: text.to_string(),
            errors: vec![message.to_string()],
            warnings: Vec::new(),
            suggestions,
            elements: Vec::new(),
            failure_kind: Some(kind),
        }
    }

    fn missing_element_hints(&self, message: &str) -> Vec<String> {
        let Some(name) = quoted_name(message) else {
            return vec!["Check if the required GStreamer plugin is installed.".to_string()];
        };
        let mut hints = vec![
            format!("Element '{}' not found. Check if the required GStreamer plugin is installed.", name),
            format!("Run 'gst-inspect-1.0 {}' to check if the element exists.", name),
        ];
        match self.engine.element_names() {
            Ok(catalogue) => {
                let similar = similar_elements(&catalogue, name);
                if !similar.is_empty() {
                    hints.push(format!("Did you mean: {}?", similar.join(", ")));
                }
            }
            Err(e) => debug!("Element catalogue unavailable: {}", e),
        }
        hints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;

    fn validator() -> Validator {
        Validator::new(Arc::new(MockEngine::new()))
    }

    #[test]
    fn test_failure_rules_first_match_wins() {
        assert_eq!(classify_failure("no element \"foo\""), FailureKind::ElementNotFound);
        assert_eq!(classify_failure("could not link a to b"), FailureKind::LinkFailed);
        assert_eq!(classify_failure("syntax error at position 3"), FailureKind::Syntax);
        assert_eq!(classify_failure("Unexpected token"), FailureKind::Syntax);
        // both needles present: the earlier rule decides
        assert_eq!(
            classify_failure("syntax error: no element \"x\""),
            FailureKind::ElementNotFound
        );
        assert_eq!(
            classify_failure("no property \"patern\" in element \"videotestsrc0\""),
            FailureKind::PropertyNotFound
        );
        assert_eq!(classify_failure("something else"), FailureKind::Unknown);
    }

    #[test]
    fn test_similar_elements() {
        let catalogue: Vec<String> = ["fakesrc", "fakesink", "filesink", "videoconvert", "audioconvert"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(similar_elements(&catalogue, "fakesinc"), vec!["fakesink"]);
        assert_eq!(similar_elements(&catalogue, "convert"), vec!["videoconvert", "audioconvert"]);
        assert_eq!(similar_elements(&catalogue, "FAKESRC2"), vec!["fakesrc"]);
        assert!(similar_elements(&catalogue, "zzzzzzzzzzzzzz").is_empty());
    }

    #[test]
    fn test_similar_elements_capped() {
        let catalogue: Vec<String> = (0..10).map(|i| format!("sink{}", i)).collect();
        assert_eq!(similar_elements(&catalogue, "sink").len(), MAX_SIMILAR);
    }

    #[test]
    fn test_quoted_name() {
        assert_eq!(quoted_name("no element \"nosuch\""), Some("nosuch"));
        assert_eq!(quoted_name("no element 'other'"), Some("other"));
        assert_eq!(quoted_name("no quotes"), None);
    }

    #[test]
    fn test_valid_pipeline_lists_elements() {
        let report = validator().validate("videotestsrc ! videoconvert ! autovideosink");
        assert!(report.valid);
        assert!(report.errors.is_empty());
        assert!(report.warnings.is_empty());
        assert_eq!(report.elements.len(), 3);
        assert_eq!(report.elements[0].name, "videotestsrc0");
        assert_eq!(report.elements[0].factory, "videotestsrc");
    }

    #[test]
    fn test_missing_source_and_sink_warnings() {
        let report = validator().validate("videoconvert ! videoscale");
        assert!(report.valid);
        assert_eq!(
            report.warnings,
            vec!["Pipeline has no source element", "Pipeline has no sink element"]
        );
    }

    #[test]
    fn test_missing_element_hints() {
        let report = validator().validate("fakesrc ! fakesinc");
        assert!(!report.valid);
        assert!(report.elements.is_empty());
        assert_eq!(report.failure_kind, Some(FailureKind::ElementNotFound));
        assert!(report.suggestions[0].contains("'fakesinc'"));
        assert!(report.suggestions.contains(&"Did you mean: fakesink?".to_string()));
    }

    #[test]
    fn test_link_failure_hints() {
        let report = validator().validate("audiotestsrc ! ximagesink");
        assert!(!report.valid);
        assert_eq!(report.failure_kind, Some(FailureKind::LinkFailed));
        assert!(report.suggestions[1].contains("videoconvert"));
    }

    #[test]
    fn test_syntax_failure_hints() {
        let report = validator().validate("fakesrc ! ! fakesink");
        assert!(!report.valid);
        assert_eq!(report.failure_kind, Some(FailureKind::Syntax));
        assert_eq!(report.suggestions[0], "Check pipeline syntax:");
    }

    #[test]
    fn test_unknown_property_fails_validation() {
        let report = validator().validate("videotestsrc patern=ball no-such-prop=1 ! fakesink");
        assert!(!report.valid);
        assert!(report.elements.is_empty());
        assert_eq!(report.errors, vec!["no property \"patern\" in element \"videotestsrc0\""]);
        assert_eq!(report.failure_kind, Some(FailureKind::PropertyNotFound));
        assert_eq!(report.suggestions[0], "Property 'patern' does not exist on this element.");

        let report = validator().validate("videotestsrc pattern=ball num-buffers=5 ! queue max-size-buffers=3 ! fakesink");
        assert!(report.valid, "{:?}", report.errors);
    }

    #[test]
    fn test_graph_dot() {
        let dot = validator().graph_dot("videotestsrc ! fakesink").unwrap();
        assert!(dot.starts_with("digraph pipeline {"));
        assert!(dot.contains("videotestsrc0"));
        assert!(matches!(
            validator().graph_dot("nosuch ! fakesink"),
            Err(PipelineError::Validation(_))
        ));
    }
}
