//! Turns `gst-launch-1.0 -m` console output into bus messages
//!
//! stdout carries the `-m` message dump and the EOS notice, stderr carries
//! `ERROR:`/`WARNING:` reports followed by an optional debug block.

use super::inspect::static_regex;
use super::{BusMessage, EngineState};
use regex::Regex;
use std::sync::OnceLock;

fn state_changed_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(
        &RE,
        r#"^Got message #\d+ from (?:element|object) "([^"]+)" \(state-changed\): .*old-state=\(GstState\)([\w-]+), new-state=\(GstState\)([\w-]+)(?:, pending-state=\(GstState\)([\w-]+))?"#,
    )
}

fn eos_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(&RE, r#"^Got EOS from element "([^"]+)""#)
}

fn element_report_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(&RE, r"^(ERROR|WARNING): from element (\S+): (.*)$")
}

/// Prefixes of lines gst-launch prints on its own, which end a debug block
const KNOWN_PREFIXES: &[&str] = &[
    "ERROR:",
    "WARNING:",
    "Got ",
    "Setting pipeline",
    "Pipeline ",
    "Prerolled",
    "Execution ended",
    "Freeing pipeline",
    "Redistribute latency",
    "New clock",
    "Progress:",
    "INFO:",
    "Interrupt:",
];

pub struct LaunchOutputParser {
    pipeline_name: String,
    pending: Option<BusMessage>,
    collecting_debug: bool,
}

impl LaunchOutputParser {
    pub fn new() -> Self {
        Self {
            pipeline_name: "pipeline0".to_string(),
            pending: None,
            collecting_debug: false,
        }
    }

    /// Feed one output line, returning any messages it completes
    pub fn feed(&mut self, line: &str) -> Vec<BusMessage> {
        let line = line.trim_end();
        let mut out = Vec::new();

        if self.pending.is_some() {
            if line.trim() == "Additional debug info:" {
                self.collecting_debug = true;
                return out;
            }
            let known = KNOWN_PREFIXES.iter().any(|p| line.starts_with(p));
            if self.collecting_debug && !known && !line.trim().is_empty() {
                self.append_debug(line.trim());
                return out;
            }
            out.extend(self.flush());
        }

        if let Some(captures) = state_changed_line().captures(line) {
            let (Some(old), Some(new)) = (EngineState::from_nick(&captures[2]), EngineState::from_nick(&captures[3]))
            else {
                return out;
            };
            let pending = captures
                .get(4)
                .and_then(|m| EngineState::from_nick(m.as_str()))
                .filter(|s| *s != EngineState::VoidPending);
            let source = captures[1].to_string();
            out.push(BusMessage::StateChanged {
                from_pipeline: source == self.pipeline_name,
                source,
                old,
                new,
                pending,
            });
        } else if eos_line().is_match(line) {
            out.push(BusMessage::Eos);
        } else if let Some(captures) = element_report_line().captures(line) {
            let source = element_from_path(&captures[2]);
            let message = captures[3].to_string();
            self.pending = Some(if &captures[1] == "ERROR" {
                BusMessage::Error { source, message, debug: None }
            } else {
                BusMessage::Warning { source, message, debug: None }
            });
        } else if let Some(reason) = line
            .strip_prefix("ERROR: pipeline could not be constructed: ")
            .or_else(|| line.strip_prefix("WARNING: erroneous pipeline: "))
        {
            self.pending = Some(BusMessage::Error {
                source: self.pipeline_name.clone(),
                message: reason.to_string(),
                debug: None,
            });
        }
        out
    }

    /// Flush whatever is still buffered at end of stream
    pub fn finish(&mut self) -> Vec<BusMessage> {
        self.flush().into_iter().collect()
    }

    fn flush(&mut self) -> Option<BusMessage> {
        self.collecting_debug = false;
        self.pending.take()
    }

    fn append_debug(&mut self, text: &str) {
        if let Some(BusMessage::Error { debug, .. } | BusMessage::Warning { debug, .. }) = self.pending.as_mut() {
            match debug {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(text);
                }
                None => *debug = Some(text.to_string()),
            }
        }
    }
}

impl Default for LaunchOutputParser {
    fn default() -> Self {
        Self::new()
    }
}

/// `/GstPipeline:pipeline0/GstFileSrc:filesrc0` → `filesrc0`
fn element_from_path(path: &str) -> String {
    path.rsplit('/')
        .next()
        .and_then(|segment| segment.rsplit(':').next())
        .unwrap_or(path)
        .to_string()
}
