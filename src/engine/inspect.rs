//! gst-inspect-1.0 output parsing

use super::{ElementFactory, EngineError, PadDirection, PadPresence, PadTemplate};
use crate::caps;
use regex::Regex;
use std::sync::OnceLock;

/// Compile a pattern that is fixed at build time
pub(crate) fn static_regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| {
        Regex::new(pattern).unwrap_or_else(|e| panic!("static regex '{}' failed to compile: {}", pattern, e))
    })
}

fn catalogue_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(&RE, r"^([\w+-]+):\s+([\w+-]+):\s+.*$")
}

fn detail_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(&RE, r"^\s{2}([A-Za-z][A-Za-z -]*?)\s{2,}(.*)$")
}

fn template_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(&RE, r"^\s+(SRC|SINK) template: '([^']+)'")
}

fn property_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(&RE, r"^ {2}([A-Za-z][\w-]*)\s*:")
}

fn rank_value() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(&RE, r"\((\d+)\)")
}

/// Element names listed by a bare `gst-inspect-1.0`, typefinders excluded
pub fn parse_catalogue(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for line in text.lines() {
        let Some(captures) = catalogue_line().captures(line.trim_end()) else {
            continue;
        };
        if &captures[1] == "typefindfunctions" {
            continue;
        }
        let name = captures[2].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Factory,
    Plugin,
    PadTemplates,
    Properties,
    Other,
}

struct TemplateBuilder {
    name: String,
    direction: PadDirection,
    presence: PadPresence,
    caps_lines: Vec<(usize, String)>,
    caps_indent: Option<usize>,
}

impl TemplateBuilder {
    fn finish(self) -> Result<PadTemplate, EngineError> {
        let text = caps_text(&self.caps_lines);
        let caps = caps::parse(&text).map_err(|e| {
            EngineError::InvalidOutput(format!("caps of pad template '{}': {}", self.name, e))
        })?;
        Ok(PadTemplate {
            name_template: self.name,
            direction: self.direction,
            presence: self.presence,
            caps,
        })
    }
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Reassemble the indented caps listing into a caps string:
/// structure names sit at the base indentation, `key: value` fields deeper.
fn caps_text(lines: &[(usize, String)]) -> String {
    let Some(base) = lines.first().map(|(indent, _)| *indent) else {
        return "ANY".to_string();
    };
    let mut structures: Vec<String> = Vec::new();
    for (indent, text) in lines {
        if *indent <= base || structures.is_empty() {
            structures.push(text.clone());
        } else if let Some((key, value)) = text.split_once(':') {
            if let Some(current) = structures.last_mut() {
                current.push_str(&format!(", {}={}", key.trim(), value.trim()));
            }
        }
    }
    structures.join("; ")
}

/// Parse the detailed `gst-inspect-1.0 <element>` report
pub fn parse_factory(name: &str, text: &str) -> Result<ElementFactory, EngineError> {
    let mut factory = ElementFactory {
        name: name.to_string(),
        long_name: String::new(),
        klass: String::new(),
        description: String::new(),
        plugin: String::new(),
        rank: 0,
        templates: Vec::new(),
        properties: Vec::new(),
    };
    let mut section = Section::Other;
    let mut current: Option<TemplateBuilder> = None;

    for line in text.lines() {
        if !line.is_empty() && !line.starts_with(char::is_whitespace) {
            if let Some(builder) = current.take() {
                factory.templates.push(builder.finish()?);
            }
            section = match line.trim_end() {
                "Factory Details:" => Section::Factory,
                "Plugin Details:" => Section::Plugin,
                "Pad Templates:" => Section::PadTemplates,
                "Element Properties:" => Section::Properties,
                _ => Section::Other,
            };
            continue;
        }

        match section {
            Section::Factory => {
                if let Some(captures) = detail_line().captures(line) {
                    let value = captures[2].trim().to_string();
                    match &captures[1] {
                        "Long-name" => factory.long_name = value,
                        "Klass" => factory.klass = value,
                        "Description" => factory.description = value,
                        "Rank" => {
                            factory.rank = rank_value()
                                .captures(&value)
                                .and_then(|c| c[1].parse().ok())
                                .unwrap_or(0)
                        }
                        _ => {}
                    }
                }
            }
            Section::Plugin => {
                if let Some(captures) = detail_line().captures(line) {
                    if &captures[1] == "Name" && factory.plugin.is_empty() {
                        factory.plugin = captures[2].trim().to_string();
                    }
                }
            }
            Section::PadTemplates => {
                if let Some(captures) = template_header().captures(line) {
                    if let Some(builder) = current.take() {
                        factory.templates.push(builder.finish()?);
                    }
                    current = Some(TemplateBuilder {
                        name: captures[2].to_string(),
                        direction: if &captures[1] == "SRC" {
                            PadDirection::Src
                        } else {
                            PadDirection::Sink
                        },
                        presence: PadPresence::Always,
                        caps_lines: Vec::new(),
                        caps_indent: None,
                    });
                    continue;
                }
                let Some(builder) = current.as_mut() else {
                    continue;
                };
                let indent = indent_of(line);
                let trimmed = line.trim();

                if let Some(header_indent) = builder.caps_indent {
                    if !trimmed.is_empty() && indent > header_indent {
                        builder.caps_lines.push((indent, trimmed.to_string()));
                        continue;
                    }
                    builder.caps_indent = None;
                }

                if let Some(availability) = trimmed.strip_prefix("Availability:") {
                    builder.presence = match availability.trim() {
                        "Sometimes" => PadPresence::Sometimes,
                        "On request" => PadPresence::Request,
                        _ => PadPresence::Always,
                    };
                } else if trimmed == "Capabilities:" {
                    builder.caps_indent = Some(indent);
                }
            }
            Section::Properties => {
                if let Some(captures) = property_line().captures(line) {
                    factory.properties.push(captures[1].to_string());
                }
            }
            Section::Other => {}
        }
    }
    if let Some(builder) = current.take() {
        factory.templates.push(builder.finish()?);
    }

    if factory.klass.is_empty() && factory.templates.is_empty() {
        return Err(EngineError::InvalidOutput(format!(
            "no factory details in gst-inspect output for '{}'",
            name
        )));
    }
    Ok(factory)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIDEOCONVERT: &str = "Factory Details:
  Rank                     none (0)
  Long-name                Colorspace converter
  Klass                    Filter/Converter/Video
  Description              Converts video from one colorspace to another
  Author                   GStreamer maintainers <gstreamer-devel@lists.freedesktop.org>

Plugin Details:
  Name                     videoconvertscale
  Description              Convert video colorspaces and scale
  Filename                 /usr/lib/x86_64-linux-gnu/gstreamer-1.0/libgstvideoconvertscale.so

GObject
 +----GInitiallyUnowned
       +----GstObject
             +----GstElement

Pad Templates:
  SINK template: 'sink'
    Availability: Always
    Capabilities:
      video/x-raw
                 format: { (string)I420, (string)NV12, (string)RGBA }
                  width: [ 1, 2147483647 ]
                 height: [ 1, 2147483647 ]
              framerate: [ 0/1, 2147483647/1 ]
      video/x-raw(ANY)
                 format: { (string)I420, (string)NV12 }

  SRC template: 'src'
    Availability: Always
    Capabilities:
      video/x-raw
                 format: { (string)I420, (string)NV12, (string)RGBA }

Element has no clocking capabilities.

Element Properties:

  dither              : Apply dithering while converting
                        flags: readable, writable
                        Enum \"GstVideoDitherMethod\" Default: 4, \"bayer\"
                           (0): none             - No dithering
                           (4): bayer            - Ordered Bayer Dithering

  name                : The name of the object
                        flags: readable, writable, 0x2000
                        String. Default: \"videoconvert0\"

  n-threads           : Maximum number of threads to use
                        flags: readable, writable
                        Unsigned Integer. Range: 0 - 4294967295 Default: 1
";

    #[test]
    fn test_parse_factory_details() {
        let factory = parse_factory("videoconvert", VIDEOCONVERT).unwrap();
        assert_eq!(factory.klass, "Filter/Converter/Video");
        assert_eq!(factory.long_name, "Colorspace converter");
        assert_eq!(factory.plugin, "videoconvertscale");
        assert_eq!(factory.rank, 0);
        assert_eq!(factory.templates.len(), 2);

        let sink = &factory.templates[0];
        assert_eq!(sink.direction, PadDirection::Sink);
        assert_eq!(sink.caps.structures().len(), 2);
        assert_eq!(sink.caps.structures()[0].fields.len(), 4);
        assert_eq!(sink.caps.structures()[1].features, vec!["ANY".to_string()]);
        assert_eq!(factory.properties, vec!["dither", "name", "n-threads"]);
        assert!(factory.accepts_property("n-threads"));
        assert!(!factory.accepts_property("dithering"));
    }

    #[test]
    fn test_parse_presence_and_any() {
        let text = "Factory Details:
  Rank                     primary (256)
  Klass                    Generic
Pad Templates:
  SINK template: 'sink'
    Availability: Always
    Capabilities:
      ANY

  SRC template: 'src_%u'
    Availability: On request
    Capabilities:
      ANY
";
        let factory = parse_factory("tee", text).unwrap();
        assert_eq!(factory.rank, 256);
        assert_eq!(factory.templates[1].name_template, "src_%u");
        assert_eq!(factory.templates[1].presence, PadPresence::Request);
        assert!(factory.templates[1].caps.is_any());
    }

    #[test]
    fn test_parse_factory_rejects_garbage() {
        assert!(parse_factory("x", "No such element or plugin 'x'\n").is_err());
    }

    #[test]
    fn test_parse_catalogue() {
        let text = "\
coreelements:  fakesink: Fake Sink
coreelements:  fakesrc: Fake Source
typefindfunctions: video/x-h264: h264, x264, 264
videotestsrc:  videotestsrc: Video test source

Total count: 3 plugins, 3 features
";
        assert_eq!(parse_catalogue(text), vec!["fakesink", "fakesrc", "videotestsrc"]);
    }
}
