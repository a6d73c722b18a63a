//! Capability negotiation
//!
//! Set intersection over caps values, pad-template link checks and the
//! converter heuristics used when two elements refuse to link directly.
//!
//! Intersection follows GStreamer semantics:
//!
//! - equal fixed values intersect to themselves
//! - a fixed value intersects a range when it lies inside (and on the step grid)
//! - ranges narrow to their overlap, collapsing to a fixed value when `min == max`
//! - lists intersect element-wise and collapse to a single value when one survives
//! - a field missing on one side is unconstrained there

use crate::caps::{Caps, Structure, Value};
use crate::engine::{Engine, EngineError, PadDirection, PadTemplate};
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("{0}")]
    NotFound(String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

impl Value {
    /// Common subset of two values, `None` when they share nothing
    pub fn intersect(&self, other: &Value) -> Option<Value> {
        use Value::*;

        match (self, other) {
            (List(items), other) | (other, List(items)) => intersect_list(items, other),

            (Int(a), Int(b)) => (a == b).then(|| Int(*a)),
            (Int(v), IntRange { min, max, step }) | (IntRange { min, max, step }, Int(v)) => {
                (v >= min && v <= max && on_step(*v, *min, *step)).then(|| Int(*v))
            }
            (
                IntRange { min: a_min, max: a_max, step: a_step },
                IntRange { min: b_min, max: b_max, step: b_step },
            ) => intersect_int_ranges((*a_min, *a_max, *a_step), (*b_min, *b_max, *b_step)),

            (Double(a), Double(b)) => (a == b).then(|| Double(*a)),
            (Double(v), DoubleRange { min, max }) | (DoubleRange { min, max }, Double(v)) => {
                (v >= min && v <= max).then(|| Double(*v))
            }
            (DoubleRange { min: a_min, max: a_max }, DoubleRange { min: b_min, max: b_max }) => {
                let lo = a_min.max(*b_min);
                let hi = a_max.min(*b_max);
                match lo.partial_cmp(&hi)? {
                    std::cmp::Ordering::Greater => None,
                    std::cmp::Ordering::Equal => Some(Double(lo)),
                    std::cmp::Ordering::Less => Some(DoubleRange { min: lo, max: hi }),
                }
            }

            (Fraction(a), Fraction(b)) => (a == b).then(|| Fraction(*a)),
            (Fraction(v), FractionRange { min, max }) | (FractionRange { min, max }, Fraction(v)) => {
                (v >= min && v <= max).then(|| Fraction(*v))
            }
            (FractionRange { min: a_min, max: a_max }, FractionRange { min: b_min, max: b_max }) => {
                let lo = (*a_min).max(*b_min);
                let hi = (*a_max).min(*b_max);
                match lo.cmp(&hi) {
                    std::cmp::Ordering::Greater => None,
                    std::cmp::Ordering::Equal => Some(Fraction(lo)),
                    std::cmp::Ordering::Less => Some(FractionRange { min: lo, max: hi }),
                }
            }

            (Bool(a), Bool(b)) => (a == b).then(|| Bool(*a)),
            (Str(a), Str(b)) => (a == b).then(|| Str(a.clone())),
            (Enum { type_name: ta, value: a }, Enum { type_name: tb, value: b }) => {
                (ta == tb && a == b).then(|| self.clone())
            }
            // enums from gst-inspect output lose their type, match them by nick
            (Enum { value, .. }, Str(text)) | (Str(text), Enum { value, .. }) => {
                (value == text).then(|| match self {
                    Enum { .. } => self.clone(),
                    _ => other.clone(),
                })
            }

            (Array(a), Array(b)) if a.len() == b.len() => a
                .iter()
                .zip(b)
                .map(|(x, y)| x.intersect(y))
                .collect::<Option<Vec<_>>>()
                .map(Array),

            (Other { type_name: ta, text: a }, Other { type_name: tb, text: b }) => {
                (ta == tb && a == b).then(|| self.clone())
            }

            _ => None,
        }
    }
}

fn intersect_list(items: &[Value], other: &Value) -> Option<Value> {
    let mut out: Vec<Value> = Vec::new();
    for item in items {
        match item.intersect(other) {
            Some(Value::List(nested)) => {
                for value in nested {
                    if !out.contains(&value) {
                        out.push(value);
                    }
                }
            }
            Some(value) => {
                if !out.contains(&value) {
                    out.push(value);
                }
            }
            None => {}
        }
    }
    match out.len() {
        0 => None,
        1 => out.pop(),
        _ => Some(Value::List(out)),
    }
}

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 {
        a.abs()
    } else {
        gcd(b, a % b)
    }
}

fn int_range_or_value(min: i64, max: i64, step: i64) -> Value {
    if min == max {
        Value::Int(min)
    } else {
        Value::IntRange { min, max, step }
    }
}

/// True when `v` lies on the grid `min + k * step`
fn on_step(v: i64, min: i64, step: i64) -> bool {
    step <= 1 || (i128::from(v) - i128::from(min)).rem_euclid(i128::from(step)) == 0
}

// Grid arithmetic runs in i128: bounds near i64::MIN/MAX would overflow in i64.
fn intersect_int_ranges(a: (i64, i64, i64), b: (i64, i64, i64)) -> Option<Value> {
    let (a_min, a_max, a_step) = a;
    let (b_min, b_max, b_step) = b;
    let lo = a_min.max(b_min);
    let hi = a_max.min(b_max);
    if lo > hi {
        return None;
    }
    let (a_step, b_step) = (a_step.max(1), b_step.max(1));
    if a_step == 1 && b_step == 1 {
        return Some(int_range_or_value(lo, hi, 1));
    }

    let step = i64::try_from(i128::from(a_step / gcd(a_step, b_step)) * i128::from(b_step)).ok()?;
    let (lo, hi) = (i128::from(lo), i128::from(hi));
    let (a_min, b_min) = (i128::from(a_min), i128::from(b_min));
    let (a_step, b_step) = (i128::from(a_step), i128::from(b_step));

    // first value at or above `lo` on the grid of `a`, then walk until it is on `b` as well
    let mut candidate = lo + (a_min - lo).rem_euclid(a_step);
    let mut first = None;
    for _ in 0..b_step {
        if candidate > hi {
            break;
        }
        if (candidate - b_min).rem_euclid(b_step) == 0 {
            first = Some(candidate);
            break;
        }
        candidate += a_step;
    }
    let first = first?;
    let last = first + (hi - first) / i128::from(step) * i128::from(step);
    Some(int_range_or_value(
        i64::try_from(first).ok()?,
        i64::try_from(last).ok()?,
        step,
    ))
}

/// Intersect two structures with equal name and features
pub fn intersect_structures(a: &Structure, b: &Structure) -> Option<Structure> {
    if a.name != b.name || a.features != b.features {
        return None;
    }
    let mut out = Structure::new(a.name.clone());
    out.features = a.features.clone();

    for (name, value) in &a.fields {
        match b.get(name) {
            Some(theirs) => out.set(name.clone(), value.intersect(theirs)?),
            None => out.set(name.clone(), value.clone()),
        }
    }
    for (name, value) in &b.fields {
        if a.get(name).is_none() {
            out.set(name.clone(), value.clone());
        }
    }
    Some(out)
}

pub fn intersect_caps(a: &Caps, b: &Caps) -> Caps {
    if a.is_any() {
        return b.clone();
    }
    if b.is_any() {
        return a.clone();
    }

    let mut structures: Vec<Structure> = Vec::new();
    for left in a.structures() {
        for right in b.structures() {
            if let Some(common) = intersect_structures(left, right) {
                if !structures.contains(&common) {
                    structures.push(common);
                }
            }
        }
    }
    Caps::from_structures(structures)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Compatibility {
    pub compatible: bool,
    pub caps1_any: bool,
    pub caps2_any: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intersection: Option<Caps>,
}

/// Whether two descriptors share at least one format
pub fn intersects(a: &Caps, b: &Caps) -> Compatibility {
    let common = intersect_caps(a, b);
    let compatible = !common.is_empty();
    Compatibility {
        compatible,
        caps1_any: a.is_any(),
        caps2_any: b.is_any(),
        intersection: compatible.then_some(common),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PadPair {
    pub src_pad: String,
    pub sink_pad: String,
    pub src_caps: String,
    pub sink_caps: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intersection: Option<Caps>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkReport {
    pub can_link: bool,
    pub src_element: String,
    pub sink_element: String,
    pub compatible_pads: Vec<PadPair>,
}

/// Every (output, input) template pair whose caps intersect
pub fn can_link(
    src_templates: &[PadTemplate],
    sink_templates: &[PadTemplate],
    src_pad: Option<&str>,
    sink_pad: Option<&str>,
) -> Result<Vec<PadPair>, NegotiationError> {
    let outputs: Vec<&PadTemplate> = src_templates
        .iter()
        .filter(|t| t.direction == PadDirection::Src)
        .collect();
    if outputs.is_empty() {
        return Err(NegotiationError::NotFound("source element has no src pads".to_string()));
    }
    let inputs: Vec<&PadTemplate> = sink_templates
        .iter()
        .filter(|t| t.direction == PadDirection::Sink)
        .collect();
    if inputs.is_empty() {
        return Err(NegotiationError::NotFound("sink element has no sink pads".to_string()));
    }

    // a pad filter matching nothing is a plain "no pairs" answer
    let outputs = outputs.into_iter().filter(|t| src_pad.map_or(true, |p| t.matches_pad(p)));
    let inputs: Vec<&PadTemplate> = inputs
        .into_iter()
        .filter(|t| sink_pad.map_or(true, |p| t.matches_pad(p)))
        .collect();

    let mut pairs = Vec::new();
    for output in outputs {
        for input in &inputs {
            let result = intersects(&output.caps, &input.caps);
            if result.compatible {
                pairs.push(PadPair {
                    src_pad: output.name_template.clone(),
                    sink_pad: input.name_template.clone(),
                    src_caps: output.caps.to_string(),
                    sink_caps: input.caps.to_string(),
                    intersection: result.intersection,
                });
            }
        }
    }
    Ok(pairs)
}

/// Element-level link check, resolving both factories through `engine`
pub fn check_elements_can_link(
    engine: &dyn Engine,
    src_element: &str,
    sink_element: &str,
    src_pad: Option<&str>,
    sink_pad: Option<&str>,
) -> Result<LinkReport, NegotiationError> {
    let src = engine
        .find_factory(src_element)?
        .ok_or_else(|| NegotiationError::NotFound(format!("Element '{}' not found", src_element)))?;
    let sink = engine
        .find_factory(sink_element)?
        .ok_or_else(|| NegotiationError::NotFound(format!("Element '{}' not found", sink_element)))?;

    let pairs = can_link(&src.templates, &sink.templates, src_pad, sink_pad).map_err(|e| match e {
        NegotiationError::NotFound(msg) if msg.starts_with("source") => {
            NegotiationError::NotFound(format!("Element '{}' has no src pads", src_element))
        }
        NegotiationError::NotFound(_) => {
            NegotiationError::NotFound(format!("Element '{}' has no sink pads", sink_element))
        }
        other => other,
    })?;

    Ok(LinkReport {
        can_link: !pairs.is_empty(),
        src_element: src_element.to_string(),
        sink_element: sink_element.to_string(),
        compatible_pads: pairs,
    })
}

/// Structure names found on one side of an element, plus whether any is compressed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaClass {
    pub media_types: BTreeSet<String>,
    pub is_encoded: bool,
}

pub fn is_encoded_type(name: &str) -> bool {
    (name.starts_with("video/x-") && name != "video/x-raw")
        || (name.starts_with("audio/x-") && name != "audio/x-raw")
        || name.starts_with("audio/mpeg")
}

impl MediaClass {
    pub fn from_templates(templates: &[PadTemplate], direction: PadDirection) -> Self {
        let media_types: BTreeSet<String> = templates
            .iter()
            .filter(|t| t.direction == direction)
            .flat_map(|t| t.caps.structure_names().map(str::to_string).collect::<Vec<_>>())
            .collect();
        let is_encoded = media_types.iter().any(|t| is_encoded_type(t));
        Self { media_types, is_encoded }
    }

    pub fn has(&self, media_type: &str) -> bool {
        self.media_types.contains(media_type)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConverterSuggestion {
    pub converters: Vec<String>,
    pub pipeline: String,
    pub reason: String,
}

struct ChainTemplate {
    converters: &'static [&'static str],
    reason: &'static str,
}

/// Converter heuristic: when `applies` holds, each chain becomes a suggestion
pub struct ConverterRule {
    pub name: &'static str,
    applies: fn(&MediaClass, &MediaClass) -> bool,
    chains: &'static [ChainTemplate],
}

impl ConverterRule {
    pub fn applies(&self, src: &MediaClass, sink: &MediaClass) -> bool {
        (self.applies)(src, sink)
    }
}

pub const CONVERTER_RULES: &[ConverterRule] = &[
    ConverterRule {
        name: "raw-video",
        applies: |src, sink| src.has("video/x-raw") && sink.has("video/x-raw"),
        chains: &[
            ChainTemplate {
                converters: &["videoconvert"],
                reason: "Convert between video formats",
            },
            ChainTemplate {
                converters: &["videoconvert", "videoscale"],
                reason: "Convert format and scale video",
            },
        ],
    },
    ConverterRule {
        name: "raw-audio",
        applies: |src, sink| src.has("audio/x-raw") && sink.has("audio/x-raw"),
        chains: &[
            ChainTemplate {
                converters: &["audioconvert"],
                reason: "Convert between audio formats",
            },
            ChainTemplate {
                converters: &["audioconvert", "audioresample"],
                reason: "Convert format and resample audio",
            },
        ],
    },
    ConverterRule {
        name: "decode",
        applies: |src, sink| src.is_encoded && !sink.is_encoded,
        chains: &[ChainTemplate {
            converters: &["decodebin"],
            reason: "Decode encoded media",
        }],
    },
    ConverterRule {
        name: "encode-video",
        applies: |src, sink| !src.is_encoded && sink.is_encoded && (src.has("video") || src.has("video/x-raw")),
        chains: &[ChainTemplate {
            converters: &["videoconvert", "x264enc"],
            reason: "Encode video to H.264",
        }],
    },
    ConverterRule {
        name: "encode-audio",
        applies: |src, sink| !src.is_encoded && sink.is_encoded && (src.has("audio") || src.has("audio/x-raw")),
        chains: &[ChainTemplate {
            converters: &["audioconvert", "lamemp3enc"],
            reason: "Encode audio to MP3",
        }],
    },
];

/// Used only when no rule in [`CONVERTER_RULES`] applies
pub const FALLBACK_RULE: ConverterRule = ConverterRule {
    name: "generic-decode",
    applies: |_, _| true,
    chains: &[
        ChainTemplate {
            converters: &["decodebin", "videoconvert", "videoscale"],
            reason: "Generic decode and convert (video)",
        },
        ChainTemplate {
            converters: &["decodebin", "audioconvert", "audioresample"],
            reason: "Generic decode and convert (audio)",
        },
    ],
};

fn expand(rule: &ConverterRule, src_name: &str, sink_name: &str, out: &mut Vec<ConverterSuggestion>) {
    for chain in rule.chains {
        let mut stages = vec![src_name];
        stages.extend(chain.converters.iter().copied());
        stages.push(sink_name);
        out.push(ConverterSuggestion {
            converters: chain.converters.iter().map(|c| c.to_string()).collect(),
            pipeline: stages.join(" ! "),
            reason: chain.reason.to_string(),
        });
    }
}

/// Run the rule table for two media classes
pub fn suggest_for_classes(
    src_name: &str,
    src: &MediaClass,
    sink_name: &str,
    sink: &MediaClass,
) -> Vec<ConverterSuggestion> {
    let mut suggestions = Vec::new();
    for rule in CONVERTER_RULES {
        if rule.applies(src, sink) {
            expand(rule, src_name, sink_name, &mut suggestions);
        }
    }
    if suggestions.is_empty() {
        expand(&FALLBACK_RULE, src_name, sink_name, &mut suggestions);
    }
    suggestions
}

pub fn suggest_converters(
    src_name: &str,
    src_templates: &[PadTemplate],
    sink_name: &str,
    sink_templates: &[PadTemplate],
) -> Vec<ConverterSuggestion> {
    let src = MediaClass::from_templates(src_templates, PadDirection::Src);
    let sink = MediaClass::from_templates(sink_templates, PadDirection::Sink);
    suggest_for_classes(src_name, &src, sink_name, &sink)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConverterAdvice {
    pub src_element: String,
    pub sink_element: String,
    pub direct_link_possible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub src_output_types: Vec<String>,
    pub sink_input_types: Vec<String>,
    pub suggestions: Vec<ConverterSuggestion>,
}

/// Converter suggestions for two installed elements, unless they already link
pub fn advise_converters(
    engine: &dyn Engine,
    src_element: &str,
    sink_element: &str,
) -> Result<ConverterAdvice, NegotiationError> {
    let link = check_elements_can_link(engine, src_element, sink_element, None, None)?;
    if link.can_link {
        return Ok(ConverterAdvice {
            src_element: src_element.to_string(),
            sink_element: sink_element.to_string(),
            direct_link_possible: true,
            message: Some("Elements can be linked directly without converters".to_string()),
            src_output_types: Vec::new(),
            sink_input_types: Vec::new(),
            suggestions: Vec::new(),
        });
    }

    // both factories resolved in the link check above
    let src = engine
        .find_factory(src_element)?
        .ok_or_else(|| NegotiationError::NotFound(format!("Element '{}' not found", src_element)))?;
    let sink = engine
        .find_factory(sink_element)?
        .ok_or_else(|| NegotiationError::NotFound(format!("Element '{}' not found", sink_element)))?;

    let src_class = MediaClass::from_templates(&src.templates, PadDirection::Src);
    let sink_class = MediaClass::from_templates(&sink.templates, PadDirection::Sink);
    let suggestions = suggest_for_classes(src_element, &src_class, sink_element, &sink_class);

    Ok(ConverterAdvice {
        src_element: src_element.to_string(),
        sink_element: sink_element.to_string(),
        direct_link_possible: false,
        message: None,
        src_output_types: src_class.media_types.into_iter().collect(),
        sink_input_types: sink_class.media_types.into_iter().collect(),
        suggestions,
    })
}
