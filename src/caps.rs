//! GStreamer caps model and parser
//!
//! Caps are parsed from the GStreamer string serialization:
//!
//! ```text
//! video/x-raw, format=(string){ I420, NV12 }, width=(int)[ 1, 4096 ]; audio/x-raw
//! ```
//!
//! Values keep their typed shape (ranges, lists, arrays, fractions, enums).
//! Native types the parser does not model end up in [`Value::Other`] with their
//! textual form preserved.

use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value as JsonValue};
use std::cmp::Ordering;
use std::fmt::{self, Write as _};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CapsError {
    #[error("Invalid caps at position {position}: {message}")]
    Syntax { position: usize, message: String },
}

/// Rational number as used by GStreamer framerates and aspect ratios
#[derive(Debug, Clone, Copy)]
pub struct Fraction {
    pub num: i32,
    pub denom: i32,
}

impl Fraction {
    /// Build a fraction, keeping the sign on the numerator.
    /// A negative denominator paired with `i32::MIN` saturates.
    pub fn new(num: i32, denom: i32) -> Self {
        if denom < 0 {
            Self {
                num: num.saturating_neg(),
                denom: denom.saturating_neg(),
            }
        } else {
            Self { num, denom }
        }
    }

    /// Like [`Fraction::new`], but `None` when moving the sign would overflow
    pub fn checked(num: i32, denom: i32) -> Option<Self> {
        if denom < 0 {
            Some(Self {
                num: num.checked_neg()?,
                denom: denom.checked_neg()?,
            })
        } else {
            Some(Self { num, denom })
        }
    }
}

impl PartialEq for Fraction {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Fraction {}

impl PartialOrd for Fraction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fraction {
    fn cmp(&self, other: &Self) -> Ordering {
        // denominators are kept positive, so cross multiplication preserves order
        let lhs = self.num as i64 * other.denom as i64;
        let rhs = other.num as i64 * self.denom as i64;
        lhs.cmp(&rhs)
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.denom)
    }
}

/// Typed caps field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Double(f64),
    Bool(bool),
    Str(String),
    Enum { type_name: String, value: String },
    IntRange { min: i64, max: i64, step: i64 },
    DoubleRange { min: f64, max: f64 },
    Fraction(Fraction),
    FractionRange { min: Fraction, max: Fraction },
    List(Vec<Value>),
    Array(Vec<Value>),
    /// Native type without a dedicated variant (bitmasks, flagsets, ...)
    Other { type_name: String, text: String },
}

impl Value {
    /// A value is fixed when it denotes exactly one concrete value
    pub fn is_fixed(&self) -> bool {
        match self {
            Value::IntRange { .. }
            | Value::DoubleRange { .. }
            | Value::FractionRange { .. }
            | Value::List(_) => false,
            Value::Array(items) => items.iter().all(Value::is_fixed),
            _ => true,
        }
    }

    /// GStreamer type annotation used when serializing
    pub fn type_name(&self) -> &str {
        match self {
            Value::Int(_) | Value::IntRange { .. } => "int",
            Value::Double(_) | Value::DoubleRange { .. } => "double",
            Value::Bool(_) => "boolean",
            Value::Str(_) => "string",
            Value::Enum { type_name, .. } | Value::Other { type_name, .. } => type_name,
            Value::Fraction(_) | Value::FractionRange { .. } => "fraction",
            Value::List(items) | Value::Array(items) => {
                items.first().map(Value::type_name).unwrap_or("string")
            }
        }
    }

    /// Structured JSON form, one shape per variant
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Int(v) => json!(v),
            Value::Double(v) => json!(v),
            Value::Bool(v) => json!(v),
            Value::Str(v) => json!(v),
            Value::Enum { value, .. } => json!({ "type": "enum", "value": value }),
            Value::IntRange { min, max, step } => {
                let mut range = json!({ "type": "int_range", "min": min, "max": max });
                if *step != 1 {
                    range["step"] = json!(step);
                }
                range
            }
            Value::DoubleRange { min, max } => {
                json!({ "type": "double_range", "min": min, "max": max })
            }
            Value::Fraction(f) => json!({ "type": "fraction", "value": f.to_string() }),
            Value::FractionRange { min, max } => json!({
                "type": "fraction_range",
                "min": min.to_string(),
                "max": max.to_string()
            }),
            Value::List(items) => json!({
                "type": "list",
                "values": items.iter().map(Value::to_json).collect::<Vec<_>>()
            }),
            Value::Array(items) => json!({
                "type": "array",
                "values": items.iter().map(Value::to_json).collect::<Vec<_>>()
            }),
            Value::Other { text, .. } => json!(text),
        }
    }

    fn write_body(&self, out: &mut String, compact: bool) {
        let sep = if compact { "," } else { ", " };
        let pad = if compact { "" } else { " " };
        match self {
            Value::Int(v) => {
                let _ = write!(out, "{v}");
            }
            Value::Double(v) => {
                let _ = write!(out, "{v}");
            }
            Value::Bool(v) => {
                let _ = write!(out, "{v}");
            }
            Value::Str(v) => write_string(out, v),
            Value::Enum { value, .. } => out.push_str(value),
            Value::IntRange { min, max, step } => {
                let _ = write!(out, "[{pad}{min}{sep}{max}");
                if *step != 1 {
                    let _ = write!(out, "{sep}{step}");
                }
                let _ = write!(out, "{pad}]");
            }
            Value::DoubleRange { min, max } => {
                let _ = write!(out, "[{pad}{min}{sep}{max}{pad}]");
            }
            Value::Fraction(f) => {
                let _ = write!(out, "{f}");
            }
            Value::FractionRange { min, max } => {
                let _ = write!(out, "[{pad}{min}{sep}{max}{pad}]");
            }
            Value::List(items) => write_collection(out, items, '{', '}', compact),
            Value::Array(items) => write_collection(out, items, '<', '>', compact),
            Value::Other { text, .. } => out.push_str(text),
        }
    }

    /// Writes `(type)body`
    fn write_typed(&self, out: &mut String, compact: bool) {
        // collections carry the element type outside the brackets when uniform
        let uniform = match self {
            Value::List(items) | Value::Array(items) => uniform_type(items),
            _ => true,
        };
        if uniform {
            let _ = write!(out, "({})", self.type_name());
        }
        self.write_body(out, compact);
    }
}

fn uniform_type(items: &[Value]) -> bool {
    let mut names = items.iter().map(Value::type_name);
    match names.next() {
        Some(first) => names.all(|name| name == first),
        None => true,
    }
}

fn write_collection(out: &mut String, items: &[Value], open: char, close: char, compact: bool) {
    let uniform = uniform_type(items);
    out.push(open);
    if !compact {
        out.push(' ');
    }
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            out.push_str(if compact { "," } else { ", " });
        }
        if uniform {
            item.write_body(out, compact);
        } else {
            item.write_typed(out, compact);
        }
    }
    if !compact {
        out.push(' ');
    }
    out.push(close);
}

fn is_plain_string_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+' | '/' | ':' | '.')
}

fn write_string(out: &mut String, value: &str) {
    if !value.is_empty() && value.chars().all(is_plain_string_char) {
        out.push_str(value);
        return;
    }
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

/// One named structure inside a caps descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    pub name: String,
    /// Caps features, e.g. `memory:GLMemory`. Empty means system memory.
    pub features: Vec<String>,
    /// Fields in insertion order
    pub fields: Vec<(String, Value)>,
}

impl Structure {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            features: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Set a field, replacing any previous value in place
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn is_fixed(&self) -> bool {
        self.fields.iter().all(|(_, v)| v.is_fixed())
    }

    pub fn to_json(&self) -> JsonValue {
        let mut fields = Map::new();
        for (name, value) in &self.fields {
            fields.insert(name.clone(), value.to_json());
        }
        let mut out = json!({ "name": self.name, "fields": fields });
        if !self.features.is_empty() {
            out["features"] = json!(self.features);
        }
        out
    }

    fn write(&self, out: &mut String, compact: bool) {
        out.push_str(&self.name);
        if !self.features.is_empty() {
            out.push('(');
            out.push_str(&self.features.join(if compact { "," } else { ", " }));
            out.push(')');
        }
        for (name, value) in &self.fields {
            out.push_str(if compact { "," } else { ", " });
            out.push_str(name);
            out.push('=');
            value.write_typed(out, compact);
        }
    }
}

/// Capability descriptor: ANY, EMPTY, or an ordered set of structures
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Caps {
    structures: Vec<Structure>,
    any: bool,
}

impl Caps {
    pub fn new_any() -> Self {
        Self {
            structures: Vec::new(),
            any: true,
        }
    }

    pub fn new_empty() -> Self {
        Self::default()
    }

    pub fn from_structures(structures: Vec<Structure>) -> Self {
        Self {
            structures,
            any: false,
        }
    }

    pub fn structures(&self) -> &[Structure] {
        &self.structures
    }

    pub fn is_any(&self) -> bool {
        self.any
    }

    pub fn is_empty(&self) -> bool {
        !self.any && self.structures.is_empty()
    }

    /// Exactly one structure with no ranges or lists
    pub fn is_fixed(&self) -> bool {
        !self.any && self.structures.len() == 1 && self.structures[0].is_fixed()
    }

    pub fn structure_names(&self) -> impl Iterator<Item = &str> {
        self.structures.iter().map(|s| s.name.as_str())
    }

    /// Serialization without whitespace, suitable for gst-launch descriptions
    pub fn to_launch_string(&self) -> String {
        self.render(true)
    }

    pub fn to_json(&self) -> JsonValue {
        json!({
            "valid": true,
            "is_any": self.is_any(),
            "is_empty": self.is_empty(),
            "is_fixed": self.is_fixed(),
            "structures": self.structures.iter().map(Structure::to_json).collect::<Vec<_>>(),
        })
    }

    fn render(&self, compact: bool) -> String {
        if self.any {
            return "ANY".to_string();
        }
        if self.structures.is_empty() {
            return "EMPTY".to_string();
        }
        let mut out = String::new();
        for (idx, structure) in self.structures.iter().enumerate() {
            if idx > 0 {
                out.push_str(if compact { ";" } else { "; " });
            }
            structure.write(&mut out, compact);
        }
        out
    }
}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(false))
    }
}

impl FromStr for Caps {
    type Err = CapsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

impl Serialize for Caps {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Parse a caps string
pub fn parse(text: &str) -> Result<Caps, CapsError> {
    let mut parser = Parser::new(text);
    parser.parse_caps()
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, CapsError> {
        Err(CapsError::Syntax {
            position: self.pos,
            message: message.into(),
        })
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), CapsError> {
        if self.eat(expected) {
            Ok(())
        } else {
            match self.peek() {
                Some(c) => self.error(format!("expected '{expected}', found '{c}'")),
                None => self.error(format!("expected '{expected}', found end of input")),
            }
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if pred(c)) {
            self.bump();
        }
        &self.src[start..self.pos]
    }

    fn parse_caps(&mut self) -> Result<Caps, CapsError> {
        let trimmed = self.src.trim();
        match trimmed {
            "ANY" => return Ok(Caps::new_any()),
            "EMPTY" | "NONE" => return Ok(Caps::new_empty()),
            "" => return self.error("empty caps string"),
            _ => {}
        }

        let mut structures = Vec::new();
        loop {
            self.skip_ws();
            if self.peek().is_none() {
                break;
            }
            structures.push(self.parse_structure()?);
            self.skip_ws();
            match self.peek() {
                Some(';') => {
                    self.bump();
                }
                None => break,
                Some(c) => return self.error(format!("unexpected '{c}' after structure")),
            }
        }
        Ok(Caps::from_structures(structures))
    }

    fn parse_structure(&mut self) -> Result<Structure, CapsError> {
        let name = self.take_while(|c| c.is_ascii_alphanumeric() || "/_-+.".contains(c));
        if name.is_empty() || !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
            return self.error("structure name must start with a letter");
        }
        let mut structure = Structure::new(name);

        if self.peek() == Some('(') {
            self.bump();
            loop {
                self.skip_ws();
                let feature = self.take_while(|c| !matches!(c, ',' | ')') && !c.is_whitespace());
                if feature.is_empty() {
                    return self.error("empty caps feature");
                }
                structure.features.push(feature.to_string());
                if self.eat(',') {
                    continue;
                }
                self.expect(')')?;
                break;
            }
            // system memory is the implicit default
            structure.features.retain(|f| f != "memory:SystemMemory");
        }

        loop {
            self.skip_ws();
            if self.peek() != Some(',') {
                break;
            }
            self.bump();
            self.skip_ws();
            // tolerate a trailing comma
            if matches!(self.peek(), None | Some(';')) {
                break;
            }
            let field = self.take_while(|c| c.is_ascii_alphanumeric() || "_-+.:".contains(c));
            if field.is_empty() {
                return self.error("expected field name");
            }
            self.expect('=')?;
            let value = self.parse_value(None)?;
            structure.set(field, value);
        }
        Ok(structure)
    }

    fn parse_type_hint(&mut self) -> Result<Option<String>, CapsError> {
        self.skip_ws();
        if self.peek() != Some('(') {
            return Ok(None);
        }
        self.bump();
        let name = self.take_while(|c| c != ')');
        if name.trim().is_empty() {
            return self.error("empty type annotation");
        }
        let name = name.trim().to_string();
        self.expect(')')?;
        Ok(Some(name))
    }

    fn parse_value(&mut self, inherited: Option<&str>) -> Result<Value, CapsError> {
        let own = self.parse_type_hint()?;
        let hint = own.as_deref().or(inherited);
        self.skip_ws();
        match self.peek() {
            Some('[') => self.parse_range(hint),
            Some('{') => {
                self.bump();
                let items = self.parse_items('}', hint)?;
                Ok(Value::List(items))
            }
            Some('<') => {
                self.bump();
                let items = self.parse_items('>', hint)?;
                Ok(Value::Array(items))
            }
            Some('"') => {
                let start = self.pos;
                let text = self.parse_quoted()?;
                convert_atom(&text, true, hint).map_err(|message| CapsError::Syntax {
                    position: start,
                    message,
                })
            }
            Some(_) => {
                let start = self.pos;
                let text = self.take_while(|c| !c.is_whitespace() && !",;]}>".contains(c));
                if text.is_empty() {
                    return self.error("expected a value");
                }
                convert_atom(text, false, hint).map_err(|message| CapsError::Syntax {
                    position: start,
                    message,
                })
            }
            None => self.error("expected a value, found end of input"),
        }
    }

    fn parse_items(&mut self, close: char, hint: Option<&str>) -> Result<Vec<Value>, CapsError> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_value(hint)?);
            if self.eat(',') {
                continue;
            }
            self.expect(close)?;
            return Ok(items);
        }
    }

    fn parse_range(&mut self, hint: Option<&str>) -> Result<Value, CapsError> {
        let start = self.pos;
        self.bump();
        let bounds = self.parse_items(']', hint)?;
        let invalid = |message: &str| CapsError::Syntax {
            position: start,
            message: message.to_string(),
        };

        if bounds.len() != 2 && bounds.len() != 3 {
            return Err(invalid("range needs a minimum and a maximum"));
        }

        match bounds.as_slice() {
            [Value::Int(min), Value::Int(max)] => int_range(*min, *max, 1).ok_or_else(|| invalid("range minimum exceeds maximum")),
            [Value::Int(min), Value::Int(max), Value::Int(step)] => {
                if *step <= 0 {
                    return Err(invalid("range step must be positive"));
                }
                int_range(*min, *max, *step).ok_or_else(|| invalid("range minimum exceeds maximum"))
            }
            [min, max] => {
                if let (Some(min), Some(max)) = (as_fraction(min), as_fraction(max)) {
                    if matches!(bounds[0], Value::Fraction(_)) || matches!(bounds[1], Value::Fraction(_)) {
                        if min > max {
                            return Err(invalid("range minimum exceeds maximum"));
                        }
                        return Ok(Value::FractionRange { min, max });
                    }
                }
                match (as_double(min), as_double(max)) {
                    (Some(min), Some(max)) if min <= max => Ok(Value::DoubleRange { min, max }),
                    (Some(_), Some(_)) => Err(invalid("range minimum exceeds maximum")),
                    _ => Err(invalid("range bounds must be numeric")),
                }
            }
            _ => Err(invalid("only integer ranges accept a step")),
        }
    }

    fn parse_quoted(&mut self) -> Result<String, CapsError> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some(c) => out.push(c),
                    None => return self.error("unterminated escape"),
                },
                Some('"') => return Ok(out),
                Some(c) => out.push(c),
                None => return self.error("unterminated string"),
            }
        }
    }
}

fn int_range(min: i64, max: i64, step: i64) -> Option<Value> {
    (min <= max).then_some(Value::IntRange { min, max, step })
}

fn as_fraction(value: &Value) -> Option<Fraction> {
    match value {
        Value::Fraction(f) => Some(*f),
        Value::Int(v) => i32::try_from(*v).ok().map(|n| Fraction::new(n, 1)),
        _ => None,
    }
}

fn as_double(value: &Value) -> Option<f64> {
    match value {
        Value::Double(v) => Some(*v),
        Value::Int(v) => Some(*v as f64),
        _ => None,
    }
}

fn parse_fraction(text: &str) -> Option<Fraction> {
    let (num, denom) = text.split_once('/')?;
    let num: i32 = num.trim().parse().ok()?;
    let denom: i32 = denom.trim().parse().ok()?;
    if denom == 0 {
        return None;
    }
    Fraction::checked(num, denom)
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "yes" | "t" | "1" => Some(true),
        "false" | "no" | "f" | "0" => Some(false),
        _ => None,
    }
}

fn parse_int(text: &str) -> Option<i64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok();
    }
    text.parse().ok()
}

fn is_flag_type(name: &str) -> bool {
    matches!(name, "bitmask" | "flagset" | "GstFlagSet") || name.ends_with("Flags") || name.ends_with("FlagsSet")
}

/// Convert a single token according to its type annotation, or infer the type
fn convert_atom(text: &str, quoted: bool, hint: Option<&str>) -> Result<Value, String> {
    let Some(hint) = hint else {
        if quoted {
            return Ok(Value::Str(text.to_string()));
        }
        if let Some(v) = parse_int(text) {
            return Ok(Value::Int(v));
        }
        if text.chars().any(|c| c.is_ascii_digit()) {
            if let Ok(v) = text.parse::<f64>() {
                return Ok(Value::Double(v));
            }
        }
        if let Some(f) = parse_fraction(text) {
            return Ok(Value::Fraction(f));
        }
        if let Some(b) = match text {
            "true" | "TRUE" | "yes" => Some(true),
            "false" | "FALSE" | "no" => Some(false),
            _ => None,
        } {
            return Ok(Value::Bool(b));
        }
        return Ok(Value::Str(text.to_string()));
    };

    match hint {
        "int" | "i" | "uint" | "u" | "int64" | "uint64" | "gint" | "guint" => {
            parse_int(text).map(Value::Int).ok_or_else(|| format!("'{text}' is not an integer"))
        }
        "double" | "d" | "float" | "f" | "gdouble" | "gfloat" => text
            .parse()
            .map(Value::Double)
            .map_err(|_| format!("'{text}' is not a number")),
        "string" | "str" | "s" | "gchararray" => Ok(Value::Str(text.to_string())),
        "boolean" | "bool" | "b" | "gboolean" => {
            parse_bool(text).map(Value::Bool).ok_or_else(|| format!("'{text}' is not a boolean"))
        }
        "fraction" | "GstFraction" => parse_fraction(text)
            .or_else(|| text.parse::<i32>().ok().map(|n| Fraction::new(n, 1)))
            .map(Value::Fraction)
            .ok_or_else(|| format!("'{text}' is not a fraction")),
        t if is_flag_type(t) => Ok(Value::Other {
            type_name: t.to_string(),
            text: text.to_string(),
        }),
        t => Ok(Value::Enum {
            type_name: t.to_string(),
            value: text.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_structure() {
        let caps = parse("video/x-raw, format=(string)I420, width=(int)1920, framerate=30/1").unwrap();
        assert_eq!(caps.structures().len(), 1);
        let s = &caps.structures()[0];
        assert_eq!(s.name, "video/x-raw");
        assert_eq!(s.get("format"), Some(&Value::Str("I420".into())));
        assert_eq!(s.get("width"), Some(&Value::Int(1920)));
        assert_eq!(s.get("framerate"), Some(&Value::Fraction(Fraction::new(30, 1))));
        assert!(caps.is_fixed());
    }

    #[test]
    fn test_parse_any_and_empty() {
        assert!(parse("ANY").unwrap().is_any());
        assert!(parse(" EMPTY ").unwrap().is_empty());
        assert!(parse("NONE").unwrap().is_empty());
        assert!(!parse("ANY").unwrap().is_fixed());
    }

    #[test]
    fn test_parse_ranges_lists_arrays() {
        let caps = parse(
            "audio/x-raw, rate=[ 8000, 48000 ], channels=(int){ 1, 2 }, \
             framerate=(fraction)[ 0/1, 2147483647/1 ], volume=[0.0, 1.5], \
             channel-positions=<front-left, front-right>",
        )
        .unwrap();
        let s = &caps.structures()[0];
        assert_eq!(s.get("rate"), Some(&Value::IntRange { min: 8000, max: 48000, step: 1 }));
        assert_eq!(s.get("channels"), Some(&Value::List(vec![Value::Int(1), Value::Int(2)])));
        assert!(matches!(s.get("framerate"), Some(Value::FractionRange { .. })));
        assert_eq!(s.get("volume"), Some(&Value::DoubleRange { min: 0.0, max: 1.5 }));
        assert!(matches!(s.get("channel-positions"), Some(Value::Array(items)) if items.len() == 2));
        assert!(!caps.is_fixed());
    }

    #[test]
    fn test_type_hint_applies_to_list_elements() {
        let caps = parse("video/x-raw, format=(string){ I420, 420 }").unwrap();
        assert_eq!(
            caps.structures()[0].get("format"),
            Some(&Value::List(vec![Value::Str("I420".into()), Value::Str("420".into())]))
        );
    }

    #[test]
    fn test_enum_and_fallback_types() {
        let caps = parse(
            "audio/x-raw, layout=(GstAudioLayout)interleaved, \
             multiview-flags=(GstVideoMultiviewFlagsSet)0:ffffffff, mask=(bitmask)0x3",
        )
        .unwrap();
        let s = &caps.structures()[0];
        assert_eq!(s.get("layout").unwrap().to_json(), json!({"type": "enum", "value": "interleaved"}));
        assert_eq!(s.get("multiview-flags").unwrap().to_json(), json!("0:ffffffff"));
        assert!(matches!(s.get("mask"), Some(Value::Other { .. })));
    }

    #[test]
    fn test_features_and_multiple_structures() {
        let caps = parse("video/x-raw(memory:GLMemory), format=RGBA; video/x-raw(memory:SystemMemory)").unwrap();
        assert_eq!(caps.structures().len(), 2);
        assert_eq!(caps.structures()[0].features, vec!["memory:GLMemory".to_string()]);
        assert!(caps.structures()[1].features.is_empty());
    }

    #[test]
    fn test_quoted_strings() {
        let caps = parse(r#"text/x-raw, title="hello, \"world\"""#).unwrap();
        assert_eq!(caps.structures()[0].get("title"), Some(&Value::Str(r#"hello, "world""#.into())));
        let text = caps.to_string();
        assert_eq!(parse(&text).unwrap(), caps);
    }

    #[test]
    fn test_round_trip_preserves_shape() {
        let inputs = [
            "video/x-raw, format=(string){ I420, NV12 }, width=[ 1, 4096, 2 ], height=(int)[ 1, 2160 ]",
            "audio/mpeg, mpegversion=(int)1, layer=3; audio/x-raw, rate=44100",
            "video/x-h264, stream-format=avc, alignment=au, parsed=true",
        ];
        for input in inputs {
            let caps = parse(input).unwrap();
            let reparsed = parse(&caps.to_string()).unwrap();
            assert_eq!(caps.structures().len(), reparsed.structures().len());
            for (a, b) in caps.structures().iter().zip(reparsed.structures()) {
                assert_eq!(a.field_names().collect::<Vec<_>>(), b.field_names().collect::<Vec<_>>());
            }
            assert_eq!(parse(&caps.to_launch_string()).unwrap(), caps);
        }
    }

    #[test]
    fn test_display_format() {
        let caps = parse("video/x-raw,format=I420,width=[1,100]").unwrap();
        assert_eq!(caps.to_string(), "video/x-raw, format=(string)I420, width=(int)[ 1, 100 ]");
        assert_eq!(caps.to_launch_string(), "video/x-raw,format=(string)I420,width=(int)[1,100]");
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("").is_err());
        assert!(parse("video/x-raw, width=").is_err());
        assert!(parse("video/x-raw, width=[ 10, 1 ]").is_err());
        assert!(parse("video/x-raw, width=(int)abc").is_err());
        assert!(parse("video/x-raw, format={ I420, NV12").is_err());
        assert!(parse("1video").is_err());
    }

    #[test]
    fn test_fraction_sign_overflow_is_a_syntax_error() {
        let err = parse("video/x-raw, framerate=(fraction)-2147483648/-1").unwrap_err();
        assert!(matches!(err, CapsError::Syntax { .. }));
        assert!(Fraction::checked(i32::MIN, -1).is_none());
        assert_eq!(Fraction::checked(3, -4), Some(Fraction::new(-3, 4)));
        assert_eq!(Fraction::new(i32::MIN, -1), Fraction::new(i32::MAX, 1));
    }

    #[test]
    fn test_fraction_ordering() {
        assert_eq!(Fraction::new(1, 2), Fraction::new(2, 4));
        assert!(Fraction::new(1, 3) < Fraction::new(1, 2));
        assert_eq!(Fraction::new(1, -2), Fraction::new(-1, 2));
    }
}
