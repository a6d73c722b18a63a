//! gst-launch description parser
//!
//! Understands the subset of the `gst-launch-1.0` grammar that pipeline tools
//! actually send:
//!
//! ```text
//! videotestsrc num-buffers=10 ! video/x-raw,width=320 ! tee name=t  t. ! queue ! fakesink
//! ```
//!
//! Chains are separated by whitespace, links by `!`. A chain position holding a
//! media type (or `ANY`) is a caps filter, `name.` / `name.pad` refer to a named
//! element.

use crate::caps::{self, Caps, CapsError};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Properties holding file system paths, rewritten against a working directory
pub const PATH_PROPERTIES: &[&str] = &["location", "filename", "file"];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DescriptionError {
    #[error("syntax error: empty pipeline description")]
    Empty,

    #[error("syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("syntax error: could not parse caps filter \"{text}\": {source}")]
    Caps { text: String, source: CapsError },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementSpec {
    pub factory: String,
    pub properties: Vec<(String, String)>,
}

impl ElementSpec {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapsFilter {
    pub caps: Caps,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub element: String,
    pub pad: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChainItem {
    Element(ElementSpec),
    Filter(CapsFilter),
    Reference(Reference),
}

/// Items linked one after another by `!`
#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    pub items: Vec<ChainItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDescription {
    chains: Vec<Chain>,
}

impl PipelineDescription {
    pub fn parse(text: &str) -> Result<Self, DescriptionError> {
        Parser::new(text).parse()
    }

    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    pub fn elements(&self) -> impl Iterator<Item = &ElementSpec> {
        self.chains.iter().flat_map(|c| &c.items).filter_map(|item| match item {
            ChainItem::Element(spec) => Some(spec),
            _ => None,
        })
    }

    /// Rewrite relative path properties so they point inside `dir`.
    /// Returns how many values were rewritten.
    pub fn resolve_paths(&mut self, dir: &Path) -> usize {
        let mut rewritten = 0;
        for chain in &mut self.chains {
            for item in &mut chain.items {
                let ChainItem::Element(spec) = item else {
                    continue;
                };
                for (key, value) in &mut spec.properties {
                    if !PATH_PROPERTIES.contains(&key.as_str()) || value.is_empty() || value.contains("://") {
                        continue;
                    }
                    if Path::new(value.as_str()).is_relative() {
                        *value = dir.join(value.as_str()).to_string_lossy().into_owned();
                        rewritten += 1;
                    }
                }
            }
        }
        rewritten
    }

    /// Serialize back to gst-launch text
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PipelineDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (ci, chain) in self.chains.iter().enumerate() {
            if ci > 0 {
                f.write_str("  ")?;
            }
            for (ii, item) in chain.items.iter().enumerate() {
                if ii > 0 {
                    f.write_str(" ! ")?;
                }
                match item {
                    ChainItem::Element(spec) => {
                        f.write_str(&spec.factory)?;
                        for (key, value) in &spec.properties {
                            write!(f, " {}={}", key, quote_value(value))?;
                        }
                    }
                    ChainItem::Filter(filter) => f.write_str(&filter.caps.to_launch_string())?,
                    ChainItem::Reference(reference) => {
                        write!(f, "{}.", reference.element)?;
                        if let Some(pad) = &reference.pad {
                            f.write_str(pad)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn quote_value(value: &str) -> String {
    let plain = !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '!' | '"' | '\'' | '\\' | ';'));
    if plain {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Strip quoting from a raw token, honoring backslash escapes
fn unquote(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut quote: Option<char> = None;
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match (c, quote) {
            ('\\', _) => {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            ('"' | '\'', None) => quote = Some(c),
            (q, Some(open)) if q == open => quote = None,
            _ => out.push(c),
        }
    }
    out
}

fn is_factory_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+')
}

fn is_property_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':')
}

/// Split `key=value`, ignoring `=` inside quotes
fn split_property(word: &str) -> Option<(&str, &str)> {
    let idx = word.find('=')?;
    let key = &word[..idx];
    if key.is_empty() || !key.chars().all(is_property_char) {
        return None;
    }
    Some((key, &word[idx + 1..]))
}

fn is_caps_word(word: &str) -> bool {
    let head = word.split([',', '=']).next().unwrap_or(word);
    word == "ANY" || head.contains('/')
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn syntax<T>(&self, position: usize, message: impl Into<String>) -> Result<T, DescriptionError> {
        Err(DescriptionError::Syntax {
            position,
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

    /// Consume characters until `stop` matches outside of quotes
    fn scan(&mut self, stop: impl Fn(char) -> bool) -> Result<&'a str, DescriptionError> {
        let start = self.pos;
        let mut quote: Option<(char, usize)> = None;
        while let Some(c) = self.peek() {
            match quote {
                Some((open, _)) => {
                    self.bump();
                    if c == '\\' {
                        self.bump();
                    } else if c == open {
                        quote = None;
                    }
                }
                None => {
                    if stop(c) {
                        break;
                    }
                    if c == '"' || c == '\'' {
                        quote = Some((c, self.pos));
                    }
                    self.bump();
                }
            }
        }
        if let Some((_, at)) = quote {
            return self.syntax(at, "unterminated quoted string");
        }
        Ok(&self.src[start..self.pos])
    }

    fn parse(mut self) -> Result<PipelineDescription, DescriptionError> {
        let mut chains = Vec::new();
        let mut current: Vec<ChainItem> = Vec::new();
        // set right after a '!', while the next item is still owed
        let mut expecting = false;
        let mut bang_at = 0;

        loop {
            self.skip_ws();
            let Some(c) = self.peek() else {
                break;
            };

            if c == '!' {
                if current.is_empty() || expecting {
                    return self.syntax(self.pos, "unexpected '!'");
                }
                bang_at = self.pos;
                self.bump();
                expecting = true;
                continue;
            }

            let start = self.pos;
            let word = self.scan(|c| c.is_whitespace() || c == '!')?;

            if !expecting {
                if let Some(ChainItem::Element(spec)) = current.last_mut() {
                    if let Some((key, value)) = split_property(word) {
                        spec.properties.push((key.to_string(), unquote(value)));
                        continue;
                    }
                }
                if !current.is_empty() {
                    chains.push(Chain {
                        items: std::mem::take(&mut current),
                    });
                }
            }

            let item = self.classify(word, start)?;
            current.push(item);
            expecting = false;
        }

        if expecting {
            return self.syntax(bang_at, "link without a sink element after '!'");
        }
        if !current.is_empty() {
            chains.push(Chain { items: current });
        }
        if chains.is_empty() {
            return Err(DescriptionError::Empty);
        }
        Ok(PipelineDescription { chains })
    }

    fn classify(&mut self, word: &'a str, start: usize) -> Result<ChainItem, DescriptionError> {
        if is_caps_word(word) {
            // caps filters may contain spaces, they run up to the next link
            self.scan(|c| c == '!')?;
            let text = self.src[start..self.pos].trim_end();
            let caps = caps::parse(&unquote(text)).map_err(|source| DescriptionError::Caps {
                text: text.to_string(),
                source,
            })?;
            return Ok(ChainItem::Filter(CapsFilter { caps }));
        }

        if let Some((key, _)) = split_property(word) {
            return self.syntax(start, format!("unexpected property '{key}' without an element"));
        }

        if let Some((element, pad)) = word.split_once('.') {
            if element.is_empty() || !element.chars().all(is_property_char) {
                return self.syntax(start, format!("unexpected reference '{word}'"));
            }
            return Ok(ChainItem::Reference(Reference {
                element: element.to_string(),
                pad: (!pad.is_empty()).then(|| pad.to_string()),
            }));
        }

        if let Some(bad) = word.chars().find(|c| !is_factory_char(*c)) {
            return self.syntax(start, format!("unexpected '{bad}' in element name '{word}'"));
        }

        Ok(ChainItem::Element(ElementSpec {
            factory: word.to_string(),
            properties: Vec::new(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factories(desc: &PipelineDescription) -> Vec<&str> {
        desc.elements().map(|e| e.factory.as_str()).collect()
    }

    #[test]
    fn test_parse_linear_chain() {
        let desc = PipelineDescription::parse("videotestsrc num-buffers=10 ! videoconvert ! fakesink sync=false").unwrap();
        assert_eq!(desc.chains().len(), 1);
        assert_eq!(factories(&desc), vec!["videotestsrc", "videoconvert", "fakesink"]);
        let src = desc.elements().next().unwrap();
        assert_eq!(src.property("num-buffers"), Some("10"));
    }

    #[test]
    fn test_parse_caps_filter_with_spaces() {
        let desc = PipelineDescription::parse("videotestsrc ! video/x-raw, width=320, height=240 ! fakesink").unwrap();
        let items = &desc.chains()[0].items;
        assert_eq!(items.len(), 3);
        match &items[1] {
            ChainItem::Filter(filter) => {
                assert_eq!(filter.caps.structures()[0].name, "video/x-raw");
                assert_eq!(filter.caps.structures()[0].fields.len(), 2);
            }
            other => panic!("expected caps filter, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_branches_and_references() {
        let desc = PipelineDescription::parse(
            "audiotestsrc ! tee name=t  t. ! queue ! fakesink  t.src_1 ! queue ! autoaudiosink",
        )
        .unwrap();
        assert_eq!(desc.chains().len(), 3);
        assert_eq!(
            desc.chains()[2].items[0],
            ChainItem::Reference(Reference {
                element: "t".into(),
                pad: Some("src_1".into())
            })
        );
    }

    #[test]
    fn test_quoted_property_values() {
        let desc = PipelineDescription::parse(r#"filesrc location="my clip.mp4" ! decodebin ! fakesink"#).unwrap();
        assert_eq!(desc.elements().next().unwrap().property("location"), Some("my clip.mp4"));
        let rendered = desc.render();
        assert!(rendered.contains(r#"location="my clip.mp4""#));
        assert_eq!(PipelineDescription::parse(&rendered).unwrap(), desc);
    }

    #[test]
    fn test_render_reparses_to_same_description() {
        let text = "videotestsrc pattern=ball ! video/x-raw,format=I420 ! x264enc ! mp4mux name=mux ! filesink location=out.mp4  audiotestsrc ! lamemp3enc ! mux.";
        let desc = PipelineDescription::parse(text).unwrap();
        assert_eq!(PipelineDescription::parse(&desc.render()).unwrap(), desc);
    }

    #[test]
    fn test_syntax_errors() {
        assert_eq!(PipelineDescription::parse("   "), Err(DescriptionError::Empty));
        for bad in [
            "! fakesink",
            "fakesrc ! ! fakesink",
            "fakesrc !",
            "location=foo ! fakesink",
            "fakesrc name=\"x ! fakesink",
            "fake(src ! fakesink",
        ] {
            let err = PipelineDescription::parse(bad).unwrap_err();
            assert!(err.to_string().starts_with("syntax error"), "{bad}: {err}");
        }
    }

    #[test]
    fn test_invalid_caps_filter() {
        let err = PipelineDescription::parse("fakesrc ! video/x-raw,width=[ 10, 1 ] ! fakesink").unwrap_err();
        assert!(matches!(err, DescriptionError::Caps { .. }));
    }

    #[test]
    fn test_resolve_paths() {
        let mut desc = PipelineDescription::parse(
            "filesrc location=in.wav ! wavparse ! filesink location=/abs/out.wav  souphttpsrc location=http://host/a ! fakesink",
        )
        .unwrap();
        let rewritten = desc.resolve_paths(Path::new("/work"));
        assert_eq!(rewritten, 1);
        let locations: Vec<_> = desc.elements().filter_map(|e| e.property("location")).collect();
        assert_eq!(locations, vec!["/work/in.wav", "/abs/out.wav", "http://host/a"]);
    }
}
