//! Message templates and per-sink output layouts.
//!
//! Two layers:
//!
//! - [`MessageTemplate`]: the event's own text with `{Name}` holes filled from its
//!   properties. Parsing and rendering never fail; a hole with no matching property is written
//!   back literally.
//! - [`OutputTemplate`]: a sink's line layout (`{Timestamp:...} [{Level:u3}] {Message} ...`).
//!   Unknown tokens and invalid timestamp formats are rejected when the template is parsed, so
//!   rendering a line cannot fail either.
//!
//! Properties not referenced by the message template are appended after it as a structured
//! blob, in insertion order.

use crate::error::TemplateError;
use crate::event::{EventRecord, Properties, Value};
use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Console layout: short time, level code, message, remaining properties as JSON.
pub const CONSOLE_TEMPLATE: &str =
    "[{Timestamp:%H:%M:%S} {Level:u3}] {Message} {Properties:j}{NewLine}{Exception}";

/// File layout: full timestamp with UTC offset.
pub const FILE_TEMPLATE: &str = "{Timestamp:%Y-%m-%d %H:%M:%S%.3f %:z} [{Level:u3}] {Message} \
    {Properties:j}{NewLine}{Exception}";

const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f %:z";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Text(String),
    Hole { name: String, format: Option<String>, raw: String },
}

/// A parsed message template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    tokens: Vec<Token>,
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

fn push_text(tokens: &mut Vec<Token>, text: &str) {
    if text.is_empty() {
        return;
    }
    match tokens.last_mut() {
        Some(Token::Text(existing)) => existing.push_str(text),
        _ => tokens.push(Token::Text(text.to_string())),
    }
}

fn parse_hole(body: &str) -> Option<(String, Option<String>)> {
    let (head, format) = match body.split_once(':') {
        Some((head, format)) => (head, Some(format.to_string())),
        None => (body, None),
    };
    // Alignment (`{Name,10}`) is accepted and ignored.
    let head = head.split(',').next().unwrap_or(head);
    // Capture hints (`{@Name}`, `{$Name}`) are accepted and ignored.
    let name = head.trim_start_matches(['@', '$']);
    valid_name(name).then(|| (name.to_string(), format))
}

impl MessageTemplate {
    /// Parse a template. `{{` and `}}` are literal braces; anything that is not a well-formed
    /// hole is kept as text.
    pub fn parse(template: &str) -> Self {
        let mut tokens = Vec::new();
        let mut rest = template;
        while !rest.is_empty() {
            let Some(pos) = rest.find(['{', '}']) else {
                push_text(&mut tokens, rest);
                break;
            };
            push_text(&mut tokens, &rest[..pos]);
            let tail = &rest[pos..];
            if tail.starts_with("{{") {
                push_text(&mut tokens, "{");
                rest = &tail[2..];
            } else if tail.starts_with("}}") {
                push_text(&mut tokens, "}");
                rest = &tail[2..];
            } else if tail.starts_with('}') {
                push_text(&mut tokens, "}");
                rest = &tail[1..];
            } else {
                // Single '{': a hole runs to the next '}' unless another '{' comes first.
                let body_end = tail[1..].find(['{', '}']).map(|i| i + 1);
                match body_end {
                    Some(end) if tail.as_bytes()[end] == b'}' => {
                        let raw = &tail[..=end];
                        match parse_hole(&tail[1..end]) {
                            Some((name, format)) => tokens.push(Token::Hole {
                                name,
                                format,
                                raw: raw.to_string(),
                            }),
                            None => push_text(&mut tokens, raw),
                        }
                        rest = &tail[end + 1..];
                    }
                    Some(end) => {
                        push_text(&mut tokens, &tail[..end]);
                        rest = &tail[end..];
                    }
                    None => {
                        push_text(&mut tokens, tail);
                        rest = "";
                    }
                }
            }
        }
        Self { tokens }
    }

    /// Names of the properties this template refers to, in order of appearance.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().filter_map(|t| match t {
            Token::Hole { name, .. } => Some(name.as_str()),
            Token::Text(_) => None,
        })
    }

    /// Substitute properties by name; unresolved holes are written as-is.
    pub fn render(&self, properties: &Properties) -> String {
        let mut out = String::new();
        self.render_into(properties, &mut out);
        out
    }

    pub fn render_into(&self, properties: &Properties, out: &mut String) {
        for token in &self.tokens {
            match token {
                Token::Text(text) => out.push_str(text),
                Token::Hole { name, format, raw } => match properties.get(name) {
                    Some(value) => write_hole_value(value, format.as_deref(), out),
                    None => out.push_str(raw),
                },
            }
        }
    }
}

fn write_hole_value(value: &Value, format: Option<&str>, out: &mut String) {
    match (value, format) {
        (Value::Str(_), Some("j")) => out.push_str(&value.to_json()),
        _ => {
            let _ = write!(out, "{}", value);
        }
    }
}

/// How unreferenced properties are written after the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyFormat {
    /// `{"Key":value,...}`
    #[default]
    Json,
    /// `Key=value Key2="two words"`
    KeyValue,
}

struct Remaining<'a>(Vec<(&'a str, &'a Value)>);

impl Serialize for Remaining<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().copied())
    }
}

/// Write properties whose keys are not in `referenced`, in insertion order.
pub fn render_remaining(
    properties: &Properties,
    referenced: &[&str],
    format: PropertyFormat,
    out: &mut String,
) {
    let remaining =
        Remaining(properties.iter().filter(|(k, _)| !referenced.contains(k)).collect());
    match format {
        PropertyFormat::Json => match serde_json::to_string(&remaining) {
            Ok(json) => out.push_str(&json),
            Err(_) => out.push_str("{}"),
        },
        PropertyFormat::KeyValue => {
            for (i, (key, value)) in remaining.0.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                out.push_str(key);
                out.push('=');
                match value {
                    Value::Str(s) if s.is_empty() || s.contains([' ', '=', '"', '\n']) => {
                        out.push_str(&value.to_json())
                    }
                    _ => {
                        let _ = write!(out, "{}", value);
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LevelCase {
    Full,
    Upper3,
    Lower3,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Timestamp(String),
    Level(LevelCase),
    Message,
    Properties(PropertyFormat),
    Exception,
    NewLine,
    TraceId,
    SpanId,
}

/// A sink's line layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTemplate {
    source: String,
    segments: Vec<Segment>,
}

fn validate_strftime(format: &str) -> Result<(), TemplateError> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(TemplateError::InvalidTimestampFormat(format.to_string()));
    }
    Ok(())
}

impl OutputTemplate {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let parsed = MessageTemplate::parse(template);
        let mut segments = Vec::with_capacity(parsed.tokens.len());
        for token in parsed.tokens {
            let segment = match token {
                Token::Text(text) => Segment::Literal(text),
                Token::Hole { name, format, .. } => output_segment(&name, format)?,
            };
            segments.push(segment);
        }
        Ok(Self { source: template.to_string(), segments })
    }

    /// Default console layout.
    pub fn console() -> Self {
        Self::builtin(CONSOLE_TEMPLATE)
    }

    /// Default file layout.
    pub fn file() -> Self {
        Self::builtin(FILE_TEMPLATE)
    }

    fn builtin(template: &str) -> Self {
        match Self::parse(template) {
            Ok(parsed) => parsed,
            Err(_) => Self { source: template.to_string(), segments: vec![Segment::Message] },
        }
    }

    /// Text this template was parsed from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render one record.
    pub fn render(&self, record: &EventRecord) -> String {
        let message = MessageTemplate::parse(record.message_template());
        let referenced: Vec<&str> = message.names().collect();
        let mut out = String::with_capacity(128);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Timestamp(format) => {
                    let _ = write!(out, "{}", record.timestamp().format(format));
                }
                Segment::Level(case) => match case {
                    LevelCase::Full => out.push_str(record.level().as_str()),
                    LevelCase::Upper3 => out.push_str(record.level().short()),
                    LevelCase::Lower3 => out.push_str(&record.level().short().to_lowercase()),
                },
                Segment::Message => message.render_into(record.properties(), &mut out),
                Segment::Properties(format) => {
                    render_remaining(record.properties(), &referenced, *format, &mut out)
                }
                Segment::Exception => {
                    if let Some(exc) = record.exception() {
                        let _ = writeln!(out, "{}", exc);
                    }
                }
                Segment::NewLine => out.push('\n'),
                Segment::TraceId => {
                    if let Some(id) = record.trace_id() {
                        let _ = write!(out, "{}", id);
                    }
                }
                Segment::SpanId => {
                    if let Some(id) = record.span_id() {
                        let _ = write!(out, "{}", id);
                    }
                }
            }
        }
        out
    }
}

fn output_segment(name: &str, format: Option<String>) -> Result<Segment, TemplateError> {
    let unsupported = |token: &'static str, format: String| {
        Err(TemplateError::UnsupportedFormat { token, format })
    };
    match name {
        "Timestamp" => {
            let format = format.unwrap_or_else(|| DEFAULT_TIMESTAMP_FORMAT.to_string());
            validate_strftime(&format)?;
            Ok(Segment::Timestamp(format))
        }
        "Level" => match format.as_deref() {
            None => Ok(Segment::Level(LevelCase::Full)),
            Some("u3") => Ok(Segment::Level(LevelCase::Upper3)),
            Some("w3") => Ok(Segment::Level(LevelCase::Lower3)),
            Some(_) => unsupported("Level", format.unwrap_or_default()),
        },
        // `{Message:lj}` is the common spelling; strings are always written literally.
        "Message" => match format.as_deref() {
            None | Some("l") | Some("lj") | Some("j") => Ok(Segment::Message),
            Some(_) => unsupported("Message", format.unwrap_or_default()),
        },
        "Properties" => match format.as_deref() {
            None | Some("j") => Ok(Segment::Properties(PropertyFormat::Json)),
            Some("kv") => Ok(Segment::Properties(PropertyFormat::KeyValue)),
            Some(_) => unsupported("Properties", format.unwrap_or_default()),
        },
        "Exception" => Ok(Segment::Exception),
        "NewLine" => Ok(Segment::NewLine),
        "TraceId" => Ok(Segment::TraceId),
        "SpanId" => Ok(Segment::SpanId),
        other => Err(TemplateError::UnknownToken(other.to_string())),
    }
}
