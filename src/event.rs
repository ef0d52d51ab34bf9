//! Event model: levels, property values, and the immutable [`EventRecord`].
//!
//! A record is built once and then only flows forward. Enrichers and the correlator receive
//! it by value and hand back a new one; the only transformations available to them add or
//! overwrite properties and attach correlation identifiers. Nothing can remove a property or
//! change the level or timestamp after construction.

use crate::error::ParseLevelError;
use crate::trace::{SpanId, TraceContext, TraceId};
use chrono::{DateTime, Utc};
use serde::ser::{Serialize, Serializer};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Event severity, ordered `Debug < Info < Warning < Error < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Diagnostic detail.
    Debug,
    /// Normal operation.
    Info,
    /// Unexpected but handled.
    Warning,
    /// An operation failed.
    Error,
    /// The process or a subsystem is in trouble.
    Critical,
}

impl Level {
    /// All levels, lowest first.
    pub const ALL: [Level; 5] =
        [Level::Debug, Level::Info, Level::Warning, Level::Error, Level::Critical];

    /// Full name, e.g. `Warning`.
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "Debug",
            Level::Info => "Info",
            Level::Warning => "Warning",
            Level::Error => "Error",
            Level::Critical => "Critical",
        }
    }

    /// Three-letter upper-case code as written by the `{Level:u3}` output token.
    ///
    /// Critical is written `FTL`; existing log tooling keys on that code.
    pub fn short(self) -> &'static str {
        match self {
            Level::Debug => "DBG",
            Level::Info => "INF",
            Level::Warning => "WRN",
            Level::Error => "ERR",
            Level::Critical => "FTL",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "dbg" => Ok(Level::Debug),
            "info" | "information" | "inf" => Ok(Level::Info),
            "warning" | "warn" | "wrn" => Ok(Level::Warning),
            "error" | "err" => Ok(Level::Error),
            "critical" | "fatal" | "ftl" | "crt" => Ok(Level::Critical),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// A property value: scalar, sequence, or nested ordered map.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent/unknown.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// Text.
    Str(String),
    /// Ordered list.
    Seq(Vec<Value>),
    /// Nested structure.
    Map(Properties),
}

impl Value {
    /// Borrow the text if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer payload if this is an integer value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Compact JSON text for this value.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("null"))
    }
}

/// Strings display unquoted; structured values display as JSON.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => f.write_str(s),
            Value::Seq(_) | Value::Map(_) => f.write_str(&self.to_json()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Seq(items) => serializer.collect_seq(items),
            Value::Map(props) => props.serialize(serializer),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

macro_rules! value_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(i64::from(v))
            }
        })*
    };
}

value_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Seq(v)
    }
}

impl From<Properties> for Value {
    fn from(v: Properties) -> Self {
        Value::Map(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Insertion-ordered property map.
///
/// Overwriting an existing key keeps its original position, so rendering order is the order in
/// which keys were first seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    entries: Vec<(String, Value)>,
}

impl Properties {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Chainable insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or overwrite; returns the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Insert only when the key is not present; returns whether it was inserted.
    pub fn insert_if_absent(&mut self, key: impl Into<String>, value: impl Into<Value>) -> bool {
        let key = key.into();
        if self.contains_key(&key) {
            return false;
        }
        self.entries.push((key, value.into()));
        true
    }

    /// Look up a value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Whether the key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

impl IntoIterator for Properties {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Properties::new();
        for (k, v) in iter {
            props.insert(k, v);
        }
        props
    }
}

impl Serialize for Properties {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

/// Structured error attached to Error/Critical events.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Deserialize)]
pub struct ExceptionInfo {
    /// Error kind, e.g. `InvalidOperation`.
    pub kind: String,
    /// Error message.
    pub message: String,
    /// Where it was raised, when known.
    pub origin: Option<String>,
}

impl ExceptionInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(), message: message.into(), origin: None }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Capture an error value; the kind is the error type's last path segment.
    pub fn from_error<E: std::error::Error>(err: &E) -> Self {
        let full = std::any::type_name::<E>();
        let kind = full.rsplit("::").next().unwrap_or(full);
        Self::new(kind, err.to_string())
    }
}

impl fmt::Display for ExceptionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(origin) = &self.origin {
            write!(f, " at {}", origin)?;
        }
        Ok(())
    }
}

/// A single structured log event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    level: Level,
    timestamp: DateTime<Utc>,
    message_template: String,
    properties: Properties,
    exception: Option<ExceptionInfo>,
    trace_id: Option<TraceId>,
    span_id: Option<SpanId>,
}

impl EventRecord {
    /// Record stamped with the current UTC time.
    pub fn new(level: Level, message_template: impl Into<String>, properties: Properties) -> Self {
        Self::builder(level, message_template).properties(properties).build()
    }

    pub fn builder(level: Level, message_template: impl Into<String>) -> EventRecordBuilder {
        EventRecordBuilder {
            level,
            message_template: message_template.into(),
            timestamp: None,
            properties: Properties::new(),
            exception: None,
        }
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn message_template(&self) -> &str {
        &self.message_template
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn exception(&self) -> Option<&ExceptionInfo> {
        self.exception.as_ref()
    }

    pub fn trace_id(&self) -> Option<TraceId> {
        self.trace_id
    }

    pub fn span_id(&self) -> Option<SpanId> {
        self.span_id
    }

    /// The message template with properties substituted; unresolved holes stay literal.
    pub fn render_message(&self) -> String {
        crate::render::MessageTemplate::parse(&self.message_template).render(&self.properties)
    }

    /// Add or overwrite one property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key, value);
        self
    }

    /// Add one property unless the key is already present.
    pub fn with_property_if_absent(
        mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.properties.insert_if_absent(key, value);
        self
    }

    /// Attach correlation identifiers from a trace context.
    pub fn with_trace_context(mut self, ctx: &TraceContext) -> Self {
        self.trace_id = Some(ctx.trace_id);
        self.span_id = Some(ctx.span_id);
        self
    }
}

/// Builder for [`EventRecord`].
#[derive(Debug, Clone)]
pub struct EventRecordBuilder {
    level: Level,
    message_template: String,
    timestamp: Option<DateTime<Utc>>,
    properties: Properties,
    exception: Option<ExceptionInfo>,
}

impl EventRecordBuilder {
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key, value);
        self
    }

    /// Merge properties; later keys overwrite earlier ones.
    pub fn properties(mut self, properties: Properties) -> Self {
        for (k, v) in properties {
            self.properties.insert(k, v);
        }
        self
    }

    pub fn exception(mut self, exception: ExceptionInfo) -> Self {
        self.exception = Some(exception);
        self
    }

    /// Explicit timestamp instead of "now".
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn build(self) -> EventRecord {
        EventRecord {
            level: self.level,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            message_template: self.message_template,
            properties: self.properties,
            exception: self.exception,
            trace_id: None,
            span_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warning);
        assert!(Level::Warning < Level::Error);
        assert!(Level::Error < Level::Critical);
        let mut sorted = Level::ALL;
        sorted.reverse();
        sorted.sort();
        assert_eq!(sorted, Level::ALL);
    }

    #[test]
    fn level_parses_names_and_codes() {
        assert_eq!("information".parse::<Level>().unwrap(), Level::Info);
        assert_eq!("WRN".parse::<Level>().unwrap(), Level::Warning);
        assert_eq!("Fatal".parse::<Level>().unwrap(), Level::Critical);
        assert!("verbose".parse::<Level>().is_err());
    }

    #[test]
    fn level_short_codes() {
        let codes: Vec<_> = Level::ALL.iter().map(|l| l.short()).collect();
        assert_eq!(codes, ["DBG", "INF", "WRN", "ERR", "FTL"]);
    }

    #[test]
    fn overwrite_keeps_position() {
        let mut props = Properties::new().with("a", 1).with("b", 2).with("c", 3);
        let previous = props.insert("a", "one");
        assert_eq!(previous, Some(Value::Int(1)));
        let keys: Vec<_> = props.keys().collect();
        assert_eq!(keys, ["a", "b", "c"]);
        assert_eq!(props.get("a"), Some(&Value::from("one")));
    }

    #[test]
    fn insert_if_absent_does_not_overwrite() {
        let mut props = Properties::new().with("UserId", 7);
        assert!(!props.insert_if_absent("UserId", 9));
        assert!(props.insert_if_absent("RequestId", "abc"));
        assert_eq!(props.get("UserId"), Some(&Value::Int(7)));
        assert_eq!(props.len(), 2);
    }

    #[test]
    fn properties_serialize_in_insertion_order() {
        let props = Properties::new()
            .with("zeta", 1)
            .with("alpha", "x")
            .with("nested", Properties::new().with("k", true));
        let json = serde_json::to_string(&props).unwrap();
        assert_eq!(json, r#"{"zeta":1,"alpha":"x","nested":{"k":true}}"#);
    }

    #[test]
    fn string_values_display_unquoted() {
        assert_eq!(Value::from("hello").to_string(), "hello");
        assert_eq!(Value::from(vec![Value::from(1), Value::from("a")]).to_string(), r#"[1,"a"]"#);
        assert_eq!(Value::from(None::<i32>).to_string(), "null");
    }

    #[test]
    fn exception_display_includes_origin() {
        let exc = ExceptionInfo::new("InvalidOperation", "Simulated error: boom")
            .with_origin("LogController.log_error");
        assert_eq!(
            exc.to_string(),
            "InvalidOperation: Simulated error: boom at LogController.log_error"
        );
    }

    #[test]
    fn exception_from_error_uses_type_name() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let exc = ExceptionInfo::from_error(&err);
        assert_eq!(exc.kind, "Error");
        assert_eq!(exc.message, "disk gone");
    }

    #[test]
    fn transformers_never_touch_level_or_timestamp() {
        let ts = Utc::now();
        let record = EventRecord::builder(Level::Warning, "x").at(ts).build();
        let ctx = TraceContext::root();
        let record = record.with_property("k", 1).with_trace_context(&ctx);
        assert_eq!(record.level(), Level::Warning);
        assert_eq!(record.timestamp(), ts);
        assert_eq!(record.trace_id(), Some(ctx.trace_id));
        assert_eq!(record.span_id(), Some(ctx.span_id));
    }

    #[test]
    fn new_record_has_no_correlation() {
        let record = EventRecord::new(Level::Info, "hello", Properties::new());
        assert!(record.trace_id().is_none());
        assert!(record.span_id().is_none());
        assert!(record.exception().is_none());
    }
}
