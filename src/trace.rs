//! Trace context and correlation.
//!
//! The active [`TraceContext`] lives in a tokio task-local, entered with
//! [`TraceContext::scope`]. Code running outside any scope (for example a background task that
//! was never given one) simply has no context, and [`TraceCorrelator::correlate`] leaves its
//! records uncorrelated.
//!
//! The synthetic generator always opens its own root span per run, so every event of a run
//! shares one trace id.

use crate::event::{EventRecord, Properties, Value};
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;

tokio::task_local! {
    static CURRENT_TRACE: TraceContext;
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for b in bytes {
        write!(f, "{:02x}", b)?;
    }
    Ok(())
}

fn parse_hex<const N: usize>(s: &str) -> Option<[u8; N]> {
    if s.len() != N * 2 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let mut out = [0u8; N];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
}

/// 16-byte trace identifier; never all zeroes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId([u8; 16]);

impl TraceId {
    pub fn random() -> Self {
        loop {
            let bytes: [u8; 16] = rand::random();
            if bytes != [0; 16] {
                return Self(bytes);
            }
        }
    }

    /// `None` for the all-zero (invalid) id.
    pub fn from_bytes(bytes: [u8; 16]) -> Option<Self> {
        (bytes != [0; 16]).then_some(Self(bytes))
    }

    pub fn to_bytes(self) -> [u8; 16] {
        self.0
    }

    /// Parse 32 lowercase or uppercase hex characters.
    pub fn from_hex(s: &str) -> Option<Self> {
        parse_hex::<16>(s).and_then(Self::from_bytes)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({})", self)
    }
}

/// 8-byte span identifier; never all zeroes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId([u8; 8]);

impl SpanId {
    pub fn random() -> Self {
        loop {
            let bytes: [u8; 8] = rand::random();
            if bytes != [0; 8] {
                return Self(bytes);
            }
        }
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Option<Self> {
        (bytes != [0; 8]).then_some(Self(bytes))
    }

    pub fn to_bytes(self) -> [u8; 8] {
        self.0
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        parse_hex::<8>(s).and_then(Self::from_bytes)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpanId({})", self)
    }
}

/// Identifiers of the span currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
}

impl TraceContext {
    /// Start a new trace.
    pub fn root() -> Self {
        Self { trace_id: TraceId::random(), span_id: SpanId::random(), parent_span_id: None }
    }

    /// New span in the same trace, parented to this one.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: SpanId::random(),
            parent_span_id: Some(self.span_id),
        }
    }

    /// Context of the calling task, if it runs inside a scope.
    pub fn current() -> Option<Self> {
        CURRENT_TRACE.try_with(|ctx| *ctx).ok()
    }

    /// Run `fut` with this context active.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT_TRACE.scope(self, fut).await
    }

    /// Run a synchronous closure with this context active.
    pub fn sync_scope<R>(self, f: impl FnOnce() -> R) -> R {
        CURRENT_TRACE.sync_scope(self, f)
    }

    /// Parse a W3C `traceparent` header (`00-<trace>-<span>-<flags>`).
    ///
    /// The parsed span becomes the parent of a fresh local span.
    pub fn from_traceparent(header: &str) -> Option<Self> {
        let mut parts = header.trim().split('-');
        let version = parts.next()?;
        let trace = parts.next()?;
        let span = parts.next()?;
        let flags = parts.next()?;
        if version.len() != 2 || version == "ff" || flags.len() != 2 {
            return None;
        }
        if version == "00" && parts.next().is_some() {
            return None;
        }
        let remote = TraceContext {
            trace_id: TraceId::from_hex(trace)?,
            span_id: SpanId::from_hex(span)?,
            parent_span_id: None,
        };
        Some(remote.child())
    }

    /// Format as a W3C `traceparent` header, sampled flag set.
    pub fn to_traceparent(&self) -> String {
        format!("00-{}-{}-01", self.trace_id, self.span_id)
    }
}

/// Final status of a finished span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanStatus {
    Unset,
    Ok,
    Error(String),
}

/// A finished span, ready to be forwarded by the exporter.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanRecord {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: SpanStatus,
    pub attributes: Properties,
}

/// A span that has started but not finished.
#[derive(Debug, Clone)]
pub struct ActiveSpan {
    context: TraceContext,
    name: String,
    start: DateTime<Utc>,
    attributes: Properties,
}

impl ActiveSpan {
    /// Child of the calling task's context, or a new root when there is none.
    pub fn start(name: impl Into<String>) -> Self {
        let context = TraceContext::current().map(|c| c.child()).unwrap_or_else(TraceContext::root);
        Self::with_context(name, context)
    }

    /// Always a new root, ignoring any ambient context.
    pub fn root(name: impl Into<String>) -> Self {
        Self::with_context(name, TraceContext::root())
    }

    fn with_context(name: impl Into<String>, context: TraceContext) -> Self {
        Self { context, name: name.into(), start: Utc::now(), attributes: Properties::new() }
    }

    pub fn context(&self) -> TraceContext {
        self.context
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key, value);
    }

    pub fn finish(self, status: SpanStatus) -> SpanRecord {
        SpanRecord {
            trace_id: self.context.trace_id,
            span_id: self.context.span_id,
            parent_span_id: self.context.parent_span_id,
            name: self.name,
            start: self.start,
            end: Utc::now().max(self.start),
            status,
            attributes: self.attributes,
        }
    }
}

/// Copies the ambient trace/span ids onto records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceCorrelator;

impl TraceCorrelator {
    pub fn correlate(&self, record: EventRecord) -> EventRecord {
        match TraceContext::current() {
            Some(ctx) => record.with_trace_context(&ctx),
            None => record,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Level;

    #[test]
    fn ids_render_as_lowercase_hex() {
        let trace = TraceId::from_bytes([0xab; 16]).unwrap();
        assert_eq!(trace.to_string(), "ab".repeat(16));
        let span = SpanId::from_bytes([0, 0, 0, 0, 0, 0, 0, 1]).unwrap();
        assert_eq!(span.to_string(), "0000000000000001");
    }

    #[test]
    fn zero_ids_are_invalid() {
        assert!(TraceId::from_bytes([0; 16]).is_none());
        assert!(SpanId::from_hex("0000000000000000").is_none());
    }

    #[test]
    fn child_shares_trace_and_links_parent() {
        let root = TraceContext::root();
        let child = root.child();
        assert_eq!(child.trace_id, root.trace_id);
        assert_ne!(child.span_id, root.span_id);
        assert_eq!(child.parent_span_id, Some(root.span_id));
    }

    #[test]
    fn traceparent_round_trips_trace_id() {
        let header = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
        let ctx = TraceContext::from_traceparent(header).unwrap();
        assert_eq!(ctx.trace_id.to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(ctx.parent_span_id.unwrap().to_string(), "00f067aa0ba902b7");
        assert!(ctx.to_traceparent().starts_with("00-4bf92f3577b34da6a3ce929d0e0e4736-"));
    }

    #[test]
    fn malformed_traceparent_is_rejected() {
        assert!(TraceContext::from_traceparent("garbage").is_none());
        assert!(TraceContext::from_traceparent(
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01"
        )
        .is_none());
        assert!(TraceContext::from_traceparent(
            "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"
        )
        .is_none());
    }

    #[test]
    fn correlator_leaves_untraced_records_alone() {
        let record = EventRecord::new(Level::Info, "outside", Properties::new());
        let out = TraceCorrelator.correlate(record.clone());
        assert_eq!(out, record);
    }

    #[test]
    fn correlator_uses_sync_scope() {
        let ctx = TraceContext::root();
        let out = ctx.sync_scope(|| {
            TraceCorrelator.correlate(EventRecord::new(Level::Info, "inside", Properties::new()))
        });
        assert_eq!(out.trace_id(), Some(ctx.trace_id));
        assert_eq!(out.span_id(), Some(ctx.span_id));
    }

    #[tokio::test]
    async fn scope_is_visible_across_awaits() {
        let ctx = TraceContext::root();
        let seen = ctx
            .scope(async {
                tokio::task::yield_now().await;
                TraceContext::current()
            })
            .await;
        assert_eq!(seen, Some(ctx));
        assert!(TraceContext::current().is_none());
    }

    #[tokio::test]
    async fn active_span_parents_to_ambient_context() {
        let ctx = TraceContext::root();
        let span = ctx.scope(async { ActiveSpan::start("db.query") }).await;
        assert_eq!(span.context().trace_id, ctx.trace_id);
        assert_eq!(span.context().parent_span_id, Some(ctx.span_id));

        let mut root = ActiveSpan::root("generate_logs");
        root.set_attribute("count", 5);
        let record = root.finish(SpanStatus::Ok);
        assert!(record.parent_span_id.is_none());
        assert!(record.end >= record.start);
        assert_eq!(record.attributes.get("count"), Some(&Value::Int(5)));
    }
}
