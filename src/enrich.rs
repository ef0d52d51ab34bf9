//! Enrichment: ambient properties added to every record before it is routed.
//!
//! An [`EnrichmentPipeline`] is an ordered list of [`Enricher`]s applied front to back. Each
//! enricher takes the record by value and returns it, so one can only add or overwrite
//! properties (see [`EventRecord`]). The standard set never overwrites what a call site
//! supplied: resource-derived keys use insert-if-absent semantics.
//!
//! ```rust
//! use logweave::enrich::{EnrichmentPipeline, PropertyEnricher};
//! use logweave::{EventRecord, Level, Properties};
//!
//! let pipeline = EnrichmentPipeline::builder()
//!     .with(PropertyEnricher::new("region", "eu-west-1"))
//!     .build();
//! let record = pipeline.apply(EventRecord::new(Level::Info, "hello", Properties::new()));
//! assert_eq!(record.properties().get("region").and_then(|v| v.as_str()), Some("eu-west-1"));
//! ```

use crate::event::{EventRecord, Properties, Value};
use crate::resource::{Resource, DEPLOYMENT_ENVIRONMENT};
use chrono::SecondsFormat;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Property carrying the human-facing application name.
pub const APPLICATION: &str = "application";
/// Property carrying the host or pod identity.
pub const INSTANCE_ID: &str = "host.instance.id";
/// Property carrying the record's timestamp as RFC 3339 text.
pub const TIMESTAMP: &str = "timestamp";

/// One enrichment step.
pub trait Enricher: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn enrich(&self, record: EventRecord) -> EventRecord;
}

/// Ordered, shareable list of enrichers.
#[derive(Clone)]
pub struct EnrichmentPipeline {
    steps: Arc<[Arc<dyn Enricher>]>,
}

impl fmt::Debug for EnrichmentPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.steps.iter().map(|s| s.name())).finish()
    }
}

impl Default for EnrichmentPipeline {
    fn default() -> Self {
        Self::empty()
    }
}

impl EnrichmentPipeline {
    pub fn builder() -> EnrichmentPipelineBuilder {
        EnrichmentPipelineBuilder { steps: Vec::new() }
    }

    /// Pipeline that does nothing.
    pub fn empty() -> Self {
        Self::builder().build()
    }

    /// Log context, then resource attributes, then instance id, then timestamp.
    pub fn standard(resource: Arc<Resource>) -> Self {
        Self::builder()
            .with(LogContextEnricher)
            .with(ResourceEnricher::new(resource.clone()))
            .with(InstanceIdEnricher::new(resource))
            .with(TimestampEnricher)
            .build()
    }

    pub fn apply(&self, record: EventRecord) -> EventRecord {
        self.steps.iter().fold(record, |record, step| step.enrich(record))
    }

    /// Step names in application order.
    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

pub struct EnrichmentPipelineBuilder {
    steps: Vec<Arc<dyn Enricher>>,
}

impl EnrichmentPipelineBuilder {
    pub fn with(mut self, enricher: impl Enricher + 'static) -> Self {
        self.steps.push(Arc::new(enricher));
        self
    }

    pub fn with_shared(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.steps.push(enricher);
        self
    }

    pub fn with_fn<F>(self, name: &'static str, f: F) -> Self
    where
        F: Fn(EventRecord) -> EventRecord + Send + Sync + 'static,
    {
        self.with(FnEnricher::new(name, f))
    }

    pub fn build(self) -> EnrichmentPipeline {
        EnrichmentPipeline { steps: self.steps.into() }
    }
}

/// Sets one fixed property, overwriting any call-site value.
#[derive(Debug, Clone)]
pub struct PropertyEnricher {
    key: String,
    value: Value,
}

impl PropertyEnricher {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

impl Enricher for PropertyEnricher {
    fn name(&self) -> &str {
        &self.key
    }

    fn enrich(&self, record: EventRecord) -> EventRecord {
        record.with_property(self.key.clone(), self.value.clone())
    }
}

/// Adds `application` and `deployment.environment`.
#[derive(Debug, Clone)]
pub struct ResourceEnricher {
    resource: Arc<Resource>,
}

impl ResourceEnricher {
    pub fn new(resource: Arc<Resource>) -> Self {
        Self { resource }
    }
}

impl Enricher for ResourceEnricher {
    fn name(&self) -> &str {
        "resource"
    }

    fn enrich(&self, record: EventRecord) -> EventRecord {
        record
            .with_property_if_absent(APPLICATION, self.resource.application())
            .with_property_if_absent(DEPLOYMENT_ENVIRONMENT, self.resource.environment())
    }
}

/// Adds `host.instance.id` when the resource knows it.
#[derive(Debug, Clone)]
pub struct InstanceIdEnricher {
    resource: Arc<Resource>,
}

impl InstanceIdEnricher {
    pub fn new(resource: Arc<Resource>) -> Self {
        Self { resource }
    }
}

impl Enricher for InstanceIdEnricher {
    fn name(&self) -> &str {
        "instance_id"
    }

    fn enrich(&self, record: EventRecord) -> EventRecord {
        match self.resource.instance_id() {
            Some(id) => record.with_property_if_absent(INSTANCE_ID, id),
            None => record,
        }
    }
}

/// Copies the record timestamp into a `timestamp` property (UTC, millisecond precision).
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampEnricher;

impl Enricher for TimestampEnricher {
    fn name(&self) -> &str {
        "timestamp"
    }

    fn enrich(&self, record: EventRecord) -> EventRecord {
        let ts = record.timestamp().to_rfc3339_opts(SecondsFormat::Millis, true);
        record.with_property_if_absent(TIMESTAMP, ts)
    }
}

tokio::task_local! {
    static LOG_CONTEXT: Properties;
}

/// Scoped properties attached to every record emitted inside the scope.
///
/// Scopes nest: an inner scope sees the outer properties, and its own keys win.
#[derive(Debug, Clone, Copy)]
pub struct LogContext;

impl LogContext {
    pub async fn scope<F: Future>(properties: Properties, fut: F) -> F::Output {
        LOG_CONTEXT.scope(Self::merged(properties), fut).await
    }

    pub fn sync_scope<R>(properties: Properties, f: impl FnOnce() -> R) -> R {
        LOG_CONTEXT.sync_scope(Self::merged(properties), f)
    }

    /// Properties of the innermost active scope; empty outside any scope.
    pub fn current() -> Properties {
        LOG_CONTEXT.try_with(Properties::clone).unwrap_or_default()
    }

    fn merged(inner: Properties) -> Properties {
        let mut merged = Self::current();
        for (k, v) in inner {
            merged.insert(k, v);
        }
        merged
    }
}

/// Adds [`LogContext`] properties that the call site did not set.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogContextEnricher;

impl Enricher for LogContextEnricher {
    fn name(&self) -> &str {
        "log_context"
    }

    fn enrich(&self, record: EventRecord) -> EventRecord {
        let context = match LOG_CONTEXT.try_with(|props| props.clone()) {
            Ok(props) if !props.is_empty() => props,
            _ => return record,
        };
        context.into_iter().fold(record, |record, (k, v)| record.with_property_if_absent(k, v))
    }
}

/// Closure adaptor.
pub struct FnEnricher<F> {
    name: &'static str,
    f: F,
}

impl<F> FnEnricher<F>
where
    F: Fn(EventRecord) -> EventRecord + Send + Sync,
{
    pub fn new(name: &'static str, f: F) -> Self {
        Self { name, f }
    }
}

impl<F> fmt::Debug for FnEnricher<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnEnricher").field("name", &self.name).finish()
    }
}

impl<F> Enricher for FnEnricher<F>
where
    F: Fn(EventRecord) -> EventRecord + Send + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    fn enrich(&self, record: EventRecord) -> EventRecord {
        (self.f)(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Level;
    use chrono::{TimeZone, Utc};

    fn resource() -> Arc<Resource> {
        Arc::new(
            Resource::new("logging-app", "1.0.0", "Staging")
                .with_application("LoggingApp")
                .with_instance_id("pod-7"),
        )
    }

    fn str_prop<'a>(record: &'a EventRecord, key: &str) -> Option<&'a str> {
        record.properties().get(key).and_then(Value::as_str)
    }

    #[test]
    fn standard_adds_ambient_properties() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 5, 9, 30, 15).unwrap();
        let record = EventRecord::builder(Level::Info, "hello").at(ts).build();
        let out = EnrichmentPipeline::standard(resource()).apply(record);
        assert_eq!(str_prop(&out, APPLICATION), Some("LoggingApp"));
        assert_eq!(str_prop(&out, DEPLOYMENT_ENVIRONMENT), Some("Staging"));
        assert_eq!(str_prop(&out, INSTANCE_ID), Some("pod-7"));
        assert_eq!(str_prop(&out, TIMESTAMP), Some("2024-01-05T09:30:15.000Z"));
        assert_eq!(out.level(), Level::Info);
        assert_eq!(out.timestamp(), ts);
    }

    #[test]
    fn standard_order() {
        let names = EnrichmentPipeline::standard(resource()).names().join(",");
        assert_eq!(names, "log_context,resource,instance_id,timestamp");
    }

    #[test]
    fn enrichment_is_idempotent() {
        let pipeline = EnrichmentPipeline::standard(resource());
        let once = pipeline.apply(EventRecord::new(Level::Info, "x", Properties::new()));
        let twice = pipeline.apply(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn call_site_values_win_over_resource() {
        let record = EventRecord::builder(Level::Info, "x").property(APPLICATION, "Custom").build();
        let out = EnrichmentPipeline::standard(resource()).apply(record);
        assert_eq!(str_prop(&out, APPLICATION), Some("Custom"));
    }

    #[test]
    fn unknown_instance_is_not_invented() {
        let resource = Arc::new(Resource::new("svc", "1", "Production"));
        let out = EnrichmentPipeline::standard(resource)
            .apply(EventRecord::new(Level::Info, "x", Properties::new()));
        assert!(!out.properties().contains_key(INSTANCE_ID));
    }

    #[test]
    fn steps_run_in_order() {
        let pipeline = EnrichmentPipeline::builder()
            .with(PropertyEnricher::new("step", 1))
            .with_fn("second", |r| r.with_property("step", 2))
            .build();
        let out = pipeline.apply(EventRecord::new(Level::Debug, "x", Properties::new()));
        assert_eq!(out.properties().get("step"), Some(&Value::Int(2)));
        assert_eq!(pipeline.names(), ["step", "second"]);
    }

    #[test]
    fn log_context_nests_and_yields_to_call_site() {
        let outer = Properties::new().with("Tenant", "acme").with("Region", "eu");
        let inner = Properties::new().with("Region", "us");
        let out = LogContext::sync_scope(outer, || {
            LogContext::sync_scope(inner, || {
                let record =
                    EventRecord::builder(Level::Info, "x").property("Tenant", "own").build();
                LogContextEnricher.enrich(record)
            })
        });
        assert_eq!(str_prop(&out, "Tenant"), Some("own"));
        assert_eq!(str_prop(&out, "Region"), Some("us"));
        assert!(LogContext::current().is_empty());
    }

    #[tokio::test]
    async fn log_context_survives_awaits() {
        let props = Properties::new().with("RequestId", "ab12cd34");
        let seen = LogContext::scope(props, async {
            tokio::task::yield_now().await;
            LogContext::current()
        })
        .await;
        assert_eq!(seen.get("RequestId"), Some(&Value::from("ab12cd34")));
    }
}
