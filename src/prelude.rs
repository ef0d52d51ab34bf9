//! Convenient re-exports for common logweave types.
pub use crate::{
    backoff::{Backoff, BackoffError, MAX_BACKOFF},
    clock::{Clock, Sleeper},
    config::PipelineConfig,
    enrich::{Enricher, EnrichmentPipeline, LogContext, PropertyEnricher},
    error::{ConfigError, ExportError, SinkError},
    event::{EventRecord, ExceptionInfo, Level, Properties, Value},
    export::{ExportTransport, ExporterBridge, ExporterConfig, MetricPoint, Telemetry},
    generator::{GeneratorConfig, SyntheticEventGenerator},
    jitter::Jitter,
    logger::Logger,
    render::OutputTemplate,
    resource::Resource,
    retry::{BuildError, RetryPolicy, RetryPolicyBuilder},
    router::SinkRouter,
    sinks::{ConsoleSink, RollingFileSink, RollingPolicy, Sink, SinkConfig},
    trace::{ActiveSpan, SpanStatus, TraceContext},
};
