#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # logweave
//!
//! Structured event pipeline for async Rust.
//!
//! ## Features
//!
//! - **Event records** with message templates, typed properties, and exception details
//! - **Enrichment** with resource attributes, ambient log context, and host identity
//! - **Trace correlation** from the task-local active span
//! - **Sink fan-out** with per-sink minimum levels and failure isolation
//! - **Console and daily-rolling file sinks** with output templates
//! - **Exporter bridge** with bounded queueing, batching, and retrying delivery
//! - **Synthetic event generator** for exercising a pipeline end to end
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use logweave::{EnrichmentPipeline, Level, Logger, MemorySink, Properties, Resource};
//! use logweave::SinkRouter;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let resource = Arc::new(Resource::new("logging-app", "1.0.0", "Development"));
//! let memory = Arc::new(MemorySink::new());
//! let router = SinkRouter::builder().route_shared(memory.clone(), Level::Info).build();
//! let logger = Logger::new(EnrichmentPipeline::standard(resource), router);
//!
//! logger.info("Cache miss for {Key}", Properties::new().with("Key", "user:42")).await;
//! logger.debug("not routed", Properties::new()).await;
//!
//! let records = memory.records();
//! assert_eq!(records.len(), 1);
//! assert_eq!(records[0].render_message(), "Cache miss for user:42");
//! # });
//! ```

pub mod backoff;
pub mod clock;
pub mod config;
pub mod enrich;
pub mod error;
pub mod event;
pub mod export;
pub mod generator;
pub mod jitter;
pub mod logger;
pub mod prelude;
pub mod render;
pub mod resource;
pub mod retry;
pub mod router;
pub mod sinks;
pub mod trace;

// Re-exports
pub use backoff::Backoff;
pub use clock::{
    Clock, InstantSleeper, ManualClock, Sleeper, SystemClock, TokioSleeper, TrackingSleeper,
};
pub use config::{PipelineConfig, ServiceConfig, StartupGenerator};
pub use enrich::{Enricher, EnrichmentPipeline, LogContext};
pub use error::{ConfigError, ExportError, GeneratorError, SinkError, TemplateError};
pub use event::{EventRecord, ExceptionInfo, Level, Properties, Value};
pub use export::{
    ExportBatch, ExportStats, ExportTransport, ExporterBridge, ExporterConfig, MetricPoint,
    Telemetry,
};
pub use generator::{GeneratorConfig, GeneratorHandle, GeneratorService, SyntheticEventGenerator};
pub use jitter::Jitter;
pub use logger::Logger;
pub use render::{MessageTemplate, OutputTemplate, PropertyFormat};
pub use resource::Resource;
pub use retry::{RetryError, RetryPolicy, RetryPolicyBuilder};
pub use router::{EmitReport, NonBlockingRouter, SinkRouter};
pub use sinks::{ConsoleSink, MemorySink, RollingFileSink, RollingPolicy, Sink, SinkConfig};
pub use trace::{ActiveSpan, SpanId, SpanRecord, TraceContext, TraceCorrelator, TraceId};
