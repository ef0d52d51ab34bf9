//! The emission API.
//!
//! [`Logger::emit`] stamps a record with the logger's clock, then runs enrichment, trace
//! correlation, and routing strictly in that order. Enrichment and correlation run on the
//! calling task so task-local scopes (log context, trace context) are visible even when the
//! sink writes are queued to a background worker.

use crate::clock::{Clock, SystemClock};
use crate::enrich::EnrichmentPipeline;
use crate::event::{EventRecord, ExceptionInfo, Level, Properties};
use crate::router::{NonBlockingRouter, SinkFaults, SinkRouter};
use crate::trace::TraceCorrelator;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Dispatch {
    Inline(SinkRouter),
    Queued(Arc<NonBlockingRouter>),
}

/// Front door for application code. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Logger {
    pipeline: EnrichmentPipeline,
    correlator: TraceCorrelator,
    dispatch: Dispatch,
    clock: Arc<dyn Clock>,
}

impl Logger {
    /// Logger that writes to sinks on the calling task.
    pub fn new(pipeline: EnrichmentPipeline, router: SinkRouter) -> Self {
        Self {
            pipeline,
            correlator: TraceCorrelator,
            dispatch: Dispatch::Inline(router),
            clock: Arc::new(SystemClock),
        }
    }

    /// Logger whose sink writes go through a bounded queue; a full queue drops records.
    ///
    /// Must be called inside a tokio runtime.
    pub fn queued(pipeline: EnrichmentPipeline, router: SinkRouter, capacity: usize) -> Self {
        Self {
            pipeline,
            correlator: TraceCorrelator,
            dispatch: Dispatch::Queued(Arc::new(NonBlockingRouter::new(router, capacity))),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn router(&self) -> &SinkRouter {
        match &self.dispatch {
            Dispatch::Inline(router) => router,
            Dispatch::Queued(queued) => queued.router(),
        }
    }

    pub async fn emit(
        &self,
        level: Level,
        template: &str,
        properties: Properties,
        exception: Option<ExceptionInfo>,
    ) {
        let mut builder =
            EventRecord::builder(level, template).at(self.clock.now()).properties(properties);
        if let Some(exception) = exception {
            builder = builder.exception(exception);
        }
        self.emit_record(builder.build()).await;
    }

    /// Route an already built record; its timestamp is kept.
    pub async fn emit_record(&self, record: EventRecord) {
        let record = self.correlator.correlate(self.pipeline.apply(record));
        match &self.dispatch {
            Dispatch::Inline(router) => router.emit(record).await,
            Dispatch::Queued(queued) => {
                queued.try_emit(record);
            }
        }
    }

    pub async fn debug(&self, template: &str, properties: Properties) {
        self.emit(Level::Debug, template, properties, None).await
    }

    pub async fn info(&self, template: &str, properties: Properties) {
        self.emit(Level::Info, template, properties, None).await
    }

    pub async fn warning(&self, template: &str, properties: Properties) {
        self.emit(Level::Warning, template, properties, None).await
    }

    pub async fn error(
        &self,
        template: &str,
        properties: Properties,
        exception: Option<ExceptionInfo>,
    ) {
        self.emit(Level::Error, template, properties, exception).await
    }

    pub async fn critical(
        &self,
        template: &str,
        properties: Properties,
        exception: Option<ExceptionInfo>,
    ) {
        self.emit(Level::Critical, template, properties, exception).await
    }

    /// Per-sink delivery counters.
    pub fn faults(&self) -> Vec<SinkFaults> {
        self.router().faults()
    }

    /// Records dropped by a queued logger; always zero for inline delivery.
    pub fn dropped(&self) -> u64 {
        match &self.dispatch {
            Dispatch::Inline(_) => 0,
            Dispatch::Queued(queued) => queued.dropped(),
        }
    }

    /// Deliver anything queued, then flush every sink.
    pub async fn shutdown(&self) {
        match &self.dispatch {
            Dispatch::Inline(router) => router.flush_all().await,
            Dispatch::Queued(queued) => queued.shutdown().await,
        }
    }
}
