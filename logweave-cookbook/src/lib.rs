//! Process bootstrap for `logweave`.
//!
//! Turns a [`PipelineConfig`] into a running pipeline: sinks behind a router, the standard
//! enrichers, an OTLP exporter when one is configured, and the startup generator.
//!
//! **Lifecycle:**
//! - [`Pipeline::build`] validates and constructs everything; nothing is written yet
//! - [`Pipeline::announce`] logs the startup line
//! - [`Pipeline::start_generator`] launches the configured generator
//! - [`Pipeline::shutdown`] drains the exporter and flushes every sink
//! - [`report_fatal`] is the last word on a startup failure

use logweave::generator::GeneratorHandle;
use logweave::{
    ConfigError, EnrichmentPipeline, ExceptionInfo, ExportStats, ExportTransport, ExporterBridge,
    GeneratorError, GeneratorService, Level, Logger, PipelineConfig, Properties, Resource,
    SinkConfig, SinkRouter, StartupGenerator, SyntheticEventGenerator,
};
use logweave_otlp::{EndpointError, OtlpTransport};
use std::sync::Arc;
use std::time::Duration;

/// Startup failure.
#[derive(thiserror::Error, Debug)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    #[error(transparent)]
    Generator(#[from] GeneratorError),
}

/// A fully wired pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub logger: Logger,
    pub resource: Arc<Resource>,
    pub exporter: Option<Arc<ExporterBridge>>,
}

impl Pipeline {
    /// Build with an OTLP transport for the configured exporter. Must run inside a tokio
    /// runtime.
    pub fn build(config: &PipelineConfig) -> Result<Self, BootstrapError> {
        let transport: Option<Arc<dyn ExportTransport>> = match &config.exporter {
            Some(exporter) => Some(Arc::new(OtlpTransport::from_config(exporter)?)),
            None => None,
        };
        Self::build_with_transport(config, transport)
    }

    /// Build with a caller-supplied transport; `None` disables export even when configured.
    pub fn build_with_transport(
        config: &PipelineConfig,
        transport: Option<Arc<dyn ExportTransport>>,
    ) -> Result<Self, BootstrapError> {
        config.validate()?;
        let resource = Arc::new(config.resource());
        let router = config.build_router()?;
        let enrichment = EnrichmentPipeline::standard(resource.clone());
        let logger = match config.queue_capacity {
            Some(capacity) => Logger::queued(enrichment, router, capacity),
            None => Logger::new(enrichment, router),
        };
        let exporter = match (&config.exporter, transport) {
            (Some(exporter), Some(transport)) => Some(Arc::new(ExporterBridge::start(
                exporter.clone(),
                transport,
                resource.clone(),
            )?)),
            _ => None,
        };
        Ok(Self { logger, resource, exporter })
    }

    /// `Starting {Application} on {Environment}` at Info.
    pub async fn announce(&self) {
        let props = Properties::new()
            .with("Application", self.resource.application())
            .with("Environment", self.resource.environment());
        self.logger.info("Starting {Application} on {Environment}", props).await;
    }

    /// Launch the startup generator: once, or every `period_ms` until cancelled.
    pub fn start_generator(
        &self,
        startup: &StartupGenerator,
    ) -> Result<GeneratorHandle, BootstrapError> {
        let mut generator = SyntheticEventGenerator::new(self.logger.clone());
        if let Some(exporter) = &self.exporter {
            generator = generator.with_exporter(exporter.clone());
        }
        let handle = match startup.period_ms {
            Some(ms) => {
                GeneratorService::new(generator, startup.run.clone(), Duration::from_millis(ms))?
                    .spawn()
            }
            None => generator.spawn(startup.run.clone())?,
        };
        Ok(handle)
    }

    /// Drain the exporter, then flush the sinks.
    pub async fn shutdown(&self) -> Option<ExportStats> {
        let stats = match &self.exporter {
            Some(exporter) => Some(exporter.shutdown().await),
            None => None,
        };
        self.logger.shutdown().await;
        stats
    }
}

/// Log `err` at Critical and flush. Without a pipeline, a console sink stands in.
pub async fn report_fatal(pipeline: Option<&Pipeline>, err: &BootstrapError) {
    tracing::error!(target: "logweave::selflog", error = %err, "startup failed");
    let fallback;
    let logger = match pipeline {
        Some(pipeline) => &pipeline.logger,
        None => {
            fallback = console_logger();
            &fallback
        }
    };
    logger
        .critical(
            "Application terminated unexpectedly",
            Properties::new(),
            Some(ExceptionInfo::from_error(err)),
        )
        .await;
    logger.shutdown().await;
}

fn console_logger() -> Logger {
    let router = match SinkConfig::console("console").build() {
        Ok(sink) => SinkRouter::builder().route_shared(sink, Level::Debug).build(),
        Err(_) => SinkRouter::builder().build(),
    };
    Logger::new(EnrichmentPipeline::empty(), router)
}
