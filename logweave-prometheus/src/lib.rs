//! Prometheus collector for `logweave`.
//! Bring your own `prometheus::Registry`; values are read from the pipeline at scrape time.

use logweave::{ExporterBridge, Logger};
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use std::sync::{Arc, Mutex};

/// Exposes per-sink delivery, log-queue drops, and exporter counters.
///
/// | metric | labels |
/// |--------|--------|
/// | `logweave_sink_records_total` | `sink`, `outcome` = delivered/failed |
/// | `logweave_log_queue_dropped_total` | |
/// | `logweave_export_items_total` | `outcome`, one per `ExportStats` item counter |
/// | `logweave_export_batches_total` | `outcome` = exported/dropped |
/// | `logweave_export_failed_attempts_total` | |
#[derive(Debug)]
pub struct PipelineCollector {
    logger: Logger,
    exporter: Option<Arc<ExporterBridge>>,
    sink_records: IntCounterVec,
    queue_dropped: IntCounter,
    export_items: IntCounterVec,
    export_batches: IntCounterVec,
    failed_attempts: IntCounter,
    // Scrapes reset and refill the vectors.
    scrape: Mutex<()>,
}

impl PipelineCollector {
    /// # Errors
    /// Returns an error if a metric description is invalid.
    pub fn new(
        logger: Logger,
        exporter: Option<Arc<ExporterBridge>>,
    ) -> Result<Self, prometheus::Error> {
        Ok(Self {
            logger,
            exporter,
            sink_records: IntCounterVec::new(
                Opts::new("logweave_sink_records_total", "Records handed to each sink"),
                &["sink", "outcome"],
            )?,
            queue_dropped: IntCounter::new(
                "logweave_log_queue_dropped_total",
                "Records dropped because the log queue was full",
            )?,
            export_items: IntCounterVec::new(
                Opts::new("logweave_export_items_total", "Telemetry items seen by the exporter"),
                &["outcome"],
            )?,
            export_batches: IntCounterVec::new(
                Opts::new("logweave_export_batches_total", "Batches sent to the collector"),
                &["outcome"],
            )?,
            failed_attempts: IntCounter::new(
                "logweave_export_failed_attempts_total",
                "Export attempts that failed or timed out",
            )?,
            scrape: Mutex::new(()),
        })
    }

    /// Build a collector and register it.
    ///
    /// # Errors
    /// Returns an error if the metrics cannot be registered (e.g. name conflict).
    pub fn register(
        registry: &Registry,
        logger: Logger,
        exporter: Option<Arc<ExporterBridge>>,
    ) -> Result<(), prometheus::Error> {
        registry.register(Box::new(Self::new(logger, exporter)?))
    }

    fn refresh(&self) {
        self.sink_records.reset();
        for fault in self.logger.faults() {
            let name = fault.name.as_str();
            self.sink_records.with_label_values(&[name, "delivered"]).inc_by(fault.delivered);
            self.sink_records.with_label_values(&[name, "failed"]).inc_by(fault.failed);
        }

        self.queue_dropped.reset();
        self.queue_dropped.inc_by(self.logger.dropped());

        self.export_items.reset();
        self.export_batches.reset();
        self.failed_attempts.reset();
        if let Some(exporter) = &self.exporter {
            let stats = exporter.stats();
            let items = [
                ("submitted", stats.submitted),
                ("queue_full", stats.queue_full),
                ("closed", stats.closed),
                ("exported", stats.exported_items),
                ("dropped", stats.dropped_items),
                ("abandoned", stats.abandoned_items),
            ];
            for (outcome, n) in items {
                self.export_items.with_label_values(&[outcome]).inc_by(n);
            }
            self.export_batches.with_label_values(&["exported"]).inc_by(stats.exported_batches);
            self.export_batches.with_label_values(&["dropped"]).inc_by(stats.dropped_batches);
            self.failed_attempts.inc_by(stats.failed_attempts);
        }
    }
}

impl Collector for PipelineCollector {
    fn desc(&self) -> Vec<&Desc> {
        let mut descs = self.sink_records.desc();
        descs.extend(self.queue_dropped.desc());
        descs.extend(self.export_items.desc());
        descs.extend(self.export_batches.desc());
        descs.extend(self.failed_attempts.desc());
        descs
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let _guard = self.scrape.lock().unwrap_or_else(|p| p.into_inner());
        self.refresh();
        let mut families = self.sink_records.collect();
        families.extend(self.queue_dropped.collect());
        if self.exporter.is_some() {
            families.extend(self.export_items.collect());
            families.extend(self.export_batches.collect());
            families.extend(self.failed_attempts.collect());
        }
        families
    }
}
