//! Background forwarding of spans and metrics to a remote collector.
//!
//! [`ExporterBridge`] owns one worker task and a bounded queue. Producers call
//! [`submit`](ExporterBridge::submit), which never waits: a full queue drops the item and
//! counts it. The worker groups items into batches of at most `max_batch_size`, or whatever
//! has arrived when `flush_interval` elapses, and hands each batch to an [`ExportTransport`]
//! under a [`RetryPolicy`]. A batch that still fails after `max_attempts` is dropped and
//! counted; the process never blocks on the collector.
//!
//! Every batch carries the same [`Resource`] used for log enrichment.

mod transport;

pub use transport::{ExportTransport, FailingTransport, MemoryTransport};

use crate::backoff::Backoff;
use crate::error::{ConfigError, ExportError};
use crate::event::{Properties, Value};
use crate::jitter::Jitter;
use crate::resource::Resource;
use crate::retry::RetryPolicy;
use crate::trace::SpanRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Monotonic sum.
    Counter,
    /// Point-in-time value.
    Gauge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub attributes: Properties,
}

impl MetricPoint {
    pub fn counter(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, MetricKind::Counter, value)
    }

    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, MetricKind::Gauge, value)
    }

    fn new(name: impl Into<String>, kind: MetricKind, value: f64) -> Self {
        let name = name.into();
        Self { name, kind, value, timestamp: Utc::now(), attributes: Properties::new() }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key, value);
        self
    }
}

/// One exportable item.
#[derive(Debug, Clone, PartialEq)]
pub enum Telemetry {
    Span(SpanRecord),
    Metric(MetricPoint),
}

impl From<SpanRecord> for Telemetry {
    fn from(span: SpanRecord) -> Self {
        Telemetry::Span(span)
    }
}

impl From<MetricPoint> for Telemetry {
    fn from(metric: MetricPoint) -> Self {
        Telemetry::Metric(metric)
    }
}

/// Items sent to the collector in one call.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportBatch {
    pub resource: Arc<Resource>,
    pub items: Vec<Telemetry>,
}

impl ExportBatch {
    pub fn spans(&self) -> impl Iterator<Item = &SpanRecord> {
        self.items.iter().filter_map(|item| match item {
            Telemetry::Span(span) => Some(span),
            Telemetry::Metric(_) => None,
        })
    }

    pub fn metrics(&self) -> impl Iterator<Item = &MetricPoint> {
        self.items.iter().filter_map(|item| match item {
            Telemetry::Metric(metric) => Some(metric),
            Telemetry::Span(_) => None,
        })
    }
}

fn default_endpoint() -> String {
    "http://localhost:4317".to_string()
}

/// Exporter tuning. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    /// Collector address, e.g. `http://alloy:4317`.
    pub endpoint: String,
    pub queue_capacity: usize,
    pub max_batch_size: usize,
    pub flush_interval_ms: u64,
    /// Total attempts per batch, including the first.
    pub max_attempts: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter: Jitter,
    /// Deadline for a single transport call.
    pub export_timeout_ms: u64,
    /// Upper bound on how long [`ExporterBridge::submit_within`] may wait for queue space.
    pub submit_timeout_ms: u64,
    /// How long shutdown waits for the queue to drain.
    pub shutdown_grace_ms: u64,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            queue_capacity: 2048,
            max_batch_size: 512,
            flush_interval_ms: 1000,
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
            jitter: Jitter::Full,
            export_timeout_ms: 10_000,
            submit_timeout_ms: 50,
            shutdown_grace_ms: 5000,
        }
    }
}

impl ExporterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::invalid("exporter.endpoint", "must not be empty"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid("exporter.queue_capacity", "must be > 0"));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::invalid("exporter.max_batch_size", "must be > 0"));
        }
        if self.flush_interval_ms == 0 {
            return Err(ConfigError::invalid("exporter.flush_interval_ms", "must be > 0"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("exporter.max_attempts", "must be > 0"));
        }
        if self.export_timeout_ms == 0 {
            return Err(ConfigError::invalid("exporter.export_timeout_ms", "must be > 0"));
        }
        self.backoff()?;
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_millis(self.export_timeout_ms)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    fn backoff(&self) -> Result<Backoff, ConfigError> {
        let base = Duration::from_millis(self.initial_backoff_ms);
        let max = Duration::from_millis(self.max_backoff_ms);
        if base.is_zero() {
            return Ok(Backoff::constant(Duration::ZERO));
        }
        Backoff::exponential(base)
            .with_max(max)
            .map_err(|e| ConfigError::invalid("exporter.max_backoff_ms", e.to_string()))
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportStats {
    /// Items accepted into the queue.
    pub submitted: u64,
    /// Items dropped because the queue was full.
    pub queue_full: u64,
    /// Items refused because the bridge was shutting down.
    pub closed: u64,
    pub exported_batches: u64,
    pub exported_items: u64,
    /// Transport calls that failed or timed out.
    pub failed_attempts: u64,
    /// Batches given up on after the last attempt.
    pub dropped_batches: u64,
    pub dropped_items: u64,
    /// Items still queued or in flight when the shutdown grace ran out.
    pub abandoned_items: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    queue_full: AtomicU64,
    closed: AtomicU64,
    exported_batches: AtomicU64,
    exported_items: AtomicU64,
    failed_attempts: AtomicU64,
    dropped_batches: AtomicU64,
    dropped_items: AtomicU64,
    abandoned_items: AtomicU64,
    in_flight: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ExportStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        ExportStats {
            submitted: load(&self.submitted),
            queue_full: load(&self.queue_full),
            closed: load(&self.closed),
            exported_batches: load(&self.exported_batches),
            exported_items: load(&self.exported_items),
            failed_attempts: load(&self.failed_attempts),
            dropped_batches: load(&self.dropped_batches),
            dropped_items: load(&self.dropped_items),
            abandoned_items: load(&self.abandoned_items),
        }
    }
}

/// Bounded, non-blocking handoff from the process to a collector.
#[derive(Debug)]
pub struct ExporterBridge {
    tx: mpsc::Sender<Telemetry>,
    counters: Arc<Counters>,
    config: ExporterConfig,
    resource: Arc<Resource>,
    shutdown: CancellationToken,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ExporterBridge {
    /// Validate `config` and spawn the worker. Must be called inside a tokio runtime.
    pub fn start(
        config: ExporterConfig,
        transport: Arc<dyn ExportTransport>,
        resource: Arc<Resource>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let policy = RetryPolicy::<ExportError>::builder()
            .max_attempts(config.max_attempts)
            .backoff(config.backoff()?)
            .with_jitter(config.jitter)
            .should_retry(|e| !matches!(e, ExportError::Rejected(_)))
            .build()
            .map_err(|e| ConfigError::invalid("exporter.max_attempts", e.to_string()))?;
        Self::start_with_policy(config, transport, resource, policy)
    }

    /// Like [`start`](Self::start) with an explicit retry policy.
    pub fn start_with_policy(
        config: ExporterConfig,
        transport: Arc<dyn ExportTransport>,
        resource: Arc<Resource>,
        policy: RetryPolicy<ExportError>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let counters = Arc::new(Counters::default());
        let shutdown = CancellationToken::new();
        let worker = Worker {
            rx,
            transport,
            resource: resource.clone(),
            policy,
            max_batch_size: config.max_batch_size,
            flush_interval: config.flush_interval(),
            export_timeout: config.export_timeout(),
            counters: counters.clone(),
            shutdown: shutdown.clone(),
        };
        let handle = tokio::spawn(worker.run());
        Ok(Self {
            tx,
            counters,
            config,
            resource,
            shutdown,
            worker: tokio::sync::Mutex::new(Some(handle)),
        })
    }

    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    pub fn config(&self) -> &ExporterConfig {
        &self.config
    }

    /// Enqueue without waiting. Returns whether the item was accepted.
    pub fn submit(&self, item: impl Into<Telemetry>) -> bool {
        match self.tx.try_send(item.into()) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.record_queue_full();
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.closed.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Enqueue, waiting at most `min(timeout, submit_timeout)` for space.
    pub async fn submit_within(&self, item: impl Into<Telemetry>, timeout: Duration) -> bool {
        let wait = timeout.min(self.config.submit_timeout());
        match self.tx.send_timeout(item.into(), wait).await {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(SendTimeoutError::Timeout(_)) => {
                self.record_queue_full();
                false
            }
            Err(SendTimeoutError::Closed(_)) => {
                self.counters.closed.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    fn record_queue_full(&self) {
        let n = self.counters.queue_full.fetch_add(1, Ordering::Relaxed) + 1;
        if n.is_power_of_two() {
            tracing::warn!(
                target: "logweave::selflog",
                dropped = n,
                "export queue full; dropping telemetry"
            );
        }
    }

    pub fn stats(&self) -> ExportStats {
        self.counters.snapshot()
    }

    /// Stop accepting items, export what is queued, and wait up to `shutdown_grace`.
    ///
    /// If the grace period runs out the worker is aborted; whatever it still held is counted
    /// in `abandoned_items`. Calling this more than once is harmless.
    pub async fn shutdown(&self) -> ExportStats {
        self.shutdown.cancel();
        let handle = self.worker.lock().await.take();
        if let Some(mut handle) = handle {
            match tokio::time::timeout(self.config.shutdown_grace(), &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(
                        target: "logweave::selflog",
                        error = %err,
                        "export worker ended abnormally"
                    );
                }
                Err(_) => {
                    let queued = (self.tx.max_capacity() - self.tx.capacity()) as u64;
                    let held = self.counters.in_flight.load(Ordering::Relaxed);
                    handle.abort();
                    let abandoned = queued + held;
                    self.counters.abandoned_items.fetch_add(abandoned, Ordering::Relaxed);
                    tracing::warn!(
                        target: "logweave::selflog",
                        abandoned,
                        grace_ms = self.config.shutdown_grace_ms,
                        "export shutdown grace elapsed; abandoning telemetry"
                    );
                }
            }
        }
        self.stats()
    }
}

struct Worker {
    rx: mpsc::Receiver<Telemetry>,
    transport: Arc<dyn ExportTransport>,
    resource: Arc<Resource>,
    policy: RetryPolicy<ExportError>,
    max_batch_size: usize,
    flush_interval: Duration,
    export_timeout: Duration,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        let mut buffer = Vec::with_capacity(self.max_batch_size);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                item = self.rx.recv() => match item {
                    Some(item) => {
                        self.counters.in_flight.fetch_add(1, Ordering::Relaxed);
                        buffer.push(item);
                        if buffer.len() >= self.max_batch_size {
                            self.export(std::mem::take(&mut buffer)).await;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if !buffer.is_empty() {
                        self.export(std::mem::take(&mut buffer)).await;
                    }
                }
            }
        }

        self.rx.close();
        while let Some(item) = self.rx.recv().await {
            self.counters.in_flight.fetch_add(1, Ordering::Relaxed);
            buffer.push(item);
            if buffer.len() >= self.max_batch_size {
                self.export(std::mem::take(&mut buffer)).await;
            }
        }
        if !buffer.is_empty() {
            self.export(buffer).await;
        }
    }

    async fn export(&self, items: Vec<Telemetry>) {
        let count = items.len() as u64;
        let batch = ExportBatch { resource: self.resource.clone(), items };
        let batch = &batch;
        let transport = &self.transport;
        let counters = &self.counters;
        let deadline = self.export_timeout;

        let outcome = self
            .policy
            .execute(|_attempt| async move {
                let result = match tokio::time::timeout(deadline, transport.export(batch)).await {
                    Ok(result) => result,
                    Err(_) => Err(ExportError::Timeout(deadline)),
                };
                if result.is_err() {
                    counters.failed_attempts.fetch_add(1, Ordering::Relaxed);
                }
                result
            })
            .await;

        match outcome {
            Ok(()) => {
                counters.exported_batches.fetch_add(1, Ordering::Relaxed);
                counters.exported_items.fetch_add(count, Ordering::Relaxed);
            }
            Err(err) => {
                counters.dropped_batches.fetch_add(1, Ordering::Relaxed);
                counters.dropped_items.fetch_add(count, Ordering::Relaxed);
                tracing::warn!(
                    target: "logweave::selflog",
                    items = count,
                    attempts = err.attempts,
                    error = %err.last,
                    "dropping telemetry batch"
                );
            }
        }
        counters.in_flight.fetch_sub(count, Ordering::Relaxed);
    }
}
