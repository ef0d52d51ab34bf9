//! Synthetic event generator for pipeline smoke tests and demos.
//!
//! A run emits `count` events through a [`Logger`], each with a level drawn from a weighted
//! set and a message drawn from a closed catalog. Every event carries `Index` (1-based),
//! `Message`, `UserId`, and `RequestId` properties. Cancellation is cooperative: it is checked
//! before each event is built and interrupts the pause between events, so a run never leaves
//! a partial event behind.
//!
//! Each run executes inside its own root span. When an exporter is attached, the finished span
//! and a `generator.events` counter are submitted to it.

use crate::clock::{Sleeper, TokioSleeper};
use crate::error::{ConfigError, GeneratorError};
use crate::event::{Level, Properties};
use crate::export::{ExporterBridge, MetricPoint};
use crate::logger::Logger;
use crate::trace::{ActiveSpan, SpanStatus};
use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Message catalog used when none is configured.
pub const DEFAULT_MESSAGES: [&str; 8] = [
    "Processing user request",
    "Database connection timeout",
    "Cache miss occurred",
    "Authentication successful",
    "File processing completed",
    "Network latency detected",
    "Memory usage threshold exceeded",
    "Background job started",
];

/// Span opened around each run.
pub const RUN_SPAN: &str = "generate_logs";
/// Counter submitted after each run.
pub const EVENTS_METRIC: &str = "generator.events";

fn default_template(level: Level) -> String {
    let noun = match level {
        Level::Debug => "debug",
        Level::Info => "log",
        Level::Warning => "warning",
        Level::Error => "error",
        Level::Critical => "critical",
    };
    format!("Generated {noun} {{Index}}: {{Message}} for User:{{UserId}} Request:{{RequestId}}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelWeight {
    pub level: Level,
    pub weight: u32,
}

/// Parameters of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub count: usize,
    /// Pause between consecutive events.
    pub inter_delay_ms: u64,
    pub messages: Vec<String>,
    pub levels: Vec<LevelWeight>,
    /// Per-level message templates; missing levels use the built-in wording.
    pub templates: BTreeMap<Level, String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            count: 10,
            inter_delay_ms: 50,
            messages: DEFAULT_MESSAGES.iter().map(|m| m.to_string()).collect(),
            levels: [Level::Info, Level::Warning, Level::Error, Level::Debug]
                .into_iter()
                .map(|level| LevelWeight { level, weight: 1 })
                .collect(),
            templates: BTreeMap::new(),
        }
    }
}

impl GeneratorConfig {
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn with_inter_delay(mut self, delay: Duration) -> Self {
        self.inter_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_levels(mut self, levels: impl IntoIterator<Item = (Level, u32)>) -> Self {
        self.levels =
            levels.into_iter().map(|(level, weight)| LevelWeight { level, weight }).collect();
        self
    }

    pub fn inter_delay(&self) -> Duration {
        Duration::from_millis(self.inter_delay_ms)
    }

    pub fn template_for(&self, level: Level) -> String {
        self.templates.get(&level).cloned().unwrap_or_else(|| default_template(level))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.messages.is_empty() {
            return Err(ConfigError::invalid("generator.messages", "catalog must not be empty"));
        }
        if self.levels.is_empty() {
            return Err(ConfigError::invalid("generator.levels", "must not be empty"));
        }
        if self.levels.iter().all(|w| w.weight == 0) {
            return Err(ConfigError::invalid("generator.levels", "at least one weight must be > 0"));
        }
        Ok(())
    }
}

/// Lifecycle of a generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    Idle,
    Running,
    Completed,
}

/// State of one spawned task, owned by its handle.
#[derive(Debug, Clone)]
struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(GeneratorState::Idle as u8)))
    }

    fn set(&self, state: GeneratorState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn get(&self) -> GeneratorState {
        match self.0.load(Ordering::Acquire) {
            1 => GeneratorState::Running,
            2 => GeneratorState::Completed,
            _ => GeneratorState::Idle,
        }
    }
}

/// Pre-resolved choices for one run.
struct Picker {
    levels: Vec<(Level, String)>,
    weights: WeightedIndex<u32>,
    messages: Vec<String>,
}

impl Picker {
    fn new(config: &GeneratorConfig) -> Result<Self, ConfigError> {
        let weights = WeightedIndex::new(config.levels.iter().map(|w| w.weight))
            .map_err(|e| ConfigError::invalid("generator.levels", e.to_string()))?;
        Ok(Self {
            levels: config.levels.iter().map(|w| (w.level, config.template_for(w.level))).collect(),
            weights,
            messages: config.messages.clone(),
        })
    }

    fn next(&self, index: usize) -> (Level, &str, Properties) {
        let mut rng = rand::rng();
        let (level, template) = &self.levels[self.weights.sample(&mut rng)];
        let message = &self.messages[rng.random_range(0..self.messages.len())];
        let user_id: u32 = rng.random_range(1000..9999);
        let request_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        let props = Properties::new()
            .with("Index", index)
            .with("Message", message.as_str())
            .with("UserId", user_id)
            .with("RequestId", request_id);
        (*level, template.as_str(), props)
    }
}

/// Emits synthetic events through a logger. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SyntheticEventGenerator {
    logger: Logger,
    exporter: Option<Arc<ExporterBridge>>,
    sleeper: Arc<dyn Sleeper>,
}

impl SyntheticEventGenerator {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger,
            exporter: None,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_exporter(mut self, exporter: Arc<ExporterBridge>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Emit up to `config.count` events; returns how many were emitted.
    pub async fn run(
        &self,
        config: &GeneratorConfig,
        cancel: &CancellationToken,
    ) -> Result<usize, GeneratorError> {
        config.validate()?;
        let picker = Picker::new(config)?;

        let mut span = ActiveSpan::root(RUN_SPAN);
        span.set_attribute("generator.requested", config.count);
        let emitted = span.context().scope(self.emit_all(config, &picker, cancel)).await;
        span.set_attribute("generator.emitted", emitted);
        span.set_attribute("generator.cancelled", emitted < config.count);

        if let Some(exporter) = &self.exporter {
            exporter.submit(span.finish(SpanStatus::Ok));
            exporter.submit(
                MetricPoint::counter(EVENTS_METRIC, emitted as f64)
                    .with_attribute("service.name", exporter.resource().service_name()),
            );
        }
        tracing::debug!(
            target: "logweave::generator",
            emitted,
            requested = config.count,
            "generator run finished"
        );
        Ok(emitted)
    }

    async fn emit_all(
        &self,
        config: &GeneratorConfig,
        picker: &Picker,
        cancel: &CancellationToken,
    ) -> usize {
        let delay = config.inter_delay();
        let mut emitted = 0;
        for i in 0..config.count {
            if cancel.is_cancelled() {
                break;
            }
            let (level, template, props) = picker.next(i + 1);
            self.logger.emit(level, template, props, None).await;
            emitted += 1;
            if i + 1 < config.count && !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = self.sleeper.sleep(delay) => {}
                }
            }
        }
        emitted
    }

    /// Validate `config` and run it on a background task.
    pub fn spawn(&self, config: GeneratorConfig) -> Result<GeneratorHandle, GeneratorError> {
        config.validate()?;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let generator = self.clone();
        let state = StateCell::new();
        let cell = state.clone();
        let join = tokio::spawn(async move {
            cell.set(GeneratorState::Running);
            let result = generator.run(&config, &token).await;
            cell.set(GeneratorState::Completed);
            result
        });
        Ok(GeneratorHandle { cancel, state, join })
    }
}

/// Background run started by [`SyntheticEventGenerator::spawn`] or [`GeneratorService::spawn`].
#[derive(Debug)]
pub struct GeneratorHandle {
    cancel: CancellationToken,
    state: StateCell,
    join: JoinHandle<Result<usize, GeneratorError>>,
}

impl GeneratorHandle {
    /// Ask the run to stop after the event in progress.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// `Running` from the moment the task starts until its last run ends, including the
    /// pauses between periodic runs.
    pub fn state(&self) -> GeneratorState {
        self.state.get()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Number of events emitted.
    pub async fn join(self) -> Result<usize, GeneratorError> {
        match self.join.await {
            Ok(result) => result,
            Err(err) => Err(GeneratorError::Join(err.to_string())),
        }
    }
}

/// Repeats a run every `period` until cancelled.
#[derive(Debug, Clone)]
pub struct GeneratorService {
    generator: SyntheticEventGenerator,
    config: GeneratorConfig,
    period: Duration,
}

impl GeneratorService {
    pub fn new(
        generator: SyntheticEventGenerator,
        config: GeneratorConfig,
        period: Duration,
    ) -> Result<Self, ConfigError> {
        if period.is_zero() {
            return Err(ConfigError::invalid("generator.period_ms", "must be > 0"));
        }
        config.validate()?;
        Ok(Self { generator, config, period })
    }

    /// Run until cancelled; returns the total number of events emitted.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<usize, GeneratorError> {
        let mut total = 0;
        while !cancel.is_cancelled() {
            total += self.generator.run(&self.config, cancel).await?;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.generator.sleeper.sleep(self.period) => {}
            }
        }
        Ok(total)
    }

    pub fn spawn(self) -> GeneratorHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let state = StateCell::new();
        let cell = state.clone();
        let join = tokio::spawn(async move {
            cell.set(GeneratorState::Running);
            let result = self.run(&token).await;
            cell.set(GeneratorState::Completed);
            result
        });
        GeneratorHandle { cancel, state, join }
    }
}
