//! Output destinations for rendered records.
//!
//! A [`Sink`] receives every record the router forwards to it and is responsible for its own
//! serialization of concurrent writes. Sinks never see records below their route's minimum
//! level; the router filters before calling [`Sink::write`].
//!
//! Built-in sinks:
//! - [`ConsoleSink`]: one rendered line per record to stdout (or any writer)
//! - [`RollingFileSink`]: appends to a file whose name carries the current period
//! - [`MemorySink`]: bounded in-memory capture for tests and diagnostics
//!
//! # Implementing a sink
//!
//! ```rust
//! use async_trait::async_trait;
//! use logweave::{EventRecord, Sink, SinkError};
//!
//! #[derive(Debug)]
//! struct CountingSink(std::sync::atomic::AtomicUsize);
//!
//! #[async_trait]
//! impl Sink for CountingSink {
//!     fn name(&self) -> &str {
//!         "counting"
//!     }
//!
//!     async fn write(&self, _record: &EventRecord) -> Result<(), SinkError> {
//!         self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!         Ok(())
//!     }
//! }
//! ```

mod console;
mod memory;
mod rolling_file;

pub use console::ConsoleSink;
pub use memory::MemorySink;
pub use rolling_file::{FilePattern, RollingFileSink, RollingPolicy};

use crate::error::{ConfigError, SinkError};
use crate::event::{EventRecord, Level};
use crate::render::OutputTemplate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// A destination for records.
#[async_trait]
pub trait Sink: Send + Sync + std::fmt::Debug {
    /// Short name used in fault reports and diagnostics.
    fn name(&self) -> &str;

    /// Persist or display one record. Concurrent calls must not interleave output.
    async fn write(&self, record: &EventRecord) -> Result<(), SinkError>;

    /// Push buffered output to its destination.
    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[async_trait]
impl<S: Sink + ?Sized> Sink for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn write(&self, record: &EventRecord) -> Result<(), SinkError> {
        (**self).write(record).await
    }

    async fn flush(&self) -> Result<(), SinkError> {
        (**self).flush().await
    }
}

fn default_minimum_level() -> Level {
    Level::Debug
}

/// Where a configured sink writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkTarget {
    /// Standard output.
    Console,
    /// Rolling file. `path` is a pattern such as `logs/app-.log`.
    File {
        path: PathBuf,
        #[serde(default)]
        rolling: RollingPolicy,
        /// Keep at most this many files matching the pattern; `None` keeps all.
        #[serde(default)]
        retained_files: Option<usize>,
    },
}

/// Declarative sink definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkConfig {
    pub name: String,
    #[serde(flatten)]
    pub target: SinkTarget,
    #[serde(default = "default_minimum_level")]
    pub minimum_level: Level,
    /// Overrides the target's default layout.
    #[serde(default)]
    pub output_template: Option<String>,
}

impl SinkConfig {
    pub fn console(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: SinkTarget::Console,
            minimum_level: default_minimum_level(),
            output_template: None,
        }
    }

    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>, rolling: RollingPolicy) -> Self {
        Self {
            name: name.into(),
            target: SinkTarget::File { path: path.into(), rolling, retained_files: None },
            minimum_level: default_minimum_level(),
            output_template: None,
        }
    }

    pub fn with_minimum_level(mut self, level: Level) -> Self {
        self.minimum_level = level;
        self
    }

    pub fn with_output_template(mut self, template: impl Into<String>) -> Self {
        self.output_template = Some(template.into());
        self
    }

    /// Parse the layout and construct the sink. Files are opened lazily on first write.
    pub fn build(&self) -> Result<Arc<dyn Sink>, ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid("sinks.name", "must not be empty"));
        }
        let template = |default: fn() -> OutputTemplate| -> Result<OutputTemplate, ConfigError> {
            match &self.output_template {
                Some(t) => Ok(OutputTemplate::parse(t)?),
                None => Ok(default()),
            }
        };
        Ok(match &self.target {
            SinkTarget::Console => {
                Arc::new(ConsoleSink::stdout(template(OutputTemplate::console)?).named(&self.name))
            }
            SinkTarget::File { path, rolling, retained_files } => {
                if retained_files == &Some(0) {
                    return Err(ConfigError::invalid("sinks.retained_files", "must be > 0"));
                }
                let pattern = FilePattern::parse(path)?;
                let layout = template(OutputTemplate::file)?;
                let mut sink = RollingFileSink::new(pattern, *rolling, layout).named(&self.name);
                if let Some(n) = retained_files {
                    sink = sink.with_retained_files(*n);
                }
                Arc::new(sink)
            }
        })
    }
}
