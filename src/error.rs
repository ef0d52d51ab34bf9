//! Error types for the pipeline.
//!
//! None of these ever reach a caller of [`Logger::emit`](crate::Logger::emit): sink and export
//! failures are counted and reported on the selflog channel. They surface only from
//! configuration, construction, and the sink/transport seams themselves.
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Failure while writing to or flushing a single sink.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    /// Underlying I/O failed.
    #[error("io: {0}")]
    Io(#[from] io::Error),
    /// The file for a new rotation bucket could not be opened.
    #[error("cannot open {}: {source}", .path.display())]
    Rotation {
        /// Path that failed to open.
        path: PathBuf,
        /// Cause.
        #[source]
        source: io::Error,
    },
    /// The sink has been shut down or its writer was poisoned.
    #[error("sink closed")]
    Closed,
    /// The sink refused the record.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Failure while forwarding a batch to the remote collector.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ExportError {
    /// Connection or protocol failure.
    #[error("transport: {0}")]
    Transport(String),
    /// The collector answered but refused the batch.
    #[error("collector rejected batch: {0}")]
    Rejected(String),
    /// A single export attempt ran past its deadline.
    #[error("export timed out after {0:?}")]
    Timeout(Duration),
}

/// Invalid output template.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// Token name is not one the output renderer knows.
    #[error("unknown output token {{{0}}}")]
    UnknownToken(String),
    /// Timestamp format is not a valid strftime string.
    #[error("invalid timestamp format {0:?}")]
    InvalidTimestampFormat(String),
    /// Format modifier is not supported for this token.
    #[error("unsupported format {format:?} for {{{token}}}")]
    UnsupportedFormat {
        /// Token the modifier was attached to.
        token: &'static str,
        /// Offending modifier.
        format: String,
    },
}

/// Invalid or unreadable configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// A field failed validation.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Field name as it appears in configuration.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },
    /// An output template failed to parse.
    #[error("template: {0}")]
    Template(#[from] TemplateError),
    /// The configuration file could not be read.
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Cause.
        #[source]
        source: io::Error,
    },
    /// The configuration file is not valid JSON for the expected shape.
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    /// Shorthand for [`ConfigError::Invalid`].
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid { field, reason: reason.into() }
    }
}

/// Failure starting or awaiting a generator run.
#[derive(thiserror::Error, Debug)]
pub enum GeneratorError {
    /// The run configuration was rejected before any event was produced.
    #[error("invalid generator configuration: {0}")]
    Config(#[from] ConfigError),
    /// The background task panicked or was aborted.
    #[error("generator task failed: {0}")]
    Join(String),
}

/// Unknown level name.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown level {0:?}")]
pub struct ParseLevelError(pub String);
