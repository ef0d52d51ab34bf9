//! File-based pipeline configuration.
//!
//! ```rust
//! use logweave::PipelineConfig;
//!
//! let config = PipelineConfig::from_json_str(r#"{
//!     "service": { "name": "logging-app", "environment": "Staging" },
//!     "sinks": [ { "name": "console", "kind": "console", "minimum_level": "info" } ]
//! }"#).unwrap();
//! assert_eq!(config.service.version, "1.0.0");
//! assert_eq!(config.sinks.len(), 1);
//! ```

use crate::error::ConfigError;
use crate::event::Level;
use crate::export::ExporterConfig;
use crate::generator::GeneratorConfig;
use crate::resource::Resource;
use crate::router::SinkRouter;
use crate::sinks::{RollingPolicy, SinkConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub version: String,
    pub environment: String,
    /// Value of the `application` property on every record.
    pub application: String,
    /// Overrides host-name detection.
    pub instance_id: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "logging-app".to_string(),
            version: "1.0.0".to_string(),
            environment: "Production".to_string(),
            application: "LoggingApp".to_string(),
            instance_id: None,
        }
    }
}

/// Generator started with the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupGenerator {
    #[serde(flatten)]
    pub run: GeneratorConfig,
    /// Repeat the run this often; `None` runs it once.
    pub period_ms: Option<u64>,
}

impl Default for StartupGenerator {
    fn default() -> Self {
        Self { run: GeneratorConfig::default(), period_ms: None }
    }
}

/// Everything needed to assemble a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub service: ServiceConfig,
    pub sinks: Vec<SinkConfig>,
    /// Route sink writes through a bounded queue of this size instead of writing inline.
    pub queue_capacity: Option<usize>,
    pub exporter: Option<ExporterConfig>,
    pub generator: Option<StartupGenerator>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            sinks: vec![
                SinkConfig::console("console").with_minimum_level(Level::Debug),
                SinkConfig::file("file", "logs/app-.log", RollingPolicy::Daily)
                    .with_minimum_level(Level::Debug),
            ],
            queue_capacity: None,
            exporter: Some(ExporterConfig::default()),
            generator: Some(StartupGenerator::default()),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.name.trim().is_empty() {
            return Err(ConfigError::invalid("service.name", "must not be empty"));
        }
        let mut names = std::collections::BTreeSet::new();
        for sink in &self.sinks {
            if !names.insert(sink.name.as_str()) {
                return Err(ConfigError::invalid(
                    "sinks.name",
                    format!("duplicate sink name {:?}", sink.name),
                ));
            }
        }
        if self.queue_capacity == Some(0) {
            return Err(ConfigError::invalid("queue_capacity", "must be > 0"));
        }
        if let Some(exporter) = &self.exporter {
            exporter.validate()?;
        }
        if let Some(generator) = &self.generator {
            generator.run.validate()?;
            if generator.period_ms == Some(0) {
                return Err(ConfigError::invalid("generator.period_ms", "must be > 0"));
            }
        }
        Ok(())
    }

    /// Resource snapshot for enrichment and export; detects the host when no instance id is
    /// configured.
    pub fn resource(&self) -> Resource {
        let svc = &self.service;
        let resource = match &svc.instance_id {
            Some(id) => Resource::new(&svc.name, &svc.version, &svc.environment)
                .with_instance_id(id.clone()),
            None => Resource::detect(&svc.name, &svc.version, &svc.environment),
        };
        resource.with_application(svc.application.clone())
    }

    /// Construct every configured sink.
    pub fn build_router(&self) -> Result<SinkRouter, ConfigError> {
        let mut builder = SinkRouter::builder();
        for sink in &self.sinks {
            builder = builder.route_shared(sink.build()?, sink.minimum_level);
        }
        Ok(builder.build())
    }
}
