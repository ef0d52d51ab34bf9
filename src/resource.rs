//! Static process attributes shared by log enrichment and telemetry export.
//!
//! Built once before any worker starts and shared as `Arc<Resource>`; never mutated.

use serde::{Deserialize, Serialize};

/// `service.name` resource key.
pub const SERVICE_NAME: &str = "service.name";
/// `service.version` resource key.
pub const SERVICE_VERSION: &str = "service.version";
/// `deployment.environment` resource key.
pub const DEPLOYMENT_ENVIRONMENT: &str = "deployment.environment";
/// `service.instance.id` resource key.
pub const SERVICE_INSTANCE_ID: &str = "service.instance.id";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    service_name: String,
    service_version: String,
    environment: String,
    application: Option<String>,
    instance_id: Option<String>,
}

impl Resource {
    pub fn new(
        service_name: impl Into<String>,
        service_version: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            service_version: service_version.into(),
            environment: environment.into(),
            application: None,
            instance_id: None,
        }
    }

    /// Like [`Resource::new`] with the instance id taken from the host name, when one can be
    /// found.
    pub fn detect(
        service_name: impl Into<String>,
        service_version: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        let resource = Self::new(service_name, service_version, environment);
        match detect_instance_id() {
            Some(id) => resource.with_instance_id(id),
            None => resource,
        }
    }

    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    /// Human-facing application name used by log enrichment; defaults to the service name.
    pub fn with_application(mut self, application: impl Into<String>) -> Self {
        self.application = Some(application.into());
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn service_version(&self) -> &str {
        &self.service_version
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn application(&self) -> &str {
        self.application.as_deref().unwrap_or(&self.service_name)
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    /// Resource attributes in export order; `service.instance.id` only when known.
    pub fn attributes(&self) -> Vec<(&'static str, &str)> {
        let mut attrs = vec![
            (SERVICE_NAME, self.service_name.as_str()),
            (SERVICE_VERSION, self.service_version.as_str()),
            (DEPLOYMENT_ENVIRONMENT, self.environment.as_str()),
        ];
        if let Some(id) = &self.instance_id {
            attrs.push((SERVICE_INSTANCE_ID, id.as_str()));
        }
        attrs
    }
}

fn detect_instance_id() -> Option<String> {
    let non_empty = |s: String| {
        let trimmed = s.trim().to_string();
        (!trimmed.is_empty()).then_some(trimmed)
    };
    std::env::var("HOSTNAME")
        .ok()
        .and_then(non_empty)
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok().and_then(non_empty))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_omit_unknown_instance() {
        let resource = Resource::new("logging-app", "1.0.0", "Staging");
        let keys: Vec<_> = resource.attributes().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, [SERVICE_NAME, SERVICE_VERSION, DEPLOYMENT_ENVIRONMENT]);
    }

    #[test]
    fn attributes_include_instance_when_set() {
        let resource = Resource::new("logging-app", "1.0.0", "Staging").with_instance_id("pod-7");
        assert!(resource.attributes().contains(&(SERVICE_INSTANCE_ID, "pod-7")));
    }

    #[test]
    fn application_defaults_to_service_name() {
        let resource = Resource::new("logging-app", "1.0.0", "Production");
        assert_eq!(resource.application(), "logging-app");
        let resource = resource.with_application("LoggingApp");
        assert_eq!(resource.application(), "LoggingApp");
    }
}
