mod common;

use common::utc;
use logweave::sinks::SinkTarget;
use logweave::{
    ConfigError, EnrichmentPipeline, EventRecord, Level, Logger, PipelineConfig, RollingPolicy,
};
use std::io::Write;
use std::sync::Arc;

const CONFIG: &str = r#"{
    "service": {
        "name": "logging-app",
        "version": "2.4.0",
        "environment": "Staging",
        "instance_id": "pod-42"
    },
    "sinks": [
        { "name": "console", "kind": "console", "minimum_level": "warning" },
        {
            "name": "file",
            "kind": "file",
            "path": "LOGDIR/app-.log",
            "rolling": "daily",
            "retained_files": 7,
            "output_template": "{Timestamp:%Y-%m-%d} [{Level:u3}] {Message} {Properties:kv}{NewLine}"
        }
    ],
    "exporter": { "endpoint": "http://alloy.observability.svc.cluster.local:4317" },
    "generator": { "count": 4, "inter_delay_ms": 0 }
}"#;

fn write_config(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("logweave.json");
    let json = CONFIG.replace("LOGDIR", &dir.join("logs").display().to_string());
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(json.as_bytes()).unwrap();
    path
}

#[test]
fn loads_a_full_configuration_file() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = PipelineConfig::load(write_config(dir.path())).unwrap();

    assert_eq!(cfg.service.version, "2.4.0");
    assert_eq!(cfg.service.application, "LoggingApp");
    assert_eq!(cfg.sinks[0].minimum_level, Level::Warning);
    assert!(matches!(
        cfg.sinks[1].target,
        SinkTarget::File { rolling: RollingPolicy::Daily, retained_files: Some(7), .. }
    ));
    let exporter = cfg.exporter.as_ref().unwrap();
    assert_eq!(exporter.endpoint, "http://alloy.observability.svc.cluster.local:4317");
    assert_eq!(exporter.queue_capacity, 2048);
    assert_eq!(cfg.generator.as_ref().map(|g| g.run.count), Some(4));

    let resource = cfg.resource();
    assert_eq!(resource.instance_id(), Some("pod-42"));
    assert_eq!(resource.environment(), "Staging");
}

#[tokio::test]
async fn configured_file_sink_uses_its_template() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = PipelineConfig::load(write_config(dir.path())).unwrap();
    cfg.sinks.remove(0);
    let pipeline = EnrichmentPipeline::standard(Arc::new(cfg.resource()));
    let logger = Logger::new(pipeline, cfg.build_router().unwrap());

    let record = EventRecord::builder(Level::Error, "Disk {Disk} is full")
        .property("Disk", "sda1")
        .at(utc(2025, 6, 1, 10, 0, 0))
        .build();
    logger.emit_record(record).await;
    logger.shutdown().await;

    let text = std::fs::read_to_string(dir.path().join("logs/app-20250601.log")).unwrap();
    assert!(text.starts_with("2025-06-01 [ERR] Disk sda1 is full application=LoggingApp "));
    assert!(text.contains("host.instance.id=pod-42"));
    assert!(text.ends_with('\n'));
}

#[test]
fn invalid_output_template_is_reported_when_building() {
    let json = r#"{"sinks": [{"name": "c", "kind": "console", "output_template": "{Nope}"}]}"#;
    let cfg = PipelineConfig::from_json_str(json).unwrap();
    assert!(matches!(cfg.build_router(), Err(ConfigError::Template(_))));
}

#[test]
fn an_invalid_exporter_section_fails_validation() {
    let json = r#"{"exporter": {"max_batch_size": 0}}"#;
    assert!(matches!(PipelineConfig::from_json_str(json), Err(ConfigError::Invalid { .. })));
}
