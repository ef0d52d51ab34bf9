use logweave::export::MemoryTransport;
use logweave::{
    ConsoleSink, EnrichmentPipeline, ExporterBridge, ExporterConfig, Level, Logger, MemorySink,
    MetricPoint, OutputTemplate, Properties, Resource, SinkRouter,
};
use logweave_prometheus::PipelineCollector;
use prometheus::Registry;
use std::io::Write;
use std::sync::Arc;

struct RefusingWriter;

impl Write for RefusingWriter {
    fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
        Err(std::io::Error::other("closed pipe"))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn counter_value(registry: &Registry, family: &str, labels: &[(&str, &str)]) -> f64 {
    let metric_families = registry.gather();
    let Some(metric) = metric_families.iter().find(|mf| mf.get_name() == family) else {
        return 0.0;
    };
    metric
        .get_metric()
        .iter()
        .find(|m| {
            labels.iter().all(|(name, value)| {
                m.get_label().iter().any(|l| l.get_name() == *name && l.get_value() == *value)
            })
        })
        .and_then(|m| m.get_counter().as_ref().map(|c| c.value()))
        .unwrap_or(0.0)
}

fn logger() -> Logger {
    let broken = ConsoleSink::with_writer(OutputTemplate::console(), Box::new(RefusingWriter))
        .named("stdout");
    let router = SinkRouter::builder()
        .route(broken, Level::Debug)
        .route(MemorySink::new().named("memory"), Level::Warning)
        .build();
    Logger::new(EnrichmentPipeline::empty(), router)
}

#[tokio::test]
async fn sink_outcomes_are_scraped_per_sink() {
    let registry = Registry::new();
    let logger = logger();
    PipelineCollector::register(&registry, logger.clone(), None)
        .expect("Failed to register PipelineCollector");

    logger.info("one", Properties::new()).await;
    logger.error("two", Properties::new(), None).await;

    let records = "logweave_sink_records_total";
    assert_eq!(
        counter_value(&registry, records, &[("sink", "stdout"), ("outcome", "failed")]),
        2.0
    );
    assert_eq!(
        counter_value(&registry, records, &[("sink", "memory"), ("outcome", "delivered")]),
        1.0
    );

    logger.critical("three", Properties::new(), None).await;
    assert_eq!(
        counter_value(&registry, records, &[("sink", "memory"), ("outcome", "delivered")]),
        2.0
    );
    assert!(registry.gather().iter().all(|mf| mf.get_name() != "logweave_export_items_total"));
}

#[tokio::test]
async fn exporter_counters_follow_stats() {
    let registry = Registry::new();
    let resource = Arc::new(Resource::new("logging-app", "1.0.0", "Testing"));
    let transport = Arc::new(MemoryTransport::new());
    let exporter =
        Arc::new(ExporterBridge::start(ExporterConfig::default(), transport, resource).unwrap());
    PipelineCollector::register(&registry, logger(), Some(exporter.clone()))
        .expect("Failed to register PipelineCollector");

    exporter.submit(MetricPoint::counter("generator.events", 5.0));
    exporter.submit(MetricPoint::gauge("queue.depth", 1.0));
    exporter.shutdown().await;

    let items = "logweave_export_items_total";
    assert_eq!(counter_value(&registry, items, &[("outcome", "submitted")]), 2.0);
    assert_eq!(counter_value(&registry, items, &[("outcome", "exported")]), 2.0);
    let batches = "logweave_export_batches_total";
    assert_eq!(counter_value(&registry, batches, &[("outcome", "exported")]), 1.0);
}

#[test]
fn registering_twice_is_a_conflict() {
    let registry = Registry::new();
    PipelineCollector::register(&registry, logger(), None).unwrap();
    assert!(PipelineCollector::register(&registry, logger(), None).is_err());
}
