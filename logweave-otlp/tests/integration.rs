use logweave::export::{ExportBatch, MetricPoint, Telemetry};
use logweave::trace::{ActiveSpan, SpanStatus};
use logweave::{ExportError, ExportTransport, Resource};
use logweave_otlp::{metrics_request, trace_request, OtlpTransport};
use opentelemetry_proto::tonic::common::v1::any_value::Value as AnyValueValue;
use opentelemetry_proto::tonic::metrics::v1::metric::Data;
use std::sync::Arc;
use std::time::Duration;

fn batch(items: Vec<Telemetry>) -> ExportBatch {
    let resource = Resource::new("logging-app", "1.0.0", "Production").with_instance_id("pod-3");
    ExportBatch { resource: Arc::new(resource), items }
}

fn string_attr<'a>(
    attrs: &'a [opentelemetry_proto::tonic::common::v1::KeyValue],
    key: &str,
) -> Option<&'a str> {
    attrs.iter().find(|kv| kv.key == key).and_then(|kv| match &kv.value {
        Some(v) => match &v.value {
            Some(AnyValueValue::StringValue(s)) => Some(s.as_str()),
            _ => None,
        },
        None => None,
    })
}

#[test]
fn spans_carry_resource_and_identifiers() {
    let mut span = ActiveSpan::root("generate_logs");
    span.set_attribute("generator.emitted", 10);
    let ctx = span.context();
    let record = span.finish(SpanStatus::Error("cancelled".into()));

    let request = trace_request(&batch(vec![record.into()])).unwrap();
    let resource_spans = &request.resource_spans[0];
    let resource = resource_spans.resource.as_ref().unwrap();
    assert_eq!(string_attr(&resource.attributes, "service.name"), Some("logging-app"));
    assert_eq!(string_attr(&resource.attributes, "service.instance.id"), Some("pod-3"));
    assert_eq!(string_attr(&resource.attributes, "deployment.environment"), Some("Production"));

    let span = &resource_spans.scope_spans[0].spans[0];
    assert_eq!(span.name, "generate_logs");
    assert_eq!(span.trace_id, ctx.trace_id.to_bytes().to_vec());
    assert_eq!(span.span_id, ctx.span_id.to_bytes().to_vec());
    assert!(span.parent_span_id.is_empty());
    assert!(span.end_time_unix_nano >= span.start_time_unix_nano);
    let status = span.status.as_ref().unwrap();
    assert_eq!(status.code, 2);
    assert_eq!(status.message, "cancelled");
    assert!(metrics_request(&batch(vec![])).is_none());
}

#[test]
fn counters_become_monotonic_sums() {
    let items = vec![
        MetricPoint::counter("generator.events", 10.0).with_attribute("level", "info").into(),
        MetricPoint::gauge("queue.depth", 3.0).into(),
    ];
    let request = metrics_request(&batch(items)).unwrap();
    let metrics = &request.resource_metrics[0].scope_metrics[0].metrics;
    assert_eq!(metrics.len(), 2);
    match metrics[0].data.as_ref().unwrap() {
        Data::Sum(sum) => {
            assert!(sum.is_monotonic);
            assert_eq!(string_attr(&sum.data_points[0].attributes, "level"), Some("info"));
        }
        other => panic!("expected a sum, got {other:?}"),
    }
    assert!(matches!(metrics[1].data, Some(Data::Gauge(_))));
    assert!(trace_request(&batch(vec![MetricPoint::gauge("g", 1.0).into()])).is_none());
}

#[tokio::test]
async fn unreachable_collector_is_a_transport_error() {
    let transport =
        OtlpTransport::connect_lazy("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();
    let span = ActiveSpan::root("health-check").finish(SpanStatus::Ok);
    let err = transport.export(&batch(vec![span.into()])).await.unwrap_err();
    assert!(matches!(err, ExportError::Transport(_)), "got {err:?}");
}

#[tokio::test]
async fn malformed_endpoint_is_refused() {
    assert!(OtlpTransport::connect_lazy("not a uri", Duration::from_secs(1)).is_err());
}
