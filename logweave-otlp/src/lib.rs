//! OTLP/gRPC transport for the `logweave` exporter bridge.
//!
//! Spans go to the collector's `TraceService`, metric points to its `MetricsService`, both over
//! one lazily connected tonic channel. The bridge owns retries and deadlines; this crate only
//! converts and sends.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use logweave::{ExporterBridge, ExporterConfig, Resource};
//! use logweave_otlp::OtlpTransport;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ExporterConfig::default();
//! let transport = OtlpTransport::from_config(&config)?;
//! let resource = Arc::new(Resource::detect("logging-app", "1.0.0", "Production"));
//! let bridge = ExporterBridge::start(config, Arc::new(transport), resource)?;
//! # bridge.shutdown().await;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use logweave::export::{ExportBatch, MetricKind, MetricPoint};
use logweave::trace::{SpanRecord, SpanStatus};
use logweave::{ExportError, ExportTransport, ExporterConfig, Properties, Resource, Value};
use opentelemetry_proto::tonic::collector::metrics::v1::{
    metrics_service_client::MetricsServiceClient, ExportMetricsServiceRequest,
};
use opentelemetry_proto::tonic::collector::trace::v1::{
    trace_service_client::TraceServiceClient, ExportTraceServiceRequest,
};
use opentelemetry_proto::tonic::common::v1::{
    any_value::Value as AnyValueValue, AnyValue, ArrayValue, InstrumentationScope, KeyValue,
    KeyValueList,
};
use opentelemetry_proto::tonic::metrics::v1::{
    metric::Data as MetricData, number_data_point::Value as NumberValue, AggregationTemporality,
    Gauge, Metric, NumberDataPoint, ResourceMetrics, ScopeMetrics, Sum,
};
use opentelemetry_proto::tonic::resource::v1::Resource as ResourceProto;
use opentelemetry_proto::tonic::trace::v1::{
    span::SpanKind, status::StatusCode, ResourceSpans, ScopeSpans, Span, Status,
};
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};

const SCOPE_NAME: &str = "logweave";

/// The endpoint could not be turned into a channel.
#[derive(thiserror::Error, Debug)]
#[error("invalid OTLP endpoint {endpoint:?}: {source}")]
pub struct EndpointError {
    pub endpoint: String,
    #[source]
    pub source: tonic::transport::Error,
}

/// Sends batches to an OTLP/gRPC collector.
#[derive(Debug, Clone)]
pub struct OtlpTransport {
    endpoint: String,
    channel: Channel,
}

impl OtlpTransport {
    /// Channel that connects on first use. Must be called inside a tokio runtime.
    pub fn connect_lazy(
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, EndpointError> {
        let endpoint = endpoint.into();
        let channel = Endpoint::from_shared(endpoint.clone())
            .map_err(|source| EndpointError { endpoint: endpoint.clone(), source })?
            .timeout(timeout)
            .connect_timeout(timeout)
            .connect_lazy();
        Ok(Self { endpoint, channel })
    }

    /// Endpoint and per-request deadline from the exporter configuration.
    pub fn from_config(config: &ExporterConfig) -> Result<Self, EndpointError> {
        Self::connect_lazy(config.endpoint.clone(), config.export_timeout())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ExportTransport for OtlpTransport {
    async fn export(&self, batch: &ExportBatch) -> Result<(), ExportError> {
        if let Some(request) = trace_request(batch) {
            let response = TraceServiceClient::new(self.channel.clone())
                .export(request)
                .await
                .map_err(status_to_error)?;
            if let Some(partial) = response.into_inner().partial_success {
                if partial.rejected_spans > 0 {
                    tracing::warn!(
                        target: "logweave::otlp",
                        rejected = partial.rejected_spans,
                        message = %partial.error_message,
                        "collector rejected part of a span batch"
                    );
                }
            }
        }
        if let Some(request) = metrics_request(batch) {
            let response = MetricsServiceClient::new(self.channel.clone())
                .export(request)
                .await
                .map_err(status_to_error)?;
            if let Some(partial) = response.into_inner().partial_success {
                if partial.rejected_data_points > 0 {
                    tracing::warn!(
                        target: "logweave::otlp",
                        rejected = partial.rejected_data_points,
                        message = %partial.error_message,
                        "collector rejected part of a metric batch"
                    );
                }
            }
        }
        Ok(())
    }
}

/// Collector-side refusals are final; everything else is worth retrying.
pub fn status_to_error(status: tonic::Status) -> ExportError {
    use tonic::Code;
    match status.code() {
        Code::InvalidArgument
        | Code::PermissionDenied
        | Code::Unauthenticated
        | Code::Unimplemented
        | Code::FailedPrecondition => ExportError::Rejected(status.to_string()),
        _ => ExportError::Transport(status.to_string()),
    }
}

/// Trace export request for the batch's spans; `None` when it has none.
pub fn trace_request(batch: &ExportBatch) -> Option<ExportTraceServiceRequest> {
    let spans: Vec<Span> = batch.spans().map(span_to_proto).collect();
    if spans.is_empty() {
        return None;
    }
    Some(ExportTraceServiceRequest {
        resource_spans: vec![ResourceSpans {
            resource: Some(resource_to_proto(&batch.resource)),
            scope_spans: vec![ScopeSpans {
                scope: Some(scope()),
                spans,
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }],
    })
}

/// Metrics export request for the batch's points; `None` when it has none.
pub fn metrics_request(batch: &ExportBatch) -> Option<ExportMetricsServiceRequest> {
    let metrics: Vec<Metric> = batch.metrics().map(metric_to_proto).collect();
    if metrics.is_empty() {
        return None;
    }
    Some(ExportMetricsServiceRequest {
        resource_metrics: vec![ResourceMetrics {
            resource: Some(resource_to_proto(&batch.resource)),
            scope_metrics: vec![ScopeMetrics {
                scope: Some(scope()),
                metrics,
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }],
    })
}

fn scope() -> InstrumentationScope {
    InstrumentationScope {
        name: SCOPE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ..Default::default()
    }
}

fn resource_to_proto(resource: &Resource) -> ResourceProto {
    let attributes = resource
        .attributes()
        .into_iter()
        .map(|(key, value)| KeyValue { key: key.to_string(), value: Some(string_value(value)) })
        .collect();
    ResourceProto { attributes, ..Default::default() }
}

fn span_to_proto(span: &SpanRecord) -> Span {
    let status = match &span.status {
        SpanStatus::Unset => Status { code: StatusCode::Unset as i32, message: String::new() },
        SpanStatus::Ok => Status { code: StatusCode::Ok as i32, message: String::new() },
        SpanStatus::Error(message) => {
            Status { code: StatusCode::Error as i32, message: message.clone() }
        }
    };
    Span {
        trace_id: span.trace_id.to_bytes().to_vec(),
        span_id: span.span_id.to_bytes().to_vec(),
        parent_span_id: span.parent_span_id.map(|id| id.to_bytes().to_vec()).unwrap_or_default(),
        name: span.name.clone(),
        kind: SpanKind::Internal as i32,
        start_time_unix_nano: unix_nanos(span.start),
        end_time_unix_nano: unix_nanos(span.end),
        attributes: key_values(&span.attributes),
        status: Some(status),
        ..Default::default()
    }
}

fn metric_to_proto(point: &MetricPoint) -> Metric {
    let data_point = NumberDataPoint {
        attributes: key_values(&point.attributes),
        time_unix_nano: unix_nanos(point.timestamp),
        value: Some(NumberValue::AsDouble(point.value)),
        ..Default::default()
    };
    let data = match point.kind {
        MetricKind::Counter => MetricData::Sum(Sum {
            data_points: vec![data_point],
            aggregation_temporality: AggregationTemporality::Cumulative as i32,
            is_monotonic: true,
        }),
        MetricKind::Gauge => MetricData::Gauge(Gauge { data_points: vec![data_point] }),
    };
    Metric { name: point.name.clone(), data: Some(data), ..Default::default() }
}

fn unix_nanos(ts: DateTime<Utc>) -> u64 {
    ts.timestamp_nanos_opt().and_then(|n| u64::try_from(n).ok()).unwrap_or(0)
}

fn key_values(props: &Properties) -> Vec<KeyValue> {
    props
        .iter()
        .map(|(key, value)| KeyValue { key: key.to_string(), value: Some(any_value(value)) })
        .collect()
}

fn string_value(s: &str) -> AnyValue {
    AnyValue { value: Some(AnyValueValue::StringValue(s.to_string())) }
}

fn any_value(value: &Value) -> AnyValue {
    let value = match value {
        Value::Null => None,
        Value::Bool(b) => Some(AnyValueValue::BoolValue(*b)),
        Value::Int(i) => Some(AnyValueValue::IntValue(*i)),
        Value::Float(x) => Some(AnyValueValue::DoubleValue(*x)),
        Value::Str(s) => Some(AnyValueValue::StringValue(s.clone())),
        Value::Seq(items) => Some(AnyValueValue::ArrayValue(ArrayValue {
            values: items.iter().map(any_value).collect(),
        })),
        Value::Map(props) => {
            Some(AnyValueValue::KvlistValue(KeyValueList { values: key_values(props) }))
        }
    };
    AnyValue { value }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refusals_are_not_retryable() {
        let err = status_to_error(tonic::Status::invalid_argument("bad span"));
        assert!(matches!(err, ExportError::Rejected(_)));
        let err = status_to_error(tonic::Status::unavailable("connection refused"));
        assert!(matches!(err, ExportError::Transport(_)));
        let err = status_to_error(tonic::Status::resource_exhausted("slow down"));
        assert!(matches!(err, ExportError::Transport(_)));
    }

    #[test]
    fn nested_values_convert() {
        let value = Value::Map(Properties::new().with("ids", Value::Seq(vec![1.into(), 2.into()])));
        let Some(AnyValueValue::KvlistValue(list)) = any_value(&value).value else {
            panic!("expected a key/value list");
        };
        assert_eq!(list.values[0].key, "ids");
        let Some(AnyValue { value: Some(AnyValueValue::ArrayValue(array)) }) = &list.values[0].value
        else {
            panic!("expected an array");
        };
        assert_eq!(array.values.len(), 2);
        assert_eq!(any_value(&Value::Null).value, None);
    }

    #[test]
    fn pre_epoch_timestamps_clamp_to_zero() {
        let ts = DateTime::<Utc>::from_timestamp(-5, 0).unwrap();
        assert_eq!(unix_nanos(ts), 0);
    }
}
