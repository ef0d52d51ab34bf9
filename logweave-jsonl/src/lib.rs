//! JSON-lines sink for `logweave`. Writes one compact JSON object per record.
//!
//! Reserved keys start with `@` (`@t` timestamp, `@l` level, `@mt` template, `@m` rendered
//! message, `@x` exception, `@tr`/`@sp` correlation ids); property names that already start
//! with `@` are escaped to `@@`. Bring your own path.

use async_trait::async_trait;
use chrono::SecondsFormat;
use logweave::{EventRecord, Sink, SinkError};
use serde_json::{Map, Value as Json};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Appends records to one file. Cheap to clone; clones share the open handle.
#[derive(Clone, Debug)]
pub struct JsonlSink {
    name: Arc<str>,
    path: Arc<PathBuf>,
    file: Arc<Mutex<Option<File>>>,
}

impl JsonlSink {
    /// The file is created on first write, parent directories included.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { name: Arc::from("jsonl"), path: Arc::new(path.into()), file: Arc::default() }
    }

    pub fn named(mut self, name: impl AsRef<str>) -> Self {
        self.name = Arc::from(name.as_ref());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, line: String) -> Result<(), SinkError> {
        let mut guard = self.file.lock().await;
        if guard.is_none() {
            *guard = Some(open(&self.path).await?);
        }
        let Some(file) = guard.as_mut() else {
            return Err(SinkError::Closed);
        };
        let written = async {
            file.write_all(line.as_bytes()).await?;
            file.flush().await
        }
        .await;
        if let Err(err) = written {
            tracing::warn!(
                target: "logweave::jsonl",
                path = %self.path.display(),
                error = %err,
                "jsonl write failed; reopening on next record"
            );
            *guard = None;
            return Err(err.into());
        }
        Ok(())
    }
}

async fn open(path: &Path) -> Result<File, SinkError> {
    let rotation = |source| SinkError::Rotation { path: path.to_path_buf(), source };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await.map_err(rotation)?;
    }
    OpenOptions::new().create(true).append(true).open(path).await.map_err(rotation)
}

/// One record as a CLEF-style JSON object.
pub fn record_to_json(record: &EventRecord) -> Json {
    let mut obj = Map::new();
    let timestamp = record.timestamp().to_rfc3339_opts(SecondsFormat::Micros, true);
    obj.insert("@t".into(), Json::String(timestamp));
    obj.insert("@l".into(), Json::String(record.level().as_str().into()));
    obj.insert("@mt".into(), Json::String(record.message_template().into()));
    obj.insert("@m".into(), Json::String(record.render_message()));
    if let Some(exception) = record.exception() {
        obj.insert("@x".into(), Json::String(exception.to_string()));
    }
    if let Some(trace_id) = record.trace_id() {
        obj.insert("@tr".into(), Json::String(trace_id.to_string()));
    }
    if let Some(span_id) = record.span_id() {
        obj.insert("@sp".into(), Json::String(span_id.to_string()));
    }
    for (key, value) in record.properties().iter() {
        let key = if key.starts_with('@') { format!("@{key}") } else { key.to_string() };
        obj.insert(key, serde_json::to_value(value).unwrap_or(Json::Null));
    }
    Json::Object(obj)
}

fn line_for(record: &EventRecord) -> String {
    let mut line = record_to_json(record).to_string();
    line.push('\n');
    line
}

#[async_trait]
impl Sink for JsonlSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, record: &EventRecord) -> Result<(), SinkError> {
        self.append(line_for(record)).await
    }

    async fn flush(&self) -> Result<(), SinkError> {
        if let Some(file) = self.file.lock().await.as_mut() {
            file.flush().await?;
        }
        Ok(())
    }
}

impl tower_service::Service<EventRecord> for JsonlSink {
    type Response = ();
    type Error = SinkError;
    type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, record: EventRecord) -> Self::Future {
        let sink = self.clone();
        let line = line_for(&record);
        Box::pin(async move { sink.append(line).await })
    }
}
