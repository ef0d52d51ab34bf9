#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use logweave::{EventRecord, Level, Properties, Resource, Sink, SinkError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::MakeWriter;

pub fn resource() -> Arc<Resource> {
    Arc::new(
        Resource::new("logging-app", "1.0.0", "Testing")
            .with_instance_id("pod-1")
            .with_application("LoggingApp"),
    )
}

pub fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
}

pub fn record_at(level: Level, message: &str, at: DateTime<Utc>) -> EventRecord {
    EventRecord::builder(level, "{Message}").property("Message", message).at(at).build()
}

pub fn props(pairs: &[(&str, &str)]) -> Properties {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// Cancels a token once it has seen `after` writes.
#[derive(Debug)]
pub struct CancelAfter {
    pub token: CancellationToken,
    pub after: usize,
    pub seen: AtomicUsize,
}

impl CancelAfter {
    pub fn new(token: CancellationToken, after: usize) -> Self {
        Self { token, after, seen: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl Sink for CancelAfter {
    fn name(&self) -> &str {
        "cancel-after"
    }

    async fn write(&self, _record: &EventRecord) -> Result<(), SinkError> {
        if self.seen.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
            self.token.cancel();
        }
        Ok(())
    }
}

/// Rejects every write.
#[derive(Debug, Default)]
pub struct BrokenSink {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl Sink for BrokenSink {
    fn name(&self) -> &str {
        "broken"
    }

    async fn write(&self, _record: &EventRecord) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::Rejected("disk on fire".into()))
    }
}

/// Formatted `tracing` output collected for assertions.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Send this thread's `tracing` events into the buffer until the guard drops.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_target(true)
            .with_ansi(false)
            .without_time()
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

pub struct CapturedWriter(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for CapturedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CapturedWriter(self.0.clone())
    }
}
