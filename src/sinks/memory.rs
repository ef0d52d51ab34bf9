use super::Sink;
use crate::error::SinkError;
use crate::event::EventRecord;
use crate::render::OutputTemplate;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// In-memory sink for tests and diagnostics.
///
/// Bounded: once `capacity` records are held, the oldest is evicted for each new one.
///
/// ```rust
/// use logweave::{EventRecord, Level, MemorySink, Properties, Sink};
///
/// # #[tokio::main]
/// # async fn main() {
/// let sink = MemorySink::with_capacity(2);
/// for i in 0..3 {
///     sink.write(&EventRecord::new(Level::Info, format!("event {i}"), Properties::new()))
///         .await
///         .unwrap();
/// }
/// assert_eq!(sink.len(), 2);
/// assert_eq!(sink.evicted(), 1);
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct MemorySink {
    name: String,
    records: Arc<Mutex<VecDeque<EventRecord>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Bounded sink (default cap: 10,000).
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            name: "memory".to_string(),
            records: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Snapshot of the held records, oldest first.
    pub fn records(&self) -> Vec<EventRecord> {
        self.lock().iter().cloned().collect()
    }

    /// Held records rendered with `template`.
    pub fn lines(&self, template: &OutputTemplate) -> Vec<String> {
        self.lock().iter().map(|r| template.render(r)).collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records dropped to stay within capacity.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<EventRecord>> {
        self.records.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, record: &EventRecord) -> Result<(), SinkError> {
        let mut guard = self.lock();
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(record.clone());
        Ok(())
    }
}
