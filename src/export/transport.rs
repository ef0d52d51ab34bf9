use super::ExportBatch;
use crate::error::ExportError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Wire seam between the exporter worker and a collector.
///
/// Implementations own connection management. One call exports one batch; the worker handles
/// retries, deadlines, and counting.
#[async_trait]
pub trait ExportTransport: Send + Sync + std::fmt::Debug {
    async fn export(&self, batch: &ExportBatch) -> Result<(), ExportError>;
}

/// Keeps every batch it receives.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    batches: Arc<Mutex<Vec<ExportBatch>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<ExportBatch> {
        self.batches.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Total items across all received batches.
    pub fn item_count(&self) -> usize {
        self.batches.lock().unwrap_or_else(|p| p.into_inner()).iter().map(|b| b.items.len()).sum()
    }
}

#[async_trait]
impl ExportTransport for MemoryTransport {
    async fn export(&self, batch: &ExportBatch) -> Result<(), ExportError> {
        self.batches.lock().unwrap_or_else(|p| p.into_inner()).push(batch.clone());
        Ok(())
    }
}

/// Fails every call with the same error; counts calls.
#[derive(Debug, Clone)]
pub struct FailingTransport {
    error: ExportError,
    calls: Arc<AtomicUsize>,
}

impl FailingTransport {
    pub fn new(error: ExportError) -> Self {
        Self { error, calls: Arc::new(AtomicUsize::new(0)) }
    }

    /// Collector unreachable.
    pub fn unreachable() -> Self {
        Self::new(ExportError::Transport("connection refused".into()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ExportTransport for FailingTransport {
    async fn export(&self, _batch: &ExportBatch) -> Result<(), ExportError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Err(self.error.clone())
    }
}
