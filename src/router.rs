//! Fan-out of records to sinks with per-route level filtering and fault isolation.
//!
//! The route table is fixed when the router is built. A record goes to every route whose
//! minimum level is at or below the record's level; all selected sinks are written
//! concurrently. A sink that errors or panics is counted and reported on the
//! `logweave::selflog` tracing target; the other sinks and the caller are unaffected.

use crate::event::{EventRecord, Level};
use crate::sinks::Sink;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Route {
    sink: Arc<dyn Sink>,
    minimum_level: Level,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    /// Sinks that accepted the record.
    pub delivered: usize,
    /// Routes skipped because of their minimum level.
    pub filtered: usize,
    /// Sinks that errored or panicked.
    pub failed: usize,
}

/// Per-sink delivery counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkFaults {
    pub name: String,
    pub delivered: u64,
    pub failed: u64,
}

/// Static route table. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SinkRouter {
    routes: Arc<[Route]>,
}

#[derive(Debug, Default)]
pub struct SinkRouterBuilder {
    routes: Vec<Route>,
}

impl SinkRouterBuilder {
    /// Forward records at or above `minimum_level` to `sink`.
    pub fn route(self, sink: impl Sink + 'static, minimum_level: Level) -> Self {
        self.route_shared(Arc::new(sink), minimum_level)
    }

    pub fn route_shared(mut self, sink: Arc<dyn Sink>, minimum_level: Level) -> Self {
        self.routes.push(Route {
            sink,
            minimum_level,
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });
        self
    }

    pub fn build(self) -> SinkRouter {
        SinkRouter { routes: self.routes.into() }
    }
}

impl SinkRouter {
    pub fn builder() -> SinkRouterBuilder {
        SinkRouterBuilder::default()
    }

    /// Deliver a record; failures never reach the caller.
    pub async fn emit(&self, record: EventRecord) {
        let _ = self.dispatch(Arc::new(record)).await;
    }

    /// Deliver a record and report what happened to it.
    pub async fn dispatch(&self, record: Arc<EventRecord>) -> EmitReport {
        let level = record.level();
        let selected: Vec<&Route> =
            self.routes.iter().filter(|r| r.minimum_level <= level).collect();
        let mut report =
            EmitReport { filtered: self.routes.len() - selected.len(), ..EmitReport::default() };

        let writes = selected.iter().map(|route| {
            let record = &record;
            async move {
                let outcome = AssertUnwindSafe(route.sink.write(record)).catch_unwind().await;
                (route, outcome)
            }
        });
        for (route, outcome) in join_all(writes).await {
            match outcome {
                Ok(Ok(())) => {
                    route.delivered.fetch_add(1, Ordering::Relaxed);
                    report.delivered += 1;
                }
                Ok(Err(err)) => {
                    route.failed.fetch_add(1, Ordering::Relaxed);
                    report.failed += 1;
                    tracing::warn!(
                        target: "logweave::selflog",
                        sink = route.sink.name(),
                        level = %level,
                        error = %err,
                        "sink write failed"
                    );
                }
                Err(_) => {
                    route.failed.fetch_add(1, Ordering::Relaxed);
                    report.failed += 1;
                    tracing::warn!(
                        target: "logweave::selflog",
                        sink = route.sink.name(),
                        level = %level,
                        "sink panicked during write"
                    );
                }
            }
        }
        report
    }

    /// Flush every sink; failures are logged and skipped.
    pub async fn flush_all(&self) {
        let flushes = self.routes.iter().map(|route| async move {
            if let Err(err) = route.sink.flush().await {
                tracing::warn!(
                    target: "logweave::selflog",
                    sink = route.sink.name(),
                    error = %err,
                    "sink flush failed"
                );
            }
        });
        join_all(flushes).await;
    }

    pub fn faults(&self) -> Vec<SinkFaults> {
        self.routes
            .iter()
            .map(|r| SinkFaults {
                name: r.sink.name().to_string(),
                delivered: r.delivered.load(Ordering::Relaxed),
                failed: r.failed.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Lowest level any route accepts; `None` for an empty router.
    pub fn minimum_level(&self) -> Option<Level> {
        self.routes.iter().map(|r| r.minimum_level).min()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl tower_service::Service<EventRecord> for SinkRouter {
    type Response = EmitReport;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<EmitReport, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, record: EventRecord) -> Self::Future {
        let router = self.clone();
        Box::pin(async move { Ok(router.dispatch(Arc::new(record)).await) })
    }
}

/// Moves sink writes off the caller's task onto one worker behind a bounded queue.
///
/// `try_emit` never awaits a sink. When the queue is full the record is dropped and counted.
#[derive(Debug)]
pub struct NonBlockingRouter {
    tx: mpsc::Sender<EventRecord>,
    router: SinkRouter,
    dropped: Arc<AtomicU64>,
    shutdown: CancellationToken,
    worker: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl NonBlockingRouter {
    /// Spawn the worker. Must be called inside a tokio runtime.
    pub fn with_capacity<S>(service: S, router: SinkRouter, capacity: usize) -> Self
    where
        S: tower::Service<EventRecord> + Send + 'static,
        S::Future: Send + 'static,
        S::Error: Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel(capacity.max(1));
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        let worker = tokio::spawn(async move {
            use tower::ServiceExt;
            let mut service = service;
            loop {
                let record = tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    record = rx.recv() => match record {
                        Some(record) => record,
                        None => break,
                    },
                };
                if let Ok(ready) = service.ready().await {
                    let _ = ready.call(record).await;
                }
            }
            // Drain what was accepted before shutdown.
            rx.close();
            while let Some(record) = rx.recv().await {
                if let Ok(ready) = service.ready().await {
                    let _ = ready.call(record).await;
                }
            }
        });
        Self {
            tx,
            router,
            dropped: Arc::new(AtomicU64::new(0)),
            shutdown,
            worker: tokio::sync::Mutex::new(Some(worker)),
        }
    }

    /// Queue in front of `router` itself.
    pub fn new(router: SinkRouter, capacity: usize) -> Self {
        Self::with_capacity(router.clone(), router, capacity)
    }

    /// Enqueue without waiting; returns whether the record was accepted.
    pub fn try_emit(&self, record: EventRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(_) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    tracing::warn!(
                        target: "logweave::selflog",
                        dropped,
                        "log queue full; dropping records"
                    );
                }
                false
            }
        }
    }

    /// Records dropped because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn router(&self) -> &SinkRouter {
        &self.router
    }

    /// Stop accepting, deliver everything already queued, then flush the sinks.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::warn!(
                    target: "logweave::selflog",
                    error = %err,
                    "log worker ended abnormally"
                );
            }
        }
        self.router.flush_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::event::Properties;
    use crate::sinks::MemorySink;
    use async_trait::async_trait;
    use std::time::Duration;

    #[derive(Debug)]
    struct Broken;

    #[async_trait]
    impl Sink for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn write(&self, _record: &EventRecord) -> Result<(), SinkError> {
            Err(SinkError::Rejected("disk full".into()))
        }
    }

    #[derive(Debug)]
    struct Panics;

    #[async_trait]
    impl Sink for Panics {
        fn name(&self) -> &str {
            "panics"
        }

        async fn write(&self, _record: &EventRecord) -> Result<(), SinkError> {
            panic!("sink bug")
        }
    }

    fn rec(level: Level) -> EventRecord {
        EventRecord::new(level, "x", Properties::new())
    }

    #[tokio::test]
    async fn fans_out_by_minimum_level() {
        let info = MemorySink::new();
        let errors = MemorySink::new();
        let router = SinkRouter::builder()
            .route(info.clone(), Level::Info)
            .route(errors.clone(), Level::Error)
            .build();

        let report = router.dispatch(Arc::new(rec(Level::Debug))).await;
        assert_eq!(report, EmitReport { delivered: 0, filtered: 2, failed: 0 });
        let report = router.dispatch(Arc::new(rec(Level::Warning))).await;
        assert_eq!(report, EmitReport { delivered: 1, filtered: 1, failed: 0 });
        let report = router.dispatch(Arc::new(rec(Level::Critical))).await;
        assert_eq!(report, EmitReport { delivered: 2, filtered: 0, failed: 0 });

        assert_eq!(info.len(), 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(router.minimum_level(), Some(Level::Info));
    }

    #[tokio::test]
    async fn failing_and_panicking_sinks_are_isolated() {
        let good = MemorySink::new();
        let router = SinkRouter::builder()
            .route(Broken, Level::Debug)
            .route(Panics, Level::Debug)
            .route(good.clone(), Level::Debug)
            .build();
        let report = router.dispatch(Arc::new(rec(Level::Error))).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(good.len(), 1);

        let faults = router.faults();
        assert_eq!(faults[0], SinkFaults { name: "broken".into(), delivered: 0, failed: 1 });
        assert_eq!(faults[1].failed, 1);
        assert_eq!(faults[2].delivered, 1);
    }

    #[tokio::test]
    async fn router_is_a_tower_service() {
        use tower::ServiceExt;
        let sink = MemorySink::new();
        let router = SinkRouter::builder().route(sink.clone(), Level::Debug).build();
        let report = router.oneshot(rec(Level::Info)).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn non_blocking_router_drains_on_shutdown() {
        let sink = MemorySink::new();
        let router = SinkRouter::builder().route(sink.clone(), Level::Debug).build();
        let queued = NonBlockingRouter::new(router, 64);
        for _ in 0..10 {
            assert!(queued.try_emit(rec(Level::Info)));
        }
        queued.shutdown().await;
        assert_eq!(sink.len(), 10);
        assert_eq!(queued.dropped(), 0);
        assert!(!queued.try_emit(rec(Level::Info)));
        assert_eq!(queued.dropped(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_is_not_starved_by_a_busy_producer() {
        let sink = MemorySink::with_capacity(50_000);
        let router = SinkRouter::builder().route(sink.clone(), Level::Debug).build();
        let queued = Arc::new(NonBlockingRouter::new(router, 64));
        let producer = {
            let queued = queued.clone();
            tokio::spawn(async move {
                let mut accepted = 0u64;
                for i in 0..50_000u32 {
                    if queued.try_emit(rec(Level::Info)) {
                        accepted += 1;
                    }
                    if i % 64 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
                accepted
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        tokio::time::timeout(Duration::from_secs(5), queued.shutdown())
            .await
            .expect("shutdown finished while the producer was still emitting");
        let accepted = producer.await.unwrap();
        assert_eq!(sink.len() as u64, accepted);
        assert_eq!(accepted + queued.dropped(), 50_000);
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        #[derive(Debug)]
        struct Stalled;

        #[async_trait]
        impl Sink for Stalled {
            fn name(&self) -> &str {
                "stalled"
            }

            async fn write(&self, _record: &EventRecord) -> Result<(), SinkError> {
                futures::future::pending::<()>().await;
                Ok(())
            }
        }

        let router = SinkRouter::builder().route(Stalled, Level::Debug).build();
        let queued = NonBlockingRouter::new(router, 1);
        let accepted = (0..20).filter(|_| queued.try_emit(rec(Level::Info))).count();
        assert!(accepted <= 2);
        assert_eq!(queued.dropped(), 20 - accepted as u64);
    }
}
