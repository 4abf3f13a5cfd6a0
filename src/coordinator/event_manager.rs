//! Single-consumer event queue of the coordinator
//!
//! Producers enqueue [`CoordinatorEvent`]s from any task; one dedicated
//! thread pops them in FIFO order and runs each to completion before the
//! next. That thread is the only writer of coordinator state.
//!
//! The queue is bounded: `put` waits for capacity, `try_put` fails fast with
//! `QueueFull`. A handler that panics fails only its own event.

use crate::common::{CoordinatorMetrics, Error, Result};
use crate::coordinator::event::CoordinatorEvent;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::mpsc;

pub const EVENT_THREAD_NAME: &str = "coordinator-event-thread";

/// Handles events popped from the queue.
pub trait EventProcessor: Send + 'static {
    /// Process one event, resolving its pending result. Returns whether the
    /// event succeeded.
    fn process(&mut self, event: CoordinatorEvent) -> bool;

    /// Called once on the event thread after the last event.
    fn on_shutdown(&mut self) {}
}

pub struct EventManager {
    tx: mpsc::Sender<CoordinatorEvent>,
    shutting_down: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<CoordinatorMetrics>,
}

impl EventManager {
    /// Spawn the event thread.
    pub fn start<P: EventProcessor>(
        processor: P,
        capacity: usize,
        metrics: Arc<CoordinatorMetrics>,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let thread_metrics = metrics.clone();
        let worker = std::thread::Builder::new()
            .name(EVENT_THREAD_NAME.to_string())
            .spawn(move || run(processor, rx, thread_metrics))?;
        tracing::info!("Started {} with capacity {}", EVENT_THREAD_NAME, capacity);

        Ok(Self {
            tx,
            shutting_down: AtomicBool::new(false),
            worker: Mutex::new(Some(worker)),
            metrics,
        })
    }

    /// Enqueue an event, waiting while the queue is full.
    ///
    /// If the event cannot be enqueued its pending result is resolved with
    /// the same error that is returned.
    pub async fn put(&self, event: CoordinatorEvent) -> Result<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            event.fail(Error::ShuttingDown);
            return Err(Error::ShuttingDown);
        }
        self.metrics.queue_size.inc();
        if let Err(mpsc::error::SendError(event)) = self.tx.send(event).await {
            self.metrics.queue_size.dec();
            event.fail(Error::ShuttingDown);
            return Err(Error::ShuttingDown);
        }
        Ok(())
    }

    /// Enqueue an event without waiting.
    pub fn try_put(&self, event: CoordinatorEvent) -> Result<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            event.fail(Error::ShuttingDown);
            return Err(Error::ShuttingDown);
        }
        self.metrics.queue_size.inc();
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.metrics.queue_size.dec();
                tracing::warn!("Event queue is full, rejecting {}", event.name());
                event.fail(Error::QueueFull);
                Err(Error::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                self.metrics.queue_size.dec();
                event.fail(Error::ShuttingDown);
                Err(Error::ShuttingDown)
            }
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Stop accepting events, let the events already queued complete, fail
    /// anything racing in behind them, and wait for the event thread.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Shutting down {}", EVENT_THREAD_NAME);
        // a closed channel means the thread is already gone
        let _ = self.tx.send(CoordinatorEvent::Shutdown).await;

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            match tokio::task::spawn_blocking(move || worker.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => tracing::error!("{} exited with a panic", EVENT_THREAD_NAME),
                Err(e) => tracing::error!("Failed to join {}: {}", EVENT_THREAD_NAME, e),
            }
        }
    }
}

fn run<P: EventProcessor>(
    mut processor: P,
    mut rx: mpsc::Receiver<CoordinatorEvent>,
    metrics: Arc<CoordinatorMetrics>,
) {
    while let Some(event) = rx.blocking_recv() {
        // the shutdown sentinel is never counted on the way in
        if let CoordinatorEvent::Shutdown = event {
            rx.close();
            let mut discarded = 0usize;
            while let Ok(event) = rx.try_recv() {
                metrics.queue_size.dec();
                event.fail(Error::ShuttingDown);
                discarded += 1;
            }
            if discarded > 0 {
                tracing::info!("Discarded {} events queued behind shutdown", discarded);
            }
            break;
        }
        metrics.queue_size.dec();

        let name = event.name();
        tracing::debug!("Processing event {}", name);
        let start = Instant::now();
        match catch_unwind(AssertUnwindSafe(|| processor.process(event))) {
            Ok(success) => metrics.record_event(name, start.elapsed(), success),
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!("Uncaught error processing event {}: {}", name, reason);
                metrics.handler_panics.inc();
                metrics.record_event(name, start.elapsed(), false);
            }
        }
    }
    processor.on_shutdown();
    tracing::info!("{} stopped", EVENT_THREAD_NAME);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::event::{wait_for, CommitLakeTableSnapshotData, PendingResult};
    use crate::coordinator::messages::CommitLakeTableSnapshotResponse;
    use std::collections::BTreeMap;

    /// Records dropped table ids; panics on lake commits with epoch -1.
    struct RecordingProcessor {
        seen: Arc<Mutex<Vec<i64>>>,
    }

    impl EventProcessor for RecordingProcessor {
        fn process(&mut self, event: CoordinatorEvent) -> bool {
            match event {
                CoordinatorEvent::TableDropped { table_id } => {
                    self.seen.lock().push(table_id);
                    true
                }
                CoordinatorEvent::CommitLakeTableSnapshot(data, result) => {
                    if data.coordinator_epoch < 0 {
                        panic!("boom");
                    }
                    result.complete(Ok(CommitLakeTableSnapshotResponse { tables: Vec::new() }));
                    true
                }
                other => {
                    other.fail(Error::Internal("unexpected".into()));
                    false
                }
            }
        }
    }

    /// Holds every event until the test releases it.
    struct GatedProcessor {
        started: std::sync::mpsc::Sender<i64>,
        release: std::sync::mpsc::Receiver<()>,
    }

    impl EventProcessor for GatedProcessor {
        fn process(&mut self, event: CoordinatorEvent) -> bool {
            if let CoordinatorEvent::TableDropped { table_id } = event {
                let _ = self.started.send(table_id);
            }
            let _ = self.release.recv();
            match event {
                CoordinatorEvent::CommitLakeTableSnapshot(_, result) => {
                    result.complete(Ok(CommitLakeTableSnapshotResponse { tables: Vec::new() }))
                }
                other => other.fail(Error::Internal("unexpected".into())),
            }
            true
        }
    }

    fn lake_event(epoch: i32) -> (CoordinatorEvent, crate::coordinator::event::ResultReceiver<CommitLakeTableSnapshotResponse>) {
        let (pending, rx) = PendingResult::new();
        let event = CoordinatorEvent::CommitLakeTableSnapshot(
            CommitLakeTableSnapshotData {
                coordinator_epoch: epoch,
                snapshots: BTreeMap::new(),
            },
            pending,
        );
        (event, rx)
    }

    fn start(capacity: usize) -> (Arc<Mutex<Vec<i64>>>, EventManager) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let manager = EventManager::start(
            RecordingProcessor { seen: seen.clone() },
            capacity,
            Arc::new(CoordinatorMetrics::new()),
        )
        .unwrap();
        (seen, manager)
    }

    #[tokio::test]
    async fn test_events_processed_in_order() {
        let (seen, manager) = start(16);
        for id in 0..10 {
            manager.put(CoordinatorEvent::TableDropped { table_id: id }).await.unwrap();
        }
        let (event, rx) = lake_event(0);
        manager.put(event).await.unwrap();
        wait_for(rx).await.unwrap();
        assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_stop_queue() {
        let (_, manager) = start(16);
        let (bad, bad_rx) = lake_event(-1);
        let (good, good_rx) = lake_event(1);
        manager.put(bad).await.unwrap();
        manager.put(good).await.unwrap();

        assert!(matches!(wait_for(bad_rx).await, Err(Error::Internal(_))));
        assert!(wait_for(good_rx).await.is_ok());
        assert_eq!(manager.metrics.handler_panics.get(), 1);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_try_put_on_full_queue() {
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let metrics = Arc::new(CoordinatorMetrics::new());
        let manager = EventManager::start(
            GatedProcessor {
                started: started_tx,
                release: release_rx,
            },
            1,
            metrics.clone(),
        )
        .unwrap();

        // the event thread holds the first event, the second fills the queue
        manager.try_put(CoordinatorEvent::TableDropped { table_id: 1 }).unwrap();
        assert_eq!(started_rx.recv().unwrap(), 1);
        manager.try_put(CoordinatorEvent::TableDropped { table_id: 2 }).unwrap();
        assert_eq!(metrics.queue_size.get(), 1);

        let (event, rx) = lake_event(0);
        assert!(matches!(manager.try_put(event), Err(Error::QueueFull)));
        assert!(matches!(wait_for(rx).await, Err(Error::QueueFull)));
        assert!(Error::QueueFull.is_retryable());
        assert_eq!(metrics.queue_size.get(), 1);

        release_tx.send(()).unwrap();
        assert_eq!(started_rx.recv().unwrap(), 2);
        release_tx.send(()).unwrap();
        manager.shutdown().await;
        assert_eq!(metrics.queue_size.get(), 0);
        assert!(matches!(
            manager.try_put(CoordinatorEvent::TableDropped { table_id: 3 }),
            Err(Error::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_put_after_shutdown_fails() {
        let (_, manager) = start(4);
        manager.shutdown().await;
        let (event, rx) = lake_event(0);
        assert!(matches!(manager.put(event).await, Err(Error::ShuttingDown)));
        assert!(matches!(wait_for(rx).await, Err(Error::ShuttingDown)));
        assert!(manager.is_shutting_down());
    }
}
