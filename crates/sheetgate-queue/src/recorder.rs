//! Usage recorder: bounded buffer drained by a worker pool

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sheetgate_core::store::with_deadline;
use sheetgate_core::{Metrics, UsageStore};

use crate::event::UsageEvent;

#[derive(Debug, Clone, Copy)]
pub struct RecorderConfig {
    /// Number of background workers
    pub workers: usize,
    /// Events buffered before new ones are dropped
    pub capacity: usize,
    /// Deadline for each usage-store write
    pub persist_timeout: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            capacity: 10_000,
            persist_timeout: Duration::from_secs(5),
        }
    }
}

/// Why an event was not queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecorderError {
    #[error("Usage recorder is shutting down")]
    Closed,
    #[error("Usage buffer is full")]
    Saturated,
}

/// Result of [`UsageRecorder::submit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    Dropped(RecorderError),
}

impl SubmitOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, SubmitOutcome::Queued)
    }
}

type SharedReceiver = Arc<Mutex<mpsc::Receiver<UsageEvent>>>;

/// Records usage events asynchronously.
///
/// `submit` never waits: a full buffer drops the event. Workers write each
/// event once with a deadline and discard it on failure.
pub struct UsageRecorder {
    sender: mpsc::Sender<UsageEvent>,
    receiver: SharedReceiver,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    metrics: Arc<Metrics>,
    config: RecorderConfig,
}

impl UsageRecorder {
    /// Spawn the worker pool. Must be called within a Tokio runtime.
    pub fn start(store: Arc<dyn UsageStore>, metrics: Arc<Metrics>, config: RecorderConfig) -> Self {
        let capacity = config.capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let receiver: SharedReceiver = Arc::new(Mutex::new(receiver));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let workers = (0..config.workers.max(1))
            .map(|id| {
                let worker = Worker {
                    id,
                    receiver: receiver.clone(),
                    store: store.clone(),
                    metrics: metrics.clone(),
                    persist_timeout: config.persist_timeout,
                };
                tokio::spawn(worker.run(shutdown_rx.clone()))
            })
            .collect();

        info!(
            workers = config.workers.max(1),
            capacity,
            store = %store.name(),
            "Usage recorder started"
        );

        Self {
            sender,
            receiver,
            closed: AtomicBool::new(false),
            shutdown_tx,
            workers: Mutex::new(workers),
            metrics,
            config,
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Events currently waiting in the buffer
    pub fn pending(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Enqueue an event without waiting
    pub fn submit(&self, event: UsageEvent) -> SubmitOutcome {
        if self.is_closed() {
            self.metrics.record_event_dropped_closed();
            debug!(tenant_key = %event.tenant_key, "Usage recorder closed, dropping event");
            return SubmitOutcome::Dropped(RecorderError::Closed);
        }

        match self.sender.try_send(event) {
            Ok(()) => {
                self.metrics.record_event_submitted();
                SubmitOutcome::Queued
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.metrics.record_event_dropped_full();
                warn!(
                    tenant_key = %event.tenant_key,
                    category = %event.category,
                    capacity = self.sender.max_capacity(),
                    "Usage buffer full, dropping event"
                );
                SubmitOutcome::Dropped(RecorderError::Saturated)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.record_event_dropped_closed();
                SubmitOutcome::Dropped(RecorderError::Closed)
            }
        }
    }

    /// Stop accepting events and let workers drain the buffer.
    ///
    /// Workers still running after `grace` are aborted and their events
    /// abandoned. Returns `true` when everything drained in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return true;
        }
        let _ = self.shutdown_tx.send(true);

        let handles = std::mem::take(&mut *self.workers.lock().await);
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        match tokio::time::timeout(grace, futures::future::join_all(handles)).await {
            Ok(_) => {
                info!("Usage recorder drained");
                true
            }
            Err(_) => {
                for handle in aborts {
                    handle.abort();
                }
                // Aborted workers may not have closed the channel
                self.receiver.lock().await.close();
                warn!(
                    abandoned = self.pending(),
                    grace_ms = grace.as_millis() as u64,
                    "Usage recorder did not drain in time, workers aborted"
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for UsageRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageRecorder")
            .field("config", &self.config)
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct Worker {
    id: usize,
    receiver: SharedReceiver,
    store: Arc<dyn UsageStore>,
    metrics: Arc<Metrics>,
    persist_timeout: Duration,
}

impl Worker {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let next = {
                let mut receiver = self.receiver.lock().await;
                tokio::select! {
                    biased;
                    event = receiver.recv() => event,
                    _ = shutdown.changed() => None,
                }
            };
            match next {
                Some(event) => self.persist(event).await,
                None => break,
            }
        }

        // Refuse further sends, then drain whatever is still buffered
        self.receiver.lock().await.close();
        loop {
            let next = self.receiver.lock().await.try_recv().ok();
            match next {
                Some(event) => self.persist(event).await,
                None => break,
            }
        }
        debug!(worker = self.id, "Usage worker stopped");
    }

    async fn persist(&self, event: UsageEvent) {
        let write = self.store.increment(
            &event.tenant_key,
            event.owner_id,
            event.resource_id,
            event.date(),
            event.category,
        );
        match with_deadline(self.persist_timeout, write).await {
            Ok(()) => self.metrics.record_event_persisted(),
            Err(e) => {
                self.metrics.record_event_failed();
                warn!(
                    worker = self.id,
                    tenant_key = %event.tenant_key,
                    category = %event.category,
                    error = %e,
                    "Failed to record usage, event discarded"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetgate_core::{MemoryUsageStore, RequestCategory};
    use uuid::Uuid;

    #[test]
    fn test_default_config() {
        let config = RecorderConfig::default();
        assert_eq!(config.workers, 3);
        assert_eq!(config.capacity, 10_000);
        assert_eq!(config.persist_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_second_shutdown_is_noop() {
        let recorder = UsageRecorder::start(
            Arc::new(MemoryUsageStore::new()),
            Arc::new(Metrics::new()),
            RecorderConfig::default(),
        );
        assert!(recorder.shutdown(Duration::from_secs(1)).await);
        assert!(recorder.shutdown(Duration::from_secs(1)).await);
        assert!(recorder.is_closed());
    }

    #[tokio::test]
    async fn test_channel_refuses_sends_after_shutdown() {
        let recorder = UsageRecorder::start(
            Arc::new(MemoryUsageStore::new()),
            Arc::new(Metrics::new()),
            RecorderConfig::default(),
        );
        assert!(recorder.shutdown(Duration::from_secs(1)).await);

        // A send racing past the closed flag must not land in a drained buffer
        let event = UsageEvent::new("late", Uuid::nil(), Uuid::nil(), RequestCategory::Write);
        assert!(matches!(
            recorder.sender.try_send(event),
            Err(mpsc::error::TrySendError::Closed(_))
        ));
        assert_eq!(recorder.pending(), 0);
    }

    #[tokio::test]
    async fn test_pending_counts_buffered_events() {
        let recorder = UsageRecorder::start(
            Arc::new(MemoryUsageStore::new()),
            Arc::new(Metrics::new()),
            RecorderConfig {
                workers: 1,
                capacity: 8,
                ..Default::default()
            },
        );
        // Workers have not been polled yet on the current-thread runtime
        for _ in 0..3 {
            recorder.submit(UsageEvent::new("k", Uuid::nil(), Uuid::nil(), RequestCategory::Read));
        }
        assert_eq!(recorder.pending(), 3);
        recorder.shutdown(Duration::from_secs(1)).await;
        assert_eq!(recorder.pending(), 0);
    }
}
