//! Tests for the usage recorder worker pool

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use sheetgate_core::{
    utc_day, DailyUsageRecord, MemoryUsageStore, Metrics, RequestCategory, StoreError,
    UsageScope, UsageStore,
};
use sheetgate_queue::{RecorderConfig, RecorderError, SubmitOutcome, UsageEvent, UsageRecorder};
use uuid::Uuid;

/// A store whose writes never complete
struct HangingStore;

#[async_trait::async_trait]
impl UsageStore for HangingStore {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn increment(
        &self,
        _tenant_key: &str,
        _owner_id: Uuid,
        _resource_id: Uuid,
        _date: NaiveDate,
        _category: RequestCategory,
    ) -> Result<(), StoreError> {
        futures::future::pending::<()>().await;
        Ok(())
    }

    async fn total_since(
        &self,
        _scope: &UsageScope,
        _since: NaiveDate,
        _category: RequestCategory,
    ) -> Result<u64, StoreError> {
        Ok(0)
    }

    async fn daily_usage(
        &self,
        _scope: &UsageScope,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<DailyUsageRecord>, StoreError> {
        Ok(Vec::new())
    }
}

fn event(tenant_key: &str, owner: Uuid) -> UsageEvent {
    UsageEvent::new(tenant_key, owner, Uuid::nil(), RequestCategory::Write)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_queued_event_is_counted_once() {
    let store = Arc::new(MemoryUsageStore::new());
    let metrics = Arc::new(Metrics::new());
    let recorder = Arc::new(UsageRecorder::start(
        store.clone(),
        metrics.clone(),
        RecorderConfig::default(),
    ));
    let owner = Uuid::new_v4();

    let producers: Vec<_> = (0..8)
        .map(|_| {
            let recorder = recorder.clone();
            tokio::spawn(async move {
                for _ in 0..25 {
                    assert!(recorder.submit(event("hot-key", owner)).is_queued());
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }

    assert!(recorder.shutdown(Duration::from_secs(5)).await);

    let today = utc_day(Utc::now());
    assert_eq!(store.count("hot-key", today, RequestCategory::Write).await, 200);
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.events_submitted, 200);
    assert_eq!(snapshot.events_persisted, 200);
    assert_eq!(snapshot.events_dropped_full, 0);
}

#[tokio::test]
async fn test_full_buffer_drops_newest() {
    let store = Arc::new(MemoryUsageStore::new());
    let metrics = Arc::new(Metrics::new());
    let recorder = UsageRecorder::start(
        store.clone(),
        metrics.clone(),
        RecorderConfig {
            workers: 1,
            capacity: 2,
            ..Default::default()
        },
    );

    // Nothing yields between submissions, so no worker drains in between
    let outcomes: Vec<_> = (0..10)
        .map(|_| recorder.submit(event("k", Uuid::nil())))
        .collect();

    assert!(outcomes[0].is_queued());
    assert!(outcomes[1].is_queued());
    assert!(outcomes[2..]
        .iter()
        .all(|o| *o == SubmitOutcome::Dropped(RecorderError::Saturated)));
    assert_eq!(metrics.snapshot().events_dropped_full, 8);

    assert!(recorder.shutdown(Duration::from_secs(1)).await);
    let today = utc_day(Utc::now());
    assert_eq!(store.count("k", today, RequestCategory::Write).await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_submit_never_waits_on_slow_store() {
    let metrics = Arc::new(Metrics::new());
    let recorder = UsageRecorder::start(
        Arc::new(HangingStore),
        metrics.clone(),
        RecorderConfig {
            workers: 2,
            capacity: 4,
            persist_timeout: Duration::from_secs(60),
        },
    );

    let started = tokio::time::Instant::now();
    for _ in 0..1_000 {
        recorder.submit(event("k", Uuid::nil()));
    }
    assert_eq!(started.elapsed(), Duration::ZERO);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.events_submitted + snapshot.events_dropped_full, 1_000);
    assert!(snapshot.events_dropped_full >= 996);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_write_is_discarded_without_retry() {
    let metrics = Arc::new(Metrics::new());
    let recorder = UsageRecorder::start(
        Arc::new(HangingStore),
        metrics.clone(),
        RecorderConfig {
            workers: 1,
            capacity: 16,
            persist_timeout: Duration::from_millis(50),
        },
    );

    recorder.submit(event("k", Uuid::nil()));
    recorder.submit(event("k", Uuid::nil()));
    assert!(recorder.shutdown(Duration::from_secs(5)).await);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.events_failed, 2);
    assert_eq!(snapshot.events_persisted, 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_aborts_after_grace() {
    let recorder = UsageRecorder::start(
        Arc::new(HangingStore),
        Arc::new(Metrics::new()),
        RecorderConfig {
            workers: 1,
            capacity: 16,
            persist_timeout: Duration::from_secs(30),
        },
    );
    for _ in 0..3 {
        recorder.submit(event("k", Uuid::nil()));
    }

    let drained = recorder.shutdown(Duration::from_millis(100)).await;
    assert!(!drained);
}

#[tokio::test]
async fn test_no_submissions_after_shutdown() {
    let store = Arc::new(MemoryUsageStore::new());
    let metrics = Arc::new(Metrics::new());
    let recorder = UsageRecorder::start(store.clone(), metrics.clone(), RecorderConfig::default());

    recorder.shutdown(Duration::from_secs(1)).await;
    let outcome = recorder.submit(event("late", Uuid::nil()));

    assert_eq!(outcome, SubmitOutcome::Dropped(RecorderError::Closed));
    assert_eq!(metrics.snapshot().events_dropped_closed, 1);
    let today = utc_day(Utc::now());
    assert_eq!(store.count("late", today, RequestCategory::Write).await, 0);
}
