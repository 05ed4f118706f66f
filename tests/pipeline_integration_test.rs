use chrono::{TimeDelta, Utc};
use parking_lot::Mutex;
use series_forwarder::app::{Coordinator, CoordinatorSettings, FlushOutcome};
use series_forwarder::buffer::{BufferSettings, FlushTrigger, StrategyKind};
use series_forwarder::domain::Observation;
use series_forwarder::reliability::{RetryConfig, TransmissionStatus};
use series_forwarder::sender::{Batch, FailureReason, Transport, TransportError};
use series_forwarder::source::StreamCatalog;
use series_forwarder::validation::ValidationOutcome;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Records every batch and answers from a script, then succeeds.
#[derive(Default)]
struct RecordingTransport {
    script: Mutex<VecDeque<TransportError>>,
    sent: Mutex<Vec<Batch>>,
}

impl RecordingTransport {
    fn failing(errors: Vec<TransportError>) -> Self {
        Self {
            script: Mutex::new(errors.into()),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn sent(&self) -> Vec<Batch> {
        self.sent.lock().clone()
    }
}

impl Transport for RecordingTransport {
    async fn send(&self, batch: &Batch) -> Result<(), TransportError> {
        self.sent.lock().push(batch.clone());
        match self.script.lock().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn endpoint(&self) -> &str {
        "recording://store"
    }
}

/// Holds every send for `delay` and signals when a send has started.
struct SlowTransport {
    delay: Duration,
    started: Notify,
    sent: Mutex<Vec<Batch>>,
}

impl SlowTransport {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: Notify::new(),
            sent: Mutex::new(Vec::new()),
        }
    }
}

impl Transport for SlowTransport {
    async fn send(&self, batch: &Batch) -> Result<(), TransportError> {
        self.started.notify_one();
        tokio::time::sleep(self.delay).await;
        self.sent.lock().push(batch.clone());
        Ok(())
    }

    fn endpoint(&self) -> &str {
        "slow://store"
    }
}

fn coordinator<T: Transport>(
    transport: T,
    strategy: StrategyKind,
    catalog: StreamCatalog,
) -> Coordinator<T> {
    let settings = CoordinatorSettings {
        buffer: BufferSettings {
            strategy,
            time_interval: Duration::from_secs(300),
            size_limit: 100,
            ..BufferSettings::default()
        },
        retry: RetryConfig::default(),
        ..CoordinatorSettings::default()
    };
    Coordinator::new(transport, settings, catalog).unwrap()
}

fn reading(stream: &str, value: f64, offset_ms: i64) -> Observation {
    Observation::new(stream, value, Utc::now() + TimeDelta::milliseconds(offset_ms))
}

#[tokio::test(start_paused = true)]
async fn test_hybrid_size_trigger_fires_exactly_once() {
    let coordinator = coordinator(
        RecordingTransport::default(),
        StrategyKind::Hybrid,
        StreamCatalog::default(),
    );

    for i in 0..150 {
        let stream = if i % 2 == 0 { "power.grid" } else { "power.solar" };
        let outcome = coordinator.add_observation(reading(stream, i as f64, i)).await;
        assert_eq!(outcome, ValidationOutcome::Valid);
        if i == 98 {
            assert!(coordinator.transport().sent().is_empty());
        }
    }

    let sent = coordinator.transport().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].trigger, FlushTrigger::SizeLimit);
    assert_eq!(sent[0].data_points(), 100);
    assert_eq!(coordinator.buffered(), 50);
    assert_eq!(coordinator.stats().points_sent, 100);
}

#[tokio::test(start_paused = true)]
async fn test_time_trigger_after_interval() {
    let coordinator = coordinator(
        RecordingTransport::default(),
        StrategyKind::Hybrid,
        StreamCatalog::default(),
    );
    for i in 0..10 {
        coordinator.add_observation(reading("temp.attic", 21.0, i)).await;
    }

    tokio::time::advance(Duration::from_secs(299)).await;
    assert_eq!(coordinator.flush_if_due().await, None);

    tokio::time::advance(Duration::from_secs(1)).await;
    let outcome = coordinator.flush_if_due().await;
    assert!(matches!(
        outcome,
        Some(FlushOutcome::Sent {
            data_points: 10,
            ..
        })
    ));
    assert_eq!(coordinator.transport().sent()[0].trigger, FlushTrigger::TimeInterval);
}

#[tokio::test(start_paused = true)]
async fn test_failed_batch_is_retried_with_same_id() {
    let coordinator = coordinator(
        RecordingTransport::failing(vec![TransportError::Server {
            status: 503,
            message: "unavailable".into(),
        }]),
        StrategyKind::Hybrid,
        StreamCatalog::default(),
    );
    coordinator.add_observation(reading("temp.attic", 21.0, 0)).await;

    let outcome = coordinator.manual_flush().await;
    assert!(matches!(
        outcome,
        FlushOutcome::QueuedForRetry {
            reason: FailureReason::ServerError,
            ..
        }
    ));

    // Server errors back off 2s * 1.5
    tokio::time::advance(Duration::from_millis(2_999)).await;
    assert_eq!(coordinator.process_retries().await.processed, 0);
    tokio::time::advance(Duration::from_millis(1)).await;
    let summary = coordinator.process_retries().await;
    assert_eq!(summary.successful, 1);

    let sent = coordinator.transport().sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].id, sent[1].id);
    assert_eq!(sent[0], sent[1]);

    let stats = coordinator.stats();
    assert_eq!(stats.failed_sends, 1);
    assert_eq!(stats.successful_sends, 1);
    assert_eq!(stats.points_sent, 1);
    assert!(coordinator.retry_engine().is_empty());
    assert_eq!(coordinator.health().consecutive_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_honors_retry_after() {
    let coordinator = coordinator(
        RecordingTransport::failing(vec![TransportError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        }]),
        StrategyKind::Hybrid,
        StreamCatalog::default(),
    );
    coordinator.add_observation(reading("aqi.outdoor", 42.0, 0)).await;
    coordinator.manual_flush().await;

    tokio::time::advance(Duration::from_secs(29)).await;
    assert_eq!(coordinator.process_retries().await.processed, 0);
    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(coordinator.process_retries().await.successful, 1);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_failure_is_abandoned() {
    let failures = (0..10)
        .map(|_| TransportError::Network("connection refused".into()))
        .collect();
    let settings = CoordinatorSettings {
        retry: RetryConfig {
            max_attempts: 3,
            ..RetryConfig::default()
        },
        ..CoordinatorSettings::default()
    };
    let coordinator = Coordinator::new(
        RecordingTransport::failing(failures),
        settings,
        StreamCatalog::default(),
    )
    .unwrap();

    coordinator.add_observation(reading("temp.attic", 21.0, 0)).await;
    coordinator.manual_flush().await;

    let mut abandoned = 0;
    for _ in 0..10 {
        tokio::time::advance(Duration::from_secs(300)).await;
        abandoned += coordinator.process_retries().await.abandoned;
    }

    assert_eq!(abandoned, 1);
    // One initial send plus three retries
    assert_eq!(coordinator.transport().sent().len(), 4);
    assert_eq!(coordinator.retry_engine().stats().abandoned_entries, 1);
    assert_eq!(coordinator.health().consecutive_failures(), 4);

    let history = coordinator.status_tracker().recent_history(10);
    let statuses: Vec<_> = history.iter().map(|record| record.status).collect();
    assert_eq!(
        statuses,
        vec![
            TransmissionStatus::Failed,
            TransmissionStatus::Retrying,
            TransmissionStatus::Retrying,
            TransmissionStatus::Abandoned,
        ]
    );
    let retry_counts: Vec<_> = history.iter().map(|record| record.retry_count).collect();
    assert_eq!(retry_counts, vec![0, 1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_sample_added_during_inflight_flush_waits_for_next_batch() {
    let coordinator = Arc::new(coordinator(
        SlowTransport::new(Duration::from_secs(5)),
        StrategyKind::Hybrid,
        StreamCatalog::default(),
    ));
    coordinator.add_observation(reading("temp.attic", 21.0, 0)).await;

    let flushing = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.manual_flush().await }
    });
    coordinator.transport().started.notified().await;
    assert!(!flushing.is_finished());
    assert_eq!(coordinator.buffered(), 0);

    coordinator.add_observation(reading("temp.attic", 21.5, 1)).await;
    assert_eq!(coordinator.buffered(), 1);

    let first = flushing.await.unwrap();
    assert!(matches!(first, FlushOutcome::Sent { data_points: 1, .. }));
    assert_eq!(coordinator.buffered(), 1);

    let second = coordinator.manual_flush().await;
    assert!(matches!(second, FlushOutcome::Sent { data_points: 1, .. }));

    let sent = coordinator.transport().sent.lock().clone();
    assert_eq!(sent.len(), 2);
    assert_ne!(sent[0].id, sent[1].id);
    assert_eq!(sent[0].series["temp.attic"], vec![Some(21.0)]);
    assert_eq!(sent[1].series["temp.attic"], vec![Some(21.5)]);
    assert_eq!(sent.iter().map(Batch::data_points).sum::<usize>(), 2);
    assert_eq!(coordinator.buffered(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_empty_priority_drain_is_not_a_flush() {
    let coordinator = coordinator(
        RecordingTransport::default(),
        StrategyKind::Priority,
        StreamCatalog::default(),
    );
    coordinator.add_observation(reading("energy.meter", 1200.0, 0)).await;
    assert_eq!(coordinator.buffered(), 1);

    assert_eq!(coordinator.flush(FlushTrigger::Priority).await, FlushOutcome::Empty);

    assert_eq!(coordinator.buffered(), 1);
    assert!(coordinator.transport().sent().is_empty());
    assert_eq!(coordinator.buffer_metrics().flushes, 0);
    assert_eq!(coordinator.stats().last_flush_time, None);
    let metrics = coordinator.metrics().export().unwrap();
    assert!(!metrics.contains("series_flushes_total{"));

    // The low-priority entry still goes out on the interval
    tokio::time::advance(Duration::from_secs(300)).await;
    let outcome = coordinator.flush_if_due().await;
    assert!(matches!(
        outcome,
        Some(FlushOutcome::Sent { data_points: 1, .. })
    ));
    assert_eq!(coordinator.buffer_metrics().flushes, 1);
}

#[tokio::test]
async fn test_rejections_are_counted_not_buffered() {
    let coordinator = coordinator(
        RecordingTransport::default(),
        StrategyKind::Hybrid,
        StreamCatalog::default(),
    );

    let unavailable = Observation::new("temp.attic", "unavailable", Utc::now());
    let out_of_range = reading("humidity.bath", 150.0, 0).with_category("humidity");
    let stale = Observation::new("temp.attic", 21.0, Utc::now() - TimeDelta::hours(1));
    let text = Observation::new("temp.attic", "warm", Utc::now());
    let switch = Observation::new("switch.porch", "on", Utc::now());

    assert_eq!(
        coordinator.add_observation(unavailable).await,
        ValidationOutcome::InvalidState
    );
    assert_eq!(
        coordinator.add_observation(out_of_range).await,
        ValidationOutcome::InvalidRange
    );
    assert_eq!(coordinator.add_observation(stale).await, ValidationOutcome::Stale);
    assert_eq!(
        coordinator.add_observation(text).await,
        ValidationOutcome::InvalidType
    );
    assert_eq!(coordinator.add_observation(switch).await, ValidationOutcome::Valid);

    assert_eq!(coordinator.buffered(), 1);
    let stats = coordinator.validation_stats();
    assert_eq!(stats.total, 5);
    assert_eq!(stats.valid, 1);
    assert_eq!(stats.converted, 1);

    let metrics = coordinator.metrics().export().unwrap();
    assert!(metrics.contains("series_samples_total{outcome=\"invalid_range\"} 1"));
    assert!(metrics.contains("series_samples_total{outcome=\"valid\"} 1"));
}

#[tokio::test]
async fn test_catalog_supplies_category_unit_and_priority() {
    let catalog = StreamCatalog::from_toml_str(
        r#"
        [[streams]]
        stream_id = "temp.freezer"
        category = "temperature"
        unit = "°F"
        priority = "high"

        [[streams]]
        stream_id = "energy.meter"
        category = "energy"
        priority = "low"
        "#,
    )
    .unwrap();
    let coordinator = coordinator(RecordingTransport::default(), StrategyKind::Priority, catalog);

    coordinator.add_observation(reading("energy.meter", 1200.0, 0)).await;
    assert!(coordinator.transport().sent().is_empty());

    coordinator.add_observation(reading("temp.freezer", 5.0, 1)).await;
    let sent = coordinator.transport().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].trigger, FlushTrigger::Priority);

    // -15 °C after conversion from 5 °F
    let value = sent[0].series["temp.freezer"][0].unwrap();
    assert!((value + 15.0).abs() < 1e-9);
    assert_eq!(coordinator.buffered(), 1);
}

#[tokio::test]
async fn test_diagnostics_snapshot_reflects_activity() {
    let coordinator = coordinator(
        RecordingTransport::failing(vec![TransportError::Unauthorized {
            status: 401,
            message: "token expired".into(),
        }]),
        StrategyKind::Hybrid,
        StreamCatalog::default(),
    );
    coordinator.add_observation(reading("temp.attic", 21.0, 0)).await;
    coordinator.manual_flush().await;

    let diagnostics = coordinator.diagnostics();
    assert_eq!(diagnostics.coordinator.failed_sends, 1);
    assert_eq!(diagnostics.pending_retries.len(), 1);
    assert_eq!(
        diagnostics.pending_retries[0].reason,
        FailureReason::AuthenticationError
    );
    assert_eq!(diagnostics.transmission.failed_transmissions, 1);
    assert_eq!(diagnostics.recent_transmissions.len(), 1);

    let json = serde_json::to_value(&diagnostics).unwrap();
    assert_eq!(json["buffer"]["strategy"], "hybrid");
    assert_eq!(json["retry"]["current_queue_size"], 1);
}
