use chrono::{TimeDelta, Utc};
use parking_lot::Mutex;
use series_forwarder::app::{Config, FlushOutcome, ServiceError, ServiceManager};
use series_forwarder::buffer::FlushTrigger;
use series_forwarder::domain::Observation;
use series_forwarder::sender::{Batch, Transport, TransportError};
use series_forwarder::source::{StreamCatalog, read_file};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio_test::{assert_err, assert_ok};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct CapturingTransport {
    sent: Mutex<Vec<Batch>>,
}

impl Transport for CapturingTransport {
    async fn send(&self, batch: &Batch) -> Result<(), TransportError> {
        self.sent.lock().push(batch.clone());
        Ok(())
    }

    fn endpoint(&self) -> &str {
        "capture://store"
    }
}

/// First send hangs for a long time; later sends return at once.
#[derive(Default)]
struct StallingTransport {
    calls: AtomicUsize,
    started: Notify,
    sent: Mutex<Vec<Batch>>,
}

impl Transport for StallingTransport {
    async fn send(&self, batch: &Batch) -> Result<(), TransportError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.started.notify_one();
            tokio::time::sleep(Duration::from_secs(20)).await;
        }
        self.sent.lock().push(batch.clone());
        Ok(())
    }

    fn endpoint(&self) -> &str {
        "stalling://store"
    }
}

fn manager() -> ServiceManager<CapturingTransport> {
    let mut config = Config::default();
    config.post_process().unwrap();
    ServiceManager::with_transport(config, CapturingTransport::default(), StreamCatalog::default())
        .unwrap()
}

#[tokio::test]
async fn test_shutdown_flushes_queued_observations_once() {
    let mut service = manager();
    let (tx, rx) = mpsc::channel(64);
    service.start(rx).unwrap();
    assert!(service.is_running());

    let start = Utc::now();
    for i in 0..20 {
        let timestamp = start + TimeDelta::milliseconds(i);
        tx.send(Observation::new("temp.attic", 20.0 + i as f64 * 0.1, timestamp))
            .await
            .unwrap();
    }

    let report = service.shutdown().await.unwrap();
    assert_eq!(report.consumed, 20);
    assert!(!report.inflight_flush_abandoned);
    assert!(matches!(
        report.outcome,
        FlushOutcome::Sent {
            data_points: 20,
            ..
        }
    ));
    assert!(!service.is_running());

    let coordinator = service.coordinator();
    let sent = coordinator.transport().sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].trigger, FlushTrigger::Shutdown);
    assert_eq!(coordinator.buffered(), 0);
    assert_eq!(
        coordinator
            .buffer_metrics()
            .flush_triggers
            .get(&FlushTrigger::Shutdown),
        Some(&1)
    );
}

#[tokio::test]
async fn test_lifecycle_errors() {
    let mut service = manager();
    assert!(matches!(
        service.shutdown().await,
        Err(ServiceError::NotRunning)
    ));

    let (_tx, rx) = mpsc::channel(1);
    assert_ok!(service.start(rx));
    let (_tx2, rx2) = mpsc::channel(1);
    let error = assert_err!(service.start(rx2));
    assert!(matches!(error, ServiceError::AlreadyRunning));

    assert_eq!(service.shutdown().await.unwrap().outcome, FlushOutcome::Empty);
    assert!(service.coordinator().transport().sent.lock().is_empty());
}

#[tokio::test]
async fn test_file_feed_through_running_service() {
    let now = Utc::now().to_rfc3339();
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"{{"stream_id":"power.grid","value":1450.0,"timestamp":"{now}","category":"power"}}"#
    )
    .unwrap();
    writeln!(file, "garbage").unwrap();
    writeln!(
        file,
        r#"{{"stream_id":"switch.porch","value":"off","timestamp":"{now}"}}"#
    )
    .unwrap();
    writeln!(
        file,
        r#"{{"stream_id":"power.grid","value":"unavailable","timestamp":"{now}"}}"#
    )
    .unwrap();

    let mut service = manager();
    let (tx, rx) = mpsc::channel(16);
    service.start(rx).unwrap();

    let stats = read_file(file.path(), tx, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.lines, 4);
    assert_eq!(stats.forwarded, 3);
    assert_eq!(stats.malformed, 1);

    let report = service.shutdown().await.unwrap();
    assert!(matches!(
        report.outcome,
        FlushOutcome::Sent {
            data_points: 2,
            ..
        }
    ));

    let validation = service.coordinator().validation_stats();
    assert_eq!(validation.total, 3);
    assert_eq!(validation.valid, 2);

    let sent = service.coordinator().transport().sent.lock().clone();
    assert_eq!(sent[0].series["switch.porch"], vec![Some(0.0)]);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_send_does_not_skip_shutdown_flush() {
    let mut config = Config::default();
    config.max_batch_size = 5;
    config.post_process().unwrap();
    let mut service =
        ServiceManager::with_transport(config, StallingTransport::default(), StreamCatalog::default())
            .unwrap();
    let (tx, rx) = mpsc::channel(64);
    service.start(rx).unwrap();

    let start = Utc::now();
    let reading = |i: i64| {
        Observation::new("power.grid", 1000.0 + i as f64, start + TimeDelta::milliseconds(i))
    };
    for i in 0..5 {
        tx.send(reading(i)).await.unwrap();
    }
    // The size-triggered batch of five is now stuck in the transport
    service.coordinator().transport().started.notified().await;
    for i in 5..8 {
        tx.send(reading(i)).await.unwrap();
    }

    let report = service.shutdown().await.unwrap();
    assert_eq!(report.consumed, 8);
    assert!(report.inflight_flush_abandoned);
    assert!(matches!(
        report.outcome,
        FlushOutcome::Sent {
            data_points: 3,
            ..
        }
    ));
    assert!(!service.is_running());

    let coordinator = service.coordinator();
    assert_eq!(coordinator.buffered(), 0);
    let sent = coordinator.transport().sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].trigger, FlushTrigger::Shutdown);
    assert_eq!(sent[0].data_points(), 3);
}
