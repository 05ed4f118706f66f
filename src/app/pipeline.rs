use super::coordinator::Coordinator;
use crate::domain::Observation;
use crate::sender::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Feed observations from the inbound channel into the coordinator.
///
/// Ingestion only buffers; when the buffer asks for a flush the flush task is
/// woken through `flush_requested`, so a slow send never stalls the channel.
/// On cancellation the channel is closed and observations already queued in
/// it are still buffered. Returns the number of observations consumed.
pub async fn run_ingestion_loop<T: Transport>(
    coordinator: Arc<Coordinator<T>>,
    mut observations: mpsc::Receiver<Observation>,
    flush_requested: Arc<Notify>,
    cancel: CancellationToken,
) -> u64 {
    let mut consumed = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            observation = observations.recv() => match observation {
                Some(observation) => {
                    let (_, trigger) = coordinator.ingest_observation(observation);
                    if trigger.is_some() {
                        flush_requested.notify_one();
                    }
                    consumed += 1;
                }
                None => {
                    info!(consumed, "Observation channel closed");
                    return consumed;
                }
            },
        }
    }

    // The shutdown flush picks up whatever these leave in the buffer
    observations.close();
    let mut drained = 0u64;
    while let Some(observation) = observations.recv().await {
        coordinator.ingest_observation(observation);
        drained += 1;
    }
    consumed += drained;
    info!(consumed, drained, "Ingestion stopped");
    consumed
}

/// Periodic flush checks: a coarse tick at the batch interval plus a
/// lightweight tick for size, priority and adaptive triggers. Ingestion
/// wakes the loop early through `flush_requested`.
pub async fn run_flush_loop<T: Transport>(
    coordinator: Arc<Coordinator<T>>,
    batch_interval: Duration,
    check_interval: Duration,
    flush_requested: Arc<Notify>,
    cancel: CancellationToken,
) {
    let mut coarse = ticker(batch_interval);
    let mut check = ticker(check_interval);
    info!(
        batch_interval_secs = batch_interval.as_secs_f64(),
        check_interval_secs = check_interval.as_secs_f64(),
        "Starting flush loop"
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = flush_requested.notified() => {
                if let Some(outcome) = coordinator.flush_if_due().await {
                    debug!(?outcome, "Requested flush");
                }
            }
            _ = coarse.tick() => {
                if let Some(outcome) = coordinator.flush_if_due().await {
                    debug!(?outcome, "Interval flush");
                }
            }
            _ = check.tick() => {
                if let Some(outcome) = coordinator.flush_if_due().await {
                    debug!(?outcome, "Triggered flush");
                }
            }
        }
    }
    debug!("Flush loop stopped");
}

pub async fn run_retry_loop<T: Transport>(
    coordinator: Arc<Coordinator<T>>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut tick = ticker(period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                coordinator.process_retries().await;
            }
        }
    }
    let pending = coordinator.retry_engine().queue_len();
    if pending > 0 {
        warn!(pending, "Retry loop stopped, queued batches are not persisted");
    }
}
