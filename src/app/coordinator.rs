use crate::buffer::{BufferMetrics, BufferSettings, BufferStrategyEngine, FlushTrigger};
use crate::domain::{BufferEntry, Observation, Priority, Sample};
use crate::reliability::{
    CurrentStatus, HealthMonitor, HealthReport, MetricsError, PendingRetry, PipelineMetrics,
    ProcessSummary, RetryConfig, RetryEngine, RetryStats, TransmissionRecord,
    TransmissionStatistics, TransmissionStatus, TransmissionStatusTracker,
};
use crate::sender::{Batch, Disposition, FailureReason, Transport, TransportError, classify};
use crate::source::StreamCatalog;
use crate::validation::{SampleValidator, ValidationOutcome, ValidationStats, ValidatorConfig};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const RECENT_TRANSMISSIONS: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct CoordinatorSettings {
    pub buffer: BufferSettings,
    pub validator: ValidatorConfig,
    pub retry: RetryConfig,
}

/// Result of one flush, reported back to manual callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FlushOutcome {
    /// Nothing was buffered.
    Empty,
    Sent {
        batch_id: Uuid,
        data_points: usize,
    },
    QueuedForRetry {
        batch_id: Uuid,
        reason: FailureReason,
    },
    /// The endpoint rejected the batch as malformed; it is not retried.
    Dropped { batch_id: Uuid, error: String },
}

struct Drained {
    trigger: FlushTrigger,
    entries: Vec<BufferEntry>,
    size_limit: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CoordinatorStats {
    pub successful_sends: u64,
    pub failed_sends: u64,
    pub dropped_batches: u64,
    pub points_sent: u64,
    pub last_flush_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub health: HealthReport,
    pub coordinator: CoordinatorStats,
    pub buffer: BufferMetrics,
    pub validation: ValidationStats,
    pub retry: RetryStats,
    pub pending_retries: Vec<PendingRetry>,
    pub transmission: TransmissionStatistics,
    pub transmission_status: CurrentStatus,
    pub recent_transmissions: Vec<TransmissionRecord>,
}

/// Owns the buffer and drives batches from it through the transport.
///
/// The buffer and validator sit behind synchronous locks that are never held
/// across a send, so ingestion keeps running while a batch is in flight.
pub struct Coordinator<T> {
    transport: T,
    catalog: StreamCatalog,
    engine: Mutex<BufferStrategyEngine>,
    validator: Mutex<SampleValidator>,
    retry: RetryEngine,
    health: HealthMonitor,
    status: TransmissionStatusTracker,
    metrics: PipelineMetrics,
    stats: Mutex<CoordinatorStats>,
}

impl<T: Transport> Coordinator<T> {
    pub fn new(
        transport: T,
        settings: CoordinatorSettings,
        catalog: StreamCatalog,
    ) -> Result<Self, MetricsError> {
        Ok(Self {
            transport,
            catalog,
            engine: Mutex::new(BufferStrategyEngine::new(settings.buffer)),
            validator: Mutex::new(SampleValidator::new(settings.validator)),
            retry: RetryEngine::new(settings.retry),
            health: HealthMonitor::new(),
            status: TransmissionStatusTracker::default(),
            metrics: PipelineMetrics::new()?,
            stats: Mutex::new(CoordinatorStats::default()),
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn retry_engine(&self) -> &RetryEngine {
        &self.retry
    }

    pub fn status_tracker(&self) -> &TransmissionStatusTracker {
        &self.status
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn buffered(&self) -> usize {
        self.engine.lock().len()
    }

    pub fn buffer_metrics(&self) -> BufferMetrics {
        self.engine.lock().metrics()
    }

    pub fn validation_stats(&self) -> ValidationStats {
        self.validator.lock().stats().clone()
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.stats.lock().clone()
    }

    /// Validate an observation and buffer it if accepted.
    ///
    /// Category, unit and priority come from the stream catalog when the
    /// observation does not carry them. Rejections are counted, never
    /// returned as errors.
    pub async fn add_observation(&self, observation: Observation) -> ValidationOutcome {
        let (outcome, accepted) = self.validate(observation);
        if let Some((sample, priority)) = accepted {
            self.add_sample(sample, Some(priority)).await;
        }
        outcome
    }

    /// Validate and buffer an observation without sending anything.
    ///
    /// Returns the trigger when the buffer now wants a flush; the caller
    /// decides who runs it.
    pub fn ingest_observation(
        &self,
        observation: Observation,
    ) -> (ValidationOutcome, Option<FlushTrigger>) {
        let (outcome, accepted) = self.validate(observation);
        let trigger = accepted.and_then(|(sample, priority)| {
            let mut engine = self.engine.lock();
            let trigger = engine.add(BufferEntry {
                sample,
                priority: Some(priority),
            });
            self.metrics.set_buffered_samples(engine.len());
            trigger
        });
        (outcome, trigger)
    }

    fn validate(
        &self,
        mut observation: Observation,
    ) -> (ValidationOutcome, Option<(Sample, Priority)>) {
        if let Some(record) = self.catalog.get(&observation.stream_id) {
            if observation.category.is_none() {
                observation.category = record.category.clone();
            }
            if observation.unit.is_none() {
                observation.unit = record.unit.clone();
            }
        }

        let result = self.validator.lock().validate_observation(&observation);
        let outcome = result.outcome();
        self.metrics.record_sample(outcome);

        let accepted = result.into_sample().map(|sample| {
            let priority = self.catalog.priority_of(&sample.stream_id);
            (sample, priority)
        });
        (outcome, accepted)
    }

    /// Buffer a validated sample and flush immediately if that makes a flush
    /// due.
    pub async fn add_sample(
        &self,
        sample: Sample,
        priority: Option<Priority>,
    ) -> Option<FlushOutcome> {
        let entry = BufferEntry { sample, priority };
        let drained = {
            let mut engine = self.engine.lock();
            let trigger = engine.add(entry);
            self.metrics.set_buffered_samples(engine.len());
            trigger.map(|trigger| self.drain(&mut engine, trigger))
        };

        match drained {
            Some(drained) => Some(self.dispatch(drained).await),
            None => None,
        }
    }

    /// Flush if the active policy says a flush is due.
    ///
    /// The decision and the drain happen under one lock acquisition.
    pub async fn flush_if_due(&self) -> Option<FlushOutcome> {
        let drained = {
            let mut engine = self.engine.lock();
            let trigger = engine.should_flush()?;
            self.drain(&mut engine, trigger)
        };
        Some(self.dispatch(drained).await)
    }

    pub async fn manual_flush(&self) -> FlushOutcome {
        self.flush(FlushTrigger::Manual).await
    }

    pub async fn shutdown_flush(&self) -> FlushOutcome {
        self.flush(FlushTrigger::Shutdown).await
    }

    /// Drain the buffer for `trigger`, assemble a batch and send it once.
    ///
    /// Failed batches go to the retry engine; the coordinator never resends
    /// on its own.
    pub async fn flush(&self, trigger: FlushTrigger) -> FlushOutcome {
        let drained = {
            let mut engine = self.engine.lock();
            self.drain(&mut engine, trigger)
        };
        self.dispatch(drained).await
    }

    fn drain(&self, engine: &mut BufferStrategyEngine, trigger: FlushTrigger) -> Drained {
        let entries = engine.get_flush_data(trigger);
        self.metrics.set_buffered_samples(engine.len());
        Drained {
            trigger,
            entries,
            size_limit: engine.size_limit(),
        }
    }

    /// Record and send drained entries. A drain that came back empty is not
    /// a flush and leaves every counter untouched.
    async fn dispatch(&self, drained: Drained) -> FlushOutcome {
        let Drained {
            trigger,
            entries,
            size_limit,
        } = drained;
        if entries.is_empty() {
            return FlushOutcome::Empty;
        }

        self.metrics.record_flush(trigger);
        self.health
            .record_buffer_utilization(entries.len(), size_limit);
        self.stats.lock().last_flush_time = Some(Utc::now());

        let batch = Batch::assemble(entries, trigger);
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }
        self.send_batch(batch).await
    }

    async fn send_batch(&self, batch: Batch) -> FlushOutcome {
        let points = batch.data_points();
        let series = batch.series_count();
        let started = Instant::now();
        let result = self.transport.send(&batch).await;
        let elapsed = started.elapsed();

        self.health.record_call(
            elapsed,
            result.is_ok(),
            self.transport.endpoint(),
            result.as_ref().err(),
        );
        self.metrics
            .record_transmission(result.is_ok(), points, elapsed);

        let error = match result {
            Ok(()) => {
                self.health.record_transmission(true, points);
                self.status.record(
                    TransmissionStatus::Success,
                    batch.id.to_string(),
                    points,
                    series,
                    elapsed,
                    None,
                    0,
                    batch.trigger,
                );
                {
                    let mut stats = self.stats.lock();
                    stats.successful_sends += 1;
                    stats.points_sent += points as u64;
                }
                return FlushOutcome::Sent {
                    batch_id: batch.id,
                    data_points: points,
                };
            }
            Err(error) => error,
        };

        self.health.record_transmission(false, points);
        self.stats.lock().failed_sends += 1;
        let classification = classify(&error);
        let message = error.to_string();

        if classification.disposition == Disposition::Drop {
            error!(
                batch_id = %batch.id,
                points,
                error = %message,
                "Endpoint rejected batch as invalid, dropping"
            );
            self.status.record(
                TransmissionStatus::Abandoned,
                batch.id.to_string(),
                points,
                series,
                elapsed,
                Some(message.clone()),
                0,
                batch.trigger,
            );
            self.stats.lock().dropped_batches += 1;
            self.metrics.record_dropped_batch();
            return FlushOutcome::Dropped {
                batch_id: batch.id,
                error: message,
            };
        }

        if classification.disposition == Disposition::RetryNeedsAttention {
            warn!(
                batch_id = %batch.id,
                error = %message,
                "Authentication failed; retries will keep failing until credentials are fixed"
            );
        }

        self.status.record(
            TransmissionStatus::Failed,
            batch.id.to_string(),
            points,
            series,
            elapsed,
            Some(message.clone()),
            0,
            batch.trigger,
        );

        let retry_after = match &error {
            TransportError::RateLimited { retry_after } => *retry_after,
            _ => None,
        };
        let batch_id = batch.id;
        self.retry
            .enqueue_with(batch, classification.reason, message, retry_after, None);
        self.metrics.set_retry_queue_depth(self.retry.queue_len());

        FlushOutcome::QueuedForRetry {
            batch_id,
            reason: classification.reason,
        }
    }

    /// Resend a queued batch. `attempt` counts retries of this batch,
    /// starting at 1.
    async fn send_retry(&self, batch: Batch, attempt: u32) -> Result<(), TransportError> {
        let points = batch.data_points();
        let started = Instant::now();
        let result = self.transport.send(&batch).await;
        let elapsed = started.elapsed();

        self.health.record_call(
            elapsed,
            result.is_ok(),
            self.transport.endpoint(),
            result.as_ref().err(),
        );
        self.metrics
            .record_transmission(result.is_ok(), points, elapsed);

        let (status, message) = match &result {
            Ok(()) => {
                self.health.record_transmission(true, points);
                {
                    let mut stats = self.stats.lock();
                    stats.successful_sends += 1;
                    stats.points_sent += points as u64;
                }
                (TransmissionStatus::Success, None)
            }
            Err(error) => {
                let exhausted = attempt >= self.retry.config().max_attempts
                    || classify(error).disposition == Disposition::Drop;
                let status = if exhausted {
                    TransmissionStatus::Abandoned
                } else {
                    TransmissionStatus::Retrying
                };
                (status, Some(error.to_string()))
            }
        };
        self.status.record(
            status,
            batch.id.to_string(),
            points,
            batch.series_count(),
            elapsed,
            message,
            attempt,
            batch.trigger,
        );

        result
    }

    /// Run one retry cycle over every due entry.
    pub async fn process_retries(&self) -> ProcessSummary {
        let summary = self
            .retry
            .process_ready_entries(|batch, attempt| self.send_retry(batch, attempt))
            .await;

        if summary.processed > 0 {
            self.metrics.record_retry("success", summary.successful);
            self.metrics.record_retry("requeued", summary.requeued);
            self.metrics.record_retry("abandoned", summary.abandoned);
            info!(
                processed = summary.processed,
                successful = summary.successful,
                requeued = summary.requeued,
                abandoned = summary.abandoned,
                "Retry cycle finished"
            );
        }
        self.metrics.set_retry_queue_depth(self.retry.queue_len());
        summary
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            health: self.health.get_comprehensive_report(),
            coordinator: self.stats(),
            buffer: self.buffer_metrics(),
            validation: self.validation_stats(),
            retry: self.retry.stats(),
            pending_retries: self.retry.pending(),
            transmission: self.status.statistics(),
            transmission_status: self.status.current_status(),
            recent_transmissions: self.status.recent_history(RECENT_TRANSMISSIONS),
        }
    }

    /// Zero every statistic. Buffered samples and queued retries are kept.
    pub fn reset_statistics(&self) {
        self.engine.lock().reset_metrics();
        self.validator.lock().reset_stats();
        self.retry.reset_stats();
        self.health.reset();
        self.status.reset();
        *self.stats.lock() = CoordinatorStats::default();
        debug!("Reset pipeline statistics");
    }
}
