use crate::sender::{Batch, Disposition, FailureReason, TransportError, classify};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Invoked once with the batch after a retry succeeds.
pub type SuccessCallback = Box<dyn FnOnce(&Batch) + Send>;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_queue_size: usize,
    /// Scale each delay by a random factor in `[0.5, 1.5)`, still capped at `max_delay`.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            max_queue_size: 1000,
            jitter: false,
        }
    }
}

pub struct RetryEntry {
    pub batch: Batch,
    pub attempt: u32,
    pub max_attempts: u32,
    pub next_retry: Instant,
    pub next_retry_at: DateTime<Utc>,
    pub reason: FailureReason,
    pub error_message: String,
    pub first_failed_at: DateTime<Utc>,
    on_success: Option<SuccessCallback>,
}

impl fmt::Debug for RetryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryEntry")
            .field("batch_id", &self.batch.id)
            .field("attempt", &self.attempt)
            .field("max_attempts", &self.max_attempts)
            .field("next_retry_at", &self.next_retry_at)
            .field("reason", &self.reason)
            .field("error_message", &self.error_message)
            .field("has_callback", &self.on_success.is_some())
            .finish()
    }
}

/// Read-only view of a queued retry for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct PendingRetry {
    pub batch_id: String,
    pub attempt: u32,
    pub max_attempts: u32,
    pub reason: FailureReason,
    pub error_message: String,
    pub data_points: usize,
    pub next_retry_at: DateTime<Utc>,
    pub first_failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryStats {
    pub total_retries: u64,
    pub successful_retries: u64,
    pub failed_retries: u64,
    pub abandoned_entries: u64,
    /// Entries dropped to make room in a full queue. Also counted as abandoned.
    pub evicted_entries: u64,
    pub retry_reasons: BTreeMap<FailureReason, u64>,
    pub current_queue_size: usize,
    pub peak_queue_size: usize,
    pub max_queue_size: usize,
    pub next_retry_time: Option<DateTime<Utc>>,
}

impl RetryStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_retries == 0 {
            0.0
        } else {
            self.successful_retries as f64 / self.total_retries as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessSummary {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub requeued: usize,
    pub abandoned: usize,
}

#[derive(Debug, Default)]
struct RetryState {
    queue: VecDeque<RetryEntry>,
    stats: RetryStats,
}

impl RetryState {
    /// Append an entry, evicting the oldest one first if the queue is full.
    fn push_bounded(&mut self, entry: RetryEntry, capacity: usize) -> bool {
        let mut evicted = false;
        if self.queue.len() >= capacity
            && let Some(oldest) = self.queue.pop_front()
        {
            warn!(
                batch_id = %oldest.batch.id,
                attempt = oldest.attempt,
                reason = %oldest.reason,
                "Retry queue full, evicting oldest entry"
            );
            self.stats.abandoned_entries += 1;
            self.stats.evicted_entries += 1;
            evicted = true;
        }
        self.queue.push_back(entry);
        self.stats.peak_queue_size = self.stats.peak_queue_size.max(self.queue.len());
        evicted
    }
}

/// Holds failed batches and replays them with exponential backoff.
///
/// The queue lives in memory only. Pending retries are lost when the process
/// exits.
pub struct RetryEngine {
    config: RetryConfig,
    state: Mutex<RetryState>,
    processing: tokio::sync::Mutex<()>,
}

impl RetryEngine {
    pub fn new(config: RetryConfig) -> Self {
        let state = RetryState {
            stats: RetryStats {
                max_queue_size: config.max_queue_size,
                ..RetryStats::default()
            },
            ..RetryState::default()
        };
        Self {
            config,
            state: Mutex::new(state),
            processing: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before the retry following `attempt` failed sends.
    ///
    /// `base * 2^attempt` scaled by the reason's multiplier and capped at
    /// `max_delay`.
    pub fn calculate_backoff_delay(&self, attempt: u32, reason: FailureReason) -> Duration {
        let exponent = 2f64.powi(attempt.min(63) as i32);
        let secs = self.config.base_delay.as_secs_f64() * exponent * reason.backoff_multiplier();
        let capped = secs.min(self.config.max_delay.as_secs_f64());

        if self.config.jitter {
            let factor = rand::rng().random_range(0.5..1.5);
            Duration::from_secs_f64((capped * factor).min(self.config.max_delay.as_secs_f64()))
        } else {
            Duration::from_secs_f64(capped)
        }
    }

    /// Queue a failed batch for retry. Returns `false` if an older entry had
    /// to be evicted to make room.
    pub fn enqueue(&self, batch: Batch, reason: FailureReason, error_message: impl Into<String>) -> bool {
        self.enqueue_with(batch, reason, error_message, None, None)
    }

    /// Queue a failed batch with an optional server-supplied minimum delay and
    /// a callback to run once a retry succeeds.
    pub fn enqueue_with(
        &self,
        batch: Batch,
        reason: FailureReason,
        error_message: impl Into<String>,
        retry_after: Option<Duration>,
        on_success: Option<SuccessCallback>,
    ) -> bool {
        let delay = self.schedule_delay(0, reason, retry_after);
        let now = Utc::now();
        let entry = RetryEntry {
            batch,
            attempt: 0,
            max_attempts: self.config.max_attempts,
            next_retry: Instant::now() + delay,
            next_retry_at: now + TimeDelta::from_std(delay).unwrap_or(TimeDelta::zero()),
            reason,
            error_message: error_message.into(),
            first_failed_at: now,
            on_success,
        };

        info!(
            batch_id = %entry.batch.id,
            %reason,
            delay_secs = delay.as_secs_f64(),
            points = entry.batch.data_points(),
            "Queued batch for retry"
        );

        let mut state = self.state.lock();
        *state.stats.retry_reasons.entry(reason).or_insert(0) += 1;
        !state.push_bounded(entry, self.config.max_queue_size)
    }

    /// Send every entry whose backoff has elapsed, once each.
    ///
    /// `send` receives the batch and the number of this retry, starting at 1.
    /// Entries that are not yet due stay queued in order. Only one cycle runs
    /// at a time; a concurrent call waits for the running one to finish.
    pub async fn process_ready_entries<F, Fut>(&self, mut send: F) -> ProcessSummary
    where
        F: FnMut(Batch, u32) -> Fut,
        Fut: Future<Output = Result<(), TransportError>>,
    {
        let _guard = self.processing.lock().await;

        let ready: Vec<RetryEntry> = {
            let mut state = self.state.lock();
            let now = Instant::now();
            let (ready, waiting): (VecDeque<_>, VecDeque<_>) =
                state.queue.drain(..).partition(|entry| entry.next_retry <= now);
            state.queue = waiting;
            ready.into()
        };

        let mut summary = ProcessSummary::default();
        if ready.is_empty() {
            return summary;
        }
        debug!(ready = ready.len(), "Processing retry queue");

        for mut entry in ready {
            summary.processed += 1;
            let result = send(entry.batch.clone(), entry.attempt + 1).await;

            match result {
                Ok(()) => {
                    summary.successful += 1;
                    {
                        let mut state = self.state.lock();
                        state.stats.total_retries += 1;
                        state.stats.successful_retries += 1;
                    }
                    info!(
                        batch_id = %entry.batch.id,
                        attempt = entry.attempt + 1,
                        "Retry succeeded"
                    );
                    if let Some(callback) = entry.on_success.take() {
                        callback(&entry.batch);
                    }
                }
                Err(error) => {
                    summary.failed += 1;
                    entry.attempt += 1;

                    let classification = classify(&error);
                    let retry_after = match &error {
                        TransportError::RateLimited { retry_after } => *retry_after,
                        _ => None,
                    };
                    entry.reason = classification.reason;
                    entry.error_message = error.to_string();

                    let mut state = self.state.lock();
                    state.stats.total_retries += 1;
                    state.stats.failed_retries += 1;

                    if entry.attempt < entry.max_attempts
                        && classification.disposition != Disposition::Drop
                    {
                        let delay = self.schedule_delay(entry.attempt, entry.reason, retry_after);
                        entry.next_retry = Instant::now() + delay;
                        entry.next_retry_at =
                            Utc::now() + TimeDelta::from_std(delay).unwrap_or(TimeDelta::zero());
                        debug!(
                            batch_id = %entry.batch.id,
                            attempt = entry.attempt,
                            reason = %entry.reason,
                            delay_secs = delay.as_secs_f64(),
                            "Retry failed, rescheduled"
                        );
                        summary.requeued += 1;
                        state.push_bounded(entry, self.config.max_queue_size);
                    } else {
                        summary.abandoned += 1;
                        state.stats.abandoned_entries += 1;
                        warn!(
                            batch_id = %entry.batch.id,
                            attempts = entry.attempt,
                            reason = %entry.reason,
                            error = %entry.error_message,
                            points = entry.batch.data_points(),
                            "Abandoning batch"
                        );
                    }
                }
            }
        }

        summary
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    /// Earliest scheduled retry, if any.
    pub fn next_retry_time(&self) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .queue
            .iter()
            .map(|entry| entry.next_retry_at)
            .min()
    }

    pub fn pending(&self) -> Vec<PendingRetry> {
        self.state
            .lock()
            .queue
            .iter()
            .map(|entry| PendingRetry {
                batch_id: entry.batch.id.to_string(),
                attempt: entry.attempt,
                max_attempts: entry.max_attempts,
                reason: entry.reason,
                error_message: entry.error_message.clone(),
                data_points: entry.batch.data_points(),
                next_retry_at: entry.next_retry_at,
                first_failed_at: entry.first_failed_at,
            })
            .collect()
    }

    pub fn stats(&self) -> RetryStats {
        let state = self.state.lock();
        RetryStats {
            current_queue_size: state.queue.len(),
            next_retry_time: state.queue.iter().map(|entry| entry.next_retry_at).min(),
            ..state.stats.clone()
        }
    }

    pub fn reset_stats(&self) {
        let mut state = self.state.lock();
        let peak = state.queue.len();
        state.stats = RetryStats {
            max_queue_size: self.config.max_queue_size,
            peak_queue_size: peak,
            ..RetryStats::default()
        };
    }

    /// Drop every queued entry without sending. Returns how many were dropped.
    pub fn clear_queue(&self) -> usize {
        let mut state = self.state.lock();
        let cleared = state.queue.len();
        state.queue.clear();
        if cleared > 0 {
            warn!(cleared, "Cleared retry queue");
        }
        cleared
    }

    fn schedule_delay(
        &self,
        attempt: u32,
        reason: FailureReason,
        retry_after: Option<Duration>,
    ) -> Duration {
        let delay = self.calculate_backoff_delay(attempt, reason);
        match retry_after {
            Some(hint) => delay.max(hint).min(self.config.max_delay),
            None => delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::FlushTrigger;

    fn engine(config: RetryConfig) -> RetryEngine {
        RetryEngine::new(config)
    }

    fn empty_batch() -> Batch {
        Batch::assemble(Vec::new(), FlushTrigger::Manual)
    }

    #[test]
    fn test_backoff_formula() {
        let engine = engine(RetryConfig::default());
        assert_eq!(
            engine.calculate_backoff_delay(0, FailureReason::NetworkError),
            Duration::from_secs(2)
        );
        assert_eq!(
            engine.calculate_backoff_delay(2, FailureReason::Timeout),
            Duration::from_secs(8)
        );
        assert_eq!(
            engine.calculate_backoff_delay(0, FailureReason::RateLimit),
            Duration::from_secs(6)
        );
        assert_eq!(
            engine.calculate_backoff_delay(1, FailureReason::ServerError),
            Duration::from_secs(6)
        );
        assert_eq!(
            engine.calculate_backoff_delay(1, FailureReason::AuthenticationError),
            Duration::from_secs(8)
        );
    }

    #[test]
    fn test_backoff_monotone_and_capped() {
        let engine = engine(RetryConfig::default());
        for reason in [
            FailureReason::NetworkError,
            FailureReason::RateLimit,
            FailureReason::ServerError,
            FailureReason::AuthenticationError,
        ] {
            let mut previous = Duration::ZERO;
            for attempt in 0..80 {
                let delay = engine.calculate_backoff_delay(attempt, reason);
                assert!(delay >= previous);
                assert!(delay <= Duration::from_secs(300));
                previous = delay;
            }
            assert_eq!(previous, Duration::from_secs(300));
        }
    }

    #[test]
    fn test_jitter_stays_within_cap() {
        let engine = engine(RetryConfig {
            jitter: true,
            ..RetryConfig::default()
        });
        for _ in 0..100 {
            let delay = engine.calculate_backoff_delay(20, FailureReason::RateLimit);
            assert!(delay <= Duration::from_secs(300));
            assert!(delay >= Duration::from_secs(150));
        }
    }

    #[test]
    fn test_eviction_under_pressure() {
        let engine = engine(RetryConfig {
            max_queue_size: 2,
            ..RetryConfig::default()
        });
        let first = empty_batch();
        let first_id = first.id;
        assert!(engine.enqueue(first, FailureReason::NetworkError, "down"));
        assert!(engine.enqueue(empty_batch(), FailureReason::NetworkError, "down"));
        assert!(!engine.enqueue(empty_batch(), FailureReason::Timeout, "slow"));

        let stats = engine.stats();
        assert_eq!(stats.current_queue_size, 2);
        assert_eq!(stats.abandoned_entries, 1);
        assert_eq!(stats.evicted_entries, 1);
        assert!(engine.pending().iter().all(|p| p.batch_id != first_id.to_string()));
        assert_eq!(stats.retry_reasons.get(&FailureReason::NetworkError), Some(&2));
    }

    #[test]
    fn test_clear_queue() {
        let engine = engine(RetryConfig::default());
        engine.enqueue(empty_batch(), FailureReason::Unknown, "x");
        engine.enqueue(empty_batch(), FailureReason::Unknown, "y");
        assert_eq!(engine.clear_queue(), 2);
        assert!(engine.is_empty());
        assert_eq!(engine.next_retry_time(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_not_due_are_left_alone() {
        let engine = engine(RetryConfig::default());
        engine.enqueue(empty_batch(), FailureReason::RateLimit, "429");

        tokio::time::advance(Duration::from_millis(5_999)).await;
        let summary = engine
            .process_ready_entries(|_, _| async { Ok::<(), TransportError>(()) })
            .await;
        assert_eq!(summary.processed, 0);
        assert_eq!(engine.queue_len(), 1);

        tokio::time::advance(Duration::from_millis(1)).await;
        let summary = engine
            .process_ready_entries(|_, _| async { Ok::<(), TransportError>(()) })
            .await;
        assert_eq!(summary.successful, 1);
        assert!(engine.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_request_on_retry_abandons() {
        let engine = engine(RetryConfig::default());
        engine.enqueue(empty_batch(), FailureReason::ServerError, "503");
        tokio::time::advance(Duration::from_secs(300)).await;

        let summary = engine
            .process_ready_entries(|_, _| async {
                Err(TransportError::InvalidRequest {
                    status: 422,
                    message: "schema".into(),
                })
            })
            .await;
        assert_eq!(summary.abandoned, 1);
        assert_eq!(engine.stats().abandoned_entries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_extends_delay() {
        let engine = engine(RetryConfig::default());
        engine.enqueue_with(
            empty_batch(),
            FailureReason::RateLimit,
            "429",
            Some(Duration::from_secs(30)),
            None,
        );
        tokio::time::advance(Duration::from_secs(29)).await;
        let summary = engine
            .process_ready_entries(|_, _| async { Ok::<(), TransportError>(()) })
            .await;
        assert_eq!(summary.processed, 0);
    }
}
