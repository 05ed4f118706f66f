use crate::buffer::FlushTrigger;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{error, info, warn};

const RECENT_ERRORS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransmissionStatus {
    Success,
    Failed,
    Retrying,
    Abandoned,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransmissionRecord {
    pub timestamp: DateTime<Utc>,
    pub status: TransmissionStatus,
    pub batch_id: String,
    pub data_points: usize,
    pub series_count: usize,
    pub duration_ms: f64,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub trigger: FlushTrigger,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransmissionStatistics {
    pub total_transmissions: u64,
    pub successful_transmissions: u64,
    pub failed_transmissions: u64,
    pub success_rate: f64,
    pub total_data_points_sent: u64,
    pub average_data_points_per_transmission: f64,
    pub average_transmission_duration_ms: f64,
}

/// Coarse verdict over recent transmissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineHealth {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrentStatus {
    pub status: Option<TransmissionStatus>,
    pub health: PipelineHealth,
    pub last_transmission_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub seconds_since_last_transmission: Option<f64>,
    pub seconds_since_last_success: Option<f64>,
    pub consecutive_failures: u32,
}

#[derive(Debug)]
struct TrackerState {
    history: VecDeque<TransmissionRecord>,
    recent_errors: VecDeque<(DateTime<Utc>, String)>,
    total: u64,
    successful: u64,
    failed: u64,
    data_points: u64,
    duration_ms: f64,
    consecutive_failures: u32,
    last_status: Option<TransmissionStatus>,
    last_transmission_time: Option<DateTime<Utc>>,
    last_success_time: Option<DateTime<Utc>>,
    last_failure_time: Option<DateTime<Utc>>,
}

impl TrackerState {
    fn health_at(&self, now: DateTime<Utc>) -> PipelineHealth {
        if self.total == 0 {
            return PipelineHealth::Unknown;
        }
        if self.consecutive_failures >= 5 {
            return PipelineHealth::Unhealthy;
        }
        if self.consecutive_failures >= 3 {
            return PipelineHealth::Degraded;
        }
        if self.total >= 10 {
            let rate = self.successful as f64 / self.total as f64 * 100.0;
            if rate < 50.0 {
                return PipelineHealth::Unhealthy;
            }
            if rate < 80.0 {
                return PipelineHealth::Degraded;
            }
        }
        if let Some(last) = self.last_success_time {
            let idle = (now - last).num_seconds();
            if idle > 1800 {
                return PipelineHealth::Unhealthy;
            }
            if idle > 600 {
                return PipelineHealth::Degraded;
            }
        }
        PipelineHealth::Healthy
    }

    fn new(capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity),
            recent_errors: VecDeque::with_capacity(RECENT_ERRORS),
            total: 0,
            successful: 0,
            failed: 0,
            data_points: 0,
            duration_ms: 0.0,
            consecutive_failures: 0,
            last_status: None,
            last_transmission_time: None,
            last_success_time: None,
            last_failure_time: None,
        }
    }
}

/// Bounded log of send attempts, initial and retried.
#[derive(Debug)]
pub struct TransmissionStatusTracker {
    max_history: usize,
    state: RwLock<TrackerState>,
}

impl Default for TransmissionStatusTracker {
    fn default() -> Self {
        Self::new(100)
    }
}

impl TransmissionStatusTracker {
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history,
            state: RwLock::new(TrackerState::new(max_history)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        status: TransmissionStatus,
        batch_id: impl Into<String>,
        data_points: usize,
        series_count: usize,
        duration: Duration,
        error_message: Option<String>,
        retry_count: u32,
        trigger: FlushTrigger,
    ) {
        let now = Utc::now();
        let record = TransmissionRecord {
            timestamp: now,
            status,
            batch_id: batch_id.into(),
            data_points,
            series_count,
            duration_ms: duration.as_micros() as f64 / 1000.0,
            error_message,
            retry_count,
            trigger,
        };

        let mut state = self.state.write();
        state.total += 1;
        state.last_transmission_time = Some(now);
        state.last_status = Some(status);

        match status {
            TransmissionStatus::Success => {
                state.successful += 1;
                state.consecutive_failures = 0;
                state.data_points += data_points as u64;
                state.duration_ms += record.duration_ms;
                state.last_success_time = Some(now);
                info!(
                    batch_id = %record.batch_id,
                    points = data_points,
                    series = series_count,
                    duration_ms = record.duration_ms,
                    %trigger,
                    "Transmission successful"
                );
            }
            TransmissionStatus::Failed | TransmissionStatus::Abandoned => {
                state.failed += 1;
                state.consecutive_failures += 1;
                state.last_failure_time = Some(now);
                let message = record.error_message.clone().unwrap_or_default();
                if state.recent_errors.len() == RECENT_ERRORS {
                    state.recent_errors.pop_front();
                }
                state.recent_errors.push_back((now, message));
                error!(
                    batch_id = %record.batch_id,
                    status = ?status,
                    points = data_points,
                    error = record.error_message.as_deref().unwrap_or(""),
                    consecutive_failures = state.consecutive_failures,
                    "Transmission failed"
                );
            }
            TransmissionStatus::Retrying => {
                warn!(
                    batch_id = %record.batch_id,
                    points = data_points,
                    retry_count,
                    error = record.error_message.as_deref().unwrap_or(""),
                    "Transmission retrying"
                );
            }
        }

        if state.history.len() == self.max_history {
            state.history.pop_front();
        }
        state.history.push_back(record);
    }

    pub fn current_status(&self) -> CurrentStatus {
        self.current_status_at(Utc::now())
    }

    pub fn current_status_at(&self, now: DateTime<Utc>) -> CurrentStatus {
        let state = self.state.read();
        let since = |t: Option<DateTime<Utc>>| {
            t.map(|t| (now - t).num_milliseconds() as f64 / 1000.0)
        };
        CurrentStatus {
            status: state.last_status,
            health: state.health_at(now),
            seconds_since_last_transmission: since(state.last_transmission_time),
            seconds_since_last_success: since(state.last_success_time),
            last_transmission_time: state.last_transmission_time,
            last_success_time: state.last_success_time,
            last_failure_time: state.last_failure_time,
            consecutive_failures: state.consecutive_failures,
        }
    }

    pub fn statistics(&self) -> TransmissionStatistics {
        let state = self.state.read();
        let per_success = |value: f64| {
            if state.successful == 0 {
                0.0
            } else {
                value / state.successful as f64
            }
        };
        TransmissionStatistics {
            total_transmissions: state.total,
            successful_transmissions: state.successful,
            failed_transmissions: state.failed,
            success_rate: if state.total == 0 {
                0.0
            } else {
                state.successful as f64 / state.total as f64 * 100.0
            },
            total_data_points_sent: state.data_points,
            average_data_points_per_transmission: per_success(state.data_points as f64),
            average_transmission_duration_ms: per_success(state.duration_ms),
        }
    }

    /// Most recent records, oldest first.
    pub fn recent_history(&self, limit: usize) -> Vec<TransmissionRecord> {
        let state = self.state.read();
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    pub fn recent_errors(&self) -> Vec<(DateTime<Utc>, String)> {
        self.state.read().recent_errors.iter().cloned().collect()
    }

    pub fn reset(&self) {
        *self.state.write() = TrackerState::new(self.max_history);
    }
}
