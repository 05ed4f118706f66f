use crate::sender::{FailureReason, TransportError, classify, classify_message};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

const LATENCY_HISTORY: usize = 100;
const ERROR_HISTORY: usize = 50;
const UTILIZATION_HISTORY: usize = 100;
const REPORTED_ERRORS: usize = 10;
const ERROR_MESSAGE_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Critical,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl HealthStatus {
    pub fn from_score(score: i32) -> Self {
        match score {
            s if s >= 90 => HealthStatus::Excellent,
            s if s >= 75 => HealthStatus::Good,
            s if s >= 50 => HealthStatus::Fair,
            s if s >= 25 => HealthStatus::Poor,
            _ => HealthStatus::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Excellent => "excellent",
            HealthStatus::Good => "good",
            HealthStatus::Fair => "fair",
            HealthStatus::Poor => "poor",
            HealthStatus::Critical => "critical",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordedError {
    pub timestamp: DateTime<Utc>,
    pub endpoint: String,
    pub reason: FailureReason,
    pub message: String,
}

#[derive(Debug)]
struct HealthState {
    api_calls_total: u64,
    api_calls_successful: u64,
    api_calls_failed: u64,
    /// Latencies of successful calls, in milliseconds.
    latencies: VecDeque<f64>,
    errors: VecDeque<RecordedError>,
    error_frequencies: BTreeMap<FailureReason, u64>,
    consecutive_failures: u32,

    transmissions_total: u64,
    transmissions_successful: u64,
    transmissions_failed: u64,
    data_points_sent: u64,
    last_successful_transmission: Option<DateTime<Utc>>,
    last_failed_transmission: Option<DateTime<Utc>>,

    utilization: VecDeque<f64>,
    buffer_overflows: u64,
    near_capacity_count: u64,

    started_at: DateTime<Utc>,
}

impl HealthState {
    fn new() -> Self {
        Self {
            api_calls_total: 0,
            api_calls_successful: 0,
            api_calls_failed: 0,
            latencies: VecDeque::with_capacity(LATENCY_HISTORY),
            errors: VecDeque::with_capacity(ERROR_HISTORY),
            error_frequencies: BTreeMap::new(),
            consecutive_failures: 0,
            transmissions_total: 0,
            transmissions_successful: 0,
            transmissions_failed: 0,
            data_points_sent: 0,
            last_successful_transmission: None,
            last_failed_transmission: None,
            utilization: VecDeque::with_capacity(UTILIZATION_HISTORY),
            buffer_overflows: 0,
            near_capacity_count: 0,
            started_at: Utc::now(),
        }
    }

    fn api_success_rate(&self) -> Option<f64> {
        percentage(self.api_calls_successful, self.api_calls_total)
    }

    fn transmission_success_rate(&self) -> Option<f64> {
        percentage(self.transmissions_successful, self.transmissions_total)
    }

    fn average_latency(&self) -> Option<f64> {
        if self.latencies.is_empty() {
            None
        } else {
            Some(self.latencies.iter().sum::<f64>() / self.latencies.len() as f64)
        }
    }

    fn since_last_success(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.last_successful_transmission.map(|last| now - last)
    }
}

fn percentage(part: u64, total: u64) -> Option<f64> {
    (total > 0).then(|| part as f64 / total as f64 * 100.0)
}

fn rate_penalty(rate: Option<f64>) -> i32 {
    match rate {
        Some(r) if r < 50.0 => 30,
        Some(r) if r < 80.0 => 20,
        Some(r) if r < 95.0 => 10,
        _ => 0,
    }
}

fn push_bounded<T>(history: &mut VecDeque<T>, value: T, limit: usize) {
    if history.len() == limit {
        history.pop_front();
    }
    history.push_back(value);
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiPerformance {
    pub calls_total: u64,
    pub calls_successful: u64,
    pub calls_failed: u64,
    pub success_rate: f64,
    pub avg_response_time_ms: Option<f64>,
    pub median_response_time_ms: Option<f64>,
    pub min_response_time_ms: Option<f64>,
    pub max_response_time_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransmissionHealth {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub data_points_sent: u64,
    pub last_successful: Option<DateTime<Utc>>,
    pub last_failed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BufferHealth {
    pub average_utilization_percent: f64,
    pub overflows: u64,
    pub near_capacity_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorSummary {
    pub consecutive_failures: u32,
    pub total_errors: u64,
    pub error_types: BTreeMap<FailureReason, u64>,
    pub recent_errors: Vec<RecordedError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Uptime {
    pub seconds: f64,
    pub hours: f64,
    pub days: f64,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub health_status: HealthStatus,
    pub health_score: i32,
    pub api_performance: ApiPerformance,
    pub transmission_stats: TransmissionHealth,
    pub buffer_stats: BufferHealth,
    pub error_summary: ErrorSummary,
    pub uptime: Uptime,
    pub recommendations: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

/// Passive observer of pipeline outcomes.
///
/// Components push events through the `record_*` methods; nothing here calls
/// back into the pipeline.
#[derive(Debug)]
pub struct HealthMonitor {
    state: RwLock<HealthState>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HealthState::new()),
        }
    }

    /// Record one call to the remote endpoint.
    pub fn record_call(
        &self,
        duration: Duration,
        success: bool,
        endpoint: &str,
        error: Option<&TransportError>,
    ) {
        let message = error.map(ToString::to_string).unwrap_or_default();
        let reason = error.map_or_else(|| classify_message(&message).reason, |e| classify(e).reason);
        self.record_call_inner(duration, success, endpoint, reason, message);
    }

    /// Record a failed call known only by its message.
    pub fn record_call_message(&self, duration: Duration, success: bool, endpoint: &str, message: &str) {
        let reason = classify_message(message).reason;
        self.record_call_inner(duration, success, endpoint, reason, message.to_string());
    }

    fn record_call_inner(
        &self,
        duration: Duration,
        success: bool,
        endpoint: &str,
        reason: FailureReason,
        message: String,
    ) {
        let duration_ms = duration.as_micros() as f64 / 1000.0;
        let mut state = self.state.write();
        state.api_calls_total += 1;

        if success {
            state.api_calls_successful += 1;
            state.consecutive_failures = 0;
            push_bounded(&mut state.latencies, duration_ms, LATENCY_HISTORY);
        } else {
            state.api_calls_failed += 1;
            state.consecutive_failures += 1;
            *state.error_frequencies.entry(reason).or_insert(0) += 1;
            let message: String = message.chars().take(ERROR_MESSAGE_LIMIT).collect();
            push_bounded(
                &mut state.errors,
                RecordedError {
                    timestamp: Utc::now(),
                    endpoint: endpoint.to_string(),
                    reason,
                    message,
                },
                ERROR_HISTORY,
            );
        }

        debug!(endpoint, duration_ms, success, "Recorded API call");
    }

    pub fn record_transmission(&self, success: bool, data_points: usize) {
        let now = Utc::now();
        let mut state = self.state.write();
        state.transmissions_total += 1;
        if success {
            state.transmissions_successful += 1;
            state.data_points_sent += data_points as u64;
            state.last_successful_transmission = Some(now);
        } else {
            state.transmissions_failed += 1;
            state.last_failed_transmission = Some(now);
        }
    }

    /// Record buffer fill against its nominal capacity.
    ///
    /// Reaching the capacity is normal for a size-triggered flush, so only a
    /// buffer strictly above capacity counts as an overflow.
    pub fn record_buffer_utilization(&self, current: usize, max: usize) {
        if max == 0 {
            return;
        }
        let mut state = self.state.write();
        let utilization = current as f64 / max as f64 * 100.0;
        push_bounded(&mut state.utilization, utilization, UTILIZATION_HISTORY);

        if current > max {
            state.buffer_overflows += 1;
        }
        if current as f64 >= max as f64 * 0.9 {
            state.near_capacity_count += 1;
        }
    }

    pub fn health_score(&self) -> i32 {
        self.health_score_at(Utc::now())
    }

    pub fn health_score_at(&self, now: DateTime<Utc>) -> i32 {
        let state = self.state.read();
        let mut score = 100;

        score -= rate_penalty(state.api_success_rate());
        score -= rate_penalty(state.transmission_success_rate());

        score -= match state.consecutive_failures {
            n if n >= 10 => 20,
            n if n >= 5 => 15,
            n if n >= 3 => 10,
            _ => 0,
        };

        score -= match state.buffer_overflows {
            n if n > 10 => 10,
            n if n > 5 => 5,
            _ => 0,
        };

        if let Some(since) = state.since_last_success(now) {
            if since > TimeDelta::minutes(30) {
                score -= 10;
            } else if since > TimeDelta::minutes(10) {
                score -= 5;
            }
        }

        score
    }

    pub fn get_health_status(&self) -> HealthStatus {
        HealthStatus::from_score(self.health_score())
    }

    pub fn get_health_status_at(&self, now: DateTime<Utc>) -> HealthStatus {
        HealthStatus::from_score(self.health_score_at(now))
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.read().consecutive_failures
    }

    pub fn recommendations(&self) -> Vec<String> {
        self.recommendations_at(Utc::now())
    }

    pub fn recommendations_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let state = self.state.read();
        let mut recommendations = Vec::new();

        if state.api_calls_total > 10
            && let Some(rate) = state.api_success_rate()
            && rate < 80.0
        {
            recommendations.push(format!(
                "Low API success rate ({rate:.1}%). Check network connectivity and endpoint credentials."
            ));
        }

        if state.consecutive_failures >= 5 {
            recommendations.push(format!(
                "{} consecutive failures detected. Check error logs and the remote store status.",
                state.consecutive_failures
            ));
        }

        if state.buffer_overflows > 5 {
            recommendations.push(format!(
                "{} buffer overflows detected. Consider a larger batch size or a shorter batch interval.",
                state.buffer_overflows
            ));
        }

        if let Some(avg) = state.average_latency()
            && avg > 5000.0
        {
            recommendations.push(format!(
                "High average API response time ({avg:.0}ms). Check network latency or remote store status."
            ));
        }

        if let Some(since) = state.since_last_success(now)
            && since > TimeDelta::minutes(30)
        {
            recommendations.push(format!(
                "No successful transmission in {} minutes. Check pipeline status.",
                since.num_minutes()
            ));
        }

        if state.error_frequencies.contains_key(&FailureReason::RateLimit) {
            recommendations.push(
                "Rate limit errors detected. Consider increasing batch_interval or reducing stream count."
                    .to_string(),
            );
        }

        if state
            .error_frequencies
            .contains_key(&FailureReason::AuthenticationError)
        {
            recommendations
                .push("Authentication errors detected. Verify the endpoint auth token.".to_string());
        }

        if recommendations.is_empty() {
            recommendations.push("Pipeline is operating normally.".to_string());
        }
        recommendations
    }

    pub fn get_comprehensive_report(&self) -> HealthReport {
        let now = Utc::now();
        let health_score = self.health_score_at(now);
        let recommendations = self.recommendations_at(now);
        let state = self.state.read();

        let mut sorted: Vec<f64> = state.latencies.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let median = match sorted.len() {
            0 => None,
            n if n % 2 == 1 => Some(sorted[n / 2]),
            n => Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0),
        };

        let api_performance = ApiPerformance {
            calls_total: state.api_calls_total,
            calls_successful: state.api_calls_successful,
            calls_failed: state.api_calls_failed,
            success_rate: state.api_success_rate().unwrap_or(0.0),
            avg_response_time_ms: state.average_latency(),
            median_response_time_ms: median,
            min_response_time_ms: sorted.first().copied(),
            max_response_time_ms: sorted.last().copied(),
        };

        let transmission_stats = TransmissionHealth {
            total: state.transmissions_total,
            successful: state.transmissions_successful,
            failed: state.transmissions_failed,
            success_rate: state.transmission_success_rate().unwrap_or(0.0),
            data_points_sent: state.data_points_sent,
            last_successful: state.last_successful_transmission,
            last_failed: state.last_failed_transmission,
        };

        let average_utilization_percent = if state.utilization.is_empty() {
            0.0
        } else {
            state.utilization.iter().sum::<f64>() / state.utilization.len() as f64
        };

        let skip = state.errors.len().saturating_sub(REPORTED_ERRORS);
        let error_summary = ErrorSummary {
            consecutive_failures: state.consecutive_failures,
            total_errors: state.error_frequencies.values().sum(),
            error_types: state.error_frequencies.clone(),
            recent_errors: state.errors.iter().skip(skip).cloned().collect(),
        };

        let uptime_secs = (now - state.started_at).num_milliseconds() as f64 / 1000.0;

        HealthReport {
            health_status: HealthStatus::from_score(health_score),
            health_score,
            api_performance,
            transmission_stats,
            buffer_stats: BufferHealth {
                average_utilization_percent,
                overflows: state.buffer_overflows,
                near_capacity_count: state.near_capacity_count,
            },
            error_summary,
            uptime: Uptime {
                seconds: uptime_secs,
                hours: uptime_secs / 3600.0,
                days: uptime_secs / 86_400.0,
                start_time: state.started_at,
            },
            recommendations,
            generated_at: now,
        }
    }

    pub fn reset(&self) {
        *self.state.write() = HealthState::new();
        info!("Reset health monitor metrics");
    }

    #[cfg(test)]
    fn set_last_success(&self, at: DateTime<Utc>) {
        self.state.write().last_successful_transmission = Some(at);
    }
}
