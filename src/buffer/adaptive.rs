//! Data-rate tracking for the adaptive flush policy.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;

/// Number of recent sample timestamps used to estimate the data rate.
pub const RATE_WINDOW: usize = 100;

/// Rate above which the minimum interval applies (samples per second).
const HIGH_RATE: f64 = 1.0;
/// Rate below which the maximum interval applies (samples per second).
const LOW_RATE: f64 = 0.1;

/// Effective flush interval for an observed data rate.
///
/// Linear between the two rate thresholds and continuous at both ends:
/// a rate of exactly 1.0 yields `min`, exactly 0.1 yields `max`.
pub fn adaptive_interval(rate: f64, min: Duration, max: Duration) -> Duration {
    if rate > HIGH_RATE {
        return min;
    }
    if rate < LOW_RATE {
        return max;
    }
    let factor = (rate - LOW_RATE) / (HIGH_RATE - LOW_RATE);
    let span = max.as_secs_f64() - min.as_secs_f64();
    Duration::from_secs_f64((max.as_secs_f64() - factor * span).max(0.0))
}

#[derive(Debug, Clone)]
pub struct RateWindow {
    timestamps: VecDeque<DateTime<Utc>>,
}

impl Default for RateWindow {
    fn default() -> Self {
        Self {
            timestamps: VecDeque::with_capacity(RATE_WINDOW),
        }
    }
}

impl RateWindow {
    pub fn push(&mut self, timestamp: DateTime<Utc>) {
        if self.timestamps.len() == RATE_WINDOW {
            self.timestamps.pop_front();
        }
        self.timestamps.push_back(timestamp);
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Samples per second across the window.
    ///
    /// `None` with fewer than two timestamps or when they all coincide. The
    /// span is taken between the earliest and latest timestamp so
    /// out-of-order arrivals do not produce a negative rate.
    pub fn rate(&self) -> Option<f64> {
        if self.timestamps.len() < 2 {
            return None;
        }
        let earliest = self.timestamps.iter().min()?;
        let latest = self.timestamps.iter().max()?;
        let span = (*latest - *earliest).to_std().ok()?.as_secs_f64();
        if span > 0.0 {
            Some(self.timestamps.len() as f64 / span)
        } else {
            None
        }
    }
}
