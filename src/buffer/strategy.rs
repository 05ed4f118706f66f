use super::adaptive::{RateWindow, adaptive_interval};
use super::metrics::{BufferCounters, BufferMetrics};
use crate::domain::{BufferEntry, Priority};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::mem;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Why a buffer was drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushTrigger {
    TimeInterval,
    SizeLimit,
    Priority,
    Manual,
    Shutdown,
    Adaptive,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::TimeInterval => "time_interval",
            FlushTrigger::SizeLimit => "size_limit",
            FlushTrigger::Priority => "priority",
            FlushTrigger::Manual => "manual",
            FlushTrigger::Shutdown => "shutdown",
            FlushTrigger::Adaptive => "adaptive",
        }
    }
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flush policy selector as it appears in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Flush every `time_interval`
    Time,
    /// Flush when `size_limit` samples are buffered
    Size,
    /// Time first, then size
    #[default]
    Hybrid,
    /// Flush high-priority samples immediately
    Priority,
    /// Interval follows the observed data rate
    Adaptive,
}

#[derive(Debug, Clone)]
pub struct BufferSettings {
    pub strategy: StrategyKind,
    pub time_interval: Duration,
    pub size_limit: usize,
    pub adaptive_min_interval: Duration,
    pub adaptive_max_interval: Duration,
    pub priority_threshold: Priority,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Hybrid,
            time_interval: Duration::from_secs(300),
            size_limit: 100,
            adaptive_min_interval: Duration::from_secs(60),
            adaptive_max_interval: Duration::from_secs(600),
            priority_threshold: Priority::High,
        }
    }
}

/// Active flush policy together with the state only that policy needs.
#[derive(Debug)]
enum Policy {
    TimeInterval {
        interval: Duration,
    },
    SizeLimit {
        limit: usize,
    },
    Hybrid {
        interval: Duration,
        limit: usize,
    },
    Priority {
        threshold: Priority,
        limit: usize,
        interval: Duration,
        high: Vec<BufferEntry>,
    },
    Adaptive {
        min_interval: Duration,
        max_interval: Duration,
        limit: usize,
        window: RateWindow,
        current_interval: Duration,
    },
}

impl Policy {
    fn from_settings(settings: &BufferSettings) -> Self {
        match settings.strategy {
            StrategyKind::Time => Policy::TimeInterval {
                interval: settings.time_interval,
            },
            StrategyKind::Size => Policy::SizeLimit {
                limit: settings.size_limit,
            },
            StrategyKind::Hybrid => Policy::Hybrid {
                interval: settings.time_interval,
                limit: settings.size_limit,
            },
            StrategyKind::Priority => Policy::Priority {
                threshold: settings.priority_threshold,
                limit: settings.size_limit,
                interval: settings.time_interval,
                high: Vec::new(),
            },
            StrategyKind::Adaptive => Policy::Adaptive {
                min_interval: settings.adaptive_min_interval,
                max_interval: settings.adaptive_max_interval,
                limit: settings.size_limit,
                window: RateWindow::default(),
                current_interval: settings
                    .time_interval
                    .max(settings.adaptive_min_interval)
                    .min(settings.adaptive_max_interval),
            },
        }
    }
}

/// Accumulates validated samples and decides when they should be flushed.
///
/// The engine is not synchronized on its own. Callers hold it behind a single
/// lock so that `add` and `get_flush_data` never interleave.
#[derive(Debug)]
pub struct BufferStrategyEngine {
    settings: BufferSettings,
    policy: Policy,
    entries: Vec<BufferEntry>,
    last_flush: Instant,
    counters: BufferCounters,
}

impl BufferStrategyEngine {
    pub fn new(settings: BufferSettings) -> Self {
        info!(
            strategy = ?settings.strategy,
            time_interval_secs = settings.time_interval.as_secs(),
            size_limit = settings.size_limit,
            "Initialized buffer strategy engine"
        );
        Self {
            policy: Policy::from_settings(&settings),
            settings,
            entries: Vec::new(),
            last_flush: Instant::now(),
            counters: BufferCounters::default(),
        }
    }

    pub fn strategy(&self) -> StrategyKind {
        self.settings.strategy
    }

    /// Buffer an entry and report whether a flush is now due.
    pub fn add(&mut self, entry: BufferEntry) -> Option<FlushTrigger> {
        self.counters.total_entries += 1;

        match &mut self.policy {
            Policy::Priority {
                threshold, high, ..
            } if entry.priority.is_some_and(|p| p >= *threshold) => high.push(entry),
            Policy::Adaptive { window, .. } => {
                window.push(entry.sample.timestamp);
                self.entries.push(entry);
            }
            _ => self.entries.push(entry),
        }

        let size = self.len();
        if size > self.counters.max_buffer_size {
            self.counters.max_buffer_size = size;
        }

        self.should_flush()
    }

    /// Evaluate the active policy against the current buffer contents.
    ///
    /// An empty buffer never asks for a flush.
    pub fn should_flush(&mut self) -> Option<FlushTrigger> {
        self.should_flush_at(Instant::now())
    }

    pub fn should_flush_at(&mut self, now: Instant) -> Option<FlushTrigger> {
        let size = self.len();
        if size == 0 {
            return None;
        }
        let elapsed = now.saturating_duration_since(self.last_flush);

        let trigger = match &mut self.policy {
            Policy::TimeInterval { interval } => {
                (elapsed >= *interval).then_some(FlushTrigger::TimeInterval)
            }
            Policy::SizeLimit { limit } => (size >= *limit).then_some(FlushTrigger::SizeLimit),
            Policy::Hybrid { interval, limit } => {
                if elapsed >= *interval {
                    Some(FlushTrigger::TimeInterval)
                } else if size >= *limit {
                    Some(FlushTrigger::SizeLimit)
                } else {
                    None
                }
            }
            Policy::Priority {
                limit,
                interval,
                high,
                ..
            } => {
                if !high.is_empty() {
                    Some(FlushTrigger::Priority)
                } else if size >= *limit {
                    Some(FlushTrigger::SizeLimit)
                } else if elapsed >= *interval {
                    Some(FlushTrigger::TimeInterval)
                } else {
                    None
                }
            }
            Policy::Adaptive {
                min_interval,
                max_interval,
                limit,
                window,
                current_interval,
            } => {
                if let Some(rate) = window.rate() {
                    self.counters.data_rate = rate;
                    *current_interval = adaptive_interval(rate, *min_interval, *max_interval);
                    debug!(
                        rate,
                        interval_secs = current_interval.as_secs_f64(),
                        "Adaptive interval updated"
                    );
                }
                if elapsed >= *current_interval {
                    Some(FlushTrigger::Adaptive)
                } else if size >= *limit {
                    Some(FlushTrigger::SizeLimit)
                } else {
                    None
                }
            }
        };

        if let Some(trigger) = trigger {
            debug!(%trigger, size, elapsed_secs = elapsed.as_secs_f64(), "Flush due");
        }
        trigger
    }

    /// Drain the entries selected by `trigger` and reset the flush clock.
    ///
    /// A `Priority` trigger drains only the high-priority sub-buffer; every
    /// other trigger drains everything.
    pub fn get_flush_data(&mut self, trigger: FlushTrigger) -> Vec<BufferEntry> {
        let data = match (&mut self.policy, trigger) {
            (Policy::Priority { high, .. }, FlushTrigger::Priority) => mem::take(high),
            (Policy::Priority { high, .. }, _) => {
                let mut data = mem::take(high);
                data.append(&mut self.entries);
                data
            }
            _ => mem::take(&mut self.entries),
        };
        if data.is_empty() {
            debug!(%trigger, "Nothing to flush for trigger");
            return data;
        }

        self.counters.record_flush(trigger, data.len());
        self.last_flush = Instant::now();

        info!(%trigger, entries = data.len(), "Flushing buffer");
        data
    }

    pub fn manual_flush(&mut self) -> Vec<BufferEntry> {
        self.get_flush_data(FlushTrigger::Manual)
    }

    pub fn shutdown_flush(&mut self) -> Vec<BufferEntry> {
        self.get_flush_data(FlushTrigger::Shutdown)
    }

    /// Total buffered entries across all sub-buffers.
    pub fn len(&self) -> usize {
        self.entries.len() + self.high_priority_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn high_priority_len(&self) -> usize {
        match &self.policy {
            Policy::Priority { high, .. } => high.len(),
            _ => 0,
        }
    }

    /// Flush interval currently in force.
    pub fn effective_interval(&self) -> Duration {
        match &self.policy {
            Policy::TimeInterval { interval }
            | Policy::Hybrid { interval, .. }
            | Policy::Priority { interval, .. } => *interval,
            Policy::SizeLimit { .. } => self.settings.time_interval,
            Policy::Adaptive {
                current_interval, ..
            } => *current_interval,
        }
    }

    pub fn size_limit(&self) -> usize {
        self.settings.size_limit
    }

    pub fn metrics(&self) -> BufferMetrics {
        BufferMetrics {
            strategy: self.settings.strategy,
            total_entries: self.counters.total_entries,
            flushes: self.counters.flushes,
            flush_triggers: self.counters.flush_triggers.clone(),
            avg_buffer_size: self.counters.avg_buffer_size,
            max_buffer_size: self.counters.max_buffer_size,
            current_buffer_size: self.len(),
            high_priority_buffer_size: self.high_priority_len(),
            data_rate: self.counters.data_rate,
            effective_interval_secs: self.effective_interval().as_secs_f64(),
            size_limit: self.settings.size_limit,
            last_flush_time: self.counters.last_flush_time,
            last_flush_size: self.counters.last_flush_size,
        }
    }

    /// Zero the counters. Buffered entries and the flush clock are untouched.
    pub fn reset_metrics(&mut self) {
        self.counters = BufferCounters::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Sample;
    use chrono::{DateTime, TimeDelta, Utc};

    fn base_time() -> DateTime<Utc> {
        "2024-01-01T00:00:00Z".parse().unwrap()
    }

    fn entry(stream: &str, offset_secs: i64) -> BufferEntry {
        BufferEntry::new(Sample::new(
            stream,
            offset_secs as f64,
            base_time() + TimeDelta::seconds(offset_secs),
        ))
    }

    fn engine(strategy: StrategyKind) -> BufferStrategyEngine {
        BufferStrategyEngine::new(BufferSettings {
            strategy,
            ..BufferSettings::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_limit_exactness() {
        let mut engine = engine(StrategyKind::Size);
        for i in 0..99 {
            assert_eq!(engine.add(entry("s1", i)), None);
        }
        assert_eq!(engine.add(entry("s1", 99)), Some(FlushTrigger::SizeLimit));

        let data = engine.get_flush_data(FlushTrigger::SizeLimit);
        assert_eq!(data.len(), 100);
        assert_eq!(engine.len(), 0);
        assert_eq!(engine.should_flush(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_interval_policy() {
        let mut engine = engine(StrategyKind::Time);
        assert_eq!(engine.add(entry("s1", 0)), None);

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(engine.should_flush(), None);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(engine.should_flush(), Some(FlushTrigger::TimeInterval));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_buffer_never_flushes() {
        let mut engine = engine(StrategyKind::Time);
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(engine.should_flush(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hybrid_prefers_time_over_size() {
        let mut engine = engine(StrategyKind::Hybrid);
        for i in 0..50 {
            engine.add(entry("s1", i));
        }
        tokio::time::advance(Duration::from_secs(300)).await;
        for i in 50..99 {
            engine.add(entry("s1", i));
        }
        assert_eq!(engine.add(entry("s1", 99)), Some(FlushTrigger::TimeInterval));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_resets_clock() {
        let mut engine = engine(StrategyKind::Hybrid);
        engine.add(entry("s1", 0));
        tokio::time::advance(Duration::from_secs(300)).await;
        assert_eq!(engine.should_flush(), Some(FlushTrigger::TimeInterval));
        engine.get_flush_data(FlushTrigger::TimeInterval);

        engine.add(entry("s1", 1));
        assert_eq!(engine.should_flush(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_drains_only_high_buffer() {
        let mut engine = engine(StrategyKind::Priority);
        let low = entry("sensor.low", 0);
        assert_eq!(engine.add(low), None);

        let high = BufferEntry::with_priority(Sample::new("alarm", 1.0, base_time()), Priority::High);
        assert_eq!(engine.add(high), Some(FlushTrigger::Priority));
        assert_eq!(engine.high_priority_len(), 1);

        let data = engine.get_flush_data(FlushTrigger::Priority);
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].sample.stream_id, "alarm");
        assert_eq!(engine.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_priority_drain_is_not_counted() {
        let mut engine = engine(StrategyKind::Priority);
        engine.add(entry("sensor.low", 0));
        tokio::time::advance(Duration::from_secs(120)).await;

        assert!(engine.get_flush_data(FlushTrigger::Priority).is_empty());
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.metrics().flushes, 0);
        assert_eq!(engine.metrics().last_flush_time, None);

        // The interval clock was not reset by the empty drain
        tokio::time::advance(Duration::from_secs(180)).await;
        assert_eq!(engine.should_flush(), Some(FlushTrigger::TimeInterval));
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_threshold_and_fallbacks() {
        let mut engine = BufferStrategyEngine::new(BufferSettings {
            strategy: StrategyKind::Priority,
            priority_threshold: Priority::Medium,
            size_limit: 3,
            ..BufferSettings::default()
        });
        let medium = BufferEntry::with_priority(Sample::new("m", 1.0, base_time()), Priority::Medium);
        assert_eq!(engine.add(medium), Some(FlushTrigger::Priority));
        engine.get_flush_data(FlushTrigger::Priority);

        let low = |i: i64| {
            BufferEntry::with_priority(Sample::new("l", i as f64, base_time()), Priority::Low)
        };
        assert_eq!(engine.add(low(0)), None);
        assert_eq!(engine.add(low(1)), None);
        assert_eq!(engine.add(low(2)), Some(FlushTrigger::SizeLimit));
        assert_eq!(engine.get_flush_data(FlushTrigger::SizeLimit).len(), 3);

        engine.add(low(3));
        tokio::time::advance(Duration::from_secs(300)).await;
        assert_eq!(engine.should_flush(), Some(FlushTrigger::TimeInterval));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_flush_drains_all_sub_buffers() {
        let mut engine = engine(StrategyKind::Priority);
        engine.add(entry("s1", 0));
        engine.add(BufferEntry::with_priority(
            Sample::new("alarm", 1.0, base_time()),
            Priority::High,
        ));
        let data = engine.manual_flush();
        assert_eq!(data.len(), 2);
        assert!(engine.is_empty());
        assert_eq!(engine.metrics().flush_triggers.get(&FlushTrigger::Manual), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_adaptive_high_rate_uses_min_interval() {
        let mut engine = engine(StrategyKind::Adaptive);
        // Ten samples 900ms apart is a rate above 1/s
        for i in 0..10 {
            engine.add(BufferEntry::new(Sample::new(
                "s1",
                1.0,
                base_time() + TimeDelta::milliseconds(i * 900),
            )));
        }
        assert_eq!(engine.effective_interval(), Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(engine.should_flush(), Some(FlushTrigger::Adaptive));
    }

    #[tokio::test(start_paused = true)]
    async fn test_adaptive_low_rate_uses_max_interval() {
        let mut engine = engine(StrategyKind::Adaptive);
        for i in 0..5 {
            engine.add(entry("s1", i * 60));
        }
        assert_eq!(engine.effective_interval(), Duration::from_secs(600));
        tokio::time::advance(Duration::from_secs(599)).await;
        assert_eq!(engine.should_flush(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_tracking() {
        let mut engine = engine(StrategyKind::Size);
        for i in 0..100 {
            engine.add(entry("s1", i));
        }
        engine.get_flush_data(FlushTrigger::SizeLimit);
        for i in 0..50 {
            engine.add(entry("s1", i));
        }
        engine.manual_flush();

        let metrics = engine.metrics();
        assert_eq!(metrics.total_entries, 150);
        assert_eq!(metrics.flushes, 2);
        assert_eq!(metrics.max_buffer_size, 100);
        assert!((metrics.avg_buffer_size - 75.0).abs() < f64::EPSILON);
        assert_eq!(metrics.last_flush_size, 50);
        assert!(metrics.last_flush_time.is_some());

        engine.reset_metrics();
        assert_eq!(engine.metrics().flushes, 0);
    }
}
