use super::strategy::{FlushTrigger, StrategyKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Point-in-time view of the buffer engine, suitable for diagnostics output.
#[derive(Debug, Clone, Serialize)]
pub struct BufferMetrics {
    pub strategy: StrategyKind,
    pub total_entries: u64,
    pub flushes: u64,
    pub flush_triggers: BTreeMap<FlushTrigger, u64>,
    pub avg_buffer_size: f64,
    pub max_buffer_size: usize,
    pub current_buffer_size: usize,
    pub high_priority_buffer_size: usize,
    /// Samples per second observed by the adaptive policy.
    pub data_rate: f64,
    pub effective_interval_secs: f64,
    pub size_limit: usize,
    pub last_flush_time: Option<DateTime<Utc>>,
    pub last_flush_size: usize,
}

/// Accumulating counters owned by the engine.
#[derive(Debug, Clone, Default)]
pub(crate) struct BufferCounters {
    pub total_entries: u64,
    pub flushes: u64,
    pub flush_triggers: BTreeMap<FlushTrigger, u64>,
    pub avg_buffer_size: f64,
    pub max_buffer_size: usize,
    pub data_rate: f64,
    pub last_flush_time: Option<DateTime<Utc>>,
    pub last_flush_size: usize,
}

impl BufferCounters {
    pub fn record_flush(&mut self, trigger: FlushTrigger, size: usize) {
        self.flushes += 1;
        *self.flush_triggers.entry(trigger).or_insert(0) += 1;
        self.last_flush_time = Some(Utc::now());
        self.last_flush_size = size;
        // Running mean over all flushes
        self.avg_buffer_size += (size as f64 - self.avg_buffer_size) / self.flushes as f64;
    }
}
