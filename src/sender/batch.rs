use crate::buffer::FlushTrigger;
use crate::domain::BufferEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Dense, time-aligned batch ready for transmission.
///
/// `times` is strictly increasing and every series has exactly `times.len()`
/// slots. `None` marks a stream with no sample at that timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Stable across retries so the remote store can deduplicate.
    pub id: Uuid,
    pub trigger: FlushTrigger,
    pub times: Vec<DateTime<Utc>>,
    pub series: BTreeMap<String, Vec<Option<f64>>>,
}

impl Batch {
    /// Pivot flushed entries into the dense representation.
    ///
    /// Timestamps from every stream are merged, sorted and deduplicated. When
    /// a stream has several samples at the same timestamp the latest arrival
    /// wins.
    pub fn assemble(entries: Vec<BufferEntry>, trigger: FlushTrigger) -> Self {
        let mut times: Vec<DateTime<Utc>> =
            entries.iter().map(|entry| entry.sample.timestamp).collect();
        times.sort_unstable();
        times.dedup();

        let width = times.len();
        let mut series: BTreeMap<String, Vec<Option<f64>>> = BTreeMap::new();
        for entry in entries {
            let sample = entry.sample;
            let Ok(slot) = times.binary_search(&sample.timestamp) else {
                continue;
            };
            series
                .entry(sample.stream_id)
                .or_insert_with(|| vec![None; width])[slot] = Some(sample.value);
        }

        Self {
            id: Uuid::new_v4(),
            trigger,
            times,
            series,
        }
    }

    /// Number of non-empty cells.
    pub fn data_points(&self) -> usize {
        self.series
            .values()
            .map(|values| values.iter().filter(|v| v.is_some()).count())
            .sum()
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((*self.times.first()?, *self.times.last()?))
    }
}
