use crate::buffer::FlushTrigger;
use crate::validation::ValidationOutcome;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Prometheus error: {0}")]
    PrometheusError(#[from] prometheus::Error),
    #[error("Metrics encoding error: {0}")]
    EncodingError(#[from] std::string::FromUtf8Error),
}

/// Prometheus instruments for one forwarder pipeline.
///
/// Each instance owns its registry, so tests can build as many as they like.
#[derive(Clone)]
pub struct PipelineMetrics {
    registry: Registry,
    samples: CounterVec,
    flushes: CounterVec,
    batches: CounterVec,
    points_sent: Counter,
    retries: CounterVec,
    buffered_samples: Gauge,
    retry_queue_depth: Gauge,
    transmission_latency: Histogram,
}

impl std::fmt::Debug for PipelineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineMetrics").finish_non_exhaustive()
    }
}

impl PipelineMetrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let samples = CounterVec::new(
            Opts::new(
                "series_samples_total",
                "Samples seen by the validator, by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(samples.clone()))?;

        let flushes = CounterVec::new(
            Opts::new("series_flushes_total", "Buffer flushes, by trigger"),
            &["trigger"],
        )?;
        registry.register(Box::new(flushes.clone()))?;

        let batches = CounterVec::new(
            Opts::new("series_batches_total", "Batch transmissions, by status"),
            &["status"], // success, failure, dropped
        )?;
        registry.register(Box::new(batches.clone()))?;

        let points_sent = Counter::new(
            "series_points_sent_total",
            "Data points delivered to the endpoint",
        )?;
        registry.register(Box::new(points_sent.clone()))?;

        let retries = CounterVec::new(
            Opts::new("series_retries_total", "Retry outcomes"),
            &["outcome"], // success, requeued, abandoned
        )?;
        registry.register(Box::new(retries.clone()))?;

        let buffered_samples = Gauge::new(
            "series_buffered_samples",
            "Samples currently waiting in the buffer",
        )?;
        registry.register(Box::new(buffered_samples.clone()))?;

        let retry_queue_depth = Gauge::new(
            "series_retry_queue_depth",
            "Batches currently waiting for retry",
        )?;
        registry.register(Box::new(retry_queue_depth.clone()))?;

        let transmission_latency = Histogram::with_opts(HistogramOpts::new(
            "series_transmission_latency_seconds",
            "Endpoint call latency in seconds",
        ))?;
        registry.register(Box::new(transmission_latency.clone()))?;

        Ok(Self {
            registry,
            samples,
            flushes,
            batches,
            points_sent,
            retries,
            buffered_samples,
            retry_queue_depth,
            transmission_latency,
        })
    }

    pub fn record_sample(&self, outcome: ValidationOutcome) {
        self.samples.with_label_values(&[outcome.as_str()]).inc();
    }

    pub fn record_flush(&self, trigger: FlushTrigger) {
        self.flushes.with_label_values(&[trigger.as_str()]).inc();
    }

    pub fn record_transmission(&self, success: bool, points: usize, latency: Duration) {
        let status = if success { "success" } else { "failure" };
        self.batches.with_label_values(&[status]).inc();
        if success {
            self.points_sent.inc_by(points as f64);
        }
        self.transmission_latency.observe(latency.as_secs_f64());
    }

    pub fn record_dropped_batch(&self) {
        self.batches.with_label_values(&["dropped"]).inc();
    }

    pub fn record_retry(&self, outcome: &str, count: usize) {
        if count > 0 {
            self.retries
                .with_label_values(&[outcome])
                .inc_by(count as f64);
        }
    }

    pub fn set_buffered_samples(&self, count: usize) {
        self.buffered_samples.set(count as f64);
    }

    pub fn set_retry_queue_depth(&self, depth: usize) {
        self.retry_queue_depth.set(depth as f64);
    }

    pub fn export(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;

        Ok(String::from_utf8(buffer)?)
    }
}
