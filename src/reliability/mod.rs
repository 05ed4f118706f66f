pub mod health;
pub mod metrics;
pub mod retry;
pub mod status;

pub use health::{
    ApiPerformance, BufferHealth, ErrorSummary, HealthMonitor, HealthReport, HealthStatus,
    RecordedError, TransmissionHealth, Uptime,
};
pub use metrics::{MetricsError, PipelineMetrics};
pub use retry::{
    PendingRetry, ProcessSummary, RetryConfig, RetryEngine, RetryEntry, RetryStats,
    SuccessCallback,
};
pub use status::{
    CurrentStatus, PipelineHealth, TransmissionRecord, TransmissionStatistics,
    TransmissionStatus, TransmissionStatusTracker,
};
