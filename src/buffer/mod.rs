//! Sample buffering and flush scheduling.

pub mod adaptive;
pub mod metrics;
pub mod strategy;

pub use adaptive::{RATE_WINDOW, RateWindow, adaptive_interval};
pub use metrics::BufferMetrics;
pub use strategy::{BufferSettings, BufferStrategyEngine, FlushTrigger, StrategyKind};
