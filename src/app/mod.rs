pub mod config;
pub mod coordinator;
pub mod diagnostics;
pub mod logging;
pub mod pipeline;
pub mod service;
pub mod shutdown;

pub use config::{Config, ConfigError, LogFormat, LogLevel, Profile};
pub use coordinator::{
    Coordinator, CoordinatorSettings, CoordinatorStats, Diagnostics, FlushOutcome,
};
pub use diagnostics::DiagnosticsError;
pub use logging::{LoggingError, setup_logging_safe};
pub use service::{ServiceError, ServiceManager, ShutdownReport};
pub use shutdown::{ShutdownHandle, ShutdownReason};

use crate::reliability::HealthReport;
use crate::sender::HttpTransport;
use crate::source::{FeedStats, ObservationInput, SourceError, spawn_feed};
use std::process;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{error, info};

/// Observations parsed ahead of ingestion before the feed blocks.
const OBSERVATION_CHANNEL_CAPACITY: usize = 10_000;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub struct App {
    config: Config,
    service_manager: ServiceManager<HttpTransport>,
}

impl App {
    pub fn from_args<I, T>(args: I) -> Result<Self, BoxError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::from_args_and_env(args)?;
        Self::from_config(config)
    }

    pub fn from_config(config: Config) -> Result<Self, BoxError> {
        setup_logging_safe(config.log_level, config.log_format)?;

        info!("Starting series-forwarder v{}", env!("CARGO_PKG_VERSION"));
        if let Some(path) = &config.config_file {
            info!(path = %path.display(), "Configuration loaded from file");
        }

        let service_manager = ServiceManager::new(config.clone())?;
        Ok(Self {
            config,
            service_manager,
        })
    }

    /// Run until the observation input is exhausted or a shutdown signal
    /// arrives, then shut down gracefully.
    pub async fn run(self) -> Result<(), BoxError> {
        let Self {
            config,
            mut service_manager,
        } = self;

        let shutdown = ShutdownHandle::new();
        let token = shutdown.token();
        let signals = shutdown.listen_for_signals();

        let (tx, rx) = mpsc::channel(OBSERVATION_CHANNEL_CAPACITY);
        let mut feed = spawn_feed(ObservationInput::from_arg(&config.input), tx, token.clone());
        service_manager.start(rx)?;
        info!("series-forwarder is running. Press Ctrl+C to stop.");

        let finished_feed = tokio::select! {
            joined = &mut feed => Some(joined),
            () = token.cancelled() => None,
        };

        let reason = if finished_feed.is_some() {
            shutdown.trigger();
            ShutdownReason::InputExhausted
        } else {
            signals
                .await
                .ok()
                .flatten()
                .unwrap_or(ShutdownReason::Interrupt)
        };
        info!(?reason, "Stopping series-forwarder");

        let report = service_manager.shutdown().await?;
        info!(
            consumed = report.consumed,
            outcome = ?report.outcome,
            inflight_flush_abandoned = report.inflight_flush_abandoned,
            "series-forwarder stopped."
        );

        let joined = match finished_feed {
            Some(joined) => joined,
            None => feed.await,
        };
        let stats = feed_result(joined)?;
        info!(
            lines = stats.lines,
            forwarded = stats.forwarded,
            malformed = stats.malformed,
            "Observation feed summary"
        );
        Ok(())
    }

    pub fn health_check(&self) -> HealthReport {
        self.service_manager.get_health_report()
    }
}

fn feed_result(
    joined: Result<Result<FeedStats, SourceError>, JoinError>,
) -> Result<FeedStats, ServiceError> {
    match joined {
        Ok(result) => Ok(result?),
        Err(e) => Err(ServiceError::TaskFailed(e.to_string())),
    }
}

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

pub async fn main() -> Result<(), BoxError> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 && (args[1] == "--version" || args[1] == "-V") {
        println!("series-forwarder {}", get_version());
        return Ok(());
    }

    match App::from_args(args) {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("Application error: {}", e);
                process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Configuration error: {e}");
            process::exit(1);
        }
    }

    Ok(())
}
