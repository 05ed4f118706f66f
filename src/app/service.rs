use super::config::{Config, ConfigError};
use super::coordinator::{Coordinator, FlushOutcome};
use super::diagnostics::{self, DiagnosticsError};
use super::pipeline::{run_flush_loop, run_ingestion_loop, run_retry_loop};
use crate::domain::Observation;
use crate::reliability::{HealthReport, MetricsError};
use crate::sender::{HttpTransport, Transport, TransportError};
use crate::source::{CatalogError, SourceError, StreamCatalog};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long shutdown waits for a flush that was already sending.
const INFLIGHT_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Catalog error: {0}")]
    CatalogError(#[from] CatalogError),
    #[error("Source error: {0}")]
    SourceError(#[from] SourceError),
    #[error("Transport error: {0}")]
    TransportError(#[from] TransportError),
    #[error("Metrics error: {0}")]
    MetricsError(#[from] MetricsError),
    #[error("Diagnostics error: {0}")]
    DiagnosticsError(#[from] DiagnosticsError),
    #[error("Service already running")]
    AlreadyRunning,
    #[error("Service not running")]
    NotRunning,
    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

/// What a graceful shutdown did.
#[derive(Debug, Clone, PartialEq)]
pub struct ShutdownReport {
    /// Observations taken off the inbound channel while running.
    pub consumed: u64,
    /// Result of the single shutdown flush.
    pub outcome: FlushOutcome,
    /// A periodic or size-triggered send was still running after
    /// `INFLIGHT_FLUSH_TIMEOUT` and was cut off; its batch is lost.
    pub inflight_flush_abandoned: bool,
}

struct RunningTasks {
    ingestion: JoinHandle<u64>,
    flush: JoinHandle<()>,
    retry: JoinHandle<()>,
    diagnostics: Option<JoinHandle<()>>,
}

/// Owns the coordinator and the background tasks that drive it.
pub struct ServiceManager<T: Transport + 'static> {
    config: Config,
    coordinator: Arc<Coordinator<T>>,
    pipeline_cancel: CancellationToken,
    retry_cancel: CancellationToken,
    tasks: Option<RunningTasks>,
}

impl ServiceManager<HttpTransport> {
    /// Build the HTTP transport and load the stream catalog from `config`.
    pub fn new(config: Config) -> Result<Self, ServiceError> {
        let catalog = match &config.catalog_file {
            Some(path) => StreamCatalog::from_file(path)?,
            None => StreamCatalog::default(),
        };
        let transport = HttpTransport::new(config.transport_config())?;
        Self::with_transport(config, transport, catalog)
    }
}

impl<T: Transport + 'static> ServiceManager<T> {
    pub fn with_transport(
        config: Config,
        transport: T,
        catalog: StreamCatalog,
    ) -> Result<Self, ServiceError> {
        info!(
            endpoint = transport.endpoint(),
            strategy = ?config.buffer_strategy,
            batch_interval_secs = config.batch_interval_secs,
            max_batch_size = config.max_batch_size,
            streams = catalog.len(),
            "Initializing series forwarder"
        );
        let coordinator = Coordinator::new(transport, config.coordinator_settings(), catalog)?;
        Ok(Self {
            config,
            coordinator: Arc::new(coordinator),
            pipeline_cancel: CancellationToken::new(),
            retry_cancel: CancellationToken::new(),
            tasks: None,
        })
    }

    pub fn coordinator(&self) -> &Arc<Coordinator<T>> {
        &self.coordinator
    }

    pub fn is_running(&self) -> bool {
        self.tasks.is_some()
    }

    /// Spawn ingestion, flush, retry and (if enabled) diagnostics tasks.
    pub fn start(&mut self, observations: mpsc::Receiver<Observation>) -> Result<(), ServiceError> {
        if self.tasks.is_some() {
            return Err(ServiceError::AlreadyRunning);
        }

        let flush_requested = Arc::new(Notify::new());
        let ingestion = tokio::spawn(run_ingestion_loop(
            self.coordinator.clone(),
            observations,
            flush_requested.clone(),
            self.pipeline_cancel.clone(),
        ));
        let flush = tokio::spawn(run_flush_loop(
            self.coordinator.clone(),
            self.config.batch_interval,
            self.config.flush_check_interval,
            flush_requested,
            self.pipeline_cancel.clone(),
        ));
        let retry = tokio::spawn(run_retry_loop(
            self.coordinator.clone(),
            self.config.retry_interval,
            self.retry_cancel.clone(),
        ));
        let diagnostics = if self.config.enable_diagnostics {
            let (_, server) = diagnostics::bind(
                self.coordinator.clone(),
                self.config.diagnostics_port,
                self.retry_cancel.clone(),
            )?;
            Some(tokio::spawn(server))
        } else {
            None
        };

        self.tasks = Some(RunningTasks {
            ingestion,
            flush,
            retry,
            diagnostics,
        });
        info!("Series forwarder started");
        Ok(())
    }

    /// Stop the timers and the feed, ingest what is already queued, then run
    /// exactly one shutdown flush before stopping the retry loop.
    ///
    /// The shutdown flush does not wait for a send the flush loop already
    /// has in flight; that send gets `INFLIGHT_FLUSH_TIMEOUT` to finish
    /// afterwards. Batches still waiting for retry are not flushed.
    pub async fn shutdown(&mut self) -> Result<ShutdownReport, ServiceError> {
        let tasks = self.tasks.take().ok_or(ServiceError::NotRunning)?;
        info!("Initiating graceful shutdown...");

        self.pipeline_cancel.cancel();
        let consumed = match tasks.ingestion.await {
            Ok(consumed) => consumed,
            Err(e) => {
                error!(error = %e, "Ingestion task failed");
                0
            }
        };

        let outcome = self.coordinator.shutdown_flush().await;
        info!(consumed, ?outcome, "Shutdown flush finished");

        let mut flush = tasks.flush;
        let inflight_flush_abandoned =
            match tokio::time::timeout(INFLIGHT_FLUSH_TIMEOUT, &mut flush).await {
                Ok(joined) => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Flush task failed");
                    }
                    false
                }
                Err(_) => {
                    flush.abort();
                    error!(
                        timeout_secs = INFLIGHT_FLUSH_TIMEOUT.as_secs(),
                        "In-flight flush did not finish, its batch is lost"
                    );
                    true
                }
            };

        self.retry_cancel.cancel();
        tasks
            .retry
            .await
            .map_err(|e| ServiceError::TaskFailed(e.to_string()))?;

        if let Some(handle) = tasks.diagnostics
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Diagnostics task failed");
        }

        info!("Graceful shutdown completed");
        Ok(ShutdownReport {
            consumed,
            outcome,
            inflight_flush_abandoned,
        })
    }

    pub fn get_health_report(&self) -> HealthReport {
        self.coordinator.health().get_comprehensive_report()
    }
}
