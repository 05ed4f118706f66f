use super::coordinator::Coordinator;
use crate::reliability::HealthStatus;
use crate::sender::Transport;
use serde_json::json;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

#[derive(Error, Debug)]
pub enum DiagnosticsError {
    #[error("Failed to bind diagnostics server on {addr}: {details}")]
    Bind { addr: SocketAddr, details: String },
}

fn with_coordinator<T: Transport + 'static>(
    coordinator: Arc<Coordinator<T>>,
) -> impl Filter<Extract = (Arc<Coordinator<T>>,), Error = Infallible> + Clone {
    warp::any().map(move || coordinator.clone())
}

/// `GET /health`, `GET /diagnostics`, `GET /metrics`, `POST /flush` and
/// `POST /reset`.
pub fn routes<T: Transport + 'static>(
    coordinator: Arc<Coordinator<T>>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let health = warp::path!("health")
        .and(warp::get())
        .and(with_coordinator(coordinator.clone()))
        .map(|coordinator: Arc<Coordinator<T>>| {
            let report = coordinator.health().get_comprehensive_report();
            let status = if report.health_status == HealthStatus::Critical {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::OK
            };
            warp::reply::with_status(warp::reply::json(&report), status)
        });

    let diagnostics = warp::path!("diagnostics")
        .and(warp::get())
        .and(with_coordinator(coordinator.clone()))
        .map(|coordinator: Arc<Coordinator<T>>| {
            warp::reply::json(&coordinator.diagnostics())
        });

    let metrics = warp::path!("metrics")
        .and(warp::get())
        .and(with_coordinator(coordinator.clone()))
        .map(
            |coordinator: Arc<Coordinator<T>>| match coordinator.metrics().export() {
                Ok(metrics_text) => warp::reply::with_header(
                    metrics_text,
                    "content-type",
                    "text/plain; version=0.0.4",
                )
                .into_response(),
                Err(e) => {
                    error!(error = %e, "Failed to export metrics");
                    warp::reply::with_status(
                        "Internal Server Error",
                        StatusCode::INTERNAL_SERVER_ERROR,
                    )
                    .into_response()
                }
            },
        );

    let flush = warp::path!("flush")
        .and(warp::post())
        .and(with_coordinator(coordinator.clone()))
        .then(|coordinator: Arc<Coordinator<T>>| async move {
            let outcome = coordinator.manual_flush().await;
            warp::reply::json(&outcome)
        });

    let reset = warp::path!("reset")
        .and(warp::post())
        .and(with_coordinator(coordinator))
        .map(|coordinator: Arc<Coordinator<T>>| {
            coordinator.reset_statistics();
            warp::reply::json(&json!({ "status": "reset" }))
        });

    health.or(diagnostics).or(metrics).or(flush).or(reset)
}

/// Bind the diagnostics routes. The returned future serves until `cancel`
/// fires.
pub fn bind<T: Transport + 'static>(
    coordinator: Arc<Coordinator<T>>,
    port: u16,
    cancel: CancellationToken,
) -> Result<(SocketAddr, impl Future<Output = ()> + Send + 'static), DiagnosticsError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let (bound, server) = warp::serve(routes(coordinator))
        .try_bind_with_graceful_shutdown(addr, async move { cancel.cancelled().await })
        .map_err(|e| DiagnosticsError::Bind {
            addr,
            details: e.to_string(),
        })?;

    info!(%bound, "Diagnostics server listening");
    Ok((bound, async move {
        server.await;
        info!("Diagnostics server stopped");
    }))
}
