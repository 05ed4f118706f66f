use std::io;
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
    /// The observation feed reached its end.
    InputExhausted,
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
#[cfg(unix)]
pub async fn wait_for_signal() -> io::Result<ShutdownReason> {
    let mut sigterm = unix_signal(SignalKind::terminate())?;
    tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
            Ok(ShutdownReason::Interrupt)
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, initiating graceful shutdown");
            Ok(ShutdownReason::Terminate)
        }
    }
}

#[cfg(not(unix))]
pub async fn wait_for_signal() -> io::Result<ShutdownReason> {
    signal::ctrl_c().await?;
    info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
    Ok(ShutdownReason::Interrupt)
}

/// Cancels its token when a shutdown signal arrives.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn a listener that triggers this handle on SIGINT or SIGTERM.
    pub fn listen_for_signals(&self) -> tokio::task::JoinHandle<Option<ShutdownReason>> {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => None,
                result = wait_for_signal() => match result {
                    Ok(reason) => {
                        token.cancel();
                        Some(reason)
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to install signal handlers");
                        None
                    }
                },
            }
        })
    }
}
