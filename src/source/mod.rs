//! Observation feed: newline-delimited JSON read from a file or stdin and
//! pushed into the pipeline's inbound channel.

pub mod catalog;

pub use catalog::{CatalogError, StreamCatalog, StreamRecord};

use crate::domain::Observation;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to open observation input {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read observation input: {0}")]
    Read(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservationInput {
    Stdin,
    File(PathBuf),
}

impl ObservationInput {
    /// `-` selects stdin, anything else is a file path.
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            ObservationInput::Stdin
        } else {
            ObservationInput::File(PathBuf::from(arg))
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub lines: u64,
    pub forwarded: u64,
    pub malformed: u64,
}

/// Read observations line by line until EOF, cancellation, or the receiver
/// going away. Blank lines are skipped; lines that fail to parse are counted
/// and logged.
pub async fn read_observations<R>(
    reader: R,
    tx: mpsc::Sender<Observation>,
    cancel: CancellationToken,
) -> Result<FeedStats, SourceError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stats = FeedStats::default();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Observation feed cancelled");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };

        stats.lines += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<Observation>(trimmed) {
            Ok(observation) => {
                if tx.send(observation).await.is_err() {
                    debug!("Observation receiver closed");
                    break;
                }
                stats.forwarded += 1;
            }
            Err(e) => {
                stats.malformed += 1;
                warn!(line = stats.lines, error = %e, "Skipping malformed observation");
            }
        }
    }

    info!(
        lines = stats.lines,
        forwarded = stats.forwarded,
        malformed = stats.malformed,
        "Observation feed finished"
    );
    Ok(stats)
}

pub async fn read_file(
    path: &Path,
    tx: mpsc::Sender<Observation>,
    cancel: CancellationToken,
) -> Result<FeedStats, SourceError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|source| SourceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
    read_observations(BufReader::new(file), tx, cancel).await
}

/// Spawn a task feeding `tx` from the given input.
pub fn spawn_feed(
    input: ObservationInput,
    tx: mpsc::Sender<Observation>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<Result<FeedStats, SourceError>> {
    tokio::spawn(async move {
        match input {
            ObservationInput::Stdin => {
                info!("Reading observations from stdin");
                read_observations(BufReader::new(tokio::io::stdin()), tx, cancel).await
            }
            ObservationInput::File(path) => {
                info!(path = %path.display(), "Reading observations from file");
                read_file(&path, tx, cancel).await
            }
        }
    })
}
