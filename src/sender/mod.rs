pub mod batch;
pub mod classify;
pub mod error;
pub mod http;

pub use batch::Batch;
pub use classify::{Classification, Disposition, FailureReason, classify, classify_message};
pub use error::TransportError;
pub use http::{HttpTransport, HttpTransportConfig};

use std::future::Future;
use std::sync::Arc;

/// Delivers a batch to the remote store.
///
/// Sends must be safe to repeat: the remote upserts by
/// `(stream_id, timestamp)` and each batch carries a stable id.
pub trait Transport: Send + Sync {
    fn send(&self, batch: &Batch) -> impl Future<Output = Result<(), TransportError>> + Send;
    fn endpoint(&self) -> &str;
}

impl<T: Transport> Transport for Arc<T> {
    fn send(&self, batch: &Batch) -> impl Future<Output = Result<(), TransportError>> + Send {
        (**self).send(batch)
    }

    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }
}
