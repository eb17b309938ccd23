//! Remote assembly service seam.
//!
//! `RemoteService` is implemented by the HTTP client crate. Keeping it a
//! trait lets the upload driver be tested against in-memory mocks.

use std::future::Future;
use std::pin::Pin;

use smartcompress_protocol::{ChunkUploadQuery, FinalizeRequest};

/// Boxed future returned by [`RemoteService`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A single failed call to the remote service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteFailure {
    /// Connection refused, reset, DNS failure and the like.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    /// The service answered with a non-success status.
    #[error("remote returned status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Remote service that receives chunks and assembles the final artifact.
pub trait RemoteService: Send + Sync {
    /// Uploads one chunk. Success acknowledges exactly
    /// `(query.file_id, query.chunk_idx)`.
    fn upload_chunk(
        &self,
        query: &ChunkUploadQuery,
        checksum: &str,
        data: &[u8],
    ) -> BoxFuture<'_, Result<(), RemoteFailure>>;

    /// Asks the service to assemble and compress the uploaded file, returning
    /// the artifact bytes.
    fn finalize(&self, request: &FinalizeRequest) -> BoxFuture<'_, Result<Vec<u8>, RemoteFailure>>;

    /// Human-readable endpoint, for logs.
    fn endpoint(&self) -> &str;
}
