//! Segmentation and resumable chunked uploads.
//!
//! A file is cut into fixed-size [`Chunk`]s by the [`Segmenter`]. Each chunk is
//! sent through a [`RemoteService`] by the [`SessionUploader`], which drives a
//! [`TransferSession`] through its lifecycle and retries failed chunks under a
//! [`RetryPolicy`]. Progress flows out through a [`ProgressReporter`].

mod progress;
mod remote;
mod retry;
mod segment;
mod session;
mod uploader;
mod validation;

pub use progress::{ProgressEvent, ProgressReporter, SpeedCalculator};
pub use remote::{BoxFuture, RemoteFailure, RemoteService};
pub use retry::RetryPolicy;
pub use segment::{Chunk, ChunkSpan, ChunkSpans, Segmenter, checksum_bytes, chunk_spans};
pub use session::TransferSession;
pub use uploader::SessionUploader;
pub use validation::validate_upload_name;

/// Default chunk size: 50 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 50 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunk {chunk} of {file} failed after {attempts} attempts: {source}")]
    SessionFailed {
        file: String,
        chunk: u64,
        attempts: u32,
        #[source]
        source: RemoteFailure,
    },

    #[error("finalize incomplete for {file}: {reason}")]
    FinalizeIncomplete { file: String, reason: String },

    #[error("chunk index {index} out of range (file has {num_chunks} chunks)")]
    ChunkOutOfRange { index: u64, num_chunks: u64 },

    #[error("cannot {op} session for {file} in state {status}")]
    InvalidState {
        file: String,
        op: &'static str,
        status: smartcompress_protocol::SessionStatus,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("invalid path: {0}")]
    InvalidPath(String),
}

impl TransferError {
    /// Returns `true` when the session is dead but the same file may be sent
    /// again under a fresh session.
    pub fn is_retryable_with_new_session(&self) -> bool {
        matches!(
            self,
            TransferError::SessionFailed { .. } | TransferError::FinalizeIncomplete { .. }
        )
    }
}

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, TransferError>;
