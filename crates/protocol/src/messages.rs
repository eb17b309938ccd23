use serde::{Deserialize, Serialize};

/// Header carrying the SHA-256 hex digest of an uploaded chunk body.
pub const CHECKSUM_HEADER: &str = "X-Chunk-Checksum";

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Identifies one chunk upload. Sent as query parameters; the chunk bytes
/// travel as the raw request body.
///
/// The pair `(file_id, chunk_idx)` is the idempotency key: re-sending the
/// same pair must be harmless at the receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkUploadQuery {
    pub file_id: String,
    pub chunk_idx: u64,
    pub filename: String,
}

/// Asks the remote service to assemble and compress an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub file_id: String,
}
