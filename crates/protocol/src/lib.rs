//! Wire types for the chunk-upload and finalize exchanges.
//!
//! These types are shared between the transfer driver and the HTTP client
//! so that both sides agree on field names and status spellings.

pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use messages::{CHECKSUM_HEADER, ChunkUploadQuery, FinalizeRequest};
pub use types::{JobMode, SessionStatus, TransferProgress};
