//! Compression engine: a registry of interchangeable codecs selected by
//! identifier.
//!
//! Every codec is deterministic (same input, algorithm and level always give
//! the same bytes) and round-trips through its paired decoder. Unknown
//! identifiers are rejected with [`CodecError::UnsupportedAlgorithm`]; there is
//! no fallback codec.

pub mod archive;
pub mod codec;
pub mod engine;
pub mod error;
pub mod level;

pub use archive::{
    ArchiveWriter, EntrySink, SevenZArchiveWriter, WriteSeek, extract_7z, extract_7z_from,
    extract_archive, extract_from,
};
pub use codec::{Codec, FinishWrite};
pub use engine::CompressionEngine;
pub use error::CodecError;
pub use level::Level;

/// Algorithm used when the caller does not pick one: a ZIP container with
/// Deflate entries.
pub const DEFAULT_ALGORITHM: &str = "zip";

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, CodecError>;
