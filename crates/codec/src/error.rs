//! Codec error types.

/// Errors produced by the compression engine.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("compression level {level} out of range {min}-{max}")]
    InvalidLevel { level: u32, min: u32, max: u32 },

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("7z archive error: {0}")]
    SevenZ(String),

    #[error("{0} is not a container format")]
    NotAContainer(String),

    #[error("invalid or corrupted data: {0}")]
    InvalidData(String),

    #[error("unsafe archive entry name: {0}")]
    UnsafeEntry(String),
}

impl CodecError {
    pub(crate) fn seven_z(err: impl std::fmt::Display) -> Self {
        CodecError::SevenZ(err.to_string())
    }

    /// Returns `true` for errors caused by the caller's configuration
    /// (bad level or unknown algorithm) rather than by I/O or data.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CodecError::UnsupportedAlgorithm(_) | CodecError::InvalidLevel { .. }
        )
    }
}
