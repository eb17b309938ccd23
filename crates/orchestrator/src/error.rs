//! Job error types.

use smartcompress_codec::CodecError;
use smartcompress_transfer::TransferError;

/// Errors produced while planning or running a compression job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error on {file}: {source}")]
    FileIo {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("codec error: {0}")]
    Codec(CodecError),

    #[error("chunk {chunk} of {file} failed after {attempts} attempts: {reason}")]
    SessionFailed {
        file: String,
        chunk: u64,
        attempts: u32,
        reason: String,
    },

    #[error("finalize incomplete for {file}: {reason}")]
    FinalizeIncomplete { file: String, reason: String },

    #[error("transfer error: {0}")]
    Transfer(TransferError),

    #[error("a job is already running")]
    JobAlreadyRunning,

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl JobError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobError::Cancelled)
    }

    /// Returns `true` when the job failed in the transfer phase and may be
    /// resubmitted; the new run uses fresh sessions.
    pub fn is_retryable_with_new_session(&self) -> bool {
        matches!(
            self,
            JobError::SessionFailed { .. } | JobError::FinalizeIncomplete { .. }
        )
    }
}

impl From<CodecError> for JobError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::UnsupportedAlgorithm(name) => JobError::UnsupportedAlgorithm(name),
            CodecError::InvalidLevel { .. } => JobError::InvalidConfiguration(err.to_string()),
            CodecError::Io(e) => JobError::Io(e),
            other => JobError::Codec(other),
        }
    }
}

impl From<TransferError> for JobError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Cancelled => JobError::Cancelled,
            TransferError::InvalidConfiguration(msg) => JobError::InvalidConfiguration(msg),
            TransferError::Io(e) => JobError::Io(e),
            TransferError::SessionFailed {
                file,
                chunk,
                attempts,
                source,
            } => JobError::SessionFailed {
                file,
                chunk,
                attempts,
                reason: source.to_string(),
            },
            TransferError::FinalizeIncomplete { file, reason } => {
                JobError::FinalizeIncomplete { file, reason }
            }
            other => JobError::Transfer(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartcompress_transfer::RemoteFailure;

    #[test]
    fn codec_errors_map_to_taxonomy() {
        assert!(matches!(
            JobError::from(CodecError::UnsupportedAlgorithm("unknown-codec".into())),
            JobError::UnsupportedAlgorithm(ref a) if a == "unknown-codec"
        ));
        assert!(matches!(
            JobError::from(CodecError::InvalidLevel {
                level: 0,
                min: 1,
                max: 9
            }),
            JobError::InvalidConfiguration(_)
        ));
        assert!(matches!(
            JobError::from(CodecError::InvalidData("bad".into())),
            JobError::Codec(_)
        ));
    }

    #[test]
    fn transfer_errors_map_to_taxonomy() {
        let err = JobError::from(TransferError::SessionFailed {
            file: "movie.mkv".into(),
            chunk: 1,
            attempts: 3,
            source: RemoteFailure::Timeout,
        });
        assert!(err.is_retryable_with_new_session());
        assert_eq!(
            err.to_string(),
            "chunk 1 of movie.mkv failed after 3 attempts: request timed out"
        );

        let err = JobError::from(TransferError::FinalizeIncomplete {
            file: "movie.mkv".into(),
            reason: "missing chunks [1]".into(),
        });
        assert!(err.is_retryable_with_new_session());
        assert!(!err.is_cancelled());

        assert!(JobError::from(TransferError::Cancelled).is_cancelled());
    }

    #[test]
    fn configuration_errors_are_not_retryable() {
        assert!(!JobError::InvalidConfiguration("x".into()).is_retryable_with_new_session());
        assert!(!JobError::JobAlreadyRunning.is_retryable_with_new_session());
    }
}
