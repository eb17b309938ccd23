use std::collections::BTreeSet;

use smartcompress_protocol::{SessionStatus, TransferProgress};
use tracing::debug;

use crate::segment::{ChunkSpans, chunk_spans};
use crate::validation::validate_upload_name;
use crate::{Result, TransferError};

/// State of one chunked upload.
///
/// The session owns its acknowledgement set; it is driven by a single task and
/// never shared. Once `Completed` or `Failed` it cannot be reused: a new upload
/// of the same file needs a new session (and therefore a new id).
#[derive(Debug)]
pub struct TransferSession {
    id: String,
    file_name: String,
    total_size: u64,
    chunk_size: u64,
    spans: ChunkSpans,
    acknowledged: BTreeSet<u64>,
    acknowledged_bytes: u64,
    status: SessionStatus,
    error: Option<String>,
}

impl TransferSession {
    /// Creates a session in `Created` with a fresh random id.
    pub fn new(file_name: &str, total_size: u64, chunk_size: u64) -> Result<Self> {
        Self::with_id(
            uuid::Uuid::new_v4().to_string(),
            file_name,
            total_size,
            chunk_size,
        )
    }

    /// Creates a session with a caller-chosen id.
    pub fn with_id(id: String, file_name: &str, total_size: u64, chunk_size: u64) -> Result<Self> {
        validate_upload_name(file_name)?;
        let spans = chunk_spans(total_size, chunk_size)?;
        Ok(Self {
            id,
            file_name: file_name.to_string(),
            total_size,
            chunk_size,
            spans,
            acknowledged: BTreeSet::new(),
            acknowledged_bytes: 0,
            status: SessionStatus::Created,
            error: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn num_chunks(&self) -> u64 {
        self.spans.num_chunks()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Failure reason, set once the session is `Failed`.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Moves `Created` to `Uploading`.
    ///
    /// A file with zero chunks has nothing to send and goes straight to
    /// `AllChunksAcknowledged`.
    pub fn begin(&mut self) -> Result<()> {
        self.require(SessionStatus::Created, "begin")?;
        self.status = if self.num_chunks() == 0 {
            SessionStatus::AllChunksAcknowledged
        } else {
            SessionStatus::Uploading
        };
        debug!(session = %self.id, file = %self.file_name, status = %self.status, "session started");
        Ok(())
    }

    /// Records that the receiver accepted chunk `index`.
    ///
    /// Returns `false` for a duplicate acknowledgement, which changes nothing.
    pub fn acknowledge(&mut self, index: u64) -> Result<bool> {
        match self.status {
            SessionStatus::Uploading | SessionStatus::AllChunksAcknowledged => {}
            status => {
                return Err(TransferError::InvalidState {
                    file: self.file_name.clone(),
                    op: "acknowledge chunk in",
                    status,
                });
            }
        }
        let span = self.spans.get(index).ok_or(TransferError::ChunkOutOfRange {
            index,
            num_chunks: self.num_chunks(),
        })?;

        if !self.acknowledged.insert(index) {
            return Ok(false);
        }
        self.acknowledged_bytes += span.len;
        if self.acknowledged.len() as u64 == self.num_chunks() {
            self.status = SessionStatus::AllChunksAcknowledged;
        }
        Ok(true)
    }

    pub fn is_acknowledged(&self, index: u64) -> bool {
        self.acknowledged.contains(&index)
    }

    pub fn acknowledged_chunks(&self) -> u64 {
        self.acknowledged.len() as u64
    }

    /// Sum of the lengths of all acknowledged chunks.
    pub fn acknowledged_bytes(&self) -> u64 {
        self.acknowledged_bytes
    }

    /// Indices in `[0, num_chunks)` not yet acknowledged, ascending.
    pub fn missing(&self) -> Vec<u64> {
        (0..self.num_chunks())
            .filter(|i| !self.acknowledged.contains(i))
            .collect()
    }

    /// Lowest index not yet acknowledged, where a resumed upload continues.
    pub fn first_missing(&self) -> Option<u64> {
        (0..self.num_chunks()).find(|i| !self.acknowledged.contains(i))
    }

    /// Moves `AllChunksAcknowledged` to `Finalizing`.
    ///
    /// Called with any chunk missing, the session fails with
    /// [`TransferError::FinalizeIncomplete`] and finalize must not be sent.
    /// A session that never began is rejected without changing state.
    pub fn begin_finalize(&mut self) -> Result<()> {
        if matches!(
            self.status,
            SessionStatus::Created | SessionStatus::Finalizing
        ) || self.status.is_terminal()
        {
            return Err(TransferError::InvalidState {
                file: self.file_name.clone(),
                op: "finalize",
                status: self.status,
            });
        }
        if self.status != SessionStatus::AllChunksAcknowledged {
            let missing = self.missing();
            let reason = format!("missing chunks {missing:?}");
            self.fail(&reason);
            return Err(TransferError::FinalizeIncomplete {
                file: self.file_name.clone(),
                reason,
            });
        }
        self.status = SessionStatus::Finalizing;
        Ok(())
    }

    /// Moves `Finalizing` to `Completed`.
    pub fn complete(&mut self) -> Result<()> {
        self.require(SessionStatus::Finalizing, "complete")?;
        self.status = SessionStatus::Completed;
        debug!(session = %self.id, file = %self.file_name, "session completed");
        Ok(())
    }

    /// Moves any non-terminal state to `Failed`. No-op once terminal.
    pub fn fail(&mut self, reason: &str) {
        if self.status.is_terminal() {
            return;
        }
        debug!(session = %self.id, file = %self.file_name, reason, "session failed");
        self.status = SessionStatus::Failed;
        self.error = Some(reason.to_string());
    }

    /// Returns current progress as a protocol-compatible struct.
    pub fn progress(&self) -> TransferProgress {
        TransferProgress {
            file_id: self.id.clone(),
            filename: self.file_name.clone(),
            status: self.status,
            total_bytes: self.total_size,
            acknowledged_bytes: self.acknowledged_bytes,
            acknowledged_chunks: self.acknowledged_chunks(),
            num_chunks: self.num_chunks(),
            error: self.error.clone().unwrap_or_default(),
        }
    }

    fn require(&self, expected: SessionStatus, op: &'static str) -> Result<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(TransferError::InvalidState {
                file: self.file_name.clone(),
                op,
                status: self.status,
            })
        }
    }
}
