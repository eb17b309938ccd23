use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle of one chunked upload.
///
/// `Completed` and `Failed` are terminal; every other state may move to
/// `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    #[serde(rename = "created")]
    Created,
    #[serde(rename = "uploading")]
    Uploading,
    #[serde(rename = "all_chunks_acknowledged")]
    AllChunksAcknowledged,
    #[serde(rename = "finalizing")]
    Finalizing,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl SessionStatus {
    /// Returns `true` for `Completed` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }

    /// Short lowercase name, identical to the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Uploading => "uploading",
            SessionStatus::AllChunksAcknowledged => "all_chunks_acknowledged",
            SessionStatus::Finalizing => "finalizing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a compression job should run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    /// Always compress on this machine.
    Local,
    /// Ship large files to the remote service.
    Remote,
    /// Local unless a file crosses the large-file threshold and the caller opted in.
    #[default]
    Auto,
}

impl FromStr for JobMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(JobMode::Local),
            "remote" | "cloud" => Ok(JobMode::Remote),
            "auto" => Ok(JobMode::Auto),
            other => Err(format!("unknown job mode: {other}")),
        }
    }
}

/// Snapshot of a session's upload progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub file_id: String,
    pub filename: String,
    pub status: SessionStatus,
    pub total_bytes: u64,
    pub acknowledged_bytes: u64,
    pub acknowledged_chunks: u64,
    pub num_chunks: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl TransferProgress {
    /// Returns the upload progress as a percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.acknowledged_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}
