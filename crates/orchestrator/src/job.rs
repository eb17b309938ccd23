//! Data types for the compression job flow.

use std::path::{Path, PathBuf};

use smartcompress_codec::DEFAULT_ALGORITHM;
use smartcompress_protocol::JobMode;
use smartcompress_transfer::{DEFAULT_CHUNK_SIZE, ProgressEvent, RetryPolicy};

use crate::error::JobError;

/// Files at or above this size are candidates for the remote route: 4 GiB.
pub const DEFAULT_LARGE_FILE_THRESHOLD: u64 = 4 * 1024 * 1024 * 1024;

/// Default compression level on the 1–9 scale.
pub const DEFAULT_LEVEL: u32 = 5;

/// A source file, stat'ed when the job is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub size: u64,
    /// Caller-supplied identifier for the content, if any.
    pub content_id: Option<String>,
}

impl SourceFile {
    /// Reads the size of the regular file at `path`.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, JobError> {
        let path = path.into();
        let meta = std::fs::metadata(&path).map_err(|source| JobError::FileIo {
            file: path.display().to_string(),
            source,
        })?;
        if !meta.is_file() {
            return Err(JobError::InvalidConfiguration(format!(
                "not a regular file: {}",
                path.display()
            )));
        }
        Ok(Self {
            path,
            size: meta.len(),
            content_id: None,
        })
    }

    /// Base name of the file.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// A request to turn one or more files into compressed output.
#[derive(Debug, Clone)]
pub struct CompressionJob {
    pub sources: Vec<SourceFile>,
    /// Codec identifier, e.g. `"zip"`.
    pub algorithm: String,
    /// Level on the 1–9 scale.
    pub level: u32,
    /// Archive file (local archive route) or directory (split and remote).
    pub output: PathBuf,
    pub mode: JobMode,
    /// Split each source into parts of this many bytes (local only).
    pub split_size: Option<u64>,
    /// In `Auto` mode, send files over the threshold to the remote service.
    pub remote_opt_in: bool,
}

impl CompressionJob {
    pub fn new(sources: Vec<SourceFile>, output: impl Into<PathBuf>) -> Self {
        Self {
            sources,
            algorithm: DEFAULT_ALGORITHM.to_string(),
            level: DEFAULT_LEVEL,
            output: output.into(),
            mode: JobMode::default(),
            split_size: None,
            remote_opt_in: false,
        }
    }

    pub fn with_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = algorithm.into();
        self
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    pub fn with_mode(mut self, mode: JobMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_split_size(mut self, split_size: u64) -> Self {
        self.split_size = Some(split_size);
        self
    }

    pub fn with_remote_opt_in(mut self, opt_in: bool) -> Self {
        self.remote_opt_in = opt_in;
        self
    }

    /// Sum of all source sizes.
    pub fn total_bytes(&self) -> u64 {
        self.sources.iter().map(|s| s.size).sum()
    }

    /// Short human description, used in logs and the job guard.
    pub fn describe(&self) -> String {
        match self.sources.as_slice() {
            [one] => format!("{} -> {}", one.file_name(), self.output.display()),
            many => format!("{} files -> {}", many.len(), self.output.display()),
        }
    }
}

/// Where a job's bytes are compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// All sources into one archive file.
    LocalArchive,
    /// Each source cut into independently compressed parts.
    LocalSplit,
    /// Chunked upload; the remote service compresses.
    Remote,
}

/// One part of a split source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePart {
    pub index: u64,
    pub path: PathBuf,
    pub size: u64,
}

/// A source the remote route skipped after an I/O error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub file: String,
    pub error: String,
}

/// Outcome of a successful job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactResult {
    pub route: Route,
    /// Every file written at the destination.
    pub outputs: Vec<PathBuf>,
    pub bytes_in: u64,
    pub bytes_out: u64,
    /// Parts in index order (split route only).
    pub parts: Vec<ArchivePart>,
    /// Sources abandoned while the rest of the job went on (remote route
    /// only; local routes abort on the first error).
    pub failures: Vec<FileFailure>,
}

impl ArtifactResult {
    /// Returns `true` when every source produced output.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Event emitted while a job runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// Cumulative bytes processed for one file; never decreases.
    Progress {
        file: String,
        bytes_done: u64,
        bytes_total: u64,
    },
    /// Human-readable status line.
    Status { text: String },
    /// The job finished and these files are in place.
    Completed { outputs: Vec<PathBuf> },
    /// The job failed; nothing was left at the destination.
    Failed { error: String, cancelled: bool },
}

impl From<ProgressEvent> for JobEvent {
    fn from(event: ProgressEvent) -> Self {
        match event {
            ProgressEvent::Bytes {
                file,
                bytes_done,
                bytes_total,
            } => JobEvent::Progress {
                file,
                bytes_done,
                bytes_total,
            },
            ProgressEvent::Status { text } => JobEvent::Status { text },
        }
    }
}

impl JobEvent {
    /// Returns `true` for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Completed { .. } | JobEvent::Failed { .. })
    }
}

/// Tunables for an [`Orchestrator`](crate::Orchestrator).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upload chunk size for the remote route.
    pub chunk_size: u64,
    pub large_file_threshold: u64,
    pub retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            large_file_threshold: DEFAULT_LARGE_FILE_THRESHOLD,
            retry: RetryPolicy::default(),
        }
    }
}

/// Directory that will receive `path` when it is renamed into place.
pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}
