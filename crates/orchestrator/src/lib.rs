//! Compression job orchestration.
//!
//! The [`Orchestrator`] takes a [`CompressionJob`], decides where it runs and
//! drives it to a terminal state:
//!
//! 1. **Plan**: validate the algorithm, level and sources, then pick a
//!    [`Route`] before touching the filesystem
//! 2. **Local archive**: stream every source into one archive
//! 3. **Local split**: cut each source into parts and compress each part
//! 4. **Remote**: upload large files chunk by chunk and retrieve the
//!    finalized artifact
//!
//! Only one job runs per orchestrator. Output is staged next to the
//! destination and renamed into place on success, so a failed or cancelled
//! job leaves nothing behind.

pub mod error;
pub mod guard;
pub mod job;
pub mod local;
pub mod orchestrator;

pub use error::JobError;
pub use guard::{ActiveJob, JobGuard, JobSlot};
pub use job::{
    ArchivePart, ArtifactResult, CompressionJob, FileFailure, JobEvent, OrchestratorConfig, Route,
    SourceFile,
};
pub use local::{parse_part_index, part_file_name, reassemble};
pub use orchestrator::{JobHandle, Orchestrator};
