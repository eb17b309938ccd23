//! Local routes: single archive, split parts, and reassembly of parts.
//!
//! Everything here is blocking and runs on the blocking pool. Output is
//! staged in the destination directory and renamed into place only once the
//! whole route has succeeded.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use smartcompress_codec::{Codec, CodecError, CompressionEngine, EntrySink, Level};
use smartcompress_transfer::{ProgressReporter, Segmenter, TransferError};
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::JobError;
use crate::job::{ArchivePart, ArtifactResult, CompressionJob, JobEvent, Route, SourceFile, parent_dir};

/// Bytes read between progress reports.
const PROGRESS_STEP: u64 = 1024 * 1024;
const STAGING_PREFIX: &str = ".smartcompress-";

/// Where a local job writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LocalTarget {
    /// Every source into this one archive file.
    Archive(PathBuf),
    /// Parts of `part_size` source bytes each, written into `dir`.
    Split { dir: PathBuf, part_size: u64 },
}

impl LocalTarget {
    pub(crate) fn route(&self) -> Route {
        match self {
            LocalTarget::Archive(_) => Route::LocalArchive,
            LocalTarget::Split { .. } => Route::LocalSplit,
        }
    }

    pub(crate) fn write(
        &self,
        run: &mut LocalRun<'_>,
        job: &CompressionJob,
    ) -> Result<ArtifactResult, JobError> {
        match self {
            LocalTarget::Archive(dest) => write_archive(run, job, dest),
            LocalTarget::Split { dir, part_size } => write_split(run, job, *part_size, dir),
        }
    }
}

/// Shared state for one blocking local run.
pub(crate) struct LocalRun<'a> {
    pub codec: Arc<dyn Codec>,
    pub level: Level,
    pub cancel: &'a CancellationToken,
    pub reporter: &'a mut ProgressReporter<JobEvent>,
}

impl LocalRun<'_> {
    fn check_cancelled(&self) -> Result<(), JobError> {
        if self.cancel.is_cancelled() {
            Err(JobError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Opens `source` for a progress-reporting, cancellable read.
    fn open_source(&mut self, source: &SourceFile) -> Result<SourceReader<'_>, JobError> {
        let file = File::open(&source.path).map_err(|e| file_error(source, e))?;
        let name = source.file_name();
        self.reporter.report(&name, 0, source.size);
        Ok(SourceReader {
            file,
            name,
            total: source.size,
            done: 0,
            reported: 0,
            read_failed: false,
            cancel: self.cancel,
            reporter: &mut *self.reporter,
        })
    }

    /// Streams `source` into `dst`. Returns the bytes read.
    fn copy_source(&mut self, source: &SourceFile, dst: &mut dyn Write) -> Result<u64, JobError> {
        let mut reader = self.open_source(source)?;
        let copied = io::copy(&mut reader, dst);
        let read_failed = reader.read_failed;
        drop(reader);
        copied.map_err(|e| self.source_error(source, read_failed, e.into()))
    }

    /// Adds `source` as one entry of a container archive.
    fn add_entry(
        &mut self,
        sink: &mut dyn EntrySink,
        source: &SourceFile,
    ) -> Result<u64, JobError> {
        let mut reader = self.open_source(source)?;
        let added = sink.add_entry(&source.file_name(), &mut reader);
        let read_failed = reader.read_failed;
        drop(reader);
        added.map_err(|e| self.source_error(source, read_failed, e))
    }

    /// Classifies an error raised while a source was being read.
    fn source_error(&self, source: &SourceFile, read_failed: bool, err: CodecError) -> JobError {
        if self.cancel.is_cancelled() {
            return JobError::Cancelled;
        }
        match err {
            CodecError::Io(io) if read_failed => file_error(source, io),
            other if read_failed => file_error(source, io::Error::other(other.to_string())),
            other => other.into(),
        }
    }
}

/// Reads a source file, reporting cumulative progress and failing once the
/// job is cancelled.
struct SourceReader<'a> {
    file: File,
    name: String,
    total: u64,
    done: u64,
    reported: u64,
    read_failed: bool,
    cancel: &'a CancellationToken,
    reporter: &'a mut ProgressReporter<JobEvent>,
}

impl Read for SourceReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::other("cancelled"));
        }
        let n = match self.file.read(buf) {
            Ok(n) => n,
            Err(e) => {
                if e.kind() != io::ErrorKind::Interrupted {
                    self.read_failed = true;
                }
                return Err(e);
            }
        };
        self.done += n as u64;
        if n == 0 || self.done - self.reported >= PROGRESS_STEP {
            self.reported = self.done;
            self.reporter
                .report(&self.name, self.done, self.total.max(self.done));
        }
        Ok(n)
    }
}

pub(crate) fn file_error(source: &SourceFile, err: std::io::Error) -> JobError {
    JobError::FileIo {
        file: source.path.display().to_string(),
        source: err,
    }
}

fn staging_file(dir: &Path) -> Result<NamedTempFile, JobError> {
    Ok(tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .suffix(".tmp")
        .tempfile_in(dir)?)
}

/// Removes outputs already moved into place by a commit that failed later.
pub(crate) fn remove_committed(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "could not remove committed output");
        }
    }
}

// ---------------------------------------------------------------------------
// Archive route
// ---------------------------------------------------------------------------

/// Compresses every source into the single file `dest`.
///
/// Container codecs get one entry per source; stream codecs take exactly one
/// source (checked when the job is planned).
pub(crate) fn write_archive(
    run: &mut LocalRun<'_>,
    job: &CompressionJob,
    dest: &Path,
) -> Result<ArtifactResult, JobError> {
    let dir = parent_dir(dest);
    fs::create_dir_all(dir)?;
    let mut tmp = staging_file(dir)?;
    let mut bytes_in = 0;

    if run.codec.is_container() {
        let mut sink = run
            .codec
            .archive(Box::new(BufWriter::new(tmp.as_file_mut())), run.level)?;
        for source in &job.sources {
            run.check_cancelled()?;
            bytes_in += run.add_entry(sink.as_mut(), source)?;
        }
        sink.finish()?;
    } else {
        let source = match job.sources.as_slice() {
            [one] => one,
            _ => {
                return Err(JobError::InvalidConfiguration(format!(
                    "{} compresses a single file per archive",
                    run.codec.id()
                )));
            }
        };
        let writer = BufWriter::new(tmp.as_file_mut());
        let mut encoder = run.codec.encoder(Box::new(writer), run.level)?;
        bytes_in += run.copy_source(source, &mut encoder)?;
        encoder.finish()?;
    }

    run.check_cancelled()?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| JobError::Io(e.error))?;
    let bytes_out = fs::metadata(dest)?.len();

    info!(
        dest = %dest.display(),
        algorithm = run.codec.id(),
        bytes_in,
        bytes_out,
        "archive written"
    );

    Ok(ArtifactResult {
        route: Route::LocalArchive,
        outputs: vec![dest.to_path_buf()],
        bytes_in,
        bytes_out,
        parts: Vec::new(),
        failures: Vec::new(),
    })
}

// ---------------------------------------------------------------------------
// Split route
// ---------------------------------------------------------------------------

/// File name of part `index` of `source_name`: `<source>.part<NNNN>.<ext>`.
pub fn part_file_name(source_name: &str, index: u64, extension: &str) -> String {
    format!("{source_name}.part{index:04}.{extension}")
}

/// Recovers the part index from a name produced by [`part_file_name`].
pub fn parse_part_index(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    name.split('.')
        .rev()
        .filter_map(|segment| segment.strip_prefix("part"))
        .find(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse().ok())
}

impl ArchivePart {
    /// Describes an existing part file, taking the index from its name.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, JobError> {
        let path = path.into();
        let index = parse_part_index(&path).ok_or_else(|| {
            JobError::InvalidConfiguration(format!("not a part file: {}", path.display()))
        })?;
        let size = fs::metadata(&path)
            .map_err(|source| JobError::FileIo {
                file: path.display().to_string(),
                source,
            })?
            .len();
        Ok(Self { index, path, size })
    }
}

/// Cuts every source into `split_size` parts and compresses each part into
/// its own file under `out_dir`.
pub(crate) fn write_split(
    run: &mut LocalRun<'_>,
    job: &CompressionJob,
    split_size: u64,
    out_dir: &Path,
) -> Result<ArtifactResult, JobError> {
    fs::create_dir_all(out_dir)?;
    let staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(out_dir)?;

    let mut staged = Vec::new();
    let mut bytes_in = 0;

    for source in &job.sources {
        run.check_cancelled()?;
        let name = source.file_name();
        let segmenter = Segmenter::new(&source.path, split_size).map_err(|e| match e {
            TransferError::Io(io) => file_error(source, io),
            other => other.into(),
        })?;
        let total = segmenter.total_size();
        run.reporter.report(&name, 0, total);

        let mut done = 0;
        for chunk in segmenter {
            run.check_cancelled()?;
            let chunk = chunk?;
            let part_name = part_file_name(&name, chunk.index, run.codec.extension());
            let staged_path = staging.path().join(&part_name);

            let mut out = BufWriter::new(File::create(&staged_path)?);
            let mut encoder = run.codec.encoder(Box::new(&mut out), run.level)?;
            encoder.write_all(&chunk.data)?;
            encoder.finish()?;
            out.flush()?;
            drop(out);

            let size = fs::metadata(&staged_path)?.len();
            debug!(part = %part_name, bytes_in = chunk.size, bytes_out = size, "part written");
            done += chunk.size as u64;
            run.reporter.report(&name, done, total);
            staged.push((staged_path, out_dir.join(&part_name), chunk.index, size));
        }
        bytes_in += done;
    }

    run.check_cancelled()?;
    let mut parts: Vec<ArchivePart> = Vec::with_capacity(staged.len());
    for (from, to, index, size) in staged {
        if let Err(e) = fs::rename(&from, &to) {
            let committed: Vec<PathBuf> = parts.into_iter().map(|p| p.path).collect();
            remove_committed(&committed);
            return Err(JobError::FileIo {
                file: to.display().to_string(),
                source: e,
            });
        }
        parts.push(ArchivePart {
            index,
            path: to,
            size,
        });
    }

    let bytes_out = parts.iter().map(|p| p.size).sum();
    info!(
        dest = %out_dir.display(),
        parts = parts.len(),
        bytes_in,
        bytes_out,
        "split parts written"
    );

    Ok(ArtifactResult {
        route: Route::LocalSplit,
        outputs: parts.iter().map(|p| p.path.clone()).collect(),
        bytes_in,
        bytes_out,
        parts,
        failures: Vec::new(),
    })
}

// ---------------------------------------------------------------------------
// Reassembly
// ---------------------------------------------------------------------------

/// Decompresses `parts` in index order and concatenates them into `dest`.
///
/// Parts must all share one extension (which selects the codec) and their
/// indices must run contiguously from zero. Returns the bytes written.
pub fn reassemble(
    engine: &CompressionEngine,
    parts: &[ArchivePart],
    dest: &Path,
) -> Result<u64, JobError> {
    let mut ordered: Vec<&ArchivePart> = parts.iter().collect();
    ordered.sort_by_key(|p| p.index);

    let Some(first) = ordered.first() else {
        return Err(JobError::InvalidConfiguration("no parts to reassemble".into()));
    };
    for (expected, part) in ordered.iter().enumerate() {
        if part.index != expected as u64 {
            return Err(JobError::InvalidConfiguration(format!(
                "expected part {expected}, found part {} ({})",
                part.index,
                part.path.display()
            )));
        }
    }

    let codec = engine.for_path(&first.path)?;
    if let Some(odd) = ordered
        .iter()
        .find(|p| p.path.extension() != first.path.extension())
    {
        return Err(JobError::InvalidConfiguration(format!(
            "mixed part formats: {}",
            odd.path.display()
        )));
    }

    let dir = parent_dir(dest);
    fs::create_dir_all(dir)?;
    let mut tmp = staging_file(dir)?;
    let mut written = 0;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        for part in &ordered {
            let file = File::open(&part.path).map_err(|source| JobError::FileIo {
                file: part.path.display().to_string(),
                source,
            })?;
            written += engine.decompress_stream(codec.id(), BufReader::new(file), &mut writer)?;
        }
        writer.flush()?;
    }
    tmp.persist(dest).map_err(|e| JobError::Io(e.error))?;

    info!(dest = %dest.display(), parts = ordered.len(), bytes = written, "parts reassembled");
    Ok(written)
}
