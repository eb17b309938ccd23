//! Multi-entry archives (ZIP and 7z) for local jobs with several sources.

use std::fs::{self, File};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};

use sevenz_rust::{Password, SevenZArchiveEntry, SevenZReader, SevenZWriter};
use tracing::{debug, instrument};
use zip::{ZipArchive, ZipWriter};

use crate::codec::zip_entry_options;
use crate::{CodecError, Level, Result};

/// A seekable destination, as container writers need.
pub trait WriteSeek: Write + Seek {}

impl<T: Write + Seek> WriteSeek for T {}

/// Receives the named entries of a container archive.
pub trait EntrySink {
    /// Adds one entry, reading its payload from `src` until end of input.
    /// Returns the payload size.
    fn add_entry(&mut self, name: &str, src: &mut dyn Read) -> Result<u64>;

    /// Completes the archive and flushes the destination.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Streams named entries into a ZIP archive.
///
/// Entries are written one at a time: call [`start_entry`](Self::start_entry),
/// write the payload through the [`Write`] impl, then start the next entry or
/// [`finish`](Self::finish).
pub struct ArchiveWriter<W: Write + Seek> {
    inner: ZipWriter<W>,
    level: Level,
    entries: usize,
}

impl<W: Write + Seek> ArchiveWriter<W> {
    pub fn new(dst: W, level: Level) -> Self {
        Self {
            inner: ZipWriter::new(dst),
            level,
            entries: 0,
        }
    }

    /// Begins a new entry. Absolute names and `..` components are rejected.
    pub fn start_entry(&mut self, name: &str) -> Result<()> {
        validate_entry_name(name)?;
        debug!(entry = name, "starting archive entry");
        self.inner.start_file(name, zip_entry_options(self.level))?;
        self.entries += 1;
        Ok(())
    }

    /// Number of entries started so far.
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Writes the central directory and returns the underlying writer.
    pub fn finish(self) -> Result<W> {
        Ok(self.inner.finish()?)
    }
}

impl<W: Write + Seek> Write for ArchiveWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.entries == 0 {
            return Err(io::Error::other("no archive entry started"));
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write + Seek> EntrySink for ArchiveWriter<W> {
    fn add_entry(&mut self, name: &str, src: &mut dyn Read) -> Result<u64> {
        self.start_entry(name)?;
        Ok(io::copy(src, self)?)
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let mut dst = ArchiveWriter::finish(*self)?;
        dst.flush()?;
        Ok(())
    }
}

/// Writes named entries into a 7z archive, one LZMA2 stream per entry.
pub struct SevenZArchiveWriter<W: Write + Seek> {
    inner: SevenZWriter<W>,
    entries: usize,
}

impl<W: Write + Seek> SevenZArchiveWriter<W> {
    pub fn new(dst: W) -> Result<Self> {
        Ok(Self {
            inner: SevenZWriter::new(dst).map_err(CodecError::seven_z)?,
            entries: 0,
        })
    }

    pub fn entries(&self) -> usize {
        self.entries
    }
}

impl<W: Write + Seek> EntrySink for SevenZArchiveWriter<W> {
    fn add_entry(&mut self, name: &str, src: &mut dyn Read) -> Result<u64> {
        validate_entry_name(name)?;
        debug!(entry = name, "adding 7z entry");
        let mut entry = SevenZArchiveEntry::default();
        entry.name = name.to_string();
        entry.has_stream = true;

        let mut counted = CountingReader { inner: src, read: 0 };
        self.inner
            .push_archive_entry(entry, Some(&mut counted))
            .map_err(CodecError::seven_z)?;
        self.entries += 1;
        Ok(counted.read)
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let mut dst = self.inner.finish().map_err(CodecError::seven_z)?;
        dst.flush()?;
        Ok(())
    }
}

struct CountingReader<'a> {
    inner: &'a mut dyn Read,
    read: u64,
}

impl Read for CountingReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read += n as u64;
        Ok(n)
    }
}

fn validate_entry_name(name: &str) -> Result<()> {
    let path = Path::new(name);
    let unsafe_name = name.is_empty()
        || path.is_absolute()
        || name.starts_with('/')
        || name.starts_with('\\')
        || path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir));
    if unsafe_name {
        return Err(CodecError::UnsafeEntry(name.to_string()));
    }
    Ok(())
}

/// Extracts every file entry of the archive at `src` into `dest_dir`.
///
/// Returns the written paths in archive order. Entries whose names would
/// escape `dest_dir` abort the extraction.
#[instrument(skip_all, fields(src = %src.display(), dest = %dest_dir.display()))]
pub fn extract_archive(src: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(src)?;
    extract_from(file, dest_dir)
}

/// Same as [`extract_archive`] for an already opened reader.
pub fn extract_from<R: Read + Seek>(reader: R, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut archive = ZipArchive::new(reader)?;
    fs::create_dir_all(dest_dir)?;
    let mut written = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| CodecError::UnsafeEntry(entry.name().to_string()))?;
        let target = dest_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        let n = io::copy(&mut entry, &mut out)?;
        debug!(path = %target.display(), bytes = n, "extracted entry");
        written.push(target);
    }

    Ok(written)
}

/// Extracts every file entry of the 7z archive at `src` into `dest_dir`.
///
/// Same naming rules as [`extract_archive`].
#[instrument(skip_all, fields(src = %src.display(), dest = %dest_dir.display()))]
pub fn extract_7z(src: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(src)?;
    extract_7z_from(file, dest_dir)
}

/// Same as [`extract_7z`] for an already opened reader.
pub fn extract_7z_from<R: Read + Seek>(mut reader: R, dest_dir: &Path) -> Result<Vec<PathBuf>> {
    let len = reader.seek(io::SeekFrom::End(0))?;
    reader.seek(io::SeekFrom::Start(0))?;
    let mut archive =
        SevenZReader::new(reader, len, Password::empty()).map_err(CodecError::seven_z)?;
    fs::create_dir_all(dest_dir)?;

    let mut written = Vec::new();
    let mut failure = None;
    archive
        .for_each_entries(|entry, data| {
            match write_7z_entry(dest_dir, &entry.name, entry.is_directory, data) {
                Ok(Some(path)) => written.push(path),
                Ok(None) => {}
                Err(e) => {
                    failure = Some(e);
                    return Ok(false);
                }
            }
            Ok(true)
        })
        .map_err(CodecError::seven_z)?;

    match failure {
        Some(e) => Err(e),
        None => Ok(written),
    }
}

fn write_7z_entry(
    dest_dir: &Path,
    name: &str,
    is_directory: bool,
    data: &mut dyn Read,
) -> Result<Option<PathBuf>> {
    validate_entry_name(name)?;
    let target = dest_dir.join(name);
    if is_directory {
        fs::create_dir_all(&target)?;
        return Ok(None);
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = File::create(&target)?;
    let n = io::copy(data, &mut out)?;
    debug!(path = %target.display(), bytes = n, "extracted entry");
    Ok(Some(target))
}

/// Payload of the first file entry of a 7z archive.
pub(crate) fn first_7z_entry<R: Read + Seek>(mut reader: R) -> Result<Vec<u8>> {
    let len = reader.seek(io::SeekFrom::End(0))?;
    reader.seek(io::SeekFrom::Start(0))?;
    let mut archive =
        SevenZReader::new(reader, len, Password::empty()).map_err(CodecError::seven_z)?;

    let mut payload = None;
    let mut failure = None;
    archive
        .for_each_entries(|entry, data| {
            if entry.is_directory {
                return Ok(true);
            }
            let mut out = Vec::new();
            match data.read_to_end(&mut out) {
                Ok(_) => payload = Some(out),
                Err(e) => failure = Some(e),
            }
            Ok(false)
        })
        .map_err(CodecError::seven_z)?;

    if let Some(e) = failure {
        return Err(CodecError::InvalidData(e.to_string()));
    }
    payload.ok_or_else(|| CodecError::InvalidData("7z archive has no entries".into()))
}
