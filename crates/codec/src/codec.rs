//! Codec trait and the built-in codec implementations.

use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use brotli::{CompressorWriter as BrotliEncoder, Decompressor as BrotliDecoder};
use bzip2::{Compression as BzLevel, read::BzDecoder, write::BzEncoder};
use flate2::Compression as FlateLevel;
use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::{DeflateEncoder, GzEncoder};
use xz2::{read::XzDecoder, write::XzEncoder};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive};
use zstd::stream::{read::Decoder as ZstdDecoder, write::Encoder as ZstdEncoder};

use crate::archive::{self, ArchiveWriter, EntrySink, SevenZArchiveWriter, WriteSeek};
use crate::{CodecError, Level, Result};

const BROTLI_BUFFER_SIZE: usize = 4096;
const BROTLI_LG_WINDOW_SIZE: u32 = 22;

/// Name of the single entry written by a container codec's stream encoder.
const SINGLE_ENTRY_NAME: &str = "data";

/// A writer that must be explicitly finished to flush trailing frames.
///
/// Dropping an encoder without calling [`finish`](Self::finish) may silently
/// lose the stream trailer, so callers always finish.
pub trait FinishWrite: Write {
    fn finish(self: Box<Self>) -> io::Result<()>;
}

/// A paired compress/decompress implementation selected by identifier.
pub trait Codec: Send + Sync {
    /// Registry identifier, e.g. `"zstd"`.
    fn id(&self) -> &'static str;

    /// Output file extension (without the dot). Matches the identifier.
    fn extension(&self) -> &'static str {
        self.id()
    }

    /// Returns `true` for container formats that can hold several named entries.
    fn is_container(&self) -> bool {
        false
    }

    /// Wraps `dst` in a compressing writer.
    fn encoder<'a>(
        &self,
        dst: Box<dyn Write + 'a>,
        level: Level,
    ) -> Result<Box<dyn FinishWrite + 'a>>;

    /// Wraps `src` in a decompressing reader.
    fn decoder<'a>(&self, src: Box<dyn Read + 'a>) -> Result<Box<dyn Read + 'a>>;

    /// Opens a multi-entry archive over `dst`. Container codecs only.
    fn archive<'a>(
        &self,
        _dst: Box<dyn WriteSeek + 'a>,
        _level: Level,
    ) -> Result<Box<dyn EntrySink + 'a>> {
        Err(CodecError::NotAContainer(self.id().to_string()))
    }

    /// Extracts every file entry of the archive at `src` into `dest_dir`.
    /// Container codecs only.
    fn extract(&self, _src: &Path, _dest_dir: &Path) -> Result<Vec<PathBuf>> {
        Err(CodecError::NotAContainer(self.id().to_string()))
    }
}

/// Options for deflated ZIP entries with a fixed timestamp, so identical
/// input always produces identical archives.
pub(crate) fn zip_entry_options(level: Level) -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(i64::from(level.get())))
        .last_modified_time(zip::DateTime::default())
        .large_file(true)
}

// ---------------------------------------------------------------------------
// FinishWrite impls
// ---------------------------------------------------------------------------

struct Passthrough<W: Write>(W);

impl<W: Write> Write for Passthrough<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<W: Write> FinishWrite for Passthrough<W> {
    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.0.flush()
    }
}

impl<W: Write> FinishWrite for GzEncoder<W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        GzEncoder::finish(*self)?.flush()
    }
}

impl<W: Write> FinishWrite for DeflateEncoder<W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        DeflateEncoder::finish(*self)?.flush()
    }
}

impl<W: Write> FinishWrite for BzEncoder<W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        BzEncoder::finish(*self)?.flush()
    }
}

impl<W: Write> FinishWrite for XzEncoder<W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        XzEncoder::finish(*self)?.flush()
    }
}

impl<W: Write> FinishWrite for ZstdEncoder<'static, W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        ZstdEncoder::finish(*self)?.flush()
    }
}

impl<W: Write> FinishWrite for BrotliEncoder<W> {
    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.flush()?;
        // into_inner closes the brotli stream.
        let mut inner = BrotliEncoder::into_inner(*self);
        inner.flush()
    }
}

/// Buffers the payload and writes a single-entry container on finish.
struct SingleEntryEncoder<'a> {
    buf: Vec<u8>,
    dst: Box<dyn Write + 'a>,
    level: Level,
    container: &'static dyn Codec,
}

impl Write for SingleEntryEncoder<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl FinishWrite for SingleEntryEncoder<'_> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let SingleEntryEncoder {
            buf,
            mut dst,
            level,
            container,
        } = *self;
        let mut out = Cursor::new(Vec::new());
        let mut sink = container
            .archive(Box::new(&mut out), level)
            .map_err(io::Error::other)?;
        sink.add_entry(SINGLE_ENTRY_NAME, &mut buf.as_slice())
            .map_err(io::Error::other)?;
        sink.finish().map_err(io::Error::other)?;
        dst.write_all(out.get_ref())?;
        dst.flush()
    }
}

// ---------------------------------------------------------------------------
// Codecs
// ---------------------------------------------------------------------------

/// No transformation; output equals input.
pub struct Store;

impl Codec for Store {
    fn id(&self) -> &'static str {
        "store"
    }

    fn encoder<'a>(
        &self,
        dst: Box<dyn Write + 'a>,
        _level: Level,
    ) -> Result<Box<dyn FinishWrite + 'a>> {
        Ok(Box::new(Passthrough(dst)))
    }

    fn decoder<'a>(&self, src: Box<dyn Read + 'a>) -> Result<Box<dyn Read + 'a>> {
        Ok(src)
    }
}

/// ZIP container holding one Deflate entry. The default algorithm.
pub struct Zip;

impl Codec for Zip {
    fn id(&self) -> &'static str {
        "zip"
    }

    fn is_container(&self) -> bool {
        true
    }

    fn encoder<'a>(
        &self,
        dst: Box<dyn Write + 'a>,
        level: Level,
    ) -> Result<Box<dyn FinishWrite + 'a>> {
        Ok(Box::new(SingleEntryEncoder {
            buf: Vec::new(),
            dst,
            level,
            container: &Zip,
        }))
    }

    fn decoder<'a>(&self, mut src: Box<dyn Read + 'a>) -> Result<Box<dyn Read + 'a>> {
        let mut raw = Vec::new();
        src.read_to_end(&mut raw)?;
        let mut archive = ZipArchive::new(Cursor::new(raw))?;
        if archive.len() == 0 {
            return Err(CodecError::InvalidData("zip archive has no entries".into()));
        }
        let mut out = Vec::new();
        archive.by_index(0)?.read_to_end(&mut out)?;
        Ok(Box::new(Cursor::new(out)))
    }

    fn archive<'a>(
        &self,
        dst: Box<dyn WriteSeek + 'a>,
        level: Level,
    ) -> Result<Box<dyn EntrySink + 'a>> {
        Ok(Box::new(ArchiveWriter::new(dst, level)))
    }

    fn extract(&self, src: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>> {
        archive::extract_archive(src, dest_dir)
    }
}

/// 7z container with LZMA2 entries.
///
/// The LZMA2 preset is fixed, so every level gives the same output. Entries
/// carry no timestamps or attributes, keeping archives reproducible.
pub struct SevenZ;

impl Codec for SevenZ {
    fn id(&self) -> &'static str {
        "7z"
    }

    fn is_container(&self) -> bool {
        true
    }

    fn encoder<'a>(
        &self,
        dst: Box<dyn Write + 'a>,
        level: Level,
    ) -> Result<Box<dyn FinishWrite + 'a>> {
        Ok(Box::new(SingleEntryEncoder {
            buf: Vec::new(),
            dst,
            level,
            container: &SevenZ,
        }))
    }

    fn decoder<'a>(&self, mut src: Box<dyn Read + 'a>) -> Result<Box<dyn Read + 'a>> {
        let mut raw = Vec::new();
        src.read_to_end(&mut raw)?;
        let out = archive::first_7z_entry(Cursor::new(raw))?;
        Ok(Box::new(Cursor::new(out)))
    }

    fn archive<'a>(
        &self,
        dst: Box<dyn WriteSeek + 'a>,
        _level: Level,
    ) -> Result<Box<dyn EntrySink + 'a>> {
        Ok(Box::new(SevenZArchiveWriter::new(dst)?))
    }

    fn extract(&self, src: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>> {
        archive::extract_7z(src, dest_dir)
    }
}

/// Gzip (RFC 1952). The header carries no timestamp, keeping output stable.
pub struct Gzip;

impl Codec for Gzip {
    fn id(&self) -> &'static str {
        "gzip"
    }

    fn encoder<'a>(
        &self,
        dst: Box<dyn Write + 'a>,
        level: Level,
    ) -> Result<Box<dyn FinishWrite + 'a>> {
        Ok(Box::new(GzEncoder::new(dst, FlateLevel::new(level.get()))))
    }

    fn decoder<'a>(&self, src: Box<dyn Read + 'a>) -> Result<Box<dyn Read + 'a>> {
        Ok(Box::new(GzDecoder::new(src)))
    }
}

/// Raw Deflate stream (RFC 1951).
pub struct Deflate;

impl Codec for Deflate {
    fn id(&self) -> &'static str {
        "deflate"
    }

    fn encoder<'a>(
        &self,
        dst: Box<dyn Write + 'a>,
        level: Level,
    ) -> Result<Box<dyn FinishWrite + 'a>> {
        Ok(Box::new(DeflateEncoder::new(
            dst,
            FlateLevel::new(level.get()),
        )))
    }

    fn decoder<'a>(&self, src: Box<dyn Read + 'a>) -> Result<Box<dyn Read + 'a>> {
        Ok(Box::new(DeflateDecoder::new(src)))
    }
}

pub struct Bzip2;

impl Codec for Bzip2 {
    fn id(&self) -> &'static str {
        "bzip2"
    }

    fn encoder<'a>(
        &self,
        dst: Box<dyn Write + 'a>,
        level: Level,
    ) -> Result<Box<dyn FinishWrite + 'a>> {
        Ok(Box::new(BzEncoder::new(dst, BzLevel::new(level.get()))))
    }

    fn decoder<'a>(&self, src: Box<dyn Read + 'a>) -> Result<Box<dyn Read + 'a>> {
        Ok(Box::new(BzDecoder::new(src)))
    }
}

/// Zstandard, single-threaded so output does not depend on scheduling.
pub struct Zstd;

impl Codec for Zstd {
    fn id(&self) -> &'static str {
        "zstd"
    }

    fn encoder<'a>(
        &self,
        dst: Box<dyn Write + 'a>,
        level: Level,
    ) -> Result<Box<dyn FinishWrite + 'a>> {
        Ok(Box::new(ZstdEncoder::new(dst, level.get() as i32)?))
    }

    fn decoder<'a>(&self, src: Box<dyn Read + 'a>) -> Result<Box<dyn Read + 'a>> {
        Ok(Box::new(ZstdDecoder::new(src)?))
    }
}

/// XZ/LZMA2.
pub struct Xz;

impl Codec for Xz {
    fn id(&self) -> &'static str {
        "xz"
    }

    fn encoder<'a>(
        &self,
        dst: Box<dyn Write + 'a>,
        level: Level,
    ) -> Result<Box<dyn FinishWrite + 'a>> {
        Ok(Box::new(XzEncoder::new(dst, level.get())))
    }

    fn decoder<'a>(&self, src: Box<dyn Read + 'a>) -> Result<Box<dyn Read + 'a>> {
        Ok(Box::new(XzDecoder::new(src)))
    }
}

/// Brotli. Quality equals the level; window fixed at 2^22.
pub struct Brotli;

impl Codec for Brotli {
    fn id(&self) -> &'static str {
        "brotli"
    }

    fn encoder<'a>(
        &self,
        dst: Box<dyn Write + 'a>,
        level: Level,
    ) -> Result<Box<dyn FinishWrite + 'a>> {
        Ok(Box::new(BrotliEncoder::new(
            dst,
            BROTLI_BUFFER_SIZE,
            level.get(),
            BROTLI_LG_WINDOW_SIZE,
        )))
    }

    fn decoder<'a>(&self, src: Box<dyn Read + 'a>) -> Result<Box<dyn Read + 'a>> {
        Ok(Box::new(BrotliDecoder::new(src, BROTLI_BUFFER_SIZE)))
    }
}
