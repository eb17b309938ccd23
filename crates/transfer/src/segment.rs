use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::{Result, TransferError};

/// A chunk of file data for transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Base name of the owning file.
    pub file_name: String,
    /// Zero-based position in the file's chunk sequence.
    pub index: u64,
    /// Byte offset within the file.
    pub offset: u64,
    /// Size of this chunk in bytes.
    pub size: usize,
    /// Raw chunk data.
    pub data: Vec<u8>,
    /// SHA-256 hex checksum of `data`.
    pub checksum: String,
}

/// Position and length of one chunk, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub index: u64,
    pub offset: u64,
    pub len: u64,
}

impl ChunkSpan {
    /// First byte past the end of this chunk.
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Chunk boundaries
// ---------------------------------------------------------------------------

/// Iterator over the chunk boundaries of a file. See [`chunk_spans`].
#[derive(Debug, Clone)]
pub struct ChunkSpans {
    total: u64,
    chunk_size: u64,
    next: u64,
    count: u64,
}

impl ChunkSpans {
    /// Total number of chunks, regardless of iteration progress.
    pub fn num_chunks(&self) -> u64 {
        self.count
    }

    /// Span of chunk `index`, or `None` past the end.
    pub fn get(&self, index: u64) -> Option<ChunkSpan> {
        if index >= self.count {
            return None;
        }
        let offset = index * self.chunk_size;
        let len = (self.total - offset).min(self.chunk_size);
        Some(ChunkSpan { index, offset, len })
    }
}

impl Iterator for ChunkSpans {
    type Item = ChunkSpan;

    fn next(&mut self) -> Option<ChunkSpan> {
        let span = self.get(self.next)?;
        self.next += 1;
        Some(span)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = usize::try_from(self.count - self.next).unwrap_or(usize::MAX);
        (left, Some(left))
    }
}

impl ExactSizeIterator for ChunkSpans {}

/// Splits `total` bytes into contiguous spans of `chunk_size`.
///
/// Pure function of its inputs: the last span holds the remainder, and an
/// empty input yields no spans.
pub fn chunk_spans(total: u64, chunk_size: u64) -> Result<ChunkSpans> {
    if chunk_size == 0 {
        return Err(TransferError::InvalidConfiguration(
            "chunk size must be greater than zero".into(),
        ));
    }
    Ok(ChunkSpans {
        total,
        chunk_size,
        next: 0,
        count: total.div_ceil(chunk_size),
    })
}

// ---------------------------------------------------------------------------
// Segmenter
// ---------------------------------------------------------------------------

/// Reads a file in fixed-size chunks with SHA-256 checksums.
///
/// Iterating yields chunks in index order. The file is opened read-only and
/// its size is captured once at construction.
pub struct Segmenter {
    file: File,
    file_name: String,
    spans: ChunkSpans,
    next_index: u64,
}

impl Segmenter {
    /// Opens `path` for chunked reading.
    pub fn new(path: &Path, chunk_size: u64) -> Result<Self> {
        if chunk_size == 0 {
            return Err(TransferError::InvalidConfiguration(
                "chunk size must be greater than zero".into(),
            ));
        }
        let file = File::open(path)?;
        let total = file.metadata()?.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TransferError::InvalidPath(path.display().to_string()))?;
        Ok(Self {
            file,
            file_name,
            spans: chunk_spans(total, chunk_size)?,
            next_index: 0,
        })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Total file size in bytes.
    pub fn total_size(&self) -> u64 {
        self.spans.total
    }

    pub fn chunk_size(&self) -> u64 {
        self.spans.chunk_size
    }

    pub fn num_chunks(&self) -> u64 {
        self.spans.count
    }

    /// Index of the chunk the iterator yields next.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Resumes iteration at `index` (for resume after a partial upload).
    ///
    /// `index == num_chunks()` is allowed and leaves the iterator exhausted.
    pub fn seek_to_index(&mut self, index: u64) -> Result<()> {
        if index > self.spans.count {
            return Err(TransferError::ChunkOutOfRange {
                index,
                num_chunks: self.spans.count,
            });
        }
        self.next_index = index;
        Ok(())
    }

    /// Reads chunk `index` directly, without moving the iterator.
    pub fn chunk_at(&mut self, index: u64) -> Result<Chunk> {
        let span = self
            .spans
            .get(index)
            .ok_or(TransferError::ChunkOutOfRange {
                index,
                num_chunks: self.spans.count,
            })?;

        let size = usize::try_from(span.len).map_err(|_| {
            TransferError::InvalidConfiguration(format!(
                "chunk of {} bytes does not fit in memory",
                span.len
            ))
        })?;
        let mut data = vec![0u8; size];
        self.file.seek(SeekFrom::Start(span.offset))?;
        self.file.read_exact(&mut data)?;

        Ok(Chunk {
            file_name: self.file_name.clone(),
            index,
            offset: span.offset,
            size,
            checksum: checksum_bytes(&data),
            data,
        })
    }
}

impl Iterator for Segmenter {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index >= self.spans.count {
            return None;
        }
        let result = self.chunk_at(self.next_index);
        // A read error ends the sequence.
        self.next_index = match result {
            Ok(_) => self.next_index + 1,
            Err(_) => self.spans.count,
        };
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const MIB: u64 = 1024 * 1024;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    fn lens(total: u64, chunk_size: u64) -> Vec<u64> {
        chunk_spans(total, chunk_size).unwrap().map(|s| s.len).collect()
    }

    #[test]
    fn checksum_bytes_deterministic() {
        let c1 = checksum_bytes(b"hello world");
        let c2 = checksum_bytes(b"hello world");
        assert_eq!(c1, c2);
        assert_eq!(c1.len(), 64); // SHA-256 = 64 hex chars.
        assert_ne!(c1, checksum_bytes(b"hello"));
    }

    #[test]
    fn spans_exact_multiple() {
        assert_eq!(lens(150 * MIB, 50 * MIB), vec![50 * MIB; 3]);
    }

    #[test]
    fn spans_with_remainder() {
        assert_eq!(lens(120 * MIB, 50 * MIB), vec![50 * MIB, 50 * MIB, 20 * MIB]);
    }

    #[test]
    fn spans_empty_file() {
        let spans = chunk_spans(0, 4).unwrap();
        assert_eq!(spans.num_chunks(), 0);
        assert_eq!(spans.count(), 0);
    }

    #[test]
    fn spans_single_byte_chunks() {
        assert_eq!(lens(3, 1), vec![1, 1, 1]);
    }

    #[test]
    fn spans_zero_chunk_size_rejected() {
        assert!(matches!(
            chunk_spans(10, 0),
            Err(TransferError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn spans_cover_file_without_gaps() {
        for (total, size) in [(1, 7), (7, 7), (8, 7), (1000, 33), (4096, 1024)] {
            let spans: Vec<_> = chunk_spans(total, size).unwrap().collect();
            let mut expected_offset = 0;
            for (i, span) in spans.iter().enumerate() {
                assert_eq!(span.index, i as u64);
                assert_eq!(span.offset, expected_offset);
                assert!(span.len > 0 && span.len <= size);
                expected_offset = span.end();
            }
            assert_eq!(expected_offset, total);
        }
    }

    #[test]
    fn spans_exact_size() {
        let spans = chunk_spans(10, 4).unwrap();
        assert_eq!(spans.len(), 3);
        assert_eq!(spans.get(2), Some(ChunkSpan { index: 2, offset: 8, len: 2 }));
        assert_eq!(spans.get(3), None);
    }

    #[test]
    fn segmenter_reads_all() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"AABBCCDDEE");

        let seg = Segmenter::new(&path, 4).unwrap();
        assert_eq!(seg.total_size(), 10);
        assert_eq!(seg.num_chunks(), 3);
        assert_eq!(seg.file_name(), "test.bin");

        let chunks: Vec<Chunk> = seg.map(|c| c.unwrap()).collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(&chunks[0].data, b"AABB");
        assert_eq!(chunks[1].offset, 4);
        assert_eq!(&chunks[2].data, b"EE");
        assert_eq!(chunks[2].size, 2);
        assert_eq!(chunks[2].index, 2);
        assert_eq!(chunks[0].checksum, checksum_bytes(b"AABB"));
    }

    #[test]
    fn segmenter_concatenation_reproduces_file() {
        let dir = TempDir::new().unwrap();
        let original: Vec<u8> = (0..10_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let path = create_test_file(dir.path(), "data.bin", &original);

        let mut rebuilt = Vec::new();
        for chunk in Segmenter::new(&path, 333).unwrap() {
            rebuilt.extend_from_slice(&chunk.unwrap().data);
        }
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn segmenter_is_restartable() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "r.bin", b"0123456789abcdef");

        let first: Vec<_> = Segmenter::new(&path, 5).unwrap().map(|c| c.unwrap()).collect();
        let second: Vec<_> = Segmenter::new(&path, 5).unwrap().map(|c| c.unwrap()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn segmenter_empty_file_yields_nothing() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "empty.bin", b"");
        let mut seg = Segmenter::new(&path, 4).unwrap();
        assert_eq!(seg.num_chunks(), 0);
        assert!(seg.next().is_none());
    }

    #[test]
    fn segmenter_zero_chunk_size_rejected() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "x.bin", b"x");
        assert!(matches!(
            Segmenter::new(&path, 0),
            Err(TransferError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn segmenter_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let result = Segmenter::new(&dir.path().join("nope.bin"), 4);
        assert!(matches!(result, Err(TransferError::Io(_))));
    }

    #[test]
    fn segmenter_seek_and_resume() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"0123456789");

        let mut seg = Segmenter::new(&path, 4).unwrap();
        seg.seek_to_index(1).unwrap();
        assert_eq!(seg.next_index(), 1);

        let c = seg.next().unwrap().unwrap();
        assert_eq!(c.offset, 4);
        assert_eq!(&c.data, b"4567");

        seg.seek_to_index(3).unwrap();
        assert!(seg.next().is_none());
        assert!(matches!(
            seg.seek_to_index(4),
            Err(TransferError::ChunkOutOfRange { index: 4, num_chunks: 3 })
        ));
    }

    #[test]
    fn chunk_at_random_access() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"0123456789");

        let mut seg = Segmenter::new(&path, 4).unwrap();
        assert_eq!(&seg.chunk_at(2).unwrap().data, b"89");
        assert_eq!(&seg.chunk_at(0).unwrap().data, b"0123");
        assert!(seg.chunk_at(3).is_err());
        // Random access leaves the iterator position alone.
        assert_eq!(seg.next_index(), 0);
        assert_eq!(&seg.next().unwrap().unwrap().data, b"0123");
    }
}
