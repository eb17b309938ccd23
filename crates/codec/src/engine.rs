//! Capability table mapping algorithm identifiers to codecs.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::instrument;

use crate::codec::{Brotli, Bzip2, Codec, Deflate, Gzip, SevenZ, Store, Xz, Zip, Zstd};
use crate::{CodecError, Level, Result};

/// Registry of codecs keyed by identifier.
#[derive(Clone)]
pub struct CompressionEngine {
    codecs: BTreeMap<&'static str, Arc<dyn Codec>>,
}

impl Default for CompressionEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for CompressionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressionEngine")
            .field("algorithms", &self.algorithms())
            .finish()
    }
}

impl CompressionEngine {
    /// Creates an engine with no codecs registered.
    pub fn empty() -> Self {
        Self {
            codecs: BTreeMap::new(),
        }
    }

    /// Creates an engine with every built-in codec registered.
    pub fn with_defaults() -> Self {
        let mut engine = Self::empty();
        engine.register(Arc::new(Store));
        engine.register(Arc::new(Zip));
        engine.register(Arc::new(SevenZ));
        engine.register(Arc::new(Gzip));
        engine.register(Arc::new(Deflate));
        engine.register(Arc::new(Bzip2));
        engine.register(Arc::new(Zstd));
        engine.register(Arc::new(Xz));
        engine.register(Arc::new(Brotli));
        engine
    }

    /// Registers `codec`, replacing any codec with the same identifier.
    pub fn register(&mut self, codec: Arc<dyn Codec>) {
        self.codecs.insert(codec.id(), codec);
    }

    /// Registered identifiers in sorted order.
    pub fn algorithms(&self) -> Vec<&'static str> {
        self.codecs.keys().copied().collect()
    }

    /// Looks up a codec by identifier.
    pub fn get(&self, algorithm: &str) -> Result<Arc<dyn Codec>> {
        self.codecs
            .get(algorithm)
            .cloned()
            .ok_or_else(|| CodecError::UnsupportedAlgorithm(algorithm.to_string()))
    }

    /// Picks the codec whose extension matches the last extension of `path`.
    pub fn for_path(&self, path: &Path) -> Result<Arc<dyn Codec>> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        self.codecs
            .values()
            .find(|c| c.extension() == ext)
            .cloned()
            .ok_or(CodecError::UnsupportedAlgorithm(ext))
    }

    /// Validates an algorithm/level pair without touching any data.
    pub fn resolve(&self, algorithm: &str, level: u32) -> Result<(Arc<dyn Codec>, Level)> {
        let codec = self.get(algorithm)?;
        let level = Level::new(level)?;
        Ok((codec, level))
    }

    /// Compresses a byte slice in memory.
    #[instrument(skip(self, input), fields(input_size = input.len(), output_size))]
    pub fn compress(&self, input: &[u8], algorithm: &str, level: u32) -> Result<Vec<u8>> {
        let (codec, level) = self.resolve(algorithm, level)?;
        let mut output = Vec::new();
        let mut encoder = codec.encoder(Box::new(&mut output), level)?;
        encoder.write_all(input)?;
        encoder.finish()?;
        tracing::Span::current().record("output_size", output.len());
        Ok(output)
    }

    /// Decompresses a byte slice in memory.
    #[instrument(skip(self, input), fields(input_size = input.len(), output_size))]
    pub fn decompress(&self, input: &[u8], algorithm: &str) -> Result<Vec<u8>> {
        let codec = self.get(algorithm)?;
        let mut output = Vec::new();
        codec
            .decoder(Box::new(input))?
            .read_to_end(&mut output)
            .map_err(|e| CodecError::InvalidData(e.to_string()))?;
        tracing::Span::current().record("output_size", output.len());
        Ok(output)
    }

    /// Decompresses from a reader to a writer, returning bytes written.
    pub fn decompress_stream<R: Read, W: Write>(
        &self,
        algorithm: &str,
        reader: R,
        mut writer: W,
    ) -> Result<u64> {
        let codec = self.get(algorithm)?;
        let mut decoder = codec.decoder(Box::new(reader))?;
        let n = std::io::copy(&mut decoder, &mut writer)?;
        writer.flush()?;
        Ok(n)
    }
}
