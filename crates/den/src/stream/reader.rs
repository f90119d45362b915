//! Stream replay.
//!
//! [`StreamReader`] parses the index of a recording and serves samples
//! either sequentially or chunk by chunk. Chunk reads seek the payload only
//! when its cursor is not already at the chunk, so reading chunks in order
//! never seeks.

use super::index::{self, IndexHeader};
use super::{index_path, payload_path, Chunk, ChunkId, Metadata, SampleBatch, StreamDescriptor, Version};
use crate::config::{StreamConfig, TextFormat};
use crate::error::{Result, StreamError};
use crate::file::{AccessMode, Encoding, FileHandle, Origin};
use std::path::{Path, PathBuf};
use tracing::{debug, warn, Span};

struct Session {
    index_path: PathBuf,
    header: IndexHeader,
    payload: FileHandle,
    /// Cursor of [`ChunkId::Next`].
    next: usize,
}

impl Session {
    /// Reads `num` samples into the front of `batch`; returns bytes read.
    fn read_samples(&mut self, batch: &mut SampleBatch, num: usize) -> Result<usize> {
        batch.resize_samples(num);
        let desc = &self.header.descriptor;
        let count = num * desc.dim;
        let (dim, byte) = (desc.dim, desc.byte);
        let bytes = batch.bytes_mut();
        match self.header.encoding {
            Encoding::Ascii => self.payload.read(bytes, dim, count),
            _ => self.payload.read(bytes, byte, count),
        }
    }
}

/// Reads a recording written by [`StreamWriter`](super::StreamWriter).
///
/// # Example
///
/// ```rust,ignore
/// use den::stream::{ChunkId, SampleBatch, StreamReader};
///
/// let mut reader = StreamReader::new();
/// let desc = reader.open("recording")?;
/// let mut batch = SampleBatch::for_descriptor(&desc, 0);
/// while reader.read_chunk(&mut batch, ChunkId::Next)? > 0 {
///     // ...
/// }
/// ```
pub struct StreamReader {
    config: StreamConfig,
    span: Span,
    session: Option<Session>,
}

impl Default for StreamReader {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamReader {
    /// Creates a closed reader with default configuration.
    pub fn new() -> Self {
        Self::with_config(StreamConfig::default())
    }

    /// Creates a closed reader with custom configuration.
    pub fn with_config(config: StreamConfig) -> Self {
        Self {
            config,
            span: tracing::debug_span!("stream_reader"),
            session: None,
        }
    }

    /// Replaces the reader's logging span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Parses the index at `path` (`.stream` is appended if missing) and
    /// opens its payload. Returns the recorded descriptor.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<StreamDescriptor> {
        let _enter = self.span.enter();
        if let Some(session) = &self.session {
            warn!("stream already open ('{}')", session.index_path.display());
            return Err(StreamError::AlreadyOpen(session.index_path.clone()));
        }

        let index_path = index_path(path);
        let text = self.read_index(&index_path)?;
        let header = index::parse(&text).map_err(|e| {
            warn!("could not parse index '{}': {}", index_path.display(), e);
            e
        })?;

        let payload_path = payload_path(&index_path);
        let mut payload = FileHandle::create(header.encoding, AccessMode::Read, &payload_path)
            .with_span(tracing::debug_span!(parent: &self.span, "file", path = %payload_path.display()));
        let delim = header
            .delim
            .clone()
            .unwrap_or_else(|| self.config.text.delim.clone());
        payload.set_format(TextFormat {
            delim,
            ..self.config.text.clone()
        })?;
        payload.set_type(header.descriptor.sample_type);
        payload.open()?;

        debug!(
            "opened stream ('{}', {}, {}, {} chunks, complete={})",
            index_path.display(),
            header.encoding,
            header.version,
            header.chunks.len(),
            header.complete
        );

        let descriptor = header.descriptor.clone();
        self.session = Some(Session {
            index_path,
            header,
            payload,
            next: 0,
        });
        Ok(descriptor)
    }

    fn read_index(&self, path: &Path) -> Result<String> {
        let mut index = FileHandle::create(Encoding::Ascii, AccessMode::Read, path)
            .with_span(tracing::debug_span!(parent: &self.span, "file", path = %path.display()));
        index.open()?;

        let mut text = String::new();
        while let Some(line) = index.read_line(self.config.text.line_capacity)? {
            text.push_str(&line);
            text.push('\n');
        }
        index.close()?;
        Ok(text)
    }

    fn session(&mut self) -> Result<&mut Session> {
        self.session.as_mut().ok_or_else(|| {
            let _enter = self.span.enter();
            warn!("stream not open");
            StreamError::Closed(PathBuf::new())
        })
    }

    /// Reads `batch.num()` samples from the current payload position,
    /// ignoring the chunk table, and advances the batch time by the
    /// duration read.
    pub fn read(&mut self, batch: &mut SampleBatch) -> Result<usize> {
        let span = self.span.clone();
        let _enter = span.enter();
        let session = self.session()?;
        if let Err(e) = session.header.descriptor.check(batch) {
            warn!("stream is not compatible: {}", e);
            return Err(e);
        }

        let num = batch.num();
        if num > 0 {
            let expected = num * batch.sample_bytes();
            let actual = session.read_samples(batch, num)?;
            if actual != expected {
                warn!("could not read data ({} of {} bytes)", actual, expected);
                return Err(StreamError::ShortRead { expected, actual });
            }
        }
        batch.set_time(batch.time() + num as f64 / batch.sample_rate());
        Ok(num)
    }

    /// Reads one chunk into `batch`, growing it if needed. Returns the
    /// chunk's sample count; [`ChunkId::Next`] returns 0 once every chunk
    /// has been served.
    pub fn read_chunk(&mut self, batch: &mut SampleBatch, id: ChunkId) -> Result<usize> {
        let span = self.span.clone();
        let _enter = span.enter();
        let session = self.session()?;
        if let Err(e) = session.header.descriptor.check(batch) {
            warn!("stream is not compatible: {}", e);
            return Err(e);
        }

        let count = session.header.chunks.len();
        let chunk_id = match id {
            ChunkId::At(i) if i >= count => {
                warn!("requested chunk '{}' exceeds #chunks '{}'", i, count);
                return Err(StreamError::ChunkOutOfRange {
                    requested: i,
                    count,
                });
            }
            ChunkId::At(i) => i,
            ChunkId::Next if session.next >= count => return Ok(0),
            ChunkId::Next => {
                session.next += 1;
                session.next - 1
            }
        };

        let chunk = session.header.chunks[chunk_id];
        batch.set_time(chunk.from);
        let num = chunk.num as usize;
        if num == 0 {
            batch.resize_samples(0);
            return Ok(0);
        }

        if session.payload.tell()? != chunk.byte {
            let offset = i64::try_from(chunk.byte).map_err(|_| {
                StreamError::Format(format!("chunk offset {} out of range", chunk.byte))
            })?;
            session.payload.seek(offset, Origin::Begin)?;
        }

        let expected = num * batch.sample_bytes();
        let actual = session.read_samples(batch, num)?;
        if actual != expected {
            warn!(
                "could not read chunk {} ({} of {} bytes)",
                chunk_id, actual, expected
            );
            return Err(StreamError::ShortRead { expected, actual });
        }
        Ok(num)
    }

    /// Rewinds the [`ChunkId::Next`] cursor to the first chunk.
    pub fn reset(&mut self) -> Result<()> {
        self.session()?.next = 0;
        Ok(())
    }

    /// Releases the payload and the chunk table.
    pub fn close(&mut self) -> Result<()> {
        let _enter = self.span.enter();
        let Some(mut session) = self.session.take() else {
            warn!("stream not open");
            return Err(StreamError::Closed(PathBuf::new()));
        };
        session.payload.close().map_err(|e| {
            warn!(
                "could not close data file '{}': {}",
                session.index_path.display(),
                e
            );
            e
        })?;
        debug!("closed stream ('{}')", session.index_path.display());
        Ok(())
    }

    /// Returns true while a recording is open.
    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    fn header(&self) -> Option<&IndexHeader> {
        self.session.as_ref().map(|s| &s.header)
    }

    /// Returns the recorded descriptor.
    pub fn descriptor(&self) -> Option<&StreamDescriptor> {
        self.header().map(|h| &h.descriptor)
    }

    /// Returns the index version.
    pub fn version(&self) -> Option<Version> {
        self.header().map(|h| h.version)
    }

    /// Returns the payload encoding.
    pub fn encoding(&self) -> Option<Encoding> {
        self.header().map(|h| h.encoding)
    }

    /// Returns the metadata block, if any.
    pub fn metadata(&self) -> Option<&Metadata> {
        self.header().and_then(|h| h.meta.as_ref())
    }

    /// Returns the chunk table.
    pub fn chunks(&self) -> &[Chunk] {
        self.header().map(|h| h.chunks.as_slice()).unwrap_or(&[])
    }

    /// Returns the number of chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks().len()
    }

    /// Returns the total number of samples over all chunks.
    pub fn sample_count(&self) -> u64 {
        self.descriptor().map(|d| d.sample_count).unwrap_or(0)
    }

    /// Returns true if the index was closed by its writer.
    pub fn is_complete(&self) -> bool {
        self.header().map(|h| h.complete).unwrap_or(false)
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        if self.session.is_some() {
            if let Err(e) = self.close() {
                warn!("Failed to close stream on drop: {:?}", e);
            }
        }
    }
}
