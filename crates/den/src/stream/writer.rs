//! Stream recording.
//!
//! [`StreamWriter`] owns the write side of one recording: it renders the
//! index header, appends one chunk line per write (or per run of
//! continued writes) and encodes sample bytes into the payload file.

use super::index;
use super::{index_path, payload_path, Chunk, Metadata, SampleBatch, StreamDescriptor, Version};
use crate::config::{StreamConfig, TextFormat};
use crate::error::{Result, StreamError};
use crate::file::{AccessMode, Encoding, FileHandle};
use std::path::{Path, PathBuf};
use tracing::{debug, warn, Span};

/// Summary of a finished recording.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    /// Index file path (empty for console recordings).
    pub index_path: PathBuf,
    /// Payload file path (empty for console recordings).
    pub payload_path: PathBuf,
    /// Stream shape with the total sample count.
    pub descriptor: StreamDescriptor,
    /// Payload encoding.
    pub encoding: Encoding,
    /// Index version.
    pub version: Version,
    /// Number of chunks in the index.
    pub chunk_count: usize,
}

/// Pending chunk of a run of continued writes.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Accumulator {
    Idle,
    Accumulating { from: f64, byte: u64, num: u64 },
}

struct Session {
    index_path: PathBuf,
    payload_path: PathBuf,
    descriptor: StreamDescriptor,
    encoding: Encoding,
    version: Version,
    /// `None` for console recordings.
    index: Option<FileHandle>,
    payload: FileHandle,
    chunks: Vec<Chunk>,
    accumulator: Accumulator,
}

impl Session {
    fn emit(&mut self, from: f64, byte: u64, num: u64) -> Result<()> {
        let chunk = Chunk {
            from,
            to: from + num as f64 / self.descriptor.sample_rate,
            byte,
            num,
        };
        if let Some(index) = &mut self.index {
            index.write_line(&index::chunk_line(&chunk))?;
        }
        self.chunks.push(chunk);
        Ok(())
    }

    fn flush_run(&mut self) -> Result<bool> {
        match std::mem::replace(&mut self.accumulator, Accumulator::Idle) {
            Accumulator::Idle => Ok(false),
            Accumulator::Accumulating { from, byte, num } => {
                self.emit(from, byte, num)?;
                Ok(true)
            }
        }
    }

    fn sync(&mut self) -> Result<()> {
        self.payload.flush()?;
        if let Some(index) = &mut self.index {
            index.flush()?;
        }
        Ok(())
    }
}

/// Writes a recording as an index file plus a payload file.
///
/// # Example
///
/// ```rust,ignore
/// use den::file::Encoding;
/// use den::stream::{SampleBatch, SampleType, StreamDescriptor, StreamWriter, Version};
///
/// let desc = StreamDescriptor::new(10.0, 3, SampleType::Float);
/// let mut writer = StreamWriter::new();
/// writer.open(&desc, "recording", Encoding::Binary, Version::V2, None)?;
/// writer.write(&SampleBatch::from_values(10.0, 3, 0.0, &[0.0f32; 15]), false)?;
/// let recording = writer.close()?;
/// ```
pub struct StreamWriter {
    config: StreamConfig,
    span: Span,
    session: Option<Session>,
}

impl Default for StreamWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamWriter {
    /// Creates a closed writer with default configuration.
    pub fn new() -> Self {
        Self::with_config(StreamConfig::default())
    }

    /// Creates a closed writer with custom configuration.
    pub fn with_config(config: StreamConfig) -> Self {
        Self {
            config,
            span: tracing::debug_span!("stream_writer"),
            session: None,
        }
    }

    /// Replaces the writer's logging span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Changes the text delimiter; only allowed while closed.
    pub fn set_delim(&mut self, delim: impl Into<String>) -> Result<()> {
        if let Some(session) = &self.session {
            let _enter = self.span.enter();
            warn!("cannot change delimiter of an open stream");
            return Err(StreamError::AlreadyOpen(session.index_path.clone()));
        }
        let format = TextFormat {
            delim: delim.into(),
            ..self.config.text.clone()
        };
        if let Err(e) = format.separator() {
            let _enter = self.span.enter();
            warn!("{}", e);
            return Err(e);
        }
        self.config.text = format;
        Ok(())
    }

    /// Opens a recording at `path` (`.stream` is appended if missing). An
    /// empty path records to standard output without an index.
    pub fn open(
        &mut self,
        descriptor: &StreamDescriptor,
        path: impl AsRef<Path>,
        encoding: Encoding,
        version: Version,
        meta: Option<&Metadata>,
    ) -> Result<()> {
        let _enter = self.span.enter();
        if let Some(session) = &self.session {
            warn!("stream already open ('{}')", session.index_path.display());
            return Err(StreamError::AlreadyOpen(session.index_path.clone()));
        }
        if !version.is_structured() {
            warn!("version {} not supported", version);
            return Err(StreamError::UnsupportedVersion(version.number()));
        }
        if let Err(e) = descriptor.validate() {
            warn!("invalid stream descriptor: {}", e);
            return Err(e);
        }
        if let Err(e) = self.config.text.separator() {
            warn!("{}", e);
            return Err(e);
        }

        let path = path.as_ref();
        let console = path.as_os_str().is_empty();
        let (index_path, payload_path) = if console {
            (PathBuf::new(), PathBuf::new())
        } else {
            let index_path = index_path(path);
            let payload_path = payload_path(&index_path);
            (index_path, payload_path)
        };

        let index = if console {
            None
        } else {
            Some(self.open_index(&index_path, descriptor, encoding, version, meta)?)
        };

        let payload = if console {
            FileHandle::stdout(encoding)?
        } else {
            FileHandle::create(encoding, AccessMode::Write, &payload_path)
        };
        let mut payload = payload.with_span(
            tracing::debug_span!(parent: &self.span, "file", path = %payload_path.display()),
        );
        payload.set_format(self.config.text.clone())?;
        payload.set_lz4_config(self.config.lz4.clone());
        payload.set_type(descriptor.sample_type);
        if !console {
            payload.open()?;
        }

        debug!(
            "opened stream ('{}', {}, {}, console={})",
            index_path.display(),
            encoding,
            version,
            console
        );

        let mut session = Session {
            index_path,
            payload_path,
            descriptor: StreamDescriptor {
                sample_count: 0,
                ..descriptor.clone()
            },
            encoding,
            version,
            index,
            payload,
            chunks: Vec::new(),
            accumulator: Accumulator::Idle,
        };
        if self.config.sync_chunks {
            session.sync()?;
        }
        self.session = Some(session);
        Ok(())
    }

    fn open_index(
        &self,
        path: &Path,
        descriptor: &StreamDescriptor,
        encoding: Encoding,
        version: Version,
        meta: Option<&Metadata>,
    ) -> Result<FileHandle> {
        let mut index = FileHandle::create(Encoding::Ascii, AccessMode::Write, path)
            .with_span(tracing::debug_span!(parent: &self.span, "file", path = %path.display()));
        index.open()?;

        index.write_line(index::PROLOG)?;
        index.write_line(&index::stream_line(version))?;
        index.write_line(&index::info_line(
            encoding,
            descriptor,
            &self.config.text.delim,
        ))?;

        if let Some(meta) = meta {
            let is_image = descriptor.sample_type == super::SampleType::Image;
            let supported = match meta {
                Metadata::Image { .. } => is_image,
                Metadata::Skeleton { .. } | Metadata::Face { .. } => !is_image,
                Metadata::Custom(_) => version >= Version::V3,
            };
            if supported {
                index.write_line(&index::meta_line(meta))?;
            } else {
                warn!(
                    "type '{}' in version {} doesn't support this meta information",
                    descriptor.sample_type, version
                );
            }
        }
        Ok(index)
    }

    /// Appends a batch. A non-continued write emits a chunk at the current
    /// payload position; continued writes are merged into one chunk that is
    /// emitted by the next non-continued write or by [`close`](Self::close).
    pub fn write(&mut self, batch: &SampleBatch, continued: bool) -> Result<()> {
        let _enter = self.span.enter();
        let Some(session) = self.session.as_mut() else {
            warn!("stream not open");
            return Err(StreamError::Closed(PathBuf::new()));
        };
        if let Err(e) = session.descriptor.check_layout(batch) {
            warn!("stream is not compatible: {}", e);
            return Err(e);
        }

        let byte = session.payload.tell()?;
        let num = batch.num() as u64;

        // Payload first: a failed write must not leave a chunk behind.
        if num > 0 {
            let bytes = batch.bytes();
            let written = match session.encoding {
                Encoding::Ascii => {
                    let dim = session.descriptor.dim;
                    session.payload.write(bytes, dim, batch.num() * dim)
                }
                _ => session.payload.write(bytes, 1, bytes.len()),
            };
            if let Err(e) = written {
                warn!("could not write {} samples: {}", num, e);
                return Err(e);
            }
        }

        if continued {
            session.accumulator = match session.accumulator {
                Accumulator::Idle => Accumulator::Accumulating {
                    from: batch.time(),
                    byte,
                    num,
                },
                Accumulator::Accumulating {
                    from,
                    byte: start,
                    num: pending,
                } => Accumulator::Accumulating {
                    from,
                    byte: start,
                    num: pending + num,
                },
            };
        } else {
            session.flush_run()?;
            session.emit(batch.time(), byte, num)?;
        }
        session.descriptor.sample_count += num;

        if !continued && self.config.sync_chunks {
            session.sync()?;
        }
        Ok(())
    }

    /// Emits any pending continued chunk, closes the index and releases
    /// both files.
    pub fn close(&mut self) -> Result<Recording> {
        let _enter = self.span.enter();
        let Some(mut session) = self.session.take() else {
            warn!("stream not open");
            return Err(StreamError::Closed(PathBuf::new()));
        };

        let mut result = session.flush_run().map(|_| ());
        if let Some(mut index) = session.index.take() {
            result = result
                .and_then(|_| index.write_line(index::CLOSE).map(|_| ()))
                .and(index.close());
        }
        let payload_result = if session.payload.is_shared() {
            session.payload.flush()
        } else {
            session.payload.close()
        };
        result = result.and(payload_result);

        if let Err(e) = result {
            warn!(
                "could not close stream ('{}'): {}",
                session.index_path.display(),
                e
            );
            return Err(e);
        }

        debug!(
            "closed stream ('{}', {} chunks, {} samples)",
            session.index_path.display(),
            session.chunks.len(),
            session.descriptor.sample_count
        );
        Ok(Recording {
            index_path: session.index_path,
            payload_path: session.payload_path,
            chunk_count: session.chunks.len(),
            descriptor: session.descriptor,
            encoding: session.encoding,
            version: session.version,
        })
    }

    /// Returns true while a recording is open.
    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Returns the open recording's descriptor with its running sample
    /// count.
    pub fn descriptor(&self) -> Option<&StreamDescriptor> {
        self.session.as_ref().map(|s| &s.descriptor)
    }

    /// Returns the chunks emitted so far.
    pub fn chunks(&self) -> &[Chunk] {
        self.session.as_ref().map(|s| s.chunks.as_slice()).unwrap_or(&[])
    }

    /// Returns the index path of the open recording.
    pub fn index_path(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.index_path.as_path())
    }

    /// Returns the text delimiter recorded in the index.
    pub fn delim(&self) -> &str {
        &self.config.text.delim
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        if self.session.is_some() {
            if let Err(e) = self.close() {
                warn!("Failed to close stream on drop: {:?}", e);
            }
        }
    }
}
