//! Error and Result types for Den stream operations.

use crate::file::AccessMode;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A convenience `Result` type for Den operations.
pub type Result<T> = std::result::Result<T, StreamError>;

/// The error type for file handle and stream operations.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The underlying OS resource could not be created, opened or closed.
    #[error("Resource error on '{}': {source}", path.display())]
    Resource {
        /// Path of the resource.
        path: PathBuf,
        /// Error reported by the OS.
        #[source]
        source: io::Error,
    },

    /// An operation was issued on a closed handle.
    #[error("Handle is closed: '{}'", .0.display())]
    Closed(PathBuf),

    /// A handle, writer or reader was opened twice.
    #[error("Already open: '{}'", .0.display())]
    AlreadyOpen(PathBuf),

    /// The operation is not allowed in the handle's access mode.
    #[error("Operation '{operation}' not permitted in mode {mode}")]
    ModeNotPermitted {
        /// Access mode of the handle.
        mode: AccessMode,
        /// Name of the rejected operation.
        operation: &'static str,
    },

    /// Lifecycle operation on a resource the handle does not own.
    #[error("No permission to {0} a borrowed handle")]
    NotPermitted(&'static str),

    /// The encoding or handle does not support the operation.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// The index header is malformed.
    #[error("Format error: {0}")]
    Format(String),

    /// The declared index version cannot be read or written.
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u32),

    /// A sample batch does not match the recording's descriptor.
    #[error("Descriptor mismatch: expected {expected}, got {actual}")]
    DescriptorMismatch {
        /// Descriptor of the recording.
        expected: String,
        /// Descriptor of the caller's batch.
        actual: String,
    },

    /// Requested chunk id exceeds the chunk table.
    #[error("Chunk {requested} out of range ({count} chunks)")]
    ChunkOutOfRange {
        /// Requested chunk id.
        requested: usize,
        /// Number of chunks in the index.
        count: usize,
    },

    /// A fixed-size buffer is too small for the operation.
    #[error("Buffer too small: need {needed} bytes, capacity {capacity}")]
    BufferTooSmall {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        capacity: usize,
    },

    /// The LZ4 frame codec failed.
    #[error("Compression error: {0}")]
    Compression(String),

    /// Fewer bytes were available than requested.
    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead {
        /// Bytes requested.
        expected: usize,
        /// Bytes actually read.
        actual: usize,
    },

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
