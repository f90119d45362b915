//! Configuration for text formatting, LZ4 framing and stream recording.

use crate::error::{Result, StreamError};
use lz4_flex::frame::{BlockMode, BlockSize};

/// Extension every index file carries.
pub const STREAM_EXTENSION: &str = ".stream";

/// Suffix appended to the index path to name the payload file.
pub const PAYLOAD_SUFFIX: &str = "~";

/// Default delimiter between text values on one line.
pub const DEFAULT_DELIM: &str = " ";

/// Default printf-style flags for text values (`%f` precision for floats).
pub const DEFAULT_FLAGS: &str = "";

/// Default maximum length of one text record, newline included.
pub const DEFAULT_LINE_CAPACITY: usize = 4096;

/// Formatting of text encoded files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFormat {
    /// Separator written between values of one line.
    pub delim: String,
    /// printf-style flags (`-`, `+`, ` `, `0`, `#`, width, `.precision`).
    pub flags: String,
    /// Hard upper bound for a single record in bytes.
    pub line_capacity: usize,
}

impl Default for TextFormat {
    fn default() -> Self {
        Self {
            delim: DEFAULT_DELIM.to_string(),
            flags: DEFAULT_FLAGS.to_string(),
            line_capacity: DEFAULT_LINE_CAPACITY,
        }
    }
}

impl TextFormat {
    /// Creates a text format with custom delimiter and flags.
    pub fn new(delim: impl Into<String>, flags: impl Into<String>) -> Self {
        Self {
            delim: delim.into(),
            flags: flags.into(),
            line_capacity: DEFAULT_LINE_CAPACITY,
        }
    }

    /// Returns the byte that separates values besides whitespace, if any.
    ///
    /// A delimiter is whitespace around at most one separator byte, which
    /// must not occur inside a number.
    pub fn separator(&self) -> Result<Option<u8>> {
        let invalid = |reason: &str| {
            StreamError::Format(format!("invalid delimiter {:?}: {}", self.delim, reason))
        };
        if self.delim.is_empty() {
            return Err(invalid("empty"));
        }
        let mut separator = None;
        for b in self.delim.bytes().filter(|b| !b.is_ascii_whitespace()) {
            if separator.is_some() {
                return Err(invalid("more than one separator byte"));
            }
            if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'+' | b'-') || !b.is_ascii() {
                return Err(invalid("separator can occur in a number"));
            }
            separator = Some(b);
        }
        Ok(separator)
    }
}

/// Frame preferences for the compressed binary encoding.
#[derive(Debug, Clone)]
pub struct Lz4Config {
    /// Maximum size of one uncompressed block.
    pub block_size: BlockSize,
    /// Whether blocks may reference previous blocks.
    pub block_mode: BlockMode,
    /// Append a checksum of the whole content at frame end.
    pub content_checksum: bool,
    /// Append a checksum to every block.
    pub block_checksums: bool,
    /// Emit a block at the end of every write call.
    ///
    /// Keeps the compressed file in step with the chunk index so
    /// readers of an in-progress recording see complete blocks.
    pub auto_flush: bool,
}

impl Default for Lz4Config {
    fn default() -> Self {
        Self {
            block_size: BlockSize::Max4MB,
            block_mode: BlockMode::Independent,
            content_checksum: true,
            block_checksums: false,
            auto_flush: true,
        }
    }
}

/// Configuration shared by stream writers and readers.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Text payload formatting (delimiter is also recorded in the index).
    pub text: TextFormat,
    /// LZ4 frame preferences.
    pub lz4: Lz4Config,
    /// Flush index and payload after every emitted chunk entry.
    pub sync_chunks: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            text: TextFormat::default(),
            lz4: Lz4Config::default(),
            sync_chunks: true,
        }
    }
}
