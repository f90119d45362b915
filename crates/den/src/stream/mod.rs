//! Chunked stream recordings.
//!
//! A recording is a pair of files: a textual index (`name.stream`) that
//! describes the stream and lists its chunks, and a payload file
//! (`name.stream~`) holding the encoded samples.
//!
//! ```text
//! <?xml version="1.0" ?>
//! <stream ssi-v="2">
//!     <info ftype="BINARY" sr="10" dim="3" byte="4" type="FLOAT" delim=" "/>
//!     <chunk from="0" to="0.5" byte="0" num="5"/>
//!     <chunk from="0.5" to="1.2" byte="60" num="7"/>
//! </stream>
//! ```
//!
//! [`StreamWriter`] appends chunks as batches arrive and writes each chunk
//! line as soon as it is known, so a [`StreamReader`] can open a recording
//! that is still being written.

mod index;
mod reader;
mod sample;
mod writer;

pub use reader::StreamReader;
pub use sample::{Sample, SampleBatch, SampleType, StreamDescriptor};
pub use writer::{Recording, StreamWriter};

use crate::config::{PAYLOAD_SUFFIX, STREAM_EXTENSION};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

/// Index format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Version {
    /// Positional header, no declared type.
    V0,
    /// Positional header with a type tag.
    V1,
    /// Structured markup header.
    V2,
    /// Structured header with extended metadata.
    V3,
}

impl Version {
    /// Oldest version with a structured index.
    pub const MIN_STRUCTURED: Version = Version::V2;

    /// Newest version this crate writes.
    pub const LATEST: Version = Version::V3;

    /// Returns the number recorded in the `ssi-v` attribute.
    pub fn number(self) -> u32 {
        match self {
            Self::V0 => 0,
            Self::V1 => 1,
            Self::V2 => 2,
            Self::V3 => 3,
        }
    }

    /// Maps a recorded version number.
    pub fn from_number(n: u32) -> Option<Self> {
        match n {
            0 => Some(Self::V0),
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            3 => Some(Self::V3),
            _ => None,
        }
    }

    /// Returns true if the version carries a structured index.
    pub fn is_structured(self) -> bool {
        self >= Self::MIN_STRUCTURED
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}", self.number())
    }
}

/// One indexed run of samples in the payload file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Chunk {
    /// Start time in seconds.
    pub from: f64,
    /// End time in seconds (`from + num / sr`).
    pub to: f64,
    /// Offset of the first sample in the payload.
    pub byte: u64,
    /// Number of samples.
    pub num: u64,
}

/// Chunk selector for random access reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkId {
    /// An explicit chunk index.
    At(usize),
    /// The chunk after the last one served, in index order.
    Next,
}

/// Optional, type-specific side record stored once in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metadata {
    /// Geometry of an image stream.
    Image {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
        /// Bits per channel.
        depth: u32,
        /// Channels per pixel.
        channels: u32,
        /// Whether rows are stored bottom-up.
        flip: bool,
    },
    /// Skeleton tracking layout.
    Skeleton {
        /// Number of skeletons per sample.
        count: u32,
        /// Joint layout name.
        layout: String,
    },
    /// Face tracking layout.
    Face {
        /// Number of faces per sample.
        count: u32,
        /// Point layout name.
        layout: String,
    },
    /// Free-form attributes (V3 and later).
    Custom(Vec<(String, String)>),
}

/// Returns the index path for a recording, appending the stream extension
/// when missing.
pub fn index_path(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let has_extension = path
        .to_str()
        .map(|s| s.ends_with(STREAM_EXTENSION))
        .unwrap_or(false);
    if has_extension {
        return path.to_path_buf();
    }
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(STREAM_EXTENSION);
    PathBuf::from(s)
}

/// Returns the payload path that accompanies an index path.
pub fn payload_path(index: impl AsRef<Path>) -> PathBuf {
    let mut s: OsString = index.as_ref().as_os_str().to_owned();
    s.push(PAYLOAD_SUFFIX);
    PathBuf::from(s)
}
