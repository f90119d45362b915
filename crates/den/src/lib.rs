//! Den - Stream Persistence Layer
//!
//! This crate durably records and replays time-stamped, multi-dimensional
//! sample streams as a pair of files: a textual chunk index and a payload
//! in one of three encodings.
//!
//! # Components
//!
//! - [`FileHandle`]: file object with a fixed [`Encoding`] and [`AccessMode`]
//!   (formatted text, raw binary or LZ4 frame compressed binary)
//! - [`StreamWriter`]: records sample batches and their chunk index
//! - [`StreamReader`]: replays a recording sequentially or chunk by chunk
//!
//! # Example
//!
//! ```rust,ignore
//! use den::file::Encoding;
//! use den::stream::{ChunkId, SampleBatch, SampleType, StreamDescriptor};
//! use den::stream::{StreamReader, StreamWriter, Version};
//!
//! // Record two chunks of 3-dimensional float samples at 10 Hz
//! let desc = StreamDescriptor::new(10.0, 3, SampleType::Float);
//! let mut writer = StreamWriter::new();
//! writer.open(&desc, "data/session", Encoding::BinLz4, Version::V2, None)?;
//! writer.write(&SampleBatch::from_values(10.0, 3, 0.0, &first), false)?;
//! writer.write(&SampleBatch::from_values(10.0, 3, 0.5, &second), false)?;
//! writer.close()?;
//!
//! // Replay the second chunk
//! let mut reader = StreamReader::new();
//! let desc = reader.open("data/session")?;
//! let mut batch = SampleBatch::for_descriptor(&desc, 0);
//! reader.read_chunk(&mut batch, ChunkId::At(1))?;
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod file;
pub mod stream;

pub use config::{Lz4Config, StreamConfig, TextFormat};
pub use error::{Result, StreamError};
pub use file::{AccessMode, Encoding, FileHandle, Origin};
pub use stream::{
    Chunk, ChunkId, Metadata, Recording, Sample, SampleBatch, SampleType, StreamDescriptor,
    StreamReader, StreamWriter, Version,
};
