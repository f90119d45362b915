//! LZ4 frame compressed binary records.
//!
//! The encoder is created lazily by the first write, so the frame header
//! is emitted just before the first payload bytes; close appends the end
//! marker (and content checksum). Offsets reported by `tell` and accepted
//! by `seek` are positions in the decoded byte stream: a forward seek
//! decodes and discards, a backward seek restarts the decoder from the
//! start of the file.
//!
//! All codec state sits behind one mutex whose scope is a single call, so
//! a producer thread may write while another thread flushes or closes.

use super::raw::RawFile;
use super::{AccessMode, Codec};
use crate::config::Lz4Config;
use crate::error::{Result, StreamError};
use lz4_flex::frame::{FrameDecoder, FrameEncoder, FrameInfo};
use std::io::{self, Read, SeekFrom, Write};
use std::sync::{Mutex, MutexGuard};
use tracing::trace;

/// Scratch size used when skipping forward in the decoded stream.
const SKIP_BUFFER_SIZE: usize = 64 * 1024;

enum State {
    Closed,
    /// Open for writing, no frame header emitted yet.
    Pending(RawFile),
    Encoding(FrameEncoder<RawFile>),
    Decoding(FrameDecoder<RawFile>),
}

struct Lz4Inner {
    state: State,
    /// Logical position in the uncompressed stream.
    position: u64,
    /// Byte decoded by `ready` but not yet handed to the caller.
    peeked: Option<u8>,
}

pub(crate) struct Lz4File {
    config: Lz4Config,
    writable: bool,
    inner: Mutex<Lz4Inner>,
}

fn compression_error(e: impl std::fmt::Display) -> StreamError {
    StreamError::Compression(e.to_string())
}

impl Lz4File {
    pub(crate) fn new(config: Lz4Config, mode: AccessMode) -> Self {
        Self {
            config,
            writable: mode.can_write(),
            inner: Mutex::new(Lz4Inner {
                state: State::Closed,
                position: 0,
                peeked: None,
            }),
        }
    }

    pub(crate) fn set_config(&mut self, config: Lz4Config) {
        self.config = config;
    }

    fn frame_info(&self) -> FrameInfo {
        FrameInfo::new()
            .block_size(self.config.block_size)
            .block_mode(self.config.block_mode)
            .content_checksum(self.config.content_checksum)
            .block_checksums(self.config.block_checksums)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Lz4Inner>> {
        self.inner
            .lock()
            .map_err(|_| StreamError::Compression("codec lock poisoned".to_string()))
    }

    fn open_with(&self, raw: RawFile) -> Result<()> {
        let mut inner = self.lock()?;
        inner.state = if self.writable {
            State::Pending(raw)
        } else {
            State::Decoding(FrameDecoder::new(raw))
        };
        inner.position = 0;
        inner.peeked = None;
        Ok(())
    }

    /// Finalizes the frame and hands back the underlying channel.
    fn take_raw(&self) -> Result<Option<RawFile>> {
        let mut inner = self.lock()?;
        inner.peeked = None;
        let raw = match std::mem::replace(&mut inner.state, State::Closed) {
            State::Closed => None,
            State::Pending(raw) => {
                let encoder = FrameEncoder::with_frame_info(self.frame_info(), raw);
                Some(encoder.finish().map_err(compression_error)?)
            }
            State::Encoding(encoder) => Some(encoder.finish().map_err(compression_error)?),
            State::Decoding(decoder) => Some(decoder.into_inner()),
        };
        Ok(raw)
    }

    fn is_active(&self) -> bool {
        self.inner
            .lock()
            .map(|inner| !matches!(inner.state, State::Closed))
            .unwrap_or(false)
    }

    fn compress(&self, data: &[u8]) -> Result<usize> {
        let mut inner = self.lock()?;
        let inner = &mut *inner;
        if let State::Pending(_) = inner.state {
            if let State::Pending(raw) = std::mem::replace(&mut inner.state, State::Closed) {
                inner.state = State::Encoding(FrameEncoder::with_frame_info(self.frame_info(), raw));
            }
        }
        let State::Encoding(encoder) = &mut inner.state else {
            return Err(StreamError::Unsupported(
                "write on a compressed handle opened for reading".to_string(),
            ));
        };

        let before = encoder.get_mut().tell()?;
        encoder.write_all(data).map_err(compression_error)?;
        if self.config.auto_flush {
            encoder.flush().map_err(compression_error)?;
            encoder.get_mut().flush_all()?;
        }
        let after = encoder.get_mut().tell()?;
        trace!(
            input = data.len(),
            output = after.saturating_sub(before),
            "compressed write"
        );

        inner.position += data.len() as u64;
        Ok(data.len())
    }

    fn decompress(&self, out: &mut [u8]) -> Result<usize> {
        let mut inner = self.lock()?;
        let n = inner.read_decoded(out)?;
        Ok(n)
    }

    fn seek_to(&self, pos: SeekFrom) -> Result<u64> {
        let mut inner = self.lock()?;
        let target = match pos {
            SeekFrom::Start(n) => n,
            SeekFrom::Current(d) => inner.position.checked_add_signed(d).ok_or_else(|| {
                StreamError::Unsupported(format!("seek before start of stream ({d})"))
            })?,
            SeekFrom::End(_) => {
                return Err(StreamError::Unsupported(
                    "end-relative seek on a compressed handle".to_string(),
                ))
            }
        };
        if target == inner.position {
            return Ok(target);
        }
        if !matches!(inner.state, State::Decoding(_)) {
            return Err(StreamError::Unsupported(
                "seek while compressing".to_string(),
            ));
        }

        if target < inner.position {
            inner.rewind()?;
        }
        let skip = (target - inner.position) as usize;
        let mut remaining = skip;
        let mut scratch = vec![0u8; skip.min(SKIP_BUFFER_SIZE)];
        while remaining > 0 {
            let want = remaining.min(scratch.len());
            let n = inner.read_decoded(&mut scratch[..want])?;
            if n == 0 {
                return Err(StreamError::ShortRead {
                    expected: skip,
                    actual: skip - remaining,
                });
            }
            remaining -= n;
        }
        Ok(inner.position)
    }

    fn position(&self) -> Result<u64> {
        Ok(self.lock()?.position)
    }

    fn has_more(&self) -> Result<bool> {
        let mut inner = self.lock()?;
        if inner.peeked.is_some() {
            return Ok(true);
        }
        let State::Decoding(decoder) = &mut inner.state else {
            return Ok(false);
        };
        let mut byte = [0u8; 1];
        let n = read_retrying(decoder, &mut byte)?;
        if n == 0 {
            return Ok(false);
        }
        inner.peeked = Some(byte[0]);
        Ok(true)
    }

    fn flush_frame(&self) -> Result<()> {
        let mut inner = self.lock()?;
        match &mut inner.state {
            State::Encoding(encoder) => {
                // The encoder only emits the pending block into the channel.
                encoder.flush().map_err(compression_error)?;
                Ok(encoder.get_mut().flush_all()?)
            }
            State::Pending(raw) => Ok(raw.flush_all()?),
            State::Decoding(_) | State::Closed => Ok(()),
        }
    }
}

impl Lz4Inner {
    /// Reads decoded bytes until `out` is full or the frame ends.
    fn read_decoded(&mut self, out: &mut [u8]) -> Result<usize> {
        let State::Decoding(decoder) = &mut self.state else {
            return Err(StreamError::Unsupported(
                "read on a compressed handle opened for writing".to_string(),
            ));
        };
        let mut total = 0;
        if let (Some(byte), false) = (self.peeked, out.is_empty()) {
            out[0] = byte;
            self.peeked = None;
            total = 1;
        }
        while total < out.len() {
            let n = read_retrying(decoder, &mut out[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        self.position += total as u64;
        Ok(total)
    }

    fn rewind(&mut self) -> Result<()> {
        if !matches!(self.state, State::Decoding(_)) {
            return Ok(());
        }
        let State::Decoding(decoder) = std::mem::replace(&mut self.state, State::Closed) else {
            return Ok(());
        };
        let mut raw = decoder.into_inner();
        raw.seek_to(SeekFrom::Start(0))?;
        self.state = State::Decoding(FrameDecoder::new(raw));
        self.position = 0;
        self.peeked = None;
        Ok(())
    }
}

fn read_retrying(decoder: &mut FrameDecoder<RawFile>, out: &mut [u8]) -> Result<usize> {
    loop {
        match decoder.read(out) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(compression_error(e)),
        }
    }
}

fn span(available: usize, size: usize, count: usize) -> Result<usize> {
    let needed = size.saturating_mul(count);
    if available < needed {
        return Err(StreamError::BufferTooSmall {
            needed,
            capacity: available,
        });
    }
    Ok(needed)
}

impl Codec for Lz4File {
    fn attach(&mut self, raw: RawFile) -> Result<()> {
        self.open_with(raw)
    }

    fn detach(&mut self) -> Result<Option<RawFile>> {
        self.take_raw()
    }

    fn is_attached(&self) -> bool {
        self.is_active()
    }

    fn read(&mut self, out: &mut [u8], size: usize, count: usize) -> Result<usize> {
        let n = span(out.len(), size, count)?;
        self.decompress(&mut out[..n])
    }

    fn write(&mut self, data: &[u8], size: usize, count: usize) -> Result<usize> {
        let n = span(data.len(), size, count)?;
        self.compress(&data[..n])
    }

    fn read_line(&mut self, _max_len: usize) -> Result<Option<String>> {
        Err(StreamError::Unsupported(
            "read_line on compressed encoding".to_string(),
        ))
    }

    fn write_line(&mut self, _line: &str) -> Result<usize> {
        Err(StreamError::Unsupported(
            "write_line on compressed encoding".to_string(),
        ))
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.seek_to(pos)
    }

    fn tell(&mut self) -> Result<u64> {
        self.position()
    }

    fn ready(&mut self) -> Result<bool> {
        self.has_more()
    }

    fn flush(&mut self) -> Result<()> {
        self.flush_frame()
    }
}
