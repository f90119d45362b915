//! Buffered byte channel shared by all encodings.
//!
//! A [`RawFile`] owns either an OS file or a borrowed writer (such as the
//! process's standard output). It keeps one read-ahead buffer and one write
//! buffer and switches between them transparently, so read+write access
//! modes see a single logical cursor.

use crate::file::AccessMode;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Size of the read-ahead and write buffers.
pub(crate) const BUFFER_SIZE: usize = 8192;

/// The resource behind a [`RawFile`].
pub(crate) enum Resource {
    /// A file opened (and released) by the handle.
    Owned(File),
    /// An externally owned sink; never closed by the handle.
    Borrowed(Box<dyn Write + Send>),
}

pub(crate) struct RawFile {
    resource: Resource,
    writable: bool,
    read_buf: Box<[u8]>,
    read_pos: usize,
    read_len: usize,
    write_buf: Vec<u8>,
    /// Bytes handed to the resource so far (used for borrowed sinks).
    written: u64,
}

fn write_only() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, "borrowed handle is write-only")
}

impl RawFile {
    /// Opens `path` with the OS semantics of `mode`.
    pub(crate) fn open(path: &Path, mode: AccessMode) -> io::Result<Self> {
        let mut file = mode.open_options().open(path)?;
        if mode.is_append() {
            file.seek(SeekFrom::End(0))?;
        }
        Ok(Self::new(Resource::Owned(file), mode.can_write()))
    }

    /// Wraps an externally owned writer.
    pub(crate) fn borrowed(writer: Box<dyn Write + Send>) -> Self {
        Self::new(Resource::Borrowed(writer), true)
    }

    fn new(resource: Resource, writable: bool) -> Self {
        Self {
            resource,
            writable,
            read_buf: vec![0u8; BUFFER_SIZE].into_boxed_slice(),
            read_pos: 0,
            read_len: 0,
            write_buf: Vec::with_capacity(BUFFER_SIZE),
            written: 0,
        }
    }

    fn unread(&self) -> usize {
        self.read_len - self.read_pos
    }

    fn flush_writes(&mut self) -> io::Result<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        match &mut self.resource {
            Resource::Owned(file) => file.write_all(&self.write_buf)?,
            Resource::Borrowed(sink) => sink.write_all(&self.write_buf)?,
        }
        self.written += self.write_buf.len() as u64;
        self.write_buf.clear();
        Ok(())
    }

    /// Drops buffered read-ahead and moves the OS cursor back to the
    /// logical position.
    fn discard_read_ahead(&mut self) -> io::Result<()> {
        let unread = self.unread();
        if unread > 0 {
            match &mut self.resource {
                Resource::Owned(file) => {
                    file.seek(SeekFrom::Current(-(unread as i64)))?;
                }
                Resource::Borrowed(_) => return Err(write_only()),
            }
        }
        self.read_pos = 0;
        self.read_len = 0;
        Ok(())
    }

    fn fill(&mut self) -> io::Result<usize> {
        if self.read_pos < self.read_len {
            return Ok(self.unread());
        }
        self.flush_writes()?;
        let n = match &mut self.resource {
            Resource::Owned(file) => file.read(&mut self.read_buf)?,
            Resource::Borrowed(_) => return Err(write_only()),
        };
        self.read_pos = 0;
        self.read_len = n;
        Ok(n)
    }

    /// Reads up to `out.len()` bytes; returns 0 at end of file.
    pub(crate) fn read_some(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if self.unread() == 0 && out.len() >= BUFFER_SIZE {
            self.flush_writes()?;
            return match &mut self.resource {
                Resource::Owned(file) => file.read(out),
                Resource::Borrowed(_) => Err(write_only()),
            };
        }
        if self.fill()? == 0 {
            return Ok(0);
        }
        let n = out.len().min(self.unread());
        out[..n].copy_from_slice(&self.read_buf[self.read_pos..self.read_pos + n]);
        self.read_pos += n;
        Ok(n)
    }

    /// Reads until `out` is full or the file ends; returns the bytes read.
    pub(crate) fn read_full(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let mut total = 0;
        while total < out.len() {
            let n = self.read_some(&mut out[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    /// Returns the next byte without consuming it.
    pub(crate) fn peek(&mut self) -> io::Result<Option<u8>> {
        if self.fill()? == 0 {
            return Ok(None);
        }
        Ok(Some(self.read_buf[self.read_pos]))
    }

    /// Consumes and returns the next byte.
    pub(crate) fn next_byte(&mut self) -> io::Result<Option<u8>> {
        let byte = self.peek()?;
        if byte.is_some() {
            self.read_pos += 1;
        }
        Ok(byte)
    }

    /// Appends bytes at the logical cursor.
    pub(crate) fn write_bytes(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.unread() > 0 {
            self.discard_read_ahead()?;
        } else {
            self.read_pos = 0;
            self.read_len = 0;
        }
        if self.write_buf.len() + data.len() > BUFFER_SIZE {
            self.flush_writes()?;
        }
        if data.len() >= BUFFER_SIZE {
            match &mut self.resource {
                Resource::Owned(file) => file.write_all(data)?,
                Resource::Borrowed(sink) => sink.write_all(data)?,
            }
            self.written += data.len() as u64;
        } else {
            self.write_buf.extend_from_slice(data);
        }
        Ok(data.len())
    }

    /// Moves the logical cursor.
    pub(crate) fn seek_to(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.flush_writes()?;
        let unread = self.unread() as i64;
        self.read_pos = 0;
        self.read_len = 0;
        match &mut self.resource {
            Resource::Owned(file) => match pos {
                SeekFrom::Current(offset) => file.seek(SeekFrom::Current(offset - unread)),
                other => file.seek(other),
            },
            Resource::Borrowed(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "borrowed handle cannot seek",
            )),
        }
    }

    /// Returns the logical cursor position.
    pub(crate) fn tell(&mut self) -> io::Result<u64> {
        let pending = self.write_buf.len() as u64;
        match &mut self.resource {
            Resource::Owned(file) => {
                let os_pos = file.stream_position()?;
                Ok(os_pos - self.read_len as u64 + self.read_pos as u64 + pending)
            }
            Resource::Borrowed(_) => Ok(self.written + pending),
        }
    }

    /// Pushes buffered bytes to the resource.
    pub(crate) fn flush_all(&mut self) -> io::Result<()> {
        self.flush_writes()?;
        match &mut self.resource {
            Resource::Owned(file) => file.flush(),
            Resource::Borrowed(sink) => sink.flush(),
        }
    }

    /// Flushes and releases the resource; owned writable files are synced.
    pub(crate) fn close(mut self) -> io::Result<()> {
        self.flush_all()?;
        if self.writable {
            if let Resource::Owned(file) = &self.resource {
                file.sync_all()?;
            }
        }
        Ok(())
    }
}

impl Read for RawFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_some(buf)
    }
}

impl Write for RawFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_then_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("raw.bin");

        let mut raw = RawFile::open(&path, AccessMode::Write).unwrap();
        raw.write_bytes(b"hello world").unwrap();
        assert_eq!(raw.tell().unwrap(), 11);
        raw.close().unwrap();

        let mut raw = RawFile::open(&path, AccessMode::Read).unwrap();
        let mut buf = [0u8; 5];
        assert_eq!(raw.read_full(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(raw.tell().unwrap(), 5);
        assert_eq!(raw.peek().unwrap(), Some(b' '));
        assert_eq!(raw.tell().unwrap(), 5);
    }

    #[test]
    fn test_read_plus_switches_buffers() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("plus.bin");

        let mut raw = RawFile::open(&path, AccessMode::WritePlus).unwrap();
        raw.write_bytes(b"0123456789").unwrap();
        raw.seek_to(SeekFrom::Start(2)).unwrap();

        let mut buf = [0u8; 3];
        raw.read_full(&mut buf).unwrap();
        assert_eq!(&buf, b"234");

        // Overwrite in place right after the bytes just read.
        raw.write_bytes(b"xy").unwrap();
        assert_eq!(raw.tell().unwrap(), 7);

        raw.seek_to(SeekFrom::Start(0)).unwrap();
        let mut all = [0u8; 10];
        assert_eq!(raw.read_full(&mut all).unwrap(), 10);
        assert_eq!(&all, b"01234xy789");
    }

    #[test]
    fn test_seek_current_accounts_for_read_ahead() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("seek.bin");
        std::fs::write(&path, (0u8..100).collect::<Vec<_>>()).unwrap();

        let mut raw = RawFile::open(&path, AccessMode::Read).unwrap();
        let mut buf = [0u8; 10];
        raw.read_full(&mut buf).unwrap();
        raw.seek_to(SeekFrom::Current(5)).unwrap();
        assert_eq!(raw.tell().unwrap(), 15);
        assert_eq!(raw.next_byte().unwrap(), Some(15));
    }

    #[test]
    fn test_large_writes_bypass_buffer() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("large.bin");
        let data: Vec<u8> = (0..BUFFER_SIZE * 3).map(|i| (i % 251) as u8).collect();

        let mut raw = RawFile::open(&path, AccessMode::Write).unwrap();
        raw.write_bytes(&data[..10]).unwrap();
        raw.write_bytes(&data[10..]).unwrap();
        assert_eq!(raw.tell().unwrap(), data.len() as u64);
        raw.close().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), data);
    }

    #[test]
    fn test_append_starts_at_end() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("append.bin");
        std::fs::write(&path, b"abc").unwrap();

        let mut raw = RawFile::open(&path, AccessMode::Append).unwrap();
        assert_eq!(raw.tell().unwrap(), 3);
        raw.write_bytes(b"def").unwrap();
        raw.close().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
    }

    #[test]
    fn test_borrowed_sink_is_write_only() {
        let sink = SharedSink::default();
        let mut raw = RawFile::borrowed(Box::new(sink.clone()));
        assert!(matches!(raw.resource, Resource::Borrowed(_)));

        raw.write_bytes(b"abc").unwrap();
        assert_eq!(raw.tell().unwrap(), 3);
        raw.flush_all().unwrap();
        assert_eq!(sink.0.lock().unwrap().as_slice(), b"abc");

        let mut buf = [0u8; 1];
        assert!(raw.read_some(&mut buf).is_err());
        assert!(raw.seek_to(SeekFrom::Start(0)).is_err());
    }
}
