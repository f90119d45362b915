//! Fixed-width packed records with no framing.

use super::raw::RawFile;
use super::Codec;
use crate::error::{Result, StreamError};
use std::io::SeekFrom;

pub(crate) struct BinaryFile {
    raw: Option<RawFile>,
}

impl BinaryFile {
    pub(crate) fn new() -> Self {
        Self { raw: None }
    }

    fn raw(&mut self) -> Result<&mut RawFile> {
        self.raw
            .as_mut()
            .ok_or_else(|| StreamError::Closed(Default::default()))
    }
}

/// Number of bytes covered by `count` records of `size` bytes.
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

impl Codec for BinaryFile {
    fn attach(&mut self, raw: RawFile) -> Result<()> {
        self.raw = Some(raw);
        Ok(())
    }

    fn detach(&mut self) -> Result<Option<RawFile>> {
        Ok(self.raw.take())
    }

    fn is_attached(&self) -> bool {
        self.raw.is_some()
    }

    fn read(&mut self, out: &mut [u8], size: usize, count: usize) -> Result<usize> {
        let n = span(out.len(), size, count)?;
        Ok(self.raw()?.read_full(&mut out[..n])?)
    }

    fn write(&mut self, data: &[u8], size: usize, count: usize) -> Result<usize> {
        let n = span(data.len(), size, count)?;
        Ok(self.raw()?.write_bytes(&data[..n])?)
    }

    fn read_line(&mut self, _max_len: usize) -> Result<Option<String>> {
        Err(StreamError::Unsupported(
            "read_line on binary encoding".to_string(),
        ))
    }

    fn write_line(&mut self, _line: &str) -> Result<usize> {
        Err(StreamError::Unsupported(
            "write_line on binary encoding".to_string(),
        ))
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.raw()?.seek_to(pos)?)
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.raw()?.tell()?)
    }

    fn ready(&mut self) -> Result<bool> {
        Ok(self.raw()?.peek()?.is_some())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.raw()?.flush_all()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::AccessMode;
    use tempfile::TempDir;

    #[test]
    fn test_records_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("records.bin");
        let records: Vec<u8> = (0u8..24).collect();

        let mut file = BinaryFile::new();
        file.attach(RawFile::open(&path, AccessMode::Write).unwrap()).unwrap();
        assert_eq!(file.write(&records, 8, 3).unwrap(), 24);
        file.detach().unwrap().unwrap().close().unwrap();

        file.attach(RawFile::open(&path, AccessMode::Read).unwrap()).unwrap();
        let mut out = vec![0u8; 16];
        assert_eq!(file.read(&mut out, 8, 2).unwrap(), 16);
        assert_eq!(&out[..], &records[..16]);
        assert_eq!(file.tell().unwrap(), 16);

        // Short at end of file.
        assert_eq!(file.read(&mut out, 8, 2).unwrap(), 8);
        assert!(!file.ready().unwrap());
    }

    #[test]
    fn test_line_operations_unsupported() {
        let mut file = BinaryFile::new();
        assert!(matches!(file.read_line(64), Err(StreamError::Unsupported(_))));
        assert!(matches!(file.write_line("x"), Err(StreamError::Unsupported(_))));
    }

    #[test]
    fn test_buffer_must_cover_records() {
        let temp_dir = TempDir::new().unwrap();
        let mut file = BinaryFile::new();
        file.attach(RawFile::open(&temp_dir.path().join("b.bin"), AccessMode::Write).unwrap())
            .unwrap();
        let result = file.write(&[0u8; 4], 4, 2);
        assert!(matches!(
            result,
            Err(StreamError::BufferTooSmall {
                needed: 8,
                capacity: 4
            })
        ));
    }
}
