//! File handles with a fixed encoding and access mode.
//!
//! A [`FileHandle`] is created by a factory keyed on [`Encoding`] and is
//! responsible only for byte/line level I/O and its open/close lifecycle.
//! The three encodings implement one contract:
//!
//! - [`Encoding::Ascii`]: delimiter separated numeric text
//! - [`Encoding::Binary`]: fixed-width packed records, no framing
//! - [`Encoding::BinLz4`]: the binary layout wrapped in an LZ4 frame stream
//!
//! A handle either owns its OS file or wraps an already-open external
//! sink (see [`FileHandle::stdout`]); borrowed handles are never opened or
//! closed by the handle itself.
//!
//! # Example
//!
//! ```rust,ignore
//! use den::file::{AccessMode, Encoding, FileHandle, Origin};
//!
//! let mut file = FileHandle::create_and_open(Encoding::Binary, AccessMode::Write, "out.bin")?;
//! file.write(&[1, 2, 3, 4], 4, 1)?;
//! file.close()?;
//! ```

mod binary;
mod lz4;
mod raw;
mod text;

use crate::config::{Lz4Config, TextFormat};
use crate::error::{Result, StreamError};
use crate::stream::SampleType;
use binary::BinaryFile;
use lz4::Lz4File;
use raw::RawFile;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{SeekFrom, Write};
use std::path::{Path, PathBuf};
use text::TextFile;
use tracing::{debug, warn, Span};

/// Access mode of a file handle, mirroring standard file semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read an existing file.
    Read,
    /// Create or truncate, then write.
    Write,
    /// Create if missing, write at the end.
    Append,
    /// Read and write an existing file.
    ReadPlus,
    /// Create or truncate, then read and write.
    WritePlus,
    /// Create if missing, read anywhere, write at the end.
    AppendPlus,
}

impl AccessMode {
    /// Returns the mode's name as used in log output.
    pub fn name(self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::Append => "APPEND",
            Self::ReadPlus => "READ+",
            Self::WritePlus => "WRITE+",
            Self::AppendPlus => "APPEND+",
        }
    }

    /// Returns true if the mode permits reading.
    pub fn can_read(self) -> bool {
        matches!(
            self,
            Self::Read | Self::ReadPlus | Self::WritePlus | Self::AppendPlus
        )
    }

    /// Returns true if the mode permits writing.
    pub fn can_write(self) -> bool {
        !matches!(self, Self::Read)
    }

    /// Returns true for the append modes.
    pub fn is_append(self) -> bool {
        matches!(self, Self::Append | Self::AppendPlus)
    }

    fn open_options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            Self::Read => options.read(true),
            Self::Write => options.write(true).create(true).truncate(true),
            Self::Append => options.append(true).create(true),
            Self::ReadPlus => options.read(true).write(true),
            Self::WritePlus => options.read(true).write(true).create(true).truncate(true),
            Self::AppendPlus => options.read(true).append(true).create(true),
        };
        options
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// On-disk encoding of a file handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Raw packed bytes.
    Binary,
    /// Formatted numeric text.
    Ascii,
    /// LZ4 frame compressed bytes.
    BinLz4,
}

impl Encoding {
    /// Returns the name recorded in the index `ftype` attribute.
    pub fn name(self) -> &'static str {
        match self {
            Self::Binary => "BINARY",
            Self::Ascii => "ASCII",
            Self::BinLz4 => "BIN_LZ4",
        }
    }

    /// Parses an index `ftype` name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "BINARY" => Some(Self::Binary),
            "ASCII" => Some(Self::Ascii),
            "BIN_LZ4" => Some(Self::BinLz4),
            _ => None,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reference point of a seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// From the start of the file.
    Begin,
    /// From the current position.
    Current,
    /// From the end of the file.
    End,
}

/// Read/write contract every encoding implements.
///
/// `size` and `count` follow the classic `fread`/`fwrite` convention for
/// the binary encodings (`size * count` bytes). For text, `count` values of
/// the handle's sample type are formatted and `size` is the number of
/// values per line (0: all values, then one newline).
pub(crate) trait Codec: Send {
    fn attach(&mut self, raw: RawFile) -> Result<()>;
    fn detach(&mut self) -> Result<Option<RawFile>>;
    fn is_attached(&self) -> bool;
    fn read(&mut self, out: &mut [u8], size: usize, count: usize) -> Result<usize>;
    fn write(&mut self, data: &[u8], size: usize, count: usize) -> Result<usize>;
    fn read_line(&mut self, max_len: usize) -> Result<Option<String>>;
    fn write_line(&mut self, line: &str) -> Result<usize>;
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;
    fn tell(&mut self) -> Result<u64>;
    fn ready(&mut self) -> Result<bool>;
    fn flush(&mut self) -> Result<()>;
}

/// The encoding variant behind a handle.
enum Variant {
    Text(TextFile),
    Binary(BinaryFile),
    Lz4(Lz4File),
}

impl Variant {
    fn new(encoding: Encoding, mode: AccessMode) -> Self {
        match encoding {
            Encoding::Ascii => Self::Text(TextFile::new(TextFormat::default())),
            Encoding::Binary => Self::Binary(BinaryFile::new()),
            Encoding::BinLz4 => Self::Lz4(Lz4File::new(Lz4Config::default(), mode)),
        }
    }

    fn codec(&mut self) -> &mut dyn Codec {
        match self {
            Self::Text(file) => file,
            Self::Binary(file) => file,
            Self::Lz4(file) => file,
        }
    }

    fn codec_ref(&self) -> &dyn Codec {
        match self {
            Self::Text(file) => file,
            Self::Binary(file) => file,
            Self::Lz4(file) => file,
        }
    }
}

/// A file object with fixed encoding and access mode.
pub struct FileHandle {
    path: PathBuf,
    mode: AccessMode,
    encoding: Encoding,
    shared: bool,
    variant: Variant,
    span: Span,
}

impl FileHandle {
    /// Creates a closed handle for `path`.
    pub fn create(encoding: Encoding, mode: AccessMode, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let span = tracing::debug_span!("file", path = %path.display());
        let handle = Self {
            variant: Variant::new(encoding, mode),
            path,
            mode,
            encoding,
            shared: false,
            span,
        };
        handle.log_created();
        handle
    }

    /// Creates a handle for `path` and opens it.
    pub fn create_and_open(
        encoding: Encoding,
        mode: AccessMode,
        path: impl AsRef<Path>,
    ) -> Result<Self> {
        let mut handle = Self::create(encoding, mode, path);
        handle.open()?;
        Ok(handle)
    }

    /// Wraps the process's standard output. The handle is open from the
    /// start and never closes stdout.
    pub fn stdout(encoding: Encoding) -> Result<Self> {
        Self::from_writer(encoding, Box::new(std::io::stdout()))
    }

    /// Wraps an already-open external sink in write mode.
    pub fn from_writer(encoding: Encoding, writer: Box<dyn Write + Send>) -> Result<Self> {
        let mode = AccessMode::Write;
        let mut variant = Variant::new(encoding, mode);
        variant.codec().attach(RawFile::borrowed(writer))?;
        let handle = Self {
            path: PathBuf::new(),
            mode,
            encoding,
            shared: true,
            variant,
            span: tracing::debug_span!("file", path = "<shared>"),
        };
        handle.log_created();
        Ok(handle)
    }

    /// Replaces the handle's logging span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    fn log_created(&self) {
        let _enter = self.span.enter();
        debug!(
            "created ('{}', {}, {}, shared={})",
            self.path.display(),
            self.mode,
            self.encoding,
            self.shared
        );
    }

    /// Sets text delimiter and printf-style flags; ignored by binary
    /// encodings.
    pub fn set_format(&mut self, format: TextFormat) -> Result<()> {
        match &mut self.variant {
            Variant::Text(file) => file.set_format(format),
            _ => Ok(()),
        }
    }

    /// Declares the sample type of text values; ignored by binary encodings.
    pub fn set_type(&mut self, sample_type: SampleType) {
        if let Variant::Text(file) = &mut self.variant {
            file.set_type(sample_type);
        }
    }

    /// Sets LZ4 frame preferences; only effective before the handle is
    /// opened.
    pub fn set_lz4_config(&mut self, config: Lz4Config) {
        if let Variant::Lz4(file) = &mut self.variant {
            file.set_config(config);
        }
    }

    /// Opens the underlying file, creating missing parent directories.
    pub fn open(&mut self) -> Result<()> {
        let _enter = self.span.enter();
        if self.is_open() {
            warn!(
                "file already open ('{}', {}, {})",
                self.path.display(),
                self.mode,
                self.encoding
            );
            return Ok(());
        }
        if self.shared {
            warn!("no permission to open file ('{}')", self.path.display());
            return Err(StreamError::NotPermitted("open"));
        }
        if self.encoding == Encoding::BinLz4
            && !matches!(self.mode, AccessMode::Read | AccessMode::Write)
        {
            warn!("LZ4 supports only binary read/write operations");
            return Err(StreamError::Unsupported(format!(
                "{} in mode {}",
                self.encoding, self.mode
            )));
        }

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if !dir.exists() {
                fs::create_dir_all(dir).map_err(|source| {
                    warn!("could not create directory '{}': {}", dir.display(), source);
                    StreamError::Resource {
                        path: dir.to_path_buf(),
                        source,
                    }
                })?;
            }
        }

        let raw = RawFile::open(&self.path, self.mode).map_err(|source| {
            warn!("open failed ('{}'): {}", self.path.display(), source);
            StreamError::Resource {
                path: self.path.clone(),
                source,
            }
        })?;
        self.variant.codec().attach(raw)?;

        debug!(
            "opened ('{}', {}, {})",
            self.path.display(),
            self.mode,
            self.encoding
        );
        Ok(())
    }

    /// Flushes pending bytes (finalizing compressed frames) and releases
    /// the underlying file.
    pub fn close(&mut self) -> Result<()> {
        let _enter = self.span.enter();
        if !self.is_open() {
            warn!(
                "file already closed ('{}', {}, {})",
                self.path.display(),
                self.mode,
                self.encoding
            );
            return Ok(());
        }
        if self.shared {
            warn!("no permission to close file ('{}')", self.path.display());
            return Err(StreamError::NotPermitted("close"));
        }

        let raw = self.variant.codec().detach()?;
        if let Some(raw) = raw {
            raw.close().map_err(|source| {
                warn!("close failed ('{}'): {}", self.path.display(), source);
                StreamError::Resource {
                    path: self.path.clone(),
                    source,
                }
            })?;
        }

        debug!(
            "closed ('{}', {}, {})",
            self.path.display(),
            self.mode,
            self.encoding
        );
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        let _enter = self.span.enter();
        warn!("file is closed ('{}')", self.path.display());
        Err(StreamError::Closed(self.path.clone()))
    }

    fn check_mode(&self, operation: &'static str, permitted: bool) -> Result<()> {
        if permitted {
            return Ok(());
        }
        let _enter = self.span.enter();
        warn!(
            "file not in {} mode ('{}', {})",
            operation,
            self.path.display(),
            self.mode
        );
        Err(StreamError::ModeNotPermitted {
            mode: self.mode,
            operation,
        })
    }

    fn logged<T>(&self, operation: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            let _enter = self.span.enter();
            warn!("{}() failed ('{}'): {}", operation, self.path.display(), e);
        }
        result
    }

    /// Reads `count` elements into `out`; returns the number of bytes
    /// produced, which is short only at end of file.
    pub fn read(&mut self, out: &mut [u8], size: usize, count: usize) -> Result<usize> {
        self.check_open()?;
        self.check_mode("read", self.mode.can_read())?;
        let result = self.variant.codec().read(out, size, count);
        self.logged("read", result)
    }

    /// Writes `count` elements from `data`; returns the bytes accepted.
    pub fn write(&mut self, data: &[u8], size: usize, count: usize) -> Result<usize> {
        self.check_open()?;
        self.check_mode("write", self.mode.can_write())?;
        let result = self.variant.codec().write(data, size, count);
        self.logged("write", result)
    }

    /// Reads one newline terminated record of at most `max_len - 1` bytes.
    /// Returns `None` at end of file.
    pub fn read_line(&mut self, max_len: usize) -> Result<Option<String>> {
        self.check_open()?;
        self.check_mode("read", self.mode.can_read())?;
        let result = self.variant.codec().read_line(max_len);
        self.logged("read_line", result)
    }

    /// Writes `line` followed by a newline; returns the bytes written.
    pub fn write_line(&mut self, line: &str) -> Result<usize> {
        self.check_open()?;
        self.check_mode("write", self.mode.can_write())?;
        let result = self.variant.codec().write_line(line);
        self.logged("write_line", result)
    }

    /// Moves the cursor; returns the new position.
    pub fn seek(&mut self, offset: i64, origin: Origin) -> Result<u64> {
        self.check_open()?;
        let pos = match origin {
            Origin::Begin => {
                let start = u64::try_from(offset).map_err(|_| {
                    StreamError::Unsupported(format!("negative offset {offset} from begin"))
                });
                SeekFrom::Start(self.logged("seek", start)?)
            }
            Origin::Current => SeekFrom::Current(offset),
            Origin::End => SeekFrom::End(offset),
        };
        let result = self.variant.codec().seek(pos);
        self.logged("seek", result)
    }

    /// Returns the cursor position.
    pub fn tell(&mut self) -> Result<u64> {
        self.check_open()?;
        let result = self.variant.codec().tell();
        self.logged("tell", result)
    }

    /// Returns true if more data can be read, without consuming it.
    pub fn ready(&mut self) -> Result<bool> {
        self.check_open()?;
        let result = self.variant.codec().ready();
        self.logged("ready", result)
    }

    /// Pushes buffered bytes to the OS.
    pub fn flush(&mut self) -> Result<()> {
        self.check_open()?;
        let result = self.variant.codec().flush();
        self.logged("flush", result)
    }

    /// Returns true while the handle is open.
    pub fn is_open(&self) -> bool {
        self.variant.codec_ref().is_attached()
    }

    /// Returns true if the handle wraps an external resource.
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// Returns the file path (empty for shared handles).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the access mode.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Returns the encoding.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("encoding", &self.encoding)
            .field("shared", &self.shared)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if self.shared {
            // Flush what we buffered; the sink itself stays open.
            if let Err(e) = self.variant.codec().flush() {
                warn!("Failed to flush shared handle on drop: {:?}", e);
            }
            return;
        }
        if self.is_open() {
            if let Err(e) = self.close() {
                warn!("Failed to close file on drop: {:?}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_mode_permissions() {
        assert!(AccessMode::Read.can_read());
        assert!(!AccessMode::Read.can_write());
        assert!(!AccessMode::Write.can_read());
        assert!(AccessMode::Append.can_write());
        assert!(AccessMode::AppendPlus.can_read());
        assert!(AccessMode::WritePlus.can_read() && AccessMode::WritePlus.can_write());
    }

    #[test]
    fn test_encoding_names() {
        for encoding in [Encoding::Binary, Encoding::Ascii, Encoding::BinLz4] {
            assert_eq!(Encoding::from_name(encoding.name()), Some(encoding));
        }
        assert_eq!(Encoding::from_name("bin_lz4"), None);
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a/b/c/data.bin");

        let mut file = FileHandle::create_and_open(Encoding::Binary, AccessMode::Write, &path)
            .unwrap();
        assert!(file.is_open());
        file.write(&[1, 2, 3, 4], 2, 2).unwrap();
        file.close().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_open_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let mut file = FileHandle::create(
            Encoding::Binary,
            AccessMode::Read,
            temp_dir.path().join("missing.bin"),
        );

        let result = file.open();
        assert!(matches!(result, Err(StreamError::Resource { .. })));
        assert!(!file.is_open());
    }

    #[test]
    fn test_operations_on_closed_handle_fail() {
        let temp_dir = TempDir::new().unwrap();
        let mut file = FileHandle::create(
            Encoding::Binary,
            AccessMode::Write,
            temp_dir.path().join("closed.bin"),
        );

        assert!(matches!(file.write(&[0], 1, 1), Err(StreamError::Closed(_))));
        assert!(matches!(file.tell(), Err(StreamError::Closed(_))));
        assert!(matches!(file.flush(), Err(StreamError::Closed(_))));
        // Closing a closed handle only warns.
        assert!(file.close().is_ok());
    }

    #[test]
    fn test_mode_is_enforced() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("mode.bin");
        std::fs::write(&path, [0u8; 4]).unwrap();

        let mut file = FileHandle::create_and_open(Encoding::Binary, AccessMode::Read, &path)
            .unwrap();
        let result = file.write(&[1], 1, 1);
        assert!(matches!(
            result,
            Err(StreamError::ModeNotPermitted {
                mode: AccessMode::Read,
                ..
            })
        ));
    }

    #[test]
    fn test_lz4_rejects_plus_modes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.lz4");

        let mut file = FileHandle::create(Encoding::BinLz4, AccessMode::WritePlus, &path);
        assert!(matches!(file.open(), Err(StreamError::Unsupported(_))));
        assert!(!path.exists());
    }

    #[test]
    fn test_shared_handle_is_open_and_not_closable() {
        let mut file = FileHandle::from_writer(Encoding::Ascii, Box::new(std::io::sink())).unwrap();
        assert!(file.is_open());
        assert!(file.is_shared());

        file.write_line("hello").unwrap();
        assert!(matches!(file.close(), Err(StreamError::NotPermitted("close"))));
        assert!(matches!(file.open(), Ok(())));
        assert!(file.is_open());
    }

    #[test]
    fn test_seek_and_tell() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("seek.bin");
        std::fs::write(&path, (0u8..32).collect::<Vec<_>>()).unwrap();

        let mut file = FileHandle::create_and_open(Encoding::Binary, AccessMode::Read, &path)
            .unwrap();
        assert_eq!(file.seek(8, Origin::Begin).unwrap(), 8);
        assert_eq!(file.seek(4, Origin::Current).unwrap(), 12);
        assert_eq!(file.seek(-2, Origin::End).unwrap(), 30);
        assert_eq!(file.tell().unwrap(), 30);
        assert!(file.ready().unwrap());

        let mut buf = [0u8; 4];
        assert_eq!(file.read(&mut buf, 1, 4).unwrap(), 2);
        assert_eq!(&buf[..2], &[30, 31]);
        assert!(!file.ready().unwrap());
        assert!(file.seek(-1, Origin::Begin).is_err());
    }
}
