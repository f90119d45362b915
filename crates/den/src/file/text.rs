//! Delimiter separated numeric text.
//!
//! Values are formatted with printf-style flags (`-+ 0#`, width and
//! `.precision`) derived from the handle's [`TextFormat`] and the declared
//! [`SampleType`]. Reading is whitespace tolerant: tokens end at whitespace
//! or at the delimiter, so files written with any grouping read back the
//! same. Delimiters are validated by [`TextFormat::separator`].

use super::raw::RawFile;
use super::Codec;
use crate::config::TextFormat;
use crate::error::{Result, StreamError};
use crate::stream::SampleType;
use std::fmt::Write as _;
use std::io::SeekFrom;

/// Default precision of floating point values (`%f`).
const DEFAULT_FLOAT_PRECISION: usize = 6;

/// Parsed printf flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Flags {
    left: bool,
    plus: bool,
    space: bool,
    zero: bool,
    width: usize,
    precision: Option<usize>,
}

impl Flags {
    fn parse(flags: &str) -> Result<Self> {
        let mut out = Flags::default();
        let spec = flags.strip_prefix('%').unwrap_or(flags);
        let mut chars = spec.chars().peekable();

        while let Some(&c) = chars.peek() {
            match c {
                '-' => out.left = true,
                '+' => out.plus = true,
                ' ' => out.space = true,
                '0' => out.zero = true,
                '#' => {}
                _ => break,
            }
            chars.next();
        }
        out.width = take_number(&mut chars);
        if chars.peek() == Some(&'.') {
            chars.next();
            out.precision = Some(take_number(&mut chars));
        }
        if let Some(rest) = chars.next() {
            return Err(StreamError::Format(format!(
                "invalid format flags '{flags}' at '{rest}'"
            )));
        }
        Ok(out)
    }
}

fn take_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> usize {
    let mut n = 0usize;
    while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
        n = n.saturating_mul(10).saturating_add(d as usize);
        chars.next();
    }
    n
}

/// A decoded scalar ready for formatting.
#[derive(Debug, Clone, Copy)]
enum Scalar {
    Signed(i64),
    Unsigned(u64),
    Float(f64),
}

/// Per-element format, derived from flags and sample type.
#[derive(Debug, Clone, Copy)]
struct ElementFormat {
    sample_type: SampleType,
    width: usize,
    flags: Flags,
}

impl ElementFormat {
    fn derive(sample_type: SampleType, flags: Flags) -> Option<Self> {
        let width = sample_type.width()?;
        Some(Self {
            sample_type,
            width,
            flags,
        })
    }

    fn decode(&self, bytes: &[u8]) -> Scalar {
        let mut b = [0u8; 8];
        b[..self.width].copy_from_slice(&bytes[..self.width]);
        match self.sample_type {
            SampleType::Char => Scalar::Signed(i8::from_le_bytes([b[0]]) as i64),
            SampleType::UChar | SampleType::Bool => Scalar::Unsigned(b[0] as u64),
            SampleType::Short => Scalar::Signed(i16::from_le_bytes([b[0], b[1]]) as i64),
            SampleType::UShort => Scalar::Unsigned(u16::from_le_bytes([b[0], b[1]]) as u64),
            SampleType::Int => Scalar::Signed(i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64),
            SampleType::UInt => {
                Scalar::Unsigned(u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64)
            }
            SampleType::Long | SampleType::LLong => Scalar::Signed(i64::from_le_bytes(b)),
            SampleType::ULong | SampleType::ULLong => Scalar::Unsigned(u64::from_le_bytes(b)),
            SampleType::Float => Scalar::Float(f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64),
            _ => Scalar::Float(f64::from_le_bytes(b)),
        }
    }

    fn render(&self, value: Scalar, out: &mut String) {
        let flags = &self.flags;
        let (negative, body) = match value {
            Scalar::Signed(v) => (v < 0, pad_digits(v.unsigned_abs().to_string(), flags)),
            Scalar::Unsigned(v) => (false, pad_digits(v.to_string(), flags)),
            Scalar::Float(v) if v.is_nan() => (false, "nan".to_string()),
            Scalar::Float(v) if v.is_infinite() => (v < 0.0, "inf".to_string()),
            Scalar::Float(v) => {
                let precision = flags.precision.unwrap_or(DEFAULT_FLOAT_PRECISION);
                (v.is_sign_negative(), format!("{:.*}", precision, v.abs()))
            }
        };
        let sign = if negative {
            "-"
        } else if flags.plus {
            "+"
        } else if flags.space {
            " "
        } else {
            ""
        };

        let len = sign.len() + body.len();
        let fill = flags.width.saturating_sub(len);
        let zero_pad = flags.zero
            && !flags.left
            && !(matches!(value, Scalar::Signed(_) | Scalar::Unsigned(_))
                && flags.precision.is_some());

        if flags.left {
            out.push_str(sign);
            out.push_str(&body);
            out.extend(std::iter::repeat(' ').take(fill));
        } else if zero_pad {
            out.push_str(sign);
            out.extend(std::iter::repeat('0').take(fill));
            out.push_str(&body);
        } else {
            out.extend(std::iter::repeat(' ').take(fill));
            out.push_str(sign);
            out.push_str(&body);
        }
    }

    fn parse_into(&self, token: &str, out: &mut [u8]) -> Result<()> {
        let bad = || StreamError::Format(format!("cannot parse '{token}' as {}", self.sample_type));
        let token = token.strip_prefix('+').unwrap_or(token);
        match self.sample_type {
            SampleType::Char => out[..1].copy_from_slice(&token.parse::<i8>().map_err(|_| bad())?.to_le_bytes()),
            SampleType::UChar => out[..1].copy_from_slice(&token.parse::<u8>().map_err(|_| bad())?.to_le_bytes()),
            SampleType::Bool => out[0] = u8::from(token.parse::<u64>().map_err(|_| bad())? != 0),
            SampleType::Short => out[..2].copy_from_slice(&token.parse::<i16>().map_err(|_| bad())?.to_le_bytes()),
            SampleType::UShort => out[..2].copy_from_slice(&token.parse::<u16>().map_err(|_| bad())?.to_le_bytes()),
            SampleType::Int => out[..4].copy_from_slice(&token.parse::<i32>().map_err(|_| bad())?.to_le_bytes()),
            SampleType::UInt => out[..4].copy_from_slice(&token.parse::<u32>().map_err(|_| bad())?.to_le_bytes()),
            SampleType::Long | SampleType::LLong => {
                out[..8].copy_from_slice(&token.parse::<i64>().map_err(|_| bad())?.to_le_bytes())
            }
            SampleType::ULong | SampleType::ULLong => {
                out[..8].copy_from_slice(&token.parse::<u64>().map_err(|_| bad())?.to_le_bytes())
            }
            SampleType::Float => out[..4].copy_from_slice(&token.parse::<f32>().map_err(|_| bad())?.to_le_bytes()),
            _ => out[..8].copy_from_slice(&token.parse::<f64>().map_err(|_| bad())?.to_le_bytes()),
        }
        Ok(())
    }
}

/// Integer precision is a minimum digit count, as in printf.
fn pad_digits(digits: String, flags: &Flags) -> String {
    match flags.precision {
        Some(p) if p > digits.len() => {
            let mut s = "0".repeat(p - digits.len());
            s.push_str(&digits);
            s
        }
        _ => digits,
    }
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n' | 0x0b | 0x0c)
}

pub(crate) struct TextFile {
    raw: Option<RawFile>,
    format: TextFormat,
    flags: Flags,
    separator: Option<u8>,
    element: Option<ElementFormat>,
}

impl TextFile {
    pub(crate) fn new(format: TextFormat) -> Self {
        let flags = Flags::parse(&format.flags).unwrap_or_default();
        Self {
            raw: None,
            element: ElementFormat::derive(SampleType::Float, flags),
            separator: format.separator().ok().flatten(),
            format,
            flags,
        }
    }

    pub(crate) fn set_format(&mut self, format: TextFormat) -> Result<()> {
        let flags = Flags::parse(&format.flags)?;
        self.separator = format.separator()?;
        self.flags = flags;
        self.element = self
            .element
            .and_then(|e| ElementFormat::derive(e.sample_type, flags));
        self.format = format;
        Ok(())
    }

    pub(crate) fn set_type(&mut self, sample_type: SampleType) {
        self.element = ElementFormat::derive(sample_type, self.flags);
    }

    fn raw(&mut self) -> Result<&mut RawFile> {
        self.raw
            .as_mut()
            .ok_or_else(|| StreamError::Closed(Default::default()))
    }

    fn element(&self) -> Result<ElementFormat> {
        self.element.ok_or_else(|| {
            StreamError::Unsupported("text encoding of non-numeric sample type".to_string())
        })
    }

    /// Skips whitespace and delimiters, then collects one token.
    fn next_token(&mut self) -> Result<Option<String>> {
        let delim = self.separator;
        let raw = self.raw()?;

        loop {
            match raw.peek()? {
                Some(b) if is_space(b) || Some(b) == delim => {
                    raw.next_byte()?;
                }
                Some(_) => break,
                None => return Ok(None),
            }
        }

        let mut token = Vec::new();
        while let Some(b) = raw.peek()? {
            if is_space(b) || Some(b) == delim {
                break;
            }
            token.push(b);
            raw.next_byte()?;
        }
        String::from_utf8(token)
            .map(Some)
            .map_err(|_| StreamError::Format("non-UTF-8 token".to_string()))
    }
}

impl Codec for TextFile {
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

    fn read(&mut self, out: &mut [u8], _size: usize, count: usize) -> Result<usize> {
        let element = self.element()?;
        let needed = count * element.width;
        if out.len() < needed {
            return Err(StreamError::BufferTooSmall {
                needed,
                capacity: out.len(),
            });
        }

        let mut produced = 0;
        for _ in 0..count {
            let Some(token) = self.next_token()? else {
                break;
            };
            element.parse_into(&token, &mut out[produced..produced + element.width])?;
            produced += element.width;
        }
        Ok(produced)
    }

    fn write(&mut self, data: &[u8], size: usize, count: usize) -> Result<usize> {
        let element = self.element()?;
        let needed = count * element.width;
        if data.len() < needed {
            return Err(StreamError::BufferTooSmall {
                needed,
                capacity: data.len(),
            });
        }

        let capacity = self.format.line_capacity;
        let mut text = String::new();
        let mut line_start = 0;
        for i in 0..count {
            let value = element.decode(&data[i * element.width..]);
            element.render(value, &mut text);

            let ends_line = if size > 0 {
                (i + 1) % size == 0
            } else {
                i + 1 == count
            };
            if ends_line {
                text.push('\n');
            } else {
                text.push_str(&self.format.delim);
            }
            if text.len() - line_start > capacity {
                return Err(StreamError::BufferTooSmall {
                    needed: text.len() - line_start,
                    capacity,
                });
            }
            if ends_line {
                line_start = text.len();
            }
        }

        self.raw()?.write_bytes(text.as_bytes())?;
        Ok(text.len())
    }

    fn read_line(&mut self, max_len: usize) -> Result<Option<String>> {
        let raw = self.raw()?;
        let limit = max_len.saturating_sub(1);
        let mut line = Vec::new();
        let mut seen_any = false;

        while let Some(b) = raw.next_byte()? {
            seen_any = true;
            match b {
                b'\n' => break,
                b'\r' => {}
                _ => {
                    if line.len() == limit {
                        return Err(StreamError::BufferTooSmall {
                            needed: line.len() + 1,
                            capacity: limit,
                        });
                    }
                    line.push(b);
                }
            }
        }
        if !seen_any {
            return Ok(None);
        }
        String::from_utf8(line)
            .map(Some)
            .map_err(|_| StreamError::Format("non-UTF-8 line".to_string()))
    }

    fn write_line(&mut self, line: &str) -> Result<usize> {
        let capacity = self.format.line_capacity;
        if line.len() + 1 > capacity {
            return Err(StreamError::BufferTooSmall {
                needed: line.len() + 1,
                capacity,
            });
        }
        let mut text = String::with_capacity(line.len() + 1);
        let _ = writeln!(text, "{line}");
        Ok(self.raw()?.write_bytes(text.as_bytes())?)
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
