//! Sample types, stream descriptors and sample batches.

use crate::error::{Result, StreamError};
use std::fmt;

/// Element type tag of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleType {
    /// Undefined type.
    Undef,
    /// Signed 8-bit integer.
    Char,
    /// Unsigned 8-bit integer.
    UChar,
    /// Signed 16-bit integer.
    Short,
    /// Unsigned 16-bit integer.
    UShort,
    /// Signed 32-bit integer.
    Int,
    /// Unsigned 32-bit integer.
    UInt,
    /// Signed 64-bit integer.
    Long,
    /// Unsigned 64-bit integer.
    ULong,
    /// Signed 64-bit integer (alias kept for recorded files).
    LLong,
    /// Unsigned 64-bit integer (alias kept for recorded files).
    ULLong,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// One byte boolean.
    Bool,
    /// Opaque struct of caller-defined width.
    Struct,
    /// Image frame of caller-defined width.
    Image,
}

impl SampleType {
    const ALL: [SampleType; 16] = [
        Self::Undef,
        Self::Char,
        Self::UChar,
        Self::Short,
        Self::UShort,
        Self::Int,
        Self::UInt,
        Self::Long,
        Self::ULong,
        Self::LLong,
        Self::ULLong,
        Self::Float,
        Self::Double,
        Self::Bool,
        Self::Struct,
        Self::Image,
    ];

    /// Returns the name recorded in the index `type` attribute.
    pub fn name(self) -> &'static str {
        match self {
            Self::Undef => "UNDEF",
            Self::Char => "CHAR",
            Self::UChar => "UCHAR",
            Self::Short => "SHORT",
            Self::UShort => "USHORT",
            Self::Int => "INT",
            Self::UInt => "UINT",
            Self::Long => "LONG",
            Self::ULong => "ULONG",
            Self::LLong => "LLONG",
            Self::ULLong => "ULLONG",
            Self::Float => "FLOAT",
            Self::Double => "DOUBLE",
            Self::Bool => "BOOL",
            Self::Struct => "STRUCT",
            Self::Image => "IMAGE",
        }
    }

    /// Parses an index `type` name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Returns the fixed byte width of numeric types, `None` for types
    /// whose width is defined by the stream.
    pub fn width(self) -> Option<usize> {
        match self {
            Self::Char | Self::UChar | Self::Bool => Some(1),
            Self::Short | Self::UShort => Some(2),
            Self::Int | Self::UInt | Self::Float => Some(4),
            Self::Long | Self::ULong | Self::LLong | Self::ULLong | Self::Double => Some(8),
            Self::Undef | Self::Struct | Self::Image => None,
        }
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rust primitives that can be stored as stream samples.
pub trait Sample: Copy + Default {
    /// Type tag recorded for this primitive.
    const TYPE: SampleType;

    /// Appends the little-endian encoding of `self`.
    fn put(self, out: &mut Vec<u8>);

    /// Decodes one value from the first `size_of::<Self>()` bytes.
    fn get(bytes: &[u8]) -> Self;
}

macro_rules! impl_sample {
    ($($ty:ty => $tag:ident),* $(,)?) => {$(
        impl Sample for $ty {
            const TYPE: SampleType = SampleType::$tag;

            fn put(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn get(bytes: &[u8]) -> Self {
                let mut b = [0u8; std::mem::size_of::<$ty>()];
                b.copy_from_slice(&bytes[..std::mem::size_of::<$ty>()]);
                <$ty>::from_le_bytes(b)
            }
        }
    )*};
}

impl_sample! {
    i8 => Char,
    u8 => UChar,
    i16 => Short,
    u16 => UShort,
    i32 => Int,
    u32 => UInt,
    i64 => Long,
    u64 => ULong,
    f32 => Float,
    f64 => Double,
}

/// The immutable shape of a recording.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDescriptor {
    /// Samples per second.
    pub sample_rate: f64,
    /// Scalar channels per sample.
    pub dim: usize,
    /// Byte width of one scalar.
    pub byte: usize,
    /// Element type.
    pub sample_type: SampleType,
    /// Total samples recorded.
    pub sample_count: u64,
}

impl StreamDescriptor {
    /// Creates a descriptor for a numeric type; the byte width is taken
    /// from the type (1 for types without a fixed width, see
    /// [`StreamDescriptor::with_byte`]).
    pub fn new(sample_rate: f64, dim: usize, sample_type: SampleType) -> Self {
        Self {
            sample_rate,
            dim,
            byte: sample_type.width().unwrap_or(1),
            sample_type,
            sample_count: 0,
        }
    }

    /// Overrides the element byte width (struct and image streams).
    pub fn with_byte(mut self, byte: usize) -> Self {
        self.byte = byte;
        self
    }

    /// Bytes per sample across all dimensions.
    pub fn sample_bytes(&self) -> usize {
        self.dim * self.byte
    }

    fn shape(&self) -> String {
        format!(
            "sr={} dim={} byte={} type={}",
            self.sample_rate, self.dim, self.byte, self.sample_type
        )
    }

    fn mismatch(&self, batch: &SampleBatch) -> StreamError {
        StreamError::DescriptorMismatch {
            expected: self.shape(),
            actual: batch.descriptor().shape(),
        }
    }

    /// Checks that `batch` has exactly this shape: sample rate, byte width,
    /// dimension and type.
    pub fn check(&self, batch: &SampleBatch) -> Result<()> {
        if batch.sample_rate != self.sample_rate
            || batch.byte != self.byte
            || batch.dim != self.dim
            || batch.sample_type != self.sample_type
        {
            return Err(self.mismatch(batch));
        }
        Ok(())
    }

    /// Rejects shapes no recording can have: a non-positive or non-finite
    /// sample rate, zero dimension or zero byte width.
    pub fn validate(&self) -> Result<()> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(StreamError::Format(format!(
                "invalid sample rate {}",
                self.sample_rate
            )));
        }
        if self.dim == 0 || self.byte == 0 {
            return Err(StreamError::Format(format!(
                "invalid sample shape ({})",
                self.shape()
            )));
        }
        Ok(())
    }

    /// Checks the shape of `batch` except its sample rate.
    pub fn check_layout(&self, batch: &SampleBatch) -> Result<()> {
        if batch.byte != self.byte || batch.dim != self.dim || batch.sample_type != self.sample_type
        {
            return Err(self.mismatch(batch));
        }
        Ok(())
    }
}

/// A typed, dimensioned block of samples with a rate and a start time.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    data: Vec<u8>,
    num: usize,
    dim: usize,
    byte: usize,
    sample_type: SampleType,
    sample_rate: f64,
    time: f64,
}

impl SampleBatch {
    /// Creates an empty batch with room for `capacity` samples shaped like
    /// `descriptor`.
    pub fn for_descriptor(descriptor: &StreamDescriptor, capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity * descriptor.sample_bytes()],
            num: capacity,
            dim: descriptor.dim,
            byte: descriptor.byte,
            sample_type: descriptor.sample_type,
            sample_rate: descriptor.sample_rate,
            time: 0.0,
        }
    }

    /// Builds a batch from interleaved values (`dim` values per sample).
    pub fn from_values<T: Sample>(sample_rate: f64, dim: usize, time: f64, values: &[T]) -> Self {
        let mut data = Vec::with_capacity(std::mem::size_of_val(values));
        for v in values {
            v.put(&mut data);
        }
        Self {
            data,
            num: if dim == 0 { 0 } else { values.len() / dim },
            dim,
            byte: std::mem::size_of::<T>(),
            sample_type: T::TYPE,
            sample_rate,
            time,
        }
    }

    /// Builds a batch over raw little-endian bytes.
    pub fn from_bytes(descriptor: &StreamDescriptor, time: f64, data: Vec<u8>) -> Self {
        let sample_bytes = descriptor.sample_bytes().max(1);
        Self {
            num: data.len() / sample_bytes,
            data,
            dim: descriptor.dim,
            byte: descriptor.byte,
            sample_type: descriptor.sample_type,
            sample_rate: descriptor.sample_rate,
            time,
        }
    }

    /// Decodes the first `num * dim` values as `T`.
    pub fn values<T: Sample>(&self) -> Vec<T> {
        let width = std::mem::size_of::<T>();
        self.bytes()
            .chunks_exact(width)
            .map(T::get)
            .collect()
    }

    /// Returns the bytes of the `num` valid samples.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.num * self.sample_bytes()]
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        let end = self.num * self.sample_bytes();
        &mut self.data[..end]
    }

    /// Sets the number of valid samples, growing the storage if needed.
    pub fn resize_samples(&mut self, num: usize) {
        let needed = num * self.sample_bytes();
        if self.data.len() < needed {
            self.data.resize(needed, 0);
        }
        self.num = num;
    }

    /// Number of samples the storage can hold without growing.
    pub fn capacity(&self) -> usize {
        match self.sample_bytes() {
            0 => 0,
            n => self.data.len() / n,
        }
    }

    /// Number of valid samples.
    pub fn num(&self) -> usize {
        self.num
    }

    /// Scalar channels per sample.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Byte width of one scalar.
    pub fn byte(&self) -> usize {
        self.byte
    }

    /// Element type.
    pub fn sample_type(&self) -> SampleType {
        self.sample_type
    }

    /// Samples per second.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Bytes per sample.
    pub fn sample_bytes(&self) -> usize {
        self.dim * self.byte
    }

    /// Start time in seconds.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Sets the start time in seconds.
    pub fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    /// Returns the shape of this batch as a descriptor.
    pub fn descriptor(&self) -> StreamDescriptor {
        StreamDescriptor {
            sample_rate: self.sample_rate,
            dim: self.dim,
            byte: self.byte,
            sample_type: self.sample_type,
            sample_count: self.num as u64,
        }
    }
}
