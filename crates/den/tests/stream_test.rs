//! Integration tests for stream recordings.
//!
//! These tests write recordings with `StreamWriter` and replay them with
//! `StreamReader` across all three payload encodings.

use den::file::{AccessMode, Encoding, FileHandle, Origin};
use den::stream::{
    ChunkId, Metadata, SampleBatch, SampleType, StreamDescriptor, StreamReader, StreamWriter,
    Version,
};
use den::{StreamConfig, StreamError};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const ENCODINGS: [Encoding; 3] = [Encoding::Binary, Encoding::Ascii, Encoding::BinLz4];

/// Helper to generate `num` samples of dimension 3 starting at `first`.
fn float_samples(first: usize, num: usize) -> Vec<f32> {
    (first * 3..(first + num) * 3)
        .map(|i| i as f32 * 0.25 - 10.0)
        .collect()
}

fn float_desc() -> StreamDescriptor {
    StreamDescriptor::new(10.0, 3, SampleType::Float)
}

/// Writes the two-chunk recording of 5 and 7 samples at 0.0s and 0.5s.
fn write_example(dir: &Path, encoding: Encoding) -> PathBuf {
    let mut writer = StreamWriter::new();
    writer
        .open(&float_desc(), dir.join("example"), encoding, Version::V2, None)
        .unwrap();
    writer
        .write(
            &SampleBatch::from_values(10.0, 3, 0.0, &float_samples(0, 5)),
            false,
        )
        .unwrap();
    writer
        .write(
            &SampleBatch::from_values(10.0, 3, 0.5, &float_samples(5, 7)),
            false,
        )
        .unwrap();
    let recording = writer.close().unwrap();

    assert_eq!(recording.chunk_count, 2);
    assert_eq!(recording.descriptor.sample_count, 12);
    recording.index_path
}

#[test]
fn test_example_scenario() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_example(temp_dir.path(), Encoding::Binary);
    assert_eq!(path, temp_dir.path().join("example.stream"));
    assert!(temp_dir.path().join("example.stream~").exists());

    let mut reader = StreamReader::new();
    let desc = reader.open(&path).unwrap();
    assert_eq!(desc.dim, 3);
    assert_eq!(desc.byte, 4);
    assert_eq!(desc.sample_type, SampleType::Float);

    let chunks = reader.chunks();
    assert_eq!(chunks.len(), 2);
    assert_eq!((chunks[0].num, chunks[0].byte), (5, 0));
    assert_eq!((chunks[1].num, chunks[1].byte), (7, 5 * 3 * 4));
    assert_eq!(chunks[1].from, 0.5);

    let mut batch = SampleBatch::for_descriptor(&desc, 0);
    assert_eq!(reader.read_chunk(&mut batch, ChunkId::At(1)).unwrap(), 7);
    let values = batch.values::<f32>();
    // First value of chunk 1 is the 6th sample written.
    assert_eq!(&values[..3], &float_samples(5, 1)[..]);
    assert_eq!(values, float_samples(5, 7));
    assert_eq!(batch.time(), 0.5);
}

#[test]
fn test_round_trip_all_encodings() {
    for encoding in ENCODINGS {
        let temp_dir = TempDir::new().unwrap();
        let path = write_example(temp_dir.path(), encoding);

        let mut reader = StreamReader::new();
        let desc = reader.open(&path).unwrap();
        assert_eq!(reader.encoding(), Some(encoding));
        assert_eq!(reader.version(), Some(Version::V2));
        assert!(reader.is_complete());

        let mut batch = SampleBatch::for_descriptor(&desc, 0);
        let mut values = Vec::new();
        while reader.read_chunk(&mut batch, ChunkId::Next).unwrap() > 0 {
            values.extend(batch.values::<f32>());
        }
        assert_eq!(values, float_samples(0, 12), "encoding {encoding}");
    }
}

#[test]
fn test_random_order_chunk_reads() {
    for encoding in ENCODINGS {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = StreamWriter::new();
        writer
            .open(&float_desc(), temp_dir.path().join("random"), encoding, Version::V3, None)
            .unwrap();
        let sizes = [4usize, 1, 9, 2, 6];
        let mut first = 0;
        for (i, &n) in sizes.iter().enumerate() {
            let batch = SampleBatch::from_values(10.0, 3, i as f64, &float_samples(first, n));
            writer.write(&batch, false).unwrap();
            first += n;
        }
        let path = writer.close().unwrap().index_path;

        let mut reader = StreamReader::new();
        let desc = reader.open(&path).unwrap();
        let mut batch = SampleBatch::for_descriptor(&desc, 1);
        for id in [3usize, 0, 4, 2, 1, 4, 0] {
            let start: usize = sizes[..id].iter().sum();
            assert_eq!(reader.read_chunk(&mut batch, ChunkId::At(id)).unwrap(), sizes[id]);
            assert_eq!(
                batch.values::<f32>(),
                float_samples(start, sizes[id]),
                "encoding {encoding}, chunk {id}"
            );
            assert_eq!(batch.time(), id as f64);
        }
    }
}

#[test]
fn test_next_chunk_iteration_terminates() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_example(temp_dir.path(), Encoding::BinLz4);

    let mut reader = StreamReader::new();
    let desc = reader.open(&path).unwrap();
    let mut batch = SampleBatch::for_descriptor(&desc, 0);

    assert_eq!(reader.read_chunk(&mut batch, ChunkId::Next).unwrap(), 5);
    assert_eq!(reader.read_chunk(&mut batch, ChunkId::Next).unwrap(), 7);
    assert_eq!(reader.read_chunk(&mut batch, ChunkId::Next).unwrap(), 0);
    assert_eq!(reader.read_chunk(&mut batch, ChunkId::Next).unwrap(), 0);

    reader.reset().unwrap();
    assert_eq!(reader.read_chunk(&mut batch, ChunkId::Next).unwrap(), 5);
    assert_eq!(batch.values::<f32>(), float_samples(0, 5));
}

#[test]
fn test_descriptor_mismatch_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_example(temp_dir.path(), Encoding::Binary);

    let mut reader = StreamReader::new();
    let desc = reader.open(&path).unwrap();
    let mut batch = SampleBatch::for_descriptor(&desc, 0);
    assert_eq!(reader.read_chunk(&mut batch, ChunkId::Next).unwrap(), 5);

    let wrong = [
        StreamDescriptor::new(20.0, 3, SampleType::Float),
        StreamDescriptor::new(10.0, 2, SampleType::Float),
        StreamDescriptor::new(10.0, 3, SampleType::Int),
        StreamDescriptor::new(10.0, 3, SampleType::Double),
    ];
    for desc in &wrong {
        let mut bad = SampleBatch::for_descriptor(desc, 7);
        assert!(matches!(
            reader.read_chunk(&mut bad, ChunkId::Next),
            Err(StreamError::DescriptorMismatch { .. })
        ));
        assert!(matches!(
            reader.read(&mut bad),
            Err(StreamError::DescriptorMismatch { .. })
        ));
    }

    // The rejected calls consumed neither bytes nor the chunk cursor, so a
    // sequential read continues right after chunk 0.
    let mut next = SampleBatch::for_descriptor(&desc, 7);
    assert_eq!(reader.read(&mut next).unwrap(), 7);
    assert_eq!(next.values::<f32>(), float_samples(5, 7));
    assert_eq!(reader.read_chunk(&mut batch, ChunkId::Next).unwrap(), 7);
}

#[test]
fn test_version_gate_on_open() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_example(temp_dir.path(), Encoding::Binary);

    let index = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, index.replace("ssi-v=\"2\"", "ssi-v=\"1\"")).unwrap();

    let mut reader = StreamReader::new();
    assert!(matches!(
        reader.open(&path),
        Err(StreamError::UnsupportedVersion(1))
    ));
    assert!(!reader.is_open());
}

#[test]
fn test_missing_index_fails_open() {
    let temp_dir = TempDir::new().unwrap();
    let mut reader = StreamReader::new();
    assert!(matches!(
        reader.open(temp_dir.path().join("nothing")),
        Err(StreamError::Resource { .. })
    ));
}

#[test]
fn test_continued_writes_merge_into_one_chunk() {
    for encoding in ENCODINGS {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = StreamWriter::new();
        writer
            .open(&float_desc(), temp_dir.path().join("merged"), encoding, Version::V2, None)
            .unwrap();

        let mut first = 0;
        for (i, n) in [3usize, 2, 4].into_iter().enumerate() {
            let time = 2.0 + i as f64 * 0.1;
            let batch = SampleBatch::from_values(10.0, 3, time, &float_samples(first, n));
            writer.write(&batch, true).unwrap();
            first += n;
        }
        let path = writer.close().unwrap().index_path;

        let mut reader = StreamReader::new();
        let desc = reader.open(&path).unwrap();
        assert_eq!(reader.chunk_count(), 1);
        assert_eq!(reader.chunks()[0].num, 9);
        assert_eq!(reader.chunks()[0].from, 2.0);
        assert_eq!(reader.chunks()[0].byte, 0);

        let mut batch = SampleBatch::for_descriptor(&desc, 0);
        assert_eq!(reader.read_chunk(&mut batch, ChunkId::At(0)).unwrap(), 9);
        assert_eq!(batch.values::<f32>(), float_samples(0, 9));
    }
}

#[test]
fn test_zero_length_chunk_reads_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let mut writer = StreamWriter::new();
    writer
        .open(&float_desc(), temp_dir.path().join("zero"), Encoding::Binary, Version::V2, None)
        .unwrap();
    writer
        .write(&SampleBatch::from_values(10.0, 3, 0.0, &float_samples(0, 2)), false)
        .unwrap();
    writer
        .write(&SampleBatch::from_values::<f32>(10.0, 3, 0.2, &[]), false)
        .unwrap();
    writer
        .write(&SampleBatch::from_values(10.0, 3, 0.3, &float_samples(2, 2)), false)
        .unwrap();
    let path = writer.close().unwrap().index_path;

    let mut reader = StreamReader::new();
    let desc = reader.open(&path).unwrap();
    let mut batch = SampleBatch::for_descriptor(&desc, 0);
    assert_eq!(reader.read_chunk(&mut batch, ChunkId::At(1)).unwrap(), 0);
    assert_eq!(batch.num(), 0);
    assert_eq!(reader.read_chunk(&mut batch, ChunkId::At(2)).unwrap(), 2);
    assert_eq!(batch.values::<f32>(), float_samples(2, 2));
}

#[test]
fn test_reading_while_writing() {
    for encoding in ENCODINGS {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = StreamWriter::new();
        writer
            .open(&float_desc(), temp_dir.path().join("live"), encoding, Version::V2, None)
            .unwrap();
        writer
            .write(&SampleBatch::from_values(10.0, 3, 0.0, &float_samples(0, 4)), false)
            .unwrap();
        writer
            .write(&SampleBatch::from_values(10.0, 3, 0.4, &float_samples(4, 3)), false)
            .unwrap();

        let mut reader = StreamReader::new();
        let desc = reader.open(temp_dir.path().join("live")).unwrap();
        assert!(!reader.is_complete());
        assert_eq!(reader.chunk_count(), 2);

        let mut batch = SampleBatch::for_descriptor(&desc, 0);
        assert_eq!(reader.read_chunk(&mut batch, ChunkId::At(1)).unwrap(), 3);
        assert_eq!(batch.values::<f32>(), float_samples(4, 3), "encoding {encoding}");
        reader.close().unwrap();

        writer.close().unwrap();
        let mut reader = StreamReader::new();
        reader.open(temp_dir.path().join("live")).unwrap();
        assert!(reader.is_complete());
    }
}

#[test]
fn test_text_payload_layout() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = StreamConfig::default();
    config.text.flags = ".2".to_string();

    let desc = StreamDescriptor::new(100.0, 2, SampleType::Double);
    let mut writer = StreamWriter::with_config(config.clone());
    writer.set_delim(",").unwrap();
    writer
        .open(&desc, temp_dir.path().join("text"), Encoding::Ascii, Version::V2, None)
        .unwrap();
    writer
        .write(&SampleBatch::from_values(100.0, 2, 0.0, &[1.0f64, -2.5, 3.126, 4.0]), false)
        .unwrap();
    let recording = writer.close().unwrap();

    let payload = std::fs::read_to_string(&recording.payload_path).unwrap();
    assert_eq!(payload, "1.00,-2.50\n3.13,4.00\n");

    let mut reader = StreamReader::with_config(config);
    let desc = reader.open(&recording.index_path).unwrap();
    let mut batch = SampleBatch::for_descriptor(&desc, 0);
    assert_eq!(reader.read_chunk(&mut batch, ChunkId::At(0)).unwrap(), 2);
    assert_eq!(batch.values::<f64>(), vec![1.0, -2.5, 3.13, 4.0]);
}

#[test]
fn test_integer_types_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let values: Vec<i64> = vec![i64::MIN, -1, 0, 1, i64::MAX, 42];
    for encoding in ENCODINGS {
        let path = temp_dir.path().join(format!("ints_{}", encoding.name()));
        let desc = StreamDescriptor::new(1.0, 2, SampleType::Long);
        let mut writer = StreamWriter::new();
        writer.open(&desc, &path, encoding, Version::V2, None).unwrap();
        writer
            .write(&SampleBatch::from_values(1.0, 2, 0.0, &values), false)
            .unwrap();
        writer.close().unwrap();

        let mut reader = StreamReader::new();
        let desc = reader.open(&path).unwrap();
        let mut batch = SampleBatch::for_descriptor(&desc, 3);
        assert_eq!(reader.read(&mut batch).unwrap(), 3);
        assert_eq!(batch.values::<i64>(), values, "encoding {encoding}");
        assert_eq!(batch.time(), 3.0);
    }
}

#[test]
fn test_metadata_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let cases = [
        (
            StreamDescriptor::new(25.0, 1, SampleType::Image).with_byte(4 * 2 * 3),
            Metadata::Image {
                width: 4,
                height: 2,
                depth: 8,
                channels: 3,
                flip: true,
            },
        ),
        (
            StreamDescriptor::new(30.0, 60, SampleType::Float),
            Metadata::Skeleton {
                count: 2,
                layout: "SSI".to_string(),
            },
        ),
        (
            StreamDescriptor::new(30.0, 10, SampleType::Float),
            Metadata::Custom(vec![("sensor".to_string(), "imu \"left\"".to_string())]),
        ),
    ];

    for (i, (desc, meta)) in cases.into_iter().enumerate() {
        let path = temp_dir.path().join(format!("meta{i}"));
        let mut writer = StreamWriter::new();
        writer
            .open(&desc, &path, Encoding::Binary, Version::V3, Some(&meta))
            .unwrap();
        let batch = SampleBatch::from_bytes(&desc, 0.0, vec![7u8; desc.sample_bytes()]);
        writer.write(&batch, false).unwrap();
        writer.close().unwrap();

        let mut reader = StreamReader::new();
        let read_desc = reader.open(&path).unwrap();
        assert_eq!(reader.metadata(), Some(&meta));
        assert_eq!(read_desc.byte, desc.byte);

        let mut out = SampleBatch::for_descriptor(&read_desc, 0);
        assert_eq!(reader.read_chunk(&mut out, ChunkId::At(0)).unwrap(), 1);
        assert!(out.bytes().iter().all(|&b| b == 7));
    }
}

#[test]
fn test_custom_metadata_requires_v3() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("v2meta");
    let meta = Metadata::Custom(vec![("k".to_string(), "v".to_string())]);

    let mut writer = StreamWriter::new();
    writer
        .open(&float_desc(), &path, Encoding::Binary, Version::V2, Some(&meta))
        .unwrap();
    writer.close().unwrap();

    let mut reader = StreamReader::new();
    reader.open(&path).unwrap();
    assert_eq!(reader.metadata(), None);
    assert_eq!(reader.chunk_count(), 0);
}

#[test]
fn test_writer_and_reader_open_twice() {
    let temp_dir = TempDir::new().unwrap();
    let mut writer = StreamWriter::new();
    writer
        .open(&float_desc(), temp_dir.path().join("a"), Encoding::Binary, Version::V2, None)
        .unwrap();
    assert!(matches!(
        writer.open(&float_desc(), temp_dir.path().join("b"), Encoding::Binary, Version::V2, None),
        Err(StreamError::AlreadyOpen(_))
    ));
    writer.close().unwrap();
    assert!(matches!(writer.close(), Err(StreamError::Closed(_))));

    let mut reader = StreamReader::new();
    reader.open(temp_dir.path().join("a")).unwrap();
    assert!(matches!(
        reader.open(temp_dir.path().join("a")),
        Err(StreamError::AlreadyOpen(_))
    ));
}

#[test]
fn test_lz4_offsets_are_decoded_positions() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_example(temp_dir.path(), Encoding::BinLz4);

    let mut payload = FileHandle::create_and_open(
        Encoding::BinLz4,
        AccessMode::Read,
        temp_dir.path().join("example.stream~"),
    )
    .unwrap();
    assert_eq!(payload.seek(60, Origin::Begin).unwrap(), 60);
    let mut first = [0u8; 12];
    assert_eq!(payload.read(&mut first, 4, 3).unwrap(), 12);

    let mut reader = StreamReader::new();
    let desc = reader.open(&path).unwrap();
    let mut batch = SampleBatch::for_descriptor(&desc, 0);
    reader.read_chunk(&mut batch, ChunkId::At(1)).unwrap();
    assert_eq!(&batch.bytes()[..12], &first[..]);
}
