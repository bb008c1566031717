//! Unit tests for trellis-wire.

use proptest::prelude::*;
use test_case::test_case;

use crate::{BitReader, BitWriter, SerialBuffer, WireError, bit_width};

#[test]
fn mixed_width_fields_round_trip() {
    let mut buffer = SerialBuffer::new();

    let mut writer = BitWriter::new(&mut buffer);
    writer.write(5, 27);
    writer.write(4, 11);
    writer.write(3, 5);
    writer.write(12, 1472);
    writer.write(21, 1_000_000);
    assert_eq!(buffer.bit_size(), 45);

    let mut reader = BitReader::new(&buffer);
    assert_eq!(reader.read(5), Ok(27));
    assert_eq!(reader.read(4), Ok(11));
    assert_eq!(reader.read(3), Ok(5));
    assert_eq!(reader.read(12), Ok(1472));
    assert_eq!(reader.read(21), Ok(1_000_000));
    assert_eq!(reader.cursor(), 45);
}

#[test]
fn reading_past_end_fails() {
    let mut buffer = SerialBuffer::new();
    BitWriter::new(&mut buffer).write(3, 6);

    let mut reader = BitReader::new(&buffer);
    assert_eq!(
        reader.read(4),
        Err(WireError::UnexpectedEnd {
            cursor: 0,
            wanted: 4,
            have: 3,
        })
    );
    // The failed read must not consume anything.
    assert_eq!(reader.read(3), Ok(6));
}

#[test]
fn zero_width_read_is_rejected() {
    let buffer = SerialBuffer::new();
    let mut reader = BitReader::new(&buffer);
    assert_eq!(reader.read(0), Err(WireError::WidthOutOfRange { width: 0 }));
}

#[test]
fn byte_round_trip_preserves_content() {
    let mut buffer = SerialBuffer::new();
    let mut writer = BitWriter::new(&mut buffer);
    writer.write(7, 99);
    writer.write(9, 300);

    let reloaded = SerialBuffer::from_bytes(buffer.as_bytes().to_vec());
    let mut reader = BitReader::new(&reloaded);
    assert_eq!(reader.read(7), Ok(99));
    assert_eq!(reader.read(9), Ok(300));
}

#[test]
fn clear_resets_the_cursor_space() {
    let mut buffer = SerialBuffer::new();
    BitWriter::new(&mut buffer).write(16, 0xBEEF);
    buffer.clear();
    assert_eq!(buffer.bit_size(), 0);
    assert!(buffer.as_bytes().is_empty());
}

#[test_case(1, 1; "single child still takes a bit")]
#[test_case(2, 1; "two children")]
#[test_case(3, 2; "three children")]
#[test_case(4, 2; "four children")]
#[test_case(5, 3; "five children")]
#[test_case(8, 3; "eight children")]
#[test_case(9, 4; "nine children")]
#[test_case(256, 8; "max region width")]
fn bit_width_table(child_count: usize, expected: u32) {
    assert_eq!(bit_width(child_count), expected);
}

proptest! {
    #[test]
    fn arbitrary_field_sequences_round_trip(
        fields in prop::collection::vec((1_u32..=32, any::<u32>()), 0..64)
    ) {
        let mut buffer = SerialBuffer::new();
        let mut writer = BitWriter::new(&mut buffer);
        let mut expected = Vec::with_capacity(fields.len());
        let mut bits = 0_usize;
        for &(width, raw) in &fields {
            let value = if width == 32 { raw } else { raw & ((1 << width) - 1) };
            writer.write(width, value);
            bits += width as usize;
            expected.push((width, value));
        }
        prop_assert_eq!(buffer.bit_size(), bits);

        let mut reader = BitReader::new(&buffer);
        for (width, value) in expected {
            prop_assert_eq!(reader.read(width), Ok(value));
        }
        prop_assert_eq!(reader.cursor(), bits);
    }

    #[test]
    fn every_prefix_of_the_stream_reads_back(widths in prop::collection::vec(1_u32..=16, 1..32)) {
        let mut buffer = SerialBuffer::new();
        let mut writer = BitWriter::new(&mut buffer);
        for (i, &width) in widths.iter().enumerate() {
            writer.write(width, (i as u32) & ((1 << width) - 1));
        }

        let mut reader = BitReader::new(&buffer);
        for (i, &width) in widths.iter().enumerate() {
            prop_assert_eq!(reader.read(width), Ok((i as u32) & ((1 << width) - 1)));
        }
    }
}
