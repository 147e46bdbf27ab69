// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io::{self, Write};

/// Represents the wire type for the in-wire protobuf encoding. There are more
/// types than are represented here; these are just the ones the profile
/// format encodes with. Unknown fields of any wire type can still be skipped
/// over, see [`skip`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WireType {
    Varint = 0,
    LengthDelimited = 2,
}

/// Errors produced while decoding a profile.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// A varint ran past the end of the input or past 64 bits.
    #[error("malformed varint in {field}")]
    Varint { field: &'static str },
    /// A length-delimited record claimed more bytes than the input holds,
    /// or the input ended inside a fixed-width value.
    #[error("truncated record in {field}")]
    Truncated { field: &'static str },
    /// A known field was encoded with a wire type other than its declared
    /// one.
    #[error("unexpected wire type {wire_type} in {field}")]
    WireType { field: &'static str, wire_type: u8 },
}

/// A value is stored differently depending on the wire_type.
pub trait Value {
    /// The wire type this value uses.
    const WIRE_TYPE: WireType;

    /// The number of bytes it takes to encode this value.
    fn proto_len(&self) -> u64;

    /// Encode the value to the in-wire protobuf format.
    ///
    /// Serialization often happens one byte at a time, so a buffered writer
    /// should probably be used.
    fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()>;
}

impl Value for u64 {
    const WIRE_TYPE: WireType = WireType::Varint;

    fn proto_len(&self) -> u64 {
        // https://github.com/google/protobuf/blob/3.3.x/src/google/protobuf/io/coded_stream.h#L1301-L1309
        ((((self | 1).leading_zeros() ^ 63) * 9 + 73) / 64) as u64
    }

    /// Encodes a [`varint`] according to protobuf semantics.
    ///
    /// [`varint`]: https://protobuf.dev/programming-guides/encoding/#varints
    #[inline]
    fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut value = *self;
        loop {
            let byte = if value < 0x80 {
                value as u8
            } else {
                ((value & 0x7F) | 0x80) as u8
            };
            writer.write_all(&[byte])?;
            if value < 0x80 {
                return Ok(());
            }
            value >>= 7;
        }
    }
}

impl Value for i64 {
    const WIRE_TYPE: WireType = WireType::Varint;

    fn proto_len(&self) -> u64 {
        (*self as u64).proto_len()
    }

    fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        (*self as u64).encode(writer)
    }
}

/// The smallest possible protobuf field number.
const MIN_FIELD: u32 = 1;

/// The largest possible protobuf field number.
const MAX_FIELD: u32 = (1 << 29) - 1;

/// A tag is a combination of a wire_type, stored in the least significant
/// three bits, and the field number that is defined in the .proto file.
#[derive(Copy, Clone)]
pub struct Tag(u32);

impl Tag {
    #[cfg_attr(debug_assertions, track_caller)]
    #[inline]
    pub const fn new(field: u32, wire_type: WireType) -> Self {
        debug_assert!(field >= MIN_FIELD && field <= MAX_FIELD);
        Self((field << 3) | wire_type as u32)
    }

    #[inline]
    pub fn proto_len(self) -> u64 {
        (self.0 as u64).proto_len()
    }

    #[inline]
    pub fn encode<W: Write>(self, writer: &mut W) -> io::Result<()> {
        (self.0 as u64).encode(writer)
    }
}

/// Decodes a varint off the front of `input`, returning it along with the
/// rest of the input. Returns None if the input ends mid-varint or the
/// varint runs past 64 bits.
pub(crate) fn decode_varint(mut input: &[u8]) -> Option<(u64, &[u8])> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let (&byte, rest) = input.split_first()?;
        input = rest;
        value |= u64::from(byte & 0x7F) << shift;
        if byte < 0x80 {
            return Some((value, input));
        }
        shift += 7;
        if shift >= 64 {
            return None;
        }
    }
}

/// Decodes a field's tag, splitting it into the field number and wire type.
pub(crate) fn decode_tag(input: &[u8]) -> Option<(u32, u8, &[u8])> {
    let (key, rest) = decode_varint(input)?;
    let field = u32::try_from(key >> 3).ok()?;
    if field < MIN_FIELD || field > MAX_FIELD {
        return None;
    }
    Some((field, (key & 0x7) as u8, rest))
}

/// Decodes a length prefix and splits off that many payload bytes.
pub(crate) fn decode_len_delimited(input: &[u8]) -> Option<(&[u8], &[u8])> {
    let (len, rest) = decode_varint(input)?;
    let len = usize::try_from(len).ok()?;
    if len > rest.len() {
        return None;
    }
    Some(rest.split_at(len))
}

/// Skips over a single value of the given wire type. This handles the fixed
/// 64-bit and 32-bit wire types as well, so unknown fields never derail a
/// scan. Group wire types are not supported.
pub(crate) fn skip(wire_type: u8, input: &[u8]) -> Option<&[u8]> {
    match wire_type {
        0 => decode_varint(input).map(|(_, rest)| rest),
        1 => input.get(8..),
        2 => decode_len_delimited(input).map(|(_, rest)| rest),
        5 => input.get(4..),
        _ => None,
    }
}

pub(crate) fn expect_varint<'a>(
    wire_type: u8,
    input: &'a [u8],
    field: &'static str,
) -> Result<(u64, &'a [u8]), DecodeError> {
    if wire_type != WireType::Varint as u8 {
        return Err(DecodeError::WireType { field, wire_type });
    }
    decode_varint(input).ok_or(DecodeError::Varint { field })
}

pub(crate) fn expect_len_delimited<'a>(
    wire_type: u8,
    input: &'a [u8],
    field: &'static str,
) -> Result<(&'a [u8], &'a [u8]), DecodeError> {
    if wire_type != WireType::LengthDelimited as u8 {
        return Err(DecodeError::WireType { field, wire_type });
    }
    decode_len_delimited(input).ok_or(DecodeError::Truncated { field })
}

/// Marker for integers which encode as varints when packed into a single
/// length-delimited field.
pub(crate) trait PackedVarint: Copy {
    fn to_raw(self) -> u64;
}

impl PackedVarint for u64 {
    fn to_raw(self) -> u64 {
        self
    }
}

impl PackedVarint for i64 {
    fn to_raw(self) -> u64 {
        self as u64
    }
}

/// Field helpers below elide zero values and empty sequences, matching the
/// proto3 emission of the profile producers whose output gets re-encoded.

pub(crate) fn uint_len(field: u32, value: u64) -> u64 {
    if value == 0 {
        return 0;
    }
    Tag::new(field, WireType::Varint).proto_len() + value.proto_len()
}

pub(crate) fn encode_uint<W: Write>(field: u32, value: u64, writer: &mut W) -> io::Result<()> {
    if value == 0 {
        return Ok(());
    }
    Tag::new(field, WireType::Varint).encode(writer)?;
    value.encode(writer)
}

pub(crate) fn int_len(field: u32, value: i64) -> u64 {
    uint_len(field, value as u64)
}

pub(crate) fn encode_int<W: Write>(field: u32, value: i64, writer: &mut W) -> io::Result<()> {
    encode_uint(field, value as u64, writer)
}

pub(crate) fn bool_len(field: u32, value: bool) -> u64 {
    uint_len(field, value as u64)
}

pub(crate) fn encode_bool<W: Write>(field: u32, value: bool, writer: &mut W) -> io::Result<()> {
    encode_uint(field, value as u64, writer)
}

pub(crate) fn packed_len<T: PackedVarint>(field: u32, values: &[T]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let payload: u64 = values.iter().map(|value| value.to_raw().proto_len()).sum();
    Tag::new(field, WireType::LengthDelimited).proto_len() + payload.proto_len() + payload
}

pub(crate) fn encode_packed<T: PackedVarint, W: Write>(
    field: u32,
    values: &[T],
    writer: &mut W,
) -> io::Result<()> {
    if values.is_empty() {
        return Ok(());
    }
    Tag::new(field, WireType::LengthDelimited).encode(writer)?;
    let payload: u64 = values.iter().map(|value| value.to_raw().proto_len()).sum();
    payload.encode(writer)?;
    for value in values {
        value.to_raw().encode(writer)?;
    }
    Ok(())
}

/// Encodes a top-level scalar field unconditionally, zero or not. Presence
/// in the output has to mirror presence in the input, so there is no
/// zero-elision here.
pub(crate) fn encode_scalar<W: Write>(field: u32, value: i64, writer: &mut W) -> io::Result<()> {
    Tag::new(field, WireType::Varint).encode(writer)?;
    (value as u64).encode(writer)
}

/// Re-emits a length-delimited field from its raw payload bytes.
pub(crate) fn encode_raw<W: Write>(field: u32, bytes: &[u8], writer: &mut W) -> io::Result<()> {
    Tag::new(field, WireType::LengthDelimited).encode(writer)?;
    (bytes.len() as u64).encode(writer)?;
    writer.write_all(bytes)
}

pub(crate) fn message_len<T: Value>(field: u32, value: &T) -> u64 {
    let payload = value.proto_len();
    Tag::new(field, WireType::LengthDelimited).proto_len() + payload.proto_len() + payload
}

pub(crate) fn encode_message<T: Value, W: Write>(
    field: u32,
    value: &T,
    writer: &mut W,
) -> io::Result<()> {
    Tag::new(field, WireType::LengthDelimited).encode(writer)?;
    value.proto_len().encode(writer)?;
    value.encode(writer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_range() {
        assert_eq!(0u64.proto_len(), 1);
        assert_eq!(0x80u64.proto_len(), 2);
        assert_eq!(u64::MAX.proto_len(), 10);
    }

    #[test]
    fn varint_roundtrip() {
        bolero::check!().with_type::<u64>().for_each(|&value| {
            let mut buffer = Vec::with_capacity(10);
            value.encode(&mut buffer).unwrap();
            assert_eq!(buffer.len() as u64, value.proto_len());
            let (decoded, rest) = decode_varint(&buffer).unwrap();
            assert_eq!(decoded, value);
            assert!(rest.is_empty());
        });
    }

    #[test]
    fn varint_truncated() {
        assert_eq!(decode_varint(&[0x80]), None);
        assert_eq!(decode_varint(&[]), None);
    }

    #[test]
    fn varint_too_long() {
        // 11 continuation bytes never fit in 64 bits
        assert_eq!(decode_varint(&[0xFF; 11]), None);
    }

    #[test]
    fn tag_rejects_field_zero() {
        assert_eq!(decode_tag(&[0x00]), None);
    }

    #[test]
    fn skip_all_wire_types() {
        assert_eq!(skip(0, &[0x96, 0x01, 0xAA]), Some(&[0xAA][..]));
        assert_eq!(skip(1, &[0; 9]), Some(&[0][..]));
        assert_eq!(skip(2, &[0x02, 0x01, 0x02, 0xAA]), Some(&[0xAA][..]));
        assert_eq!(skip(5, &[0; 5]), Some(&[0][..]));
        assert_eq!(skip(3, &[0x00]), None);
        assert_eq!(skip(1, &[0; 7]), None);
    }
}
