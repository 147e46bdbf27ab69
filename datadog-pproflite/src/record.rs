// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reusable records for the top-level fields of a pprof Profile message.
//!
//! Message records own growable buffers that get truncated, not freed, when
//! the record is reused, so decoding a profile allocates nothing once the
//! buffers have grown to their steady-state sizes.

use crate::wire::{
    decode_len_delimited, decode_tag, decode_varint, encode_bool, encode_int, encode_message,
    encode_packed, encode_uint, expect_len_delimited, skip, bool_len, int_len, message_len,
    packed_len, uint_len, DecodeError, Value, WireType,
};
use std::io::{self, Write};

/// Profile.sample_type (field 1) and Profile.period_type (field 11) both
/// carry this record. The fields are indices into the string table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ValueType {
    pub r#type: i64,
    pub unit: i64,
}

impl ValueType {
    pub(crate) fn decode(
        &mut self,
        mut payload: &[u8],
        name: &'static str,
    ) -> Result<(), DecodeError> {
        *self = Self::default();
        while !payload.is_empty() {
            let (field, wire_type, rest) =
                decode_tag(payload).ok_or(DecodeError::Varint { field: name })?;
            payload = rest;
            match field {
                1 => (self.r#type, payload) = decode_int(wire_type, payload, name)?,
                2 => (self.unit, payload) = decode_int(wire_type, payload, name)?,
                _ => payload = skip(wire_type, payload).ok_or(DecodeError::Truncated { field: name })?,
            }
        }
        Ok(())
    }
}

impl Value for ValueType {
    const WIRE_TYPE: WireType = WireType::LengthDelimited;

    fn proto_len(&self) -> u64 {
        int_len(1, self.r#type) + int_len(2, self.unit)
    }

    fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        encode_int(1, self.r#type, writer)?;
        encode_int(2, self.unit, writer)
    }
}

/// Profile.sample (field 2).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sample {
    pub location_ids: Vec<u64>,
    pub values: Vec<i64>,
    pub labels: Vec<Label>,
}

impl Sample {
    pub(crate) fn decode(&mut self, mut payload: &[u8]) -> Result<(), DecodeError> {
        self.location_ids.clear();
        self.values.clear();
        self.labels.clear();
        while !payload.is_empty() {
            let (field, wire_type, rest) =
                decode_tag(payload).ok_or(DecodeError::Varint { field: "sample" })?;
            payload = rest;
            match field {
                1 => {
                    payload = decode_repeated_uint(
                        wire_type,
                        payload,
                        &mut self.location_ids,
                        "sample.location_id",
                    )?
                }
                2 => {
                    payload = decode_repeated_int(
                        wire_type,
                        payload,
                        &mut self.values,
                        "sample.value",
                    )?
                }
                3 => {
                    let (label, rest) = expect_len_delimited(wire_type, payload, "sample.label")?;
                    payload = rest;
                    let mut record = Label::default();
                    record.decode(label)?;
                    self.labels.push(record);
                }
                _ => {
                    payload =
                        skip(wire_type, payload).ok_or(DecodeError::Truncated { field: "sample" })?
                }
            }
        }
        Ok(())
    }
}

impl Value for Sample {
    const WIRE_TYPE: WireType = WireType::LengthDelimited;

    fn proto_len(&self) -> u64 {
        packed_len(1, &self.location_ids)
            + packed_len(2, &self.values)
            + self
                .labels
                .iter()
                .map(|label| message_len(3, label))
                .sum::<u64>()
    }

    fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        encode_packed(1, &self.location_ids, writer)?;
        encode_packed(2, &self.values, writer)?;
        for label in &self.labels {
            encode_message(3, label, writer)?;
        }
        Ok(())
    }
}

/// Sample.label. The key, str, and num_unit fields are indices into the
/// string table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Label {
    pub key: i64,
    pub str: i64,
    pub num: i64,
    pub num_unit: i64,
}

impl Label {
    fn decode(&mut self, mut payload: &[u8]) -> Result<(), DecodeError> {
        while !payload.is_empty() {
            let (field, wire_type, rest) =
                decode_tag(payload).ok_or(DecodeError::Varint { field: "sample.label" })?;
            payload = rest;
            match field {
                1 => (self.key, payload) = decode_int(wire_type, payload, "sample.label")?,
                2 => (self.str, payload) = decode_int(wire_type, payload, "sample.label")?,
                3 => (self.num, payload) = decode_int(wire_type, payload, "sample.label")?,
                4 => (self.num_unit, payload) = decode_int(wire_type, payload, "sample.label")?,
                _ => {
                    payload = skip(wire_type, payload)
                        .ok_or(DecodeError::Truncated { field: "sample.label" })?
                }
            }
        }
        Ok(())
    }
}

impl Value for Label {
    const WIRE_TYPE: WireType = WireType::LengthDelimited;

    fn proto_len(&self) -> u64 {
        int_len(1, self.key) + int_len(2, self.str) + int_len(3, self.num) + int_len(4, self.num_unit)
    }

    fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        encode_int(1, self.key, writer)?;
        encode_int(2, self.str, writer)?;
        encode_int(3, self.num, writer)?;
        encode_int(4, self.num_unit, writer)
    }
}

/// Profile.mapping (field 3). The filename and build_id fields are indices
/// into the string table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Mapping {
    pub id: u64,
    pub memory_start: u64,
    pub memory_limit: u64,
    pub file_offset: u64,
    pub filename: i64,
    pub build_id: i64,
    pub has_functions: bool,
    pub has_filenames: bool,
    pub has_line_numbers: bool,
    pub has_inline_frames: bool,
}

impl Mapping {
    pub(crate) fn decode(&mut self, mut payload: &[u8]) -> Result<(), DecodeError> {
        *self = Self::default();
        while !payload.is_empty() {
            let (field, wire_type, rest) =
                decode_tag(payload).ok_or(DecodeError::Varint { field: "mapping" })?;
            payload = rest;
            match field {
                1 => (self.id, payload) = decode_uint(wire_type, payload, "mapping")?,
                2 => (self.memory_start, payload) = decode_uint(wire_type, payload, "mapping")?,
                3 => (self.memory_limit, payload) = decode_uint(wire_type, payload, "mapping")?,
                4 => (self.file_offset, payload) = decode_uint(wire_type, payload, "mapping")?,
                5 => (self.filename, payload) = decode_int(wire_type, payload, "mapping")?,
                6 => (self.build_id, payload) = decode_int(wire_type, payload, "mapping")?,
                7 => (self.has_functions, payload) = decode_bool(wire_type, payload, "mapping")?,
                8 => (self.has_filenames, payload) = decode_bool(wire_type, payload, "mapping")?,
                9 => (self.has_line_numbers, payload) = decode_bool(wire_type, payload, "mapping")?,
                10 => {
                    (self.has_inline_frames, payload) = decode_bool(wire_type, payload, "mapping")?
                }
                _ => {
                    payload =
                        skip(wire_type, payload).ok_or(DecodeError::Truncated { field: "mapping" })?
                }
            }
        }
        Ok(())
    }
}

impl Value for Mapping {
    const WIRE_TYPE: WireType = WireType::LengthDelimited;

    fn proto_len(&self) -> u64 {
        uint_len(1, self.id)
            + uint_len(2, self.memory_start)
            + uint_len(3, self.memory_limit)
            + uint_len(4, self.file_offset)
            + int_len(5, self.filename)
            + int_len(6, self.build_id)
            + bool_len(7, self.has_functions)
            + bool_len(8, self.has_filenames)
            + bool_len(9, self.has_line_numbers)
            + bool_len(10, self.has_inline_frames)
    }

    fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        encode_uint(1, self.id, writer)?;
        encode_uint(2, self.memory_start, writer)?;
        encode_uint(3, self.memory_limit, writer)?;
        encode_uint(4, self.file_offset, writer)?;
        encode_int(5, self.filename, writer)?;
        encode_int(6, self.build_id, writer)?;
        encode_bool(7, self.has_functions, writer)?;
        encode_bool(8, self.has_filenames, writer)?;
        encode_bool(9, self.has_line_numbers, writer)?;
        encode_bool(10, self.has_inline_frames, writer)
    }
}

/// Location.line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Line {
    pub function_id: u64,
    pub line: i64,
}

impl Line {
    fn decode(&mut self, mut payload: &[u8]) -> Result<(), DecodeError> {
        while !payload.is_empty() {
            let (field, wire_type, rest) =
                decode_tag(payload).ok_or(DecodeError::Varint { field: "location.line" })?;
            payload = rest;
            match field {
                1 => (self.function_id, payload) = decode_uint(wire_type, payload, "location.line")?,
                2 => (self.line, payload) = decode_int(wire_type, payload, "location.line")?,
                _ => {
                    payload = skip(wire_type, payload)
                        .ok_or(DecodeError::Truncated { field: "location.line" })?
                }
            }
        }
        Ok(())
    }
}

impl Value for Line {
    const WIRE_TYPE: WireType = WireType::LengthDelimited;

    fn proto_len(&self) -> u64 {
        uint_len(1, self.function_id) + int_len(2, self.line)
    }

    fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        encode_uint(1, self.function_id, writer)?;
        encode_int(2, self.line, writer)
    }
}

/// Profile.location (field 4), fully parsed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Location {
    pub id: u64,
    pub mapping_id: u64,
    pub address: u64,
    pub lines: Vec<Line>,
    pub is_folded: bool,
}

impl Location {
    pub(crate) fn decode(&mut self, mut payload: &[u8]) -> Result<(), DecodeError> {
        self.id = 0;
        self.mapping_id = 0;
        self.address = 0;
        self.lines.clear();
        self.is_folded = false;
        while !payload.is_empty() {
            let (field, wire_type, rest) =
                decode_tag(payload).ok_or(DecodeError::Varint { field: "location" })?;
            payload = rest;
            match field {
                1 => (self.id, payload) = decode_uint(wire_type, payload, "location")?,
                2 => (self.mapping_id, payload) = decode_uint(wire_type, payload, "location")?,
                3 => (self.address, payload) = decode_uint(wire_type, payload, "location")?,
                4 => {
                    let (line, rest) = expect_len_delimited(wire_type, payload, "location.line")?;
                    payload = rest;
                    let mut record = Line::default();
                    record.decode(line)?;
                    self.lines.push(record);
                }
                5 => (self.is_folded, payload) = decode_bool(wire_type, payload, "location")?,
                _ => {
                    payload =
                        skip(wire_type, payload).ok_or(DecodeError::Truncated { field: "location" })?
                }
            }
        }
        Ok(())
    }
}

impl Value for Location {
    const WIRE_TYPE: WireType = WireType::LengthDelimited;

    fn proto_len(&self) -> u64 {
        uint_len(1, self.id)
            + uint_len(2, self.mapping_id)
            + uint_len(3, self.address)
            + self.lines.iter().map(|line| message_len(4, line)).sum::<u64>()
            + bool_len(5, self.is_folded)
    }

    fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        encode_uint(1, self.id, writer)?;
        encode_uint(2, self.mapping_id, writer)?;
        encode_uint(3, self.address, writer)?;
        for line in &self.lines {
            encode_message(4, line, writer)?;
        }
        encode_bool(5, self.is_folded, writer)
    }
}

/// Profile.location (field 4), fast variant. Only the location id and the
/// function ids of its lines are parsed; the raw payload is kept so the
/// record can be re-emitted verbatim without re-encoding.
#[derive(Clone, Copy, Debug)]
pub struct LocationFast<'a> {
    pub id: u64,
    pub function_ids: &'a [u64],
    pub data: &'a [u8],
}

/// Parses the id and function ids out of a location payload. Everything else
/// is left encoded in the payload bytes.
pub(crate) fn decode_location_fast(
    mut payload: &[u8],
    function_ids: &mut Vec<u64>,
) -> Result<u64, DecodeError> {
    function_ids.clear();
    let mut id = 0;
    while !payload.is_empty() {
        let (field, wire_type, rest) =
            decode_tag(payload).ok_or(DecodeError::Varint { field: "location" })?;
        payload = rest;
        match field {
            1 => (id, payload) = decode_uint(wire_type, payload, "location")?,
            4 => {
                let (mut line, rest) = expect_len_delimited(wire_type, payload, "location.line")?;
                payload = rest;
                while !line.is_empty() {
                    let (field, wire_type, rest) =
                        decode_tag(line).ok_or(DecodeError::Varint { field: "location.line" })?;
                    line = rest;
                    if field == 1 {
                        let function_id;
                        (function_id, line) = decode_uint(wire_type, line, "location.line")?;
                        function_ids.push(function_id);
                    } else {
                        line = skip(wire_type, line)
                            .ok_or(DecodeError::Truncated { field: "location.line" })?;
                    }
                }
            }
            _ => {
                payload =
                    skip(wire_type, payload).ok_or(DecodeError::Truncated { field: "location" })?
            }
        }
    }
    Ok(id)
}

/// Profile.function (field 5). The name, system_name, and filename fields
/// are indices into the string table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Function {
    pub id: u64,
    pub name: i64,
    pub system_name: i64,
    pub filename: i64,
    pub start_line: i64,
}

impl Function {
    pub(crate) fn decode(&mut self, mut payload: &[u8]) -> Result<(), DecodeError> {
        *self = Self::default();
        while !payload.is_empty() {
            let (field, wire_type, rest) =
                decode_tag(payload).ok_or(DecodeError::Varint { field: "function" })?;
            payload = rest;
            match field {
                1 => (self.id, payload) = decode_uint(wire_type, payload, "function")?,
                2 => (self.name, payload) = decode_int(wire_type, payload, "function")?,
                3 => (self.system_name, payload) = decode_int(wire_type, payload, "function")?,
                4 => (self.filename, payload) = decode_int(wire_type, payload, "function")?,
                5 => (self.start_line, payload) = decode_int(wire_type, payload, "function")?,
                _ => {
                    payload =
                        skip(wire_type, payload).ok_or(DecodeError::Truncated { field: "function" })?
                }
            }
        }
        Ok(())
    }
}

impl Value for Function {
    const WIRE_TYPE: WireType = WireType::LengthDelimited;

    fn proto_len(&self) -> u64 {
        uint_len(1, self.id)
            + int_len(2, self.name)
            + int_len(3, self.system_name)
            + int_len(4, self.filename)
            + int_len(5, self.start_line)
    }

    fn encode<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        encode_uint(1, self.id, writer)?;
        encode_int(2, self.name, writer)?;
        encode_int(3, self.system_name, writer)?;
        encode_int(4, self.filename, writer)?;
        encode_int(5, self.start_line, writer)
    }
}

/// Profile.string_table (field 6). Positional: the n-th occurrence in the
/// message is string index n. The content is borrowed from the input buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StringTable<'a> {
    pub bytes: &'a [u8],
}

fn decode_uint<'a>(
    wire_type: u8,
    input: &'a [u8],
    field: &'static str,
) -> Result<(u64, &'a [u8]), DecodeError> {
    if wire_type != WireType::Varint as u8 {
        return Err(DecodeError::WireType { field, wire_type });
    }
    decode_varint(input).ok_or(DecodeError::Varint { field })
}

fn decode_int<'a>(
    wire_type: u8,
    input: &'a [u8],
    field: &'static str,
) -> Result<(i64, &'a [u8]), DecodeError> {
    let (value, rest) = decode_uint(wire_type, input, field)?;
    Ok((value as i64, rest))
}

fn decode_bool<'a>(
    wire_type: u8,
    input: &'a [u8],
    field: &'static str,
) -> Result<(bool, &'a [u8]), DecodeError> {
    let (value, rest) = decode_uint(wire_type, input, field)?;
    Ok((value != 0, rest))
}

/// Decodes a repeated uint64 sub-field, accepting both the packed and the
/// one-value-per-tag encodings.
fn decode_repeated_uint<'a>(
    wire_type: u8,
    input: &'a [u8],
    out: &mut Vec<u64>,
    field: &'static str,
) -> Result<&'a [u8], DecodeError> {
    match wire_type {
        0 => {
            let (value, rest) = decode_varint(input).ok_or(DecodeError::Varint { field })?;
            out.push(value);
            Ok(rest)
        }
        2 => {
            let (mut payload, rest) =
                decode_len_delimited(input).ok_or(DecodeError::Truncated { field })?;
            while !payload.is_empty() {
                let (value, next) = decode_varint(payload).ok_or(DecodeError::Varint { field })?;
                payload = next;
                out.push(value);
            }
            Ok(rest)
        }
        _ => Err(DecodeError::WireType { field, wire_type }),
    }
}

fn decode_repeated_int<'a>(
    wire_type: u8,
    input: &'a [u8],
    out: &mut Vec<i64>,
    field: &'static str,
) -> Result<&'a [u8], DecodeError> {
    match wire_type {
        0 => {
            let (value, rest) = decode_varint(input).ok_or(DecodeError::Varint { field })?;
            out.push(value as i64);
            Ok(rest)
        }
        2 => {
            let (mut payload, rest) =
                decode_len_delimited(input).ok_or(DecodeError::Truncated { field })?;
            while !payload.is_empty() {
                let (value, next) = decode_varint(payload).ok_or(DecodeError::Varint { field })?;
                payload = next;
                out.push(value as i64);
            }
            Ok(rest)
        }
        _ => Err(DecodeError::WireType { field, wire_type }),
    }
}
