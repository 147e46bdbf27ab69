// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::decoder::Field;
use crate::wire::{encode_message, encode_raw, encode_scalar};
use std::io::{self, Write};

/// Serializes [`Field`] records back to the pprof wire format.
///
/// Message records are measured and written as tag, length, payload.
/// Scalars become tagged varints. [`Field::LocationFast`] and
/// [`Field::StringTable`] re-emit their raw payload bytes verbatim.
///
/// Serialization often happens one byte at a time, so a buffered writer
/// should probably be used.
#[derive(Debug)]
pub struct Encoder<W> {
    writer: W,
}

impl<W: Write> Encoder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes one field. A sink failure propagates unchanged.
    pub fn encode(&mut self, field: &Field<'_>) -> io::Result<()> {
        let w = &mut self.writer;
        match field {
            Field::SampleType(value_type) => encode_message(1, &**value_type, w),
            Field::Sample(sample) => encode_message(2, &**sample, w),
            Field::Mapping(mapping) => encode_message(3, &**mapping, w),
            Field::Location(location) => encode_message(4, &**location, w),
            Field::LocationFast(location) => encode_raw(4, location.data, w),
            Field::Function(function) => encode_message(5, &**function, w),
            Field::StringTable(string) => encode_raw(6, string.bytes, w),
            Field::DropFrames(value) => encode_scalar(7, *value, w),
            Field::KeepFrames(value) => encode_scalar(8, *value, w),
            Field::TimeNanos(value) => encode_scalar(9, *value, w),
            Field::DurationNanos(value) => encode_scalar(10, *value, w),
            Field::PeriodType(value_type) => encode_message(11, &**value_type, w),
            Field::Period(value) => encode_scalar(12, *value, w),
            Field::Comment(value) => encode_scalar(13, *value, w),
            Field::DefaultSampleType(value) => encode_scalar(14, *value, w),
        }
    }

    /// Consumes the encoder and hands the sink back.
    pub fn into_inner(self) -> W {
        self.writer
    }
}
