// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::record::{
    decode_location_fast, Function, Location, LocationFast, Mapping, Sample, StringTable, ValueType,
};
use crate::wire::{decode_tag, decode_varint, expect_len_delimited, expect_varint, skip, DecodeError};
use std::ops::ControlFlow;

/// The top-level field kinds of a pprof Profile message.
///
/// [`Location`] and [`LocationFast`] both stand for field 4; they differ in
/// how much of the record gets parsed. A filter selects at most one of the
/// two.
///
/// [`Location`]: FieldKind::Location
/// [`LocationFast`]: FieldKind::LocationFast
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    SampleType,
    Sample,
    Mapping,
    Location,
    LocationFast,
    Function,
    StringTable,
    DropFrames,
    KeepFrames,
    TimeNanos,
    DurationNanos,
    PeriodType,
    Period,
    Comment,
    DefaultSampleType,
}

impl FieldKind {
    const fn tag(self) -> u32 {
        match self {
            FieldKind::SampleType => 1,
            FieldKind::Sample => 2,
            FieldKind::Mapping => 3,
            FieldKind::Location | FieldKind::LocationFast => 4,
            FieldKind::Function => 5,
            FieldKind::StringTable => 6,
            FieldKind::DropFrames => 7,
            FieldKind::KeepFrames => 8,
            FieldKind::TimeNanos => 9,
            FieldKind::DurationNanos => 10,
            FieldKind::PeriodType => 11,
            FieldKind::Period => 12,
            FieldKind::Comment => 13,
            FieldKind::DefaultSampleType => 14,
        }
    }
}

/// Selects which top-level fields a [`Decoder`] scan visits. Everything else
/// is skipped without being parsed.
#[derive(Clone, Copy, Debug)]
pub struct FieldFilter {
    mask: u16,
    fast_location: bool,
}

impl FieldFilter {
    /// Every field kind, with field 4 parsed as [`Location`](FieldKind::Location).
    pub const ALL: FieldFilter = FieldFilter {
        mask: 0x7FFE,
        fast_location: false,
    };

    /// A filter matching exactly the given kinds.
    pub const fn of(kinds: &[FieldKind]) -> FieldFilter {
        let mut mask = 0u16;
        let mut fast_location = false;
        let mut i = 0;
        while i < kinds.len() {
            mask |= 1 << kinds[i].tag();
            if matches!(kinds[i], FieldKind::LocationFast) {
                fast_location = true;
            }
            i += 1;
        }
        FieldFilter { mask, fast_location }
    }

    #[inline]
    fn wants(self, tag: u32) -> bool {
        tag <= 14 && self.mask & (1u16 << tag) != 0
    }
}

impl Default for FieldFilter {
    fn default() -> Self {
        Self::ALL
    }
}

/// One top-level field of a Profile message. Message variants borrow the
/// decoder's reusable records and stay valid only for the duration of one
/// visitor invocation.
#[derive(Debug)]
pub enum Field<'a> {
    SampleType(&'a mut ValueType),
    Sample(&'a mut Sample),
    Mapping(&'a mut Mapping),
    Location(&'a mut Location),
    LocationFast(LocationFast<'a>),
    Function(&'a mut Function),
    StringTable(StringTable<'a>),
    DropFrames(i64),
    KeepFrames(i64),
    TimeNanos(i64),
    DurationNanos(i64),
    PeriodType(&'a mut ValueType),
    Period(i64),
    Comment(i64),
    DefaultSampleType(i64),
}

/// Streaming pprof decoder.
///
/// Owns one reusable record per message field kind. Decoding overwrites the
/// records in place, so a scan over a profile does not allocate once the
/// record buffers have reached their steady-state capacity.
#[derive(Debug, Default)]
pub struct Decoder {
    sample_type: ValueType,
    sample: Sample,
    mapping: Mapping,
    location: Location,
    function_ids: Vec<u64>,
    function: Function,
    period_type: ValueType,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans `input` and invokes `visitor` once per top-level field matching
    /// `filter`, in input order. Unknown field numbers are skipped. The
    /// visitor stops the scan early by returning [`ControlFlow::Break`]; any
    /// error it returns aborts the scan and propagates.
    pub fn field_each<'buf, E, F>(
        &mut self,
        mut input: &'buf [u8],
        filter: FieldFilter,
        mut visitor: F,
    ) -> Result<(), E>
    where
        E: From<DecodeError>,
        F: FnMut(Field<'_>) -> Result<ControlFlow<()>, E>,
    {
        while !input.is_empty() {
            let (tag, wire_type, rest) =
                decode_tag(input).ok_or(DecodeError::Varint { field: "profile" })?;
            input = rest;
            if !filter.wants(tag) {
                input = skip(wire_type, input)
                    .ok_or(DecodeError::Truncated { field: "profile" })?;
                continue;
            }
            let flow = match tag {
                1 => {
                    let (payload, rest) =
                        expect_len_delimited(wire_type, input, "sample_type")?;
                    input = rest;
                    self.sample_type.decode(payload, "sample_type")?;
                    visitor(Field::SampleType(&mut self.sample_type))?
                }
                2 => {
                    let (payload, rest) = expect_len_delimited(wire_type, input, "sample")?;
                    input = rest;
                    self.sample.decode(payload)?;
                    visitor(Field::Sample(&mut self.sample))?
                }
                3 => {
                    let (payload, rest) = expect_len_delimited(wire_type, input, "mapping")?;
                    input = rest;
                    self.mapping.decode(payload)?;
                    visitor(Field::Mapping(&mut self.mapping))?
                }
                4 => {
                    let (payload, rest) = expect_len_delimited(wire_type, input, "location")?;
                    input = rest;
                    if filter.fast_location {
                        let id = decode_location_fast(payload, &mut self.function_ids)?;
                        visitor(Field::LocationFast(LocationFast {
                            id,
                            function_ids: &self.function_ids,
                            data: payload,
                        }))?
                    } else {
                        self.location.decode(payload)?;
                        visitor(Field::Location(&mut self.location))?
                    }
                }
                5 => {
                    let (payload, rest) = expect_len_delimited(wire_type, input, "function")?;
                    input = rest;
                    self.function.decode(payload)?;
                    visitor(Field::Function(&mut self.function))?
                }
                6 => {
                    let (bytes, rest) = expect_len_delimited(wire_type, input, "string_table")?;
                    input = rest;
                    visitor(Field::StringTable(StringTable { bytes }))?
                }
                11 => {
                    let (payload, rest) =
                        expect_len_delimited(wire_type, input, "period_type")?;
                    input = rest;
                    self.period_type.decode(payload, "period_type")?;
                    visitor(Field::PeriodType(&mut self.period_type))?
                }
                // comment is repeated, so it shows up packed from some
                // producers and one-value-per-tag from others
                13 if wire_type == 2 => {
                    let (mut payload, rest) =
                        expect_len_delimited(wire_type, input, "comment")?;
                    input = rest;
                    let mut flow = ControlFlow::Continue(());
                    while !payload.is_empty() {
                        let (value, next) =
                            decode_varint(payload).ok_or(DecodeError::Varint { field: "comment" })?;
                        payload = next;
                        flow = visitor(Field::Comment(value as i64))?;
                        if flow.is_break() {
                            break;
                        }
                    }
                    flow
                }
                7..=10 | 12..=14 => {
                    let name = scalar_field_name(tag);
                    let (value, rest) = expect_varint(wire_type, input, name)?;
                    input = rest;
                    let value = value as i64;
                    visitor(match tag {
                        7 => Field::DropFrames(value),
                        8 => Field::KeepFrames(value),
                        9 => Field::TimeNanos(value),
                        10 => Field::DurationNanos(value),
                        12 => Field::Period(value),
                        13 => Field::Comment(value),
                        _ => Field::DefaultSampleType(value),
                    })?
                }
                // wants() only passes tags 1..=14
                _ => ControlFlow::Continue(()),
            };
            if flow.is_break() {
                return Ok(());
            }
        }
        Ok(())
    }
}

fn scalar_field_name(tag: u32) -> &'static str {
    match tag {
        7 => "drop_frames",
        8 => "keep_frames",
        9 => "time_nanos",
        10 => "duration_nanos",
        12 => "period",
        13 => "comment",
        _ => "default_sample_type",
    }
}
