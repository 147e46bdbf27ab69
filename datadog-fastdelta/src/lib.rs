// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Matches up samples between two pprof profiles of the same target and
//! takes their difference. A sample is a unique (call stack, labels) pair
//! with an associated sequence of values; the same call stack can appear in
//! two samples when the labels differ.
//!
//! Merging the profiles through a general-purpose pprof object graph does
//! the same job, but at an extreme cost in allocations. This crate instead
//! streams the wire format through [`datadog_pproflite`] in six passes,
//! allocation-free once steady state is reached:
//!
//! 1. **Index**: map location IDs to instruction addresses, hash the string
//!    table, and record the declared sample types.
//! 2. **Aggregate**: fold every sample's values into its identity's
//!    running aggregate, so duplicate samples sum instead of overwrite.
//! 3. **Merge**: compute each sample's delta against the previous call,
//!    write out the survivors, and mark the locations and label strings
//!    they reference.
//! 4. **Write records**: re-emit the non-sample fields, dropping locations
//!    no surviving sample references and collecting the function IDs and
//!    strings the survivors need.
//! 5. **Write functions**: emit only the referenced functions.
//! 6. **Write strings**: emit the string table in position order, with a
//!    zero-length placeholder for every unreferenced entry so the
//!    positional index references stay valid.
//!
//! Fewer passes are possible, but each pass is cheap and re-scanning the
//! input keeps peak memory low.

mod delta_map;
mod hasher;
mod location_index;
mod set;
mod string_table;

use datadog_pproflite::{
    DecodeError, Decoder, Encoder, Field, FieldFilter, FieldKind, Sample,
};
use delta_map::DeltaMap;
use hasher::content_hash;
use location_index::LocationIndex;
use set::{DenseIntSet, SparseIntSet};
use std::io::{self, Write};
use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use string_table::StringTable;
use tracing::{debug, warn};

pub use delta_map::{MAX_DELTA_VALUES, MAX_SAMPLE_VALUES};

/// Name and unit of a sample value type whose values are cumulative
/// counters to be diffed, e.g. `("alloc_space", "bytes")`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValueType {
    pub r#type: String,
    pub unit: String,
}

impl ValueType {
    pub fn new(r#type: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            r#type: r#type.into(),
            unit: unit.into(),
        }
    }
}

/// Errors surfaced by [`DeltaComputer::delta`]. Any error poisons the
/// computer; see [`DeltaError::Recovered`] for what happens next.
#[derive(Debug, thiserror::Error)]
pub enum DeltaError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// The output sink failed mid-write.
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("invalid string index {0}")]
    InvalidStringIndex(i64),
    #[error("unknown location id {0}")]
    UnknownLocation(u64),
    #[error("profile declares {0} sample types, at most 4 are supported")]
    TooManySampleTypes(usize),
    #[error("{0} configured value types match the profile, at most 2 may")]
    TooManyDeltaValues(usize),
    #[error("sample has {got} values, profile declares {declared} sample types")]
    ValueCountMismatch { got: usize, declared: usize },
    /// A sample seen in the merge pass was never aggregated, which the
    /// aggregate pass should have guaranteed.
    #[error("sample hash not found during merge pass")]
    UnknownSample,
    /// A panic escaped a pass and was converted at the outer boundary.
    #[error("internal panic during delta computation")]
    Internal,
    /// The previous call failed, so this call discarded all cross-call
    /// state and treated its input as a fresh baseline. The output was
    /// written but must not be forwarded as a delta profile.
    #[error("recovering from a failed call; output is a baseline, not a delta")]
    Recovered,
}

/// Computes the difference between successive pprof-encoded profiles of
/// one profile series.
///
/// A computer is single-threaded and stateful: one instance per series,
/// calls never overlapping. Parallelism across series is one computer per
/// series, no locking needed. All internal tables reuse their storage
/// across calls; only the delta-record table carries state between calls.
#[derive(Debug)]
pub struct DeltaComputer {
    /// Set when a call fails. The next call starts from scratch.
    poisoned: bool,
    decoder: Decoder,
    delta_map: DeltaMap,
    strings: StringTable,
    location_index: LocationIndex,
    included_functions: SparseIntSet,
    included_strings: DenseIntSet,
    /// TimeNanos of the most recent input. None before the first call.
    prev_time_nanos: Option<i64>,
}

const INDEX_FIELDS: FieldFilter = FieldFilter::of(&[
    FieldKind::SampleType,
    FieldKind::Location,
    FieldKind::StringTable,
]);

const SAMPLE_FIELDS: FieldFilter = FieldFilter::of(&[FieldKind::Sample]);

const RECORD_FIELDS: FieldFilter = FieldFilter::of(&[
    FieldKind::SampleType,
    FieldKind::Mapping,
    FieldKind::LocationFast,
    FieldKind::DropFrames,
    FieldKind::KeepFrames,
    FieldKind::TimeNanos,
    FieldKind::DurationNanos,
    FieldKind::PeriodType,
    FieldKind::Period,
    FieldKind::Comment,
    FieldKind::DefaultSampleType,
]);

const FUNCTION_FIELDS: FieldFilter = FieldFilter::of(&[FieldKind::Function]);

const STRING_FIELDS: FieldFilter = FieldFilter::of(&[FieldKind::StringTable]);

impl DeltaComputer {
    /// Creates a computer that diffs the values of sample types matching
    /// the given fields. Zero fields is valid and degenerates to pruning
    /// without any value transformation.
    pub fn new(fields: &[ValueType]) -> Self {
        let config = fields
            .iter()
            .map(|field| {
                (
                    content_hash(field.r#type.as_bytes()),
                    content_hash(field.unit.as_bytes()),
                )
            })
            .collect();
        Self {
            poisoned: false,
            decoder: Decoder::new(),
            delta_map: DeltaMap::new(config),
            strings: StringTable::default(),
            location_index: LocationIndex::default(),
            included_functions: SparseIntSet::default(),
            included_strings: DenseIntSet::default(),
            prev_time_nanos: None,
        }
    }

    /// Calculates the difference between the pprof-encoded profile `input`
    /// and the profile passed to the previous call, writing the encoded
    /// delta profile to `out`.
    ///
    /// The first call has nothing to diff against and writes the profile
    /// through unchanged (modulo pruning of unreferenced strings).
    ///
    /// On any error the output must not be treated as a valid delta
    /// profile, and the computer resets itself on the next call; see
    /// [`DeltaError::Recovered`].
    pub fn delta<W: Write>(&mut self, input: &[u8], out: &mut W) -> Result<(), DeltaError> {
        if let Err(error) = self.guarded_run(input, out) {
            self.poisoned = true;
            return Err(error);
        }
        if self.poisoned {
            self.poisoned = false;
            debug!("recovered from a failed call; this output is a fresh baseline");
            return Err(DeltaError::Recovered);
        }
        Ok(())
    }

    /// The one place a panic may be caught: anything escaping the passes
    /// becomes an error so the poisoning protocol sees it like any other
    /// failure.
    fn guarded_run<W: Write>(&mut self, input: &[u8], out: &mut W) -> Result<(), DeltaError> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.run(input, out))) {
            Ok(result) => result,
            Err(_) => {
                warn!("panic during delta computation");
                Err(DeltaError::Internal)
            }
        }
    }

    fn run<W: Write>(&mut self, input: &[u8], out: &mut W) -> Result<(), DeltaError> {
        if self.poisoned {
            // the failed call may have left the cross-call state
            // half-updated; drop it and treat this input as a baseline
            self.delta_map.clear();
            self.prev_time_nanos = None;
        }
        self.strings.reset();
        self.location_index.reset();
        self.included_functions.clear();
        self.included_strings.clear();
        self.delta_map.reset();

        let mut encoder = Encoder::new(out);
        self.pass1_index(input)?;
        self.pass2_aggregate_samples(input)?;
        self.pass3_merge_samples(input, &mut encoder)?;
        self.pass4_write_and_prune_records(input, &mut encoder)?;
        self.pass5_write_functions(input, &mut encoder)?;
        self.pass6_write_string_table(input, &mut encoder)
    }

    fn pass1_index(&mut self, input: &[u8]) -> Result<(), DeltaError> {
        let Self {
            decoder,
            delta_map,
            strings,
            location_index,
            included_strings,
            ..
        } = self;
        decoder.field_each(input, INDEX_FIELDS, |field| {
            match field {
                Field::SampleType(value_type) => delta_map.add_sample_type(value_type)?,
                Field::Location(location) => location_index.insert(location.id, location.address),
                Field::StringTable(string) => {
                    strings.add(string.bytes);
                    // index 0 is the empty string and always included;
                    // everything else is excluded until a surviving sample
                    // or record references it
                    included_strings.append(strings.len() == 1);
                }
                _ => {}
            }
            Ok(ControlFlow::Continue(()))
        })
    }

    fn pass2_aggregate_samples(&mut self, input: &[u8]) -> Result<(), DeltaError> {
        let Self {
            decoder,
            delta_map,
            strings,
            location_index,
            ..
        } = self;
        decoder.field_each(input, SAMPLE_FIELDS, |field| {
            let Field::Sample(sample) = field else {
                return Ok(ControlFlow::Continue(()));
            };
            validate_label_strings(sample, strings)?;
            delta_map.update_sample(sample, strings, location_index)?;
            Ok(ControlFlow::Continue(()))
        })
    }

    /// The only pass that writes Sample records, and the only place
    /// pruning decisions about samples are made.
    fn pass3_merge_samples<W: Write>(
        &mut self,
        input: &[u8],
        encoder: &mut Encoder<W>,
    ) -> Result<(), DeltaError> {
        let Self {
            decoder,
            delta_map,
            strings,
            location_index,
            included_strings,
            ..
        } = self;
        decoder.field_each(input, SAMPLE_FIELDS, |field| {
            let Field::Sample(sample) = field else {
                return Ok(ControlFlow::Continue(()));
            };
            validate_label_strings(sample, strings)?;
            if !delta_map.delta(sample, strings, location_index)? {
                // zero-delta samples carry no information
                return Ok(ControlFlow::Continue(()));
            }
            for &location_id in &sample.location_ids {
                location_index.mark_included(location_id);
            }
            for label in &sample.labels {
                included_strings.add(label.key);
                included_strings.add(label.str);
                included_strings.add(label.num_unit);
            }
            encoder.encode(&Field::Sample(sample))?;
            Ok(ControlFlow::Continue(()))
        })
    }

    fn pass4_write_and_prune_records<W: Write>(
        &mut self,
        input: &[u8],
        encoder: &mut Encoder<W>,
    ) -> Result<(), DeltaError> {
        let first_profile = self.prev_time_nanos.is_none();
        let Self {
            decoder,
            location_index,
            included_functions,
            included_strings,
            prev_time_nanos,
            ..
        } = self;
        decoder.field_each(input, RECORD_FIELDS, |field| {
            match field {
                Field::SampleType(value_type) => {
                    included_strings.add(value_type.unit);
                    included_strings.add(value_type.r#type);
                    encoder.encode(&Field::SampleType(value_type))?;
                }
                Field::Mapping(mapping) => {
                    included_strings.add(mapping.filename);
                    included_strings.add(mapping.build_id);
                    encoder.encode(&Field::Mapping(mapping))?;
                }
                Field::LocationFast(location) => {
                    if location_index.is_included(location.id) {
                        for &function_id in location.function_ids {
                            included_functions.add(function_id);
                        }
                        encoder.encode(&Field::LocationFast(location))?;
                    }
                }
                Field::DropFrames(value) => {
                    included_strings.add(value);
                    encoder.encode(&Field::DropFrames(value))?;
                }
                Field::KeepFrames(value) => {
                    included_strings.add(value);
                    encoder.encode(&Field::KeepFrames(value))?;
                }
                Field::TimeNanos(value) => {
                    encoder.encode(&Field::TimeNanos(value))?;
                    if let Some(prev) = *prev_time_nanos {
                        // the input's DurationNanos gets discarded; the
                        // real duration is the time since the last input
                        encoder.encode(&Field::DurationNanos(value - prev))?;
                    }
                    *prev_time_nanos = Some(value);
                }
                Field::DurationNanos(value) => {
                    if first_profile {
                        encoder.encode(&Field::DurationNanos(value))?;
                    }
                }
                Field::PeriodType(value_type) => {
                    included_strings.add(value_type.unit);
                    included_strings.add(value_type.r#type);
                    encoder.encode(&Field::PeriodType(value_type))?;
                }
                Field::Period(value) => encoder.encode(&Field::Period(value))?,
                Field::Comment(value) => {
                    included_strings.add(value);
                    encoder.encode(&Field::Comment(value))?;
                }
                Field::DefaultSampleType(value) => {
                    included_strings.add(value);
                    encoder.encode(&Field::DefaultSampleType(value))?;
                }
                _ => {}
            }
            Ok(ControlFlow::Continue(()))
        })
    }

    fn pass5_write_functions<W: Write>(
        &mut self,
        input: &[u8],
        encoder: &mut Encoder<W>,
    ) -> Result<(), DeltaError> {
        let Self {
            decoder,
            included_functions,
            included_strings,
            ..
        } = self;
        decoder.field_each(input, FUNCTION_FIELDS, |field| {
            let Field::Function(function) = field else {
                return Ok(ControlFlow::Continue(()));
            };
            if included_functions.contains(function.id) {
                included_strings.add(function.name);
                included_strings.add(function.system_name);
                included_strings.add(function.filename);
                encoder.encode(&Field::Function(function))?;
            }
            Ok(ControlFlow::Continue(()))
        })
    }

    fn pass6_write_string_table<W: Write>(
        &mut self,
        input: &[u8],
        encoder: &mut Encoder<W>,
    ) -> Result<(), DeltaError> {
        let Self {
            decoder,
            included_strings,
            ..
        } = self;
        let mut index = 0usize;
        decoder.field_each(input, STRING_FIELDS, |field| {
            let Field::StringTable(mut string) = field else {
                return Ok(ControlFlow::Continue(()));
            };
            if !included_strings.contains(index) {
                // a zero-length placeholder keeps every later position's
                // index references intact while dropping the bytes
                string.bytes = &[];
            }
            index += 1;
            encoder.encode(&Field::StringTable(string))?;
            Ok(ControlFlow::Continue(()))
        })
    }
}

fn validate_label_strings(sample: &Sample, strings: &StringTable) -> Result<(), DeltaError> {
    for label in &sample.labels {
        for index in [label.key, label.str, label.num_unit] {
            if strings.get(index).is_none() {
                return Err(DeltaError::InvalidStringIndex(index));
            }
        }
    }
    Ok(())
}
