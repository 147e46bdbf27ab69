// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Streaming pprof encoding and decoding.
//!
//! The [`Decoder`] scans one [`profile`] message and hands the caller a
//! reusable typed record per top-level field, restricted to the field kinds
//! selected by a [`FieldFilter`]. The [`Encoder`] serializes those records
//! back to the wire, reproducing an untouched profile byte for byte. Both
//! directions avoid per-field allocation in steady state: repeated
//! sub-fields land in record-owned buffers that are truncated, not freed, on
//! reuse.
//!
//! [`profile`]: https://github.com/google/pprof/blob/main/proto/profile.proto

mod decoder;
mod encoder;
mod record;
mod wire;

#[cfg(feature = "prost_impls")]
pub mod prost_impls;

pub use decoder::{Decoder, Field, FieldFilter, FieldKind};
pub use encoder::Encoder;
pub use record::{
    Function, Label, Line, Location, LocationFast, Mapping, Sample, StringTable, ValueType,
};
pub use wire::DecodeError;

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;
    use std::error::Error;
    use std::ops::ControlFlow;

    type TestResult = Result<ControlFlow<()>, Box<dyn Error>>;

    fn test_profile() -> prost_impls::Profile {
        prost_impls::Profile {
            sample_types: vec![
                prost_impls::ValueType { r#type: 1, unit: 2 },
                prost_impls::ValueType { r#type: 3, unit: 4 },
            ],
            samples: vec![
                prost_impls::Sample {
                    location_ids: vec![1, 2],
                    values: vec![10, 1000],
                    labels: vec![prost_impls::Label {
                        key: 7,
                        str: 8,
                        num: 0,
                        num_unit: 0,
                    }],
                },
                prost_impls::Sample {
                    location_ids: vec![2],
                    values: vec![3, 300],
                    labels: vec![],
                },
            ],
            mappings: vec![prost_impls::Mapping {
                id: 1,
                memory_start: 0x1000,
                memory_limit: 0x2000,
                file_offset: 0,
                filename: 9,
                build_id: 10,
                has_functions: true,
                ..Default::default()
            }],
            locations: vec![
                prost_impls::Location {
                    id: 1,
                    mapping_id: 1,
                    address: 0x1100,
                    lines: vec![prost_impls::Line {
                        function_id: 1,
                        line: 42,
                    }],
                    is_folded: false,
                },
                prost_impls::Location {
                    id: 2,
                    mapping_id: 1,
                    address: 0x1200,
                    lines: vec![
                        prost_impls::Line {
                            function_id: 1,
                            line: 7,
                        },
                        prost_impls::Line {
                            function_id: 2,
                            line: 21,
                        },
                    ],
                    is_folded: false,
                },
            ],
            functions: vec![
                prost_impls::Function {
                    id: 1,
                    name: 5,
                    system_name: 5,
                    filename: 6,
                    start_line: 1,
                },
                prost_impls::Function {
                    id: 2,
                    name: 6,
                    system_name: 6,
                    filename: 6,
                    start_line: 12,
                },
            ],
            string_table: [
                "", "alloc_objects", "count", "alloc_space", "bytes", "main", "main.go", "bucket",
                "1024", "/bin/test", "abc123",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            drop_frames: 0,
            keep_frames: 0,
            time_nanos: 1_000_000_001,
            duration_nanos: 10_000_000_000,
            period_type: Some(prost_impls::ValueType { r#type: 3, unit: 4 }),
            period: 512 * 1024,
            comment: vec![],
            default_sample_type: 1,
        }
    }

    fn recode(input: &[u8], filter: FieldFilter) -> Vec<u8> {
        let mut decoder = Decoder::new();
        let mut encoder = Encoder::new(Vec::new());
        decoder
            .field_each(input, filter, |field| -> TestResult {
                encoder.encode(&field)?;
                Ok(ControlFlow::Continue(()))
            })
            .unwrap();
        encoder.into_inner()
    }

    #[test]
    fn recode_is_byte_identical() {
        let input = test_profile().encode_to_vec();
        assert_eq!(input, recode(&input, FieldFilter::ALL));
    }

    #[test]
    fn recode_with_comments_is_equivalent() {
        let mut profile = test_profile();
        // prost packs repeated int64, the encoder re-emits one comment per
        // tag, so this round-trip is semantic rather than byte-identical
        profile.comment = vec![5, 6];
        let input = profile.encode_to_vec();
        let output = recode(&input, FieldFilter::ALL);
        assert_eq!(profile, prost_impls::Profile::decode(&output[..]).unwrap());
    }

    #[test]
    fn location_fast_is_verbatim() {
        let profile = test_profile();
        let input = profile.encode_to_vec();

        let mut locations_only = prost_impls::Profile::default();
        locations_only.locations = profile.locations.clone();
        let expected = locations_only.encode_to_vec();

        let filter = FieldFilter::of(&[FieldKind::LocationFast]);
        assert_eq!(expected, recode(&input, filter));
    }

    #[test]
    fn location_fast_parses_ids() {
        let input = test_profile().encode_to_vec();
        let mut seen = Vec::new();
        Decoder::new()
            .field_each(
                &input,
                FieldFilter::of(&[FieldKind::LocationFast]),
                |field| -> Result<ControlFlow<()>, DecodeError> {
                    if let Field::LocationFast(location) = field {
                        seen.push((location.id, location.function_ids.to_vec()));
                    }
                    Ok(ControlFlow::Continue(()))
                },
            )
            .unwrap();
        assert_eq!(seen, vec![(1, vec![1]), (2, vec![1, 2])]);
    }

    #[test]
    fn filter_restricts_field_kinds() {
        let input = test_profile().encode_to_vec();
        let mut samples = 0;
        Decoder::new()
            .field_each(
                &input,
                FieldFilter::of(&[FieldKind::Sample]),
                |field| -> Result<ControlFlow<()>, DecodeError> {
                    assert!(matches!(field, Field::Sample(_)));
                    samples += 1;
                    Ok(ControlFlow::Continue(()))
                },
            )
            .unwrap();
        assert_eq!(samples, 2);
    }

    #[test]
    fn visitor_stops_early() {
        let input = test_profile().encode_to_vec();
        let mut visited = 0;
        Decoder::new()
            .field_each(
                &input,
                FieldFilter::ALL,
                |_| -> Result<ControlFlow<()>, DecodeError> {
                    visited += 1;
                    Ok(ControlFlow::Break(()))
                },
            )
            .unwrap();
        assert_eq!(visited, 1);
    }

    #[test]
    fn unknown_fields_are_skipped() {
        let mut input = test_profile().encode_to_vec();
        // field 19, varint
        input.extend_from_slice(&[0x98, 0x01, 0x2A]);
        // field 20, length-delimited
        input.extend_from_slice(&[0xA2, 0x01, 0x03, 0x01, 0x02, 0x03]);
        // field 21, 64-bit
        input.extend_from_slice(&[0xA9, 0x01, 0, 0, 0, 0, 0, 0, 0, 0]);
        let profile = test_profile();
        let output = recode(&input, FieldFilter::ALL);
        assert_eq!(profile, prost_impls::Profile::decode(&output[..]).unwrap());
    }

    #[test]
    fn unpacked_repeated_integers_are_accepted() {
        // sample { location_id: 1, location_id: 2, value: 5 }, one varint
        // per tag instead of packed
        let input = [0x12, 0x06, 0x08, 0x01, 0x08, 0x02, 0x10, 0x05];
        let mut decoded = None;
        Decoder::new()
            .field_each(
                &input,
                FieldFilter::of(&[FieldKind::Sample]),
                |field| -> Result<ControlFlow<()>, DecodeError> {
                    if let Field::Sample(sample) = field {
                        decoded = Some(sample.clone());
                    }
                    Ok(ControlFlow::Continue(()))
                },
            )
            .unwrap();
        let sample = decoded.unwrap();
        assert_eq!(sample.location_ids, vec![1, 2]);
        assert_eq!(sample.values, vec![5]);
    }

    #[test]
    fn truncated_message_names_field() {
        // sample field claiming 4 payload bytes with only 1 present
        let input = [0x12, 0x04, 0x08];
        let err = Decoder::new()
            .field_each(
                &input,
                FieldFilter::ALL,
                |_| -> Result<ControlFlow<()>, DecodeError> { Ok(ControlFlow::Continue(())) },
            )
            .unwrap_err();
        assert_eq!(err, DecodeError::Truncated { field: "sample" });
    }

    #[test]
    fn malformed_varint_names_field() {
        // time_nanos cut off mid-varint
        let input = [0x48, 0x80];
        let err = Decoder::new()
            .field_each(
                &input,
                FieldFilter::ALL,
                |_| -> Result<ControlFlow<()>, DecodeError> { Ok(ControlFlow::Continue(())) },
            )
            .unwrap_err();
        assert_eq!(err, DecodeError::Varint { field: "time_nanos" });
    }

    #[test]
    fn visitor_error_aborts_scan() {
        let input = test_profile().encode_to_vec();
        let mut visited = 0;
        let err = Decoder::new()
            .field_each(&input, FieldFilter::ALL, |_| -> TestResult {
                visited += 1;
                Err("stop".into())
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "stop");
        assert_eq!(visited, 1);
    }

    #[test]
    fn sample_roundtrip() {
        bolero::check!()
            .with_type::<(Vec<u64>, Vec<i64>)>()
            .for_each(|(location_ids, values)| {
                let prost_sample = prost_impls::Sample {
                    location_ids: location_ids.clone(),
                    values: values.clone(),
                    labels: vec![],
                };
                let profile = prost_impls::Profile {
                    samples: vec![prost_sample],
                    ..Default::default()
                };
                let input = profile.encode_to_vec();
                assert_eq!(input, recode(&input, FieldFilter::ALL));
            });
    }
}
