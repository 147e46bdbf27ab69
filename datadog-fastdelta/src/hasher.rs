// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::location_index::LocationIndex;
use crate::string_table::StringTable;
use crate::DeltaError;
use datadog_pproflite::{Label, Sample};
use highway::{HighwayHash, HighwayHasher, Key};

/// Fixed hashing key. The identity map is process-local and never
/// serialized, so the value just has to be stable within one process.
const HASH_KEY: Key = Key([
    0x9f0e_79b5_31d2_4e67,
    0x8a4b_02c6_55e1_9d38,
    0x5c67_a1d4_8e92_3f0b,
    0x1db5_44c8_96ea_207f,
]);

/// A 128-bit content or identity hash. Orderable so a sequence of label
/// hashes can be sorted bytewise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct Hash(pub(crate) [u8; 16]);

impl Hash {
    fn from_parts([low, high]: [u64; 2]) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&low.to_le_bytes());
        bytes[8..].copy_from_slice(&high.to_le_bytes());
        Self(bytes)
    }
}

/// Hashes the content of one byte string.
pub(crate) fn content_hash(bytes: &[u8]) -> Hash {
    let mut hasher = HighwayHasher::new(HASH_KEY);
    hasher.append(bytes);
    Hash::from_parts(hasher.finalize128())
}

/// Computes sample identity hashes. Owns the scratch buffer for label
/// hashes, so hashing a sample does not allocate in steady state.
#[derive(Debug, Default)]
pub(crate) struct SampleHasher {
    label_hashes: Vec<[u8; 16]>,
}

impl SampleHasher {
    /// The identity of a sample: each resolved location address as 8
    /// little-endian bytes, followed by the sorted label hashes. Sorting
    /// makes the identity independent of label encoding order; a single
    /// label needs no sort because no reordering can change it.
    pub fn sample_hash(
        &mut self,
        sample: &Sample,
        strings: &StringTable,
        locations: &LocationIndex,
    ) -> Result<Hash, DeltaError> {
        self.label_hashes.clear();
        for label in &sample.labels {
            self.label_hashes.push(label_hash(label, strings)?.0);
        }
        if self.label_hashes.len() > 1 {
            self.label_hashes.sort_unstable();
        }

        let mut hasher = HighwayHasher::new(HASH_KEY);
        for &location_id in &sample.location_ids {
            let address = locations
                .get(location_id)
                .ok_or(DeltaError::UnknownLocation(location_id))?;
            hasher.append(&address.to_le_bytes());
        }
        for label_hash in &self.label_hashes {
            hasher.append(label_hash);
        }
        Ok(Hash::from_parts(hasher.finalize128()))
    }
}

/// The hash of one label: key hash, numeric-unit hash, big-endian numeric
/// value, string-value hash. The string contents are only retained as
/// hashes, so those stand in for the bytes.
fn label_hash(label: &Label, strings: &StringTable) -> Result<Hash, DeltaError> {
    let key = strings
        .get(label.key)
        .ok_or(DeltaError::InvalidStringIndex(label.key))?;
    let num_unit = strings
        .get(label.num_unit)
        .ok_or(DeltaError::InvalidStringIndex(label.num_unit))?;
    let str_value = strings
        .get(label.str)
        .ok_or(DeltaError::InvalidStringIndex(label.str))?;

    let mut hasher = HighwayHasher::new(HASH_KEY);
    hasher.append(&key.0);
    hasher.append(&num_unit.0);
    hasher.append(&label.num.to_be_bytes());
    hasher.append(&str_value.0);
    Ok(Hash::from_parts(hasher.finalize128()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> (StringTable, LocationIndex) {
        let mut strings = StringTable::default();
        for s in ["", "region", "us-east-1", "bytes", "size"] {
            strings.add(s.as_bytes());
        }
        let mut locations = LocationIndex::default();
        locations.insert(1, 0x1000);
        locations.insert(2, 0x2000);
        (strings, locations)
    }

    #[test]
    fn label_order_does_not_change_identity() {
        let (strings, locations) = scratch();
        let a = Label {
            key: 1,
            str: 2,
            num: 0,
            num_unit: 0,
        };
        let b = Label {
            key: 4,
            str: 0,
            num: 512,
            num_unit: 3,
        };
        let mut sample = Sample {
            location_ids: vec![1, 2],
            values: vec![1],
            labels: vec![a, b],
        };

        let mut hasher = SampleHasher::default();
        let forward = hasher.sample_hash(&sample, &strings, &locations).unwrap();
        sample.labels.reverse();
        let backward = hasher.sample_hash(&sample, &strings, &locations).unwrap();
        assert_eq!(forward, backward);
    }

    #[test]
    fn location_order_changes_identity() {
        let (strings, locations) = scratch();
        let mut sample = Sample {
            location_ids: vec![1, 2],
            values: vec![1],
            labels: vec![],
        };

        let mut hasher = SampleHasher::default();
        let forward = hasher.sample_hash(&sample, &strings, &locations).unwrap();
        sample.location_ids.reverse();
        let backward = hasher.sample_hash(&sample, &strings, &locations).unwrap();
        assert_ne!(forward, backward);
    }

    #[test]
    fn unknown_location_fails() {
        let (strings, locations) = scratch();
        let sample = Sample {
            location_ids: vec![3],
            values: vec![1],
            labels: vec![],
        };
        let mut hasher = SampleHasher::default();
        let err = hasher
            .sample_hash(&sample, &strings, &locations)
            .unwrap_err();
        assert!(matches!(err, DeltaError::UnknownLocation(3)));
    }

    #[test]
    fn out_of_range_label_string_fails() {
        let (strings, locations) = scratch();
        let sample = Sample {
            location_ids: vec![1],
            values: vec![1],
            labels: vec![Label {
                key: 17,
                str: 0,
                num: 0,
                num_unit: 0,
            }],
        };
        let mut hasher = SampleHasher::default();
        let err = hasher
            .sample_hash(&sample, &strings, &locations)
            .unwrap_err();
        assert!(matches!(err, DeltaError::InvalidStringIndex(17)));
    }
}
