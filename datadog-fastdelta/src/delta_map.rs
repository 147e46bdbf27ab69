// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::hasher::{Hash, SampleHasher};
use crate::location_index::LocationIndex;
use crate::string_table::StringTable;
use crate::DeltaError;
use datadog_pproflite as pproflite;
use datadog_pproflite::Sample;
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;

type FxHashMap<K, V> = hashbrown::HashMap<K, V, BuildHasherDefault<FxHasher>>;

/// How many value positions a record tracks deltas for.
pub const MAX_DELTA_VALUES: usize = 2;

/// How many values a sample may carry. Two delta slots plus headroom for
/// the instantaneous values the widest runtime profiles carry alongside
/// them.
pub const MAX_SAMPLE_VALUES: usize = 4;

#[derive(Clone, Copy, Debug, Default)]
struct DeltaRecord {
    /// Aggregates as of the previous call, one per delta-tracked position.
    old: [i64; MAX_DELTA_VALUES],
    /// Running aggregate of the current call, one per value position.
    /// Duplicate samples sum into this rather than overwriting it.
    new: [i64; MAX_SAMPLE_VALUES],
    /// The call this record's `new`/`written` state belongs to. A stale
    /// generation means the record was last touched in an earlier call.
    generation: u64,
    /// Set once the record has been emitted during the current call, so a
    /// duplicate occurrence of the same identity is not emitted twice.
    written: bool,
}

/// The delta-record table, keyed by sample identity. This is the only
/// state that carries "previous profile" information between calls, so it
/// is never cleared in the normal lifecycle.
#[derive(Debug)]
pub(crate) struct DeltaMap {
    records: FxHashMap<Hash, DeltaRecord>,
    hasher: SampleHasher,
    /// (type, unit) content hashes of the configured delta fields.
    config: Vec<(Hash, Hash)>,
    /// (type, unit) string indices declared by the current profile.
    declared: Vec<(i64, i64)>,
    /// Whether each declared value position is delta-tracked. Rebuilt
    /// lazily once per call, after the string table is complete.
    compute_delta: Vec<bool>,
    prepared: bool,
    generation: u64,
}

impl DeltaMap {
    pub fn new(config: Vec<(Hash, Hash)>) -> Self {
        Self {
            records: FxHashMap::default(),
            hasher: SampleHasher::default(),
            config,
            declared: Vec::new(),
            compute_delta: Vec::new(),
            prepared: false,
            generation: 0,
        }
    }

    /// Per-call reset. Keeps the records; they are the cross-call state.
    pub fn reset(&mut self) {
        self.declared.clear();
        self.compute_delta.clear();
        self.prepared = false;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Drops all cross-call state. Only used when recovering from a failed
    /// call, where the records can no longer be trusted.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Records one declared sample type during the index pass. The string
    /// table may not be complete yet, so matching against the configured
    /// fields is deferred to [`prepare`](Self::prepare).
    pub fn add_sample_type(&mut self, value_type: &pproflite::ValueType) -> Result<(), DeltaError> {
        self.declared.push((value_type.r#type, value_type.unit));
        if self.declared.len() > MAX_SAMPLE_VALUES {
            return Err(DeltaError::TooManySampleTypes(self.declared.len()));
        }
        Ok(())
    }

    /// Resolves which declared value positions are delta-tracked, by
    /// hash-comparing the declared names/units against the configured
    /// fields.
    fn prepare(&mut self, strings: &StringTable) -> Result<(), DeltaError> {
        if self.prepared {
            return Ok(());
        }
        let mut matched = 0;
        for &(type_index, unit_index) in &self.declared {
            let type_hash = strings
                .get(type_index)
                .ok_or(DeltaError::InvalidStringIndex(type_index))?;
            let unit_hash = strings
                .get(unit_index)
                .ok_or(DeltaError::InvalidStringIndex(unit_index))?;
            let tracked = self
                .config
                .iter()
                .any(|&(r#type, unit)| r#type == type_hash && unit == unit_hash);
            matched += usize::from(tracked);
            self.compute_delta.push(tracked);
        }
        if matched > MAX_DELTA_VALUES {
            return Err(DeltaError::TooManyDeltaValues(matched));
        }
        self.prepared = true;
        Ok(())
    }

    /// Folds a sample's raw values into its record's current-call
    /// aggregate. Duplicate identities sum.
    pub fn update_sample(
        &mut self,
        sample: &Sample,
        strings: &StringTable,
        locations: &LocationIndex,
    ) -> Result<(), DeltaError> {
        self.prepare(strings)?;
        self.check_value_count(sample)?;
        let key = self.hasher.sample_hash(sample, strings, locations)?;
        let generation = self.generation;
        let record = self.records.entry(key).or_default();
        if record.generation != generation {
            record.new = [0; MAX_SAMPLE_VALUES];
            record.written = false;
            record.generation = generation;
        }
        for (aggregate, &value) in record.new.iter_mut().zip(&sample.values) {
            *aggregate = aggregate.wrapping_add(value);
        }
        Ok(())
    }

    /// Replaces the sample's values with deltas for tracked positions and
    /// aggregates for the rest, returning whether anything non-zero
    /// remains. Callers drop the sample when nothing does. A second
    /// occurrence of an already-written identity comes back all-consumed.
    pub fn delta(
        &mut self,
        sample: &mut Sample,
        strings: &StringTable,
        locations: &LocationIndex,
    ) -> Result<bool, DeltaError> {
        self.prepare(strings)?;
        self.check_value_count(sample)?;
        let key = self.hasher.sample_hash(sample, strings, locations)?;
        let record = match self.records.get_mut(&key) {
            Some(record) if record.generation == self.generation => record,
            // the aggregate pass sees every sample before this pass does
            _ => return Err(DeltaError::UnknownSample),
        };
        if record.written {
            return Ok(false);
        }
        record.written = true;

        let mut delta_index = 0;
        let mut has_nonzero = false;
        for (index, value) in sample.values.iter_mut().enumerate() {
            let aggregate = record.new[index];
            if self.compute_delta[index] {
                *value = aggregate.wrapping_sub(record.old[delta_index]);
                record.old[delta_index] = aggregate;
                delta_index += 1;
            } else {
                *value = aggregate;
            }
            has_nonzero |= *value != 0;
        }
        Ok(has_nonzero)
    }

    fn check_value_count(&self, sample: &Sample) -> Result<(), DeltaError> {
        if sample.values.len() != self.declared.len() {
            return Err(DeltaError::ValueCountMismatch {
                got: sample.values.len(),
                declared: self.declared.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::content_hash;

    fn scratch() -> (StringTable, LocationIndex) {
        let mut strings = StringTable::default();
        for s in ["", "alloc_objects", "count", "inuse_objects"] {
            strings.add(s.as_bytes());
        }
        let mut locations = LocationIndex::default();
        locations.insert(1, 0x1000);
        (strings, locations)
    }

    fn tracked_map() -> DeltaMap {
        let mut map = DeltaMap::new(vec![(content_hash(b"alloc_objects"), content_hash(b"count"))]);
        map.reset();
        map.add_sample_type(&pproflite::ValueType { r#type: 1, unit: 2 })
            .unwrap();
        map.add_sample_type(&pproflite::ValueType { r#type: 3, unit: 2 })
            .unwrap();
        map
    }

    fn sample(values: Vec<i64>) -> Sample {
        Sample {
            location_ids: vec![1],
            values,
            labels: vec![],
        }
    }

    #[test]
    fn first_call_passes_aggregates_through() {
        let (strings, locations) = scratch();
        let mut map = tracked_map();
        let mut s = sample(vec![10, 7]);
        map.update_sample(&s, &strings, &locations).unwrap();
        assert!(map.delta(&mut s, &strings, &locations).unwrap());
        assert_eq!(s.values, vec![10, 7]);
    }

    #[test]
    fn second_call_diffs_tracked_positions_only() {
        let (strings, locations) = scratch();
        let mut map = tracked_map();
        let mut s = sample(vec![10, 7]);
        map.update_sample(&s, &strings, &locations).unwrap();
        map.delta(&mut s, &strings, &locations).unwrap();

        map.reset();
        map.add_sample_type(&pproflite::ValueType { r#type: 1, unit: 2 })
            .unwrap();
        map.add_sample_type(&pproflite::ValueType { r#type: 3, unit: 2 })
            .unwrap();
        let mut s = sample(vec![15, 9]);
        map.update_sample(&s, &strings, &locations).unwrap();
        assert!(map.delta(&mut s, &strings, &locations).unwrap());
        // tracked position diffed, untracked passed through
        assert_eq!(s.values, vec![5, 9]);
    }

    #[test]
    fn duplicates_sum_and_emit_once() {
        let (strings, locations) = scratch();
        let mut map = tracked_map();
        let s = sample(vec![10, 0]);
        map.update_sample(&s, &strings, &locations).unwrap();
        map.update_sample(&s, &strings, &locations).unwrap();

        let mut first = sample(vec![10, 0]);
        assert!(map.delta(&mut first, &strings, &locations).unwrap());
        assert_eq!(first.values, vec![20, 0]);

        let mut second = sample(vec![10, 0]);
        assert!(!map.delta(&mut second, &strings, &locations).unwrap());
    }

    #[test]
    fn unseen_sample_is_an_error_in_the_merge_pass() {
        let (strings, locations) = scratch();
        let mut map = tracked_map();
        let mut s = sample(vec![1, 1]);
        let err = map.delta(&mut s, &strings, &locations).unwrap_err();
        assert!(matches!(err, DeltaError::UnknownSample));
    }

    #[test]
    fn too_many_matching_fields() {
        let (strings, locations) = scratch();
        let mut map = DeltaMap::new(vec![
            (content_hash(b"alloc_objects"), content_hash(b"count")),
            (content_hash(b"inuse_objects"), content_hash(b"count")),
            (content_hash(b""), content_hash(b"")),
        ]);
        map.reset();
        for value_type in [
            pproflite::ValueType { r#type: 1, unit: 2 },
            pproflite::ValueType { r#type: 3, unit: 2 },
            pproflite::ValueType { r#type: 0, unit: 0 },
        ] {
            map.add_sample_type(&value_type).unwrap();
        }
        let s = sample(vec![1, 2, 3]);
        let err = map.update_sample(&s, &strings, &locations).unwrap_err();
        assert!(matches!(err, DeltaError::TooManyDeltaValues(3)));
    }

    #[test]
    fn too_many_sample_types() {
        let mut map = tracked_map();
        map.add_sample_type(&pproflite::ValueType { r#type: 0, unit: 0 })
            .unwrap();
        map.add_sample_type(&pproflite::ValueType { r#type: 0, unit: 0 })
            .unwrap();
        let err = map
            .add_sample_type(&pproflite::ValueType { r#type: 0, unit: 0 })
            .unwrap_err();
        assert!(matches!(err, DeltaError::TooManySampleTypes(5)));
    }

    #[test]
    fn value_count_mismatch() {
        let (strings, locations) = scratch();
        let mut map = tracked_map();
        let s = sample(vec![1]);
        let err = map.update_sample(&s, &strings, &locations).unwrap_err();
        assert!(matches!(
            err,
            DeltaError::ValueCountMismatch { got: 1, declared: 2 }
        ));
    }
}
