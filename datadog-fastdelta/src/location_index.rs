// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;

type FxHashMap<K, V> = hashbrown::HashMap<K, V, BuildHasherDefault<FxHasher>>;

#[derive(Clone, Copy, Debug)]
struct Slot {
    address: u64,
    included: bool,
}

/// Maps location IDs to instruction addresses and tracks which locations
/// are still referenced by a surviving sample.
///
/// Profiles in practice number their locations 1..N in order, so the index
/// is a dense append-only table until an ID breaks that sequence, at which
/// point everything spills into an associative fallback. The fallback is a
/// performance concession, not a behavior change.
#[derive(Debug, Default)]
pub(crate) struct LocationIndex {
    addresses: Vec<u64>,
    included: Vec<bool>,
    fallback: Option<FxHashMap<u64, Slot>>,
}

impl LocationIndex {
    pub fn insert(&mut self, id: u64, address: u64) {
        if self.fallback.is_none() {
            if id == self.addresses.len() as u64 + 1 {
                self.addresses.push(address);
                self.included.push(false);
                return;
            }
            let mut map = FxHashMap::with_capacity_and_hasher(
                self.addresses.len() + 1,
                BuildHasherDefault::default(),
            );
            for (offset, (&address, &included)) in
                self.addresses.iter().zip(&self.included).enumerate()
            {
                map.insert(offset as u64 + 1, Slot { address, included });
            }
            self.addresses.clear();
            self.included.clear();
            self.fallback = Some(map);
        }
        if let Some(map) = &mut self.fallback {
            map.insert(
                id,
                Slot {
                    address,
                    included: false,
                },
            );
        }
    }

    pub fn get(&self, id: u64) -> Option<u64> {
        match &self.fallback {
            Some(map) => map.get(&id).map(|slot| slot.address),
            None => {
                let index = usize::try_from(id.checked_sub(1)?).ok()?;
                self.addresses.get(index).copied()
            }
        }
    }

    /// Idempotent; unknown IDs are ignored.
    pub fn mark_included(&mut self, id: u64) {
        match &mut self.fallback {
            Some(map) => {
                if let Some(slot) = map.get_mut(&id) {
                    slot.included = true;
                }
            }
            None => {
                if let Some(flag) = id
                    .checked_sub(1)
                    .and_then(|index| self.included.get_mut(index as usize))
                {
                    *flag = true;
                }
            }
        }
    }

    pub fn is_included(&self, id: u64) -> bool {
        match &self.fallback {
            Some(map) => map.get(&id).is_some_and(|slot| slot.included),
            None => id
                .checked_sub(1)
                .and_then(|index| self.included.get(index as usize))
                .copied()
                .unwrap_or(false),
        }
    }

    /// Dropping the fallback (instead of clearing it) means the next call
    /// re-enters the dense fast path.
    pub fn reset(&mut self) {
        self.addresses.clear();
        self.included.clear();
        self.fallback = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_sequential_ids() {
        let mut index = LocationIndex::default();
        index.insert(1, 0xA);
        index.insert(2, 0xB);
        index.insert(3, 0xC);
        assert!(index.fallback.is_none());
        assert_eq!(index.get(2), Some(0xB));
        assert_eq!(index.get(4), None);
        assert_eq!(index.get(0), None);

        assert!(!index.is_included(2));
        index.mark_included(2);
        assert!(index.is_included(2));
        assert!(!index.is_included(1));
    }

    #[test]
    fn non_sequential_id_spills_to_fallback() {
        let mut index = LocationIndex::default();
        index.insert(1, 0xA);
        index.mark_included(1);
        index.insert(7, 0x70);
        assert!(index.fallback.is_some());
        // earlier entries survive the spill, flags included
        assert_eq!(index.get(1), Some(0xA));
        assert!(index.is_included(1));
        assert_eq!(index.get(7), Some(0x70));
        assert!(!index.is_included(7));
    }

    #[test]
    fn reset_reenters_dense_path() {
        let mut index = LocationIndex::default();
        index.insert(5, 0xA);
        assert!(index.fallback.is_some());
        index.reset();
        assert!(index.fallback.is_none());
        index.insert(1, 0xB);
        assert!(index.fallback.is_none());
        assert_eq!(index.get(1), Some(0xB));
    }
}
