// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;

type FxHashSet<T> = hashbrown::HashSet<T, BuildHasherDefault<FxHasher>>;

/// Membership set for function IDs, whose key space is sparse and
/// unbounded.
#[derive(Debug, Default)]
pub(crate) struct SparseIntSet {
    members: FxHashSet<u64>,
}

impl SparseIntSet {
    pub fn add(&mut self, member: u64) {
        self.members.insert(member);
    }

    pub fn contains(&self, member: u64) -> bool {
        self.members.contains(&member)
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }
}

/// Membership bitset for string-table indices, whose upper bound is known
/// up front: one [`append`] per table entry sizes the set, then [`add`]
/// flips bits within that bound and ignores anything outside it.
///
/// [`append`]: DenseIntSet::append
/// [`add`]: DenseIntSet::add
#[derive(Debug, Default)]
pub(crate) struct DenseIntSet {
    len: usize,
    words: Vec<u64>,
}

impl DenseIntSet {
    /// Grows the set by one position, optionally already a member.
    pub fn append(&mut self, member: bool) {
        let (word, bit) = (self.len / 64, self.len % 64);
        if word == self.words.len() {
            self.words.push(0);
        }
        if member {
            self.words[word] |= 1 << bit;
        }
        self.len += 1;
    }

    /// Marks `index` as a member. Negative or out-of-bounds indices don't
    /// refer to an appended position and are ignored.
    pub fn add(&mut self, index: i64) {
        let Ok(index) = usize::try_from(index) else {
            return;
        };
        if index < self.len {
            self.words[index / 64] |= 1 << (index % 64);
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        index < self.len && self.words[index / 64] & (1 << (index % 64)) != 0
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.words.clear();
    }
}
