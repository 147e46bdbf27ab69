// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::hasher::{content_hash, Hash};

/// The string table of the profile currently being processed, retained as
/// content hashes only. A hash is enough to match declared sample-type
/// names against the configured delta fields and to key label identity,
/// at a fraction of the memory of keeping copies of the bytes.
#[derive(Debug, Default)]
pub(crate) struct StringTable {
    hashes: Vec<Hash>,
}

impl StringTable {
    /// Records the next string. Positional: the n-th call stores index n.
    pub fn add(&mut self, bytes: &[u8]) {
        self.hashes.push(content_hash(bytes));
    }

    /// The content hash stored at `index`, or None for an out-of-range or
    /// negative index.
    pub fn get(&self, index: i64) -> Option<Hash> {
        usize::try_from(index)
            .ok()
            .and_then(|index| self.hashes.get(index))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn reset(&mut self) {
        self.hashes.clear();
    }
}
