//! Tag dictionary: id -> (key, value) attribute lookup table.
//!
//! The container compresses repeated string attributes into small integer ids.
//! Ids are assigned by the container and are not necessarily contiguous, so
//! registration transparently backfills gaps with a placeholder pair; every id
//! up to the maximum seen is always a valid index.

use crate::error::{ObfError, Result};

/// An immutable `(key, value)` attribute pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagValue {
    pub key: String,
    pub value: String,
}

impl TagValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Sparse id-indexed growable table of tag pairs.
///
/// Modeled as an arena of entries addressed by integer index, auto-extended
/// with placeholder entries on out-of-range writes. This keeps lookup O(1)
/// without a hash map while tolerating the format's gappy id assignment.
#[derive(Debug, Default)]
pub struct TagDictionary {
    entries: Vec<TagValue>,
}

impl TagDictionary {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a pair under `id`, growing the table with copies of the pair
    /// until the id is in range. Re-registration at an existing id overwrites.
    pub fn register(&mut self, id: u32, key: impl Into<String>, value: impl Into<String>) {
        let pair = TagValue::new(key, value);
        let id = id as usize;
        while self.entries.len() < id + 1 {
            self.entries.push(pair.clone());
        }
        self.entries[id] = pair;
    }

    /// Strict lookup; fails for ids never registered.
    pub fn lookup(&self, id: u32) -> Result<&TagValue> {
        self.entries
            .get(id as usize)
            .ok_or(ObfError::TagIdOutOfRange {
                id,
                len: self.entries.len(),
            })
    }

    /// Lenient lookup used by attribute parsing, where an unknown id reads as
    /// "attribute absent".
    pub fn get(&self, id: u32) -> Option<&TagValue> {
        self.entries.get(id as usize)
    }

    /// Number of slots in the table (max registered id + 1).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(id, pair)` over every slot, placeholders included.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &TagValue)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(id, pair)| (id as u32, pair))
    }
}
