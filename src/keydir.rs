//! In-memory key directory.
//!
//! Maps every live key, compared bytewise, to the exact location of its
//! most recent value. The directory also mirrors the active data file's
//! byte length in `last_offset`, so value positions are computed without a
//! `seek` or `stat` per write.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::record::{Header, HintHeader, HEADER_SIZE};

/// Locator for the most recent value of a key.
#[derive(Debug, Clone, PartialEq)]
pub struct KdEntry {
    pub crc: u32,
    pub timestamp: u32,
    pub value_pos: u32,
    pub value_size: u32,
    /// Data file name (without extension) holding the value.
    pub file: String,
}

/// The key directory: key bytes to locator, plus the running write offset
/// for the file currently being appended to.
#[derive(Debug, Default)]
pub struct KeyDir {
    last_offset: u32,
    entries: HashMap<Vec<u8>, KdEntry>,
}

impl KeyDir {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly appended record and advance the write offset past it.
    ///
    /// Returns the stored locator so callers emitting hints can reuse it.
    pub fn set(&mut self, key: &[u8], h: &Header, file: &str) -> KdEntry {
        let entry = KdEntry {
            crc: h.crc,
            timestamp: h.timestamp,
            value_pos: self.last_offset + h.entry_size() - h.value_size,
            value_size: h.value_size,
            file: file.to_string(),
        };

        self.last_offset += h.entry_size();

        self.entries.insert(key.to_vec(), entry.clone());

        entry
    }

    /// Insert a locator read from a hint file. Hints carry absolute value
    /// positions, so the write offset is left untouched.
    pub fn set_from_hint(&mut self, key: Vec<u8>, h: &HintHeader, file: &str) {
        self.entries.insert(
            key,
            KdEntry {
                crc: h.header.crc,
                timestamp: h.header.timestamp,
                value_pos: h.value_pos,
                value_size: h.header.value_size,
                file: file.to_string(),
            },
        );
    }

    pub fn get(&self, key: &[u8]) -> Result<&KdEntry> {
        self.entries.get(key).ok_or(Error::KeyNotFound)
    }

    /// Remove a key and advance the write offset past its tombstone record.
    pub fn unset(&mut self, key: &[u8]) {
        self.entries.remove(key);

        self.last_offset += HEADER_SIZE + key.len() as u32;
    }

    /// Advance the write offset by `n` bytes that landed on disk without a
    /// corresponding locator (a partial write).
    pub fn advance_offset(&mut self, n: u32) {
        self.last_offset += n;
    }

    /// Zero the write offset when crossing a data file boundary.
    pub fn reset_offset(&mut self) {
        self.last_offset = 0;
    }

    /// Splice a merge-local directory into this one after a data file has
    /// been rewritten in place.
    ///
    /// Only entries whose live locator still points at the rewritten file
    /// are updated. Keys missing here were deleted while the merge ran and
    /// stay deleted; keys whose locator moved to another file were
    /// overwritten and the newer locator wins.
    pub fn merge(&mut self, other: KeyDir) {
        for (key, entry) in other.entries {
            if let Some(live) = self.entries.get_mut(&key) {
                if live.file == entry.file {
                    *live = entry;
                }
            }
        }
    }

    /// Snapshot of the live keys, in arbitrary order.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
