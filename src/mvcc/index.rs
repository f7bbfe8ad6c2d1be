//! Persisted MVCC records.
//!
//! Each user key has one [`KeyIndex`] listing every surviving revision of the
//! key, and one [`MvccEntry`] per revision holding the value and metadata as
//! of that revision.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::revision::Revision;
use crate::core::error::{EtkvError, EtkvResult};

/// Per-key metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Main revision at which the key last came into existence.
    pub create_revision: i64,
    /// Main revision of the latest mutation.
    pub mod_revision: i64,
    /// Puts since creation; 0 once deleted.
    pub version: i64,
    /// Attached lease, 0 if none.
    pub lease_id: i64,
}

bitflags::bitflags! {
    /// Flags on an index entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct EntryFlags: u8 {
        /// Entry records a delete.
        const TOMBSTONE = 0b0000_0001;
    }
}

impl Default for EntryFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// One revision of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub revision: Revision,
    pub flags: EntryFlags,
}

impl IndexEntry {
    /// Check if this entry is a tombstone.
    pub fn is_tombstone(&self) -> bool {
        self.flags.contains(EntryFlags::TOMBSTONE)
    }
}

/// Every surviving revision of one user key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyIndex {
    /// Revisions in ascending order.
    pub entries: Vec<IndexEntry>,
    /// Metadata of the live key, `None` when the latest entry is a tombstone.
    pub current: Option<KeyRecord>,
}

impl KeyIndex {
    /// Latest entry with `main <= at`.
    pub fn entry_at(&self, at: i64) -> Option<&IndexEntry> {
        self.entries.iter().rev().find(|e| e.revision.main <= at)
    }

    /// Revision of the value visible at `at`, if the key was live then.
    pub fn visible_at(&self, at: i64) -> Option<Revision> {
        self.entry_at(at)
            .filter(|e| !e.is_tombstone())
            .map(|e| e.revision)
    }

    /// Append a new entry. Entries must be pushed in revision order.
    pub fn push(&mut self, entry: IndexEntry) {
        debug_assert!(
            self.entries
                .last()
                .map_or(true, |last| last.revision < entry.revision),
            "index entries out of order"
        );
        self.entries.push(entry);
    }

    /// Drop history below `before` that no read at or above `before` can
    /// observe. The latest entry below `before` survives unless it is a
    /// tombstone. Returns the removed revisions.
    pub fn compact(&mut self, before: i64) -> Vec<Revision> {
        let split = self.entries.partition_point(|e| e.revision.main < before);
        if split == 0 {
            return Vec::new();
        }
        let keep_from = if self.entries[split - 1].is_tombstone() {
            split
        } else {
            split - 1
        };
        self.entries.drain(..keep_from).map(|e| e.revision).collect()
    }

    /// Whether no history remains.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The value and metadata of a key at one put revision. Deletes are
/// recorded only as tombstone index entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MvccEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub record: KeyRecord,
}

impl MvccEntry {
    /// Client-facing view of a live entry.
    pub fn to_key_value(&self) -> KeyValue {
        KeyValue {
            key: self.key.clone(),
            create_revision: self.record.create_revision,
            mod_revision: self.record.mod_revision,
            version: self.record.version,
            value: self.value.clone(),
            lease: self.record.lease_id,
        }
    }
}

/// Key-value pair as returned to clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    /// Key.
    pub key: Vec<u8>,
    /// Revision when created.
    pub create_revision: i64,
    /// Revision of last modification.
    pub mod_revision: i64,
    /// Version (number of puts since creation).
    pub version: i64,
    /// Value.
    pub value: Vec<u8>,
    /// Attached lease ID.
    pub lease: i64,
}

/// Encode a persisted record.
pub fn encode<T: Serialize>(value: &T) -> EtkvResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| EtkvError::internal(format!("encode: {}", e)))
}

/// Decode a persisted record.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> EtkvResult<T> {
    bincode::deserialize(bytes).map_err(|e| EtkvError::internal(format!("corrupt record: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(main: i64) -> IndexEntry {
        IndexEntry {
            revision: Revision::new(main, 0),
            flags: EntryFlags::empty(),
        }
    }

    fn tombstone(main: i64) -> IndexEntry {
        IndexEntry {
            revision: Revision::new(main, 0),
            flags: EntryFlags::TOMBSTONE,
        }
    }

    fn index(entries: Vec<IndexEntry>) -> KeyIndex {
        KeyIndex {
            entries,
            current: None,
        }
    }

    #[test]
    fn visibility_respects_tombstones() {
        let idx = index(vec![put(2), put(3), tombstone(5), put(7)]);
        assert_eq!(idx.visible_at(1), None);
        assert_eq!(idx.visible_at(2), Some(Revision::new(2, 0)));
        assert_eq!(idx.visible_at(4), Some(Revision::new(3, 0)));
        assert_eq!(idx.visible_at(5), None);
        assert_eq!(idx.visible_at(6), None);
        assert_eq!(idx.visible_at(100), Some(Revision::new(7, 0)));
    }

    #[test]
    fn compact_keeps_latest_below_watermark() {
        let mut idx = index(vec![put(2), put(3), put(6)]);
        let removed = idx.compact(5);
        assert_eq!(removed, vec![Revision::new(2, 0)]);
        assert_eq!(idx.visible_at(5), Some(Revision::new(3, 0)));
        assert_eq!(idx.visible_at(6), Some(Revision::new(6, 0)));
    }

    #[test]
    fn compact_drops_trailing_tombstone() {
        let mut idx = index(vec![put(2), tombstone(3)]);
        let removed = idx.compact(4);
        assert_eq!(removed, vec![Revision::new(2, 0), Revision::new(3, 0)]);
        assert!(idx.is_empty());
    }

    #[test]
    fn compact_below_history_is_noop() {
        let mut idx = index(vec![put(4)]);
        assert!(idx.compact(4).is_empty());
        assert!(idx.compact(2).is_empty());
        assert_eq!(idx.entries.len(), 1);
    }

    #[test]
    fn records_survive_encoding() {
        let entry = MvccEntry {
            key: b"k".to_vec(),
            value: b"v".to_vec(),
            record: KeyRecord {
                create_revision: 2,
                mod_revision: 3,
                version: 2,
                lease_id: 0,
            },
        };
        let bytes = encode(&entry).unwrap();
        let back: MvccEntry = decode(&bytes).unwrap();
        assert_eq!(back.to_key_value().version, 2);
        assert!(decode::<MvccEntry>(&[0xff]).is_err());
    }
}
