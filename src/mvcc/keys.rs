//! Backend key layout.
//!
//! All engine state lives under [`RESERVED_PREFIX`]:
//!
//! ```text
//! \xff/etkv/meta/revision        RevisionState
//! \xff/etkv/meta/sweeper-lock    SweeperLock
//! \xff/etkv/index/<user key>     KeyIndex
//! \xff/etkv/rev/<main><sub>      MvccEntry (16 big-endian bytes)
//! \xff/etkv/lease/<id>           LeaseRecord (8 big-endian bytes)
//! ```

use super::revision::Revision;

/// Prefix reserved for engine state.
pub const RESERVED_PREFIX: &[u8] = b"\xff/etkv/";

const META_REVISION: &[u8] = b"meta/revision";
const META_SWEEPER_LOCK: &[u8] = b"meta/sweeper-lock";
const INDEX: &[u8] = b"index/";
const REV: &[u8] = b"rev/";
const LEASE: &[u8] = b"lease/";

fn join(parts: &[&[u8]]) -> Vec<u8> {
    let len = RESERVED_PREFIX.len() + parts.iter().map(|p| p.len()).sum::<usize>();
    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(RESERVED_PREFIX);
    for part in parts {
        out.extend_from_slice(part);
    }
    out
}

/// Key holding the persisted [`super::revision::RevisionState`].
pub fn meta_revision_key() -> Vec<u8> {
    join(&[META_REVISION])
}

/// Key holding the expiry sweeper lock.
pub fn sweeper_lock_key() -> Vec<u8> {
    join(&[META_SWEEPER_LOCK])
}

/// Index key for a user key.
pub fn index_key(user_key: &[u8]) -> Vec<u8> {
    join(&[INDEX, user_key])
}

/// Strip the index prefix from a backend key.
pub fn user_key_of(index_key: &[u8]) -> Option<&[u8]> {
    let prefix_len = RESERVED_PREFIX.len() + INDEX.len();
    if index_key.len() >= prefix_len
        && index_key.starts_with(RESERVED_PREFIX)
        && &index_key[RESERVED_PREFIX.len()..prefix_len] == INDEX
    {
        Some(&index_key[prefix_len..])
    } else {
        None
    }
}

/// Backend range `[start, end)` of index keys covering a user key range.
///
/// Follows etcd conventions: an empty `range_end` selects `key` alone; a
/// `range_end` of `"\0"` selects every key at or after `key`.
pub fn index_range(key: &[u8], range_end: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let start = index_key(key);
    let end = if range_end.is_empty() {
        key_after(&start)
    } else if range_end == b"\0" {
        prefix_end(&join(&[INDEX]))
    } else {
        index_key(range_end)
    };
    (start, end)
}

/// Key for the entry written at `revision`.
pub fn rev_key(revision: Revision) -> Vec<u8> {
    join(&[REV, &revision.to_bytes()])
}

/// Key for a lease record.
pub fn lease_key(id: i64) -> Vec<u8> {
    join(&[LEASE, &(id as u64).to_be_bytes()])
}

/// Backend range covering every lease record.
pub fn lease_range() -> (Vec<u8>, Vec<u8>) {
    let start = join(&[LEASE]);
    let end = prefix_end(&start);
    (start, end)
}

/// The smallest key strictly greater than `key`.
pub fn key_after(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + 1);
    out.extend_from_slice(key);
    out.push(0);
    out
}

/// The smallest key greater than every key starting with `prefix`.
///
/// Returns an empty vector when no such key exists (`prefix` is all `0xff`).
pub fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    end
}

/// Whether a user key falls inside an etcd-style `[key, range_end)` range.
pub fn in_range(candidate: &[u8], key: &[u8], range_end: &[u8]) -> bool {
    if range_end.is_empty() {
        candidate == key
    } else if range_end == b"\0" {
        candidate >= key
    } else {
        candidate >= key && candidate < range_end
    }
}
