//! Ordered key-value state access for the PoC engine.
//!
//! Every engine operation runs against a [`StateOverlay`] stacked on top of
//! the host store. The overlay buffers writes in a `BTreeMap`, so a failed
//! operation is discarded by simply dropping it, and a successful one is
//! committed with a single [`StateAccess::batch_apply`] in deterministic key
//! order.

use std::cmp::Ordering;
use std::collections::{btree_map, BTreeMap};
use std::iter::{Fuse, Peekable};
use std::ops::Bound::{self, Excluded, Included, Unbounded};

use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};

pub mod keys;

pub type KvPair = (Vec<u8>, Vec<u8>);
pub type ScanIter<'a> = Box<dyn Iterator<Item = Result<KvPair, StoreError>> + 'a>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to encode value for key {key}: {reason}")]
    Encode { key: String, reason: String },
    #[error("corrupt value under key {key}: {reason}")]
    Decode { key: String, reason: String },
    #[error("required key {key} is missing")]
    Missing { key: String },
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Minimal ordered byte-key store consumed by the engine.
pub trait StateAccess {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError>;

    /// Iterates all pairs whose key starts with `prefix`, in ascending key order.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<ScanIter<'_>, StoreError>;

    /// Applies inserts and deletes as one atomic unit.
    fn batch_apply(&mut self, inserts: &[KvPair], deletes: &[Vec<u8>]) -> Result<(), StoreError>;
}

pub(crate) fn display_key(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}

pub fn read_json<T: DeserializeOwned>(
    state: &dyn StateAccess,
    key: &[u8],
) -> Result<Option<T>, StoreError> {
    match state.get(key)? {
        Some(bytes) => decode_json(key, &bytes).map(Some),
        None => Ok(None),
    }
}

pub fn decode_json<T: DeserializeOwned>(key: &[u8], bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|err| StoreError::Decode {
        key: display_key(key),
        reason: err.to_string(),
    })
}

pub fn write_json<T: Serialize>(
    state: &mut dyn StateAccess,
    key: &[u8],
    value: &T,
) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(value).map_err(|err| StoreError::Encode {
        key: display_key(key),
        reason: err.to_string(),
    })?;
    state.insert(key, &bytes)
}

/// Reads a big-endian `u64` counter, treating an absent key as zero.
pub fn read_u64(state: &dyn StateAccess, key: &[u8]) -> Result<u64, StoreError> {
    match state.get(key)? {
        Some(bytes) => {
            let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| StoreError::Decode {
                key: display_key(key),
                reason: format!("expected 8 bytes, found {}", bytes.len()),
            })?;
            Ok(u64::from_be_bytes(raw))
        }
        None => Ok(0),
    }
}

pub fn write_u64(state: &mut dyn StateAccess, key: &[u8], value: u64) -> Result<(), StoreError> {
    state.insert(key, &value.to_be_bytes())
}

/// Smallest key strictly greater than every key starting with `prefix`.
/// `None` when the prefix is empty or all `0xFF`.
fn next_prefix(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.pop() {
        if last != 0xFF {
            upper.push(last + 1);
            return Some(upper);
        }
    }
    None
}

fn prefix_bounds(prefix: &[u8]) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let end = match next_prefix(prefix) {
        Some(upper) => Excluded(upper),
        None => Unbounded,
    };
    (Included(prefix.to_vec()), end)
}

/// In-memory ordered store. Used by tests and the replay tool; hosts plug in
/// their own persistent backend through [`StateAccess`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemStore {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// SHA-256 Merkle root over every key/value pair in key order.
    pub fn state_root(&self) -> [u8; 32] {
        let leaves: Vec<[u8; 32]> = self
            .entries
            .iter()
            .map(|(key, value)| {
                let mut hasher = Sha256::new();
                hasher.update(b"kv");
                hasher.update((key.len() as u64).to_be_bytes());
                hasher.update(key);
                hasher.update((value.len() as u64).to_be_bytes());
                hasher.update(value);
                hasher.finalize().into()
            })
            .collect();
        build_merkle(leaves)
    }

    pub fn state_root_hex(&self) -> String {
        hex::encode(self.state_root())
    }
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"poc-store-empty").into();
    }
    while leaves.len() > 1 {
        let mut next: Vec<[u8; 32]> = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

impl StateAccess for MemStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<ScanIter<'_>, StoreError> {
        let iter = self
            .entries
            .range(prefix_bounds(prefix))
            .map(|(key, value)| Ok::<_, StoreError>((key.clone(), value.clone())));
        Ok(Box::new(iter))
    }

    fn batch_apply(&mut self, inserts: &[KvPair], deletes: &[Vec<u8>]) -> Result<(), StoreError> {
        for key in deletes {
            self.entries.remove(key);
        }
        for (key, value) in inserts {
            self.entries.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}

/// Ordered inserts and deletes produced by one overlay.
pub type StateChangeSet = (Vec<KvPair>, Vec<Vec<u8>>);

/// Copy-on-write overlay over any [`StateAccess`].
///
/// Reads consult the local write set first (a `None` entry is a pending
/// delete) and fall through to `base`. Nothing reaches `base` until the
/// caller commits [`StateOverlay::into_ordered_batch`].
pub struct StateOverlay<'a> {
    base: &'a dyn StateAccess,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a> StateOverlay<'a> {
    pub fn new(base: &'a dyn StateAccess) -> Self {
        Self {
            base,
            writes: BTreeMap::new(),
        }
    }

    pub fn into_ordered_batch(self) -> StateChangeSet {
        let mut inserts = Vec::new();
        let mut deletes = Vec::new();
        for (key, value) in self.writes {
            match value {
                Some(value) => inserts.push((key, value)),
                None => deletes.push(key),
            }
        }
        (inserts, deletes)
    }
}

struct MergingIterator<'a> {
    base: Peekable<Fuse<ScanIter<'a>>>,
    writes: Peekable<btree_map::Range<'a, Vec<u8>, Option<Vec<u8>>>>,
}

impl<'a> Iterator for MergingIterator<'a> {
    type Item = Result<KvPair, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let order = match (self.base.peek(), self.writes.peek()) {
                (Some(Ok((base_key, _))), Some((write_key, _))) => {
                    base_key.as_slice().cmp(write_key.as_slice())
                }
                // errors surface immediately
                (Some(_), _) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => return None,
            };
            if order == Ordering::Less {
                return self.base.next();
            }
            if order == Ordering::Equal {
                // shadowed by the overlay
                self.base.next();
            }
            if let Some((key, Some(value))) = self.writes.next() {
                return Some(Ok((key.clone(), value.clone())));
            }
        }
    }
}

impl<'a> StateAccess for StateOverlay<'a> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        match self.writes.get(key) {
            Some(value) => Ok(value.clone()),
            None => self.base.get(key),
        }
    }

    fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.writes.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.writes.insert(key.to_vec(), None);
        Ok(())
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<ScanIter<'_>, StoreError> {
        let base: ScanIter<'_> = self.base.prefix_scan(prefix)?;
        let base = base.fuse().peekable();
        let writes = self.writes.range(prefix_bounds(prefix)).peekable();
        Ok(Box::new(MergingIterator { base, writes }))
    }

    fn batch_apply(&mut self, inserts: &[KvPair], deletes: &[Vec<u8>]) -> Result<(), StoreError> {
        for key in deletes {
            self.delete(key)?;
        }
        for (key, value) in inserts {
            self.insert(key, value)?;
        }
        Ok(())
    }
}

/// Runs `op` against a fresh overlay and commits its writes to `state` only
/// if it returns `Ok`.
pub fn atomically<T, E>(
    state: &mut dyn StateAccess,
    op: impl FnOnce(&mut StateOverlay<'_>) -> Result<T, E>,
) -> Result<T, E>
where
    E: From<StoreError>,
{
    let (value, (inserts, deletes)) = {
        let mut overlay = StateOverlay::new(&*state);
        let value = op(&mut overlay)?;
        (value, overlay.into_ordered_batch())
    };
    state.batch_apply(&inserts, &deletes)?;
    Ok(value)
}
