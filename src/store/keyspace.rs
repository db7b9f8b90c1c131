use bytes::Bytes;

use super::hash::{hash_bytes, HashIndex};
use super::zset::SortedSet;

/// A value in the keyspace: a plain string or a sorted set.
pub enum Object {
    Str(Bytes),
    Sorted(SortedSet),
}

struct KeyEntry {
    key: Vec<u8>,
    object: Object,
}

/// The process-wide keyspace: one hash index mapping keys to typed
/// objects. Constructed at startup and owned by the command executor;
/// a single thread drives every mutation.
pub struct Store {
    index: HashIndex<KeyEntry>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            index: HashIndex::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut Object> {
        self.index
            .get_mut(hash_bytes(key), |entry| entry.key == key)
            .map(|entry| &mut entry.object)
    }

    /// Insert a fresh key. The caller has already established the key is
    /// absent; existing keys are mutated through `get_mut`.
    pub fn insert(&mut self, key: Vec<u8>, object: Object) {
        let hash = hash_bytes(&key);
        self.index.insert(hash, KeyEntry { key, object });
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Object> {
        self.index
            .remove(hash_bytes(key), |entry| entry.key == key)
            .map(|entry| entry.object)
    }

    /// Snapshot of every key, in table order, walking both internal hash
    /// tables so a mid-migration keyspace is still listed in full.
    pub fn keys(&self) -> Vec<Bytes> {
        let mut out = Vec::with_capacity(self.len());
        self.index
            .for_each(|entry| out.push(Bytes::copy_from_slice(&entry.key)));
        out
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
