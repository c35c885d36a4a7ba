use std::collections::HashMap;

use bytes::Bytes;
use rand::Rng;

/// Auxiliary index over the keyspace: a vector of keys plus a position map,
/// giving O(1) insert, O(1) swap-remove delete and O(1) uniform random
/// sampling under arbitrary churn.
#[derive(Debug, Default)]
pub struct KeyIndex {
    keys: Vec<Bytes>,
    positions: HashMap<Bytes, usize>,
}

impl KeyIndex {
    pub fn new() -> Self {
        KeyIndex::default()
    }

    /// Records a key the store just inserted. Callers only append keys that
    /// are not indexed yet; the store guards this.
    pub fn append(&mut self, key: Bytes) {
        debug_assert!(!self.positions.contains_key(&key));
        self.positions.insert(key.clone(), self.keys.len());
        self.keys.push(key);
    }

    /// Drops a key in O(1): the vector tail is swapped into the vacated slot
    /// and its recorded position updated.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        let Some(at) = self.positions.remove(key) else {
            return false;
        };
        let tail = self.keys.pop().expect("keys and positions share length");
        if tail.as_ref() != key {
            self.positions.insert(tail.clone(), at);
            self.keys[at] = tail;
        }
        true
    }

    /// A uniformly random indexed key, or `None` when empty.
    pub fn random(&self) -> Option<&Bytes> {
        if self.keys.is_empty() {
            return None;
        }
        let at = rand::thread_rng().gen_range(0..self.keys.len());
        Some(&self.keys[at])
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[cfg(test)]
    fn position_of(&self, key: &[u8]) -> Option<usize> {
        self.positions.get(key).copied()
    }

    #[cfg(test)]
    fn key_at(&self, at: usize) -> &Bytes {
        &self.keys[at]
    }
}
