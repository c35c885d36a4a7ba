use std::collections::HashMap;
use std::time::SystemTime;

use bytes::Bytes;
use tracing::debug;

use crate::frame::Frame;
use crate::key_index::KeyIndex;

/// A stored value and its optional absolute expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub value: Frame,
    pub expiry: Option<SystemTime>,
}

/// The keyspace: a map of key to record plus the sampling index, kept in
/// lockstep across every mutation, including the lazy eviction inside the
/// read path.
///
/// The store is plain single-threaded state. It is only ever touched from
/// the reactor thread, behind `Rc<RefCell<_>>`, and no operation suspends.
#[derive(Debug, Default)]
pub struct Store {
    data: HashMap<Bytes, Record>,
    index: KeyIndex,
}

impl Store {
    pub fn new() -> Self {
        Store::default()
    }

    /// Inserts or overwrites `key`. Only bulk strings, integers and lists
    /// reach the store; protocol-only frames are rejected upstream.
    pub fn set(&mut self, key: Bytes, value: Frame, expiry: Option<SystemTime>) {
        debug_assert!(matches!(
            value,
            Frame::Bulk(_) | Frame::Integer(_) | Frame::Array(_)
        ));
        if self.data.insert(key.clone(), Record { value, expiry }).is_none() {
            self.index.append(key);
        }
    }

    /// Looks up `key`, evicting it first if its expiry has passed.
    pub fn get(&mut self, key: &[u8]) -> Option<&Record> {
        self.evict_if_expired(key);
        self.data.get(key)
    }

    /// Mutable variant of [`Store::get`], used by the list commands.
    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut Record> {
        self.evict_if_expired(key);
        self.data.get_mut(key)
    }

    /// Removes `key`, reporting whether a live record existed. A record that
    /// already expired is evicted here too, and counts as absent.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        if self.evict_if_expired(key) {
            return false;
        }
        match self.data.remove(key) {
            Some(_) => {
                self.index.remove(key);
                true
            }
            None => false,
        }
    }

    /// Live key count. Expired-but-unswept entries still count; callers
    /// accept the slight inflation.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// A uniformly random key, cloned out so the caller can re-enter the
    /// store with it.
    pub fn random_key(&self) -> Option<Bytes> {
        self.index.random().cloned()
    }

    fn evict_if_expired(&mut self, key: &[u8]) -> bool {
        let expired = self
            .data
            .get(key)
            .and_then(|record| record.expiry)
            .is_some_and(|at| at < SystemTime::now());
        if expired {
            self.data.remove(key);
            self.index.remove(key);
            debug!(key = %String::from_utf8_lossy(key), "evicted expired key");
        }
        expired
    }

    #[cfg(test)]
    pub(crate) fn index_len(&self) -> usize {
        self.index.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(text: &str) -> Bytes {
        Bytes::copy_from_slice(text.as_bytes())
    }

    fn past() -> SystemTime {
        SystemTime::now() - Duration::from_secs(1)
    }

    fn future() -> SystemTime {
        SystemTime::now() + Duration::from_secs(60)
    }

    #[test]
    fn set_then_get() {
        let mut store = Store::new();
        store.set(key("k"), Frame::bulk("v"), None);
        let record = store.get(b"k").unwrap();
        assert_eq!(Frame::bulk("v"), record.value);
        assert_eq!(None, record.expiry);
    }

    #[test]
    fn get_of_a_missing_key_is_none() {
        assert!(Store::new().get(b"nope").is_none());
    }

    #[test]
    fn overwrite_keeps_a_single_index_entry() {
        let mut store = Store::new();
        store.set(key("k"), Frame::bulk("a"), None);
        store.set(key("k"), Frame::bulk("b"), None);
        assert_eq!(1, store.len());
        assert_eq!(1, store.index_len());
        assert_eq!(Frame::bulk("b"), store.get(b"k").unwrap().value);
    }

    #[test]
    fn expired_record_is_evicted_on_read() {
        let mut store = Store::new();
        store.set(key("k"), Frame::bulk("v"), Some(past()));
        assert!(store.get(b"k").is_none());
        assert_eq!(0, store.len());
        assert_eq!(0, store.index_len());
        assert!(store.random_key().is_none());
    }

    #[test]
    fn future_expiry_is_still_readable() {
        let mut store = Store::new();
        store.set(key("k"), Frame::bulk("v"), Some(future()));
        assert!(store.get(b"k").is_some());
    }

    #[test]
    fn delete_reports_presence() {
        let mut store = Store::new();
        store.set(key("k"), Frame::Integer(1), None);
        assert!(store.delete(b"k"));
        assert!(!store.delete(b"k"));
        assert_eq!(0, store.len());
        assert_eq!(0, store.index_len());
    }

    #[test]
    fn delete_of_an_expired_key_counts_as_absent() {
        let mut store = Store::new();
        store.set(key("k"), Frame::bulk("v"), Some(past()));
        assert!(!store.delete(b"k"));
        assert_eq!(0, store.len());
        assert_eq!(0, store.index_len());
    }

    #[test]
    fn random_key_comes_from_the_live_set() {
        let mut store = Store::new();
        store.set(key("a"), Frame::Integer(1), None);
        store.set(key("b"), Frame::Integer(2), None);
        for _ in 0..50 {
            let k = store.random_key().unwrap();
            assert!(store.get(&k).is_some());
        }
    }

    #[test]
    fn store_and_index_stay_in_lockstep_under_churn() {
        let mut store = Store::new();
        for i in 0..20 {
            store.set(key(&format!("k{i}")), Frame::Integer(i), None);
            assert_eq!(store.len(), store.index_len());
        }
        for i in (0..20).step_by(3) {
            store.delete(format!("k{i}").as_bytes());
            assert_eq!(store.len(), store.index_len());
        }
        store.set(key("k3"), Frame::bulk("back"), None);
        assert_eq!(store.len(), store.index_len());
    }
}
