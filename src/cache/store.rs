//! Cache storage backends.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

/// Default number of entries kept by [`MemoryStore`].
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Seconds since the Unix epoch.
#[inline]
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A stored value with its modification time and optional expiry.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    /// Serialized value.
    pub value: Bytes,
    /// Unix time the entry was written.
    pub mtime: u64,
    /// Unix time after which the entry is gone (None = never).
    pub expires_at: Option<u64>,
}

impl CacheEntry {
    #[inline]
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Key/value backend behind [`super::Cache`].
pub trait CacheStore: Send + Sync {
    /// Fetch a live entry.
    fn get(&self, key: &str) -> Option<CacheEntry>;

    /// Store an entry, replacing any previous one.
    fn set(&self, key: &str, entry: CacheEntry);

    /// Delete an entry. Returns true if one was present.
    fn remove(&self, key: &str) -> bool;

    /// Check for a live entry.
    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Drop everything.
    fn clear(&self);

    /// Number of stored entries (expired ones may still be counted).
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct Inner {
    /// Entry and its last-use tick.
    entries: HashMap<String, (CacheEntry, u64)>,
    /// Last-use tick to key, least recently used first.
    order: BTreeMap<u64, String>,
    tick: u64,
}

impl Inner {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Mark `key` as most recently used.
    fn touch(&mut self, key: &str) {
        let tick = self.next_tick();
        if let Some((_, used)) = self.entries.get_mut(key) {
            let previous = std::mem::replace(used, tick);
            if let Some(key) = self.order.remove(&previous) {
                self.order.insert(tick, key);
            }
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let (entry, used) = self.entries.remove(key)?;
        self.order.remove(&used);
        Some(entry)
    }
}

/// In-process store.
///
/// Thread-safe with RwLock. Expired entries are dropped on read; when full the
/// least recently used entry is evicted. Reads and writes both count as use.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    capacity: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            capacity: capacity.max(1),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = now_secs();
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match inner.entries.get(key) {
            Some((entry, _)) if !entry.is_expired(now) => {
                let entry = entry.clone();
                inner.touch(key);
                Some(entry)
            }
            Some(_) => {
                inner.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: &str, entry: CacheEntry) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.remove(key);

        let tick = inner.next_tick();
        inner.entries.insert(key.to_string(), (entry, tick));
        inner.order.insert(tick, key.to_string());

        while inner.entries.len() > self.capacity {
            let Some((_, oldest)) = inner.order.pop_first() else {
                break;
            };
            inner.entries.remove(&oldest);
        }
    }

    fn remove(&self, key: &str) -> bool {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.entries.clear();
        inner.order.clear();
    }

    fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(value: &'static str, expires_at: Option<u64>) -> CacheEntry {
        CacheEntry {
            value: Bytes::from_static(value.as_bytes()),
            mtime: now_secs(),
            expires_at,
        }
    }

    #[test]
    fn test_set_get_remove() {
        let store = MemoryStore::new();
        store.set("a", entry("1", None));

        assert_eq!(store.get("a").unwrap().value.as_ref(), b"1");
        assert!(store.has("a"));
        assert!(store.remove("a"));
        assert!(!store.remove("a"));
        assert!(store.get("a").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_expired_entries_are_misses() {
        let store = MemoryStore::new();
        store.set("old", entry("x", Some(now_secs() - 1)));
        store.set("live", entry("y", Some(now_secs() + 60)));

        assert!(store.get("old").is_none());
        assert!(!store.has("old"));
        assert!(store.get("live").is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let store = MemoryStore::with_capacity(2);
        store.set("a", entry("1", None));
        store.set("b", entry("2", None));
        // Reading "a" makes "b" the eviction candidate
        assert!(store.get("a").is_some());
        store.set("c", entry("3", None));

        assert!(store.get("b").is_none());
        assert!(store.get("a").is_some());
        assert!(store.get("c").is_some());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_overwrite_counts_as_use() {
        let store = MemoryStore::with_capacity(2);
        store.set("a", entry("1", None));
        store.set("b", entry("2", None));
        store.set("a", entry("3", None));
        store.set("c", entry("4", None));

        assert_eq!(store.get("a").unwrap().value.as_ref(), b"3");
        assert!(store.get("b").is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_hot_entry_survives_a_flood() {
        let store = MemoryStore::with_capacity(100);
        store.set("session", entry("s", None));
        for n in 0..1_000 {
            store.set(&format!("memo:{}", n), entry("m", None));
            if n % 50 == 0 {
                assert!(store.get("session").is_some(), "evicted at {}", n);
            }
        }
        assert!(store.get("session").is_some());
        assert_eq!(store.len(), 100);
    }

    #[test]
    fn test_clear() {
        let store = MemoryStore::new();
        store.set("a", entry("1", None));
        store.clear();
        assert!(store.is_empty());
    }
}
