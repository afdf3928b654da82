//! Key/value cache for configuration, sessions and rendered responses.
//!
//! [`Cache`] serializes values as JSON into a pluggable [`CacheStore`] and
//! namespaces every key as `<namespace>:<host>:<revision>:<key>`, so a new
//! deployment revision never reads entries written by the previous one.
//!
//! TTL semantics for [`Cache::set`]:
//!
//! | ttl   | effect                                         |
//! |-------|------------------------------------------------|
//! | `-1`  | not stored                                     |
//! | `0` or other negatives | stored without expiry         |
//! | `n>0` | stored for a random `[ceil(.75n), floor(1.25n)]` seconds |

mod store;

pub use store::{now_secs, CacheEntry, CacheStore, MemoryStore, DEFAULT_CAPACITY};

use std::sync::Arc;

use bytes::Bytes;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace};

use crate::core::Result;

/// TTL that keeps a value out of the cache.
pub const NEVER: i64 = -1;

/// TTL for values that never expire.
pub const NO_EXPIRY: i64 = 0;

/// Randomize a TTL by ±25% so entries written together do not expire together.
pub fn jitter_ttl(ttl: u64) -> u64 {
    let low = (ttl as f64 * 0.75).ceil() as u64;
    let high = (ttl as f64 * 1.25).floor() as u64;
    if high <= low {
        return low.max(1);
    }
    rand::thread_rng().gen_range(low..=high)
}

/// Namespaced, serializing cache facade.
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
    namespace: Arc<str>,
    host: Arc<str>,
    revision: Arc<str>,
}

impl Cache {
    /// Create a cache over `store`.
    pub fn new(store: Arc<dyn CacheStore>, namespace: &str, revision: &str) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            host: "".into(),
            revision: revision.into(),
        }
    }

    /// In-memory cache, mostly for tests.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), "tokio_mvc", crate::PKG_VERSION)
    }

    /// Facade scoped to one site host, sharing this cache's store.
    pub fn for_host(&self, host: &str) -> Self {
        Self {
            store: Arc::clone(&self.store),
            namespace: Arc::clone(&self.namespace),
            host: host.into(),
            revision: Arc::clone(&self.revision),
        }
    }

    /// The host this facade is scoped to (empty for the root facade).
    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Fully qualified store key.
    pub fn key(&self, key: &str) -> String {
        format!(
            "{}:{}:{}:{}",
            self.namespace, self.host, self.revision, key
        )
    }

    /// Fetch a value and the Unix time it was written.
    ///
    /// Entries that no longer deserialize into `T` count as misses.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<(T, u64)> {
        let full_key = self.key(key);
        let Some(entry) = self.store.get(&full_key) else {
            trace!(key = %full_key, "cache miss");
            return None;
        };
        match serde_json::from_slice(&entry.value) {
            Ok(value) => Some((value, entry.mtime)),
            Err(e) => {
                debug!(key = %full_key, error = %e, "discarding undecodable cache entry");
                None
            }
        }
    }

    /// Fetch a value, ignoring its mtime.
    pub fn get_value<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).map(|(value, _)| value)
    }

    /// Store a value. Returns false when `ttl` is [`NEVER`].
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: i64) -> Result<bool> {
        if ttl == NEVER {
            return Ok(false);
        }

        let now = now_secs();
        let expires_at = (ttl > 0).then(|| now + jitter_ttl(ttl as u64));
        let entry = CacheEntry {
            value: Bytes::from(serde_json::to_vec(value)?),
            mtime: now,
            expires_at,
        };

        let full_key = self.key(key);
        trace!(key = %full_key, ttl = ttl, "cache set");
        self.store.set(&full_key, entry);
        Ok(true)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.store.remove(&self.key(key))
    }

    pub fn has(&self, key: &str) -> bool {
        self.store.has(&self.key(key))
    }

    /// Drop every entry in the underlying store (all hosts).
    pub fn clear(&self) {
        self.store.clear();
    }
}
