//! Thread-safe wrapper around the LRU store.
//!
//! Serializes every store operation behind a single `parking_lot::Mutex`.
//! Coarse-grained on purpose: each operation is O(1), so the lock hold time
//! is bounded, and a read/write split would buy nothing because `get`
//! itself mutates recency order.

use parking_lot::Mutex;

use crate::error::CacheError;
use crate::lru::LruStore;
use crate::value::ByteView;

/// A concurrency-safe, byte-bounded LRU cache.
///
/// Within one `Cache` instance, `get`/`set`/`delete` observe a total order.
/// Different instances (different groups) are unrelated.
///
/// # Example
///
/// ```
/// use meshcache::cache::Cache;
/// use meshcache::value::ByteView;
///
/// let cache = Cache::new(1024);
/// cache.set("k", ByteView::from("v")).unwrap();
/// assert_eq!(cache.get("k"), Some(ByteView::from("v")));
/// ```
pub struct Cache {
    store: Mutex<LruStore>,
}

impl Cache {
    /// Creates a cache with the given byte budget (0 = unbounded).
    pub fn new(max_bytes: usize) -> Self {
        Cache {
            store: Mutex::new(LruStore::new(max_bytes)),
        }
    }

    /// Looks up a key, promoting it to most-recently-used on a hit.
    ///
    /// Returns a cheap clone of the stored view; the underlying bytes are
    /// shared, not copied.
    pub fn get(&self, key: &str) -> Option<ByteView> {
        self.store.lock().get(key).cloned()
    }

    /// Inserts or updates an entry, evicting as needed.
    pub fn set(&self, key: &str, value: ByteView) -> Result<(), CacheError> {
        self.store.lock().set(key, value)
    }

    /// Removes an entry if present.
    pub fn delete(&self, key: &str) {
        self.store.lock().delete(key)
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    /// Returns `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }

    /// Returns the bytes currently charged against the budget.
    pub fn used_bytes(&self) -> usize {
        self.store.lock().used_bytes()
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let store = self.store.lock();
        f.debug_struct("Cache")
            .field("len", &store.len())
            .field("used_bytes", &store.used_bytes())
            .field("max_bytes", &store.max_bytes())
            .finish_non_exhaustive()
    }
}
