//! Byte-bounded LRU store.
//!
//! Single-threaded core with no internal locking; thread safety is provided
//! by the [`Cache`](crate::cache::Cache) wrapper.
//!
//! ## Architecture
//!
//! ```text
//!   ┌─────────────────────────────────────────────────────────────┐
//!   │                       LruStore                              │
//!   │                                                             │
//!   │   FxHashMap<String, usize>          slots: Vec<Option<Slot>>│
//!   │   ┌───────┬───────┐                ┌───┬──────────────────┐ │
//!   │   │ key   │ index │                │ 0 │ {key, value,     │ │
//!   │   ├───────┼───────┤                │   │  prev, next}     │ │
//!   │   │ "a"   │   0 ──┼──────────────► │ 1 │ ...              │ │
//!   │   │ "b"   │   1   │                │ 2 │ None (free list) │ │
//!   │   └───────┴───────┘                └───┴──────────────────┘ │
//!   │                                                             │
//!   │   head (MRU) ──► [0] ◄──► [1] ◄──► [3] ◄── tail (LRU)       │
//!   └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entries live in an array-backed doubly-linked structure: the index map
//! points at a stable slot position, and recency order is maintained through
//! `prev`/`next` slot indices. No raw pointers, no per-node allocation after
//! a slot has been freed once.
//!
//! ## Byte accounting
//!
//! `max_bytes == 0` means unbounded. Each entry charges
//! `key.len() + value.len()` against the budget; `set` evicts from the LRU
//! end, one entry at a time, until the new entry fits. An entry that could
//! never fit on its own is rejected with
//! [`CacheError::EntryTooLarge`] before anything is evicted.
//!
//! | Operation | Complexity | Effect on recency            |
//! |-----------|------------|------------------------------|
//! | `get`     | O(1)       | promotes to MRU              |
//! | `set`     | O(1)*      | inserts/updates at MRU       |
//! | `delete`  | O(1)       | removes, fires callback      |
//!
//! \* amortized; eviction pops at most as many entries as were inserted.

use rustc_hash::FxHashMap;

use crate::error::CacheError;
use crate::value::ByteView;

/// Callback invoked with the key and value of every removed entry, whether
/// removed by [`LruStore::delete`] or evicted during [`LruStore::set`].
pub type EvictionCallback = Box<dyn FnMut(&str, &ByteView) + Send>;

struct Slot {
    key: String,
    value: ByteView,
    prev: Option<usize>,
    next: Option<usize>,
}

/// A byte-bounded key/value store with least-recently-used eviction.
///
/// # Example
///
/// ```
/// use meshcache::lru::LruStore;
/// use meshcache::value::ByteView;
///
/// let mut store = LruStore::new(10);
/// store.set("1", ByteView::from("1000")).unwrap();
/// store.set("2", ByteView::from("2000")).unwrap();
/// store.set("3", ByteView::from("3000")).unwrap();
///
/// // 5 + 5 + 5 bytes exceed the 10-byte budget: "1" was evicted.
/// assert!(store.get("1").is_none());
/// assert!(store.get("2").is_some());
/// assert!(store.get("3").is_some());
/// assert!(store.used_bytes() <= 10);
/// ```
pub struct LruStore {
    max_bytes: usize,
    used_bytes: usize,
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    index: FxHashMap<String, usize>,
    on_evicted: Option<EvictionCallback>,
}

impl LruStore {
    /// Creates a store with the given byte budget. A budget of 0 means
    /// unbounded.
    pub fn new(max_bytes: usize) -> Self {
        LruStore {
            max_bytes,
            used_bytes: 0,
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            index: FxHashMap::default(),
            on_evicted: None,
        }
    }

    /// Creates a store that invokes `on_evicted` for every removed entry.
    ///
    /// The callback fires for explicit [`delete`](Self::delete) calls and
    /// for evictions triggered inside [`set`](Self::set).
    pub fn with_eviction_callback(max_bytes: usize, on_evicted: EvictionCallback) -> Self {
        LruStore {
            on_evicted: Some(on_evicted),
            ..LruStore::new(max_bytes)
        }
    }

    /// Returns the number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if the store holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns the bytes currently charged against the budget.
    #[inline]
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    /// Returns the configured byte budget (0 = unbounded).
    #[inline]
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Looks up a key, promoting the entry to most-recently-used.
    ///
    /// Promotion postpones eviction: after a `get`, the entry is the last
    /// candidate for removal.
    pub fn get(&mut self, key: &str) -> Option<&ByteView> {
        let idx = *self.index.get(key)?;
        self.detach(idx);
        self.attach_front(idx);
        self.slots[idx].as_ref().map(|slot| &slot.value)
    }

    /// Inserts or updates an entry at the most-recently-used position.
    ///
    /// Evicts from the least-recently-used end until the entry fits. Fails
    /// with [`CacheError::EntryTooLarge`] when the pair alone exceeds the
    /// budget; nothing is evicted in that case.
    ///
    /// # Example
    ///
    /// ```
    /// use meshcache::lru::LruStore;
    /// use meshcache::value::ByteView;
    ///
    /// let mut store = LruStore::new(4);
    /// let err = store.set("key", ByteView::from("value")).unwrap_err();
    /// assert!(err.to_string().contains("exceeds"));
    /// ```
    pub fn set(&mut self, key: &str, value: ByteView) -> Result<(), CacheError> {
        let entry_size = key.len() + value.len();
        if self.max_bytes != 0 && entry_size > self.max_bytes {
            return Err(CacheError::EntryTooLarge {
                required: entry_size,
                max_bytes: self.max_bytes,
            });
        }

        let existing = self.index.get(key).copied();
        let delta = match existing {
            Some(idx) => {
                // Promote before the eviction scan so the entry being
                // updated can never be its own victim.
                self.detach(idx);
                self.attach_front(idx);
                let old_len = self.slots[idx].as_ref().map(|s| s.value.len()).unwrap_or(0);
                value.len() as isize - old_len as isize
            }
            None => entry_size as isize,
        };

        while self.max_bytes != 0 && self.used_bytes as isize + delta > self.max_bytes as isize {
            if !self.evict_lru() {
                break;
            }
        }

        match existing {
            Some(idx) => {
                if let Some(slot) = self.slots[idx].as_mut() {
                    slot.value = value;
                }
            }
            None => {
                let idx = self.alloc(Slot {
                    key: key.to_owned(),
                    value,
                    prev: None,
                    next: None,
                });
                self.index.insert(key.to_owned(), idx);
                self.attach_front(idx);
            }
        }
        self.used_bytes = (self.used_bytes as isize + delta) as usize;

        #[cfg(debug_assertions)]
        self.debug_validate();

        Ok(())
    }

    /// Removes an entry if present, firing the eviction callback.
    pub fn delete(&mut self, key: &str) {
        if let Some(idx) = self.index.get(key).copied() {
            self.remove_slot(idx);
        }

        #[cfg(debug_assertions)]
        self.debug_validate();
    }

    /// Evicts the least-recently-used entry. Returns `false` when empty.
    fn evict_lru(&mut self) -> bool {
        match self.tail {
            Some(idx) => {
                self.remove_slot(idx);
                true
            }
            None => false,
        }
    }

    fn remove_slot(&mut self, idx: usize) {
        self.detach(idx);
        let Some(slot) = self.slots[idx].take() else {
            return;
        };
        self.free.push(idx);
        self.index.remove(&slot.key);
        self.used_bytes -= slot.key.len() + slot.value.len();
        if let Some(cb) = self.on_evicted.as_mut() {
            cb(&slot.key, &slot.value);
        }
    }

    fn alloc(&mut self, slot: Slot) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(slot);
                idx
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        }
    }

    /// Unlinks a slot from the recency list without freeing it.
    fn detach(&mut self, idx: usize) {
        let (prev, next) = match self.slots.get(idx).and_then(Option::as_ref) {
            Some(slot) => (slot.prev, slot.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(slot) = self.slots[p].as_mut() {
                    slot.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(slot) = self.slots[n].as_mut() {
                    slot.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(slot) = self.slots[idx].as_mut() {
            slot.prev = None;
            slot.next = None;
        }
    }

    /// Links a detached slot at the most-recently-used position.
    fn attach_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(slot) = self.slots[idx].as_mut() {
            slot.prev = None;
            slot.next = old_head;
        }
        match old_head {
            Some(h) => {
                if let Some(slot) = self.slots[h].as_mut() {
                    slot.prev = Some(idx);
                }
            }
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
    }

    /// Walks the recency list and checks it against the index and the byte
    /// counter (debug builds only).
    #[cfg(debug_assertions)]
    fn debug_validate(&self) {
        let mut count = 0usize;
        let mut bytes = 0usize;
        let mut current = self.head;
        while let Some(idx) = current {
            let slot = match self.slots.get(idx).and_then(Option::as_ref) {
                Some(slot) => slot,
                None => panic!("dangling slot index {idx} in recency list"),
            };
            count += 1;
            bytes += slot.key.len() + slot.value.len();
            assert!(count <= self.index.len(), "cycle in recency list");
            current = slot.next;
        }
        assert_eq!(count, self.index.len(), "list/index length mismatch");
        assert_eq!(bytes, self.used_bytes, "byte accounting drift");
    }
}

impl std::fmt::Debug for LruStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruStore")
            .field("len", &self.len())
            .field("used_bytes", &self.used_bytes)
            .field("max_bytes", &self.max_bytes)
            .finish_non_exhaustive()
    }
}
