//! Named cache groups and the read-through load pipeline.
//!
//! A [`Group`] is a namespace: its keys, byte budget, and loader are
//! independent of every other group's. `Group::get` walks a fixed state
//! machine:
//!
//! ```text
//!   get(key)
//!     ├─ "" ────────────────────────► empty ByteView
//!     ├─ cache hit ─────────────────► cached ByteView
//!     └─ miss ─► singleflight ─┬─ peer owns key ─► fetch ─► populate
//!                              │        └─ fetch failed ──┐
//!                              └─ local loader ◄──────────┘
//!                                     └─► populate ─► ByteView
//! ```
//!
//! The entire load (peer routing included) runs inside the single-flight
//! window, so a key being loaded is loaded exactly once no matter how many
//! callers arrive or which path the load takes.
//!
//! Peer awareness is optional and injected after construction through
//! [`Group::register_peer_picker`]; a group without a picker is a plain
//! local read-through cache.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::cache::Cache;
use crate::error::{GetError, GroupError, LoadError};
use crate::singleflight::SingleFlight;
use crate::value::ByteView;

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag shared between a caller and the loaders
/// and fetchers working on its behalf.
///
/// Cancelling is advisory: capabilities observe the flag at their own
/// checkpoints and return a [`LoadError`] when they honor it. Clones share
/// the same flag.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` once [`cancel`](CancelToken::cancel) has been called
    /// on this token or any clone of it.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Source of truth for a group's data.
///
/// Invoked on a cache miss when no peer owns the key or the peer fetch
/// failed. Implementations must be safe to call from multiple threads,
/// though the single-flight window means at most one call per key is in
/// flight at a time within one group.
pub trait Loader: Send + Sync {
    /// Produces the value bytes for `key`, or an error if the key cannot
    /// be resolved. `cancel` may be observed to abandon slow work.
    fn load(&self, key: &str, cancel: &CancelToken) -> Result<Vec<u8>, LoadError>;
}

/// Adapter so plain closures serve as loaders.
///
/// ```
/// use meshcache::group::Loader;
/// use meshcache::error::LoadError;
///
/// let loader = |key: &str| -> Result<Vec<u8>, LoadError> {
///     Ok(format!("value-of-{key}").into_bytes())
/// };
/// let _: &dyn Loader = &loader;
/// ```
impl<F> Loader for F
where
    F: Fn(&str) -> Result<Vec<u8>, LoadError> + Send + Sync,
{
    fn load(&self, key: &str, _cancel: &CancelToken) -> Result<Vec<u8>, LoadError> {
        self(key)
    }
}

/// Fetches a value from one specific remote peer.
pub trait PeerFetcher: Send + Sync {
    /// Retrieves `key` from the remote peer's `group`.
    fn fetch(&self, group: &str, key: &str, cancel: &CancelToken) -> Result<Vec<u8>, LoadError>;
}

/// Decides which peer, if any, owns a key.
///
/// Must be pure with respect to cache state: the decision depends only on
/// the key and the current peer topology. `None` means "load locally",
/// covering both "no peers configured" and "this node owns the key".
pub trait PeerPicker: Send + Sync {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerFetcher>>;
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Monotonic operation counters for one group.
///
/// Counters are relaxed atomics: cheap to bump on the hot path, read via
/// [`GroupStats::snapshot`]. A snapshot is internally consistent only in
/// the sense that each counter is read once; it is not a transaction.
#[derive(Debug, Default)]
pub struct GroupStats {
    gets: AtomicU64,
    cache_hits: AtomicU64,
    loads: AtomicU64,
    local_loads: AtomicU64,
    local_load_errors: AtomicU64,
    peer_loads: AtomicU64,
    peer_errors: AtomicU64,
}

/// Point-in-time copy of a group's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Total `get` calls, including hits.
    pub gets: u64,
    /// Gets answered from the local cache.
    pub cache_hits: u64,
    /// Loads started after single-flight dedup.
    pub loads: u64,
    /// Loads satisfied by the local loader.
    pub local_loads: u64,
    /// Local loader failures.
    pub local_load_errors: u64,
    /// Loads satisfied by a remote peer.
    pub peer_loads: u64,
    /// Peer fetches that failed and fell back to the local loader.
    pub peer_errors: u64,
}

impl GroupStats {
    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads every counter once and returns the copies.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            gets: self.gets.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            local_loads: self.local_loads.load(Ordering::Relaxed),
            local_load_errors: self.local_load_errors.load(Ordering::Relaxed),
            peer_loads: self.peer_loads.load(Ordering::Relaxed),
            peer_errors: self.peer_errors.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A named read-through cache.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use meshcache::group::Group;
/// use meshcache::error::LoadError;
///
/// let group = Group::new("scores", 1 << 20, Arc::new(|key: &str| {
///     match key {
///         "Tom" => Ok(b"630".to_vec()),
///         _ => Err(LoadError::new(format!("{key} not found"))),
///     }
/// }));
///
/// assert_eq!(group.get("Tom").unwrap().as_bytes(), b"630");
/// assert!(group.get("Sam").is_err());
/// ```
pub struct Group {
    name: String,
    loader: Arc<dyn Loader>,
    cache: Cache,
    peers: OnceLock<Arc<dyn PeerPicker>>,
    flight: SingleFlight<Result<ByteView, GetError>>,
    stats: GroupStats,
}

impl Group {
    /// Creates a group with the given byte budget (0 = unbounded) and
    /// loader. The loader is mandatory; there is no unloadable group.
    pub fn new(name: impl Into<String>, max_bytes: usize, loader: Arc<dyn Loader>) -> Self {
        Group {
            name: name.into(),
            loader,
            cache: Cache::new(max_bytes),
            peers: OnceLock::new(),
            flight: SingleFlight::new(),
            stats: GroupStats::default(),
        }
    }

    /// Returns the group's name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the group's cache, mainly for introspection in tests and
    /// admin surfaces.
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Returns a snapshot of the group's counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Wires in peer routing. At most once per group; a second call
    /// returns [`GroupError::AlreadyRegistered`] and leaves the first
    /// picker in place.
    pub fn register_peer_picker(&self, picker: Arc<dyn PeerPicker>) -> Result<(), GroupError> {
        self.peers
            .set(picker)
            .map_err(|_| GroupError::AlreadyRegistered(self.name.clone()))
    }

    /// Looks up `key`, loading it on a miss.
    ///
    /// The empty key is always present with an empty value. A successful
    /// load populates the cache, so a repeat `get` is a hit.
    pub fn get(&self, key: &str) -> Result<ByteView, GetError> {
        self.get_with(key, &CancelToken::new())
    }

    /// Like [`get`](Group::get), with a caller-supplied cancellation
    /// token passed through to the loader or peer fetcher.
    ///
    /// Cancellation is cooperative: an already-cached value is returned
    /// even if the token is cancelled, and a load observes the token only
    /// at the capability's own checkpoints.
    pub fn get_with(&self, key: &str, cancel: &CancelToken) -> Result<ByteView, GetError> {
        GroupStats::bump(&self.stats.gets);

        if key.is_empty() {
            return Ok(ByteView::default());
        }

        if let Some(view) = self.cache.get(key) {
            GroupStats::bump(&self.stats.cache_hits);
            debug!(group = %self.name, key, "cache hit");
            return Ok(view);
        }

        self.load(key, cancel)
    }

    /// Runs the full load pipeline for a missing key, coalesced so that
    /// concurrent misses on the same key share one execution.
    fn load(&self, key: &str, cancel: &CancelToken) -> Result<ByteView, GetError> {
        self.flight.execute(key, || {
            GroupStats::bump(&self.stats.loads);

            if cancel.is_cancelled() {
                return Err(LoadError::new("load cancelled").into());
            }

            if let Some(picker) = self.peers.get() {
                if let Some(fetcher) = picker.pick_peer(key) {
                    match fetcher.fetch(&self.name, key, cancel) {
                        Ok(bytes) => {
                            GroupStats::bump(&self.stats.peer_loads);
                            debug!(group = %self.name, key, "loaded from peer");
                            return self.populate(key, ByteView::from(bytes));
                        }
                        Err(err) => {
                            GroupStats::bump(&self.stats.peer_errors);
                            warn!(
                                group = %self.name,
                                key,
                                error = %err,
                                "peer fetch failed, falling back to local loader"
                            );
                        }
                    }
                }
            }

            self.load_local(key, cancel)
        })
    }

    /// Invokes the local loader and populates the cache on success.
    fn load_local(&self, key: &str, cancel: &CancelToken) -> Result<ByteView, GetError> {
        match self.loader.load(key, cancel) {
            Ok(bytes) => {
                GroupStats::bump(&self.stats.local_loads);
                debug!(group = %self.name, key, len = bytes.len(), "loaded locally");
                self.populate(key, ByteView::from(bytes))
            }
            Err(err) => {
                GroupStats::bump(&self.stats.local_load_errors);
                Err(err.into())
            }
        }
    }

    /// Admits a freshly loaded value. An oversized entry is an error the
    /// caller sees, not a silent drop.
    fn populate(&self, key: &str, value: ByteView) -> Result<ByteView, GetError> {
        self.cache.set(key, value.clone())?;
        Ok(value)
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name)
            .field("cache", &self.cache)
            .field("has_peers", &self.peers.get().is_some())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Collection of groups addressed by name.
///
/// An explicit value rather than a process-global: callers own their
/// registry and pass it where it is needed, and two registries never
/// interfere. Lookups take a read lock; creation takes the write lock.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use meshcache::group::Registry;
///
/// let registry = Registry::new();
/// let group = registry
///     .new_group("pages", 64 * 1024, Arc::new(|key: &str| Ok(key.as_bytes().to_vec())))
///     .unwrap();
///
/// assert!(Arc::ptr_eq(&group, &registry.get("pages").unwrap()));
/// assert!(registry.get("missing").is_none());
/// ```
pub struct Registry {
    groups: RwLock<FxHashMap<String, Arc<Group>>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Registry {
            groups: RwLock::new(FxHashMap::default()),
        }
    }

    /// Creates and registers a group.
    ///
    /// Fails with [`GroupError::DuplicateGroup`] if the name is taken;
    /// the existing group is untouched.
    pub fn new_group(
        &self,
        name: impl Into<String>,
        max_bytes: usize,
        loader: Arc<dyn Loader>,
    ) -> Result<Arc<Group>, GroupError> {
        let name = name.into();
        let mut groups = self.groups.write();
        if groups.contains_key(&name) {
            return Err(GroupError::DuplicateGroup(name));
        }
        let group = Arc::new(Group::new(name.clone(), max_bytes, loader));
        groups.insert(name, Arc::clone(&group));
        Ok(group)
    }

    /// Looks up a group by name.
    pub fn get(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.read().get(name).cloned()
    }

    /// Returns the number of registered groups.
    pub fn len(&self) -> usize {
        self.groups.read().len()
    }

    /// Returns `true` if no groups are registered.
    pub fn is_empty(&self) -> bool {
        self.groups.read().is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let groups = self.groups.read();
        let mut names: Vec<&str> = groups.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("Registry")
            .field("groups", &names)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
