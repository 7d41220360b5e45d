//! meshcache: distributed read-through caching primitives.
//!
//! Each named [`Group`] owns a byte-bounded LRU cache. On a miss the group
//! loads the value either from its local [`Loader`] or from the peer that
//! owns the key on a consistent-hash ring, coalescing concurrent loads for
//! the same key through a single-flight coordinator.
//!
//! ```text
//!   Group::get(key)
//!       │
//!       ├─ cache hit ──────────────────────────────► ByteView
//!       │
//!       └─ miss ─► SingleFlight::execute(key)
//!                      │
//!                      ├─ PeerPicker ─► HashRing ─► remote fetch ─► populate
//!                      │                                │
//!                      │                                └─ failure falls back
//!                      └─ Loader (local) ─► populate ─► ByteView
//! ```
//!
//! The HTTP transport behind the `http` feature is a thin wrapper over the
//! [`PeerPicker`]/[`PeerFetcher`] capability seams; any transport that
//! implements those traits plugs in the same way.

pub mod cache;
pub mod error;
pub mod group;
#[cfg(feature = "http")]
pub mod http;
pub mod lru;
pub mod ring;
pub mod singleflight;
pub mod value;

pub use cache::Cache;
pub use error::{CacheError, GetError, GroupError, LoadError};
pub use group::{
    CancelToken, Group, GroupStats, Loader, PeerFetcher, PeerPicker, Registry, StatsSnapshot,
};
#[cfg(feature = "http")]
pub use http::{HttpFetcher, HttpPool};
pub use lru::LruStore;
pub use ring::HashRing;
pub use singleflight::SingleFlight;
pub use value::ByteView;
