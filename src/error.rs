//! Error types for the meshcache library.
//!
//! ## Taxonomy
//!
//! | Type                          | Raised at      | Recovery                          |
//! |-------------------------------|----------------|-----------------------------------|
//! | [`CacheError::EntryTooLarge`] | request time   | none; capacity misconfiguration   |
//! | [`LoadError`]                 | request time   | peer failures fall back to local  |
//! | [`GetError`]                  | request time   | propagated to the `get` caller    |
//! | [`GroupError`]                | configuration  | raised at setup, never deferred   |
//!
//! Request-time errors are `Clone` so that single-flight waiters can all
//! observe the same outcome as the caller that actually executed the load.

use std::fmt;

// ---------------------------------------------------------------------------
// CacheError
// ---------------------------------------------------------------------------

/// Error returned by the cache store when an entry cannot be admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A single key/value pair exceeds the cache's byte budget on its own;
    /// no amount of eviction can make it fit.
    EntryTooLarge {
        /// Bytes the entry needs: `key.len() + value.len()`.
        required: usize,
        /// The store's configured budget.
        max_bytes: usize,
    },
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::EntryTooLarge {
                required,
                max_bytes,
            } => write!(
                f,
                "entry of {required} bytes exceeds cache budget of {max_bytes} bytes"
            ),
        }
    }
}

impl std::error::Error for CacheError {}

// ---------------------------------------------------------------------------
// LoadError
// ---------------------------------------------------------------------------

/// Error produced by a [`Loader`](crate::group::Loader) or
/// [`PeerFetcher`](crate::group::PeerFetcher).
///
/// Carries a human-readable description; the core does not distinguish
/// "not found" from other load failures.
///
/// # Example
///
/// ```
/// use meshcache::error::LoadError;
///
/// let err = LoadError::new("no such row");
/// assert_eq!(err.to_string(), "no such row");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadError(String);

impl LoadError {
    /// Creates a new `LoadError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for LoadError {}

// ---------------------------------------------------------------------------
// GetError
// ---------------------------------------------------------------------------

/// Error returned by [`Group::get`](crate::group::Group::get).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetError {
    /// The loaded value could not be admitted into the cache. Denotes a
    /// capacity bound misconfigured relative to entry sizes.
    Cache(CacheError),
    /// The local loader (or, with no local fallback left, a peer) failed to
    /// resolve the key. Propagated verbatim from the capability.
    Load(LoadError),
}

impl fmt::Display for GetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GetError::Cache(err) => write!(f, "cache populate failed: {err}"),
            GetError::Load(err) => write!(f, "load failed: {err}"),
        }
    }
}

impl std::error::Error for GetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GetError::Cache(err) => Some(err),
            GetError::Load(err) => Some(err),
        }
    }
}

impl From<CacheError> for GetError {
    fn from(err: CacheError) -> Self {
        GetError::Cache(err)
    }
}

impl From<LoadError> for GetError {
    fn from(err: LoadError) -> Self {
        GetError::Load(err)
    }
}

// ---------------------------------------------------------------------------
// GroupError
// ---------------------------------------------------------------------------

/// Configuration-time error raised at group construction or registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupError {
    /// A group with this name is already registered.
    DuplicateGroup(String),
    /// A peer picker was already registered for this group.
    AlreadyRegistered(String),
}

impl fmt::Display for GroupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupError::DuplicateGroup(name) => write!(f, "group {name:?} already exists"),
            GroupError::AlreadyRegistered(name) => {
                write!(f, "peer picker already registered for group {name:?}")
            }
        }
    }
}

impl std::error::Error for GroupError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
