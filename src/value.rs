//! Immutable byte value stored by the cache.
//!
//! [`ByteView`] is the unit of cache storage: an immutable byte buffer that
//! reports its own length for budget accounting. It is backed by `Arc<[u8]>`,
//! so cloning is a reference-count bump, and a view handed to one caller can
//! never mutate the bytes seen by another.

use std::fmt;
use std::sync::Arc;

/// An immutable view of cached bytes.
///
/// # Example
///
/// ```
/// use meshcache::value::ByteView;
///
/// let view = ByteView::from("hello");
/// assert_eq!(view.len(), 5);
/// assert_eq!(view.as_bytes(), b"hello");
///
/// // Clones share the same allocation.
/// let other = view.clone();
/// assert_eq!(view, other);
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct ByteView {
    bytes: Arc<[u8]>,
}

impl ByteView {
    /// Returns the number of bytes in the view.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if the view holds no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Borrows the underlying bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns an owned copy of the bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use meshcache::value::ByteView;
    ///
    /// let view = ByteView::from(vec![1, 2, 3]);
    /// let mut copy = view.to_vec();
    /// copy[0] = 9;
    /// // The view is untouched.
    /// assert_eq!(view.as_bytes(), &[1, 2, 3]);
    /// ```
    #[inline]
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }
}

impl Default for ByteView {
    /// Creates an empty view.
    fn default() -> Self {
        ByteView {
            bytes: Arc::from(&[][..]),
        }
    }
}

impl fmt::Display for ByteView {
    /// Renders the bytes as UTF-8, replacing invalid sequences.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.bytes))
    }
}

impl fmt::Debug for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteView")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(bytes: Vec<u8>) -> Self {
        ByteView {
            bytes: Arc::from(bytes),
        }
    }
}

impl From<&[u8]> for ByteView {
    fn from(bytes: &[u8]) -> Self {
        ByteView {
            bytes: Arc::from(bytes),
        }
    }
}

impl From<String> for ByteView {
    fn from(s: String) -> Self {
        ByteView::from(s.into_bytes())
    }
}

impl From<&str> for ByteView {
    fn from(s: &str) -> Self {
        ByteView::from(s.as_bytes())
    }
}
