//! Consistent hash ring for key→peer routing.
//!
//! Each real node contributes `replicas` virtual positions on a circular
//! 32-bit hash space, which smooths load distribution across nodes. A key
//! is owned by the real node behind the first virtual position at or after
//! the key's hash, wrapping at the top of the space.
//!
//! ```text
//!          0 ──────────────────────────► u32::MAX
//!          │   v(B,0)   v(A,1)  v(B,1)   v(A,0)
//!   ring:  ──────┬─────────┬───────┬────────┬────
//!                │         │       │        │
//!   hash(key) ───┘         ▼       │        │
//!                     owner = A    │        │
//! ```
//!
//! Adding a node only remaps keys whose hash falls between the new node's
//! virtual positions and their immediate ring predecessors; everything else
//! keeps its prior owner, which is what makes rebalancing cache-friendly.
//!
//! The hash function is injectable (tests use an identity hash to make ring
//! positions predictable); the default is crc32.

use rustc_hash::FxHashMap;

/// Hash function over raw key bytes.
pub type RingHash = Box<dyn Fn(&[u8]) -> u32 + Send + Sync>;

/// Maps cache keys to owning nodes via virtual-node consistent hashing.
///
/// # Example
///
/// ```
/// use meshcache::ring::HashRing;
///
/// let mut ring = HashRing::new(50);
/// ring.add_nodes(["peer-a", "peer-b", "peer-c"]);
///
/// let owner = ring.get_node("some-key").unwrap().to_owned();
/// // Routing is deterministic until the ring changes.
/// assert_eq!(ring.get_node("some-key"), Some(owner.as_str()));
/// ```
pub struct HashRing {
    hash: RingHash,
    replicas: usize,
    /// Virtual node hashes, kept sorted ascending.
    keys: Vec<u32>,
    /// Virtual hash → real node name.
    nodes: FxHashMap<u32, String>,
}

impl HashRing {
    /// Creates an empty ring with `replicas` virtual nodes per real node,
    /// hashed with crc32.
    pub fn new(replicas: usize) -> Self {
        Self::with_hasher(replicas, Box::new(crc32fast::hash))
    }

    /// Creates an empty ring with an injected hash function.
    pub fn with_hasher(replicas: usize, hash: RingHash) -> Self {
        HashRing {
            hash,
            replicas,
            keys: Vec::new(),
            nodes: FxHashMap::default(),
        }
    }

    /// Adds real nodes to the ring.
    ///
    /// Each node contributes `replicas` virtual entries labeled by the
    /// replica index prefixed to the node name, so distinct replicas of the
    /// same node never collide by construction. May be called repeatedly
    /// for incremental growth; node removal is out of scope.
    pub fn add_nodes<I, S>(&mut self, nodes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for node in nodes {
            let node = node.into();
            for i in 0..self.replicas {
                let virtual_label = format!("{i}{node}");
                let h = (self.hash)(virtual_label.as_bytes());
                self.keys.push(h);
                self.nodes.insert(h, node.clone());
            }
        }
        self.keys.sort_unstable();
    }

    /// Returns the node owning `key`.
    ///
    /// An empty key returns `None` regardless of ring contents, and so does
    /// an empty ring. For a fixed ring the result is deterministic.
    pub fn get_node(&self, key: &str) -> Option<&str> {
        if key.is_empty() || self.keys.is_empty() {
            return None;
        }
        let h = (self.hash)(key.as_bytes());
        // First virtual hash >= h, wrapping to close the ring.
        let idx = self.keys.partition_point(|&v| v < h);
        let idx = if idx == self.keys.len() { 0 } else { idx };
        self.nodes.get(&self.keys[idx]).map(String::as_str)
    }

    /// Returns the number of virtual entries on the ring.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if no nodes have been added.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl std::fmt::Debug for HashRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashRing")
            .field("replicas", &self.replicas)
            .field("virtual_nodes", &self.keys.len())
            .finish_non_exhaustive()
    }
}
