//! End-to-end read-through flows across the registry, group, ring, and
//! single-flight layers, with an in-process fake transport standing in for
//! HTTP.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use meshcache::{
    ByteView, CancelToken, GetError, HashRing, LoadError, Loader, PeerFetcher, PeerPicker,
    Registry,
};

fn score_loader(calls: Arc<AtomicUsize>) -> Arc<dyn Loader> {
    Arc::new(move |key: &str| {
        calls.fetch_add(1, Ordering::SeqCst);
        match key {
            "Tom" => Ok(b"630".to_vec()),
            "Jack" => Ok(b"589".to_vec()),
            "Sam" => Ok(b"567".to_vec()),
            _ => Err(LoadError::new(format!("{key} not exist"))),
        }
    })
}

#[test]
fn cold_keys_load_once_and_stay_hot() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = Registry::new();
    let group = registry
        .new_group("scores", 2 << 10, score_loader(Arc::clone(&calls)))
        .unwrap();

    for key in ["Tom", "Jack", "Sam"] {
        let first = group.get(key).unwrap();
        let second = group.get(key).unwrap();
        assert_eq!(first, second);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let stats = group.stats();
    assert_eq!(stats.gets, 6);
    assert_eq!(stats.cache_hits, 3);
    assert_eq!(stats.local_loads, 3);
}

#[test]
fn groups_in_one_registry_are_isolated() {
    let registry = Registry::new();
    let upper = registry
        .new_group(
            "upper",
            0,
            Arc::new(|key: &str| Ok(key.to_uppercase().into_bytes())),
        )
        .unwrap();
    let lower = registry
        .new_group(
            "lower",
            0,
            Arc::new(|key: &str| Ok(key.to_lowercase().into_bytes())),
        )
        .unwrap();

    assert_eq!(upper.get("MiXeD").unwrap().as_bytes(), b"MIXED");
    assert_eq!(lower.get("MiXeD").unwrap().as_bytes(), b"mixed");
    assert_eq!(upper.cache().len(), 1);
    assert_eq!(lower.cache().len(), 1);
}

#[test]
fn concurrent_cold_gets_coalesce_into_one_load() {
    const CALLERS: usize = 12;

    let calls = Arc::new(AtomicUsize::new(0));
    let loader_calls = Arc::clone(&calls);
    let registry = Registry::new();
    let group = registry
        .new_group(
            "slow",
            2 << 10,
            Arc::new(move |key: &str| {
                loader_calls.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(80));
                Ok(format!("value:{key}").into_bytes())
            }),
        )
        .unwrap();

    let barrier = Arc::new(Barrier::new(CALLERS));
    let mut handles = Vec::new();
    for _ in 0..CALLERS {
        let group = Arc::clone(&group);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            group.get("popular")
        }));
    }
    for handle in handles {
        assert_eq!(
            handle.join().unwrap().unwrap().as_bytes(),
            b"value:popular"
        );
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn tight_budget_evicts_but_reloads_transparently() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = Registry::new();
    // Budget fits roughly one entry, so alternating keys thrash.
    let group = registry
        .new_group("tight", 8, score_loader(Arc::clone(&calls)))
        .unwrap();

    assert_eq!(group.get("Tom").unwrap().as_bytes(), b"630");
    assert_eq!(group.get("Jack").unwrap().as_bytes(), b"589");
    assert_eq!(group.get("Tom").unwrap().as_bytes(), b"630");

    // Every get reloaded because the budget cannot hold both entries.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(group.cache().used_bytes() <= 8);
}

/// Two "nodes", each a registry with its own group, wired together by a
/// ring-backed picker whose fetcher calls straight into the other node's
/// group. The transport is fake; the routing and fallback logic is real.
mod two_node_mesh {
    use super::*;

    struct DirectFetcher {
        remote: Arc<Registry>,
        calls: AtomicUsize,
    }

    impl PeerFetcher for DirectFetcher {
        fn fetch(
            &self,
            group: &str,
            key: &str,
            _cancel: &CancelToken,
        ) -> Result<Vec<u8>, LoadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let group = self
                .remote
                .get(group)
                .ok_or_else(|| LoadError::new(format!("no such group: {group}")))?;
            group
                .get(key)
                .map(|view| view.to_vec())
                .map_err(|err| LoadError::new(err.to_string()))
        }
    }

    struct RingPicker {
        ring: HashRing,
        self_node: String,
        fetcher: Arc<DirectFetcher>,
    }

    impl PeerPicker for RingPicker {
        fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerFetcher>> {
            let owner = self.ring.get_node(key)?;
            if owner == self.self_node {
                return None;
            }
            Some(Arc::clone(&self.fetcher) as Arc<dyn PeerFetcher>)
        }
    }

    #[test]
    fn keys_owned_by_the_peer_are_fetched_remotely() {
        let local_calls = Arc::new(AtomicUsize::new(0));
        let remote_calls = Arc::new(AtomicUsize::new(0));

        let remote = Arc::new(Registry::new());
        remote
            .new_group("scores", 2 << 10, score_loader(Arc::clone(&remote_calls)))
            .unwrap();

        let local = Registry::new();
        let group = local
            .new_group("scores", 2 << 10, score_loader(Arc::clone(&local_calls)))
            .unwrap();

        // The ring has only the remote node, so it owns every key.
        let mut ring = HashRing::new(50);
        ring.add_nodes(["node-b"]);
        let fetcher = Arc::new(DirectFetcher {
            remote: Arc::clone(&remote),
            calls: AtomicUsize::new(0),
        });
        group
            .register_peer_picker(Arc::new(RingPicker {
                ring,
                self_node: "node-a".to_owned(),
                fetcher: Arc::clone(&fetcher),
            }))
            .unwrap();

        assert_eq!(group.get("Tom").unwrap().as_bytes(), b"630");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(remote_calls.load(Ordering::SeqCst), 1);
        assert_eq!(local_calls.load(Ordering::SeqCst), 0);

        // Cached on the local node now.
        assert_eq!(group.get("Tom").unwrap().as_bytes(), b"630");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.stats().peer_loads, 1);
    }

    #[test]
    fn remote_load_errors_fall_back_to_the_local_loader() {
        let local_calls = Arc::new(AtomicUsize::new(0));

        // Remote node knows nothing, so every remote fetch fails.
        let remote = Arc::new(Registry::new());
        remote
            .new_group(
                "scores",
                2 << 10,
                Arc::new(|key: &str| -> Result<Vec<u8>, LoadError> {
                    Err(LoadError::new(format!("{key} not exist")))
                }),
            )
            .unwrap();

        let local = Registry::new();
        let group = local
            .new_group("scores", 2 << 10, score_loader(Arc::clone(&local_calls)))
            .unwrap();

        let mut ring = HashRing::new(50);
        ring.add_nodes(["node-b"]);
        group
            .register_peer_picker(Arc::new(RingPicker {
                ring,
                self_node: "node-a".to_owned(),
                fetcher: Arc::new(DirectFetcher {
                    remote,
                    calls: AtomicUsize::new(0),
                }),
            }))
            .unwrap();

        assert_eq!(group.get("Tom").unwrap().as_bytes(), b"630");
        assert_eq!(local_calls.load(Ordering::SeqCst), 1);

        let stats = group.stats();
        assert_eq!(stats.peer_errors, 1);
        assert_eq!(stats.local_loads, 1);

        // A key neither side can resolve is a plain load error.
        let err = group.get("Nobody").unwrap_err();
        assert!(matches!(err, GetError::Load(_)));
    }
}

#[test]
fn values_are_immutable_views() {
    let registry = Registry::new();
    let group = registry
        .new_group("bytes", 0, Arc::new(|_: &str| Ok(vec![1u8, 2, 3])))
        .unwrap();

    let view: ByteView = group.get("k").unwrap();
    let mut copy = view.to_vec();
    copy[0] = 99;

    assert_eq!(group.get("k").unwrap().as_bytes(), &[1, 2, 3]);
}
