#![cfg(feature = "http")]

//! Loopback tests for the HTTP transport: real sockets, real requests,
//! two nodes in one process.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::thread::JoinHandle;

use tiny_http::Server;

use meshcache::{
    CancelToken, HttpFetcher, HttpPool, LoadError, Loader, PeerFetcher, PeerPicker, Registry,
};

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

struct Node {
    pool: Arc<HttpPool>,
    base_url: String,
    server: Arc<Server>,
    worker: Option<JoinHandle<()>>,
}

impl Node {
    fn start(registry: Arc<Registry>) -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").unwrap());
        let addr = server.server_addr().to_ip().unwrap();
        let base_url = format!("http://{addr}");

        let pool = Arc::new(HttpPool::new(registry, base_url.clone()));
        let worker = {
            let pool = Arc::clone(&pool);
            let server = Arc::clone(&server);
            std::thread::spawn(move || pool.serve(&server))
        };

        Node {
            pool,
            base_url,
            server,
            worker: Some(worker),
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn echo_loader(calls: Arc<AtomicUsize>) -> Arc<dyn Loader> {
    Arc::new(move |key: &str| {
        calls.fetch_add(1, Ordering::SeqCst);
        if key.starts_with("missing") {
            Err(LoadError::new(format!("{key} not exist")))
        } else {
            Ok(format!("value:{key}").into_bytes())
        }
    })
}

#[test]
fn value_is_fetched_from_the_owning_peer() {
    init_tracing();

    let a_calls = Arc::new(AtomicUsize::new(0));
    let a_registry = Arc::new(Registry::new());
    a_registry
        .new_group("scores", 2 << 10, echo_loader(Arc::clone(&a_calls)))
        .unwrap();
    let node_a = Node::start(Arc::clone(&a_registry));

    let b_calls = Arc::new(AtomicUsize::new(0));
    let b_registry = Arc::new(Registry::new());
    let b_group = b_registry
        .new_group("scores", 2 << 10, echo_loader(Arc::clone(&b_calls)))
        .unwrap();
    let node_b = Node::start(Arc::clone(&b_registry));

    // B's ring contains only A, so A owns every key B asks about.
    node_b.pool.set_peers([node_a.base_url.clone()]);
    b_group
        .register_peer_picker(Arc::clone(&node_b.pool) as Arc<dyn PeerPicker>)
        .unwrap();

    let view = b_group.get("Tom").unwrap();
    assert_eq!(view.as_bytes(), b"value:Tom");
    assert_eq!(a_calls.load(Ordering::SeqCst), 1);
    assert_eq!(b_calls.load(Ordering::SeqCst), 0);
    assert_eq!(b_group.stats().peer_loads, 1);

    // Second get is a local cache hit; A is not asked again.
    b_group.get("Tom").unwrap();
    assert_eq!(a_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn keys_with_reserved_characters_round_trip() {
    init_tracing();

    let a_registry = Arc::new(Registry::new());
    a_registry
        .new_group("pages", 2 << 10, echo_loader(Arc::new(AtomicUsize::new(0))))
        .unwrap();
    let node_a = Node::start(Arc::clone(&a_registry));

    let fetcher = HttpFetcher::new(node_a.base_url.clone(), "/_cache/");
    for key in ["hello world", "a/b/c", "50%+done", "日本語"] {
        let bytes = fetcher.fetch("pages", key, &CancelToken::new()).unwrap();
        assert_eq!(bytes, format!("value:{key}").into_bytes());
    }
}

#[test]
fn unknown_group_maps_to_404() {
    init_tracing();

    let registry = Arc::new(Registry::new());
    let node = Node::start(registry);

    let fetcher = HttpFetcher::new(node.base_url.clone(), "/_cache/");
    let err = fetcher
        .fetch("nonexistent", "k", &CancelToken::new())
        .unwrap_err();
    assert!(err.to_string().contains("404"), "got: {err}");
    assert!(err.to_string().contains("nonexistent"), "got: {err}");
}

#[test]
fn failed_load_maps_to_400_with_the_error_text() {
    init_tracing();

    let registry = Arc::new(Registry::new());
    registry
        .new_group("scores", 2 << 10, echo_loader(Arc::new(AtomicUsize::new(0))))
        .unwrap();
    let node = Node::start(Arc::clone(&registry));

    let fetcher = HttpFetcher::new(node.base_url.clone(), "/_cache/");
    let err = fetcher
        .fetch("scores", "missing-row", &CancelToken::new())
        .unwrap_err();
    assert!(err.to_string().contains("400"), "got: {err}");
    assert!(err.to_string().contains("missing-row not exist"), "got: {err}");
}

#[test]
fn unreachable_peer_falls_back_to_the_local_loader() {
    init_tracing();

    let b_calls = Arc::new(AtomicUsize::new(0));
    let b_registry = Arc::new(Registry::new());
    let b_group = b_registry
        .new_group("scores", 2 << 10, echo_loader(Arc::clone(&b_calls)))
        .unwrap();
    let node_b = Node::start(Arc::clone(&b_registry));

    // Nothing listens on this port; every fetch to it fails fast.
    node_b.pool.set_peers(["http://127.0.0.1:9"]);
    b_group
        .register_peer_picker(Arc::clone(&node_b.pool) as Arc<dyn PeerPicker>)
        .unwrap();

    assert_eq!(b_group.get("Tom").unwrap().as_bytes(), b"value:Tom");
    assert_eq!(b_calls.load(Ordering::SeqCst), 1);

    let stats = b_group.stats();
    assert_eq!(stats.peer_errors, 1);
    assert_eq!(stats.local_loads, 1);
}
