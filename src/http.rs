//! HTTP peer transport.
//!
//! One [`HttpPool`] per process plays both sides of the wire contract:
//!
//! - server: answers `GET <base>/<group>/<key>` for the groups in its
//!   registry, so peers can pull values this node owns;
//! - client: implements [`PeerPicker`] over a consistent-hash ring of peer
//!   base URLs, handing out an [`HttpFetcher`] per remote peer.
//!
//! Wire contract: path segments are percent-encoded; unknown group is 404,
//! a failed load is 400 with the error text, success is 200 with the raw
//! value bytes as `application/octet-stream`.
//!
//! The pool is transport plumbing only. Routing policy lives in
//! [`HashRing`], load semantics in [`Group`](crate::group::Group); any
//! other transport can replace this module by implementing the same two
//! traits.

use std::sync::Arc;

use curl::easy::Easy;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{debug, warn};

use crate::error::LoadError;
use crate::group::{CancelToken, PeerFetcher, PeerPicker, Registry};
use crate::ring::HashRing;

/// Path prefix cache traffic is served under.
pub const DEFAULT_BASE_PATH: &str = "/_cache/";

/// Virtual nodes per peer on the routing ring.
pub const DEFAULT_REPLICAS: usize = 50;

// ---------------------------------------------------------------------------
// HttpPool
// ---------------------------------------------------------------------------

struct Routes {
    ring: HashRing,
    fetchers: FxHashMap<String, Arc<HttpFetcher>>,
}

/// HTTP endpoint and peer router for one node.
///
/// Identified by its own base URL (scheme, host, port), which must appear
/// verbatim in every node's [`set_peers`](HttpPool::set_peers) list so the
/// ring agrees across the mesh.
pub struct HttpPool {
    registry: Arc<Registry>,
    self_base_url: String,
    base_path: String,
    replicas: usize,
    routes: Mutex<Routes>,
}

impl HttpPool {
    /// Creates a pool serving `registry` under the default base path with
    /// the default replica count. No peers are configured yet; until
    /// [`set_peers`](HttpPool::set_peers) runs, every pick is local.
    pub fn new(registry: Arc<Registry>, self_base_url: impl Into<String>) -> Self {
        HttpPool {
            registry,
            self_base_url: self_base_url.into(),
            base_path: DEFAULT_BASE_PATH.to_owned(),
            replicas: DEFAULT_REPLICAS,
            routes: Mutex::new(Routes {
                ring: HashRing::new(DEFAULT_REPLICAS),
                fetchers: FxHashMap::default(),
            }),
        }
    }

    /// Overrides the base path. Leading and trailing slashes are added if
    /// missing. Call before [`set_peers`](HttpPool::set_peers).
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        let mut path = base_path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        if !path.ends_with('/') {
            path.push('/');
        }
        self.base_path = path;
        self
    }

    /// Overrides the ring replica count. Call before
    /// [`set_peers`](HttpPool::set_peers).
    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }

    /// Returns this node's base URL.
    pub fn self_base_url(&self) -> &str {
        &self.self_base_url
    }

    /// Returns the served base path.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Replaces the peer topology.
    ///
    /// `peers` is the full list of node base URLs, this node included.
    /// The ring and the per-peer fetchers are rebuilt from scratch, so the
    /// call is repeatable as membership changes.
    pub fn set_peers<I, S>(&self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ring = HashRing::new(self.replicas);
        let mut fetchers = FxHashMap::default();
        for peer in peers {
            let peer = peer.into();
            ring.add_nodes([peer.as_str()]);
            if peer != self.self_base_url {
                fetchers.insert(
                    peer.clone(),
                    Arc::new(HttpFetcher::new(peer, self.base_path.clone())),
                );
            }
        }
        debug!(
            node = %self.self_base_url,
            peers = fetchers.len() + 1,
            "peer topology updated"
        );
        *self.routes.lock() = Routes { ring, fetchers };
    }

    /// Serves cache requests until the server is unblocked or dropped.
    pub fn serve(&self, server: &Server) {
        for request in server.incoming_requests() {
            self.handle(request);
        }
    }

    fn handle(&self, request: Request) {
        debug!(
            node = %self.self_base_url,
            method = %request.method(),
            url = request.url(),
            "request"
        );

        if *request.method() != Method::Get {
            respond(request, text_response("method not allowed", 405));
            return;
        }

        // The key may itself contain encoded slashes; only the first
        // separator after the base path splits group from key.
        let path = request.url().split('?').next().unwrap_or("");
        let Some(rest) = path.strip_prefix(self.base_path.as_str()) else {
            respond(request, text_response("not found", 404));
            return;
        };
        let Some((raw_group, raw_key)) = rest.split_once('/') else {
            respond(request, text_response("bad request: expected <group>/<key>", 400));
            return;
        };
        let (Some(group_name), Some(key)) = (percent_decode(raw_group), percent_decode(raw_key))
        else {
            respond(request, text_response("bad request: malformed escape", 400));
            return;
        };

        let Some(group) = self.registry.get(&group_name) else {
            respond(request, text_response(&format!("no such group: {group_name}"), 404));
            return;
        };

        match group.get(&key) {
            Ok(view) => {
                let response = Response::from_data(view.to_vec())
                    .with_status_code(200)
                    .with_header(octet_stream_header());
                respond(request, response);
            }
            Err(err) => respond(request, text_response(&err.to_string(), 400)),
        }
    }
}

impl PeerPicker for HttpPool {
    /// Routes `key` on the ring. Keys owned by this node (or by no node,
    /// when the ring is empty) pick no peer and load locally.
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerFetcher>> {
        let routes = self.routes.lock();
        let owner = routes.ring.get_node(key)?;
        if owner == self.self_base_url {
            return None;
        }
        debug!(node = %self.self_base_url, key, peer = owner, "picked peer");
        routes
            .fetchers
            .get(owner)
            .cloned()
            .map(|f| f as Arc<dyn PeerFetcher>)
    }
}

impl std::fmt::Debug for HttpPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPool")
            .field("self_base_url", &self.self_base_url)
            .field("base_path", &self.base_path)
            .field("replicas", &self.replicas)
            .finish_non_exhaustive()
    }
}

fn respond(request: Request, response: Response<std::io::Cursor<Vec<u8>>>) {
    if let Err(err) = request.respond(response) {
        warn!(error = %err, "failed to write response");
    }
}

fn text_response(body: &str, status: u16) -> Response<std::io::Cursor<Vec<u8>>> {
    Response::from_data(body.as_bytes().to_vec()).with_status_code(status)
}

fn octet_stream_header() -> Header {
    // Static input, cannot fail to parse.
    Header::from_bytes(&b"Content-Type"[..], &b"application/octet-stream"[..])
        .unwrap_or_else(|_| unreachable!())
}

// ---------------------------------------------------------------------------
// HttpFetcher
// ---------------------------------------------------------------------------

/// Pulls values from one remote peer over HTTP.
pub struct HttpFetcher {
    peer_base_url: String,
    base_path: String,
}

impl HttpFetcher {
    /// Creates a fetcher for the peer at `peer_base_url`, requesting under
    /// `base_path`.
    pub fn new(peer_base_url: impl Into<String>, base_path: impl Into<String>) -> Self {
        HttpFetcher {
            peer_base_url: peer_base_url.into(),
            base_path: base_path.into(),
        }
    }
}

impl PeerFetcher for HttpFetcher {
    fn fetch(&self, group: &str, key: &str, cancel: &CancelToken) -> Result<Vec<u8>, LoadError> {
        let mut easy = Easy::new();
        let url = format!(
            "{}{}{}/{}",
            self.peer_base_url,
            self.base_path,
            easy.url_encode(group.as_bytes()),
            easy.url_encode(key.as_bytes()),
        );

        easy.url(&url).map_err(curl_error)?;
        easy.progress(true).map_err(curl_error)?;

        let mut body = Vec::new();
        {
            let mut transfer = easy.transfer();
            transfer
                .write_function(|data| {
                    body.extend_from_slice(data);
                    Ok(data.len())
                })
                .map_err(curl_error)?;
            // Returning false aborts the transfer; curl reports it as an
            // error which surfaces below as a LoadError.
            transfer
                .progress_function(|_, _, _, _| !cancel.is_cancelled())
                .map_err(curl_error)?;
            transfer.perform().map_err(curl_error)?;
        }

        let status = easy.response_code().map_err(curl_error)?;
        if status != 200 {
            return Err(LoadError::new(format!(
                "peer {} returned status {status}: {}",
                self.peer_base_url,
                String::from_utf8_lossy(&body),
            )));
        }
        Ok(body)
    }
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("peer_base_url", &self.peer_base_url)
            .field("base_path", &self.base_path)
            .finish()
    }
}

fn curl_error(err: curl::Error) -> LoadError {
    LoadError::new(format!("transfer failed: {err}"))
}

// ---------------------------------------------------------------------------
// Percent decoding
// ---------------------------------------------------------------------------

/// Decodes a percent-encoded path segment. `+` decodes to a space, for
/// clients that query-escape. Returns `None` on a truncated or non-hex
/// escape, or when the result is not UTF-8.
fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hi = hex_value(*bytes.get(i + 1)?)?;
                let lo = hex_value(*bytes.get(i + 2)?)?;
                out.push(hi << 4 | lo);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).ok()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
