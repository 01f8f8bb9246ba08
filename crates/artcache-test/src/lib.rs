//! Helpers for testing the resource cache.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test. When dropped too early, this might silently leak the temp
//!    directory, since the cache will create it again lazily after it has been deleted. To
//!    avoid this, assign it to a variable in the test function (e.g. `let _cache_dir =
//!    test::tempdir()`).
//!
//!  - When using [`Server`], make sure that the server is held until all requests to it
//!    have been made. If the server is dropped, the ports remain open and all connections
//!    to it will time out. To avoid this, assign it to a variable: `let server =
//!    test::Server::new();`.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::get;
use axum::{Router, extract, middleware};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `artcache` crate and mutes
///    all other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("artcache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped, unless
/// [`into_path`](TempDir::into_path) is called. Use it as a guard to automatically clean up
/// after tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// A test server that binds to a random port and serves deterministic resources.
///
/// Every request is counted, so tests can assert how often the network was actually hit.
/// The server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
///
/// Routes:
///
///  - `/blob/*tail` responds with `tail` as the body.
///  - `/delay/:ms/*tail` sleeps for `ms` milliseconds, then responds with `tail`.
///  - `/respond_statuscode/:num/*tail` responds with the given status code and no body.
#[derive(Debug)]
pub struct Server {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    hits: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl Server {
    /// Spawns a new test server on a random local port.
    pub fn new() -> Self {
        let hits = Arc::new(Mutex::new(BTreeMap::new()));

        let hitcounter = {
            let hits = hits.clone();
            move |extract::OriginalUri(uri): extract::OriginalUri,
                  req: extract::Request,
                  next: middleware::Next| {
                let hits = hits.clone();
                async move {
                    {
                        let mut hits = hits.lock().unwrap();
                        let hits = hits.entry(uri.to_string()).or_default();
                        *hits += 1;
                    }

                    next.run(req).await
                }
            }
        };

        let router = Router::new()
            .route(
                "/blob/*tail",
                get(|extract::Path(tail): extract::Path<String>| async move { tail }),
            )
            .route(
                "/delay/:ms/*tail",
                get(
                    |extract::Path((ms, tail)): extract::Path<(u64, String)>| async move {
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        tail
                    },
                ),
            )
            .route(
                "/respond_statuscode/:num/*tail",
                get(
                    |extract::Path((num, _)): extract::Path<(u16, String)>| async move {
                        StatusCode::from_u16(num).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                    },
                ),
            )
            .layer(middleware::from_fn(hitcounter));

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            handle,
            socket,
            hits,
        }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.port(), path)
    }

    /// Returns the total number of requests served so far, resetting the counter.
    pub fn accesses(&self) -> usize {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_values().sum()
    }

    /// Returns all requests served so far as `(uri, count)` pairs, resetting the counters.
    pub fn all_hits(&self) -> Vec<(String, usize)> {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_iter().collect()
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
