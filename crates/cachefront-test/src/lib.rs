//! Helpers for testing the web server and service.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`origin_server`], make sure that the server is held until all requests to
//!    the server have been made. If the server is dropped, the ports remain open and all
//!    connections to it will time out. To avoid this, assign it to a variable:
//!    `let origin = origin_server().await;`.
//!
//!  - [`MemoryStore`] honors TTLs against the `tokio` clock, so expiry can be tested
//!    deterministically with `#[tokio::test(start_paused = true)]` and `tokio::time::advance`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::extract::{Path, Request};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::routing::get;
use reqwest::Url;

pub use cachefront_service::testing::{MemoryStore, setup};

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    pub handle: tokio::task::JoinHandle<()>,
    pub socket: SocketAddr,
}

impl Server {
    pub async fn with_router(router: Router) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let socket = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
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
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A stand-in origin that echoes the requested path and counts hits.
///
/// Any path resolves to the body `origin:{path}`. Paths under `/fail/` respond
/// with `502`, and `/slow/{duration}/...` sleeps before responding.
pub struct OriginServer {
    server: Server,
    hits: Arc<AtomicUsize>,
}

impl OriginServer {
    /// Total number of requests served so far.
    pub fn accesses(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn url(&self, path: &str) -> Url {
        self.server.url(path)
    }
}

/// Spawns an [`OriginServer`] on an ephemeral port.
pub async fn origin_server() -> OriginServer {
    let hits = Arc::new(AtomicUsize::new(0));

    let hitcounter = {
        let hits = hits.clone();
        move |req: Request, next: Next| {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                next.run(req).await
            }
        }
    };

    let router = Router::new()
        .route(
            "/fail/*path",
            get(|| async { StatusCode::BAD_GATEWAY }),
        )
        .route(
            "/slow/:time/*path",
            get(|Path((time, path)): Path<(String, String)>| async move {
                let duration = humantime::parse_duration(&time).unwrap();
                tokio::time::sleep(duration).await;
                format!("origin:/{path}")
            }),
        )
        .route(
            "/*path",
            get(|Path(path): Path<String>| async move { format!("origin:/{path}") }),
        )
        .layer(middleware::from_fn(hitcounter));

    let server = Server::with_router(router).await;

    OriginServer { server, hits }
}
