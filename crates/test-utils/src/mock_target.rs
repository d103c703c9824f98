//! In-process HTTP targets with scripted behavior.
//!
//! Every target counts the POST requests it serves and how many were in
//! flight at once, so tests can check the dispatcher's concurrency bound
//! from the server side. HEAD requests (reachability probes) always succeed
//! and are not counted.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// How a mock target answers POST requests.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// 200 with `{"ok": true}` after `delay`.
    Ok { delay: Duration },
    /// Fixed status and body. JSON bodies are sent as `application/json`.
    Status { status: u16, body: String },
    /// The first `first` requests sleep for `delay` before answering 200,
    /// the rest answer immediately.
    Hang { first: usize, delay: Duration },
}

/// Counters observed by a mock target.
#[derive(Debug, Default)]
pub struct TargetStats {
    requests: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    bodies: Mutex<Vec<serde_json::Value>>,
}

impl TargetStats {
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Requests currently being served.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// JSON bodies received so far.
    pub fn bodies(&self) -> Vec<serde_json::Value> {
        self.bodies.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

/// Leaves the in-flight count when the handler finishes or is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
struct TargetState {
    behavior: Behavior,
    stats: Arc<TargetStats>,
}

/// A running mock target. Stops when dropped.
pub struct MockTarget {
    pub addr: SocketAddr,
    pub stats: Arc<TargetStats>,
    handle: JoinHandle<()>,
}

impl MockTarget {
    /// Bind to an ephemeral local port and start serving.
    pub async fn spawn(behavior: Behavior) -> Self {
        let stats = Arc::new(TargetStats::default());
        let state = TargetState {
            behavior,
            stats: stats.clone(),
        };
        let app = Router::new().fallback(handle).with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock target");
        let addr = listener.local_addr().expect("mock target address");
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            addr,
            stats,
            handle,
        }
    }

    /// Full URL for `path` on this target.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for MockTarget {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// URL of a local port nothing listens on.
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind probe port");
    let addr = listener.local_addr().expect("probe port address");
    drop(listener);
    format!("http://{}/", addr)
}

async fn handle(State(state): State<TargetState>, method: Method, body: Bytes) -> Response {
    if method == Method::HEAD {
        return StatusCode::OK.into_response();
    }

    let stats = &state.stats;
    let index = stats.requests.fetch_add(1, Ordering::SeqCst);
    let _in_flight = InFlight::enter(&stats.in_flight, &stats.max_in_flight);

    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(&body) {
        if let Ok(mut bodies) = stats.bodies.lock() {
            bodies.push(json);
        }
    }

    match &state.behavior {
        Behavior::Ok { delay } => {
            tokio::time::sleep(*delay).await;
            ok_response()
        }
        Behavior::Status { status, body } => {
            let status = StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            if serde_json::from_str::<serde_json::Value>(body).is_ok() {
                (status, [(header::CONTENT_TYPE, "application/json")], body.clone()).into_response()
            } else {
                (status, body.clone()).into_response()
            }
        }
        Behavior::Hang { first, delay } => {
            if index < *first {
                tokio::time::sleep(*delay).await;
            }
            ok_response()
        }
    }
}

fn ok_response() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"ok": true}"#,
    )
        .into_response()
}
