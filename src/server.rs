//! server.rs — local ingestion HTTP server.
//!
//! Receives page snapshots POSTed by the browser userscript, serves the
//! current store contents, and answers the refresh-sequence short-poll.
//! Listens on loopback only; the trust model is a single-user machine.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use axum::{
    body::Bytes,
    extract::{Query, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::store::{RefreshSequencer, VersionedStore};

pub const DEFAULT_PORT: u16 = 7890;

/// Meta fields the userscript sends alongside the scraped values. A body
/// with nothing else left is an empty snapshot and must not overwrite
/// previously good data.
const BOOKKEEPING_KEYS: &[&str] = &["source", "timestamp", "page_url", "received_at"];

/// One-time metrics registration (so series show up on a recorder).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_updates_total", "Snapshots accepted and stored.");
        describe_counter!(
            "ingest_rejected_total",
            "Malformed submissions rejected with 4xx."
        );
        describe_counter!(
            "ingest_empty_payload_total",
            "Submissions ignored because only bookkeeping keys remained."
        );
        describe_gauge!("ingest_store_sources", "Distinct source keys in the store.");
    });
}

#[derive(Clone)]
struct AppState {
    store: Arc<VersionedStore>,
    sequencer: Arc<RefreshSequencer>,
}

/// Build the endpoint router. Separated from the lifecycle so tests can
/// exercise the full contract via `tower::ServiceExt::oneshot`.
pub fn router(store: Arc<VersionedStore>, sequencer: Arc<RefreshSequencer>) -> Router {
    ensure_metrics_described();
    let state = AppState { store, sequencer };

    // Per-method fallbacks keep unsupported methods at 404 rather than
    // axum's default 405, matching the wire contract.
    Router::new()
        .route("/", get(status_all).options(preflight).fallback(not_found))
        .route("/status", get(status_all).options(preflight).fallback(not_found))
        .route("/health", get(health).options(preflight).fallback(not_found))
        .route("/poll", get(poll).options(preflight).fallback(not_found))
        .route("/update", post(update).options(preflight).fallback(not_found))
        .fallback(any_other)
        .layer(middleware::from_fn(cors_headers))
        .with_state(state)
}

/// Every response carries the permissive CORS trio, exactly as the
/// userscript's GM_xmlhttpRequest expects.
async fn cors_headers(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, X-AI-Monitor-Client"),
    );
    resp
}

async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": "not found"}))).into_response()
}

async fn any_other(req: Request) -> Response {
    if req.method() == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    not_found().await
}

async fn health() -> Json<Value> {
    Json(json!({"ok": true}))
}

async fn status_all(State(state): State<AppState>) -> Response {
    Json(state.store.get_all()).into_response()
}

async fn poll(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Json<Value> {
    // Malformed or missing `seq` counts as 0, so a confused client still
    // gets a sane answer instead of an error it would retry on.
    let client_seq = q
        .get("seq")
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);
    let server_seq = state.sequencer.current();
    Json(json!({
        "seq": server_seq,
        "refresh": server_seq > client_seq,
    }))
}

async fn update(State(state): State<AppState>, body: Bytes) -> Response {
    if body.is_empty() {
        counter!("ingest_rejected_total").increment(1);
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "empty body"}))).into_response();
    }

    let parsed: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            counter!("ingest_rejected_total").increment(1);
            return (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()})))
                .into_response();
        }
    };

    let source = parsed
        .as_object()
        .and_then(|obj| obj.get("source"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if source.is_empty() {
        counter!("ingest_rejected_total").increment(1);
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "missing source field"})),
        )
            .into_response();
    }
    let data = parsed.as_object().cloned().unwrap_or_default();

    // A snapshot with only bookkeeping keys carries no real values; keep
    // whatever good data we already have. Not an error status, so the
    // client does not retry noisily.
    let has_substance = data.keys().any(|k| !BOOKKEEPING_KEYS.contains(&k.as_str()));
    if !has_substance {
        counter!("ingest_empty_payload_total").increment(1);
        return Json(json!({"ok": false, "reason": "empty payload, ignored"})).into_response();
    }

    state.store.put(&source, data);
    counter!("ingest_updates_total").increment(1);
    gauge!("ingest_store_sources").set(state.store.len() as f64);

    Json(json!({"ok": true, "source": source})).into_response()
}

struct Running {
    port: u16,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Server lifecycle handle, owned by the composition root and shared with
/// the push-fed sources (for `is_running`).
pub struct IngestServer {
    store: Arc<VersionedStore>,
    sequencer: Arc<RefreshSequencer>,
    running: Mutex<Option<Running>>,
}

impl IngestServer {
    pub fn new(store: Arc<VersionedStore>, sequencer: Arc<RefreshSequencer>) -> Self {
        Self {
            store,
            sequencer,
            running: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<VersionedStore> {
        &self.store
    }

    pub fn sequencer(&self) -> &Arc<RefreshSequencer> {
        &self.sequencer
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().expect("server mutex poisoned").is_some()
    }

    pub fn port(&self) -> Option<u16> {
        self.running
            .lock()
            .expect("server mutex poisoned")
            .as_ref()
            .map(|r| r.port)
    }

    /// Bind loopback and serve in a background task. Idempotent when
    /// already running. A failed bind (port in use) is logged and
    /// tolerated: the host keeps running without ingestion capability.
    /// Returns whether the server is running afterwards.
    pub async fn start(&self, port: u16) -> bool {
        if self.is_running() {
            return true;
        }

        let listener = match TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(port, error = %e, "local server could not bind; continuing without ingestion");
                return false;
            }
        };
        // Report the bound port, which differs from the requested one when
        // binding port 0.
        let port = listener.local_addr().map(|a| a.port()).unwrap_or(port);

        let app = router(Arc::clone(&self.store), Arc::clone(&self.sequencer));
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let shutdown = async {
                let _ = rx.await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::warn!(error = %e, "local server exited with error");
            }
        });

        let mut guard = self.running.lock().expect("server mutex poisoned");
        if guard.is_some() {
            // Lost a start race; shut the fresh task down.
            let _ = tx.send(());
            return true;
        }
        *guard = Some(Running {
            port,
            shutdown: tx,
            task,
        });
        drop(guard);

        tracing::info!(port, "local server listening on http://localhost:{port}");
        true
    }

    /// Graceful shutdown. Safe to call when not running.
    pub async fn stop(&self) {
        let running = self.running.lock().expect("server mutex poisoned").take();
        if let Some(r) = running {
            let _ = r.shutdown.send(());
            let _ = r.task.await;
            tracing::info!("local server stopped");
        }
    }
}
