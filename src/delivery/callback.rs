//! Push-callback receiver (spec §4.7.3) — a tiny HTTP server exposing only
//! `POST /ivxp/callback`, gated on a content-hash check before invoking the
//! caller's `on_delivery` hook. Lifecycle follows spec §9's "callback
//! receiver + atomic stop" design note: `starting -> running -> stopping ->
//! stopped`, with an idempotent `stop()`.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router, http::StatusCode};
use bytes::Bytes;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;

use crate::codec::messages::PushCallback;
use crate::codec::validate::strip_hash_prefix;
use crate::delivery::sha256_hex;

pub const BODY_CAP: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct RejectReason {
    pub reason: String,
    pub expected_hash: String,
    pub computed_hash: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum LifecycleState {
    Starting = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

struct CallbackState {
    on_delivery: Arc<dyn Fn(PushCallback) + Send + Sync>,
    on_rejected: Arc<dyn Fn(RejectReason, PushCallback) + Send + Sync>,
}

/// Server-side TLS material, supplied by the caller. Wiring an actual TLS
/// listener is left to the embedding application (see DESIGN.md) — this
/// struct only carries the cert/key paths through the constructor so the
/// capability is part of the type signature.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: std::path::PathBuf,
    pub key_path: std::path::PathBuf,
}

pub struct CallbackServerConfig {
    pub bind_addr: SocketAddr,
    pub tls: Option<TlsConfig>,
    pub on_delivery: Arc<dyn Fn(PushCallback) + Send + Sync>,
    pub on_rejected: Arc<dyn Fn(RejectReason, PushCallback) + Send + Sync>,
}

impl Default for CallbackServerConfig {
    fn default() -> Self {
        CallbackServerConfig {
            // Loopback-only, OS-assigned port, unless explicitly overridden.
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            tls: None,
            on_delivery: Arc::new(|_| {}),
            on_rejected: Arc::new(|_, _| {}),
        }
    }
}

pub struct CallbackServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<AtomicU8>,
    join: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CallbackServer {
    pub async fn start(config: CallbackServerConfig) -> std::io::Result<Self> {
        if config.tls.is_some() {
            tracing::warn!("TLS configuration supplied but not wired into the bound listener");
        }

        let state = Arc::new(AtomicU8::new(LifecycleState::Starting as u8));
        let app_state = Arc::new(CallbackState {
            on_delivery: config.on_delivery,
            on_rejected: config.on_rejected,
        });

        let router = Router::new()
            .route("/ivxp/callback", post(handle_callback).fallback(not_found))
            .fallback(not_found)
            .layer(RequestBodyLimitLayer::new(BODY_CAP))
            .with_state(app_state);

        let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let task_shutdown = shutdown.clone();
        let task_state = state.clone();
        task_state.store(LifecycleState::Running as u8, Ordering::SeqCst);

        let join = tokio::spawn(async move {
            let graceful = async move { task_shutdown.cancelled().await };
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(graceful)
                .await;
            task_state.store(LifecycleState::Stopped as u8, Ordering::SeqCst);
        });

        Ok(CallbackServer {
            local_addr,
            shutdown,
            state,
            join: Mutex::new(Some(join)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == LifecycleState::Running as u8
    }

    /// Idempotent: safe to call multiple times; drains in-flight requests
    /// via axum's graceful shutdown before returning.
    pub async fn stop(&self) {
        self.state
            .compare_exchange(
                LifecycleState::Running as u8,
                LifecycleState::Stopping as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .ok();
        self.shutdown.cancel();
        let mut guard = self.join.lock().await;
        if let Some(handle) = guard.take() {
            let _ = handle.await;
        }
    }
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn handle_callback(State(state): State<Arc<CallbackState>>, bytes: Bytes) -> Response {
    let value: serde_json::Value = match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": "Invalid JSON"}))).into_response();
        }
    };

    let payload: PushCallback = match serde_json::from_value(value) {
        Ok(p) => p,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": "Invalid JSON"}))).into_response();
        }
    };

    let expected = strip_hash_prefix(&payload.deliverable.content_hash).to_ascii_lowercase();
    let computed = sha256_hex(payload.deliverable.content.as_bytes());

    if expected != computed {
        (state.on_rejected)(
            RejectReason {
                reason: "content_hash mismatch".to_string(),
                expected_hash: expected.clone(),
                computed_hash: computed.clone(),
            },
            payload,
        );
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "content_hash mismatch"}))).into_response();
    }

    (state.on_delivery)(payload);
    (StatusCode::OK, Json(json!({"status": "received"}))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn sample_body(content: &str, hash: &str) -> serde_json::Value {
        json!({
            "order_id": "ivxp-abc",
            "status": "delivered",
            "deliverable": {
                "content": content,
                "content_hash": hash,
                "format": "text/plain",
            },
            "delivered_at": "2026-07-28T00:00:00Z",
        })
    }

    #[tokio::test]
    async fn accepts_matching_hash_and_invokes_on_delivery() {
        let delivered = Arc::new(StdMutex::new(None));
        let delivered_clone = delivered.clone();
        let server = CallbackServer::start(CallbackServerConfig {
            on_delivery: Arc::new(move |payload| {
                *delivered_clone.lock().unwrap() = Some(payload.order_id);
            }),
            ..Default::default()
        })
        .await
        .unwrap();

        let content = "hello world";
        let hash = sha256_hex(content.as_bytes());
        let client = reqwest::Client::new();
        let resp = client
            .post(format!("http://{}/ivxp/callback", server.local_addr()))
            .json(&sample_body(content, &hash))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(delivered.lock().unwrap().as_deref(), Some("ivxp-abc"));
        server.stop().await;
    }

    #[tokio::test]
    async fn rejects_mismatched_hash_and_invokes_on_rejected() {
        let rejected = Arc::new(StdMutex::new(false));
        let rejected_clone = rejected.clone();
        let server = CallbackServer::start(CallbackServerConfig {
            on_rejected: Arc::new(move |_, _| {
                *rejected_clone.lock().unwrap() = true;
            }),
            ..Default::default()
        })
        .await
        .unwrap();

        let client = reqwest::Client::new();
        let resp = client
            .post(format!("http://{}/ivxp/callback", server.local_addr()))
            .json(&sample_body("hello world", "0".repeat(64).as_str()))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        assert!(*rejected.lock().unwrap());
        server.stop().await;
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let server = CallbackServer::start(CallbackServerConfig::default()).await.unwrap();
        let client = reqwest::Client::new();
        let resp = client
            .get(format!("http://{}/ivxp/other", server.local_addr()))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        server.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let server = CallbackServer::start(CallbackServerConfig::default()).await.unwrap();
        server.stop().await;
        server.stop().await;
    }
}
