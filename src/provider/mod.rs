//! C3 — Provider Engine.
//!
//! The HTTP server implementing the five provider endpoints, hosting C1/C2,
//! invoking C4/C5, and driving the order state machine.

pub mod handlers;

use async_trait::async_trait;
use axum::Router;
use axum::extract::Request;
use axum::routing::{get, post};
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::task::TaskTracker;
use tower::{Layer, ServiceExt};
use tower_http::cors::{self, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::normalize_path::NormalizePathLayer;

use crate::codec::messages::ServiceCatalog;
use crate::network::Network;
use crate::payment::PaymentVerifier;
use crate::store::{Order, OrderStorage};
use crate::trace_id::TraceIdLayer;

pub const REQUEST_BODY_CAP: usize = 64 * 1024;
pub const DEFAULT_QUOTE_VALIDITY: Duration = Duration::from_secs(15 * 60);

/// A registered service handler is dispatched after `/deliver` transitions
/// the order to `paid`; its result drives `paid -> delivered` /
/// `paid -> delivery_failed`. Failures are logged but must never crash the
/// server (spec §9, "async fire-and-forget handler").
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    async fn handle(&self, order: &Order) -> Result<ProcessedDeliverable, String>;
}

pub struct ProcessedDeliverable {
    pub content: String,
    pub content_type: String,
}

/// A stream event published while a handler processes an order, consumed by
/// the optional SSE endpoint (§4.7.1). The wire framing is the standard
/// `event: <type>\ndata: <json>\n\n` pair: `event_name()` supplies the SSE
/// `event:` line, and the (untagged) JSON serialization of the variant's
/// fields supplies the `data:` line.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(untagged)]
pub enum StreamEvent {
    StatusUpdate { status: String },
    Progress { percent: u8 },
    Completed { content_hash: String },
    Failed { reason: String },
}

impl StreamEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamEvent::StatusUpdate { .. } => "status_update",
            StreamEvent::Progress { .. } => "progress",
            StreamEvent::Completed { .. } => "completed",
            StreamEvent::Failed { .. } => "failed",
        }
    }
}

pub struct ProviderEngine {
    pub catalog: ServiceCatalog,
    pub store: Arc<dyn OrderStorage>,
    pub payment_verifier: Arc<dyn PaymentVerifier>,
    pub payment_address: String,
    pub network: Network,
    pub quote_validity: Duration,
    pub handlers: DashMap<String, Arc<dyn ServiceHandler>>,
    /// Cross-order replay-prevention set (spec §9 Open Question: recommended
    /// resolution is to reject tx_hash reuse across orders at this layer).
    pub used_tx_hashes: DashSet<String>,
    pub streams: Arc<DashMap<String, broadcast::Sender<StreamEvent>>>,
    pub task_tracker: TaskTracker,
}

impl ProviderEngine {
    pub fn new(
        catalog: ServiceCatalog,
        store: Arc<dyn OrderStorage>,
        payment_verifier: Arc<dyn PaymentVerifier>,
        payment_address: String,
        network: Network,
    ) -> Self {
        ProviderEngine {
            catalog,
            store,
            payment_verifier,
            payment_address,
            network,
            quote_validity: DEFAULT_QUOTE_VALIDITY,
            handlers: DashMap::new(),
            used_tx_hashes: DashSet::new(),
            streams: Arc::new(DashMap::new()),
            task_tracker: TaskTracker::new(),
        }
    }

    pub fn register_service_handler(&self, service_type: impl Into<String>, handler: Arc<dyn ServiceHandler>) {
        self.handlers.insert(service_type.into(), handler);
    }

    pub fn stream_sender(&self, order_id: &str) -> broadcast::Sender<StreamEvent> {
        self.streams
            .entry(order_id.to_string())
            .or_insert_with(|| broadcast::channel(32).0)
            .clone()
    }
}

/// Mirrors the teacher's `routes<A>()` generic-over-state Router assembly.
fn router(state: Arc<ProviderEngine>) -> Router {
    Router::new()
        .route("/ivxp/catalog", get(handlers::get_catalog))
        .route("/ivxp/request", post(handlers::post_request))
        .route("/ivxp/deliver", post(handlers::post_deliver))
        .route("/ivxp/status/{order_id}", get(handlers::get_status))
        .route("/ivxp/download/{order_id}", get(handlers::get_download))
        .route("/ivxp/orders/{order_id}/stream", get(handlers::get_stream))
        .layer(RequestBodyLimitLayer::new(REQUEST_BODY_CAP))
        .layer(TraceIdLayer)
        .layer(
            CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers(cors::Any),
        )
        .with_state(state)
}

/// A pre-routed, serve-ready IVXP service.
///
/// `NormalizePathLayer` strips a trailing slash (so `GET /ivxp/catalog/`
/// behaves identically to `/ivxp/catalog`, per spec.md's path-normalization
/// requirement) before axum's router attempts to match the path; axum's
/// matcher already ignores the query string during matching, so no separate
/// query-stripping step is needed. This has to wrap the router from the
/// outside — layers added via `Router::layer` run too late to affect route
/// matching — hence the `into_make_service` conversion, which is why this
/// returns a `Shared<NormalizePath<Router>>` rather than a bare `Router`.
/// Method-mismatch -> 405 is axum's own router behavior on a matched path
/// with no matching method; nothing here reimplements it.
pub type IvxpService = tower::make::Shared<tower_http::normalize_path::NormalizePath<Router>>;

/// Builds the IVXP router over a shared [`ProviderEngine`] and wraps it as a
/// service ready to hand to `axum::serve`.
pub fn routes(state: Arc<ProviderEngine>) -> IvxpService {
    let normalized = NormalizePathLayer::trim_trailing_slash().layer(router(state));
    ServiceExt::<Request>::into_make_service(normalized)
}
