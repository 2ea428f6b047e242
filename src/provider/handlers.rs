use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Json, http::StatusCode};
use chrono::Utc;
use futures_util::stream::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

use crate::codec::messages::{
    DeliveryAccepted, DeliveryRequest, ProviderAgent, QuoteBody, ServiceCatalog, ServiceQuote,
};
use crate::codec::validate;
use crate::error::{ErrorCode, IvxpError};
use crate::payment::ExpectedPayment;
use crate::provider::{ProcessedDeliverable, ProviderEngine, StreamEvent};
use crate::signature;
use crate::store::{Order, OrderStatusKind, OrderStoreError};

/// Thin wrapper turning an [`IvxpError`] into the single `{"error": "..."}`
/// response shape spec §4.3 requires, never leaking internal detail.
pub struct AppError(pub IvxpError);

impl From<IvxpError> for AppError {
    fn from(e: IvxpError) -> Self {
        AppError(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({ "error": self.0.message }))).into_response()
    }
}

#[tracing::instrument(skip(state))]
pub async fn get_catalog(State(state): State<Arc<ProviderEngine>>) -> Json<ServiceCatalog> {
    Json(state.catalog.clone())
}

#[tracing::instrument(skip(state, body))]
pub async fn post_request(
    State(state): State<Arc<ProviderEngine>>,
    Json(body): Json<crate::codec::messages::ServiceRequest>,
) -> Result<Json<ServiceQuote>, AppError> {
    let service_type = body.service_request.service_type.clone();
    let offering = state
        .catalog
        .services
        .iter()
        .find(|s| s.service_type == service_type)
        .ok_or_else(|| {
            IvxpError::new(ErrorCode::ServiceNotFound, format!("unknown service type: {service_type}"))
        })?;

    if !validate::is_address(&body.client_agent.wallet_address) {
        return Err(IvxpError::new(ErrorCode::InvalidRequest, "client_agent.wallet_address is not a valid address").into());
    }

    let price = offering.base_price_usdc;
    let order = Order::new_quoted(
        body.client_agent.wallet_address.clone(),
        state.payment_address.clone(),
        service_type.clone(),
        price,
        state.network,
    );
    let created = state.store.create(order).await.map_err(store_error_to_app)?;

    let quote = ServiceQuote {
        protocol: crate::codec::messages::ProtocolV1,
        message_type: crate::codec::messages::MsgServiceQuote,
        timestamp: Utc::now().to_rfc3339(),
        order_id: created.order_id.clone(),
        provider_agent: ProviderAgent {
            name: state.catalog.provider.clone(),
            wallet_address: state.catalog.wallet_address.clone(),
            extra: Default::default(),
        },
        quote: QuoteBody {
            price_usdc: price,
            estimated_delivery: format!("{}h", offering.estimated_delivery_hours),
            payment_address: created.payment_address.clone(),
            network: created.network.to_string(),
            token_contract: Some(format!("{:#x}", created.network.usdc_contract())),
            extra: Default::default(),
        },
        extra: Default::default(),
    };
    Ok(Json(quote))
}

fn store_error_to_app(err: OrderStoreError) -> AppError {
    match err {
        OrderStoreError::NotFound(id) => {
            IvxpError::new(ErrorCode::OrderNotFound, format!("order not found: {id}")).into()
        }
        OrderStoreError::Cas { order_id, .. } => IvxpError::new(
            ErrorCode::InvalidOrderStatus,
            format!("order {order_id} is not in the expected status"),
        )
        .into(),
        OrderStoreError::AlreadyExists(id) => {
            IvxpError::new(ErrorCode::InvalidRequest, format!("order already exists: {id}")).into()
        }
    }
}

#[tracing::instrument(skip(state, body))]
pub async fn post_deliver(
    State(state): State<Arc<ProviderEngine>>,
    Json(body): Json<DeliveryRequest>,
) -> Result<Json<DeliveryAccepted>, AppError> {
    // 1. Look up order.
    let order = state
        .store
        .get(&body.order_id)
        .await
        .map_err(store_error_to_app)?;

    // 2. Must still be quoted.
    if order.status != OrderStatusKind::Quoted {
        return Err(IvxpError::new(ErrorCode::InvalidOrderStatus, "order is not awaiting payment").into());
    }

    // Quote expiry is enforced here (see DESIGN.md Open Question resolution).
    if Utc::now().signed_duration_since(order.created_at).to_std().unwrap_or_default()
        > state.quote_validity
    {
        return Err(IvxpError::new(ErrorCode::OrderExpired, "quote has expired").into());
    }

    // 3. Network must match.
    if body.payment_proof.network != order.network.to_string() {
        return Err(IvxpError::new(ErrorCode::NetworkMismatch, "payment network does not match order network").into());
    }

    // 4. Signed message must reference this order.
    if !body.signed_message.contains(&order.order_id) {
        return Err(IvxpError::new(ErrorCode::InvalidSignedMessage, "signed_message does not reference order_id").into());
    }

    // Replay prevention: a tx_hash may satisfy at most one order, globally.
    if state.used_tx_hashes.contains(&body.payment_proof.tx_hash) {
        return Err(IvxpError::new(ErrorCode::PaymentNotVerified, "transaction already used for another order").into());
    }

    if !validate::is_tx_hash(&body.payment_proof.tx_hash) {
        return Err(IvxpError::new(ErrorCode::InvalidTxHash, "malformed tx_hash").into());
    }
    let from: alloy::primitives::Address = body
        .payment_proof
        .from_address
        .parse()
        .map_err(|_| IvxpError::new(ErrorCode::InvalidRequest, "malformed from_address"))?;
    let to: alloy::primitives::Address = order
        .payment_address
        .parse()
        .map_err(|_| IvxpError::new(ErrorCode::ProviderError, "provider payment_address is malformed"))?;

    // 5. Payment verification: Ok(false) -> 402; Err -> propagate 5xx.
    let expected = ExpectedPayment {
        from,
        to,
        amount_base_units: order.price_usdc.to_base_units(),
        network: order.network,
    };
    let verified = state
        .payment_verifier
        .verify(&body.payment_proof.tx_hash, &expected)
        .await
        .map_err(|e| IvxpError::new(ErrorCode::ProviderError, e.to_string()))?;
    if !verified {
        return Err(IvxpError::new(ErrorCode::PaymentNotVerified, "on-chain payment could not be verified").into());
    }

    // 6. Signature verification.
    let sig_ok = signature::verify(&body.signed_message, &body.signature, &order.client_address)
        .map_err(|e| IvxpError::new(ErrorCode::SignatureInvalid, e.to_string()))?;
    if !sig_ok {
        return Err(IvxpError::new(ErrorCode::SignatureVerificationFailed, "signature does not match client_address").into());
    }

    // 7. CAS transition to paid.
    let tx_hash = body.payment_proof.tx_hash.clone();
    let delivery_endpoint = body.delivery_endpoint.clone();
    let updated = state
        .store
        .update(
            &order.order_id,
            OrderStatusKind::Quoted,
            Box::new({
                let tx_hash = tx_hash.clone();
                let delivery_endpoint = delivery_endpoint.clone();
                move |o: &mut Order| {
                    o.status = OrderStatusKind::Paid;
                    o.tx_hash = Some(tx_hash);
                    o.delivery_endpoint = delivery_endpoint;
                }
            }),
        )
        .await
        .map_err(store_error_to_app)?;
    state.used_tx_hashes.insert(tx_hash);

    // 9. Dispatch the service handler asynchronously; response does not wait.
    if let Some(handler) = state.handlers.get(&updated.service_type).map(|h| h.clone()) {
        let store = state.store.clone();
        let streams = state.streams.clone();
        let order_id = updated.order_id.clone();
        let order_for_handler = updated.clone();
        state.task_tracker.spawn(async move {
            dispatch_service_handler(store, streams, order_id, order_for_handler, handler).await;
        });
    } else {
        let store = state.store.clone();
        let order_id = updated.order_id.clone();
        state.task_tracker.spawn(async move {
            let _ = store
                .update(&order_id, OrderStatusKind::Paid, Box::new(|o: &mut Order| {
                    o.status = OrderStatusKind::DeliveryFailed;
                }))
                .await;
            tracing::error!(order_id, "no service handler registered for order's service_type");
        });
    }

    let stream_url = if state.catalog.supports_sse() {
        Some(format!("/ivxp/orders/{}/stream", updated.order_id))
    } else {
        None
    };

    // 8. Return 200 DeliveryAccepted.
    Ok(Json(DeliveryAccepted {
        order_id: updated.order_id,
        status: "accepted".to_string(),
        message: "payment verified, processing started".to_string(),
        stream_url,
        extra: Default::default(),
    }))
}

async fn dispatch_service_handler(
    store: Arc<dyn crate::store::OrderStorage>,
    streams: Arc<dashmap::DashMap<String, tokio::sync::broadcast::Sender<StreamEvent>>>,
    order_id: String,
    order: Order,
    handler: Arc<dyn crate::provider::ServiceHandler>,
) {
    let sender = streams.entry(order_id.clone()).or_insert_with(|| tokio::sync::broadcast::channel(32).0).clone();
    let _ = sender.send(StreamEvent::StatusUpdate { status: "processing".to_string() });

    match handler.handle(&order).await {
        Ok(ProcessedDeliverable { content, content_type }) => {
            let content_hash = crate::delivery::sha256_hex(content.as_bytes());
            let result = store
                .update(
                    &order_id,
                    OrderStatusKind::Paid,
                    Box::new({
                        let content_hash = content_hash.clone();
                        move |o: &mut Order| {
                            o.status = OrderStatusKind::Delivered;
                            o.deliverable = Some(crate::store::Deliverable {
                                content,
                                content_type,
                                content_hash,
                            });
                        }
                    }),
                )
                .await;
            if result.is_ok() {
                let _ = sender.send(StreamEvent::Completed { content_hash });
            }
        }
        Err(reason) => {
            tracing::error!(order_id, reason, "service handler failed");
            let _ = store
                .update(
                    &order_id,
                    OrderStatusKind::Paid,
                    Box::new(|o: &mut Order| {
                        o.status = OrderStatusKind::DeliveryFailed;
                    }),
                )
                .await;
            let _ = sender.send(StreamEvent::Failed { reason });
        }
    }
}

#[tracing::instrument(skip(state))]
pub async fn get_status(
    State(state): State<Arc<ProviderEngine>>,
    Path(order_id): Path<String>,
) -> Result<Response, AppError> {
    let order = state.store.get(&order_id).await.map_err(store_error_to_app)?;
    let status = crate::codec::messages::OrderStatus {
        order_id: order.order_id.clone(),
        status: order.status.to_string(),
        created_at: order.created_at.to_rfc3339(),
        service_type: order.service_type.clone(),
        price_usdc: order.price_usdc,
        content_hash: order.deliverable.as_ref().map(|d| d.content_hash.clone()),
        extra: Default::default(),
    };
    let code = if order.status.is_terminal() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((code, Json(status)).into_response())
}

#[tracing::instrument(skip(state))]
pub async fn get_download(
    State(state): State<Arc<ProviderEngine>>,
    Path(order_id): Path<String>,
) -> Result<Json<crate::codec::messages::Deliverable>, AppError> {
    let order = state.store.get(&order_id).await.map_err(store_error_to_app)?;
    let Some(deliverable) = order.deliverable else {
        return Err(IvxpError::new(ErrorCode::OrderNotFound, "deliverable not ready").into());
    };
    Ok(Json(crate::codec::messages::Deliverable {
        protocol: crate::codec::messages::ProtocolV1,
        message_type: crate::codec::messages::MsgServiceDelivery,
        timestamp: Utc::now().to_rfc3339(),
        order_id: order.order_id,
        status: "completed".to_string(),
        deliverable: crate::codec::messages::DeliverableBody {
            content_type: deliverable.content_type,
            format: None,
            content: deliverable.content,
            extra: Default::default(),
        },
        content_hash: deliverable.content_hash,
        delivered_at: Some(order.updated_at.to_rfc3339()),
        extra: Default::default(),
    }))
}

#[tracing::instrument(skip(state))]
pub async fn get_stream(
    State(state): State<Arc<ProviderEngine>>,
    Path(order_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let sender = state.stream_sender(&order_id);
    let stream = BroadcastStream::new(sender.subscribe()).filter_map(|item| match item {
        Ok(event) => {
            let name = event.event_name();
            serde_json::to_string(&event)
                .ok()
                .map(|data| Ok(Event::default().event(name).data(data)))
        }
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
