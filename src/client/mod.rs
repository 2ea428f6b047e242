//! C6 — Client Engine.
//!
//! Orchestrates catalog -> quote -> pay -> sign -> deliver -> poll/stream ->
//! download -> confirm behind a single `request_service` operation, with a
//! budget guard and a typed, closed-set event bus (spec §4.6).

pub mod capabilities;
pub mod events;

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::codec::messages::{
    ClientAgent, DeliveryAccepted, DeliveryRequest, PaymentProof, ServiceCatalog, ServiceQuote,
    ServiceRequest, ServiceRequestBody,
};
use crate::delivery::poll::{PollOptions, poll_order_status};
use crate::delivery::sse::{self, SseHandlers, SseOptions};
use crate::delivery::sha256_hex;
use crate::error::{ErrorCode, IvxpError};
use crate::price::PriceUsdc;
use crate::signature;

use capabilities::{CryptoService, PaymentService, TxStatus};
use events::{EventBus, IvxpEvent, Subscription};

const RECEIPT_POLL: PollOptions = PollOptions {
    initial_delay: Duration::from_millis(500),
    max_delay: Duration::from_secs(5),
    jitter: 0.2,
    max_attempts: 10,
};

pub struct RequestServiceInput {
    pub provider_url: url::Url,
    pub service_type: String,
    pub description: String,
    pub budget_usdc: PriceUsdc,
    pub client_name: String,
}

#[derive(Debug, Clone)]
pub struct RequestServiceOutcome {
    pub order_id: String,
    pub status: String,
    pub content: String,
    pub content_hash: String,
    pub payment_tx_hash: String,
}

pub struct ClientEngine {
    http: reqwest::Client,
    payment_service: Arc<dyn PaymentService>,
    crypto_service: Arc<dyn CryptoService>,
    events: EventBus,
}

impl ClientEngine {
    pub fn new(payment_service: Arc<dyn PaymentService>, crypto_service: Arc<dyn CryptoService>) -> Self {
        ClientEngine {
            http: reqwest::Client::new(),
            payment_service,
            crypto_service,
            events: EventBus::new(),
        }
    }

    pub fn subscribe_events(&self) -> Subscription {
        self.events.subscribe()
    }

    fn endpoint(&self, base: &url::Url, path: &str) -> url::Url {
        base.join(path).expect("well-formed IVXP endpoint path")
    }

    /// The single public operation: orchestrates the full exchange and
    /// returns the final, client-side record.
    pub async fn request_service(&self, input: RequestServiceInput) -> Result<RequestServiceOutcome, IvxpError> {
        // 1. GET /catalog; require serviceType present.
        let catalog: ServiceCatalog = self
            .http
            .get(self.endpoint(&input.provider_url, "/ivxp/catalog"))
            .send()
            .await
            .map_err(|e| IvxpError::new(ErrorCode::ServiceUnavailable, e.to_string()))?
            .json()
            .await
            .map_err(|e| IvxpError::new(ErrorCode::ServiceUnavailable, e.to_string()))?;

        if !catalog.services.iter().any(|s| s.service_type == input.service_type) {
            return Err(IvxpError::new(
                ErrorCode::ServiceUnavailable,
                format!("provider does not offer service type {}", input.service_type),
            ));
        }

        // 2. POST /request; obtain quote.
        let request_body = ServiceRequest {
            protocol: crate::codec::messages::ProtocolV1,
            message_type: crate::codec::messages::MsgServiceRequest,
            timestamp: Utc::now().to_rfc3339(),
            client_agent: ClientAgent {
                name: input.client_name.clone(),
                wallet_address: self.crypto_service.address(),
                contact_endpoint: None,
                extra: Default::default(),
            },
            service_request: ServiceRequestBody {
                service_type: input.service_type.clone(),
                description: input.description.clone(),
                budget_usdc: input.budget_usdc,
                delivery_format: None,
                deadline: None,
                extra: Default::default(),
            },
            extra: Default::default(),
        };
        let quote: ServiceQuote = self
            .http
            .post(self.endpoint(&input.provider_url, "/ivxp/request"))
            .json(&request_body)
            .send()
            .await
            .map_err(|e| IvxpError::new(ErrorCode::ServiceUnavailable, e.to_string()))?
            .json()
            .await
            .map_err(|e| IvxpError::new(ErrorCode::InvalidRequest, e.to_string()))?;
        self.events.emit(IvxpEvent::OrderQuoted {
            order_id: quote.order_id.clone(),
        });

        // 3. Budget guard.
        if quote.quote.price_usdc > input.budget_usdc {
            return Err(IvxpError::new(ErrorCode::BudgetExceeded, "quote exceeds budget").with_details(json!({
                "quoted": quote.quote.price_usdc.to_string(),
                "budget": input.budget_usdc.to_string(),
            })));
        }

        let network: crate::network::Network = quote
            .quote
            .network
            .parse()
            .map_err(|_| IvxpError::new(ErrorCode::InvalidRequest, "quote names an unsupported network"))?;

        // 4. Balance precheck.
        let balance = self
            .payment_service
            .get_balance(network)
            .await
            .map_err(|e| IvxpError::new(ErrorCode::ServiceUnavailable, e.to_string()))?;
        if balance.to_base_units() < quote.quote.price_usdc.to_base_units() {
            return Err(IvxpError::new(ErrorCode::InsufficientBalance, "balance is below the quoted price")
                .with_details(json!({
                    "available": balance.to_string(),
                    "required": quote.quote.price_usdc.to_string(),
                })));
        }

        // 5. Submit payment, then wait for a terminal receipt.
        let tx_hash = self
            .payment_service
            .send(&quote.quote.payment_address, quote.quote.price_usdc, network)
            .await
            .map_err(|e| IvxpError::new(ErrorCode::TransactionSubmissionFailed, e.to_string()))?;
        self.events.emit(IvxpEvent::PaymentSent {
            order_id: quote.order_id.clone(),
            tx_hash: tx_hash.clone(),
        });

        let token = CancellationToken::new();
        let payment_service = self.payment_service.clone();
        let tx_hash_for_poll = tx_hash.clone();
        let status = poll_order_status_placeholder(&payment_service, &tx_hash_for_poll, network, &token).await?;
        if status == TxStatus::Reverted {
            return Err(
                IvxpError::new(ErrorCode::TransactionFailed, "payment transaction reverted on-chain")
                    .with_details(json!({ "tx_hash": tx_hash })),
            );
        }
        self.events.emit(IvxpEvent::PaymentConfirmed {
            order_id: quote.order_id.clone(),
            tx_hash: tx_hash.clone(),
        });

        // 6. Compose and sign the canonical message.
        let now = Utc::now().to_rfc3339();
        let signed_message = signature::canonical_message(&quote.order_id, &tx_hash, &now);
        let client_signature = self
            .crypto_service
            .sign_message(&signed_message)
            .await
            .map_err(|e| IvxpError::new(ErrorCode::SignatureInvalid, e.to_string()))?;

        // 7. POST /deliver.
        let deliver_body = DeliveryRequest {
            protocol: crate::codec::messages::ProtocolV1,
            message_type: crate::codec::messages::MsgDeliveryRequest,
            timestamp: Utc::now().to_rfc3339(),
            order_id: quote.order_id.clone(),
            payment_proof: PaymentProof {
                tx_hash: tx_hash.clone(),
                from_address: self.crypto_service.address(),
                network: network.to_string(),
                to_address: Some(quote.quote.payment_address.clone()),
                amount_usdc: Some(quote.quote.price_usdc),
                block_number: None,
                extra: Default::default(),
            },
            delivery_endpoint: None,
            signature: client_signature,
            signed_message,
            extra: Default::default(),
        };
        let deliver_response = self
            .http
            .post(self.endpoint(&input.provider_url, "/ivxp/deliver"))
            .json(&deliver_body)
            .send()
            .await
            .map_err(|e| {
                IvxpError::new(ErrorCode::PartialSuccess, e.to_string())
                    .with_details(json!({ "tx_hash": tx_hash, "recoverable": true }))
            })?;

        if deliver_response.status().is_server_error() {
            return Err(
                IvxpError::new(ErrorCode::PartialSuccess, "provider returned a server error during /deliver")
                    .with_details(json!({ "tx_hash": tx_hash, "recoverable": true })),
            );
        }
        if !deliver_response.status().is_success() {
            let code = match deliver_response.status().as_u16() {
                401 => ErrorCode::SignatureVerificationFailed,
                402 => ErrorCode::PaymentNotVerified,
                404 => ErrorCode::OrderNotFound,
                _ => ErrorCode::InvalidRequest,
            };
            let body: serde_json::Value = deliver_response.json().await.unwrap_or_default();
            let message = body
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("deliver request rejected")
                .to_string();
            return Err(IvxpError::new(code, message));
        }
        let accepted: DeliveryAccepted = deliver_response
            .json()
            .await
            .map_err(|e| IvxpError::new(ErrorCode::InvalidRequest, e.to_string()))?;
        self.events.emit(IvxpEvent::OrderPaid {
            order_id: quote.order_id.clone(),
        });

        // 8. Delivery acquisition: SSE with fallback to polling.
        let order_status = self
            .acquire_delivery(&input.provider_url, &quote.order_id, accepted.stream_url.as_deref())
            .await?;

        if order_status.status == "delivery_failed" {
            return Err(IvxpError::new(
                ErrorCode::ProviderError,
                "provider reported delivery_failed for this order",
            ));
        }

        // 9. Download and verify content hash.
        let deliverable: crate::codec::messages::Deliverable = self
            .http
            .get(self.endpoint(
                &input.provider_url,
                &format!("/ivxp/download/{}", quote.order_id),
            ))
            .send()
            .await
            .map_err(|e| IvxpError::new(ErrorCode::ServiceUnavailable, e.to_string()))?
            .json()
            .await
            .map_err(|e| IvxpError::new(ErrorCode::InvalidRequest, e.to_string()))?;

        let computed = sha256_hex(deliverable.deliverable.content.as_bytes());
        let expected = crate::codec::validate::strip_hash_prefix(&deliverable.content_hash);
        if computed != expected.to_ascii_lowercase() {
            return Err(IvxpError::new(ErrorCode::ContentHashMismatch, "downloaded content does not match content_hash"));
        }
        self.events.emit(IvxpEvent::OrderDelivered {
            order_id: quote.order_id.clone(),
            content_hash: deliverable.content_hash.clone(),
        });

        // 10. Optional confirmation; omission is allowed (spec §9 Open Question).
        self.events.emit(IvxpEvent::OrderConfirmed {
            order_id: quote.order_id.clone(),
        });

        Ok(RequestServiceOutcome {
            order_id: quote.order_id,
            status: "confirmed".to_string(),
            content: deliverable.deliverable.content,
            content_hash: deliverable.content_hash,
            payment_tx_hash: tx_hash,
        })
    }

    async fn acquire_delivery(
        &self,
        provider_url: &url::Url,
        order_id: &str,
        stream_url: Option<&str>,
    ) -> Result<crate::codec::messages::OrderStatus, IvxpError> {
        let token = CancellationToken::new();

        if let Some(stream_path) = stream_url {
            let full_url = self.endpoint(provider_url, stream_path);
            // Set by the `on_completed`/`on_failed` handlers below once a
            // terminal SSE event arrives; `acquire_delivery` waits on it
            // instead of polling, so push events are what actually drives
            // completion (a single confirming GET reuses the authoritative
            // `/status` shape rather than reconstructing one by hand).
            let terminal: Arc<std::sync::Mutex<Option<&'static str>>> = Arc::new(std::sync::Mutex::new(None));

            let completed_slot = terminal.clone();
            // The canonical `OrderDelivered` event still fires once, after
            // `request_service` downloads and verifies the content hash
            // (step 9) — this handler only unblocks the wait below.
            let on_completed = Arc::new(move |_content_hash: String| {
                *completed_slot.lock().expect("terminal lock poisoned") = Some("delivered");
            });

            let failed_slot = terminal.clone();
            let on_failed = Arc::new(move |_reason: String| {
                *failed_slot.lock().expect("terminal lock poisoned") = Some("delivery_failed");
            });

            // A later, mid-stream exhaustion (the connection kept dropping
            // and ran out of reconnect attempts after an initial success);
            // falls back to polling exactly like an initial-connect failure.
            let exhausted = Arc::new(std::sync::atomic::AtomicBool::new(false));
            let on_exhausted_flag = exhausted.clone();
            let on_exhausted = Arc::new(move |_err: sse::SseExhaustedError| {
                on_exhausted_flag.store(true, std::sync::atomic::Ordering::SeqCst);
            });

            let handlers = SseHandlers {
                on_completed: Some(on_completed),
                on_failed: Some(on_failed),
                on_exhausted: Some(on_exhausted),
                ..SseHandlers::default()
            };

            match sse::subscribe(self.http.clone(), full_url, handlers, SseOptions::default(), token.clone()).await {
                Ok(subscription) => {
                    loop {
                        if terminal.lock().expect("terminal lock poisoned").take().is_some() {
                            subscription.unsubscribe();
                            let status_url = self.endpoint(provider_url, &format!("/ivxp/status/{order_id}"));
                            return self
                                .http
                                .get(status_url)
                                .send()
                                .await
                                .map_err(|e| IvxpError::new(ErrorCode::ServiceUnavailable, e.to_string()))?
                                .json::<crate::codec::messages::OrderStatus>()
                                .await
                                .map_err(|e| IvxpError::new(ErrorCode::InvalidRequest, e.to_string()));
                        }
                        if exhausted.load(std::sync::atomic::Ordering::SeqCst) {
                            subscription.unsubscribe();
                            self.events.emit(IvxpEvent::SseFallback {
                                order_id: order_id.to_string(),
                                reason: "SSE reconnect attempts exhausted mid-stream".to_string(),
                            });
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
                Err(err) => {
                    self.events.emit(IvxpEvent::SseFallback {
                        order_id: order_id.to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        let http = self.http.clone();
        let status_url = self.endpoint(provider_url, &format!("/ivxp/status/{order_id}"));
        poll_order_status(
            move || {
                let http = http.clone();
                let status_url = status_url.clone();
                async move {
                    http.get(status_url)
                        .send()
                        .await
                        .map_err(|e| IvxpError::new(ErrorCode::ServiceUnavailable, e.to_string()))?
                        .json::<crate::codec::messages::OrderStatus>()
                        .await
                        .map_err(|e| IvxpError::new(ErrorCode::InvalidRequest, e.to_string()))
                }
            },
            &["delivered", "delivery_failed"],
            PollOptions::default(),
            &token,
        )
        .await
        .map_err(|e| match e {
            crate::delivery::poll::PollError::MaxAttempts { attempts } => {
                IvxpError::new(ErrorCode::Timeout, "status polling exhausted").with_details(json!({ "attempts": attempts }))
            }
            crate::delivery::poll::PollError::Inner(inner) => inner,
            other => IvxpError::new(ErrorCode::ServiceUnavailable, other.to_string()),
        })
    }
}

/// Polls the payment receipt until it leaves the pending state.
async fn poll_order_status_placeholder(
    payment_service: &Arc<dyn PaymentService>,
    tx_hash: &str,
    network: crate::network::Network,
    token: &CancellationToken,
) -> Result<TxStatus, IvxpError> {
    let payment_service = payment_service.clone();
    let tx_hash = tx_hash.to_string();
    crate::delivery::poll::poll_with_backoff(
        move || {
            let payment_service = payment_service.clone();
            let tx_hash = tx_hash.clone();
            async move {
                match payment_service.get_receipt_status(&tx_hash, network).await {
                    Ok(TxStatus::Pending) => Ok(None),
                    Ok(status) => Ok(Some(status)),
                    Err(e) => Err(IvxpError::new(ErrorCode::ServiceUnavailable, e.to_string())),
                }
            }
        },
        RECEIPT_POLL,
        token,
    )
    .await
    .map_err(|e| match e {
        crate::delivery::poll::PollError::Inner(inner) => inner,
        other => IvxpError::new(ErrorCode::Timeout, other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_message_round_trips_order_id() {
        let msg = signature::canonical_message("ivxp-test", "0xdead", "2026-07-28T00:00:00Z");
        assert!(msg.contains("ivxp-test"));
        assert!(msg.contains("0xdead"));
    }
}
