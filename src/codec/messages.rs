//! Canonical IVXP/1.0 message shapes (spec §6). All other fields pass
//! through unmodified via each struct's `extra` catch-all.

use crate::lit_str;
use crate::price::PriceUsdc;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

lit_str!(ProtocolV1, "IVXP/1.0");
lit_str!(MsgServiceRequest, "service_request");
lit_str!(MsgServiceQuote, "service_quote");
lit_str!(MsgDeliveryRequest, "delivery_request");
lit_str!(MsgServiceDelivery, "service_delivery");

fn no_extra() -> serde_json::Map<String, serde_json::Value> {
    serde_json::Map::new()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceOffering {
    #[serde(rename = "type")]
    pub service_type: String,
    pub base_price_usdc: PriceUsdc,
    pub estimated_delivery_hours: u32,
    #[serde(flatten, default = "no_extra")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCatalog {
    pub protocol: ProtocolV1,
    pub provider: String,
    pub wallet_address: String,
    pub services: Vec<ServiceOffering>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(flatten, default = "no_extra")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ServiceCatalog {
    pub fn supports_sse(&self) -> bool {
        self.capabilities
            .as_ref()
            .is_some_and(|caps| caps.iter().any(|c| c == "sse"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientAgent {
    pub name: String,
    pub wallet_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_endpoint: Option<String>,
    #[serde(flatten, default = "no_extra")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequestBody {
    #[serde(rename = "type")]
    pub service_type: String,
    pub description: String,
    pub budget_usdc: PriceUsdc,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    #[serde(flatten, default = "no_extra")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub protocol: ProtocolV1,
    pub message_type: MsgServiceRequest,
    pub timestamp: String,
    pub client_agent: ClientAgent,
    pub service_request: ServiceRequestBody,
    #[serde(flatten, default = "no_extra")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderAgent {
    pub name: String,
    pub wallet_address: String,
    #[serde(flatten, default = "no_extra")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteBody {
    pub price_usdc: PriceUsdc,
    pub estimated_delivery: String,
    pub payment_address: String,
    pub network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_contract: Option<String>,
    #[serde(flatten, default = "no_extra")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceQuote {
    pub protocol: ProtocolV1,
    pub message_type: MsgServiceQuote,
    pub timestamp: String,
    pub order_id: String,
    pub provider_agent: ProviderAgent,
    pub quote: QuoteBody,
    #[serde(flatten, default = "no_extra")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentProof {
    pub tx_hash: String,
    pub from_address: String,
    pub network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_usdc: Option<PriceUsdc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(flatten, default = "no_extra")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRequest {
    pub protocol: ProtocolV1,
    pub message_type: MsgDeliveryRequest,
    pub timestamp: String,
    pub order_id: String,
    pub payment_proof: PaymentProof,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_endpoint: Option<String>,
    pub signature: String,
    pub signed_message: String,
    #[serde(flatten, default = "no_extra")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAccepted {
    pub order_id: String,
    pub status: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
    #[serde(flatten, default = "no_extra")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatus {
    pub order_id: String,
    pub status: String,
    pub created_at: String,
    pub service_type: String,
    pub price_usdc: PriceUsdc,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(flatten, default = "no_extra")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverableBody {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    pub content: String,
    #[serde(flatten, default = "no_extra")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deliverable {
    pub protocol: ProtocolV1,
    pub message_type: MsgServiceDelivery,
    pub timestamp: String,
    pub order_id: String,
    pub status: String,
    pub deliverable: DeliverableBody,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<String>,
    #[serde(flatten, default = "no_extra")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushCallbackDeliverable {
    pub content: String,
    pub content_hash: String,
    pub format: String,
    #[serde(flatten, default = "no_extra")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushCallback {
    pub order_id: String,
    pub status: String,
    pub deliverable: PushCallbackDeliverable,
    pub delivered_at: String,
    #[serde(flatten, default = "no_extra")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
