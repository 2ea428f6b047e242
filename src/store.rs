//! C2 — Order Store.
//!
//! `update` is conditional on the order's current status (compare-and-swap)
//! so that two concurrent `/deliver` calls for the same order cannot both
//! transition `quoted -> paid`. The default implementation is a
//! `DashMap<order_id, Mutex<Order>>` — a single-writer mutex per order id,
//! as required by spec §4.2. Pluggable implementations (SQLite, Postgres)
//! must preserve the same atomic-transition contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::network::Network;
use crate::price::PriceUsdc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatusKind {
    Quoted,
    Paid,
    Delivered,
    DeliveryFailed,
    Confirmed,
}

impl OrderStatusKind {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatusKind::Delivered | OrderStatusKind::DeliveryFailed | OrderStatusKind::Confirmed
        )
    }

    /// The status-transition DAG from spec §4.3. No status ever regresses.
    pub fn allows_transition_to(self, next: OrderStatusKind) -> bool {
        use OrderStatusKind::*;
        matches!(
            (self, next),
            (Quoted, Paid)
                | (Paid, Delivered)
                | (Paid, DeliveryFailed)
                | (Delivered, Confirmed)
                | (DeliveryFailed, Confirmed)
        )
    }
}

impl std::fmt::Display for OrderStatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatusKind::Quoted => "quoted",
            OrderStatusKind::Paid => "paid",
            OrderStatusKind::Delivered => "delivered",
            OrderStatusKind::DeliveryFailed => "delivery_failed",
            OrderStatusKind::Confirmed => "confirmed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deliverable {
    pub content: String,
    pub content_type: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub status: OrderStatusKind,
    pub client_address: String,
    pub payment_address: String,
    pub service_type: String,
    pub price_usdc: PriceUsdc,
    pub network: Network,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliverable: Option<Deliverable>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new_quoted(
        client_address: String,
        payment_address: String,
        service_type: String,
        price_usdc: PriceUsdc,
        network: Network,
    ) -> Self {
        let now = Utc::now();
        Order {
            order_id: format!("ivxp-{}", Uuid::new_v4()),
            status: OrderStatusKind::Quoted,
            client_address,
            payment_address,
            service_type,
            price_usdc,
            network,
            tx_hash: None,
            delivery_endpoint: None,
            deliverable: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Error)]
pub enum OrderStoreError {
    #[error("order not found: {0}")]
    NotFound(String),
    #[error("order {order_id} is {actual}, expected {expected}")]
    Cas {
        order_id: String,
        expected: OrderStatusKind,
        actual: OrderStatusKind,
    },
    #[error("order {0} already exists")]
    AlreadyExists(String),
}

#[derive(Debug, Default, Clone)]
pub struct OrderFilter {
    pub status: Option<OrderStatusKind>,
    pub service_type: Option<String>,
}

impl OrderFilter {
    fn matches(&self, order: &Order) -> bool {
        self.status.is_none_or(|s| s == order.status)
            && self
                .service_type
                .as_ref()
                .is_none_or(|t| t == &order.service_type)
    }
}

#[async_trait]
pub trait OrderStorage: Send + Sync {
    async fn create(&self, order: Order) -> Result<Order, OrderStoreError>;
    async fn get(&self, order_id: &str) -> Result<Order, OrderStoreError>;
    /// Conditionally mutates the order: `expected` must match the order's
    /// current status or the update is rejected with [`OrderStoreError::Cas`].
    async fn update(
        &self,
        order_id: &str,
        expected: OrderStatusKind,
        patch: Box<dyn FnOnce(&mut Order) + Send>,
    ) -> Result<Order, OrderStoreError>;
    async fn list(&self, filter: OrderFilter) -> Result<Vec<Order>, OrderStoreError>;
    async fn delete(&self, order_id: &str) -> Result<(), OrderStoreError>;
}

/// Default in-memory order store: one mutex per order id behind a
/// concurrent map, giving the single-writer-per-order-id contract §4.2
/// requires without serializing unrelated orders against each other.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    orders: Arc<DashMap<String, Arc<Mutex<Order>>>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStorage for InMemoryOrderStore {
    async fn create(&self, order: Order) -> Result<Order, OrderStoreError> {
        if self.orders.contains_key(&order.order_id) {
            return Err(OrderStoreError::AlreadyExists(order.order_id));
        }
        let order_id = order.order_id.clone();
        let stored = order.clone();
        self.orders.insert(order_id, Arc::new(Mutex::new(order)));
        Ok(stored)
    }

    async fn get(&self, order_id: &str) -> Result<Order, OrderStoreError> {
        let entry = self
            .orders
            .get(order_id)
            .ok_or_else(|| OrderStoreError::NotFound(order_id.to_string()))?;
        let guard = entry.lock().await;
        Ok(guard.clone())
    }

    async fn update(
        &self,
        order_id: &str,
        expected: OrderStatusKind,
        patch: Box<dyn FnOnce(&mut Order) + Send>,
    ) -> Result<Order, OrderStoreError> {
        let entry = self
            .orders
            .get(order_id)
            .ok_or_else(|| OrderStoreError::NotFound(order_id.to_string()))?
            .clone();
        let mut guard = entry.lock().await;
        if guard.status != expected {
            return Err(OrderStoreError::Cas {
                order_id: order_id.to_string(),
                expected,
                actual: guard.status,
            });
        }
        patch(&mut guard);
        guard.updated_at = Utc::now();
        Ok(guard.clone())
    }

    async fn list(&self, filter: OrderFilter) -> Result<Vec<Order>, OrderStoreError> {
        let mut out = Vec::new();
        for entry in self.orders.iter() {
            let guard = entry.value().lock().await;
            if filter.matches(&guard) {
                out.push(guard.clone());
            }
        }
        Ok(out)
    }

    async fn delete(&self, order_id: &str) -> Result<(), OrderStoreError> {
        self.orders
            .remove(order_id)
            .map(|_| ())
            .ok_or_else(|| OrderStoreError::NotFound(order_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_order() -> Order {
        Order::new_quoted(
            "0x000000000000000000000000000000000000dEaD".into(),
            "0xAdAdAdAdAdAdAdAdAdAdAdAdAdAdAdAdAdAdAdAd".into(),
            "text_echo".into(),
            PriceUsdc::parse("1.00").unwrap(),
            Network::BaseSepolia,
        )
    }

    #[tokio::test]
    async fn cas_update_rejects_wrong_expected_status() {
        let store = InMemoryOrderStore::new();
        let order = store.create(sample_order()).await.unwrap();
        let err = store
            .update(&order.order_id, OrderStatusKind::Paid, Box::new(|_| {}))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderStoreError::Cas { .. }));
    }

    #[tokio::test]
    async fn cas_update_succeeds_once_and_rejects_second_concurrent_call() {
        let store = InMemoryOrderStore::new();
        let order = store.create(sample_order()).await.unwrap();

        let first = store
            .update(&order.order_id, OrderStatusKind::Quoted, Box::new(|o| {
                o.status = OrderStatusKind::Paid;
                o.tx_hash = Some("0x".to_string() + &"a".repeat(64));
            }))
            .await;
        assert!(first.is_ok());

        let second = store
            .update(&order.order_id, OrderStatusKind::Quoted, Box::new(|o| {
                o.status = OrderStatusKind::Paid;
            }))
            .await;
        assert!(matches!(second, Err(OrderStoreError::Cas { .. })));
    }

    #[test]
    fn status_dag_forbids_regression() {
        assert!(OrderStatusKind::Quoted.allows_transition_to(OrderStatusKind::Paid));
        assert!(!OrderStatusKind::Paid.allows_transition_to(OrderStatusKind::Quoted));
        assert!(!OrderStatusKind::Delivered.allows_transition_to(OrderStatusKind::Paid));
        assert!(OrderStatusKind::Delivered.allows_transition_to(OrderStatusKind::Confirmed));
    }
}
