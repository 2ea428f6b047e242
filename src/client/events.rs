//! The Client Engine's event bus (spec §4.6, §9 "event emitter with
//! hooks"): a typed publish/subscribe surface over a closed set of event
//! tags — no dynamic string keys outside this enum. Every subscription
//! returns an `unsubscribe` disposer.

use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub enum IvxpEvent {
    OrderQuoted { order_id: String },
    PaymentSent { order_id: String, tx_hash: String },
    PaymentConfirmed { order_id: String, tx_hash: String },
    OrderPaid { order_id: String },
    OrderDelivered { order_id: String, content_hash: String },
    OrderConfirmed { order_id: String },
    /// Emitted when SSE is abandoned in favor of polling (spec §4.6).
    SseFallback { order_id: String, reason: String },
}

/// A closed-set publish/subscribe bus. Emissions for a successful run MUST
/// follow the relative order in spec §4.6:
/// `order.quoted -> payment.sent -> payment.confirmed -> order.paid ->
/// order.delivered (-> order.confirmed)`, with `sse_fallback` interleaved
/// whenever SSE is abandoned.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<IvxpEvent>>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(64);
        EventBus { sender }
    }
}

/// Disposer returned by [`EventBus::subscribe`].
pub struct Subscription {
    receiver: broadcast::Receiver<Arc<IvxpEvent>>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Arc<IvxpEvent>> {
        self.receiver.recv().await.ok()
    }

    /// Disposer: dropping the subscription is itself sufficient
    /// (the receiver simply stops being polled), but an explicit method is
    /// kept so callers that hold the subscription behind a trait object
    /// have something to call.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn emit(&self, event: IvxpEvent) {
        // No receivers is not an error: emission is fire-and-forget.
        let _ = self.sender.send(Arc::new(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_observes_emitted_events_in_order() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        bus.emit(IvxpEvent::OrderQuoted { order_id: "ivxp-1".into() });
        bus.emit(IvxpEvent::PaymentSent {
            order_id: "ivxp-1".into(),
            tx_hash: "0xabc".into(),
        });

        let first = sub.recv().await.unwrap();
        assert!(matches!(*first, IvxpEvent::OrderQuoted { .. }));
        let second = sub.recv().await.unwrap();
        assert!(matches!(*second, IvxpEvent::PaymentSent { .. }));
    }
}
