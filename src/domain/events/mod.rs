//! Domain events
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Order(OrderEvent),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    Created { order_id: Uuid, order_number: String, total: Decimal },
    Paid { order_id: Uuid, payment_intent_id: Option<String>, total: Decimal },
    PaymentFailed { order_id: Uuid, reason: String },
    Refunded { order_id: Uuid, amount_refunded: Decimal, fully_refunded: bool },
}

impl DomainEvent {
    /// NATS subject the event is published on.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Order(OrderEvent::Created { .. }) => "orders.created",
            Self::Order(OrderEvent::Paid { .. }) => "orders.paid",
            Self::Order(OrderEvent::PaymentFailed { .. }) => "orders.payment_failed",
            Self::Order(OrderEvent::Refunded { .. }) => "orders.refunded",
        }
    }
}
