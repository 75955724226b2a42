//! Order Aggregate
//!
//! Totals are fixed when the order is placed. After that only payment
//! transitions move it forward.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::tax::TaxBreakdown;
use crate::domain::value_objects::{Address, Locale, Money};

#[derive(Clone, Debug)]
pub struct Order {
    id: Uuid,
    order_number: String,
    customer_email: String,
    locale: Locale,
    status: OrderStatus,
    payment_status: PaymentStatus,
    items: Vec<LineItem>,
    totals: OrderTotals,
    promo_code_id: Option<Uuid>,
    promo_code: Option<String>,
    shipping_address: Address,
    payment_session_id: Option<String>,
    payment_intent_id: Option<String>,
    amount_refunded: Money,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem { pub id: Uuid, pub product_id: Uuid, pub format_id: Uuid, pub name: String, pub sku: String, pub quantity: u32, pub unit_price: Money, pub total: Money }

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals { pub subtotal: Money, pub discount: Money, pub shipping: Money, pub taxes: TaxBreakdown, pub tax_total: Money, pub total: Money }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus { #[default] Pending, Confirmed, Processing, Shipped, Delivered, Cancelled }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus { #[default] Pending, Paid, Failed, PartiallyRefunded, Refunded }

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING", Self::Confirmed => "CONFIRMED", Self::Processing => "PROCESSING",
            Self::Shipped => "SHIPPED", Self::Delivered => "DELIVERED", Self::Cancelled => "CANCELLED",
        }
    }
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "PENDING" => Self::Pending, "CONFIRMED" => Self::Confirmed, "PROCESSING" => Self::Processing,
            "SHIPPED" => Self::Shipped, "DELIVERED" => Self::Delivered, "CANCELLED" => Self::Cancelled,
            _ => return None,
        })
    }
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING", Self::Paid => "PAID", Self::Failed => "FAILED",
            Self::PartiallyRefunded => "PARTIALLY_REFUNDED", Self::Refunded => "REFUNDED",
        }
    }
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "PENDING" => Self::Pending, "PAID" => Self::Paid, "FAILED" => Self::Failed,
            "PARTIALLY_REFUNDED" => Self::PartiallyRefunded, "REFUNDED" => Self::Refunded,
            _ => return None,
        })
    }
}

/// Plain, serializable view of an order. Also the persistence shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub id: Uuid,
    pub order_number: String,
    pub customer_email: String,
    pub locale: Locale,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub items: Vec<LineItem>,
    pub totals: OrderTotals,
    pub promo_code_id: Option<Uuid>,
    pub promo_code: Option<String>,
    pub shipping_address: Address,
    pub payment_session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub amount_refunded: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything needed to place an order; produced by checkout from server prices.
#[derive(Clone, Debug)]
pub struct NewOrder {
    pub customer_email: String,
    pub locale: Locale,
    pub items: Vec<LineItem>,
    pub totals: OrderTotals,
    pub promo_code_id: Option<Uuid>,
    pub promo_code: Option<String>,
    pub shipping_address: Address,
}

impl Order {
    pub fn place(order_number: impl Into<String>, new: NewOrder) -> Result<Self, OrderError> {
        if new.items.is_empty() { return Err(OrderError::NoItems); }
        let now = Utc::now();
        let mut order = Self {
            id: Uuid::now_v7(), order_number: order_number.into(), customer_email: new.customer_email,
            locale: new.locale, status: OrderStatus::Pending, payment_status: PaymentStatus::Pending,
            items: new.items, totals: new.totals, promo_code_id: new.promo_code_id, promo_code: new.promo_code,
            shipping_address: new.shipping_address, payment_session_id: None, payment_intent_id: None,
            amount_refunded: Money::default(), created_at: now, updated_at: now, events: vec![],
        };
        order.raise_event(DomainEvent::Order(OrderEvent::Created {
            order_id: order.id, order_number: order.order_number.clone(), total: order.totals.total.amount(),
        }));
        Ok(order)
    }

    pub fn restore(s: OrderSnapshot) -> Self {
        Self {
            id: s.id, order_number: s.order_number, customer_email: s.customer_email, locale: s.locale,
            status: s.status, payment_status: s.payment_status, items: s.items, totals: s.totals,
            promo_code_id: s.promo_code_id, promo_code: s.promo_code, shipping_address: s.shipping_address,
            payment_session_id: s.payment_session_id, payment_intent_id: s.payment_intent_id,
            amount_refunded: s.amount_refunded, created_at: s.created_at, updated_at: s.updated_at, events: vec![],
        }
    }

    pub fn snapshot(&self) -> OrderSnapshot {
        OrderSnapshot {
            id: self.id, order_number: self.order_number.clone(), customer_email: self.customer_email.clone(),
            locale: self.locale, status: self.status, payment_status: self.payment_status, items: self.items.clone(),
            totals: self.totals.clone(), promo_code_id: self.promo_code_id, promo_code: self.promo_code.clone(),
            shipping_address: self.shipping_address.clone(), payment_session_id: self.payment_session_id.clone(),
            payment_intent_id: self.payment_intent_id.clone(), amount_refunded: self.amount_refunded.clone(),
            created_at: self.created_at, updated_at: self.updated_at,
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_number(&self) -> &str { &self.order_number }
    pub fn customer_email(&self) -> &str { &self.customer_email }
    pub fn locale(&self) -> Locale { self.locale }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn payment_status(&self) -> PaymentStatus { self.payment_status }
    pub fn totals(&self) -> &OrderTotals { &self.totals }
    pub fn total(&self) -> &Money { &self.totals.total }
    pub fn items(&self) -> &[LineItem] { &self.items }
    pub fn promo_code_id(&self) -> Option<Uuid> { self.promo_code_id }
    pub fn payment_session_id(&self) -> Option<&str> { self.payment_session_id.as_deref() }
    pub fn payment_intent_id(&self) -> Option<&str> { self.payment_intent_id.as_deref() }
    pub fn amount_refunded(&self) -> &Money { &self.amount_refunded }

    pub fn attach_payment_session(&mut self, session_id: impl Into<String>) {
        self.payment_session_id = Some(session_id.into());
        self.touch();
    }

    /// Returns `Ok(false)` when the order is already paid.
    pub fn mark_paid(&mut self, payment_intent_id: Option<String>) -> Result<bool, OrderError> {
        match self.payment_status {
            PaymentStatus::Pending | PaymentStatus::Failed => {}
            PaymentStatus::Paid | PaymentStatus::PartiallyRefunded | PaymentStatus::Refunded => return Ok(false),
        }
        self.payment_status = PaymentStatus::Paid;
        self.status = OrderStatus::Confirmed;
        if payment_intent_id.is_some() { self.payment_intent_id = payment_intent_id; }
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::Paid {
            order_id: self.id, payment_intent_id: self.payment_intent_id.clone(), total: self.totals.total.amount(),
        }));
        Ok(true)
    }

    /// Only a pending payment can fail; anything else is left untouched.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> bool {
        if self.payment_status != PaymentStatus::Pending { return false; }
        self.payment_status = PaymentStatus::Failed;
        self.status = OrderStatus::Cancelled;
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::PaymentFailed { order_id: self.id, reason: reason.into() }));
        true
    }

    /// `refunded_total` is cumulative, as reported by the payment provider.
    pub fn record_refund(&mut self, refunded_total: Money) -> Result<bool, OrderError> {
        match self.payment_status {
            PaymentStatus::Paid | PaymentStatus::PartiallyRefunded => {}
            PaymentStatus::Refunded => return Ok(false),
            PaymentStatus::Pending | PaymentStatus::Failed => return Err(OrderError::NotPaid),
        }
        if refunded_total.amount() <= self.amount_refunded.amount() { return Ok(false); }
        let fully = refunded_total.amount() >= self.totals.total.amount();
        self.amount_refunded = refunded_total.min(self.totals.total.clone());
        if fully {
            self.payment_status = PaymentStatus::Refunded;
            self.status = OrderStatus::Cancelled;
        } else {
            self.payment_status = PaymentStatus::PartiallyRefunded;
        }
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::Refunded {
            order_id: self.id, amount_refunded: self.amount_refunded.amount(), fully_refunded: fully,
        }));
        Ok(true)
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("order has no items")]
    NoItems,
    #[error("order has not been paid")]
    NotPaid,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn new_order(total_cents: i64) -> NewOrder {
        let price = Money::from_cents(total_cents);
        NewOrder {
            customer_email: "test@example.com".into(), locale: Locale::Fr,
            items: vec![LineItem { id: Uuid::now_v7(), product_id: Uuid::now_v7(), format_id: Uuid::now_v7(), name: "BPC-157 - 5mg".into(), sku: "BPC-5".into(), quantity: 1, unit_price: price.clone(), total: price.clone() }],
            totals: OrderTotals { subtotal: price.clone(), total: price, ..Default::default() },
            promo_code_id: None, promo_code: None, shipping_address: Address::default(),
        }
    }

    #[test]
    fn test_order_workflow() {
        let mut order = Order::place("PP-00000001", new_order(5000)).unwrap();
        assert_eq!(order.status(), OrderStatus::Pending);
        assert!(order.mark_paid(Some("pi_1".into())).unwrap());
        assert_eq!(order.status(), OrderStatus::Confirmed);
        assert_eq!(order.payment_status(), PaymentStatus::Paid);
        assert!(!order.mark_paid(Some("pi_1".into())).unwrap());
        let events = order.take_events();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_no_items() {
        let mut new = new_order(100);
        new.items.clear();
        assert_eq!(Order::place("PP-1", new).unwrap_err(), OrderError::NoItems);
    }

    #[test]
    fn test_failure_only_from_pending() {
        let mut order = Order::place("PP-2", new_order(5000)).unwrap();
        assert!(order.mark_failed("card_declined"));
        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert!(!order.mark_failed("again"));
        // a retried payment in the same session can still settle
        assert!(order.mark_paid(None).unwrap());
        assert!(!order.mark_failed("late"));
        assert_eq!(order.payment_status(), PaymentStatus::Paid);
    }

    #[test]
    fn test_refunds() {
        let mut order = Order::place("PP-3", new_order(5000)).unwrap();
        assert_eq!(order.record_refund(Money::from_cents(100)), Err(OrderError::NotPaid));
        order.mark_paid(None).unwrap();
        assert!(order.record_refund(Money::from_cents(2000)).unwrap());
        assert_eq!(order.payment_status(), PaymentStatus::PartiallyRefunded);
        assert!(!order.record_refund(Money::from_cents(2000)).unwrap());
        assert!(order.record_refund(Money::from_cents(5000)).unwrap());
        assert_eq!(order.payment_status(), PaymentStatus::Refunded);
        assert_eq!(order.status(), OrderStatus::Cancelled);
    }

    #[test]
    fn test_snapshot_restore() {
        let order = Order::place("PP-4", new_order(1234)).unwrap();
        let restored = Order::restore(order.snapshot());
        assert_eq!(restored.snapshot(), order.snapshot());
    }
}
