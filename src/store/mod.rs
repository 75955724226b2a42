//! Persistence seam for checkout and webhooks.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::domain::aggregates::{InventoryReservation, Order, ProductFormat};
use crate::domain::promo::PromoCode;
use crate::domain::value_objects::Money;
use crate::Result;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WebhookStatus { Processing, Completed, Failed }

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Processing => "PROCESSING", Self::Completed => "COMPLETED", Self::Failed => "FAILED" }
    }
    pub fn parse(s: &str) -> Option<Self> {
        match s { "PROCESSING" => Some(Self::Processing), "COMPLETED" => Some(Self::Completed), "FAILED" => Some(Self::Failed), _ => None }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WebhookClaim {
    /// This worker owns the event and must finish it.
    Claimed,
    /// Already completed, or being processed elsewhere.
    Duplicate(WebhookStatus),
}

/// Result of a payment transition. `order` still holds the raised events.
#[derive(Debug)]
pub struct Transition {
    pub order: Order,
    pub changed: bool,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Formats with their open (unexpired) reservations already counted.
    async fn load_formats(&self, format_ids: &[Uuid]) -> Result<Vec<ProductFormat>>;

    /// `code` is matched case-insensitively.
    async fn find_promo(&self, code: &str) -> Result<Option<PromoCode>>;

    /// Paid orders by this email that used the promo.
    async fn count_customer_promo_uses(&self, promo_id: Uuid, email: &str) -> Result<u32>;

    /// Inserts the order and its reservations atomically, re-checking availability.
    async fn create_order(&self, order: &Order, reservations: &[InventoryReservation]) -> Result<()>;

    async fn attach_payment_session(&self, order_id: Uuid, session_id: &str) -> Result<()>;

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>>;
    async fn find_order_by_session(&self, session_id: &str) -> Result<Option<Order>>;
    async fn find_order_by_payment_intent(&self, payment_intent_id: &str) -> Result<Option<Order>>;

    /// On the first transition to PAID: consume reservations, decrement stock, count promo usage.
    async fn settle_payment(&self, order_id: Uuid, payment_intent_id: Option<String>) -> Result<Transition>;

    /// On the transition to FAILED: release reservations.
    async fn fail_payment(&self, order_id: Uuid, reason: &str) -> Result<Transition>;

    async fn record_refund(&self, order_id: Uuid, refunded_total: Money) -> Result<Transition>;

    async fn claim_webhook_event(&self, event_id: &str, event_type: &str, stale_after: Duration) -> Result<WebhookClaim>;
    async fn finish_webhook_event(&self, event_id: &str, status: WebhookStatus, error: Option<String>) -> Result<()>;

    /// Fails pending orders whose holds expired; returns the orders that changed.
    async fn release_expired_reservations(&self, now: DateTime<Utc>) -> Result<Vec<Order>>;
}
