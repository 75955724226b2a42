//! Inventory Reservation

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus { Reserved, Released, Consumed }

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Reserved => "RESERVED", Self::Released => "RELEASED", Self::Consumed => "CONSUMED" }
    }
}

/// Holds stock for an unpaid order until payment settles or the hold expires.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryReservation {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub format_id: Uuid,
    pub quantity: u32,
    pub status: ReservationStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

impl InventoryReservation {
    pub fn hold(order_id: Uuid, product_id: Uuid, format_id: Uuid, quantity: u32, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), order_id, product_id, format_id, quantity,
            status: ReservationStatus::Reserved, expires_at: now + ttl, created_at: now, released_at: None,
        }
    }

    pub fn is_open(&self) -> bool { self.status == ReservationStatus::Reserved }
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool { self.is_open() && self.expires_at <= now }

    /// Returns false when there was nothing to release.
    pub fn release(&mut self) -> bool {
        if !self.is_open() { return false; }
        self.status = ReservationStatus::Released;
        self.released_at = Some(Utc::now());
        true
    }

    pub fn consume(&mut self) -> bool {
        if !self.is_open() { return false; }
        self.status = ReservationStatus::Consumed;
        true
    }
}
