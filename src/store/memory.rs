//! In-process store with the same transition rules as `PgStore`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Store, Transition, WebhookClaim, WebhookStatus};
use crate::domain::aggregates::{InventoryReservation, Order, OrderSnapshot, PaymentStatus, ProductFormat};
use crate::domain::promo::PromoCode;
use crate::domain::value_objects::Money;
use crate::{CheckoutError, Result};

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    formats: HashMap<Uuid, ProductFormat>,
    promos: HashMap<String, PromoCode>,
    orders: HashMap<Uuid, OrderSnapshot>,
    reservations: Vec<InventoryReservation>,
    webhooks: HashMap<String, WebhookRow>,
}

struct WebhookRow {
    status: WebhookStatus,
    started_at: DateTime<Utc>,
}

impl Inner {
    fn reserved(&self, format_id: Uuid, now: DateTime<Utc>) -> u32 {
        self.reservations.iter()
            .filter(|r| r.format_id == format_id && r.is_open() && r.expires_at > now)
            .map(|r| r.quantity)
            .sum()
    }

    fn format_view(&self, format: &ProductFormat, now: DateTime<Utc>) -> ProductFormat {
        ProductFormat::new(
            format.id(), format.product_id(), format.product_name(), format.format_name(),
            format.sku().clone(), format.price().clone(), format.stock(), self.reserved(format.id(), now), format.is_active(),
        )
    }

    fn order(&self, id: Uuid) -> Result<Order> {
        self.orders.get(&id).cloned().map(Order::restore).ok_or(CheckoutError::OrderNotFound)
    }

    fn save(&mut self, order: &Order) { self.orders.insert(order.id(), order.snapshot()); }

    fn release_for(&mut self, order_id: Uuid) {
        for r in self.reservations.iter_mut().filter(|r| r.order_id == order_id) { r.release(); }
    }

    fn fail(&mut self, order_id: Uuid, reason: &str) -> Result<Transition> {
        let mut order = self.order(order_id)?;
        let changed = order.mark_failed(reason);
        if changed {
            self.save(&order);
            self.release_for(order_id);
        }
        Ok(Transition { order, changed })
    }
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    /// `format` is taken as stock on hand; its reserved count is ignored.
    pub async fn insert_format(&self, format: ProductFormat) {
        self.inner.lock().await.formats.insert(format.id(), format);
    }

    pub async fn insert_promo(&self, promo: PromoCode) {
        self.inner.lock().await.promos.insert(PromoCode::normalize(&promo.code), promo);
    }

    pub async fn stock_of(&self, format_id: Uuid) -> Option<u32> {
        self.inner.lock().await.formats.get(&format_id).map(|f| f.stock())
    }

    pub async fn reservations_for(&self, order_id: Uuid) -> Vec<InventoryReservation> {
        self.inner.lock().await.reservations.iter().filter(|r| r.order_id == order_id).cloned().collect()
    }

    pub async fn promo_usage(&self, code: &str) -> Option<u32> {
        self.inner.lock().await.promos.get(&PromoCode::normalize(code)).map(|p| p.usage_count)
    }

    pub async fn webhook_status(&self, event_id: &str) -> Option<WebhookStatus> {
        self.inner.lock().await.webhooks.get(event_id).map(|w| w.status)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_formats(&self, format_ids: &[Uuid]) -> Result<Vec<ProductFormat>> {
        let inner = self.inner.lock().await;
        let now = Utc::now();
        Ok(format_ids.iter().filter_map(|id| inner.formats.get(id)).map(|f| inner.format_view(f, now)).collect())
    }

    async fn find_promo(&self, code: &str) -> Result<Option<PromoCode>> {
        Ok(self.inner.lock().await.promos.get(&PromoCode::normalize(code)).cloned())
    }

    async fn count_customer_promo_uses(&self, promo_id: Uuid, email: &str) -> Result<u32> {
        let inner = self.inner.lock().await;
        let uses = inner.orders.values()
            .filter(|o| o.promo_code_id == Some(promo_id) && o.customer_email.eq_ignore_ascii_case(email))
            .filter(|o| matches!(o.payment_status, PaymentStatus::Paid | PaymentStatus::PartiallyRefunded | PaymentStatus::Refunded))
            .count();
        Ok(uses as u32)
    }

    async fn create_order(&self, order: &Order, reservations: &[InventoryReservation]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        for r in reservations {
            let format = inner.formats.get(&r.format_id).ok_or(CheckoutError::ProductUnavailable(r.format_id))?;
            inner.format_view(format, now).ensure_available(r.quantity)?;
        }
        if inner.orders.values().any(|o| o.order_number == order.order_number()) {
            return Err(CheckoutError::OrderNumberTaken(order.order_number().to_string()));
        }
        inner.save(order);
        inner.reservations.extend(reservations.iter().cloned());
        Ok(())
    }

    async fn attach_payment_session(&self, order_id: Uuid, session_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let mut order = inner.order(order_id)?;
        order.attach_payment_session(session_id);
        inner.save(&order);
        Ok(())
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.inner.lock().await.orders.get(&id).cloned().map(Order::restore))
    }

    async fn find_order_by_session(&self, session_id: &str) -> Result<Option<Order>> {
        let inner = self.inner.lock().await;
        Ok(inner.orders.values().find(|o| o.payment_session_id.as_deref() == Some(session_id)).cloned().map(Order::restore))
    }

    async fn find_order_by_payment_intent(&self, payment_intent_id: &str) -> Result<Option<Order>> {
        let inner = self.inner.lock().await;
        Ok(inner.orders.values().find(|o| o.payment_intent_id.as_deref() == Some(payment_intent_id)).cloned().map(Order::restore))
    }

    async fn settle_payment(&self, order_id: Uuid, payment_intent_id: Option<String>) -> Result<Transition> {
        let mut inner = self.inner.lock().await;
        let mut order = inner.order(order_id)?;
        let changed = order.mark_paid(payment_intent_id)?;
        if changed {
            inner.save(&order);
            for r in inner.reservations.iter_mut().filter(|r| r.order_id == order_id) { r.consume(); }
            for item in order.items() {
                if let Some(format) = inner.formats.get_mut(&item.format_id) {
                    let stock = format.stock().saturating_sub(item.quantity);
                    *format = ProductFormat::new(
                        format.id(), format.product_id(), format.product_name(), format.format_name(),
                        format.sku().clone(), format.price().clone(), stock, 0, format.is_active(),
                    );
                }
            }
            if let Some(promo_id) = order.promo_code_id() {
                if let Some(promo) = inner.promos.values_mut().find(|p| p.id == promo_id) { promo.usage_count += 1; }
            }
        }
        Ok(Transition { order, changed })
    }

    async fn fail_payment(&self, order_id: Uuid, reason: &str) -> Result<Transition> {
        self.inner.lock().await.fail(order_id, reason)
    }

    async fn record_refund(&self, order_id: Uuid, refunded_total: Money) -> Result<Transition> {
        let mut inner = self.inner.lock().await;
        let mut order = inner.order(order_id)?;
        let changed = order.record_refund(refunded_total)?;
        if changed { inner.save(&order); }
        Ok(Transition { order, changed })
    }

    async fn claim_webhook_event(&self, event_id: &str, _event_type: &str, stale_after: Duration) -> Result<WebhookClaim> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        if let Some(row) = inner.webhooks.get(event_id) {
            let reclaimable = row.status == WebhookStatus::Failed
                || (row.status == WebhookStatus::Processing && row.started_at < now - stale_after);
            if !reclaimable { return Ok(WebhookClaim::Duplicate(row.status)); }
        }
        inner.webhooks.insert(event_id.to_string(), WebhookRow { status: WebhookStatus::Processing, started_at: now });
        Ok(WebhookClaim::Claimed)
    }

    async fn finish_webhook_event(&self, event_id: &str, status: WebhookStatus, _error: Option<String>) -> Result<()> {
        if let Some(row) = self.inner.lock().await.webhooks.get_mut(event_id) { row.status = status; }
        Ok(())
    }

    async fn release_expired_reservations(&self, now: DateTime<Utc>) -> Result<Vec<Order>> {
        let mut inner = self.inner.lock().await;
        let mut expired: Vec<Uuid> = inner.reservations.iter().filter(|r| r.is_expired(now)).map(|r| r.order_id).collect();
        expired.sort();
        expired.dedup();
        let mut failed = Vec::new();
        for order_id in expired {
            let transition = inner.fail(order_id, "reservation_expired")?;
            if transition.changed { failed.push(transition.order); }
        }
        Ok(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_webhook_claims() {
        let store = MemoryStore::new();
        let window = Duration::minutes(30);
        assert_eq!(store.claim_webhook_event("evt_1", "checkout.session.completed", window).await.unwrap(), WebhookClaim::Claimed);
        assert_eq!(
            store.claim_webhook_event("evt_1", "checkout.session.completed", window).await.unwrap(),
            WebhookClaim::Duplicate(WebhookStatus::Processing)
        );

        store.finish_webhook_event("evt_1", WebhookStatus::Failed, Some("db down".into())).await.unwrap();
        assert_eq!(store.claim_webhook_event("evt_1", "checkout.session.completed", window).await.unwrap(), WebhookClaim::Claimed);

        store.finish_webhook_event("evt_1", WebhookStatus::Completed, None).await.unwrap();
        assert_eq!(
            store.claim_webhook_event("evt_1", "checkout.session.completed", window).await.unwrap(),
            WebhookClaim::Duplicate(WebhookStatus::Completed)
        );
    }

    #[tokio::test]
    async fn test_stale_processing_claim_is_reclaimed() {
        let store = MemoryStore::new();
        store.claim_webhook_event("evt_2", "charge.refunded", Duration::minutes(30)).await.unwrap();
        // Zero window: any PROCESSING row is already stale.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(store.claim_webhook_event("evt_2", "charge.refunded", Duration::zero()).await.unwrap(), WebhookClaim::Claimed);
    }
}
