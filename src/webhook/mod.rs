//! Payment webhook handling.
//!
//! Each provider event id is claimed in `webhook_events` before anything is
//! touched, so redeliveries and replays never apply twice. Order transitions
//! are themselves one-shot, which covers distinct events for the same payment.

pub mod signature;

use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::aggregates::{Order, PaymentStatus};
use crate::domain::value_objects::Money;
use crate::events::EventPublisher;
use crate::store::{Store, Transition, WebhookClaim, WebhookStatus};
use crate::{CheckoutError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed,
    Duplicate,
    Ignored,
}

/// Ways the event may point at an order, tried in this order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderRef {
    pub order_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub payment_intent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEventKind {
    Succeeded,
    /// Session completed but funds not captured yet (delayed payment methods).
    AwaitingPayment,
    Failed { reason: String },
    Refunded { amount_refunded: Money },
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEvent {
    pub id: String,
    pub event_type: String,
    pub order: OrderRef,
    pub kind: PaymentEventKind,
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawData,
}

#[derive(Deserialize)]
struct RawData {
    object: Value,
}

fn str_field(object: &Value, pointer: &str) -> Option<String> {
    object.pointer(pointer).and_then(Value::as_str).filter(|s| !s.is_empty()).map(str::to_string)
}

/// `payment_intent` may be an id or an expanded object.
fn payment_intent_of(object: &Value) -> Option<String> {
    str_field(object, "/payment_intent").or_else(|| str_field(object, "/payment_intent/id"))
}

fn order_id_of(object: &Value) -> Option<Uuid> {
    str_field(object, "/metadata/order_id")
        .or_else(|| str_field(object, "/client_reference_id"))
        .and_then(|s| Uuid::parse_str(&s).ok())
}

pub fn parse_event(payload: &str) -> Result<PaymentEvent> {
    let raw: RawEvent = serde_json::from_str(payload).map_err(|e| CheckoutError::InvalidPayload(e.to_string()))?;
    let object = &raw.data.object;
    let session_ref = || OrderRef {
        order_id: order_id_of(object),
        session_id: str_field(object, "/id"),
        payment_intent_id: payment_intent_of(object),
    };
    let intent_ref = || OrderRef {
        order_id: order_id_of(object),
        session_id: None,
        payment_intent_id: str_field(object, "/id"),
    };

    let (order, kind) = match raw.event_type.as_str() {
        "checkout.session.completed" => {
            let paid = matches!(str_field(object, "/payment_status").as_deref(), Some("paid" | "no_payment_required"));
            (session_ref(), if paid { PaymentEventKind::Succeeded } else { PaymentEventKind::AwaitingPayment })
        }
        "checkout.session.async_payment_succeeded" => (session_ref(), PaymentEventKind::Succeeded),
        "checkout.session.async_payment_failed" => (session_ref(), PaymentEventKind::Failed { reason: "async_payment_failed".into() }),
        "checkout.session.expired" => (session_ref(), PaymentEventKind::Failed { reason: "session_expired".into() }),
        "payment_intent.payment_failed" => {
            let reason = str_field(object, "/last_payment_error/code").unwrap_or_else(|| "payment_failed".into());
            (intent_ref(), PaymentEventKind::Failed { reason })
        }
        "charge.refunded" => {
            let cents = object.get("amount_refunded").and_then(Value::as_i64)
                .ok_or_else(|| CheckoutError::InvalidPayload("charge.refunded without amount_refunded".into()))?;
            let order = OrderRef { order_id: order_id_of(object), session_id: None, payment_intent_id: payment_intent_of(object) };
            (order, PaymentEventKind::Refunded { amount_refunded: Money::from_cents(cents) })
        }
        _ => (OrderRef::default(), PaymentEventKind::Ignored),
    };
    Ok(PaymentEvent { id: raw.id, event_type: raw.event_type, order, kind })
}

pub struct WebhookHandler {
    store: Arc<dyn Store>,
    publisher: EventPublisher,
    secret: String,
    tolerance_secs: i64,
    stale_after: Duration,
}

impl WebhookHandler {
    pub fn new(store: Arc<dyn Store>, publisher: EventPublisher, secret: impl Into<String>, tolerance_secs: i64, stale_after: Duration) -> Self {
        Self { store, publisher, secret: secret.into(), tolerance_secs, stale_after }
    }

    /// Verifies, parses and processes one delivery.
    pub async fn handle(&self, payload: &str, signature_header: &str) -> Result<WebhookOutcome> {
        signature::verify(payload, signature_header, &self.secret, Utc::now().timestamp(), self.tolerance_secs)
            .map_err(|e| {
                tracing::warn!(error = %e, "rejected webhook signature");
                CheckoutError::InvalidSignature
            })?;
        let event = parse_event(payload)?;
        self.process(event).await
    }

    pub async fn process(&self, event: PaymentEvent) -> Result<WebhookOutcome> {
        if event.kind == PaymentEventKind::Ignored {
            tracing::debug!(event_id = %event.id, event_type = %event.event_type, "ignoring webhook event");
            return Ok(WebhookOutcome::Ignored);
        }

        match self.store.claim_webhook_event(&event.id, &event.event_type, self.stale_after).await? {
            WebhookClaim::Claimed => {}
            WebhookClaim::Duplicate(status) => {
                tracing::info!(event_id = %event.id, event_type = %event.event_type, status = status.as_str(), "duplicate webhook event");
                return Ok(WebhookOutcome::Duplicate);
            }
        }

        tracing::info!(event_id = %event.id, event_type = %event.event_type, "processing webhook event");
        let result = self.apply(&event).await;
        let (status, error) = match &result {
            Ok(()) => (WebhookStatus::Completed, None),
            Err(e) => (WebhookStatus::Failed, Some(e.to_string())),
        };
        if let Err(e) = self.store.finish_webhook_event(&event.id, status, error.clone()).await {
            tracing::warn!(event_id = %event.id, error = %e, "failed to record webhook result, retrying");
            if let Err(retry) = self.store.finish_webhook_event(&event.id, status, error).await {
                tracing::error!(event_id = %event.id, error = %retry, "webhook left in PROCESSING; it will be reclaimed after the stale window");
            }
        }
        result.map(|()| WebhookOutcome::Processed)
    }

    async fn resolve(&self, order: &OrderRef) -> Result<Option<Order>> {
        if let Some(id) = order.order_id {
            if let Some(found) = self.store.find_order(id).await? { return Ok(Some(found)); }
        }
        if let Some(session_id) = &order.session_id {
            if let Some(found) = self.store.find_order_by_session(session_id).await? { return Ok(Some(found)); }
        }
        if let Some(intent) = &order.payment_intent_id {
            return self.store.find_order_by_payment_intent(intent).await;
        }
        Ok(None)
    }

    async fn apply(&self, event: &PaymentEvent) -> Result<()> {
        let Some(order) = self.resolve(&event.order).await? else {
            // A retry would not find it either.
            tracing::warn!(event_id = %event.id, order_ref = ?event.order, "webhook event matches no order");
            return Ok(());
        };

        let result = match &event.kind {
            PaymentEventKind::Succeeded => {
                self.store.settle_payment(order.id(), event.order.payment_intent_id.clone()).await
            }
            PaymentEventKind::AwaitingPayment => {
                tracing::info!(order_id = %order.id(), "session completed, awaiting asynchronous payment");
                return Ok(());
            }
            PaymentEventKind::Failed { reason } => self.store.fail_payment(order.id(), reason).await,
            PaymentEventKind::Refunded { amount_refunded } => {
                self.store.record_refund(order.id(), amount_refunded.clone()).await
            }
            PaymentEventKind::Ignored => return Ok(()),
        };
        match result {
            Ok(transition) => {
                self.finish_transition(event, transition).await;
                Ok(())
            }
            // The order's state will not change on redelivery either.
            Err(CheckoutError::Order(e)) => {
                tracing::warn!(event_id = %event.id, order_id = %order.id(), error = %e, "webhook event does not apply to order");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn finish_transition(&self, event: &PaymentEvent, transition: Transition) {
        let Transition { mut order, changed } = transition;
        if changed {
            tracing::info!(
                event_id = %event.id,
                order_id = %order.id(),
                payment_status = order.payment_status().as_str(),
                status = order.status().as_str(),
                "order transitioned"
            );
            self.publisher.publish_all(order.take_events()).await;
        } else if matches!(event.kind, PaymentEventKind::Failed { .. }) && order.payment_status() != PaymentStatus::Failed {
            tracing::warn!(
                event_id = %event.id,
                order_id = %order.id(),
                payment_status = order.payment_status().as_str(),
                "payment failure for an order that is no longer pending, ignored"
            );
        } else {
            tracing::info!(
                event_id = %event.id,
                order_id = %order.id(),
                payment_status = order.payment_status().as_str(),
                "order already in target state"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_session_completed() {
        let order_id = Uuid::now_v7();
        let payload = serde_json::json!({
            "id": "evt_1", "type": "checkout.session.completed",
            "data": { "object": { "id": "cs_1", "payment_status": "paid", "payment_intent": "pi_1", "metadata": { "order_id": order_id.to_string() } } }
        }).to_string();
        let event = parse_event(&payload).unwrap();
        assert_eq!(event.kind, PaymentEventKind::Succeeded);
        assert_eq!(event.order, OrderRef { order_id: Some(order_id), session_id: Some("cs_1".into()), payment_intent_id: Some("pi_1".into()) });
    }

    #[test]
    fn test_parse_unpaid_session_awaits_payment() {
        let payload = r#"{"id":"evt_2","type":"checkout.session.completed","data":{"object":{"id":"cs_2","payment_status":"unpaid","payment_intent":null}}}"#;
        let event = parse_event(payload).unwrap();
        assert_eq!(event.kind, PaymentEventKind::AwaitingPayment);
        assert_eq!(event.order.payment_intent_id, None);
    }

    #[test]
    fn test_parse_payment_failed_and_refund() {
        let failed = r#"{"id":"evt_3","type":"payment_intent.payment_failed","data":{"object":{"id":"pi_3","last_payment_error":{"code":"card_declined"}}}}"#;
        let event = parse_event(failed).unwrap();
        assert_eq!(event.kind, PaymentEventKind::Failed { reason: "card_declined".into() });
        assert_eq!(event.order.payment_intent_id.as_deref(), Some("pi_3"));

        let refund = r#"{"id":"evt_4","type":"charge.refunded","data":{"object":{"id":"ch_4","payment_intent":"pi_3","amount_refunded":2500}}}"#;
        let event = parse_event(refund).unwrap();
        assert_eq!(event.kind, PaymentEventKind::Refunded { amount_refunded: Money::from_cents(2500) });
    }

    #[test]
    fn test_parse_unknown_and_invalid() {
        let other = r#"{"id":"evt_5","type":"customer.created","data":{"object":{}}}"#;
        assert_eq!(parse_event(other).unwrap().kind, PaymentEventKind::Ignored);
        assert!(matches!(parse_event("not json"), Err(CheckoutError::InvalidPayload(_))));
    }
}
