//! Hosted payment provider integration.
//!
//! Checkout only needs one call: open a hosted checkout session for an order.
//! Everything after that arrives through the webhook.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::PaymentConfig;
use crate::domain::aggregates::Order;
use crate::domain::value_objects::Locale;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("provider rejected request ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("unexpected response: {0}")]
    ResponseParseFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(&self, order: &Order) -> Result<CheckoutSession, GatewayError>;
}

/// Stripe-compatible REST client.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    api_key: String,
    api_base: String,
    success_url: String,
    cancel_url: String,
    session_ttl: Duration,
}

impl HttpPaymentGateway {
    pub fn new(config: &PaymentConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            success_url: config.success_url.clone(),
            cancel_url: config.cancel_url.clone(),
            session_ttl: config.session_ttl,
        }
    }
}

/// Form fields for a session that charges the server-computed total as one line.
pub fn session_form(order: &Order, success_url: &str, cancel_url: &str, ttl: Duration) -> Vec<(String, String)> {
    let description = order.items().iter().map(|i| format!("{} x{}", i.sku, i.quantity)).collect::<Vec<_>>().join(", ");
    let title = match order.locale() {
        Locale::Fr => format!("Commande {}", order.order_number()),
        Locale::En => format!("Order {}", order.order_number()),
    };
    vec![
        ("mode".into(), "payment".into()),
        ("success_url".into(), success_url.to_string()),
        ("cancel_url".into(), cancel_url.to_string()),
        ("customer_email".into(), order.customer_email().to_string()),
        ("client_reference_id".into(), order.id().to_string()),
        ("locale".into(), order.locale().as_str().to_string()),
        ("expires_at".into(), (Utc::now() + ttl).timestamp().to_string()),
        ("metadata[order_id]".into(), order.id().to_string()),
        ("metadata[order_number]".into(), order.order_number().to_string()),
        ("payment_intent_data[metadata][order_id]".into(), order.id().to_string()),
        ("line_items[0][quantity]".into(), "1".into()),
        ("line_items[0][price_data][currency]".into(), order.total().currency().to_lowercase()),
        ("line_items[0][price_data][unit_amount]".into(), order.total().cents().to_string()),
        ("line_items[0][price_data][product_data][name]".into(), title),
        ("line_items[0][price_data][product_data][description]".into(), description),
    ]
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_checkout_session(&self, order: &Order) -> Result<CheckoutSession, GatewayError> {
        let form = session_form(order, &self.success_url, &self.cancel_url, self.session_ttl);
        let response = self.client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", format!("checkout-{}", order.id()))
            .form(&form)
            .send()
            .await
            .map_err(|e| GatewayError::RequestFailed(e.to_string()))?;

        match response.status() {
            StatusCode::OK => response.json::<CheckoutSession>().await
                .map_err(|e| GatewayError::ResponseParseFailed(e.to_string())),
            status => {
                let message = response.text().await.unwrap_or_default();
                tracing::error!(order_id = %order.id(), status = status.as_u16(), "checkout session creation failed");
                Err(GatewayError::Api { status: status.as_u16(), message })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::order::tests::new_order;

    #[test]
    fn test_session_form_charges_server_total() {
        let order = Order::place("PP-12345678", new_order(12345)).unwrap();
        let form = session_form(&order, "https://shop/success", "https://shop/cart", Duration::minutes(60));
        let get = |k: &str| form.iter().find(|(key, _)| key == k).map(|(_, v)| v.clone());
        assert_eq!(get("line_items[0][price_data][unit_amount]").as_deref(), Some("12345"));
        assert_eq!(get("line_items[0][price_data][currency]").as_deref(), Some("cad"));
        assert_eq!(get("metadata[order_id]"), Some(order.id().to_string()));
        assert_eq!(get("locale").as_deref(), Some("fr"));
        assert_eq!(get("line_items[0][price_data][product_data][name]").as_deref(), Some("Commande PP-12345678"));
    }
}
