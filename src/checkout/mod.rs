//! Checkout: rebuild the cart from server prices, price it, hold stock and
//! open a hosted payment session.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::cart::{merge_lines, MAX_LINE_QUANTITY};
use crate::domain::aggregates::{Cart, CartItem, InventoryReservation, LineItem, NewOrder, Order, OrderSnapshot, OrderTotals, RequestedLine};
use crate::domain::promo::{DiscountType, PromoCode};
use crate::domain::shipping::ShippingPolicy;
use crate::domain::tax::{compute_taxes, jurisdiction_for, Province};
use crate::domain::value_objects::{Address, Locale, Money};
use crate::events::EventPublisher;
use crate::payment::{CheckoutSession, PaymentGateway};
use crate::store::Store;
use crate::{CheckoutError, Result};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 50))]
    pub items: Vec<CheckoutLineRequest>,
    #[validate]
    pub shipping_address: Address,
    pub promo_code: Option<String>,
    pub locale: Option<Locale>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutLineRequest {
    pub product_id: Uuid,
    pub format_id: Uuid,
    pub quantity: u32,
    /// Price the storefront displayed; only used to detect stale carts.
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutQuote {
    pub items: Vec<LineItem>,
    pub promo_code: Option<String>,
    pub jurisdiction: Option<Province>,
    pub totals: OrderTotals,
    #[serde(skip)]
    promo_code_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartedCheckout {
    pub order: OrderSnapshot,
    pub session: CheckoutSession,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromoPreview {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount: Money,
}

/// Largest subtotal, in dollars, a promo preview accepts.
pub const MAX_PREVIEW_SUBTOTAL: i64 = 1_000_000;

const ORDER_NUMBER_ATTEMPTS: u32 = 3;

type OrderNumbers = Arc<dyn Fn() -> String + Send + Sync>;

pub struct CheckoutService {
    store: Arc<dyn Store>,
    gateway: Arc<dyn PaymentGateway>,
    publisher: EventPublisher,
    shipping: ShippingPolicy,
    reservation_ttl: Duration,
    order_numbers: OrderNumbers,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn Store>, gateway: Arc<dyn PaymentGateway>, publisher: EventPublisher,
        shipping: ShippingPolicy, reservation_ttl: Duration,
    ) -> Self {
        Self { store, gateway, publisher, shipping, reservation_ttl, order_numbers: Arc::new(generate_order_number) }
    }

    /// Replaces the random `PP-########` generator.
    pub fn with_order_numbers(mut self, next: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.order_numbers = Arc::new(next);
        self
    }

    /// Prices the cart without side effects.
    pub async fn quote(&self, req: &CheckoutRequest) -> Result<CheckoutQuote> {
        if req.items.is_empty() { return Err(CheckoutError::EmptyCart); }
        req.validate().map_err(|e| CheckoutError::Validation(e.to_string()))?;

        let requested: Vec<RequestedLine> = req.items.iter()
            .map(|l| RequestedLine { product_id: l.product_id, format_id: l.format_id, quantity: l.quantity })
            .collect();
        if let Some(bad) = requested.iter().find(|l| l.quantity == 0 || l.quantity > MAX_LINE_QUANTITY) {
            return Err(CheckoutError::InvalidQuantity(bad.format_id));
        }
        let lines = merge_lines(&requested);
        if let Some(bad) = lines.iter().find(|l| l.quantity > MAX_LINE_QUANTITY) {
            return Err(CheckoutError::InvalidQuantity(bad.format_id));
        }

        let jurisdiction = jurisdiction_for(&req.shipping_address).map_err(|e| CheckoutError::UnknownProvince(e.0))?;

        let format_ids: Vec<Uuid> = lines.iter().map(|l| l.format_id).collect();
        let formats = self.store.load_formats(&format_ids).await?;

        let mut cart = Cart::new();
        for line in &lines {
            let format = formats.iter()
                .find(|f| f.id() == line.format_id && f.product_id() == line.product_id)
                .ok_or(CheckoutError::ProductUnavailable(line.format_id))?;
            format.ensure_available(line.quantity)?;

            let stale = req.items.iter()
                .filter(|l| l.format_id == line.format_id)
                .filter_map(|l| l.unit_price)
                .any(|shown| Money::cad(shown) != *format.price());
            if stale {
                tracing::warn!(sku = %format.sku(), price = %format.price(), "client sent a stale price");
                return Err(CheckoutError::PriceChanged { sku: format.sku().to_string(), current: format.price().clone() });
            }

            cart.add_item(CartItem {
                product_id: format.product_id(), format_id: format.id(), name: format.display_name(),
                sku: format.sku().to_string(), quantity: line.quantity, unit_price: format.price().clone(),
            });
        }
        let subtotal = cart.subtotal().clone();

        let promo = match req.promo_code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => Some(self.applicable_promo(code, &subtotal, &req.email).await?),
            None => None,
        };
        let discount = promo.as_ref().map(|p| p.discount_for(&subtotal)).unwrap_or_default();

        let totals = price(&subtotal, &discount, &self.shipping, &req.shipping_address, jurisdiction)?;
        let items = cart.items().iter().map(|i| LineItem {
            id: Uuid::now_v7(), product_id: i.product_id, format_id: i.format_id, name: i.name.clone(),
            sku: i.sku.clone(), quantity: i.quantity, unit_price: i.unit_price.clone(), total: i.line_total(),
        }).collect();

        Ok(CheckoutQuote {
            items,
            promo_code: promo.as_ref().map(|p| p.code.clone()),
            jurisdiction,
            totals,
            promo_code_id: promo.map(|p| p.id),
        })
    }

    /// Places a pending order, holds its stock and opens the payment session.
    pub async fn start(&self, req: &CheckoutRequest) -> Result<StartedCheckout> {
        let quote = self.quote(req).await?;
        let new_order = NewOrder {
            customer_email: req.email.trim().to_string(),
            locale: req.locale.unwrap_or_default(),
            items: quote.items,
            totals: quote.totals,
            promo_code_id: quote.promo_code_id,
            promo_code: quote.promo_code,
            shipping_address: req.shipping_address.clone(),
        };

        let mut attempt = 1;
        let mut order = loop {
            let order = Order::place((self.order_numbers)(), new_order.clone())?;
            let reservations: Vec<InventoryReservation> = order.items().iter()
                .map(|i| InventoryReservation::hold(order.id(), i.product_id, i.format_id, i.quantity, self.reservation_ttl))
                .collect();
            match self.store.create_order(&order, &reservations).await {
                Ok(()) => break order,
                Err(CheckoutError::OrderNumberTaken(number)) if attempt < ORDER_NUMBER_ATTEMPTS => {
                    tracing::warn!(order_number = %number, attempt, "order number already taken, drawing another");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };
        tracing::info!(order_id = %order.id(), order_number = order.order_number(), total = %order.total(), "order placed");
        self.publisher.publish_all(order.take_events()).await;

        let session = match self.gateway.create_checkout_session(&order).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(order_id = %order.id(), error = %e, "could not open payment session, releasing stock");
                let transition = self.store.fail_payment(order.id(), "payment_session_failed").await?;
                let mut failed = transition.order;
                self.publisher.publish_all(failed.take_events()).await;
                return Err(e.into());
            }
        };

        self.store.attach_payment_session(order.id(), &session.id).await?;
        order.attach_payment_session(&session.id);
        tracing::info!(order_id = %order.id(), session_id = %session.id, "payment session opened");
        Ok(StartedCheckout { order: order.snapshot(), session })
    }

    /// Discount a code would give on `subtotal`, for the storefront's promo field.
    pub async fn preview_promo(&self, code: &str, subtotal: &Money, email: Option<&str>) -> Result<PromoPreview> {
        if subtotal.amount() < Decimal::ZERO || subtotal.amount() > Decimal::from(MAX_PREVIEW_SUBTOTAL) {
            return Err(CheckoutError::Validation(format!("subtotal must be between 0 and {MAX_PREVIEW_SUBTOTAL}")));
        }
        let promo = self.applicable_promo(code, subtotal, email.unwrap_or_default()).await?;
        Ok(PromoPreview { discount: promo.discount_for(subtotal), code: promo.code, discount_type: promo.discount_type })
    }

    async fn applicable_promo(&self, code: &str, subtotal: &Money, email: &str) -> Result<PromoCode> {
        let promo = self.store.find_promo(code).await?
            .ok_or_else(|| CheckoutError::PromoNotFound(PromoCode::normalize(code)))?;
        let uses = if promo.usage_limit_per_customer.is_some() && !email.is_empty() {
            self.store.count_customer_promo_uses(promo.id, email).await?
        } else {
            0
        };
        promo.validate(Utc::now(), subtotal, uses)?;
        Ok(promo)
    }
}

/// Shipping is taxable; the taxable base is the discounted merchandise plus shipping.
fn price(
    subtotal: &Money, discount: &Money, shipping: &ShippingPolicy, address: &Address, jurisdiction: Option<Province>,
) -> Result<OrderTotals> {
    let mismatch = |_| CheckoutError::Validation("currency mismatch".into());
    let merchandise = subtotal.saturating_sub(discount).map_err(mismatch)?;
    let shipping_cost = shipping.quote(&address.country_code(), &merchandise);
    let taxable = merchandise.add(&shipping_cost).map_err(mismatch)?;
    let taxes = compute_taxes(jurisdiction, &taxable);
    let tax_total = taxes.total();
    let total = taxable.add(&tax_total).map_err(mismatch)?;
    Ok(OrderTotals { subtotal: subtotal.clone(), discount: discount.clone(), shipping: shipping_cost, taxes, tax_total, total })
}

fn generate_order_number() -> String { format!("PP-{:08}", rand::random::<u32>() % 100_000_000) }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::ProductFormat;
    use crate::domain::value_objects::Sku;
    use crate::store::MemoryStore;

    fn address(country: &str, province: Option<&str>) -> Address {
        Address {
            name: "Marie Tremblay".into(), street1: "1 rue Principale".into(), street2: None, city: "Montréal".into(),
            province: province.map(Into::into), postal_code: "H2X 1Y4".into(), country: country.into(),
        }
    }

    #[test]
    fn test_price_quebec_with_discount_and_shipping() {
        let totals = price(&Money::from_cents(10000), &Money::from_cents(1000), &ShippingPolicy::default(), &address("CA", Some("QC")), Some(Province::QC)).unwrap();
        // 90.00 merchandise + 15.00 shipping = 105.00 taxable
        assert_eq!(totals.shipping.cents(), 1500);
        assert_eq!(totals.taxes.gst.cents(), 525);
        assert_eq!(totals.taxes.qst.cents(), 1047);
        assert_eq!(totals.total.cents(), 10500 + 525 + 1047);
    }

    #[test]
    fn test_price_export_untaxed() {
        let totals = price(&Money::from_cents(5000), &Money::default(), &ShippingPolicy::default(), &address("US", Some("NY")), None).unwrap();
        assert!(totals.tax_total.is_zero());
        assert_eq!(totals.total.cents(), 8000);
    }

    #[test]
    fn test_order_number_format() {
        let n = generate_order_number();
        assert!(n.starts_with("PP-"));
        assert_eq!(n.len(), 11);
    }

    struct StubGateway;

    #[async_trait::async_trait]
    impl PaymentGateway for StubGateway {
        async fn create_checkout_session(&self, order: &Order) -> std::result::Result<CheckoutSession, crate::payment::GatewayError> {
            Ok(CheckoutSession { id: format!("cs_{}", order.order_number()), url: "https://pay.example/cs".into() })
        }
    }

    async fn service_with_stock() -> (Arc<MemoryStore>, CheckoutRequest) {
        let store = Arc::new(MemoryStore::new());
        let (product_id, format_id) = (Uuid::now_v7(), Uuid::now_v7());
        store.insert_format(ProductFormat::new(
            format_id, product_id, "BPC-157", "5mg", Sku::new("BPC-5MG").unwrap(), Money::cad(Decimal::new(4999, 2)), 10, 0, true,
        )).await;
        let request = CheckoutRequest {
            email: "client@example.ca".into(),
            items: vec![CheckoutLineRequest { product_id, format_id, quantity: 1, unit_price: None }],
            shipping_address: address("CA", Some("QC")),
            promo_code: None,
            locale: None,
        };
        (store, request)
    }

    fn service(store: &Arc<MemoryStore>) -> CheckoutService {
        CheckoutService::new(store.clone(), Arc::new(StubGateway), EventPublisher::disabled(), ShippingPolicy::default(), Duration::minutes(90))
    }

    #[tokio::test]
    async fn test_taken_order_number_is_redrawn() {
        let (store, request) = service_with_stock().await;
        // Drawn back to front: the second checkout collides once.
        let numbers = Arc::new(std::sync::Mutex::new(vec!["PP-00000002", "PP-00000001", "PP-00000001"]));
        let next = numbers.clone();
        let checkout = service(&store).with_order_numbers(move || next.lock().unwrap().pop().unwrap_or_default().to_string());

        let first = checkout.start(&request).await.unwrap();
        assert_eq!(first.order.order_number, "PP-00000001");
        let second = checkout.start(&request).await.unwrap();
        assert_eq!(second.order.order_number, "PP-00000002");
        assert_eq!(store.reservations_for(second.order.id).await.len(), 1);
        assert!(numbers.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_order_number_collisions_give_up() {
        let (store, request) = service_with_stock().await;
        let checkout = service(&store).with_order_numbers(|| "PP-00000001".to_string());
        checkout.start(&request).await.unwrap();

        let err = checkout.start(&request).await.unwrap_err();
        assert!(matches!(err, CheckoutError::OrderNumberTaken(ref n) if n == "PP-00000001"));
        assert_eq!(store.stock_of(request.items[0].format_id).await, Some(10));
    }
}
