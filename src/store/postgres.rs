//! PostgreSQL store. Every payment transition runs in one transaction with the
//! order row locked, so concurrent webhook deliveries serialize per order.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgConnection;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{Store, Transition, WebhookClaim, WebhookStatus};
use crate::domain::aggregates::{
    InventoryReservation, LineItem, Order, OrderSnapshot, OrderStatus, OrderTotals, PaymentStatus, ProductFormat,
};
use crate::domain::promo::{DiscountType, PromoCode};
use crate::domain::tax::TaxBreakdown;
use crate::domain::value_objects::{Address, Locale, Money, Sku};
use crate::{CheckoutError, Result};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

#[derive(sqlx::FromRow)]
struct FormatRow {
    id: Uuid,
    product_id: Uuid,
    product_name: String,
    format_name: String,
    sku: String,
    price_cents: i64,
    stock_quantity: i32,
    is_active: bool,
    reserved: i64,
}

impl FormatRow {
    fn into_format(self) -> Result<ProductFormat> {
        let sku = Sku::new(self.sku).map_err(|e| CheckoutError::Storage(format!("format {}: {e}", self.id)))?;
        Ok(ProductFormat::new(
            self.id, self.product_id, self.product_name, self.format_name, sku,
            Money::from_cents(self.price_cents), non_negative(self.stock_quantity as i64),
            non_negative(self.reserved), self.is_active,
        ))
    }
}

#[derive(sqlx::FromRow)]
struct PromoRow {
    id: Uuid,
    code: String,
    discount_type: String,
    value: Decimal,
    max_discount_cents: Option<i64>,
    min_order_cents: Option<i64>,
    is_active: bool,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    usage_limit: Option<i32>,
    usage_count: i32,
    usage_limit_per_customer: Option<i32>,
}

impl PromoRow {
    fn into_promo(self) -> Result<PromoCode> {
        let discount_type = DiscountType::parse(&self.discount_type)
            .ok_or_else(|| CheckoutError::Storage(format!("promo {}: unknown discount type {}", self.code, self.discount_type)))?;
        Ok(PromoCode {
            id: self.id, code: self.code, discount_type, value: self.value,
            max_discount: self.max_discount_cents.map(Money::from_cents),
            min_order_amount: self.min_order_cents.map(Money::from_cents),
            is_active: self.is_active, starts_at: self.starts_at, ends_at: self.ends_at,
            usage_limit: self.usage_limit.map(|v| non_negative(v as i64)),
            usage_count: non_negative(self.usage_count as i64),
            usage_limit_per_customer: self.usage_limit_per_customer.map(|v| non_negative(v as i64)),
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    customer_email: String,
    locale: String,
    status: String,
    payment_status: String,
    subtotal_cents: i64,
    discount_cents: i64,
    shipping_cents: i64,
    gst_cents: i64,
    pst_cents: i64,
    qst_cents: i64,
    hst_cents: i64,
    tax_cents: i64,
    total_cents: i64,
    promo_code_id: Option<Uuid>,
    promo_code: Option<String>,
    shipping_address: Json<Address>,
    payment_session_id: Option<String>,
    payment_intent_id: Option<String>,
    amount_refunded_cents: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: Uuid,
    product_id: Uuid,
    format_id: Uuid,
    name: String,
    sku: String,
    quantity: i32,
    unit_price_cents: i64,
    total_cents: i64,
}

impl OrderRow {
    fn into_order(self, items: Vec<ItemRow>) -> Result<Order> {
        let corrupt = |what: &str, value: &str| CheckoutError::Storage(format!("order {}: unknown {what} {value}", self.id));
        let status = OrderStatus::parse(&self.status).ok_or_else(|| corrupt("status", &self.status))?;
        let payment_status = PaymentStatus::parse(&self.payment_status).ok_or_else(|| corrupt("payment status", &self.payment_status))?;
        let locale = self.locale.parse::<Locale>().unwrap_or_default();
        Ok(Order::restore(OrderSnapshot {
            id: self.id,
            order_number: self.order_number,
            customer_email: self.customer_email,
            locale,
            status,
            payment_status,
            items: items.into_iter().map(|i| LineItem {
                id: i.id, product_id: i.product_id, format_id: i.format_id, name: i.name, sku: i.sku,
                quantity: non_negative(i.quantity as i64),
                unit_price: Money::from_cents(i.unit_price_cents), total: Money::from_cents(i.total_cents),
            }).collect(),
            totals: OrderTotals {
                subtotal: Money::from_cents(self.subtotal_cents),
                discount: Money::from_cents(self.discount_cents),
                shipping: Money::from_cents(self.shipping_cents),
                taxes: TaxBreakdown {
                    gst: Money::from_cents(self.gst_cents), pst: Money::from_cents(self.pst_cents),
                    qst: Money::from_cents(self.qst_cents), hst: Money::from_cents(self.hst_cents),
                },
                tax_total: Money::from_cents(self.tax_cents),
                total: Money::from_cents(self.total_cents),
            },
            promo_code_id: self.promo_code_id,
            promo_code: self.promo_code,
            shipping_address: self.shipping_address.0,
            payment_session_id: self.payment_session_id,
            payment_intent_id: self.payment_intent_id,
            amount_refunded: Money::from_cents(self.amount_refunded_cents),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }))
    }
}

fn non_negative(v: i64) -> u32 { u32::try_from(v.max(0)).unwrap_or(u32::MAX) }

enum OrderKey<'a> { Id(Uuid), Session(&'a str), PaymentIntent(&'a str) }

async fn load_order(conn: &mut PgConnection, key: OrderKey<'_>, lock: bool) -> Result<Option<Order>> {
    let column = match key {
        OrderKey::Id(_) => "id",
        OrderKey::Session(_) => "payment_session_id",
        OrderKey::PaymentIntent(_) => "payment_intent_id",
    };
    let sql = format!(
        "SELECT * FROM orders WHERE {column} = $1 ORDER BY created_at DESC LIMIT 1{}",
        if lock { " FOR UPDATE" } else { "" }
    );
    let query = sqlx::query_as::<_, OrderRow>(&sql);
    let query = match key {
        OrderKey::Id(id) => query.bind(id),
        OrderKey::Session(value) | OrderKey::PaymentIntent(value) => query.bind(value),
    };
    let Some(row) = query.fetch_optional(&mut *conn).await? else { return Ok(None) };
    let items = sqlx::query_as::<_, ItemRow>(
        "SELECT id, product_id, format_id, name, sku, quantity, unit_price_cents, total_cents
         FROM order_items WHERE order_id = $1 ORDER BY position",
    )
    .bind(row.id)
    .fetch_all(&mut *conn)
    .await?;
    row.into_order(items).map(Some)
}

async fn fetch_formats(conn: &mut PgConnection, format_ids: &[Uuid]) -> Result<Vec<ProductFormat>> {
    let rows = sqlx::query_as::<_, FormatRow>(
        r#"
        SELECT f.id, f.product_id, p.name AS product_name, f.name AS format_name, f.sku,
               f.price_cents, f.stock_quantity, (f.is_active AND p.is_active) AS is_active,
               COALESCE((SELECT SUM(r.quantity) FROM inventory_reservations r
                         WHERE r.format_id = f.id AND r.status = 'RESERVED' AND r.expires_at > NOW()), 0)::BIGINT AS reserved
        FROM product_formats f
        JOIN products p ON p.id = f.product_id
        WHERE f.id = ANY($1)
        "#,
    )
    .bind(format_ids)
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter().map(FormatRow::into_format).collect()
}

async fn save_state(conn: &mut PgConnection, order: &Order) -> Result<()> {
    sqlx::query(
        "UPDATE orders SET status = $2, payment_status = $3, payment_session_id = $4, payment_intent_id = $5,
                amount_refunded_cents = $6, updated_at = NOW()
         WHERE id = $1",
    )
    .bind(order.id())
    .bind(order.status().as_str())
    .bind(order.payment_status().as_str())
    .bind(order.payment_session_id())
    .bind(order.payment_intent_id())
    .bind(order.amount_refunded().cents())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn load_formats(&self, format_ids: &[Uuid]) -> Result<Vec<ProductFormat>> {
        let mut conn = self.pool.acquire().await?;
        fetch_formats(&mut conn, format_ids).await
    }

    async fn find_promo(&self, code: &str) -> Result<Option<PromoCode>> {
        let row = sqlx::query_as::<_, PromoRow>("SELECT * FROM promo_codes WHERE code = $1")
            .bind(PromoCode::normalize(code))
            .fetch_optional(&self.pool)
            .await?;
        row.map(PromoRow::into_promo).transpose()
    }

    async fn count_customer_promo_uses(&self, promo_id: Uuid, email: &str) -> Result<u32> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM orders
             WHERE promo_code_id = $1 AND LOWER(customer_email) = LOWER($2)
               AND payment_status IN ('PAID', 'PARTIALLY_REFUNDED', 'REFUNDED')",
        )
        .bind(promo_id)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        Ok(non_negative(count))
    }

    async fn create_order(&self, order: &Order, reservations: &[InventoryReservation]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let format_ids: Vec<Uuid> = reservations.iter().map(|r| r.format_id).collect();

        // Lock in a stable order so concurrent checkouts of the same formats queue up.
        sqlx::query("SELECT id FROM product_formats WHERE id = ANY($1) ORDER BY id FOR UPDATE")
            .bind(&format_ids)
            .execute(&mut *tx)
            .await?;
        let formats = fetch_formats(&mut tx, &format_ids).await?;
        for r in reservations {
            let format = formats.iter().find(|f| f.id() == r.format_id).ok_or(CheckoutError::ProductUnavailable(r.format_id))?;
            format.ensure_available(r.quantity)?;
        }

        let totals = order.totals();
        let snapshot = order.snapshot();
        sqlx::query(
            r#"
            INSERT INTO orders (id, order_number, customer_email, locale, status, payment_status,
                subtotal_cents, discount_cents, shipping_cents, gst_cents, pst_cents, qst_cents, hst_cents,
                tax_cents, total_cents, promo_code_id, promo_code, shipping_address, payment_session_id,
                payment_intent_id, amount_refunded_cents, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23)
            "#,
        )
        .bind(order.id())
        .bind(order.order_number())
        .bind(order.customer_email())
        .bind(order.locale().as_str())
        .bind(order.status().as_str())
        .bind(order.payment_status().as_str())
        .bind(totals.subtotal.cents())
        .bind(totals.discount.cents())
        .bind(totals.shipping.cents())
        .bind(totals.taxes.gst.cents())
        .bind(totals.taxes.pst.cents())
        .bind(totals.taxes.qst.cents())
        .bind(totals.taxes.hst.cents())
        .bind(totals.tax_total.cents())
        .bind(totals.total.cents())
        .bind(snapshot.promo_code_id)
        .bind(snapshot.promo_code.as_deref())
        .bind(Json(&snapshot.shipping_address))
        .bind(order.payment_session_id())
        .bind(order.payment_intent_id())
        .bind(order.amount_refunded().cents())
        .bind(snapshot.created_at)
        .bind(snapshot.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            let taken = e.as_database_error()
                .is_some_and(|db| db.is_unique_violation() && db.constraint() == Some("orders_order_number_key"));
            if taken { CheckoutError::OrderNumberTaken(order.order_number().to_string()) } else { e.into() }
        })?;

        for (position, item) in order.items().iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_items (id, order_id, product_id, format_id, name, sku, quantity, unit_price_cents, total_cents, position)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(item.id)
            .bind(order.id())
            .bind(item.product_id)
            .bind(item.format_id)
            .bind(&item.name)
            .bind(&item.sku)
            .bind(item.quantity as i32)
            .bind(item.unit_price.cents())
            .bind(item.total.cents())
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }

        for r in reservations {
            sqlx::query(
                "INSERT INTO inventory_reservations (id, order_id, product_id, format_id, quantity, status, expires_at, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(r.id)
            .bind(r.order_id)
            .bind(r.product_id)
            .bind(r.format_id)
            .bind(r.quantity as i32)
            .bind(r.status.as_str())
            .bind(r.expires_at)
            .bind(r.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn attach_payment_session(&self, order_id: Uuid, session_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE orders SET payment_session_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(order_id)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 { return Err(CheckoutError::OrderNotFound); }
        Ok(())
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        load_order(&mut conn, OrderKey::Id(id), false).await
    }

    async fn find_order_by_session(&self, session_id: &str) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        load_order(&mut conn, OrderKey::Session(session_id), false).await
    }

    async fn find_order_by_payment_intent(&self, payment_intent_id: &str) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        load_order(&mut conn, OrderKey::PaymentIntent(payment_intent_id), false).await
    }

    async fn settle_payment(&self, order_id: Uuid, payment_intent_id: Option<String>) -> Result<Transition> {
        let mut tx = self.pool.begin().await?;
        let mut order = load_order(&mut tx, OrderKey::Id(order_id), true).await?.ok_or(CheckoutError::OrderNotFound)?;
        let changed = order.mark_paid(payment_intent_id)?;
        if changed {
            save_state(&mut tx, &order).await?;
            sqlx::query("UPDATE inventory_reservations SET status = 'CONSUMED' WHERE order_id = $1 AND status = 'RESERVED'")
                .bind(order_id)
                .execute(&mut *tx)
                .await?;
            for item in order.items() {
                sqlx::query("UPDATE product_formats SET stock_quantity = GREATEST(stock_quantity - $2, 0), updated_at = NOW() WHERE id = $1")
                    .bind(item.format_id)
                    .bind(item.quantity as i32)
                    .execute(&mut *tx)
                    .await?;
            }
            if let Some(promo_id) = order.promo_code_id() {
                sqlx::query("UPDATE promo_codes SET usage_count = usage_count + 1 WHERE id = $1")
                    .bind(promo_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        Ok(Transition { order, changed })
    }

    async fn fail_payment(&self, order_id: Uuid, reason: &str) -> Result<Transition> {
        let mut tx = self.pool.begin().await?;
        let mut order = load_order(&mut tx, OrderKey::Id(order_id), true).await?.ok_or(CheckoutError::OrderNotFound)?;
        let changed = order.mark_failed(reason);
        if changed {
            save_state(&mut tx, &order).await?;
            sqlx::query("UPDATE inventory_reservations SET status = 'RELEASED', released_at = NOW() WHERE order_id = $1 AND status = 'RESERVED'")
                .bind(order_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(Transition { order, changed })
    }

    async fn record_refund(&self, order_id: Uuid, refunded_total: Money) -> Result<Transition> {
        let mut tx = self.pool.begin().await?;
        let mut order = load_order(&mut tx, OrderKey::Id(order_id), true).await?.ok_or(CheckoutError::OrderNotFound)?;
        let changed = order.record_refund(refunded_total)?;
        if changed { save_state(&mut tx, &order).await?; }
        tx.commit().await?;
        Ok(Transition { order, changed })
    }

    async fn claim_webhook_event(&self, event_id: &str, event_type: &str, stale_after: Duration) -> Result<WebhookClaim> {
        // Failed events and events stuck in PROCESSING past the window can be reclaimed.
        let claimed: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO webhook_events (event_id, event_type, status, processing_started_at)
            VALUES ($1, $2, 'PROCESSING', NOW())
            ON CONFLICT (event_id) DO UPDATE SET
                status = 'PROCESSING',
                processing_started_at = NOW(),
                error_message = NULL
            WHERE webhook_events.status = 'FAILED'
               OR (webhook_events.status = 'PROCESSING'
                   AND webhook_events.processing_started_at < NOW() - make_interval(mins => $3))
            RETURNING event_id
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(stale_after.num_minutes() as i32)
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_some() { return Ok(WebhookClaim::Claimed); }

        let (status,): (String,) = sqlx::query_as("SELECT status FROM webhook_events WHERE event_id = $1")
            .bind(event_id)
            .fetch_one(&self.pool)
            .await?;
        let status = WebhookStatus::parse(&status)
            .ok_or_else(|| CheckoutError::Storage(format!("webhook {event_id}: unknown status {status}")))?;
        Ok(WebhookClaim::Duplicate(status))
    }

    async fn finish_webhook_event(&self, event_id: &str, status: WebhookStatus, error: Option<String>) -> Result<()> {
        sqlx::query(
            "UPDATE webhook_events
             SET status = $2, error_message = $3,
                 completed_at = CASE WHEN $2 = 'COMPLETED' THEN NOW() ELSE NULL END
             WHERE event_id = $1",
        )
        .bind(event_id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn release_expired_reservations(&self, now: DateTime<Utc>) -> Result<Vec<Order>> {
        let order_ids: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT DISTINCT r.order_id FROM inventory_reservations r
             JOIN orders o ON o.id = r.order_id
             WHERE r.status = 'RESERVED' AND r.expires_at <= $1 AND o.payment_status = 'PENDING'",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut failed = Vec::new();
        for (order_id,) in order_ids {
            let transition = self.fail_payment(order_id, "reservation_expired").await?;
            if transition.changed { failed.push(transition.order); }
        }
        Ok(failed)
    }
}
