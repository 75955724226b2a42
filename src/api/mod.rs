//! HTTP routes for the storefront and the payment provider.

mod messages;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::checkout::{CheckoutQuote, CheckoutRequest, CheckoutService, PromoPreview, StartedCheckout};
use crate::domain::aggregates::OrderSnapshot;
use crate::domain::tax::{Province, TaxRates};
use crate::domain::value_objects::{Locale, Money};
use crate::store::Store;
use crate::webhook::{WebhookHandler, WebhookOutcome};
use crate::CheckoutError;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub checkout: Arc<CheckoutService>,
    pub webhooks: Arc<WebhookHandler>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "peptide-checkout"})) }))
        .route("/api/v1/checkout", post(start_checkout))
        .route("/api/v1/checkout/quote", post(quote_checkout))
        .route("/api/v1/promo-codes/validate", post(validate_promo))
        .route("/api/v1/tax-rates/:province", get(tax_rates))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/by-session/:session_id", get(get_order_by_session))
        .route("/api/v1/webhooks/payments", post(payment_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// An error rendered in the caller's language.
pub struct ApiError { error: CheckoutError, locale: Locale }

impl ApiError {
    fn new(error: CheckoutError, locale: Locale) -> Self { Self { error, locale } }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody { pub error: String, pub message: String }

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.error {
            CheckoutError::Validation(_) | CheckoutError::EmptyCart | CheckoutError::InvalidQuantity(_)
            | CheckoutError::UnknownProvince(_) | CheckoutError::Promo(_) | CheckoutError::InvalidSignature
            | CheckoutError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            CheckoutError::PromoNotFound(_) | CheckoutError::OrderNotFound => StatusCode::NOT_FOUND,
            CheckoutError::ProductUnavailable(_) | CheckoutError::InsufficientInventory { .. }
            | CheckoutError::PriceChanged { .. } | CheckoutError::Order(_) => StatusCode::CONFLICT,
            CheckoutError::Gateway(_) => StatusCode::BAD_GATEWAY,
            CheckoutError::OrderNumberTaken(_) | CheckoutError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.error, "request failed");
        }
        let body = ErrorBody { error: self.error.code().to_string(), message: messages::localized(&self.error, self.locale) };
        (status, Json(body)).into_response()
    }
}

fn locale_of(headers: &HeaderMap) -> Locale {
    headers.get(axum::http::header::ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok())
        .and_then(Locale::from_accept_language)
        .unwrap_or_default()
}

type ApiResult<T> = Result<T, ApiError>;

async fn quote_checkout(State(s): State<AppState>, headers: HeaderMap, Json(mut r): Json<CheckoutRequest>) -> ApiResult<Json<CheckoutQuote>> {
    let locale = r.locale.unwrap_or_else(|| locale_of(&headers));
    r.locale = Some(locale);
    s.checkout.quote(&r).await.map(Json).map_err(|e| ApiError::new(e, locale))
}

async fn start_checkout(State(s): State<AppState>, headers: HeaderMap, Json(mut r): Json<CheckoutRequest>) -> ApiResult<(StatusCode, Json<StartedCheckout>)> {
    let locale = r.locale.unwrap_or_else(|| locale_of(&headers));
    r.locale = Some(locale);
    let started = s.checkout.start(&r).await.map_err(|e| ApiError::new(e, locale))?;
    Ok((StatusCode::CREATED, Json(started)))
}

#[derive(Debug, Deserialize)]
pub struct ValidatePromoRequest { pub code: String, pub subtotal: Decimal, pub email: Option<String> }

async fn validate_promo(State(s): State<AppState>, headers: HeaderMap, Json(r): Json<ValidatePromoRequest>) -> ApiResult<Json<PromoPreview>> {
    let locale = locale_of(&headers);
    s.checkout.preview_promo(&r.code, &Money::cad(r.subtotal), r.email.as_deref()).await
        .map(Json)
        .map_err(|e| ApiError::new(e, locale))
}

#[derive(Debug, Serialize)]
pub struct TaxRatesResponse { pub province: Province, pub rates: TaxRates, pub combined: Decimal }

async fn tax_rates(headers: HeaderMap, Path(province): Path<String>) -> ApiResult<Json<TaxRatesResponse>> {
    let province: Province = province.parse().map_err(|e: crate::domain::tax::UnknownProvince| {
        ApiError::new(CheckoutError::UnknownProvince(e.0), locale_of(&headers))
    })?;
    let rates = province.tax_rates();
    Ok(Json(TaxRatesResponse { province, combined: rates.combined(), rates }))
}

async fn get_order(State(s): State<AppState>, headers: HeaderMap, Path(id): Path<Uuid>) -> ApiResult<Json<OrderSnapshot>> {
    let locale = locale_of(&headers);
    s.store.find_order(id).await
        .map_err(|e| ApiError::new(e, locale))?
        .map(|o| Json(o.snapshot()))
        .ok_or_else(|| ApiError::new(CheckoutError::OrderNotFound, locale))
}

async fn get_order_by_session(State(s): State<AppState>, headers: HeaderMap, Path(session_id): Path<String>) -> ApiResult<Json<OrderSnapshot>> {
    let locale = locale_of(&headers);
    s.store.find_order_by_session(&session_id).await
        .map_err(|e| ApiError::new(e, locale))?
        .map(|o| Json(o.snapshot()))
        .ok_or_else(|| ApiError::new(CheckoutError::OrderNotFound, locale))
}

/// Errors here make the provider redeliver; only processing failures should.
async fn payment_webhook(State(s): State<AppState>, headers: HeaderMap, body: String) -> ApiResult<Json<serde_json::Value>> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()).unwrap_or_default();
    let outcome = match s.webhooks.handle(&body, signature).await {
        Ok(outcome) => outcome,
        Err(e @ (CheckoutError::InvalidSignature | CheckoutError::InvalidPayload(_))) => return Err(ApiError::new(e, Locale::En)),
        Err(e) => return Err(ApiError::new(CheckoutError::Storage(e.to_string()), Locale::En)),
    };
    let outcome = match outcome {
        WebhookOutcome::Processed => "processed",
        WebhookOutcome::Duplicate => "duplicate",
        WebhookOutcome::Ignored => "ignored",
    };
    Ok(Json(serde_json::json!({ "received": true, "outcome": outcome })))
}
