//! Peptide storefront checkout service
//!
//! Server side of the bilingual (fr/en) storefront checkout.
//!
//! ## Features
//! - Cart validation and repricing against the catalog
//! - Canadian sales tax by shipping province (GST/PST/QST/HST)
//! - Promo codes (percentage or fixed, optionally capped)
//! - Inventory reservations held while payment is pending
//! - Idempotent payment webhooks driving order and inventory state

pub mod api;
pub mod checkout;
pub mod config;
pub mod domain;
pub mod events;
pub mod payment;
pub mod store;
pub mod webhook;

use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::{OrderError, ProductError};
use crate::domain::promo::PromoError;
use crate::domain::value_objects::Money;
use crate::payment::GatewayError;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum CheckoutError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Invalid quantity for {0}")]
    InvalidQuantity(Uuid),

    #[error("Product format {0} is not available")]
    ProductUnavailable(Uuid),

    #[error("Insufficient inventory for {sku}: {available} available")]
    InsufficientInventory { sku: String, available: u32 },

    #[error("Price changed for {sku}: now {current}")]
    PriceChanged { sku: String, current: Money },

    #[error("Unknown province: {0}")]
    UnknownProvince(String),

    #[error("Promo code not found: {0}")]
    PromoNotFound(String),

    #[error("Promo code rejected: {0}")]
    Promo(#[from] PromoError),

    #[error("Order not found")]
    OrderNotFound,

    #[error("Order transition rejected: {0}")]
    Order(#[from] OrderError),

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("Payment provider error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Order number {0} is already taken")]
    OrderNumberTaken(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl CheckoutError {
    /// Stable code returned to the storefront.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::EmptyCart => "EMPTY_CART",
            Self::InvalidQuantity(_) => "INVALID_QUANTITY",
            Self::ProductUnavailable(_) => "PRODUCT_UNAVAILABLE",
            Self::InsufficientInventory { .. } => "INSUFFICIENT_INVENTORY",
            Self::PriceChanged { .. } => "PRICE_CHANGED",
            Self::UnknownProvince(_) => "INVALID_PROVINCE",
            Self::PromoNotFound(_) => "PROMO_NOT_FOUND",
            Self::Promo(_) => "PROMO_INVALID",
            Self::OrderNotFound => "ORDER_NOT_FOUND",
            Self::Order(_) => "INVALID_ORDER_TRANSITION",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::InvalidPayload(_) => "INVALID_PAYLOAD",
            Self::Gateway(_) => "PAYMENT_PROVIDER_ERROR",
            Self::OrderNumberTaken(_) | Self::Storage(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<sqlx::Error> for CheckoutError {
    fn from(e: sqlx::Error) -> Self { Self::Storage(e.to_string()) }
}

impl From<ProductError> for CheckoutError {
    fn from(e: ProductError) -> Self {
        match e {
            ProductError::Unavailable(id) => Self::ProductUnavailable(id),
            ProductError::InsufficientInventory { sku, available } => Self::InsufficientInventory { sku, available },
        }
    }
}

pub type Result<T> = std::result::Result<T, CheckoutError>;
