//! Promo code discount rules.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::Money;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType { Percentage, Fixed }

impl DiscountType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PERCENTAGE" => Some(Self::Percentage),
            "FIXED" => Some(Self::Fixed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromoCode {
    pub id: Uuid,
    pub code: String,
    pub discount_type: DiscountType,
    /// Percent for `Percentage`, dollars for `Fixed`.
    pub value: Decimal,
    pub max_discount: Option<Money>,
    pub min_order_amount: Option<Money>,
    pub is_active: bool,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub usage_limit: Option<u32>,
    pub usage_count: u32,
    pub usage_limit_per_customer: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PromoError {
    #[error("promo code is not active")]
    Inactive,
    #[error("promo code is not yet valid")]
    NotStarted,
    #[error("promo code has expired")]
    Expired,
    #[error("promo code usage limit reached")]
    UsageLimitReached,
    #[error("promo code already used the maximum number of times by this customer")]
    CustomerLimitReached,
    #[error("order subtotal is below the promo minimum of {minimum}")]
    MinimumNotMet { minimum: Money },
}

impl PromoCode {
    pub fn normalize(code: &str) -> String { code.trim().to_uppercase() }

    fn has_usable_value(&self) -> bool {
        match self.discount_type {
            DiscountType::Percentage => self.value > Decimal::ZERO && self.value <= Decimal::ONE_HUNDRED,
            DiscountType::Fixed => self.value > Decimal::ZERO,
        }
    }

    /// `customer_uses` counts this customer's paid orders that used the code.
    pub fn validate(&self, now: DateTime<Utc>, subtotal: &Money, customer_uses: u32) -> Result<(), PromoError> {
        if !self.is_active || !self.has_usable_value() { return Err(PromoError::Inactive); }
        if self.starts_at.is_some_and(|start| now < start) { return Err(PromoError::NotStarted); }
        if self.ends_at.is_some_and(|end| now >= end) { return Err(PromoError::Expired); }
        if self.usage_limit.is_some_and(|limit| self.usage_count >= limit) {
            return Err(PromoError::UsageLimitReached);
        }
        if self.usage_limit_per_customer.is_some_and(|limit| customer_uses >= limit) {
            return Err(PromoError::CustomerLimitReached);
        }
        if let Some(minimum) = &self.min_order_amount {
            if subtotal.amount() < minimum.amount() {
                return Err(PromoError::MinimumNotMet { minimum: minimum.clone() });
            }
        }
        Ok(())
    }

    /// Never exceeds the cap nor the subtotal itself.
    pub fn discount_for(&self, subtotal: &Money) -> Money {
        let raw = match self.discount_type {
            DiscountType::Percentage => subtotal.percent(self.value),
            DiscountType::Fixed => Money::new(self.value, subtotal.currency()),
        };
        let capped = match &self.max_discount {
            Some(cap) => raw.min(cap.clone()),
            None => raw,
        };
        capped.min(subtotal.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn promo(discount_type: DiscountType, value: Decimal) -> PromoCode {
        PromoCode {
            id: Uuid::now_v7(), code: "WELCOME10".into(), discount_type, value,
            max_discount: None, min_order_amount: None, is_active: true,
            starts_at: None, ends_at: None, usage_limit: None, usage_count: 0,
            usage_limit_per_customer: None,
        }
    }

    #[test]
    fn test_percentage_discount() {
        let p = promo(DiscountType::Percentage, Decimal::new(10, 0));
        assert_eq!(p.discount_for(&Money::from_cents(12345)).cents(), 1235);
    }

    #[test]
    fn test_percentage_discount_is_capped() {
        let mut p = promo(DiscountType::Percentage, Decimal::new(50, 0));
        p.max_discount = Some(Money::from_cents(2000));
        assert_eq!(p.discount_for(&Money::from_cents(10000)).cents(), 2000);
    }

    #[test]
    fn test_fixed_discount_never_exceeds_subtotal() {
        let p = promo(DiscountType::Fixed, Decimal::new(25, 0));
        assert_eq!(p.discount_for(&Money::from_cents(1500)).cents(), 1500);
        assert_eq!(p.discount_for(&Money::from_cents(9000)).cents(), 2500);
    }

    #[test]
    fn test_activity_window() {
        let now = Utc::now();
        let mut p = promo(DiscountType::Fixed, Decimal::TEN);
        p.starts_at = Some(now + Duration::days(1));
        assert_eq!(p.validate(now, &Money::from_cents(100), 0), Err(PromoError::NotStarted));
        p.starts_at = None;
        p.ends_at = Some(now - Duration::minutes(1));
        assert_eq!(p.validate(now, &Money::from_cents(100), 0), Err(PromoError::Expired));
    }

    #[test]
    fn test_usage_limits() {
        let now = Utc::now();
        let mut p = promo(DiscountType::Fixed, Decimal::TEN);
        p.usage_limit = Some(5);
        p.usage_count = 5;
        assert_eq!(p.validate(now, &Money::from_cents(100), 0), Err(PromoError::UsageLimitReached));
        p.usage_count = 1;
        p.usage_limit_per_customer = Some(1);
        assert_eq!(p.validate(now, &Money::from_cents(100), 1), Err(PromoError::CustomerLimitReached));
        assert!(p.validate(now, &Money::from_cents(100), 0).is_ok());
    }

    #[test]
    fn test_minimum_and_bad_values() {
        let now = Utc::now();
        let mut p = promo(DiscountType::Percentage, Decimal::new(150, 0));
        assert_eq!(p.validate(now, &Money::from_cents(10000), 0), Err(PromoError::Inactive));
        p.value = Decimal::new(15, 0);
        p.min_order_amount = Some(Money::from_cents(5000));
        assert!(matches!(p.validate(now, &Money::from_cents(4999), 0), Err(PromoError::MinimumNotMet { .. })));
        assert!(p.validate(now, &Money::from_cents(5000), 0).is_ok());
    }
}
