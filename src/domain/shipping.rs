//! Flat-rate shipping with a free-shipping threshold for domestic orders.

use serde::{Deserialize, Serialize};

use crate::domain::value_objects::Money;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingPolicy {
    pub domestic_rate: Money,
    pub free_domestic_threshold: Money,
    pub us_rate: Money,
    pub international_rate: Money,
}

impl Default for ShippingPolicy {
    fn default() -> Self {
        Self {
            domestic_rate: Money::from_cents(1500),
            free_domestic_threshold: Money::from_cents(25000),
            us_rate: Money::from_cents(3000),
            international_rate: Money::from_cents(4500),
        }
    }
}

impl ShippingPolicy {
    /// `merchandise` is the subtotal after discount.
    pub fn quote(&self, country_code: &str, merchandise: &Money) -> Money {
        match country_code {
            "CA" if merchandise.amount() >= self.free_domestic_threshold.amount() => Money::zero(merchandise.currency()),
            "CA" => self.domestic_rate.clone(),
            "US" => self.us_rate.clone(),
            _ => self.international_rate.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domestic_threshold() {
        let policy = ShippingPolicy::default();
        assert_eq!(policy.quote("CA", &Money::from_cents(24999)).cents(), 1500);
        assert!(policy.quote("CA", &Money::from_cents(25000)).is_zero());
    }

    #[test]
    fn test_foreign_rates_ignore_threshold() {
        let policy = ShippingPolicy::default();
        assert_eq!(policy.quote("US", &Money::from_cents(90000)).cents(), 3000);
        assert_eq!(policy.quote("FR", &Money::from_cents(1000)).cents(), 4500);
    }
}
