//! Cart Aggregate
//!
//! The storefront keeps the cart client-side. At checkout the submitted lines
//! are rebuilt here from server prices before anything is charged.

use uuid::Uuid;
use crate::domain::value_objects::{Money, CURRENCY};

/// Upper bound on a single line, after merging duplicates.
pub const MAX_LINE_QUANTITY: u32 = 100;

#[derive(Clone, Debug)]
pub struct Cart {
    items: Vec<CartItem>,
    subtotal: Money,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CartItem {
    pub product_id: Uuid,
    pub format_id: Uuid,
    pub name: String,
    pub sku: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl CartItem {
    pub fn line_total(&self) -> Money { self.unit_price.multiply(self.quantity) }
}

/// A requested line before pricing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestedLine {
    pub product_id: Uuid,
    pub format_id: Uuid,
    pub quantity: u32,
}

impl Default for Cart {
    fn default() -> Self { Self { items: vec![], subtotal: Money::zero(CURRENCY) } }
}

impl Cart {
    pub fn new() -> Self { Self::default() }

    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn subtotal(&self) -> &Money { &self.subtotal }

    pub fn add_item(&mut self, item: CartItem) {
        if let Some(existing) = self.items.iter_mut().find(|i| i.product_id == item.product_id && i.format_id == item.format_id) {
            existing.quantity += item.quantity;
        } else {
            self.items.push(item);
        }
        self.recalculate();
    }

    fn recalculate(&mut self) {
        self.subtotal = self.items.iter().fold(Money::zero(CURRENCY), |acc, i| acc.add(&i.line_total()).unwrap_or(acc));
    }
}

/// Collapses duplicate (product, format) lines, keeping first-seen order.
pub fn merge_lines(lines: &[RequestedLine]) -> Vec<RequestedLine> {
    let mut merged: Vec<RequestedLine> = Vec::with_capacity(lines.len());
    for line in lines {
        match merged.iter_mut().find(|m| m.product_id == line.product_id && m.format_id == line.format_id) {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(line.quantity),
            None => merged.push(*line),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_cart_operations() {
        let (pid, fid) = (Uuid::now_v7(), Uuid::now_v7());
        let mut cart = Cart::new();
        cart.add_item(CartItem { product_id: pid, format_id: fid, name: "TB-500".into(), sku: "TB5".into(), quantity: 2, unit_price: Money::cad(Decimal::new(10, 0)) });
        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.subtotal().amount(), Decimal::new(20, 0));
        cart.add_item(CartItem { product_id: pid, format_id: fid, name: "TB-500".into(), sku: "TB5".into(), quantity: 1, unit_price: Money::cad(Decimal::new(10, 0)) });
        assert_eq!(cart.items()[0].quantity, 3); // Merged
        assert_eq!(cart.subtotal().cents(), 3000);
    }

    #[test]
    fn test_merge_lines() {
        let (p, a, b) = (Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7());
        let merged = merge_lines(&[
            RequestedLine { product_id: p, format_id: a, quantity: 2 },
            RequestedLine { product_id: p, format_id: b, quantity: 1 },
            RequestedLine { product_id: p, format_id: a, quantity: 3 },
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].quantity, 5);
        assert_eq!(merged[1].format_id, b);
    }
}
