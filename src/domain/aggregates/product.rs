//! Product formats as seen by checkout

use uuid::Uuid;
use crate::domain::value_objects::{Money, Quantity, Sku};

/// A sellable format of a product (e.g. a 5mg vial). Prices are server truth.
#[derive(Clone, Debug)]
pub struct ProductFormat {
    id: Uuid,
    product_id: Uuid,
    product_name: String,
    format_name: String,
    sku: Sku,
    price: Money,
    stock: Quantity,
    reserved: Quantity,
    is_active: bool,
}

impl ProductFormat {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Uuid, product_id: Uuid, product_name: impl Into<String>, format_name: impl Into<String>,
        sku: Sku, price: Money, stock: u32, reserved: u32, is_active: bool,
    ) -> Self {
        Self {
            id, product_id, product_name: product_name.into(), format_name: format_name.into(),
            sku, price, stock: Quantity::new(stock), reserved: Quantity::new(reserved), is_active,
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn product_id(&self) -> Uuid { self.product_id }
    pub fn product_name(&self) -> &str { &self.product_name }
    pub fn format_name(&self) -> &str { &self.format_name }
    pub fn sku(&self) -> &Sku { &self.sku }
    pub fn price(&self) -> &Money { &self.price }
    pub fn stock(&self) -> u32 { self.stock.value() }
    pub fn is_active(&self) -> bool { self.is_active }

    pub fn display_name(&self) -> String {
        if self.format_name.is_empty() { self.product_name.clone() }
        else { format!("{} - {}", self.product_name, self.format_name) }
    }

    /// Stock on hand minus open reservations.
    pub fn available(&self) -> u32 {
        self.stock.subtract(self.reserved.value()).map(|q| q.value()).unwrap_or(0)
    }

    pub fn ensure_available(&self, qty: u32) -> Result<(), ProductError> {
        if !self.is_active { return Err(ProductError::Unavailable(self.id)); }
        let available = self.available();
        if available < qty {
            return Err(ProductError::InsufficientInventory { sku: self.sku.to_string(), available });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProductError {
    #[error("product format {0} is not available")]
    Unavailable(Uuid),
    #[error("insufficient inventory for {sku}: {available} available")]
    InsufficientInventory { sku: String, available: u32 },
}
