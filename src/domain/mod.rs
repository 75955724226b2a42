//! Checkout domain: pure pricing rules and the aggregates they act on.
pub mod aggregates;
pub mod events;
pub mod promo;
pub mod shipping;
pub mod tax;
pub mod value_objects;
