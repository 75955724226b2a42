//! Aggregates module
pub mod product;
pub mod order;
pub mod cart;
pub mod reservation;

pub use product::{ProductError, ProductFormat};
pub use order::{LineItem, NewOrder, Order, OrderError, OrderSnapshot, OrderStatus, OrderTotals, PaymentStatus};
pub use cart::{Cart, CartItem, RequestedLine};
pub use reservation::{InventoryReservation, ReservationStatus};
