//! Orders, line items and their lifecycle.

mod entity;
mod reservation;
mod state;
mod value_objects;

pub use entity::{NewOrder, Order, PaymentReference};
pub use reservation::StockReservation;
pub use state::{OrderStatus, Transition};
pub use value_objects::{LineItem, Money, OrderLine, validate_lines};
