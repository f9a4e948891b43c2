pub mod cart_item;
pub mod order;
pub mod order_item;
pub mod payment_transaction;
pub mod product;

pub use order::{OrderStatus, PaymentStatus};
pub use order_item::OrderItemStatus;
