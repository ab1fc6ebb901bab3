//! Domain model for the cart engine

pub mod cart;
pub mod discount;
pub mod snapshot;

pub use cart::{Cart, CartItem, CartStatus};
pub use discount::{DiscountCode, DiscountError, DiscountType};
pub use snapshot::PriceSnapshot;
