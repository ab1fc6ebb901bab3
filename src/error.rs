//! Error types for the cart engine

use thiserror::Error;

use crate::domain::discount::DiscountError;

#[derive(Error, Debug)]
pub enum CartError {
    #[error("Cart not found")]
    CartNotFound,

    #[error("Cart item not found")]
    ItemNotFound,

    #[error("Product not found")]
    ProductNotFound,

    #[error("Cart is no longer active")]
    CartNotActive,

    #[error("Quantity must be a positive integer")]
    InvalidQuantity,

    #[error("Invalid email address")]
    InvalidEmail,

    #[error(transparent)]
    Discount(#[from] DiscountError),

    #[error("Cart was modified concurrently")]
    ConcurrencyConflict,

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, CartError>;
