//! Commerce Cart Engine
//!
//! Shopping cart and discount computation for the commerce platform:
//! a mutable, priced collection of line items per shopper, promotional codes
//! under eligibility rules, and session-to-user cart merging at login.
//!
//! ## Layout
//! - [`domain`] — `Cart`/`CartItem` aggregate, `DiscountCode` evaluation,
//!   price snapshots
//! - [`ports`] — the store, catalog and discount-lookup traits the engine is
//!   wired against
//! - [`engine`] — [`engine::CartService`], the single writer of cart state
//! - [`merge`] — login-time reconciliation of session and user carts
//! - [`repo`], [`catalog`] — Postgres and in-memory adapters
//!
//! Tax, shipping, payment capture and inventory are out of scope: carts hold
//! externally supplied tax/shipping values and stop at `CONVERTED` once
//! checkout produces an order.

pub mod catalog;
pub mod domain;
pub mod engine;
pub mod error;
pub mod merge;
pub mod ports;
pub mod repo;

pub use domain::{Cart, CartItem, CartStatus, DiscountCode, DiscountError, DiscountType};
pub use engine::CartService;
pub use error::{CartError, Result};
pub use ports::{CartKey, CartStore, DiscountDirectory, PriceResolver};
