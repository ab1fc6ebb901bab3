//! Ports the engine is wired against
//!
//! The checkout/API layer supplies implementations: a transactional store for
//! carts, a read-only catalog lookup for price snapshots, and a read-only
//! directory of discount codes. Postgres adapters live in [`crate::repo`] and
//! [`crate::catalog`]; in-memory ones back the tests.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{Cart, DiscountCode, PriceSnapshot};
use crate::error::Result;

/// How a caller identifies the cart it wants. Resolution order on
/// `get_or_create`: explicit cart id, then user, then session.
#[derive(Clone, Debug, Default)]
pub struct CartKey {
    pub cart_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub session_id: Option<String>,
}

impl CartKey {
    pub fn for_cart(cart_id: Uuid) -> Self {
        Self {
            cart_id: Some(cart_id),
            ..Default::default()
        }
    }

    pub fn for_user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            ..Default::default()
        }
    }

    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Default::default()
        }
    }
}

/// Persistence port for carts and their items.
///
/// `save` and `save_merge` are atomic: header and item set land together or
/// not at all. Both verify the cart's `version` and return
/// `ConcurrencyConflict` when another writer got there first; on success the
/// version on the passed cart is bumped to match the stored row.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Resolve an existing `ACTIVE` cart for the key, or create one anchored
    /// to the user (preferred) or session identifier.
    async fn get_or_create(&self, key: &CartKey) -> Result<Cart>;

    async fn load(&self, cart_id: Uuid) -> Result<Cart>;

    async fn find_active_for_user(&self, user_id: Uuid) -> Result<Option<Cart>>;

    /// Most recent cart for the session, regardless of status; the merge
    /// coordinator checks the status itself.
    async fn find_for_session(&self, session_id: &str) -> Result<Option<Cart>>;

    async fn save(&self, cart: &mut Cart) -> Result<()>;

    /// Persist both sides of a login merge in one transaction, locking the
    /// two carts in a fixed order so concurrent merges cannot deadlock.
    async fn save_merge(&self, user_cart: &mut Cart, session_cart: &mut Cart) -> Result<()>;
}

/// Catalog lookup for the price-and-display snapshot captured at add-time.
#[async_trait]
pub trait PriceResolver: Send + Sync {
    /// Fails with `ProductNotFound` when the product, or the named variant
    /// under it, does not exist. Unit price falls back from variant price to
    /// product base price to zero.
    async fn resolve(&self, product_id: Uuid, variant_id: Option<Uuid>) -> Result<PriceSnapshot>;
}

/// Read-only lookup of promotional codes.
#[async_trait]
pub trait DiscountDirectory: Send + Sync {
    /// Case-insensitive exact match on the code string.
    async fn find_code(&self, code: &str) -> Result<Option<DiscountCode>>;

    /// Lookup by id, used when recomputing a cart that already carries a code.
    async fn find_code_by_id(&self, id: Uuid) -> Result<Option<DiscountCode>>;
}
