//! Cart service
//!
//! The single writer of cart state. Every operation loads the cart, checks it
//! is still `ACTIVE`, applies the mutation through the aggregate, recomputes
//! totals and persists header plus items in one atomic `save`. A failed
//! operation leaves nothing behind; `ConcurrencyConflict` from the store is
//! surfaced as-is for the caller to retry with fresh state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{Cart, DiscountError};
use crate::error::{CartError, Result};
use crate::ports::{CartKey, CartStore, DiscountDirectory, PriceResolver};

pub struct CartService {
    pub(crate) store: Arc<dyn CartStore>,
    pub(crate) pricing: Arc<dyn PriceResolver>,
    pub(crate) discounts: Arc<dyn DiscountDirectory>,
}

impl CartService {
    pub fn new(
        store: Arc<dyn CartStore>,
        pricing: Arc<dyn PriceResolver>,
        discounts: Arc<dyn DiscountDirectory>,
    ) -> Self {
        Self {
            store,
            pricing,
            discounts,
        }
    }

    pub async fn get_or_create(&self, key: &CartKey) -> Result<Cart> {
        self.store.get_or_create(key).await
    }

    pub async fn get(&self, cart_id: Uuid) -> Result<Cart> {
        self.store.load(cart_id).await
    }

    pub async fn add_item(
        &self,
        cart_id: Uuid,
        product_id: Uuid,
        variant_id: Option<Uuid>,
        quantity: i32,
    ) -> Result<Cart> {
        if quantity <= 0 {
            return Err(CartError::InvalidQuantity);
        }
        let mut cart = self.store.load(cart_id).await?;
        cart.ensure_active()?;
        let snapshot = self.pricing.resolve(product_id, variant_id).await?;
        cart.add_line(product_id, variant_id, snapshot, quantity)?;
        self.recompute_and_save(&mut cart).await?;
        tracing::debug!(%cart_id, %product_id, quantity, "item added to cart");
        Ok(cart)
    }

    pub async fn update_item_quantity(
        &self,
        cart_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<Cart> {
        let mut cart = self.store.load(cart_id).await?;
        cart.ensure_active()?;
        cart.set_line_quantity(item_id, quantity)?;
        self.recompute_and_save(&mut cart).await?;
        Ok(cart)
    }

    pub async fn remove_item(&self, cart_id: Uuid, item_id: Uuid) -> Result<Cart> {
        let mut cart = self.store.load(cart_id).await?;
        cart.ensure_active()?;
        cart.remove_line(item_id);
        self.recompute_and_save(&mut cart).await?;
        Ok(cart)
    }

    pub async fn clear(&self, cart_id: Uuid) -> Result<Cart> {
        let mut cart = self.store.load(cart_id).await?;
        cart.ensure_active()?;
        cart.clear_lines();
        self.recompute_and_save(&mut cart).await?;
        Ok(cart)
    }

    /// Validate and attach a promotional code.
    ///
    /// Any evaluation failure leaves the cart untouched. After attaching, the
    /// minimum-order rule is re-checked against the freshly recomputed
    /// subtotal; a failure there detaches the code again and reports
    /// `BelowMinimum`, leaving the cart otherwise valid.
    pub async fn apply_discount(
        &self,
        cart_id: Uuid,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<Cart> {
        let mut cart = self.store.load(cart_id).await?;
        cart.ensure_active()?;
        let discount = self
            .discounts
            .find_code(code)
            .await?
            .ok_or(DiscountError::InvalidCode)?;
        discount.validate(cart.subtotal, now)?;

        cart.attach_discount(discount.id);
        cart.recompute(Some(&discount));

        if let Some(minimum) = discount.min_order_value {
            if cart.subtotal < minimum {
                // Nothing is persisted on this path; the load-time state is
                // still what the store holds.
                return Err(DiscountError::BelowMinimum { minimum }.into());
            }
        }

        cart.clear_abandoned();
        self.store.save(&mut cart).await?;
        tracing::info!(%cart_id, code = %discount.code, amount = cart.discount_total, "discount applied");
        Ok(cart)
    }

    pub async fn remove_discount(&self, cart_id: Uuid) -> Result<Cart> {
        let mut cart = self.store.load(cart_id).await?;
        cart.ensure_active()?;
        cart.detach_discount();
        self.recompute_and_save(&mut cart).await?;
        Ok(cart)
    }

    /// Attach a contact address for abandonment recovery. No totals change.
    pub async fn set_email(&self, cart_id: Uuid, email: &str) -> Result<Cart> {
        if !validator::validate_email(email) {
            return Err(CartError::InvalidEmail);
        }
        let mut cart = self.store.load(cart_id).await?;
        cart.ensure_active()?;
        cart.email = Some(email.to_string());
        cart.updated_at = Utc::now();
        self.store.save(&mut cart).await?;
        Ok(cart)
    }

    /// Flag an idle cart for recovery follow-up. The follow-up itself happens
    /// elsewhere; this only stamps `abandoned_at`.
    pub async fn mark_abandoned(&self, cart_id: Uuid, at: DateTime<Utc>) -> Result<Cart> {
        let mut cart = self.store.load(cart_id).await?;
        cart.ensure_active()?;
        cart.mark_abandoned(at);
        self.store.save(&mut cart).await?;
        Ok(cart)
    }

    /// Terminal transition used by checkout once an order exists.
    pub async fn convert_to_order(&self, cart_id: Uuid, order_id: Uuid) -> Result<Cart> {
        let mut cart = self.store.load(cart_id).await?;
        cart.mark_converted(order_id)?;
        self.store.save(&mut cart).await?;
        tracing::info!(%cart_id, %order_id, "cart converted to order");
        Ok(cart)
    }

    /// Re-derive totals with the currently attached code (if it still
    /// resolves) and persist atomically. A cart flagged for abandonment that
    /// gets mutated again is clearly not abandoned, so the flag comes off
    /// here.
    pub(crate) async fn recompute_and_save(&self, cart: &mut Cart) -> Result<()> {
        let discount = match cart.discount_code_id {
            Some(id) => self.discounts.find_code_by_id(id).await?,
            None => None,
        };
        cart.clear_abandoned();
        cart.recompute(discount.as_ref());
        self.store.save(cart).await
    }
}
