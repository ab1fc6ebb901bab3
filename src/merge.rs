//! Login-time cart merge
//!
//! Reconciles an anonymous session cart with the user's cart, once, when a
//! shopper authenticates. Runs over the same ports as the engine; the two-cart
//! write goes through `CartStore::save_merge` so relocation and expiry land in
//! one transaction.

use uuid::Uuid;

use crate::domain::{Cart, CartStatus};
use crate::engine::CartService;
use crate::error::Result;
use crate::ports::CartKey;

impl CartService {
    /// Merge the session cart into the user's cart at login.
    ///
    /// Returns `None` when there is nothing on either side: no live session
    /// cart and no existing user cart. Nothing is created in that case.
    ///
    /// Item movement is all-or-nothing per line: a line either sums into the
    /// user cart's matching `(product, variant)` line or relocates wholesale.
    /// Afterwards the session cart is empty and `EXPIRED`.
    pub async fn merge_on_login(&self, session_id: &str, user_id: Uuid) -> Result<Option<Cart>> {
        let session_cart = self
            .store
            .find_for_session(session_id)
            .await?
            .filter(|c| c.status == CartStatus::Active);

        let Some(mut session_cart) = session_cart else {
            return self.store.find_active_for_user(user_id).await;
        };

        match self.store.find_active_for_user(user_id).await? {
            None => {
                // Re-anchor: the session cart simply becomes the user's cart.
                session_cart.session_id = None;
                session_cart.user_id = Some(user_id);
                self.store.save(&mut session_cart).await?;
                tracing::info!(cart_id = %session_cart.id, %user_id, "session cart re-anchored to user");
                Ok(Some(session_cart))
            }
            Some(mut user_cart) => {
                for item in session_cart.items.drain(..) {
                    match user_cart
                        .items
                        .iter_mut()
                        .find(|i| i.product_id == item.product_id && i.variant_id == item.variant_id)
                    {
                        Some(existing) => {
                            existing.quantity = existing.quantity.saturating_add(item.quantity)
                        }
                        None => user_cart.items.push(item),
                    }
                }
                // The session key is released along with the terminal state so
                // the browser session can start a fresh cart later.
                session_cart.session_id = None;
                session_cart.mark_expired()?;
                session_cart.recompute(None);

                let discount = match user_cart.discount_code_id {
                    Some(id) => self.discounts.find_code_by_id(id).await?,
                    None => None,
                };
                user_cart.recompute(discount.as_ref());

                self.store.save_merge(&mut user_cart, &mut session_cart).await?;
                tracing::info!(
                    user_cart = %user_cart.id,
                    session_cart = %session_cart.id,
                    items = user_cart.item_count(),
                    "session cart merged into user cart"
                );
                Ok(Some(user_cart))
            }
        }
    }

    /// Convenience for callers that always want a cart back after login, even
    /// when there was nothing to merge.
    pub async fn merge_or_create(&self, session_id: &str, user_id: Uuid) -> Result<Cart> {
        match self.merge_on_login(session_id, user_id).await? {
            Some(cart) => Ok(cart),
            None => self.store.get_or_create(&CartKey::for_user(user_id)).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::catalog::{StaticCatalog, StaticDiscounts};
    use crate::repo::memory::MemoryCartStore;

    fn service(catalog: StaticCatalog) -> CartService {
        CartService::new(
            Arc::new(MemoryCartStore::new()),
            Arc::new(catalog),
            Arc::new(StaticDiscounts::new(vec![])),
        )
    }

    #[tokio::test]
    async fn merge_sums_and_relocates_lines() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let catalog = StaticCatalog::new()
            .with_product(a, "A", Some(100))
            .with_product(b, "B", Some(200))
            .with_product(c, "C", Some(300));
        let svc = service(catalog);
        let user_id = Uuid::new_v4();

        // Session cart: {A:2, B:1}
        let session_cart = svc
            .get_or_create(&CartKey::for_session("sess-9"))
            .await
            .unwrap();
        svc.add_item(session_cart.id, a, None, 2).await.unwrap();
        svc.add_item(session_cart.id, b, None, 1).await.unwrap();

        // User cart: {A:1, C:3}
        let user_cart = svc.get_or_create(&CartKey::for_user(user_id)).await.unwrap();
        svc.add_item(user_cart.id, a, None, 1).await.unwrap();
        svc.add_item(user_cart.id, c, None, 3).await.unwrap();

        let merged = svc.merge_on_login("sess-9", user_id).await.unwrap().unwrap();
        assert_eq!(merged.id, user_cart.id);
        assert_eq!(merged.item_count(), 3);
        let qty = |p| merged.find_line(p, None).unwrap().quantity;
        assert_eq!(qty(a), 3);
        assert_eq!(qty(b), 1);
        assert_eq!(qty(c), 3);
        assert_eq!(merged.subtotal, 3 * 100 + 200 + 3 * 300);

        let old = svc.get(session_cart.id).await.unwrap();
        assert_eq!(old.status, CartStatus::Expired);
        assert!(old.is_empty());
    }

    #[tokio::test]
    async fn session_cart_is_reanchored_when_user_has_none() {
        let a = Uuid::new_v4();
        let svc = service(StaticCatalog::new().with_product(a, "A", Some(100)));
        let user_id = Uuid::new_v4();

        let session_cart = svc
            .get_or_create(&CartKey::for_session("sess-2"))
            .await
            .unwrap();
        svc.add_item(session_cart.id, a, None, 1).await.unwrap();

        let merged = svc.merge_on_login("sess-2", user_id).await.unwrap().unwrap();
        assert_eq!(merged.id, session_cart.id);
        assert_eq!(merged.user_id, Some(user_id));
        assert_eq!(merged.session_id, None);
        assert_eq!(merged.item_count(), 1);
    }

    #[tokio::test]
    async fn no_session_cart_returns_existing_user_cart() {
        let svc = service(StaticCatalog::new());
        let user_id = Uuid::new_v4();
        let user_cart = svc.get_or_create(&CartKey::for_user(user_id)).await.unwrap();

        let merged = svc.merge_on_login("sess-none", user_id).await.unwrap();
        assert_eq!(merged.unwrap().id, user_cart.id);
    }

    #[tokio::test]
    async fn nothing_on_either_side_creates_nothing() {
        let svc = service(StaticCatalog::new());
        let merged = svc.merge_on_login("sess-x", Uuid::new_v4()).await.unwrap();
        assert!(merged.is_none());
    }

    #[tokio::test]
    async fn terminal_session_cart_is_ignored() {
        let a = Uuid::new_v4();
        let svc = service(StaticCatalog::new().with_product(a, "A", Some(100)));
        let user_id = Uuid::new_v4();

        let session_cart = svc
            .get_or_create(&CartKey::for_session("sess-3"))
            .await
            .unwrap();
        svc.add_item(session_cart.id, a, None, 2).await.unwrap();
        svc.convert_to_order(session_cart.id, Uuid::new_v4())
            .await
            .unwrap();

        let merged = svc.merge_on_login("sess-3", user_id).await.unwrap();
        assert!(merged.is_none());
    }

    #[tokio::test]
    async fn merge_or_create_always_yields_a_cart() {
        let svc = service(StaticCatalog::new());
        let user_id = Uuid::new_v4();
        let cart = svc.merge_or_create("sess-y", user_id).await.unwrap();
        assert_eq!(cart.user_id, Some(user_id));
        assert_eq!(cart.status, CartStatus::Active);
    }
}
