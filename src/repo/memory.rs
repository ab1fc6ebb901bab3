//! In-memory cart store
//!
//! Backs the engine's tests and small dev setups. Same contract as the
//! Postgres adapter: atomic saves and optimistic version checks, here
//! enforced by doing every read-check-write under one mutex.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{Cart, CartStatus};
use crate::error::{CartError, Result};
use crate::ports::{CartKey, CartStore};

#[derive(Default)]
pub struct MemoryCartStore {
    carts: Mutex<HashMap<Uuid, Cart>>,
}

impl MemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_version(stored: Option<&Cart>, incoming: &Cart) -> Result<()> {
        match stored {
            Some(existing) if existing.version != incoming.version => {
                Err(CartError::ConcurrencyConflict)
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl CartStore for MemoryCartStore {
    async fn get_or_create(&self, key: &CartKey) -> Result<Cart> {
        let mut carts = self.carts.lock().await;

        if let Some(cart_id) = key.cart_id {
            if let Some(cart) = carts.get(&cart_id) {
                if cart.status == CartStatus::Active {
                    return Ok(cart.clone());
                }
            }
        }
        if let Some(user_id) = key.user_id {
            if let Some(cart) = carts
                .values()
                .find(|c| c.user_id == Some(user_id) && c.status == CartStatus::Active)
            {
                return Ok(cart.clone());
            }
        }
        if let Some(session_id) = &key.session_id {
            if let Some(cart) = carts
                .values()
                .find(|c| c.session_id.as_ref() == Some(session_id) && c.status == CartStatus::Active)
            {
                return Ok(cart.clone());
            }
        }

        // Anchor the new cart to the user when both identifiers are present.
        let cart = if let Some(user_id) = key.user_id {
            Cart::new(None, Some(user_id))
        } else {
            Cart::new(key.session_id.clone(), None)
        };
        carts.insert(cart.id, cart.clone());
        Ok(cart)
    }

    async fn load(&self, cart_id: Uuid) -> Result<Cart> {
        self.carts
            .lock()
            .await
            .get(&cart_id)
            .cloned()
            .ok_or(CartError::CartNotFound)
    }

    async fn find_active_for_user(&self, user_id: Uuid) -> Result<Option<Cart>> {
        Ok(self
            .carts
            .lock()
            .await
            .values()
            .find(|c| c.user_id == Some(user_id) && c.status == CartStatus::Active)
            .cloned())
    }

    async fn find_for_session(&self, session_id: &str) -> Result<Option<Cart>> {
        Ok(self
            .carts
            .lock()
            .await
            .values()
            .filter(|c| c.session_id.as_deref() == Some(session_id))
            .max_by_key(|c| c.created_at)
            .cloned())
    }

    async fn save(&self, cart: &mut Cart) -> Result<()> {
        let mut carts = self.carts.lock().await;
        Self::check_version(carts.get(&cart.id), cart)?;
        if carts.contains_key(&cart.id) {
            cart.version += 1;
        }
        carts.insert(cart.id, cart.clone());
        Ok(())
    }

    async fn save_merge(&self, user_cart: &mut Cart, session_cart: &mut Cart) -> Result<()> {
        let mut carts = self.carts.lock().await;
        Self::check_version(carts.get(&user_cart.id), user_cart)?;
        Self::check_version(carts.get(&session_cart.id), session_cart)?;
        if carts.contains_key(&user_cart.id) {
            user_cart.version += 1;
        }
        if carts.contains_key(&session_cart.id) {
            session_cart.version += 1;
        }
        carts.insert(user_cart.id, user_cart.clone());
        carts.insert(session_cart.id, session_cart.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolution_prefers_cart_then_user_then_session() {
        let store = MemoryCartStore::new();
        let user_id = Uuid::new_v4();

        let session_cart = store
            .get_or_create(&CartKey::for_session("s-1"))
            .await
            .unwrap();
        let user_cart = store.get_or_create(&CartKey::for_user(user_id)).await.unwrap();
        assert_ne!(session_cart.id, user_cart.id);

        // Both identifiers set: the user cart wins over the session cart.
        let key = CartKey {
            cart_id: None,
            user_id: Some(user_id),
            session_id: Some("s-1".into()),
        };
        assert_eq!(store.get_or_create(&key).await.unwrap().id, user_cart.id);

        // Explicit cart id wins over everything.
        let key = CartKey {
            cart_id: Some(session_cart.id),
            user_id: Some(user_id),
            session_id: None,
        };
        assert_eq!(store.get_or_create(&key).await.unwrap().id, session_cart.id);
        let by_id = store
            .get_or_create(&CartKey::for_cart(session_cart.id))
            .await
            .unwrap();
        assert_eq!(by_id.id, session_cart.id);
    }

    #[tokio::test]
    async fn get_or_create_is_stable_per_session() {
        let store = MemoryCartStore::new();
        let a = store.get_or_create(&CartKey::for_session("s-2")).await.unwrap();
        let b = store.get_or_create(&CartKey::for_session("s-2")).await.unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn stale_save_is_rejected() {
        let store = MemoryCartStore::new();
        let cart = store.get_or_create(&CartKey::for_session("s-3")).await.unwrap();

        let mut first = store.load(cart.id).await.unwrap();
        let mut second = store.load(cart.id).await.unwrap();

        store.save(&mut first).await.unwrap();
        let err = store.save(&mut second).await.unwrap_err();
        assert!(matches!(err, CartError::ConcurrencyConflict));
    }
}
