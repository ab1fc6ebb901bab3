//! Postgres cart store
//!
//! Per-cart mutual exclusion comes from `SELECT ... FOR UPDATE` on the cart
//! row plus an optimistic version column: the row is locked for the duration
//! of the save transaction, and a save built on stale state fails with
//! `ConcurrencyConflict` instead of clobbering newer totals. Items are
//! reconciled by delete-and-insert inside the same transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::{Cart, CartItem, CartStatus};
use crate::error::{CartError, Result};
use crate::ports::{CartKey, CartStore};

pub struct PgCartStore {
    pool: PgPool,
}

impl PgCartStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct CartRow {
    id: Uuid,
    session_id: Option<String>,
    user_id: Option<Uuid>,
    status: String,
    email: Option<String>,
    subtotal: i64,
    discount_total: i64,
    tax_total: i64,
    shipping_total: i64,
    total: i64,
    discount_code_id: Option<Uuid>,
    abandoned_at: Option<DateTime<Utc>>,
    converted_to_order_id: Option<Uuid>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: Uuid,
    product_id: Uuid,
    variant_id: Option<Uuid>,
    title: String,
    variant_title: Option<String>,
    price: i64,
    image_url: Option<String>,
    quantity: i32,
}

impl CartRow {
    fn into_cart(self, items: Vec<ItemRow>) -> Result<Cart> {
        let status = CartStatus::parse(&self.status)
            .ok_or_else(|| CartError::Storage(format!("unknown cart status '{}'", self.status)))?;
        Ok(Cart {
            id: self.id,
            session_id: self.session_id,
            user_id: self.user_id,
            status,
            email: self.email,
            items: items
                .into_iter()
                .map(|i| CartItem {
                    id: i.id,
                    product_id: i.product_id,
                    variant_id: i.variant_id,
                    title: i.title,
                    variant_title: i.variant_title,
                    price: i.price,
                    image_url: i.image_url,
                    quantity: i.quantity,
                })
                .collect(),
            subtotal: self.subtotal,
            discount_total: self.discount_total,
            tax_total: self.tax_total,
            shipping_total: self.shipping_total,
            total: self.total,
            discount_code_id: self.discount_code_id,
            abandoned_at: self.abandoned_at,
            converted_to_order_id: self.converted_to_order_id,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn map_db_err(e: sqlx::Error) -> CartError {
    if let sqlx::Error::Database(db) = &e {
        if let Some(code) = db.code() {
            // Serialization failure, deadlock, unique violation: all are
            // retry-with-fresh-state situations for the caller.
            if code == "40001" || code == "40P01" || code == "23505" {
                return CartError::ConcurrencyConflict;
            }
        }
    }
    CartError::Storage(e.to_string())
}

async fn fetch_items(pool: &PgPool, cart_id: Uuid) -> Result<Vec<ItemRow>> {
    sqlx::query_as::<_, ItemRow>(
        "SELECT id, product_id, variant_id, title, variant_title, price, image_url, quantity \
         FROM cart_items WHERE cart_id = $1 ORDER BY id",
    )
    .bind(cart_id)
    .fetch_all(pool)
    .await
    .map_err(map_db_err)
}

/// Upsert the cart header and rewrite its item set. Assumes the cart row is
/// already locked (or does not exist yet).
async fn write_cart(tx: &mut Transaction<'_, Postgres>, cart: &Cart, exists: bool) -> Result<()> {
    if exists {
        sqlx::query(
            "UPDATE carts SET session_id = $2, user_id = $3, status = $4, email = $5, \
             subtotal = $6, discount_total = $7, tax_total = $8, shipping_total = $9, total = $10, \
             discount_code_id = $11, abandoned_at = $12, converted_to_order_id = $13, \
             version = $14, updated_at = $15 WHERE id = $1",
        )
        .bind(cart.id)
        .bind(&cart.session_id)
        .bind(cart.user_id)
        .bind(cart.status.as_str())
        .bind(&cart.email)
        .bind(cart.subtotal)
        .bind(cart.discount_total)
        .bind(cart.tax_total)
        .bind(cart.shipping_total)
        .bind(cart.total)
        .bind(cart.discount_code_id)
        .bind(cart.abandoned_at)
        .bind(cart.converted_to_order_id)
        .bind(cart.version + 1)
        .bind(cart.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(map_db_err)?;
    } else {
        sqlx::query(
            "INSERT INTO carts (id, session_id, user_id, status, email, subtotal, discount_total, \
             tax_total, shipping_total, total, discount_code_id, abandoned_at, \
             converted_to_order_id, version, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(cart.id)
        .bind(&cart.session_id)
        .bind(cart.user_id)
        .bind(cart.status.as_str())
        .bind(&cart.email)
        .bind(cart.subtotal)
        .bind(cart.discount_total)
        .bind(cart.tax_total)
        .bind(cart.shipping_total)
        .bind(cart.total)
        .bind(cart.discount_code_id)
        .bind(cart.abandoned_at)
        .bind(cart.converted_to_order_id)
        .bind(cart.version)
        .bind(cart.created_at)
        .bind(cart.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(map_db_err)?;
    }

    sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
        .bind(cart.id)
        .execute(&mut **tx)
        .await
        .map_err(map_db_err)?;
    for item in &cart.items {
        sqlx::query(
            "INSERT INTO cart_items (id, cart_id, product_id, variant_id, title, variant_title, \
             price, image_url, quantity) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(item.id)
        .bind(cart.id)
        .bind(item.product_id)
        .bind(item.variant_id)
        .bind(&item.title)
        .bind(&item.variant_title)
        .bind(item.price)
        .bind(&item.image_url)
        .bind(item.quantity)
        .execute(&mut **tx)
        .await
        .map_err(map_db_err)?;
    }
    Ok(())
}

#[async_trait]
impl CartStore for PgCartStore {
    async fn get_or_create(&self, key: &CartKey) -> Result<Cart> {
        if let Some(cart_id) = key.cart_id {
            let found = sqlx::query_as::<_, CartRow>(
                "SELECT * FROM carts WHERE id = $1 AND status = 'active'",
            )
            .bind(cart_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
            if let Some(row) = found {
                let items = fetch_items(&self.pool, row.id).await?;
                return row.into_cart(items);
            }
        }
        if let Some(user_id) = key.user_id {
            if let Some(cart) = self.find_active_for_user(user_id).await? {
                return Ok(cart);
            }
        }
        if let Some(session_id) = &key.session_id {
            let found = self
                .find_for_session(session_id)
                .await?
                .filter(|c| c.status == CartStatus::Active);
            if let Some(cart) = found {
                return Ok(cart);
            }
        }

        let cart = if let Some(user_id) = key.user_id {
            Cart::new(None, Some(user_id))
        } else {
            Cart::new(key.session_id.clone(), None)
        };
        // A racing create for the same owner trips the partial unique index
        // and maps to ConcurrencyConflict; the caller retries and finds the
        // winner's cart.
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;
        write_cart(&mut tx, &cart, false).await?;
        tx.commit().await.map_err(map_db_err)?;
        Ok(cart)
    }

    async fn load(&self, cart_id: Uuid) -> Result<Cart> {
        let row = sqlx::query_as::<_, CartRow>("SELECT * FROM carts WHERE id = $1")
            .bind(cart_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?
            .ok_or(CartError::CartNotFound)?;
        let items = fetch_items(&self.pool, row.id).await?;
        row.into_cart(items)
    }

    async fn find_active_for_user(&self, user_id: Uuid) -> Result<Option<Cart>> {
        let row = sqlx::query_as::<_, CartRow>(
            "SELECT * FROM carts WHERE user_id = $1 AND status = 'active'",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;
        match row {
            Some(row) => {
                let items = fetch_items(&self.pool, row.id).await?;
                row.into_cart(items).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn find_for_session(&self, session_id: &str) -> Result<Option<Cart>> {
        let row = sqlx::query_as::<_, CartRow>(
            "SELECT * FROM carts WHERE session_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;
        match row {
            Some(row) => {
                let items = fetch_items(&self.pool, row.id).await?;
                row.into_cart(items).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn save(&self, cart: &mut Cart) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;
        let current: Option<(i64,)> =
            sqlx::query_as("SELECT version FROM carts WHERE id = $1 FOR UPDATE")
                .bind(cart.id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_db_err)?;
        let exists = match current {
            Some((version,)) => {
                if version != cart.version {
                    return Err(CartError::ConcurrencyConflict);
                }
                true
            }
            None => false,
        };
        write_cart(&mut tx, cart, exists).await?;
        tx.commit().await.map_err(map_db_err)?;
        if exists {
            cart.version += 1;
        }
        Ok(())
    }

    async fn save_merge(&self, user_cart: &mut Cart, session_cart: &mut Cart) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;
        // Lock both rows in id order so two concurrent merges over the same
        // pair cannot deadlock.
        let locked: Vec<(Uuid, i64)> = sqlx::query_as(
            "SELECT id, version FROM carts WHERE id = ANY($1) ORDER BY id FOR UPDATE",
        )
        .bind(vec![user_cart.id, session_cart.id])
        .fetch_all(&mut *tx)
        .await
        .map_err(map_db_err)?;

        for cart in [&*user_cart, &*session_cart] {
            match locked.iter().find(|(id, _)| *id == cart.id) {
                Some((_, version)) if *version == cart.version => {}
                Some(_) => return Err(CartError::ConcurrencyConflict),
                None => return Err(CartError::CartNotFound),
            }
        }

        // The emptied session cart goes first: relocated lines keep their ids,
        // so their old rows must be gone before the user cart re-inserts them.
        write_cart(&mut tx, session_cart, true).await?;
        write_cart(&mut tx, user_cart, true).await?;
        tx.commit().await.map_err(map_db_err)?;
        user_cart.version += 1;
        session_cart.version += 1;
        Ok(())
    }
}
