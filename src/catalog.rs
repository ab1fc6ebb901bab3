//! Catalog and discount lookups
//!
//! Read-only adapters: the cart engine never writes product or discount rows.
//! `PgCatalog`/`PgDiscounts` query the platform tables; the `Static*` versions
//! serve tests and fixtures.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{DiscountCode, DiscountType, PriceSnapshot};
use crate::error::{CartError, Result};
use crate::ports::{DiscountDirectory, PriceResolver};

fn map_db_err(e: sqlx::Error) -> CartError {
    CartError::Storage(e.to_string())
}

pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PriceResolver for PgCatalog {
    async fn resolve(&self, product_id: Uuid, variant_id: Option<Uuid>) -> Result<PriceSnapshot> {
        let product: Option<(String, Option<i64>, Option<String>)> =
            sqlx::query_as("SELECT title, price, image_url FROM products WHERE id = $1")
                .bind(product_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_db_err)?;
        let (title, base_price, image_url) = product.ok_or(CartError::ProductNotFound)?;

        match variant_id {
            Some(variant_id) => {
                let variant: Option<(String, Option<i64>)> = sqlx::query_as(
                    "SELECT title, price FROM product_variants WHERE id = $1 AND product_id = $2",
                )
                .bind(variant_id)
                .bind(product_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_db_err)?;
                let (variant_title, variant_price) = variant.ok_or(CartError::ProductNotFound)?;
                Ok(PriceSnapshot {
                    title,
                    variant_title: Some(variant_title),
                    unit_price: variant_price.or(base_price).unwrap_or(0),
                    image_url,
                })
            }
            None => Ok(PriceSnapshot {
                title,
                variant_title: None,
                unit_price: base_price.unwrap_or(0),
                image_url,
            }),
        }
    }
}

pub struct PgDiscounts {
    pool: PgPool,
}

impl PgDiscounts {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct DiscountRow {
    id: Uuid,
    code: String,
    kind: String,
    value: i64,
    enabled: bool,
    starts_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    usage_limit: Option<i64>,
    usage_count: i64,
    min_order_value: Option<i64>,
    max_discount: Option<i64>,
}

impl DiscountRow {
    fn into_code(self) -> Result<DiscountCode> {
        let kind = DiscountType::parse(&self.kind)
            .ok_or_else(|| CartError::Storage(format!("unknown discount type '{}'", self.kind)))?;
        Ok(DiscountCode {
            id: self.id,
            code: self.code,
            kind,
            value: self.value,
            enabled: self.enabled,
            starts_at: self.starts_at,
            expires_at: self.expires_at,
            usage_limit: self.usage_limit,
            usage_count: self.usage_count,
            min_order_value: self.min_order_value,
            max_discount: self.max_discount,
        })
    }
}

const DISCOUNT_COLUMNS: &str = "id, code, kind, value, enabled, starts_at, expires_at, \
                                usage_limit, usage_count, min_order_value, max_discount";

#[async_trait]
impl DiscountDirectory for PgDiscounts {
    async fn find_code(&self, code: &str) -> Result<Option<DiscountCode>> {
        let row = sqlx::query_as::<_, DiscountRow>(&format!(
            "SELECT {DISCOUNT_COLUMNS} FROM discount_codes WHERE lower(code) = lower($1)"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;
        row.map(DiscountRow::into_code).transpose()
    }

    async fn find_code_by_id(&self, id: Uuid) -> Result<Option<DiscountCode>> {
        let row = sqlx::query_as::<_, DiscountRow>(&format!(
            "SELECT {DISCOUNT_COLUMNS} FROM discount_codes WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;
        row.map(DiscountRow::into_code).transpose()
    }
}

// ---------------------------------------------------------------------------
// In-memory fixtures
// ---------------------------------------------------------------------------

struct VariantEntry {
    title: String,
    price: Option<i64>,
}

struct ProductEntry {
    title: String,
    price: Option<i64>,
    image_url: Option<String>,
    variants: HashMap<Uuid, VariantEntry>,
}

/// Fixed product table for tests and dev wiring.
#[derive(Default)]
pub struct StaticCatalog {
    products: HashMap<Uuid, ProductEntry>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(mut self, id: Uuid, title: &str, price: Option<i64>) -> Self {
        self.products.insert(
            id,
            ProductEntry {
                title: title.to_string(),
                price,
                image_url: None,
                variants: HashMap::new(),
            },
        );
        self
    }

    pub fn with_variant(
        mut self,
        product_id: Uuid,
        variant_id: Uuid,
        title: &str,
        price: Option<i64>,
    ) -> Self {
        if let Some(product) = self.products.get_mut(&product_id) {
            product.variants.insert(
                variant_id,
                VariantEntry {
                    title: title.to_string(),
                    price,
                },
            );
        }
        self
    }
}

#[async_trait]
impl PriceResolver for StaticCatalog {
    async fn resolve(&self, product_id: Uuid, variant_id: Option<Uuid>) -> Result<PriceSnapshot> {
        let product = self
            .products
            .get(&product_id)
            .ok_or(CartError::ProductNotFound)?;
        match variant_id {
            Some(variant_id) => {
                let variant = product
                    .variants
                    .get(&variant_id)
                    .ok_or(CartError::ProductNotFound)?;
                Ok(PriceSnapshot {
                    title: product.title.clone(),
                    variant_title: Some(variant.title.clone()),
                    unit_price: variant.price.or(product.price).unwrap_or(0),
                    image_url: product.image_url.clone(),
                })
            }
            None => Ok(PriceSnapshot {
                title: product.title.clone(),
                variant_title: None,
                unit_price: product.price.unwrap_or(0),
                image_url: product.image_url.clone(),
            }),
        }
    }
}

/// Fixed code list for tests and dev wiring. Codes can be swapped out after
/// construction, which is how tests exercise carts whose attached code is
/// disabled or expired behind their back.
pub struct StaticDiscounts {
    codes: std::sync::Mutex<Vec<DiscountCode>>,
}

impl StaticDiscounts {
    pub fn new(codes: Vec<DiscountCode>) -> Self {
        Self {
            codes: std::sync::Mutex::new(codes),
        }
    }

    /// Replace the stored code with the same id, or add it.
    pub fn upsert(&self, code: DiscountCode) {
        let mut codes = self.codes.lock().expect("discount fixture lock");
        match codes.iter_mut().find(|c| c.id == code.id) {
            Some(existing) => *existing = code,
            None => codes.push(code),
        }
    }
}

#[async_trait]
impl DiscountDirectory for StaticDiscounts {
    async fn find_code(&self, code: &str) -> Result<Option<DiscountCode>> {
        Ok(self
            .codes
            .lock()
            .expect("discount fixture lock")
            .iter()
            .find(|c| c.code.eq_ignore_ascii_case(code))
            .cloned())
    }

    async fn find_code_by_id(&self, id: Uuid) -> Result<Option<DiscountCode>> {
        Ok(self
            .codes
            .lock()
            .expect("discount fixture lock")
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }
}
