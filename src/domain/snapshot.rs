//! Price snapshot captured when an item enters a cart

use serde::{Deserialize, Serialize};

/// What the shopper saw at add-time. Cart lines keep this copy and never go
/// back to the catalog for it, so later catalog edits do not reprice carts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub title: String,
    pub variant_title: Option<String>,
    /// Per-unit price in minor units (cents).
    pub unit_price: i64,
    pub image_url: Option<String>,
}
