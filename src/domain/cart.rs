//! Cart aggregate
//!
//! A `Cart` owns its line items; every mutation goes through the methods here
//! and ends with `recompute`, so the stored totals always match the item set.
//! All monetary fields are integer minor units (cents).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::discount::DiscountCode;
use crate::domain::snapshot::PriceSnapshot;
use crate::error::CartError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CartStatus {
    Active,
    Expired,
    Converted,
}

impl CartStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Converted => "converted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "converted" => Some(Self::Converted),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CartItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub title: String,
    pub variant_title: Option<String>,
    /// Per-unit price captured at add-time.
    pub price: i64,
    pub image_url: Option<String>,
    pub quantity: i32,
}

impl CartItem {
    pub fn line_total(&self) -> i64 {
        self.price.saturating_mul(self.quantity as i64)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cart {
    pub id: Uuid,
    pub session_id: Option<String>,
    pub user_id: Option<Uuid>,
    pub status: CartStatus,
    pub email: Option<String>,
    pub items: Vec<CartItem>,
    pub subtotal: i64,
    pub discount_total: i64,
    pub tax_total: i64,
    pub shipping_total: i64,
    pub total: i64,
    pub discount_code_id: Option<Uuid>,
    pub abandoned_at: Option<DateTime<Utc>>,
    pub converted_to_order_id: Option<Uuid>,
    /// Optimistic concurrency token, bumped by the store on every save.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn new(session_id: Option<String>, user_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            session_id,
            user_id,
            status: CartStatus::Active,
            email: None,
            items: vec![],
            subtotal: 0,
            discount_total: 0,
            tax_total: 0,
            shipping_total: 0,
            total: 0,
            discount_code_id: None,
            abandoned_at: None,
            converted_to_order_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn find_line(&self, product_id: Uuid, variant_id: Option<Uuid>) -> Option<&CartItem> {
        self.items
            .iter()
            .find(|i| i.product_id == product_id && i.variant_id == variant_id)
    }

    pub fn ensure_active(&self) -> Result<(), CartError> {
        if self.status.is_terminal() {
            return Err(CartError::CartNotActive);
        }
        Ok(())
    }

    /// Merge-or-insert: an existing `(product_id, variant_id)` line absorbs
    /// the quantity, otherwise a new line is created from the snapshot.
    /// Returns the id of the affected line.
    pub fn add_line(
        &mut self,
        product_id: Uuid,
        variant_id: Option<Uuid>,
        snapshot: PriceSnapshot,
        quantity: i32,
    ) -> Result<Uuid, CartError> {
        if quantity <= 0 {
            return Err(CartError::InvalidQuantity);
        }
        if let Some(existing) = self
            .items
            .iter_mut()
            .find(|i| i.product_id == product_id && i.variant_id == variant_id)
        {
            existing.quantity = existing.quantity.saturating_add(quantity);
            return Ok(existing.id);
        }
        let item = CartItem {
            id: Uuid::now_v7(),
            product_id,
            variant_id,
            title: snapshot.title,
            variant_title: snapshot.variant_title,
            price: snapshot.unit_price,
            image_url: snapshot.image_url,
            quantity,
        };
        let id = item.id;
        self.items.push(item);
        Ok(id)
    }

    /// Overwrite a line's quantity. Zero or negative removes the line, and is
    /// a no-op when the line is already gone; a positive quantity on a missing
    /// line is an error.
    pub fn set_line_quantity(&mut self, item_id: Uuid, quantity: i32) -> Result<(), CartError> {
        if quantity <= 0 {
            self.remove_line(item_id);
            return Ok(());
        }
        let item = self
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or(CartError::ItemNotFound)?;
        item.quantity = quantity;
        Ok(())
    }

    /// Removing an absent line is a no-op, so removal is idempotent.
    pub fn remove_line(&mut self, item_id: Uuid) {
        self.items.retain(|i| i.id != item_id);
    }

    pub fn clear_lines(&mut self) {
        self.items.clear();
    }

    pub fn attach_discount(&mut self, code_id: Uuid) {
        self.discount_code_id = Some(code_id);
    }

    pub fn detach_discount(&mut self) {
        self.discount_code_id = None;
    }

    /// Tax and shipping are supplied by checkout, never computed here.
    pub fn set_external_charges(&mut self, tax_total: i64, shipping_total: i64) {
        self.tax_total = tax_total;
        self.shipping_total = shipping_total;
    }

    /// Recompute the stored totals from the item set. Idempotent; the sole
    /// writer of `subtotal`, `discount_total` and `total`.
    ///
    /// `discount` is the currently attached code, if any. The amount is
    /// re-derived against the fresh subtotal on every call, but an attached
    /// code that has since expired or been disabled is not detached here —
    /// only `remove_discount` and the `apply_discount` minimum re-check
    /// detach codes.
    pub fn recompute(&mut self, discount: Option<&DiscountCode>) {
        self.subtotal = self.items.iter().map(CartItem::line_total).sum();
        self.discount_total = match (self.discount_code_id, discount) {
            (Some(_), Some(code)) => code.amount(self.subtotal),
            _ => 0,
        };
        self.total = (self.subtotal - self.discount_total).max(0) + self.tax_total + self.shipping_total;
        self.updated_at = Utc::now();
    }

    pub fn mark_expired(&mut self) -> Result<(), CartError> {
        self.ensure_active()?;
        self.status = CartStatus::Expired;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_converted(&mut self, order_id: Uuid) -> Result<(), CartError> {
        self.ensure_active()?;
        self.status = CartStatus::Converted;
        self.converted_to_order_id = Some(order_id);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_abandoned(&mut self, at: DateTime<Utc>) {
        self.abandoned_at = Some(at);
        self.updated_at = Utc::now();
    }

    pub fn clear_abandoned(&mut self) {
        self.abandoned_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::discount::DiscountType;
    use proptest::prelude::*;

    fn snapshot(title: &str, price: i64) -> PriceSnapshot {
        PriceSnapshot {
            title: title.into(),
            variant_title: None,
            unit_price: price,
            image_url: None,
        }
    }

    fn ten_percent() -> DiscountCode {
        DiscountCode {
            id: Uuid::new_v4(),
            code: "TEN".into(),
            kind: DiscountType::Percentage,
            value: 10,
            enabled: true,
            starts_at: None,
            expires_at: None,
            usage_limit: None,
            usage_count: 0,
            min_order_value: None,
            max_discount: None,
        }
    }

    #[test]
    fn adding_same_product_merges_lines() {
        let mut cart = Cart::new(Some("sess-1".into()), None);
        let p = Uuid::new_v4();
        cart.add_line(p, None, snapshot("Widget", 1000), 2).unwrap();
        cart.add_line(p, None, snapshot("Widget", 1000), 1).unwrap();
        cart.recompute(None);
        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.items[0].quantity, 3);
        assert_eq!(cart.subtotal, 3000);
    }

    #[test]
    fn same_product_different_variant_gets_own_line() {
        let mut cart = Cart::new(Some("sess-1".into()), None);
        let p = Uuid::new_v4();
        let v = Uuid::new_v4();
        cart.add_line(p, None, snapshot("Widget", 1000), 1).unwrap();
        cart.add_line(p, Some(v), snapshot("Widget", 1200), 1).unwrap();
        assert_eq!(cart.item_count(), 2);
    }

    #[test]
    fn zero_quantity_removes_line() {
        let mut cart = Cart::new(Some("sess-1".into()), None);
        let id = cart
            .add_line(Uuid::new_v4(), None, snapshot("Widget", 1500), 1)
            .unwrap();
        cart.set_line_quantity(id, -1).unwrap();
        cart.recompute(None);
        assert!(cart.is_empty());
        assert_eq!(cart.subtotal, 0);
        assert_eq!(cart.total, 0);
        // Second removal is a no-op.
        cart.set_line_quantity(id, 0).unwrap();
        assert!(cart.is_empty());
    }

    #[test]
    fn positive_quantity_on_missing_line_errors() {
        let mut cart = Cart::new(Some("sess-1".into()), None);
        let err = cart.set_line_quantity(Uuid::new_v4(), 2).unwrap_err();
        assert!(matches!(err, CartError::ItemNotFound));
    }

    #[test]
    fn non_positive_add_rejected() {
        let mut cart = Cart::new(Some("sess-1".into()), None);
        let err = cart
            .add_line(Uuid::new_v4(), None, snapshot("Widget", 100), 0)
            .unwrap_err();
        assert!(matches!(err, CartError::InvalidQuantity));
    }

    #[test]
    fn repeated_large_adds_saturate_instead_of_overflowing() {
        let mut cart = Cart::new(Some("sess-1".into()), None);
        let p = Uuid::new_v4();
        cart.add_line(p, None, snapshot("Widget", 100), i32::MAX).unwrap();
        cart.add_line(p, None, snapshot("Widget", 100), i32::MAX).unwrap();
        assert_eq!(cart.items[0].quantity, i32::MAX);
        cart.recompute(None);
        assert!(cart.subtotal > 0);
        assert!(cart.total >= 0);
    }

    #[test]
    fn clear_keeps_discount_reference_but_zeroes_totals() {
        let mut cart = Cart::new(Some("sess-1".into()), None);
        cart.add_line(Uuid::new_v4(), None, snapshot("Widget", 2000), 2)
            .unwrap();
        let code = ten_percent();
        cart.attach_discount(code.id);
        cart.recompute(Some(&code));
        assert_eq!(cart.discount_total, 400);

        cart.clear_lines();
        cart.recompute(Some(&code));
        assert_eq!(cart.discount_code_id, Some(code.id));
        assert_eq!(cart.subtotal, 0);
        assert_eq!(cart.discount_total, 0);
        assert_eq!(cart.total, 0);
    }

    #[test]
    fn terminal_carts_reject_transitions() {
        let mut cart = Cart::new(None, Some(Uuid::new_v4()));
        cart.mark_converted(Uuid::new_v4()).unwrap();
        assert!(matches!(cart.mark_expired(), Err(CartError::CartNotActive)));
        assert!(matches!(cart.ensure_active(), Err(CartError::CartNotActive)));
    }

    #[test]
    fn external_charges_fold_into_total() {
        let mut cart = Cart::new(Some("sess-1".into()), None);
        cart.add_line(Uuid::new_v4(), None, snapshot("Widget", 1000), 1)
            .unwrap();
        cart.set_external_charges(80, 500);
        cart.recompute(None);
        assert_eq!(cart.total, 1580);
    }

    proptest! {
        #[test]
        fn totals_invariants_hold(
            lines in prop::collection::vec((1i64..100_000, 1i32..50), 0..8),
            pct in 0i64..=100,
        ) {
            let mut cart = Cart::new(Some("sess-prop".into()), None);
            for (price, qty) in &lines {
                cart.add_line(Uuid::new_v4(), None, snapshot("P", *price), *qty).unwrap();
            }
            let mut code = ten_percent();
            code.value = pct;
            cart.attach_discount(code.id);
            cart.recompute(Some(&code));

            let expected: i64 = cart.items.iter().map(|i| i.price * i.quantity as i64).sum();
            prop_assert_eq!(cart.subtotal, expected);
            prop_assert_eq!(cart.total, (cart.subtotal - cart.discount_total).max(0));
            prop_assert!(cart.total >= 0);
        }
    }
}
