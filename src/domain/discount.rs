//! Discount codes and eligibility evaluation
//!
//! `DiscountCode` rows are owned by the promotions admin; this engine only
//! reads them. Attaching a code to a cart does not consume a use — the usage
//! counter is incremented at checkout, outside this crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    Fixed,
    FreeShipping,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::Fixed => "fixed",
            Self::FreeShipping => "free_shipping",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "percentage" => Some(Self::Percentage),
            "fixed" => Some(Self::Fixed),
            "free_shipping" => Some(Self::FreeShipping),
            _ => None,
        }
    }
}

/// A promotional code as stored by the promotions module. All monetary values
/// are integer minor units (cents).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiscountCode {
    pub id: Uuid,
    pub code: String,
    pub kind: DiscountType,
    /// Percent (0-100) for `Percentage`, cents for `Fixed`, unused for
    /// `FreeShipping`.
    pub value: i64,
    pub enabled: bool,
    pub starts_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub usage_limit: Option<i64>,
    pub usage_count: i64,
    pub min_order_value: Option<i64>,
    pub max_discount: Option<i64>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscountError {
    #[error("Unknown discount code")]
    InvalidCode,

    #[error("Discount code is disabled")]
    CodeDisabled,

    #[error("Discount code is not active yet")]
    NotYetActive,

    #[error("Discount code has expired")]
    Expired,

    #[error("Discount code usage limit reached")]
    UsageLimitReached,

    #[error("Order subtotal is below the {minimum} cent minimum for this code")]
    BelowMinimum { minimum: i64 },
}

impl DiscountCode {
    /// Eligibility checks in a fixed order; the first failing rule wins.
    pub fn validate(&self, subtotal: i64, now: DateTime<Utc>) -> Result<(), DiscountError> {
        if !self.enabled {
            return Err(DiscountError::CodeDisabled);
        }
        if let Some(starts_at) = self.starts_at {
            if now < starts_at {
                return Err(DiscountError::NotYetActive);
            }
        }
        if let Some(expires_at) = self.expires_at {
            if now > expires_at {
                return Err(DiscountError::Expired);
            }
        }
        if let Some(limit) = self.usage_limit {
            if self.usage_count >= limit {
                return Err(DiscountError::UsageLimitReached);
            }
        }
        if let Some(minimum) = self.min_order_value {
            if subtotal < minimum {
                return Err(DiscountError::BelowMinimum { minimum });
            }
        }
        Ok(())
    }

    /// Discount amount in cents against the given subtotal. Never negative.
    ///
    /// `FreeShipping` contributes nothing to the subtotal discount; the
    /// attached code itself is the signal checkout uses to waive shipping.
    pub fn amount(&self, subtotal: i64) -> i64 {
        match self.kind {
            DiscountType::Percentage => {
                // Round half-up in integer arithmetic, saturating rather than
                // overflowing on extreme subtotals.
                let raw = subtotal.saturating_mul(self.value).saturating_add(50) / 100;
                match self.max_discount {
                    Some(cap) => raw.min(cap),
                    None => raw,
                }
            }
            DiscountType::Fixed => self.value.min(subtotal),
            DiscountType::FreeShipping => 0,
        }
    }

    /// Validate and, if eligible, compute the discount amount.
    pub fn evaluate(&self, subtotal: i64, now: DateTime<Utc>) -> Result<i64, DiscountError> {
        self.validate(subtotal, now)?;
        Ok(self.amount(subtotal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn percent_off(value: i64) -> DiscountCode {
        DiscountCode {
            id: Uuid::new_v4(),
            code: "SAVE".into(),
            kind: DiscountType::Percentage,
            value,
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
    fn percentage_rounds_half_up() {
        let code = percent_off(10);
        assert_eq!(code.amount(3000), 300);
        assert_eq!(code.amount(2995), 300); // 299.5 rounds up
        assert_eq!(code.amount(2994), 299);
    }

    #[test]
    fn percentage_caps_at_max_discount() {
        let mut code = percent_off(50);
        code.max_discount = Some(1000);
        assert_eq!(code.amount(10_000), 1000);
        assert_eq!(code.amount(1000), 500);
    }

    #[test]
    fn percentage_saturates_on_extreme_subtotals() {
        let code = percent_off(100);
        // The multiply saturates, so the amount clamps instead of wrapping
        // negative.
        assert_eq!(code.amount(i64::MAX), i64::MAX / 100);
        assert!(code.amount(i64::MAX) > 0);
    }

    #[test]
    fn fixed_never_exceeds_subtotal() {
        let mut code = percent_off(0);
        code.kind = DiscountType::Fixed;
        code.value = 500;
        assert_eq!(code.amount(300), 300);
        assert_eq!(code.amount(800), 500);
    }

    #[test]
    fn free_shipping_discounts_nothing() {
        let mut code = percent_off(0);
        code.kind = DiscountType::FreeShipping;
        assert_eq!(code.amount(9999), 0);
    }

    #[test]
    fn disabled_wins_over_expired() {
        let mut code = percent_off(10);
        code.enabled = false;
        code.expires_at = Some(Utc::now() - Duration::days(1));
        assert_eq!(
            code.validate(1000, Utc::now()),
            Err(DiscountError::CodeDisabled)
        );
    }

    #[test]
    fn date_window_checks() {
        let now = Utc::now();
        let mut code = percent_off(10);
        code.starts_at = Some(now + Duration::hours(1));
        assert_eq!(code.validate(1000, now), Err(DiscountError::NotYetActive));

        code.starts_at = None;
        code.expires_at = Some(now - Duration::hours(1));
        assert_eq!(code.validate(1000, now), Err(DiscountError::Expired));
    }

    #[test]
    fn usage_limit_reached() {
        let mut code = percent_off(10);
        code.usage_limit = Some(5);
        code.usage_count = 5;
        assert_eq!(
            code.validate(1000, Utc::now()),
            Err(DiscountError::UsageLimitReached)
        );
    }

    #[test]
    fn below_minimum_is_checked_last() {
        let mut code = percent_off(10);
        code.min_order_value = Some(5000);
        code.usage_limit = Some(1);
        code.usage_count = 1;
        // Usage limit fires before the minimum check.
        assert_eq!(
            code.validate(3000, Utc::now()),
            Err(DiscountError::UsageLimitReached)
        );

        code.usage_count = 0;
        assert_eq!(
            code.validate(3000, Utc::now()),
            Err(DiscountError::BelowMinimum { minimum: 5000 })
        );
        assert_eq!(code.evaluate(5000, Utc::now()), Ok(500));
    }
}
