use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// A successfully validated coupon held in checkout state.
///
/// Never mutated once applied. A re-validation replaces the whole value, and
/// removal discards it; there is no partial update path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CouponApplication {
    /// Coupon code, normalized to upper case.
    pub code: String,
    /// Percentage granted by the coupon.
    pub discount_percentage: Decimal,
    /// Derived: `round(original * pct / 100, 2)`.
    pub discount_amount: Decimal,
    /// Derived: `max(0, original - discount_amount)`.
    pub final_amount: Decimal,
}

impl CouponApplication {
    /// Computes the discount breakdown for one original amount.
    ///
    /// The discount is rounded to two decimals before the final amount is
    /// derived. Later steps recompute from the original amount rather than
    /// chaining prior roundings, so no rounding error accumulates.
    pub fn compute(code: &str, discount_percentage: Decimal, original_amount: Decimal) -> Self {
        let discount_amount = (original_amount * discount_percentage / Decimal::from(100))
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        let final_amount = (original_amount - discount_amount).max(Decimal::ZERO);
        Self {
            code: code.trim().to_uppercase(),
            discount_percentage,
            discount_amount,
            final_amount,
        }
    }
}
