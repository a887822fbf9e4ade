use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::coupon::CouponApplication;
use crate::models::payment_method::{PaymentMethod, PaymentProvider};
use crate::models::tier::PaymentSelection;

/// Where the checkout flow currently is. A provider step is only ever
/// entered together with a stored payment method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "provider", rename_all = "snake_case")]
pub enum CheckoutStep {
    SelectMethod,
    Provider(PaymentProvider),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutStatus {
    Open,
    Completed,
    Expired,
}

/// Server-side state of one checkout flow. Serialized into the cache and
/// mutated only under the per-session lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: Uuid,
    pub user_id: String,
    pub selection: PaymentSelection,
    pub step: CheckoutStep,
    pub selected_method: Option<PaymentMethod>,
    pub coupon: Option<CouponApplication>,
    pub status: CheckoutStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CheckoutSession {
    pub fn is_open(&self) -> bool {
        self.status == CheckoutStatus::Open
    }

    /// Price before any coupon
    pub fn original_amount(&self) -> Decimal {
        self.selection.amount
    }

    pub fn discount_amount(&self) -> Decimal {
        self.coupon
            .as_ref()
            .map(|coupon| coupon.discount_amount)
            .unwrap_or(Decimal::ZERO)
    }

    /// Price the customer actually pays, in the selection currency
    pub fn final_amount(&self) -> Decimal {
        self.coupon
            .as_ref()
            .map(|coupon| coupon.final_amount)
            .unwrap_or(self.selection.amount)
    }

    pub fn selected_provider(&self) -> Option<PaymentProvider> {
        match self.step {
            CheckoutStep::Provider(provider) => Some(provider),
            CheckoutStep::SelectMethod => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tier::BillingCycle;
    use rust_decimal_macros::dec;

    fn session_with_coupon(coupon: Option<CouponApplication>) -> CheckoutSession {
        let now = Utc::now();
        CheckoutSession {
            id: Uuid::new_v4(),
            user_id: "user-1".into(),
            selection: PaymentSelection {
                tier_id: "tier-premium".into(),
                tier_name: "Premium".into(),
                amount: dec!(10.00),
                currency: "USD".into(),
                billing_cycle: BillingCycle::Monthly,
                grade_id: None,
                subject_ids: None,
            },
            step: CheckoutStep::SelectMethod,
            selected_method: None,
            coupon,
            status: CheckoutStatus::Open,
            created_at: now,
            updated_at: now,
            expires_at: now + chrono::Duration::minutes(30),
        }
    }

    #[test]
    fn final_amount_without_coupon_is_original() {
        let session = session_with_coupon(None);
        assert_eq!(session.final_amount(), dec!(10.00));
        assert_eq!(session.discount_amount(), Decimal::ZERO);
    }

    #[test]
    fn final_amount_with_coupon_uses_breakdown() {
        let coupon = CouponApplication::compute("SAVE20", dec!(20), dec!(10.00));
        let session = session_with_coupon(Some(coupon));
        assert_eq!(session.discount_amount(), dec!(2.00));
        assert_eq!(session.final_amount(), dec!(8.00));
    }

    #[test]
    fn step_serialization_is_tagged() {
        let step = CheckoutStep::Provider(PaymentProvider::Stripe);
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["kind"], "provider");
        assert_eq!(json["provider"], "stripe");

        let select: CheckoutStep = serde_json::from_value(
            serde_json::json!({ "kind": "select_method" }),
        )
        .unwrap();
        assert_eq!(select, CheckoutStep::SelectMethod);
    }
}
