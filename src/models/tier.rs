use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Enum representing the billing cycle variants a tier can be purchased under.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BillingCycle {
    Monthly,
    Yearly,
}

/// The tier being purchased. Captured when a checkout session is created and
/// immutable for the duration of that attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
pub struct PaymentSelection {
    /// Identifier of the subscription tier.
    #[validate(length(min = 1))]
    pub tier_id: String,

    /// Display name of the tier.
    #[validate(length(min = 1))]
    pub tier_name: String,

    /// Native-currency price of the tier for the chosen billing cycle.
    #[validate(custom = "validate_amount")]
    pub amount: Decimal,

    /// ISO currency code the tier is priced in.
    #[validate(length(equal = 3))]
    pub currency: String,

    /// Monthly or yearly pricing variant.
    pub billing_cycle: BillingCycle,

    /// Optional pre-selected grade.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grade_id: Option<String>,

    /// Optional list of selected subjects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_ids: Option<Vec<String>>,
}

fn validate_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.is_sign_negative() || amount.is_zero() {
        let mut err = ValidationError::new("amount");
        err.message = Some("amount must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn selection(amount: Decimal) -> PaymentSelection {
        PaymentSelection {
            tier_id: "premium".into(),
            tier_name: "Premium".into(),
            amount,
            currency: "USD".into(),
            billing_cycle: BillingCycle::Monthly,
            grade_id: None,
            subject_ids: None,
        }
    }

    #[test]
    fn billing_cycle_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&BillingCycle::Monthly).unwrap(),
            "\"monthly\""
        );
        assert_eq!(
            serde_json::to_string(&BillingCycle::Yearly).unwrap(),
            "\"yearly\""
        );
    }

    #[test]
    fn selection_rejects_non_positive_amount() {
        assert!(selection(dec!(10.00)).validate().is_ok());
        assert!(selection(dec!(0)).validate().is_err());
        assert!(selection(dec!(-5)).validate().is_err());
    }
}
