use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Enum representing the payment providers the checkout flow can dispatch to.
///
/// New providers must be added here so every dispatch site is forced through
/// an exhaustive match.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentProvider {
    Stripe,
    Paypal,
    McbJuice,
    Peach,
}

impl PaymentProvider {
    /// Card providers collect card fields before charging.
    pub fn requires_card(&self) -> bool {
        matches!(self, PaymentProvider::Stripe | PaymentProvider::Peach)
    }

    /// Currency shown to the user for this provider. Mobile money displays
    /// rupees; the settlement amount persisted with the transaction stays USD.
    pub fn display_currency(&self) -> &'static str {
        match self {
            PaymentProvider::McbJuice => "MUR",
            PaymentProvider::Stripe | PaymentProvider::Paypal | PaymentProvider::Peach => "USD",
        }
    }
}

/// A payment method as configured in the back office. Read-only to checkout;
/// the fetch is already filtered to active methods.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: String,
    pub name: PaymentProvider,
    pub display_name: String,
    /// Currency this method settles in.
    pub currency: String,
    #[serde(default)]
    pub requires_manual_approval: bool,
    #[serde(default)]
    pub is_active: bool,
}

/// Card fields submitted to a card-form provider. Checked for shape before a
/// charge is attempted; this is a sanity check, not real card validation.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
pub struct CardDetails {
    #[validate(custom = "validate_card_number")]
    pub card_number: String,
    #[validate(custom = "validate_expiry")]
    pub expiry: String,
    #[validate(custom = "validate_cvv")]
    pub cvv: String,
}

fn validate_card_number(number: &str) -> Result<(), ValidationError> {
    let digits: String = number.chars().filter(|c| *c != ' ').collect();
    if digits.len() < 13 || digits.len() > 19 || !digits.chars().all(|c| c.is_ascii_digit()) {
        let mut err = ValidationError::new("card_number");
        err.message = Some("Card number must be 13-19 digits".into());
        return Err(err);
    }
    Ok(())
}

fn validate_expiry(expiry: &str) -> Result<(), ValidationError> {
    let well_formed = expiry.len() == 5
        && expiry.as_bytes()[2] == b'/'
        && expiry[..2].chars().all(|c| c.is_ascii_digit())
        && expiry[3..].chars().all(|c| c.is_ascii_digit())
        && matches!(expiry[..2].parse::<u8>(), Ok(1..=12));
    if !well_formed {
        let mut err = ValidationError::new("expiry");
        err.message = Some("Expiry must be in MM/YY format".into());
        return Err(err);
    }
    Ok(())
}

fn validate_cvv(cvv: &str) -> Result<(), ValidationError> {
    if !(3..=4).contains(&cvv.len()) || !cvv.chars().all(|c| c.is_ascii_digit()) {
        let mut err = ValidationError::new("cvv");
        err.message = Some("CVV must be 3 or 4 digits".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use test_case::test_case;

    use super::*;

    fn card(number: &str, expiry: &str, cvv: &str) -> CardDetails {
        CardDetails {
            card_number: number.into(),
            expiry: expiry.into(),
            cvv: cvv.into(),
        }
    }

    #[test]
    fn provider_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&PaymentProvider::McbJuice).unwrap(),
            "\"mcb_juice\""
        );
        assert_eq!(PaymentProvider::Stripe.to_string(), "stripe");
        assert_eq!(
            "paypal".parse::<PaymentProvider>().unwrap(),
            PaymentProvider::Paypal
        );
    }

    #[rstest]
    #[case(PaymentProvider::Stripe, "USD")]
    #[case(PaymentProvider::Paypal, "USD")]
    #[case(PaymentProvider::McbJuice, "MUR")]
    #[case(PaymentProvider::Peach, "USD")]
    fn display_currency_per_provider(#[case] provider: PaymentProvider, #[case] currency: &str) {
        assert_eq!(provider.display_currency(), currency);
    }

    #[test]
    fn card_number_accepts_spaced_digits() {
        assert!(card("4242 4242 4242 4242", "12/30", "123").validate().is_ok());
    }

    #[test]
    fn card_number_rejects_wrong_length_or_letters() {
        assert!(card("4242", "12/30", "123").validate().is_err());
        assert!(card("4242424242424242424242", "12/30", "123")
            .validate()
            .is_err());
        assert!(card("4242abcd42424242", "12/30", "123").validate().is_err());
    }

    #[test_case("01/27", true; "january")]
    #[test_case("12/27", true; "december")]
    #[test_case("13/27", false; "month too large")]
    #[test_case("00/27", false; "month zero")]
    #[test_case("1/27", false; "single digit month")]
    #[test_case("12-27", false; "wrong separator")]
    fn expiry_requires_mm_slash_yy(expiry: &str, ok: bool) {
        assert_eq!(
            card("4242424242424242", expiry, "123").validate().is_ok(),
            ok
        );
    }

    #[test]
    fn cvv_must_be_three_or_four_digits() {
        assert!(card("4242424242424242", "12/30", "123").validate().is_ok());
        assert!(card("4242424242424242", "12/30", "1234").validate().is_ok());
        assert!(card("4242424242424242", "12/30", "12").validate().is_err());
        assert!(card("4242424242424242", "12/30", "12a").validate().is_err());
    }
}
