use std::sync::Arc;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use tracing::{instrument, warn};

use crate::backend::{ExchangeRateBackend, PaymentMethodBackend};
use crate::errors::ServiceError;
use crate::models::{CouponApplication, PaymentMethod, PaymentSelection};

/// Exchange-rate lookup with a configured fallback. The checkout flow keeps
/// working on a stale-but-plausible rate when the live lookup is down.
#[derive(Clone)]
pub(crate) struct ExchangeRates {
    backend: Arc<dyn ExchangeRateBackend>,
    fallback: Decimal,
}

impl ExchangeRates {
    pub(crate) fn new(backend: Arc<dyn ExchangeRateBackend>, fallback: Decimal) -> Self {
        Self { backend, fallback }
    }

    /// Current MUR-per-USD rate, or the fallback when the lookup fails or
    /// answers with garbage.
    pub(crate) async fn usd_to_mur(&self) -> Decimal {
        match self.backend.usd_to_mur_rate().await {
            Ok(rate) if rate > Decimal::ZERO => rate,
            Ok(rate) => {
                warn!(%rate, "Exchange rate lookup returned a non-positive rate; using fallback");
                self.fallback
            }
            Err(err) => {
                warn!(error = %err, "Exchange rate lookup failed; using fallback");
                self.fallback
            }
        }
    }
}

/// Converts between the two currencies this deployment deals in. Unknown
/// pairs pass through unchanged with a warning rather than failing checkout.
pub(crate) fn convert_currency(amount: Decimal, from: &str, to: &str, rate: Decimal) -> Decimal {
    if from.eq_ignore_ascii_case(to) {
        return amount;
    }
    match (
        from.to_ascii_uppercase().as_str(),
        to.to_ascii_uppercase().as_str(),
    ) {
        ("USD", "MUR") => {
            (amount * rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        }
        ("MUR", "USD") => {
            (amount / rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        }
        _ => {
            warn!(%from, %to, "No conversion path between currencies; amount left unconverted");
            amount
        }
    }
}

/// A payment method together with the price to show next to it, in the
/// method's own settlement currency.
#[derive(Clone, Debug, Serialize)]
pub struct MethodQuote {
    #[serde(flatten)]
    pub method: PaymentMethod,
    pub display_amount: Decimal,
    pub display_currency: String,
}

/// Lists the active payment methods and prices each one for display.
pub struct PaymentMethodService {
    backend: Arc<dyn PaymentMethodBackend>,
    rates: ExchangeRates,
}

impl PaymentMethodService {
    pub fn new(
        backend: Arc<dyn PaymentMethodBackend>,
        rates: Arc<dyn ExchangeRateBackend>,
        fallback_rate: Decimal,
    ) -> Self {
        Self {
            backend,
            rates: ExchangeRates::new(rates, fallback_rate),
        }
    }

    /// Active methods only. The backend already filters, but a method that
    /// slips through inactive must never be offered.
    #[instrument(skip(self))]
    pub async fn list_active(&self) -> Result<Vec<PaymentMethod>, ServiceError> {
        let mut methods = self.backend.list_active_payment_methods().await?;
        methods.retain(|method| method.is_active);
        Ok(methods)
    }

    /// Active methods, each quoted at the price the customer would pay with
    /// it: the coupon's final amount when one is applied, converted into the
    /// method's settlement currency when that differs from the plan's.
    #[instrument(skip(self, selection, coupon))]
    pub async fn display_prices(
        &self,
        selection: &PaymentSelection,
        coupon: Option<&CouponApplication>,
    ) -> Result<Vec<MethodQuote>, ServiceError> {
        let methods = self.list_active().await?;
        let base_amount = coupon
            .map(|coupon| coupon.final_amount)
            .unwrap_or(selection.amount);

        let needs_rate = methods
            .iter()
            .any(|method| !method.currency.eq_ignore_ascii_case(&selection.currency));
        let rate = if needs_rate {
            Some(self.rates.usd_to_mur().await)
        } else {
            None
        };

        let quotes = methods
            .into_iter()
            .map(|method| {
                let display_amount = match rate {
                    Some(rate) if !method.currency.eq_ignore_ascii_case(&selection.currency) => {
                        convert_currency(base_amount, &selection.currency, &method.currency, rate)
                    }
                    _ => base_amount,
                };
                MethodQuote {
                    display_currency: method.currency.clone(),
                    display_amount,
                    method,
                }
            })
            .collect();

        Ok(quotes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockExchangeRateBackend, MockPaymentMethodBackend};
    use crate::models::{BillingCycle, PaymentProvider};
    use rust_decimal_macros::dec;

    fn method(provider: PaymentProvider, currency: &str, active: bool) -> PaymentMethod {
        PaymentMethod {
            id: format!("pm-{}", provider),
            name: provider,
            display_name: provider.to_string(),
            currency: currency.to_string(),
            requires_manual_approval: false,
            is_active: active,
        }
    }

    fn selection() -> PaymentSelection {
        PaymentSelection {
            tier_id: "tier-premium".into(),
            tier_name: "Premium".into(),
            amount: dec!(10.00),
            currency: "USD".into(),
            billing_cycle: BillingCycle::Monthly,
            grade_id: None,
            subject_ids: None,
        }
    }

    fn service(
        methods: MockPaymentMethodBackend,
        rates: MockExchangeRateBackend,
    ) -> PaymentMethodService {
        PaymentMethodService::new(Arc::new(methods), Arc::new(rates), dec!(45.5))
    }

    #[tokio::test]
    async fn inactive_methods_are_filtered_out() {
        let mut methods = MockPaymentMethodBackend::new();
        methods.expect_list_active_payment_methods().returning(|| {
            Ok(vec![
                method(PaymentProvider::Stripe, "USD", true),
                method(PaymentProvider::Paypal, "USD", false),
            ])
        });
        let service = service(methods, MockExchangeRateBackend::new());

        let active = service.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, PaymentProvider::Stripe);
    }

    #[tokio::test]
    async fn mur_method_displays_converted_amount() {
        let mut methods = MockPaymentMethodBackend::new();
        methods.expect_list_active_payment_methods().returning(|| {
            Ok(vec![
                method(PaymentProvider::Stripe, "USD", true),
                method(PaymentProvider::McbJuice, "MUR", true),
            ])
        });
        let mut rates = MockExchangeRateBackend::new();
        rates
            .expect_usd_to_mur_rate()
            .times(1)
            .returning(|| Ok(dec!(45.5)));
        let service = service(methods, rates);

        let coupon = CouponApplication::compute("SAVE20", dec!(20), dec!(10.00));
        let quotes = service
            .display_prices(&selection(), Some(&coupon))
            .await
            .unwrap();

        let stripe = quotes
            .iter()
            .find(|q| q.method.name == PaymentProvider::Stripe)
            .unwrap();
        assert_eq!(stripe.display_amount, dec!(8.00));
        assert_eq!(stripe.display_currency, "USD");

        let juice = quotes
            .iter()
            .find(|q| q.method.name == PaymentProvider::McbJuice)
            .unwrap();
        assert_eq!(juice.display_amount, dec!(364.00));
        assert_eq!(juice.display_currency, "MUR");
    }

    #[tokio::test]
    async fn rate_failure_falls_back_to_configured_rate() {
        let mut methods = MockPaymentMethodBackend::new();
        methods
            .expect_list_active_payment_methods()
            .returning(|| Ok(vec![method(PaymentProvider::McbJuice, "MUR", true)]));
        let mut rates = MockExchangeRateBackend::new();
        rates.expect_usd_to_mur_rate().returning(|| {
            Err(ServiceError::ExternalServiceError(
                "rate lookup failed with status 503".into(),
            ))
        });
        let service = service(methods, rates);

        let quotes = service.display_prices(&selection(), None).await.unwrap();
        assert_eq!(quotes[0].display_amount, dec!(455.00));
    }

    #[tokio::test]
    async fn same_currency_methods_skip_the_rate_lookup() {
        let mut methods = MockPaymentMethodBackend::new();
        methods
            .expect_list_active_payment_methods()
            .returning(|| Ok(vec![method(PaymentProvider::Stripe, "USD", true)]));
        let mut rates = MockExchangeRateBackend::new();
        rates.expect_usd_to_mur_rate().times(0);
        let service = service(methods, rates);

        let quotes = service.display_prices(&selection(), None).await.unwrap();
        assert_eq!(quotes[0].display_amount, dec!(10.00));
    }

    #[test]
    fn unknown_currency_pair_passes_through() {
        assert_eq!(
            convert_currency(dec!(10.00), "USD", "EUR", dec!(45.5)),
            dec!(10.00)
        );
        assert_eq!(
            convert_currency(dec!(364.00), "MUR", "USD", dec!(45.5)),
            dec!(8.00)
        );
    }
}
