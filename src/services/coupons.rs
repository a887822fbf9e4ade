use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::backend::CouponBackend;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{CouponApplication, PaymentSelection};

const EMPTY_CODE_MESSAGE: &str = "Please enter a coupon code";
const VALIDATION_FAILED_MESSAGE: &str = "Failed to validate coupon code";
const INVALID_CODE_MESSAGE: &str = "Invalid coupon code";

/// Validates coupon codes against the platform backend and turns them into
/// price breakdowns. Consumption is deferred until a payment has captured.
pub struct CouponService {
    backend: Arc<dyn CouponBackend>,
    event_sender: Arc<EventSender>,
}

impl CouponService {
    pub fn new(backend: Arc<dyn CouponBackend>, event_sender: Arc<EventSender>) -> Self {
        Self {
            backend,
            event_sender,
        }
    }

    /// Validates a code for the given plan selection and computes the
    /// discount breakdown. Read-only: the coupon is not consumed here.
    ///
    /// An empty or whitespace-only code is rejected locally without any
    /// backend call.
    #[instrument(skip(self, selection))]
    pub async fn validate(
        &self,
        code: &str,
        selection: &PaymentSelection,
    ) -> Result<CouponApplication, ServiceError> {
        let trimmed = code.trim();
        if trimmed.is_empty() {
            return Err(ServiceError::InvalidInput(EMPTY_CODE_MESSAGE.to_string()));
        }
        let normalized = trimmed.to_uppercase();

        let results = match self
            .backend
            .validate_coupon(&normalized, &selection.tier_id, selection.billing_cycle)
            .await
        {
            Ok(results) => results,
            Err(err) => {
                warn!(code = %normalized, error = %err, "Coupon validation call failed");
                return Err(ServiceError::ExternalServiceError(
                    VALIDATION_FAILED_MESSAGE.to_string(),
                ));
            }
        };

        // The backend answers with an array holding a single verdict.
        let verdict = match results.into_iter().next() {
            Some(verdict) => verdict,
            None => {
                warn!(code = %normalized, "Coupon validation returned an empty result set");
                return Err(ServiceError::ValidationError(
                    INVALID_CODE_MESSAGE.to_string(),
                ));
            }
        };

        if !verdict.is_valid {
            let message = verdict
                .error_message
                .filter(|message| !message.trim().is_empty())
                .unwrap_or_else(|| INVALID_CODE_MESSAGE.to_string());
            return Err(ServiceError::ValidationError(message));
        }

        let percentage = match verdict.discount_percentage {
            Some(percentage) => percentage,
            None => {
                warn!(code = %normalized, "Valid coupon came back without a discount percentage");
                return Err(ServiceError::ExternalServiceError(
                    VALIDATION_FAILED_MESSAGE.to_string(),
                ));
            }
        };

        let application = CouponApplication::compute(&normalized, percentage, selection.amount);
        info!(
            code = %application.code,
            discount = %application.discount_amount,
            final_amount = %application.final_amount,
            "Coupon validated"
        );
        Ok(application)
    }

    /// Marks a coupon as used after a successful capture. A failure here is
    /// logged and evented but never propagated: the payment already went
    /// through and must not be rolled back over coupon bookkeeping.
    #[instrument(skip(self))]
    pub async fn consume_after_capture(
        &self,
        session_id: Uuid,
        code: &str,
        payment_transaction_id: &str,
        original_amount: Decimal,
        currency: &str,
    ) {
        if let Err(err) = self
            .backend
            .consume_coupon(code, payment_transaction_id, original_amount, currency)
            .await
        {
            warn!(
                code = %code,
                transaction_id = %payment_transaction_id,
                error = %err,
                "Coupon consumption failed after capture; payment stands"
            );
            self.event_sender
                .send_or_log(Event::CouponConsumptionFailed {
                    session_id,
                    code: code.to_string(),
                    reason: err.to_string(),
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CouponValidation, MockCouponBackend};
    use crate::models::BillingCycle;
    use assert_matches::assert_matches;
    use mockall::predicate::eq;
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

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

    fn service(backend: MockCouponBackend) -> (CouponService, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(8);
        (
            CouponService::new(Arc::new(backend), Arc::new(EventSender::new(tx))),
            rx,
        )
    }

    #[tokio::test]
    async fn empty_code_is_rejected_without_backend_call() {
        let mut backend = MockCouponBackend::new();
        backend.expect_validate_coupon().times(0);
        let (service, _rx) = service(backend);

        let result = service.validate("   ", &selection()).await;
        assert_matches!(result, Err(ServiceError::InvalidInput(message)) => {
            assert_eq!(message, "Please enter a coupon code");
        });
    }

    #[tokio::test]
    async fn code_is_normalized_before_validation() {
        let mut backend = MockCouponBackend::new();
        backend
            .expect_validate_coupon()
            .with(
                eq("SAVE20"),
                eq("tier-premium"),
                eq(BillingCycle::Monthly),
            )
            .times(1)
            .returning(|_, _, _| {
                Ok(vec![CouponValidation {
                    is_valid: true,
                    error_message: None,
                    discount_percentage: Some(dec!(20)),
                }])
            });
        let (service, _rx) = service(backend);

        let application = service.validate("  save20 ", &selection()).await.unwrap();
        assert_eq!(application.code, "SAVE20");
        assert_eq!(application.discount_amount, dec!(2.00));
        assert_eq!(application.final_amount, dec!(8.00));
    }

    #[tokio::test]
    async fn backend_failure_maps_to_generic_message() {
        let mut backend = MockCouponBackend::new();
        backend.expect_validate_coupon().returning(|_, _, _| {
            Err(ServiceError::ExternalServiceError(
                "coupon validation failed with status 500".into(),
            ))
        });
        let (service, _rx) = service(backend);

        let result = service.validate("SAVE20", &selection()).await;
        assert_matches!(result, Err(ServiceError::ExternalServiceError(message)) => {
            assert_eq!(message, "Failed to validate coupon code");
        });
    }

    #[tokio::test]
    async fn invalid_coupon_surfaces_backend_message() {
        let mut backend = MockCouponBackend::new();
        backend.expect_validate_coupon().returning(|_, _, _| {
            Ok(vec![CouponValidation {
                is_valid: false,
                error_message: Some("This coupon has expired".into()),
                discount_percentage: None,
            }])
        });
        let (service, _rx) = service(backend);

        let result = service.validate("OLD10", &selection()).await;
        assert_matches!(result, Err(ServiceError::ValidationError(message)) => {
            assert_eq!(message, "This coupon has expired");
        });
    }

    #[tokio::test]
    async fn invalid_coupon_without_message_uses_fallback() {
        let mut backend = MockCouponBackend::new();
        backend.expect_validate_coupon().returning(|_, _, _| {
            Ok(vec![CouponValidation {
                is_valid: false,
                error_message: None,
                discount_percentage: None,
            }])
        });
        let (service, _rx) = service(backend);

        let result = service.validate("NOPE", &selection()).await;
        assert_matches!(result, Err(ServiceError::ValidationError(message)) => {
            assert_eq!(message, "Invalid coupon code");
        });
    }

    #[tokio::test]
    async fn valid_coupon_missing_percentage_is_a_backend_fault() {
        let mut backend = MockCouponBackend::new();
        backend.expect_validate_coupon().returning(|_, _, _| {
            Ok(vec![CouponValidation {
                is_valid: true,
                error_message: None,
                discount_percentage: None,
            }])
        });
        let (service, _rx) = service(backend);

        let result = service.validate("SAVE20", &selection()).await;
        assert_matches!(result, Err(ServiceError::ExternalServiceError(_)));
    }

    #[tokio::test]
    async fn consumption_failure_is_swallowed_and_evented() {
        let mut backend = MockCouponBackend::new();
        backend
            .expect_consume_coupon()
            .with(
                eq("SAVE20"),
                eq("txn-1"),
                eq(dec!(10.00)),
                eq("USD"),
            )
            .times(1)
            .returning(|_, _, _, _| {
                Err(ServiceError::ExternalServiceError(
                    "coupon consume failed with status 500".into(),
                ))
            });
        let (service, mut rx) = service(backend);

        let session_id = Uuid::new_v4();
        service
            .consume_after_capture(session_id, "SAVE20", "txn-1", dec!(10.00), "USD")
            .await;

        let event = rx.recv().await.unwrap();
        assert_matches!(event, Event::CouponConsumptionFailed { code, .. } => {
            assert_eq!(code, "SAVE20");
        });
    }

    #[tokio::test]
    async fn successful_consumption_emits_nothing() {
        let mut backend = MockCouponBackend::new();
        backend
            .expect_consume_coupon()
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        let (service, mut rx) = service(backend);

        service
            .consume_after_capture(Uuid::new_v4(), "SAVE20", "txn-1", dec!(10.00), "USD")
            .await;
        assert!(rx.try_recv().is_err());
    }
}
