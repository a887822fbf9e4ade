use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::backend::{ExchangeRateBackend, ReceiptBackend, TransactionBackend};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{
    CheckoutSession, NewTransaction, PaymentProvider, PaymentTransaction, TransactionMetadata,
    TransactionStatus, TransactionUpdate,
};
use crate::services::coupons::CouponService;
use crate::services::payment_methods::{convert_currency, ExchangeRates};
use crate::services::providers::{ChargeRequest, Gateways, PaymentGateway};

const SETTLEMENT_CURRENCY: &str = "USD";
const MUR_CURRENCY: &str = "MUR";

/// Client-supplied payment details for one capture attempt.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CaptureRequest {
    pub card: Option<crate::models::CardDetails>,
    pub phone_number: Option<String>,
    /// Client-side approval reference, e.g. a PayPal order id.
    pub provider_reference: Option<String>,
}

#[derive(Clone, Debug)]
pub struct CaptureOutcome {
    pub transaction: PaymentTransaction,
    pub test_mode: bool,
}

/// Runs the capture sequence every provider shares: create a pending
/// transaction, charge through the provider's gateway, mark it completed,
/// then fire the post-payment effects. A charge failure deletes the pending
/// row so no half-finished transaction is left behind.
pub struct PaymentService {
    transactions: Arc<dyn TransactionBackend>,
    receipts: Arc<dyn ReceiptBackend>,
    coupons: Arc<CouponService>,
    rates: ExchangeRates,
    gateways: Gateways,
    event_sender: Arc<EventSender>,
    test_mode: bool,
    in_flight: DashMap<Uuid, Instant>,
}

impl PaymentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transactions: Arc<dyn TransactionBackend>,
        receipts: Arc<dyn ReceiptBackend>,
        rates: Arc<dyn ExchangeRateBackend>,
        coupons: Arc<CouponService>,
        gateways: Gateways,
        event_sender: Arc<EventSender>,
        fallback_rate: Decimal,
        test_mode: bool,
    ) -> Self {
        Self {
            transactions,
            receipts,
            coupons,
            rates: ExchangeRates::new(rates, fallback_rate),
            gateways,
            event_sender,
            test_mode,
            in_flight: DashMap::new(),
        }
    }

    /// Captures payment for a session that already selected a method.
    ///
    /// Sequence: settlement conversion, pending insert, gateway charge,
    /// completed update, coupon consumption, receipt dispatch. Consumption
    /// and receipt failures never roll the payment back; charge and update
    /// failures compensate by deleting the pending row.
    #[instrument(skip(self, session, request), fields(session_id = %session.id))]
    pub async fn capture(
        &self,
        session: &CheckoutSession,
        request: &CaptureRequest,
    ) -> Result<CaptureOutcome, ServiceError> {
        let method = session.selected_method.as_ref().ok_or_else(|| {
            ServiceError::InvalidOperation(
                "No payment method selected for this session".to_string(),
            )
        })?;
        let provider = method.name;

        self.validate_payment_details(provider, request)?;
        let _guard = self.begin_capture(session.id)?;

        // Everything persists in the settlement currency, whatever the plan
        // was priced in.
        let selection = &session.selection;
        let needs_rate = !selection.currency.eq_ignore_ascii_case(SETTLEMENT_CURRENCY)
            || provider == PaymentProvider::McbJuice;
        let rate = if needs_rate {
            self.rates.usd_to_mur().await
        } else {
            Decimal::ONE
        };
        let original_settlement = convert_currency(
            selection.amount,
            &selection.currency,
            SETTLEMENT_CURRENCY,
            rate,
        );
        let final_settlement = convert_currency(
            session.final_amount(),
            &selection.currency,
            SETTLEMENT_CURRENCY,
            rate,
        );

        let metadata = TransactionMetadata {
            tier_name: selection.tier_name.clone(),
            original_amount: original_settlement,
            coupon_code: session.coupon.as_ref().map(|c| c.code.clone()),
            coupon_percentage: session.coupon.as_ref().map(|c| c.discount_percentage),
            // All metadata amounts share the settlement currency, so the
            // discount is the settlement delta, not the native-currency figure.
            coupon_discount: session
                .coupon
                .as_ref()
                .map(|_| original_settlement - final_settlement),
            test_mode: self.test_mode,
        };
        let new_transaction = NewTransaction {
            user_id: session.user_id.clone(),
            tier_id: selection.tier_id.clone(),
            payment_method_id: method.id.clone(),
            amount: final_settlement,
            currency: SETTLEMENT_CURRENCY.to_string(),
            billing_cycle: selection.billing_cycle,
            status: TransactionStatus::Pending,
            metadata: metadata.clone(),
        };

        // The pending row exists strictly before any charge attempt.
        let pending = self.transactions.insert_transaction(&new_transaction).await?;
        info!(transaction_id = %pending.id, provider = %provider, "Created pending transaction");
        self.event_sender
            .send_or_log(Event::PaymentPending {
                session_id: session.id,
                transaction_id: pending.id.clone(),
                provider: provider.to_string(),
                amount: final_settlement,
            })
            .await;

        let (local_amount, local_currency) = if provider == PaymentProvider::McbJuice {
            (
                Some(convert_currency(
                    final_settlement,
                    SETTLEMENT_CURRENCY,
                    MUR_CURRENCY,
                    rate,
                )),
                Some(MUR_CURRENCY.to_string()),
            )
        } else {
            (None, None)
        };
        let charge_request = ChargeRequest {
            transaction_id: pending.id.clone(),
            user_id: session.user_id.clone(),
            amount: final_settlement,
            currency: SETTLEMENT_CURRENCY.to_string(),
            local_amount,
            local_currency,
            description: format!(
                "{} plan ({})",
                selection.tier_name, selection.billing_cycle
            ),
            card: request.card.clone(),
            phone_number: request.phone_number.clone(),
            provider_reference: request.provider_reference.clone(),
        };

        let outcome = match self.gateway(provider).charge(&charge_request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    transaction_id = %pending.id,
                    provider = %provider,
                    error = %err,
                    "Charge failed; compensating pending transaction"
                );
                self.compensate(session.id, &pending.id).await;
                self.event_sender
                    .send_or_log(Event::PaymentFailed {
                        session_id: session.id,
                        provider: provider.to_string(),
                        reason: err.to_string(),
                    })
                    .await;
                return Err(err);
            }
        };

        let update = TransactionUpdate {
            status: TransactionStatus::Completed,
            external_transaction_id: Some(outcome.external_transaction_id.clone()),
            metadata: Some(TransactionMetadata {
                test_mode: outcome.test_mode,
                ..metadata
            }),
        };
        let completed = match self.transactions.update_transaction(&pending.id, &update).await {
            Ok(completed) => completed,
            Err(err) => {
                // The charge went through but the row still says pending.
                error!(
                    transaction_id = %pending.id,
                    external_id = %outcome.external_transaction_id,
                    error = %err,
                    "Failed to mark transaction completed; compensating"
                );
                self.compensate(session.id, &pending.id).await;
                self.event_sender
                    .send_or_log(Event::PaymentFailed {
                        session_id: session.id,
                        provider: provider.to_string(),
                        reason: err.to_string(),
                    })
                    .await;
                return Err(err);
            }
        };

        if let Some(coupon) = &session.coupon {
            self.coupons
                .consume_after_capture(
                    session.id,
                    &coupon.code,
                    &completed.id,
                    original_settlement,
                    SETTLEMENT_CURRENCY,
                )
                .await;
        }

        self.dispatch_receipt(completed.id.clone());

        self.event_sender
            .send_or_log(Event::PaymentCompleted {
                session_id: session.id,
                transaction_id: completed.id.clone(),
                provider: provider.to_string(),
                amount: final_settlement,
            })
            .await;
        info!(
            transaction_id = %completed.id,
            provider = %provider,
            amount = %final_settlement,
            "Payment captured"
        );

        Ok(CaptureOutcome {
            transaction: completed,
            test_mode: outcome.test_mode,
        })
    }

    /// Pre-network sanity checks on the client-supplied payment details.
    fn validate_payment_details(
        &self,
        provider: PaymentProvider,
        request: &CaptureRequest,
    ) -> Result<(), ServiceError> {
        if provider.requires_card() {
            let card = request.card.as_ref().ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "Card details are required for {} payments",
                    provider
                ))
            })?;
            card.validate()
                .map_err(|err| ServiceError::ValidationError(err.to_string()))?;
        }
        if provider == PaymentProvider::McbJuice
            && request
                .phone_number
                .as_deref()
                .map(str::trim)
                .filter(|phone| !phone.is_empty())
                .is_none()
        {
            return Err(ServiceError::ValidationError(
                "A phone number is required for MCB Juice payments".to_string(),
            ));
        }
        Ok(())
    }

    fn gateway(&self, provider: PaymentProvider) -> &dyn PaymentGateway {
        match provider {
            PaymentProvider::Stripe => self.gateways.stripe.as_ref(),
            PaymentProvider::Paypal => self.gateways.paypal.as_ref(),
            PaymentProvider::McbJuice => self.gateways.mcb_juice.as_ref(),
            PaymentProvider::Peach => self.gateways.peach.as_ref(),
        }
    }

    /// Marks a capture in flight for the session, rejecting a second
    /// concurrent attempt. The returned guard clears the slot on drop.
    fn begin_capture(&self, session_id: Uuid) -> Result<InFlightGuard<'_>, ServiceError> {
        match self.in_flight.entry(session_id) {
            Entry::Occupied(_) => Err(ServiceError::Conflict(
                "A payment for this session is already being processed".to_string(),
            )),
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                Ok(InFlightGuard {
                    captures: &self.in_flight,
                    session_id,
                })
            }
        }
    }

    /// Best-effort removal of the pending row after a failed charge. A
    /// failure here leaves an orphaned row for reconciliation and is never
    /// surfaced to the caller.
    async fn compensate(&self, session_id: Uuid, transaction_id: &str) {
        match self.transactions.delete_transaction(transaction_id).await {
            Ok(()) => {
                info!(
                    transaction_id = %transaction_id,
                    "Deleted pending transaction after failed charge"
                );
                self.event_sender
                    .send_or_log(Event::PaymentCompensated {
                        session_id,
                        transaction_id: transaction_id.to_string(),
                    })
                    .await;
            }
            Err(err) => {
                error!(
                    transaction_id = %transaction_id,
                    error = %err,
                    "Compensating delete failed; pending row left behind"
                );
                self.event_sender
                    .send_or_log(Event::CompensationFailed {
                        session_id,
                        transaction_id: transaction_id.to_string(),
                        reason: err.to_string(),
                    })
                    .await;
            }
        }
    }

    /// Receipt dispatch is fire-and-forget: spawned, never awaited by the
    /// capture path, failures logged and evented.
    fn dispatch_receipt(&self, transaction_id: String) {
        let receipts = Arc::clone(&self.receipts);
        let events = Arc::clone(&self.event_sender);
        tokio::spawn(async move {
            events
                .send_or_log(Event::ReceiptRequested {
                    transaction_id: transaction_id.clone(),
                })
                .await;
            if let Err(err) = receipts.send_receipt(&transaction_id).await {
                warn!(
                    transaction_id = %transaction_id,
                    error = %err,
                    "Receipt dispatch failed"
                );
                events
                    .send_or_log(Event::ReceiptFailed {
                        transaction_id,
                        reason: err.to_string(),
                    })
                    .await;
            }
        });
    }
}

struct InFlightGuard<'a> {
    captures: &'a DashMap<Uuid, Instant>,
    session_id: Uuid,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.captures.remove(&self.session_id);
    }
}
