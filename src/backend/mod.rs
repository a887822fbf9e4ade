// Contracts for the platform REST backend the checkout and tour flows
// depend on. The backend owns the schemas; these traits pin down only the
// behavior this service relies on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;
use crate::models::{
    BillingCycle, HintProgress, NewTransaction, PaymentMethod, PaymentTransaction,
    TransactionUpdate,
};

pub mod http;

pub use http::HttpBackend;

/// One result row from coupon validation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CouponValidation {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_percentage: Option<Decimal>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CouponBackend: Send + Sync {
    /// Validates a coupon for a (code, tier, billing cycle) triple. The
    /// backend answers with an array holding one result.
    async fn validate_coupon(
        &self,
        code: &str,
        tier_id: &str,
        billing_cycle: BillingCycle,
    ) -> Result<Vec<CouponValidation>, ServiceError>;

    /// Marks a coupon consumed against a completed transaction. Failure here
    /// must never roll back the payment.
    async fn consume_coupon(
        &self,
        code: &str,
        payment_transaction_id: &str,
        original_amount: Decimal,
        currency: &str,
    ) -> Result<(), ServiceError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentMethodBackend: Send + Sync {
    /// Returns the payment methods with `is_active = true`.
    async fn list_active_payment_methods(&self) -> Result<Vec<PaymentMethod>, ServiceError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransactionBackend: Send + Sync {
    /// Inserts a transaction row and returns it with the assigned id.
    async fn insert_transaction(
        &self,
        new: &NewTransaction,
    ) -> Result<PaymentTransaction, ServiceError>;

    /// Applies a status/external-id/metadata update to an existing row.
    async fn update_transaction(
        &self,
        id: &str,
        update: &TransactionUpdate,
    ) -> Result<PaymentTransaction, ServiceError>;

    /// Deletes a row. Used as the compensating action when a charge fails
    /// after the pending row was created.
    async fn delete_transaction(&self, id: &str) -> Result<(), ServiceError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReceiptBackend: Send + Sync {
    /// Requests a receipt email for a completed transaction. The collaborator
    /// retries internally; callers treat this as fire-and-forget.
    async fn send_receipt(&self, transaction_id: &str) -> Result<(), ServiceError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeRateBackend: Send + Sync {
    /// Current MUR-per-USD rate.
    async fn usd_to_mur_rate(&self) -> Result<Decimal, ServiceError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TourBackend: Send + Sync {
    /// Reads the per-user completion flag for a view's tour. Users without a
    /// record get the default (not completed).
    async fn fetch_hint_progress(
        &self,
        user_id: &str,
        view: &str,
    ) -> Result<HintProgress, ServiceError>;

    /// Persists the per-user completion flag for a view's tour.
    async fn save_hint_progress(
        &self,
        user_id: &str,
        view: &str,
        progress: &HintProgress,
    ) -> Result<(), ServiceError>;

    /// When the user's account was created; gates the tour freshness window.
    async fn account_created_at(&self, user_id: &str) -> Result<DateTime<Utc>, ServiceError>;
}
