use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::tier::BillingCycle;

/// Enum representing the possible statuses of a payment transaction.
///
/// A transaction is created `pending` strictly before any charge attempt and
/// moves to exactly one of `completed` or `failed`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

/// Bookkeeping persisted alongside a transaction row.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    /// Display name of the tier at purchase time.
    pub tier_name: String,
    /// Pre-discount amount in the settlement currency.
    pub original_amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_percentage: Option<Decimal>,
    /// Discount granted, in the settlement currency like `original_amount`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_discount: Option<Decimal>,
    /// Marks charges made against provider sandboxes.
    #[serde(default)]
    pub test_mode: bool,
}

/// Payload for creating a transaction row. The backend assigns the id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewTransaction {
    pub user_id: String,
    pub tier_id: String,
    pub payment_method_id: String,
    /// Settlement amount; always USD (see `currency`).
    pub amount: Decimal,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    pub status: TransactionStatus,
    pub metadata: TransactionMetadata,
}

/// A server-persisted payment transaction row.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: String,
    pub user_id: String,
    pub tier_id: String,
    pub payment_method_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    pub status: TransactionStatus,
    /// Provider-side transaction/charge reference, set on completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_transaction_id: Option<String>,
    pub metadata: TransactionMetadata,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Fields applied when a transaction settles or fails.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionUpdate {
    pub status: TransactionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TransactionMetadata>,
}
