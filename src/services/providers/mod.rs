// Payment gateway clients, one per provider, behind a single trait so the
// capture sequence can dispatch on the provider enum.

pub mod mcb_juice;
pub mod paypal;
pub mod peach;
pub mod stripe;

pub use mcb_juice::McbJuiceGateway;
pub use paypal::PayPalGateway;
pub use peach::PeachGateway;
pub use stripe::StripeGateway;

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::models::{CardDetails, PaymentProvider};

/// Everything a gateway needs to attempt one charge. `amount` is in the
/// canonical settlement currency; `local_amount` carries the converted
/// figure for gateways that bill the customer in another currency.
#[derive(Clone, Debug)]
pub struct ChargeRequest {
    pub transaction_id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub local_amount: Option<Decimal>,
    pub local_currency: Option<String>,
    pub description: String,
    pub card: Option<CardDetails>,
    pub phone_number: Option<String>,
    /// Client-side approval reference, e.g. a PayPal order id.
    pub provider_reference: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ChargeOutcome {
    pub external_transaction_id: String,
    pub test_mode: bool,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    /// Attempts the charge. Declines map to `ServiceError::PaymentFailed`,
    /// transport problems to `ServiceError::ExternalServiceError`.
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, ServiceError>;
}

/// The four gateway clients, wired once at startup.
#[derive(Clone)]
pub struct Gateways {
    pub stripe: Arc<dyn PaymentGateway>,
    pub paypal: Arc<dyn PaymentGateway>,
    pub mcb_juice: Arc<dyn PaymentGateway>,
    pub peach: Arc<dyn PaymentGateway>,
}

impl Gateways {
    pub fn from_config(config: &AppConfig) -> Result<Self, ServiceError> {
        Ok(Self {
            stripe: Arc::new(StripeGateway::new(config)?),
            paypal: Arc::new(PayPalGateway::new(config)?),
            mcb_juice: Arc::new(McbJuiceGateway::new(config)?),
            peach: Arc::new(PeachGateway::new(config)?),
        })
    }
}

pub(crate) fn build_gateway_client(timeout_secs: u64) -> Result<reqwest::Client, ServiceError> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|err| ServiceError::InternalError(format!("Failed to build HTTP client: {}", err)))
}
