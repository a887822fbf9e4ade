use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{build_gateway_client, ChargeOutcome, ChargeRequest, PaymentGateway};
use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::models::{CardDetails, PaymentProvider};

const STRIPE_API_BASE: &str = "https://api.stripe.com";
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

pub struct StripeGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: Option<String>,
    test_mode: bool,
}

impl StripeGateway {
    pub fn new(config: &AppConfig) -> Result<Self, ServiceError> {
        Ok(Self {
            client: build_gateway_client(REQUEST_TIMEOUT_SECS)?,
            base_url: STRIPE_API_BASE.to_string(),
            secret_key: config.stripe_secret_key.clone(),
            test_mode: config.payment_test_mode,
        })
    }

    /// Live-mode client pointed at a stub server.
    pub fn with_base_url(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            client: build_gateway_client(5)?,
            base_url: base_url.into(),
            secret_key: Some(secret_key.into()),
            test_mode: false,
        })
    }

    fn secret_key(&self) -> Result<&str, ServiceError> {
        self.secret_key.as_deref().ok_or_else(|| {
            ServiceError::InvalidOperation("Stripe secret key is not configured".to_string())
        })
    }

    /// Tokenizes the card. Test mode fabricates the token locally so no card
    /// data ever leaves the process.
    async fn create_card_token(&self, card: &CardDetails) -> Result<String, ServiceError> {
        if self.test_mode {
            return Ok(format!("tok_{}", Uuid::new_v4().simple()));
        }

        let (exp_month, exp_year) = split_expiry(&card.expiry)?;
        let response = self
            .client
            .post(format!("{}/v1/tokens", self.base_url))
            .basic_auth(self.secret_key()?, None::<&str>)
            .form(&[
                ("card[number]", card.card_number.replace(' ', "")),
                ("card[exp_month]", exp_month),
                ("card[exp_year]", format!("20{}", exp_year)),
                ("card[cvc]", card.cvv.clone()),
            ])
            .send()
            .await
            .map_err(|err| {
                ServiceError::ExternalServiceError(format!("Stripe request failed: {}", err))
            })?;

        if !response.status().is_success() {
            return Err(stripe_error("Card tokenization", response).await);
        }

        let token: TokenResponse = response.json().await.map_err(|err| {
            ServiceError::ExternalServiceError(format!("Invalid Stripe token response: {}", err))
        })?;
        Ok(token.id)
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    #[instrument(skip(self, request), fields(transaction_id = %request.transaction_id))]
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, ServiceError> {
        let card = request.card.as_ref().ok_or_else(|| {
            ServiceError::ValidationError("Card details are required for Stripe payments".into())
        })?;

        let token = self.create_card_token(card).await?;
        debug!(token = %token, "Created Stripe card token");

        if self.test_mode {
            // Test keys cannot confirm a real charge; complete immediately
            // with a synthetic payment-method id.
            let external_id = format!("pm_{}", Uuid::new_v4().simple());
            info!(external_id = %external_id, "Stripe test-mode charge completed");
            return Ok(ChargeOutcome {
                external_transaction_id: external_id,
                test_mode: true,
            });
        }

        let amount_cents = minor_units(request.amount)?;
        let response = self
            .client
            .post(format!("{}/v1/charges", self.base_url))
            .basic_auth(self.secret_key()?, None::<&str>)
            .form(&[
                ("amount", amount_cents.to_string()),
                ("currency", request.currency.to_lowercase()),
                ("source", token),
                ("description", request.description.clone()),
            ])
            .send()
            .await
            .map_err(|err| {
                ServiceError::ExternalServiceError(format!("Stripe request failed: {}", err))
            })?;

        if !response.status().is_success() {
            return Err(stripe_error("Charge", response).await);
        }

        let charge: ChargeResponse = response.json().await.map_err(|err| {
            ServiceError::ExternalServiceError(format!("Invalid Stripe charge response: {}", err))
        })?;
        info!(external_id = %charge.id, "Stripe charge completed");
        Ok(ChargeOutcome {
            external_transaction_id: charge.id,
            test_mode: false,
        })
    }
}

/// Splits an already-validated `MM/YY` expiry into its halves.
fn split_expiry(expiry: &str) -> Result<(String, String), ServiceError> {
    match expiry.split_once('/') {
        Some((month, year)) if !month.is_empty() && !year.is_empty() => {
            Ok((month.to_string(), year.to_string()))
        }
        _ => Err(ServiceError::ValidationError(
            "Expiry must be in MM/YY format".to_string(),
        )),
    }
}

fn minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::from(100))
        .round_dp(0)
        .to_i64()
        .ok_or_else(|| {
            ServiceError::InternalError(format!("Amount {} does not fit in minor units", amount))
        })
}

/// Folds a non-success Stripe response into a ServiceError. Declines come
/// back as 402 and surface as payment failures; everything else is a
/// gateway fault.
async fn stripe_error(context: &str, response: reqwest::Response) -> ServiceError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    debug!(%status, body = %body, "Stripe error response");

    let message = serde_json::from_str::<StripeErrorBody>(&body)
        .ok()
        .and_then(|parsed| parsed.error.message);

    if status == reqwest::StatusCode::PAYMENT_REQUIRED {
        ServiceError::PaymentFailed(message.unwrap_or_else(|| "Card declined".to_string()))
    } else {
        ServiceError::ExternalServiceError(format!(
            "{} failed with status {}",
            context, status
        ))
    }
}
