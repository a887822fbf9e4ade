use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{build_gateway_client, ChargeOutcome, ChargeRequest, PaymentGateway};
use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::models::PaymentProvider;

const PAYPAL_API_BASE: &str = "https://api-m.paypal.com";
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
}

/// PayPal approval happens in the buyer's browser; the client hands us the
/// approved order id and this gateway verifies it server-side.
pub struct PayPalGateway {
    client: reqwest::Client,
    base_url: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    test_mode: bool,
}

impl PayPalGateway {
    pub fn new(config: &AppConfig) -> Result<Self, ServiceError> {
        Ok(Self {
            client: build_gateway_client(REQUEST_TIMEOUT_SECS)?,
            base_url: PAYPAL_API_BASE.to_string(),
            client_id: config.paypal_client_id.clone(),
            client_secret: config.paypal_client_secret.clone(),
            test_mode: config.payment_test_mode,
        })
    }

    /// Live-mode client pointed at a stub server.
    pub fn with_base_url(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            client: build_gateway_client(5)?,
            base_url: base_url.into(),
            client_id: Some(client_id.into()),
            client_secret: Some(client_secret.into()),
            test_mode: false,
        })
    }

    fn credentials(&self) -> Result<(&str, &str), ServiceError> {
        match (self.client_id.as_deref(), self.client_secret.as_deref()) {
            (Some(id), Some(secret)) => Ok((id, secret)),
            _ => Err(ServiceError::InvalidOperation(
                "PayPal credentials are not configured".to_string(),
            )),
        }
    }

    async fn access_token(&self) -> Result<String, ServiceError> {
        let (client_id, client_secret) = self.credentials()?;
        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.base_url))
            .basic_auth(client_id, Some(client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|err| {
                ServiceError::ExternalServiceError(format!("PayPal request failed: {}", err))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            debug!(%status, "PayPal token request rejected");
            return Err(ServiceError::ExternalServiceError(format!(
                "PayPal authentication failed with status {}",
                status
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|err| {
            ServiceError::ExternalServiceError(format!("Invalid PayPal token response: {}", err))
        })?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl PaymentGateway for PayPalGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Paypal
    }

    #[instrument(skip(self, request), fields(transaction_id = %request.transaction_id))]
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, ServiceError> {
        if self.test_mode {
            let external_id = format!(
                "PAYPAL-{}",
                Uuid::new_v4().simple().to_string().to_uppercase()
            );
            info!(external_id = %external_id, "PayPal test-mode charge completed");
            return Ok(ChargeOutcome {
                external_transaction_id: external_id,
                test_mode: true,
            });
        }

        let order_id = request
            .provider_reference
            .as_deref()
            .map(str::trim)
            .filter(|reference| !reference.is_empty())
            .ok_or_else(|| {
                ServiceError::ValidationError(
                    "A PayPal order reference is required to complete this payment".to_string(),
                )
            })?;

        let token = self.access_token().await?;
        let response = self
            .client
            .get(format!("{}/v2/checkout/orders/{}", self.base_url, order_id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| {
                ServiceError::ExternalServiceError(format!("PayPal request failed: {}", err))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            debug!(%status, order_id = %order_id, "PayPal order lookup rejected");
            return Err(ServiceError::ExternalServiceError(format!(
                "PayPal order lookup failed with status {}",
                status
            )));
        }

        let order: OrderResponse = response.json().await.map_err(|err| {
            ServiceError::ExternalServiceError(format!("Invalid PayPal order response: {}", err))
        })?;

        if order.status != "COMPLETED" && order.status != "APPROVED" {
            return Err(ServiceError::PaymentFailed(format!(
                "PayPal order {} is not approved (status {})",
                order.id, order.status
            )));
        }

        info!(external_id = %order.id, status = %order.status, "PayPal order verified");
        Ok(ChargeOutcome {
            external_transaction_id: order.id,
            test_mode: false,
        })
    }
}
