use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{build_gateway_client, ChargeOutcome, ChargeRequest, PaymentGateway};
use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::models::PaymentProvider;

const JUICE_API_BASE: &str = "https://api.mcbjuice.mu";
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct JuicePaymentResponse {
    payment_id: String,
    status: String,
}

/// MCB Juice mobile-money gateway. The customer approves a push request on
/// their phone; the charge is billed in rupees.
pub struct McbJuiceGateway {
    client: reqwest::Client,
    base_url: String,
    merchant_id: Option<String>,
    api_key: Option<String>,
    test_mode: bool,
}

impl McbJuiceGateway {
    pub fn new(config: &AppConfig) -> Result<Self, ServiceError> {
        Ok(Self {
            client: build_gateway_client(REQUEST_TIMEOUT_SECS)?,
            base_url: JUICE_API_BASE.to_string(),
            merchant_id: config.mcb_juice_merchant_id.clone(),
            api_key: config.mcb_juice_api_key.clone(),
            test_mode: config.payment_test_mode,
        })
    }

    /// Live-mode client pointed at a stub server.
    pub fn with_base_url(
        base_url: impl Into<String>,
        merchant_id: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            client: build_gateway_client(5)?,
            base_url: base_url.into(),
            merchant_id: Some(merchant_id.into()),
            api_key: Some(api_key.into()),
            test_mode: false,
        })
    }

    fn credentials(&self) -> Result<(&str, &str), ServiceError> {
        match (self.merchant_id.as_deref(), self.api_key.as_deref()) {
            (Some(merchant_id), Some(api_key)) => Ok((merchant_id, api_key)),
            _ => Err(ServiceError::InvalidOperation(
                "MCB Juice credentials are not configured".to_string(),
            )),
        }
    }
}

#[async_trait]
impl PaymentGateway for McbJuiceGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::McbJuice
    }

    #[instrument(skip(self, request), fields(transaction_id = %request.transaction_id))]
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, ServiceError> {
        let phone_number = request
            .phone_number
            .as_deref()
            .map(str::trim)
            .filter(|phone| !phone.is_empty())
            .ok_or_else(|| {
                ServiceError::ValidationError(
                    "A phone number is required for MCB Juice payments".to_string(),
                )
            })?;

        if self.test_mode {
            let external_id = format!(
                "JUICE-{}",
                Uuid::new_v4().simple().to_string().to_uppercase()
            );
            info!(external_id = %external_id, "MCB Juice test-mode charge completed");
            return Ok(ChargeOutcome {
                external_transaction_id: external_id,
                test_mode: true,
            });
        }

        let (merchant_id, api_key) = self.credentials()?;
        // Bill in rupees when the converted figure is available.
        let (amount, currency) = match (&request.local_amount, &request.local_currency) {
            (Some(amount), Some(currency)) => (*amount, currency.as_str()),
            _ => (request.amount, request.currency.as_str()),
        };

        let payload = json!({
            "merchant_id": merchant_id,
            "phone_number": phone_number,
            "amount": amount,
            "currency": currency,
            "reference": request.transaction_id,
            "description": request.description,
        });

        let response = self
            .client
            .post(format!("{}/api/v1/payments", self.base_url))
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                ServiceError::ExternalServiceError(format!("MCB Juice request failed: {}", err))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            debug!(%status, "MCB Juice payment request rejected");
            return Err(ServiceError::ExternalServiceError(format!(
                "MCB Juice payment failed with status {}",
                status
            )));
        }

        let payment: JuicePaymentResponse = response.json().await.map_err(|err| {
            ServiceError::ExternalServiceError(format!(
                "Invalid MCB Juice payment response: {}",
                err
            ))
        })?;

        if payment.status.eq_ignore_ascii_case("failed")
            || payment.status.eq_ignore_ascii_case("declined")
        {
            return Err(ServiceError::PaymentFailed(format!(
                "MCB Juice payment {} was declined",
                payment.payment_id
            )));
        }

        info!(external_id = %payment.payment_id, status = %payment.status, "MCB Juice payment accepted");
        Ok(ChargeOutcome {
            external_transaction_id: payment.payment_id,
            test_mode: false,
        })
    }
}
