use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{build_gateway_client, ChargeOutcome, ChargeRequest, PaymentGateway};
use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::models::PaymentProvider;

const PEACH_API_BASE: &str = "https://oppwa.com";
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct PeachPaymentResponse {
    id: String,
    result: PeachResult,
}

#[derive(Debug, Deserialize)]
struct PeachResult {
    code: String,
    description: String,
}

pub struct PeachGateway {
    client: reqwest::Client,
    base_url: String,
    entity_id: Option<String>,
    access_token: Option<String>,
    test_mode: bool,
}

impl PeachGateway {
    pub fn new(config: &AppConfig) -> Result<Self, ServiceError> {
        Ok(Self {
            client: build_gateway_client(REQUEST_TIMEOUT_SECS)?,
            base_url: PEACH_API_BASE.to_string(),
            entity_id: config.peach_entity_id.clone(),
            access_token: config.peach_access_token.clone(),
            test_mode: config.payment_test_mode,
        })
    }

    /// Live-mode client pointed at a stub server.
    pub fn with_base_url(
        base_url: impl Into<String>,
        entity_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            client: build_gateway_client(5)?,
            base_url: base_url.into(),
            entity_id: Some(entity_id.into()),
            access_token: Some(access_token.into()),
            test_mode: false,
        })
    }

    fn credentials(&self) -> Result<(&str, &str), ServiceError> {
        match (self.entity_id.as_deref(), self.access_token.as_deref()) {
            (Some(entity_id), Some(token)) => Ok((entity_id, token)),
            _ => Err(ServiceError::InvalidOperation(
                "Peach Payments credentials are not configured".to_string(),
            )),
        }
    }
}

#[async_trait]
impl PaymentGateway for PeachGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Peach
    }

    #[instrument(skip(self, request), fields(transaction_id = %request.transaction_id))]
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome, ServiceError> {
        let card = request.card.as_ref().ok_or_else(|| {
            ServiceError::ValidationError(
                "Card details are required for Peach Payments".to_string(),
            )
        })?;

        if self.test_mode {
            let external_id = format!(
                "PEACH-{}",
                Uuid::new_v4().simple().to_string().to_uppercase()
            );
            info!(external_id = %external_id, "Peach test-mode charge completed");
            return Ok(ChargeOutcome {
                external_transaction_id: external_id,
                test_mode: true,
            });
        }

        let (entity_id, token) = self.credentials()?;
        let (exp_month, exp_year) = match card.expiry.split_once('/') {
            Some((month, year)) if !month.is_empty() && !year.is_empty() => {
                (month.to_string(), format!("20{}", year))
            }
            _ => {
                return Err(ServiceError::ValidationError(
                    "Expiry must be in MM/YY format".to_string(),
                ))
            }
        };
        let number = card.card_number.replace(' ', "");

        let response = self
            .client
            .post(format!("{}/v1/payments", self.base_url))
            .bearer_auth(token)
            .form(&[
                ("entityId", entity_id.to_string()),
                ("amount", format!("{:.2}", request.amount)),
                ("currency", request.currency.clone()),
                ("paymentType", "DB".to_string()),
                ("paymentBrand", card_brand(&number).to_string()),
                ("card.number", number),
                ("card.expiryMonth", exp_month),
                ("card.expiryYear", exp_year),
                ("card.cvv", card.cvv.clone()),
                ("merchantTransactionId", request.transaction_id.clone()),
            ])
            .send()
            .await
            .map_err(|err| {
                ServiceError::ExternalServiceError(format!("Peach request failed: {}", err))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            debug!(%status, "Peach payment request rejected");
            return Err(ServiceError::ExternalServiceError(format!(
                "Peach payment failed with status {}",
                status
            )));
        }

        let payment: PeachPaymentResponse = response.json().await.map_err(|err| {
            ServiceError::ExternalServiceError(format!("Invalid Peach payment response: {}", err))
        })?;

        if !is_success_code(&payment.result.code) {
            return Err(ServiceError::PaymentFailed(payment.result.description));
        }

        info!(external_id = %payment.id, code = %payment.result.code, "Peach charge completed");
        Ok(ChargeOutcome {
            external_transaction_id: payment.id,
            test_mode: false,
        })
    }
}

/// Peach reports outcomes through result codes; `000.000.*` and `000.100.*`
/// families are successful transactions.
fn is_success_code(code: &str) -> bool {
    code.starts_with("000.000.") || code.starts_with("000.100.")
}

fn card_brand(number: &str) -> &'static str {
    match number.chars().next() {
        Some('4') => "VISA",
        Some('2') | Some('5') => "MASTER",
        Some('3') => "AMEX",
        _ => "VISA",
    }
}
