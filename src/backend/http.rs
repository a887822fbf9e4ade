use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use super::{
    CouponBackend, CouponValidation, ExchangeRateBackend, PaymentMethodBackend, ReceiptBackend,
    TourBackend, TransactionBackend,
};
use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::models::{
    BillingCycle, HintProgress, NewTransaction, PaymentMethod, PaymentTransaction,
    TransactionUpdate,
};

/// REST client for the platform backend. One instance is shared by every
/// service that talks to the backend.
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RateResponse {
    rate: Decimal,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    created_at: DateTime<Utc>,
}

impl HttpBackend {
    pub fn new(cfg: &AppConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(cfg.backend_timeout())
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: cfg.backend_base_url.trim_end_matches('/').to_string(),
            api_key: cfg.backend_api_key.clone(),
        })
    }

    /// Client pointed at an explicit base URL. Test constructor.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn check(
        response: reqwest::Response,
        context: &str,
    ) -> Result<reqwest::Response, ServiceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ServiceError::ExternalServiceError(format!(
            "{} failed with status {}: {}",
            context, status, body
        )))
    }

    fn transport_error(context: &str, err: reqwest::Error) -> ServiceError {
        ServiceError::ExternalServiceError(format!("{} call failed: {}", context, err))
    }

    fn decode_error(context: &str, err: reqwest::Error) -> ServiceError {
        ServiceError::ExternalServiceError(format!("{} returned malformed payload: {}", context, err))
    }
}

#[async_trait]
impl CouponBackend for HttpBackend {
    #[instrument(skip(self))]
    async fn validate_coupon(
        &self,
        code: &str,
        tier_id: &str,
        billing_cycle: BillingCycle,
    ) -> Result<Vec<CouponValidation>, ServiceError> {
        let response = self
            .apply_auth(self.client.post(self.url("/coupons/validate")))
            .json(&json!({
                "code": code,
                "tier_id": tier_id,
                "billing_cycle": billing_cycle,
            }))
            .send()
            .await
            .map_err(|e| Self::transport_error("Coupon validation", e))?;

        Self::check(response, "Coupon validation")
            .await?
            .json()
            .await
            .map_err(|e| Self::decode_error("Coupon validation", e))
    }

    #[instrument(skip(self))]
    async fn consume_coupon(
        &self,
        code: &str,
        payment_transaction_id: &str,
        original_amount: Decimal,
        currency: &str,
    ) -> Result<(), ServiceError> {
        let response = self
            .apply_auth(self.client.post(self.url("/coupons/consume")))
            .json(&json!({
                "coupon_code": code,
                "payment_transaction_id": payment_transaction_id,
                "original_amount": original_amount,
                "currency": currency,
            }))
            .send()
            .await
            .map_err(|e| Self::transport_error("Coupon consumption", e))?;

        Self::check(response, "Coupon consumption").await?;
        Ok(())
    }
}

#[async_trait]
impl PaymentMethodBackend for HttpBackend {
    #[instrument(skip(self))]
    async fn list_active_payment_methods(&self) -> Result<Vec<PaymentMethod>, ServiceError> {
        let response = self
            .apply_auth(self.client.get(self.url("/payment-methods")))
            .query(&[("active", "true")])
            .send()
            .await
            .map_err(|e| Self::transport_error("Payment method fetch", e))?;

        Self::check(response, "Payment method fetch")
            .await?
            .json()
            .await
            .map_err(|e| Self::decode_error("Payment method fetch", e))
    }
}

#[async_trait]
impl TransactionBackend for HttpBackend {
    #[instrument(skip(self, new))]
    async fn insert_transaction(
        &self,
        new: &NewTransaction,
    ) -> Result<PaymentTransaction, ServiceError> {
        let response = self
            .apply_auth(self.client.post(self.url("/transactions")))
            .json(new)
            .send()
            .await
            .map_err(|e| Self::transport_error("Transaction insert", e))?;

        Self::check(response, "Transaction insert")
            .await?
            .json()
            .await
            .map_err(|e| Self::decode_error("Transaction insert", e))
    }

    #[instrument(skip(self, update))]
    async fn update_transaction(
        &self,
        id: &str,
        update: &TransactionUpdate,
    ) -> Result<PaymentTransaction, ServiceError> {
        let response = self
            .apply_auth(
                self.client
                    .patch(self.url(&format!("/transactions/{}", id))),
            )
            .json(update)
            .send()
            .await
            .map_err(|e| Self::transport_error("Transaction update", e))?;

        Self::check(response, "Transaction update")
            .await?
            .json()
            .await
            .map_err(|e| Self::decode_error("Transaction update", e))
    }

    #[instrument(skip(self))]
    async fn delete_transaction(&self, id: &str) -> Result<(), ServiceError> {
        let response = self
            .apply_auth(
                self.client
                    .delete(self.url(&format!("/transactions/{}", id))),
            )
            .send()
            .await
            .map_err(|e| Self::transport_error("Transaction delete", e))?;

        Self::check(response, "Transaction delete").await?;
        Ok(())
    }
}

#[async_trait]
impl ReceiptBackend for HttpBackend {
    #[instrument(skip(self))]
    async fn send_receipt(&self, transaction_id: &str) -> Result<(), ServiceError> {
        let response = self
            .apply_auth(self.client.post(self.url("/receipts")))
            .json(&json!({ "transaction_id": transaction_id }))
            .send()
            .await
            .map_err(|e| Self::transport_error("Receipt dispatch", e))?;

        Self::check(response, "Receipt dispatch").await?;
        Ok(())
    }
}

#[async_trait]
impl ExchangeRateBackend for HttpBackend {
    #[instrument(skip(self))]
    async fn usd_to_mur_rate(&self) -> Result<Decimal, ServiceError> {
        let response = self
            .apply_auth(self.client.get(self.url("/exchange-rates/usd-mur")))
            .send()
            .await
            .map_err(|e| Self::transport_error("Exchange rate fetch", e))?;

        let payload: RateResponse = Self::check(response, "Exchange rate fetch")
            .await?
            .json()
            .await
            .map_err(|e| Self::decode_error("Exchange rate fetch", e))?;
        Ok(payload.rate)
    }
}

#[async_trait]
impl TourBackend for HttpBackend {
    #[instrument(skip(self))]
    async fn fetch_hint_progress(
        &self,
        user_id: &str,
        view: &str,
    ) -> Result<HintProgress, ServiceError> {
        let response = self
            .apply_auth(
                self.client
                    .get(self.url(&format!("/users/{}/hint-progress/{}", user_id, view))),
            )
            .send()
            .await
            .map_err(|e| Self::transport_error("Hint progress fetch", e))?;

        // No record yet reads as "not completed".
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(HintProgress::default());
        }

        Self::check(response, "Hint progress fetch")
            .await?
            .json()
            .await
            .map_err(|e| Self::decode_error("Hint progress fetch", e))
    }

    #[instrument(skip(self, progress))]
    async fn save_hint_progress(
        &self,
        user_id: &str,
        view: &str,
        progress: &HintProgress,
    ) -> Result<(), ServiceError> {
        let response = self
            .apply_auth(
                self.client
                    .put(self.url(&format!("/users/{}/hint-progress/{}", user_id, view))),
            )
            .json(progress)
            .send()
            .await
            .map_err(|e| Self::transport_error("Hint progress save", e))?;

        Self::check(response, "Hint progress save").await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn account_created_at(&self, user_id: &str) -> Result<DateTime<Utc>, ServiceError> {
        let response = self
            .apply_auth(self.client.get(self.url(&format!("/users/{}", user_id))))
            .send()
            .await
            .map_err(|e| Self::transport_error("Account lookup", e))?;

        let payload: AccountResponse = Self::check(response, "Account lookup")
            .await?
            .json()
            .await
            .map_err(|e| Self::decode_error("Account lookup", e))?;
        Ok(payload.created_at)
    }
}
