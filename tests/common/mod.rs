//! Shared test harness: a stateful in-memory stand-in for the platform
//! backend, plus a router wired the same way the production binary wires it.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tower::ServiceExt;

use examhub_api::backend::{
    CouponBackend, CouponValidation, ExchangeRateBackend, PaymentMethodBackend, ReceiptBackend,
    TourBackend, TransactionBackend,
};
use examhub_api::cache::InMemoryCache;
use examhub_api::config::AppConfig;
use examhub_api::errors::ServiceError;
use examhub_api::events::{self, EventSender};
use examhub_api::handlers::AppServices;
use examhub_api::models::{
    HintProgress, NewTransaction, PaymentMethod, PaymentProvider, PaymentTransaction,
    TransactionUpdate,
};
use examhub_api::services::providers::Gateways;
use examhub_api::AppState;

/// One coupon consumption recorded by the fake backend.
#[derive(Clone, Debug)]
pub struct ConsumedCoupon {
    pub code: String,
    pub payment_transaction_id: String,
    pub original_amount: Decimal,
    pub currency: String,
}

/// In-memory stand-in for the platform REST backend. Tests seed it up front
/// and inspect what the flows wrote back.
pub struct FakeBackend {
    coupons: Mutex<HashMap<String, Decimal>>,
    pub validate_calls: AtomicU64,
    pub consumed: Mutex<Vec<ConsumedCoupon>>,
    methods: Mutex<Vec<PaymentMethod>>,
    transactions: Mutex<HashMap<String, PaymentTransaction>>,
    next_transaction: AtomicU64,
    pub receipts: Mutex<Vec<String>>,
    rate: Mutex<Option<Decimal>>,
    progress: Mutex<HashMap<String, HintProgress>>,
    accounts: Mutex<HashMap<String, DateTime<Utc>>>,
    pub fail_coupon_validation: AtomicBool,
}

fn progress_key(user_id: &str, view: &str) -> String {
    format!("{}/{}", user_id, view)
}

fn payment_method(
    id: &str,
    provider: PaymentProvider,
    display_name: &str,
    currency: &str,
) -> PaymentMethod {
    PaymentMethod {
        id: id.to_string(),
        name: provider,
        display_name: display_name.to_string(),
        currency: currency.to_string(),
        requires_manual_approval: false,
        is_active: true,
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            coupons: Mutex::new(HashMap::new()),
            validate_calls: AtomicU64::new(0),
            consumed: Mutex::new(Vec::new()),
            methods: Mutex::new(vec![
                payment_method("pm-stripe", PaymentProvider::Stripe, "Credit Card", "USD"),
                payment_method("pm-paypal", PaymentProvider::Paypal, "PayPal", "USD"),
                payment_method("pm-mcb-juice", PaymentProvider::McbJuice, "MCB Juice", "MUR"),
                payment_method("pm-peach", PaymentProvider::Peach, "Peach Payments", "USD"),
            ]),
            transactions: Mutex::new(HashMap::new()),
            next_transaction: AtomicU64::new(1),
            receipts: Mutex::new(Vec::new()),
            rate: Mutex::new(Some(dec!(45.5))),
            progress: Mutex::new(HashMap::new()),
            accounts: Mutex::new(HashMap::new()),
            fail_coupon_validation: AtomicBool::new(false),
        }
    }

    pub async fn seed_coupon(&self, code: &str, percentage: Decimal) {
        self.coupons
            .lock()
            .await
            .insert(code.to_string(), percentage);
    }

    pub async fn seed_account(&self, user_id: &str, created_at: DateTime<Utc>) {
        self.accounts
            .lock()
            .await
            .insert(user_id.to_string(), created_at);
    }

    pub async fn set_rate(&self, rate: Option<Decimal>) {
        *self.rate.lock().await = rate;
    }

    pub async fn seed_completed_tour(&self, user_id: &str, view: &str) {
        self.progress.lock().await.insert(
            progress_key(user_id, view),
            HintProgress {
                tutorial_completed: true,
            },
        );
    }

    pub async fn tour_completed(&self, user_id: &str, view: &str) -> bool {
        self.progress
            .lock()
            .await
            .get(&progress_key(user_id, view))
            .map(|progress| progress.tutorial_completed)
            .unwrap_or(false)
    }

    pub async fn transaction(&self, id: &str) -> Option<PaymentTransaction> {
        self.transactions.lock().await.get(id).cloned()
    }

    pub async fn transaction_count(&self) -> usize {
        self.transactions.lock().await.len()
    }
}

#[async_trait]
impl CouponBackend for FakeBackend {
    async fn validate_coupon(
        &self,
        code: &str,
        _tier_id: &str,
        _billing_cycle: examhub_api::models::BillingCycle,
    ) -> Result<Vec<CouponValidation>, ServiceError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_coupon_validation.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError(
                "coupon validation failed with status 500".into(),
            ));
        }
        let verdict = match self.coupons.lock().await.get(code) {
            Some(percentage) => CouponValidation {
                is_valid: true,
                error_message: None,
                discount_percentage: Some(*percentage),
            },
            None => CouponValidation {
                is_valid: false,
                error_message: Some("Invalid coupon code".into()),
                discount_percentage: None,
            },
        };
        Ok(vec![verdict])
    }

    async fn consume_coupon(
        &self,
        code: &str,
        payment_transaction_id: &str,
        original_amount: Decimal,
        currency: &str,
    ) -> Result<(), ServiceError> {
        self.consumed.lock().await.push(ConsumedCoupon {
            code: code.to_string(),
            payment_transaction_id: payment_transaction_id.to_string(),
            original_amount,
            currency: currency.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl PaymentMethodBackend for FakeBackend {
    async fn list_active_payment_methods(&self) -> Result<Vec<PaymentMethod>, ServiceError> {
        Ok(self.methods.lock().await.clone())
    }
}

#[async_trait]
impl TransactionBackend for FakeBackend {
    async fn insert_transaction(
        &self,
        new: &NewTransaction,
    ) -> Result<PaymentTransaction, ServiceError> {
        let id = format!("txn-{}", self.next_transaction.fetch_add(1, Ordering::SeqCst));
        let transaction = PaymentTransaction {
            id: id.clone(),
            user_id: new.user_id.clone(),
            tier_id: new.tier_id.clone(),
            payment_method_id: new.payment_method_id.clone(),
            amount: new.amount,
            currency: new.currency.clone(),
            billing_cycle: new.billing_cycle,
            status: new.status,
            external_transaction_id: None,
            metadata: new.metadata.clone(),
            created_at: Utc::now(),
            updated_at: None,
        };
        self.transactions
            .lock()
            .await
            .insert(id, transaction.clone());
        Ok(transaction)
    }

    async fn update_transaction(
        &self,
        id: &str,
        update: &TransactionUpdate,
    ) -> Result<PaymentTransaction, ServiceError> {
        let mut transactions = self.transactions.lock().await;
        let transaction = transactions
            .get_mut(id)
            .ok_or_else(|| ServiceError::NotFound(format!("Transaction {} not found", id)))?;
        transaction.status = update.status;
        if let Some(external) = &update.external_transaction_id {
            transaction.external_transaction_id = Some(external.clone());
        }
        if let Some(metadata) = &update.metadata {
            transaction.metadata = metadata.clone();
        }
        transaction.updated_at = Some(Utc::now());
        Ok(transaction.clone())
    }

    async fn delete_transaction(&self, id: &str) -> Result<(), ServiceError> {
        self.transactions
            .lock()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ServiceError::NotFound(format!("Transaction {} not found", id)))
    }
}

#[async_trait]
impl ReceiptBackend for FakeBackend {
    async fn send_receipt(&self, transaction_id: &str) -> Result<(), ServiceError> {
        self.receipts.lock().await.push(transaction_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl ExchangeRateBackend for FakeBackend {
    async fn usd_to_mur_rate(&self) -> Result<Decimal, ServiceError> {
        match *self.rate.lock().await {
            Some(rate) => Ok(rate),
            None => Err(ServiceError::ExternalServiceError(
                "rate lookup failed with status 503".into(),
            )),
        }
    }
}

#[async_trait]
impl TourBackend for FakeBackend {
    async fn fetch_hint_progress(
        &self,
        user_id: &str,
        view: &str,
    ) -> Result<HintProgress, ServiceError> {
        Ok(self
            .progress
            .lock()
            .await
            .get(&progress_key(user_id, view))
            .cloned()
            .unwrap_or_default())
    }

    async fn save_hint_progress(
        &self,
        user_id: &str,
        view: &str,
        progress: &HintProgress,
    ) -> Result<(), ServiceError> {
        self.progress
            .lock()
            .await
            .insert(progress_key(user_id, view), progress.clone());
        Ok(())
    }

    async fn account_created_at(&self, user_id: &str) -> Result<DateTime<Utc>, ServiceError> {
        self.accounts
            .lock()
            .await
            .get(user_id)
            .copied()
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))
    }
}

/// Configuration matching the built-in defaults, pointed at nothing real.
pub fn test_config() -> AppConfig {
    AppConfig::new(
        "127.0.0.1".to_string(),
        18_080,
        "test".to_string(),
        "http://127.0.0.1:9000".to_string(),
    )
}

/// Helper harness wiring the full service graph over a [`FakeBackend`] and
/// exposing the same `/api/v1` router the binary serves.
pub struct TestApp {
    router: Router,
    pub backend: Arc<FakeBackend>,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a test application with default configuration.
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    /// Construct a test application with a caller-tweaked configuration.
    pub async fn with_config(cfg: AppConfig) -> Self {
        let backend = Arc::new(FakeBackend::new());
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateways = Gateways::from_config(&cfg).expect("test-mode gateways");
        let cache = Arc::new(InMemoryCache::new());
        let services = AppServices::build(
            &cfg,
            backend.clone(),
            gateways,
            cache,
            event_sender.clone(),
        );

        let state = AppState {
            config: Arc::new(cfg),
            event_sender,
            services,
        };

        let router = Router::new()
            .nest("/api/v1", examhub_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            backend,
            state,
            _event_task: event_task,
        }
    }

    /// Send a JSON request against the router.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request_with_headers(method, uri, body, &[]).await
    }

    /// Send a JSON request with extra headers, e.g. `Idempotency-Key`.
    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Reads a response body as JSON.
pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
