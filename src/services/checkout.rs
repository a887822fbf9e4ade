use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::cache::InMemoryCache;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{CheckoutSession, CheckoutStatus, CheckoutStep, PaymentSelection};
use crate::services::payment_methods::{MethodQuote, PaymentMethodService};
use crate::services::payments::{CaptureOutcome, CaptureRequest, PaymentService};
use crate::services::CouponService;

const MAX_USER_ID_LENGTH: usize = 64;
const MIN_IDEMPOTENCY_KEY_LENGTH: usize = 8;
const MAX_IDEMPOTENCY_KEY_LENGTH: usize = 255;

/// Result of a create call, flagging whether an idempotency key replayed an
/// existing session.
#[derive(Clone, Debug)]
pub struct CreateSessionResult {
    pub session: CheckoutSession,
    pub was_created: bool,
}

#[derive(Clone, Debug)]
pub struct CheckoutSessionWithPayment {
    pub session: CheckoutSession,
    pub payment: CaptureOutcome,
}

/// Drives a checkout session through method selection, coupon application
/// and capture. Sessions live in the cache under a sliding TTL; writes to a
/// session serialize through a per-session lock.
#[derive(Clone)]
pub struct CheckoutService {
    cache: Arc<InMemoryCache>,
    coupons: Arc<CouponService>,
    methods: Arc<PaymentMethodService>,
    payments: Arc<PaymentService>,
    event_sender: Arc<EventSender>,
    session_ttl: Duration,
    session_locks: Arc<AsyncMutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
    idempotency_locks: Arc<AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl CheckoutService {
    pub fn new(
        cache: Arc<InMemoryCache>,
        coupons: Arc<CouponService>,
        methods: Arc<PaymentMethodService>,
        payments: Arc<PaymentService>,
        event_sender: Arc<EventSender>,
        session_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            coupons,
            methods,
            payments,
            event_sender,
            session_ttl,
            session_locks: Arc::new(AsyncMutex::new(HashMap::new())),
            idempotency_locks: Arc::new(AsyncMutex::new(HashMap::new())),
        }
    }

    /// Opens a checkout session for a tier selection. An idempotency key
    /// replays the session it originally created instead of opening a new
    /// one.
    #[instrument(skip(self, selection))]
    pub async fn create_session(
        &self,
        user_id: &str,
        selection: PaymentSelection,
        idempotency_key: Option<&str>,
    ) -> Result<CreateSessionResult, ServiceError> {
        Self::validate_user_id(user_id)?;
        selection.validate()?;

        let hashed_idempotency = match idempotency_key {
            Some(key) => Some(Self::hash_idempotency_key(key)?),
            None => None,
        };

        if let Some(ref hash) = hashed_idempotency {
            let idempotency_lock = self.acquire_idempotency_lock(hash).await;
            let guard = idempotency_lock.lock().await;
            let result = self
                .create_session_inner(user_id, selection, Some(hash))
                .await;
            drop(guard);
            self.release_idempotency_lock(hash, idempotency_lock).await;
            result
        } else {
            self.create_session_inner(user_id, selection, None).await
        }
    }

    async fn create_session_inner(
        &self,
        user_id: &str,
        selection: PaymentSelection,
        hashed_idempotency: Option<&str>,
    ) -> Result<CreateSessionResult, ServiceError> {
        if let Some(hash) = hashed_idempotency {
            let cache_key = Self::idempotency_cache_key(hash);
            if let Some(existing_session_id) = self
                .cache
                .get(&cache_key)
                .await
                .map_err(|e| ServiceError::CacheError(e.to_string()))?
            {
                let session_id = Uuid::parse_str(&existing_session_id)
                    .map_err(|e| ServiceError::CacheError(e.to_string()))?;
                match self.get_session(session_id).await {
                    Ok(session) => {
                        return Ok(CreateSessionResult {
                            session,
                            was_created: false,
                        });
                    }
                    // The mapped session expired out of the cache; forget
                    // the mapping and create a fresh one.
                    Err(ServiceError::NotFound(_)) => {
                        self.cache
                            .delete(&cache_key)
                            .await
                            .map_err(|e| ServiceError::CacheError(e.to_string()))?;
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(self.session_ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(1800));
        let session = CheckoutSession {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            selection,
            step: CheckoutStep::SelectMethod,
            selected_method: None,
            coupon: None,
            status: CheckoutStatus::Open,
            created_at: now,
            updated_at: now,
            expires_at,
        };

        self.save_session(&session).await?;
        if let Some(hash) = hashed_idempotency {
            self.cache
                .set(
                    &Self::idempotency_cache_key(hash),
                    &session.id.to_string(),
                    Some(self.session_ttl),
                )
                .await
                .map_err(|e| ServiceError::CacheError(e.to_string()))?;
        }

        self.event_sender
            .send(Event::CheckoutSessionCreated {
                session_id: session.id,
                user_id: session.user_id.clone(),
            })
            .await
            .map_err(ServiceError::EventError)?;

        info!("Created checkout session: {}", session.id);
        Ok(CreateSessionResult {
            session,
            was_created: true,
        })
    }

    /// Loads a session, refreshing the sliding expiry when less than half
    /// the TTL remains.
    #[instrument(skip(self))]
    pub async fn get_session(&self, session_id: Uuid) -> Result<CheckoutSession, ServiceError> {
        let cache_key = Self::session_cache_key(session_id);

        let cached = self
            .cache
            .get(&cache_key)
            .await
            .map_err(|e| ServiceError::CacheError(e.to_string()))?;

        match cached {
            Some(data) => {
                let mut session: CheckoutSession = serde_json::from_str(&data)
                    .map_err(|e| ServiceError::SerializationError(e.to_string()))?;

                if session.is_open() {
                    if let Ok(ttl_duration) = chrono::Duration::from_std(self.session_ttl) {
                        let now = Utc::now();
                        if session.expires_at > now {
                            let remaining = session.expires_at - now;
                            if remaining < ttl_duration / 2 {
                                session.expires_at = now + ttl_duration;
                                session.updated_at = now;
                                self.save_session(&session).await?;
                            }
                        }
                    }
                }

                Ok(session)
            }
            None => Err(ServiceError::NotFound(format!(
                "Checkout session {} not found",
                session_id
            ))),
        }
    }

    /// Validates a coupon code against the session's tier and stores the
    /// resulting application. A second apply replaces the first wholesale.
    #[instrument(skip(self))]
    pub async fn apply_coupon(
        &self,
        session_id: Uuid,
        code: &str,
    ) -> Result<CheckoutSession, ServiceError> {
        let session_lock = self.acquire_session_lock(session_id).await;
        let guard = session_lock.lock().await;

        let result = async move {
            let mut session = self.get_session(session_id).await?;
            Self::ensure_session_open(&session)?;

            let coupon = self.coupons.validate(code, &session.selection).await?;
            let discount_amount = coupon.discount_amount;
            let coupon_code = coupon.code.clone();
            session.coupon = Some(coupon);
            session.updated_at = Utc::now();
            self.save_session(&session).await?;

            self.event_sender
                .send_or_log(Event::CouponApplied {
                    session_id,
                    code: coupon_code,
                    discount_amount,
                })
                .await;

            Ok(session)
        }
        .await;

        drop(guard);
        self.release_session_lock(session_id, session_lock).await;

        if let Ok(ref session) = result {
            info!("Applied coupon to checkout session: {}", session.id);
        }

        result
    }

    /// Clears an applied coupon, restoring the original pricing. Removing
    /// when none is applied is a no-op.
    #[instrument(skip(self))]
    pub async fn remove_coupon(
        &self,
        session_id: Uuid,
    ) -> Result<CheckoutSession, ServiceError> {
        let session_lock = self.acquire_session_lock(session_id).await;
        let guard = session_lock.lock().await;

        let result = async move {
            let mut session = self.get_session(session_id).await?;
            Self::ensure_session_open(&session)?;

            if let Some(coupon) = session.coupon.take() {
                session.updated_at = Utc::now();
                self.save_session(&session).await?;
                self.event_sender
                    .send_or_log(Event::CouponRemoved {
                        session_id,
                        code: coupon.code,
                    })
                    .await;
            }

            Ok(session)
        }
        .await;

        drop(guard);
        self.release_session_lock(session_id, session_lock).await;

        result
    }

    /// Active payment methods priced for this session, coupon included.
    #[instrument(skip(self))]
    pub async fn method_quotes(
        &self,
        session_id: Uuid,
    ) -> Result<Vec<MethodQuote>, ServiceError> {
        let session = self.get_session(session_id).await?;
        self.methods
            .display_prices(&session.selection, session.coupon.as_ref())
            .await
    }

    /// Picks a payment method and advances the session to that provider's
    /// payment step.
    #[instrument(skip(self))]
    pub async fn select_method(
        &self,
        session_id: Uuid,
        method_id: &str,
    ) -> Result<CheckoutSession, ServiceError> {
        let session_lock = self.acquire_session_lock(session_id).await;
        let guard = session_lock.lock().await;

        let result = async move {
            let mut session = self.get_session(session_id).await?;
            Self::ensure_session_open(&session)?;

            let methods = self.methods.list_active().await?;
            let method = methods
                .into_iter()
                .find(|method| method.id == method_id)
                .ok_or_else(|| {
                    ServiceError::ValidationError(
                        "Unknown or inactive payment method".to_string(),
                    )
                })?;

            let provider = method.name;
            session.selected_method = Some(method);
            session.step = CheckoutStep::Provider(provider);
            session.updated_at = Utc::now();
            self.save_session(&session).await?;

            self.event_sender
                .send_or_log(Event::PaymentMethodSelected {
                    session_id,
                    provider: provider.to_string(),
                })
                .await;

            Ok(session)
        }
        .await;

        drop(guard);
        self.release_session_lock(session_id, session_lock).await;

        if let Ok(ref session) = result {
            info!("Selected payment method for session: {}", session.id);
        }

        result
    }

    /// Returns from a provider's payment step to method selection. The
    /// selected method is cleared; an applied coupon stays applied.
    #[instrument(skip(self))]
    pub async fn back_to_selection(
        &self,
        session_id: Uuid,
    ) -> Result<CheckoutSession, ServiceError> {
        let session_lock = self.acquire_session_lock(session_id).await;
        let guard = session_lock.lock().await;

        let result = async move {
            let mut session = self.get_session(session_id).await?;
            Self::ensure_session_open(&session)?;

            session.step = CheckoutStep::SelectMethod;
            session.selected_method = None;
            session.updated_at = Utc::now();
            self.save_session(&session).await?;

            self.event_sender
                .send_or_log(Event::ReturnedToMethodSelection { session_id })
                .await;

            Ok(session)
        }
        .await;

        drop(guard);
        self.release_session_lock(session_id, session_lock).await;

        result
    }

    /// Captures payment through the selected provider and completes the
    /// session.
    #[instrument(skip(self, request))]
    pub async fn capture(
        &self,
        session_id: Uuid,
        request: &CaptureRequest,
    ) -> Result<CheckoutSessionWithPayment, ServiceError> {
        let session_lock = self.acquire_session_lock(session_id).await;
        let guard = session_lock.lock().await;

        let result = async move {
            let mut session = self.get_session(session_id).await?;
            Self::ensure_session_open(&session)?;

            if !matches!(session.step, CheckoutStep::Provider(_)) {
                return Err(ServiceError::InvalidOperation(
                    "Select a payment method before capturing payment".to_string(),
                ));
            }

            let payment = self.payments.capture(&session, request).await?;

            session.status = CheckoutStatus::Completed;
            session.updated_at = Utc::now();
            self.save_session(&session).await?;

            self.event_sender
                .send_or_log(Event::CheckoutCompleted {
                    session_id,
                    transaction_id: payment.transaction.id.clone(),
                })
                .await;

            Ok(CheckoutSessionWithPayment { session, payment })
        }
        .await;

        drop(guard);
        self.release_session_lock(session_id, session_lock).await;

        if let Ok(ref completed) = result {
            info!("Completed checkout session: {}", completed.session.id);
        }

        result
    }

    // Private helper methods

    async fn acquire_session_lock(&self, session_id: Uuid) -> Arc<AsyncMutex<()>> {
        let mut locks = self.session_locks.lock().await;
        if let Some(lock) = locks.get(&session_id) {
            lock.clone()
        } else {
            let new_lock = Arc::new(AsyncMutex::new(()));
            locks.insert(session_id, new_lock.clone());
            new_lock
        }
    }

    async fn release_session_lock(&self, session_id: Uuid, lock: Arc<AsyncMutex<()>>) {
        if Arc::strong_count(&lock) == 1 {
            let mut locks = self.session_locks.lock().await;
            if let Some(existing) = locks.get(&session_id) {
                if Arc::ptr_eq(existing, &lock) {
                    locks.remove(&session_id);
                }
            }
        }
    }

    async fn acquire_idempotency_lock(&self, hash: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.idempotency_locks.lock().await;
        if let Some(lock) = locks.get(hash) {
            lock.clone()
        } else {
            let new_lock = Arc::new(AsyncMutex::new(()));
            locks.insert(hash.to_string(), new_lock.clone());
            new_lock
        }
    }

    async fn release_idempotency_lock(&self, hash: &str, lock: Arc<AsyncMutex<()>>) {
        if Arc::strong_count(&lock) == 1 {
            let mut locks = self.idempotency_locks.lock().await;
            if let Some(existing) = locks.get(hash) {
                if Arc::ptr_eq(existing, &lock) {
                    locks.remove(hash);
                }
            }
        }
    }

    fn session_cache_key(session_id: Uuid) -> String {
        format!("checkout_session:{}", session_id)
    }

    fn idempotency_cache_key(hash: &str) -> String {
        format!("checkout_idem:{}", hash)
    }

    fn hash_idempotency_key(key: &str) -> Result<String, ServiceError> {
        let key = key.trim();
        if key.len() < MIN_IDEMPOTENCY_KEY_LENGTH {
            return Err(ServiceError::ValidationError(format!(
                "Idempotency key must be at least {} characters long",
                MIN_IDEMPOTENCY_KEY_LENGTH
            )));
        }
        if key.len() > MAX_IDEMPOTENCY_KEY_LENGTH {
            return Err(ServiceError::ValidationError(format!(
                "Idempotency key must be {} characters or fewer",
                MAX_IDEMPOTENCY_KEY_LENGTH
            )));
        }
        if !key.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ServiceError::ValidationError(
                "Idempotency key must contain visible ASCII characters only".to_string(),
            ));
        }

        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    fn validate_user_id(user_id: &str) -> Result<(), ServiceError> {
        let trimmed = user_id.trim();
        if trimmed.is_empty() {
            return Err(ServiceError::ValidationError(
                "User id cannot be empty".to_string(),
            ));
        }
        if trimmed.len() > MAX_USER_ID_LENGTH {
            return Err(ServiceError::ValidationError(format!(
                "User id must be {} characters or fewer",
                MAX_USER_ID_LENGTH
            )));
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ServiceError::ValidationError(
                "User id may contain only letters, digits, hyphens and underscores".to_string(),
            ));
        }
        Ok(())
    }

    fn ensure_session_open(session: &CheckoutSession) -> Result<(), ServiceError> {
        if session.status == CheckoutStatus::Completed {
            return Err(ServiceError::InvalidOperation(
                "Session already completed".to_string(),
            ));
        }
        if session.status == CheckoutStatus::Expired || session.expires_at <= Utc::now() {
            return Err(ServiceError::InvalidOperation(
                "Checkout session has expired".to_string(),
            ));
        }
        Ok(())
    }

    async fn save_session(&self, session: &CheckoutSession) -> Result<(), ServiceError> {
        let cache_key = Self::session_cache_key(session.id);
        let data = serde_json::to_string(session)
            .map_err(|e| ServiceError::SerializationError(e.to_string()))?;

        self.cache
            .set(&cache_key, &data, Some(self.session_ttl))
            .await
            .map_err(|e| ServiceError::CacheError(e.to_string()))?;

        Ok(())
    }
}
