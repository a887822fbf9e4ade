use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{
    CheckoutSession, CheckoutStatus, CheckoutStep, CouponApplication, PaymentMethod,
    PaymentSelection,
};
use crate::services::payment_methods::MethodQuote;
use crate::services::payments::CaptureRequest;
use crate::{ApiResponse, ApiResult, AppState};

pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_checkout_session))
        .route("/sessions/:session_id", get(get_checkout_session))
        .route(
            "/sessions/:session_id/coupon",
            post(apply_coupon).delete(remove_coupon),
        )
        .route("/sessions/:session_id/method", post(select_method))
        .route("/sessions/:session_id/back", post(back_to_selection))
        .route("/sessions/:session_id/capture", post(capture_payment))
        .route("/payment-methods", get(list_payment_methods))
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub user_id: String,
    pub selection: PaymentSelection,
}

#[derive(Debug, Deserialize)]
pub struct ApplyCouponRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct SelectMethodRequest {
    pub method_id: String,
}

#[derive(Debug, Deserialize)]
pub struct MethodsQuery {
    pub session_id: Uuid,
}

/// Price summary clients render next to the pay button.
#[derive(Debug, Serialize)]
pub struct PricingView {
    pub original_amount: Decimal,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutSessionView {
    pub id: Uuid,
    pub user_id: String,
    pub status: CheckoutStatus,
    pub step: CheckoutStep,
    pub selection: PaymentSelection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_method: Option<PaymentMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon: Option<CouponApplication>,
    pub pricing: PricingView,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<CheckoutSession> for CheckoutSessionView {
    fn from(session: CheckoutSession) -> Self {
        let pricing = PricingView {
            original_amount: session.original_amount(),
            discount_amount: session.discount_amount(),
            final_amount: session.final_amount(),
            currency: session.selection.currency.clone(),
        };
        Self {
            id: session.id,
            user_id: session.user_id,
            status: session.status,
            step: session.step,
            selection: session.selection,
            selected_method: session.selected_method,
            coupon: session.coupon,
            pricing,
            created_at: session.created_at,
            updated_at: session.updated_at,
            expires_at: session.expires_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CaptureView {
    pub session: CheckoutSessionView,
    pub transaction: crate::models::PaymentTransaction,
    pub test_mode: bool,
    /// How long the client shows the success screen before redirecting.
    pub success_delay_ms: u64,
}

async fn create_checkout_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutSessionView>>), ServiceError> {
    let idempotency_key = match headers.get("Idempotency-Key") {
        Some(value) => Some(value.to_str().map_err(|_| {
            ServiceError::ValidationError("Idempotency-Key must be valid ASCII".to_string())
        })?),
        None => None,
    };

    let result = state
        .services
        .checkout
        .create_session(&request.user_id, request.selection, idempotency_key)
        .await?;

    let status = if result.was_created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(ApiResponse::success(result.session.into()))))
}

async fn get_checkout_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<CheckoutSessionView> {
    let session = state.services.checkout.get_session(session_id).await?;
    Ok(Json(ApiResponse::success(session.into())))
}

async fn apply_coupon(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<ApplyCouponRequest>,
) -> ApiResult<CheckoutSessionView> {
    let session = state
        .services
        .checkout
        .apply_coupon(session_id, &request.code)
        .await?;
    Ok(Json(ApiResponse::success(session.into())))
}

async fn remove_coupon(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<CheckoutSessionView> {
    let session = state.services.checkout.remove_coupon(session_id).await?;
    Ok(Json(ApiResponse::success(session.into())))
}

async fn list_payment_methods(
    State(state): State<AppState>,
    Query(query): Query<MethodsQuery>,
) -> ApiResult<Vec<MethodQuote>> {
    let quotes = state
        .services
        .checkout
        .method_quotes(query.session_id)
        .await?;
    Ok(Json(ApiResponse::success(quotes)))
}

async fn select_method(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<SelectMethodRequest>,
) -> ApiResult<CheckoutSessionView> {
    let session = state
        .services
        .checkout
        .select_method(session_id, &request.method_id)
        .await?;
    Ok(Json(ApiResponse::success(session.into())))
}

async fn back_to_selection(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<CheckoutSessionView> {
    let session = state
        .services
        .checkout
        .back_to_selection(session_id)
        .await?;
    Ok(Json(ApiResponse::success(session.into())))
}

async fn capture_payment(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<CaptureRequest>,
) -> ApiResult<CaptureView> {
    let completed = state
        .services
        .checkout
        .capture(session_id, &request)
        .await?;
    let view = CaptureView {
        session: completed.session.into(),
        transaction: completed.payment.transaction,
        test_mode: completed.payment.test_mode,
        success_delay_ms: state.config.checkout_success_delay_ms,
    };
    Ok(Json(ApiResponse::success(view)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BillingCycle;
    use rust_decimal_macros::dec;

    #[test]
    fn view_carries_the_discounted_pricing() {
        let now = Utc::now();
        let session = CheckoutSession {
            id: Uuid::new_v4(),
            user_id: "user-1".into(),
            selection: PaymentSelection {
                tier_id: "tier-premium".into(),
                tier_name: "Premium".into(),
                amount: dec!(10.00),
                currency: "USD".into(),
                billing_cycle: BillingCycle::Monthly,
                grade_id: None,
                subject_ids: None,
            },
            step: CheckoutStep::SelectMethod,
            selected_method: None,
            coupon: Some(CouponApplication::compute("SAVE20", dec!(20), dec!(10.00))),
            status: CheckoutStatus::Open,
            created_at: now,
            updated_at: now,
            expires_at: now + chrono::Duration::minutes(30),
        };

        let view: CheckoutSessionView = session.into();
        assert_eq!(view.pricing.original_amount, dec!(10.00));
        assert_eq!(view.pricing.discount_amount, dec!(2.00));
        assert_eq!(view.pricing.final_amount, dec!(8.00));
        assert_eq!(view.pricing.currency, "USD");
    }
}
