use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::post,
    Router,
};
use serde::Deserialize;

use crate::errors::ServiceError;
use crate::models::Hint;
use crate::services::tooltip::{place_hint, Placement, Rect, Size};
use crate::services::tours::{TourGeometry, TourSnapshot};
use crate::{ApiResponse, ApiResult, AppState};

pub fn tour_routes() -> Router<AppState> {
    Router::new()
        .route("/start", post(start_tour))
        .route("/next", post(next_hint))
        .route("/previous", post(previous_hint))
        .route("/skip", post(skip_tour))
        .route("/close", post(close_tour))
        .route("/placement", post(compute_placement))
}

#[derive(Debug, Deserialize)]
pub struct TourStepRequest {
    pub user_id: String,
    pub view: String,
    /// Present when the client wants a tooltip placement with the hint.
    #[serde(default)]
    pub geometry: Option<TourGeometry>,
}

#[derive(Debug, Deserialize)]
pub struct TourActionRequest {
    pub user_id: String,
    pub view: String,
}

#[derive(Debug, Deserialize)]
pub struct PlacementRequest {
    pub hint: Hint,
    pub viewport: Size,
    pub tooltip: Size,
    #[serde(default)]
    pub target: Option<Rect>,
}

/// Starts the view's tour when the user qualifies; `data` is null when the
/// guards decline, which is the common case and not an error.
async fn start_tour(
    State(state): State<AppState>,
    Json(request): Json<TourStepRequest>,
) -> ApiResult<Option<TourSnapshot>> {
    let snapshot = state
        .services
        .tours
        .start(&request.user_id, &request.view, request.geometry.as_ref())
        .await?;
    Ok(Json(ApiResponse::success(snapshot)))
}

async fn next_hint(
    State(state): State<AppState>,
    Json(request): Json<TourStepRequest>,
) -> ApiResult<TourSnapshot> {
    let snapshot = state
        .services
        .tours
        .next(&request.user_id, &request.view, request.geometry.as_ref())
        .await?;
    Ok(Json(ApiResponse::success(snapshot)))
}

async fn previous_hint(
    State(state): State<AppState>,
    Json(request): Json<TourStepRequest>,
) -> ApiResult<TourSnapshot> {
    let snapshot = state
        .services
        .tours
        .previous(&request.user_id, &request.view, request.geometry.as_ref())
        .await?;
    Ok(Json(ApiResponse::success(snapshot)))
}

async fn skip_tour(
    State(state): State<AppState>,
    Json(request): Json<TourActionRequest>,
) -> ApiResult<TourSnapshot> {
    let snapshot = state
        .services
        .tours
        .skip(&request.user_id, &request.view)
        .await?;
    Ok(Json(ApiResponse::success(snapshot)))
}

async fn close_tour(
    State(state): State<AppState>,
    Json(request): Json<TourActionRequest>,
) -> Result<StatusCode, ServiceError> {
    state
        .services
        .tours
        .close(&request.user_id, &request.view)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Stateless placement computation for a hint the client is re-rendering,
/// e.g. after a window resize.
async fn compute_placement(Json(request): Json<PlacementRequest>) -> ApiResult<Placement> {
    let placement = place_hint(
        &request.hint,
        request.viewport,
        request.tooltip,
        request.target,
    );
    Ok(Json(ApiResponse::success(placement)))
}
