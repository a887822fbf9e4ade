//! Integration tests for the guided tour flow.
//!
//! Tests cover:
//! - Start guards: signed-in user, known view, completion flag, account age
//! - Walkthrough navigation and completion persistence
//! - Skip versus close semantics
//! - Tooltip placement, inline with hints and via the standalone endpoint

mod common;

use axum::http::Method;
use chrono::{Duration, Utc};
use common::{body_json, TestApp};
use serde_json::{json, Value};

const USER: &str = "student-7";
const VIEW: &str = "dashboard";

fn geometry() -> Value {
    json!({
        "viewport": { "width": 1280.0, "height": 800.0 },
        "tooltip": { "width": 300.0, "height": 150.0 }
    })
}

fn step_body(geometry: Option<Value>) -> Value {
    let mut body = json!({ "user_id": USER, "view": VIEW });
    if let Some(geometry) = geometry {
        body["geometry"] = geometry;
    }
    body
}

async fn seed_fresh_account(app: &TestApp) {
    app.backend
        .seed_account(USER, Utc::now() - Duration::days(2))
        .await;
}

async fn start(app: &TestApp, body: Value) -> Value {
    let response = app.request(Method::POST, "/api/v1/tours/start", Some(body)).await;
    assert_eq!(response.status(), 200);
    body_json(response).await
}

async fn next(app: &TestApp) -> Value {
    let response = app
        .request(Method::POST, "/api/v1/tours/next", Some(step_body(None)))
        .await;
    assert_eq!(response.status(), 200);
    body_json(response).await
}

#[tokio::test]
async fn fresh_account_starts_the_dashboard_tour() {
    let app = TestApp::new().await;
    seed_fresh_account(&app).await;

    let body = start(&app, step_body(Some(geometry()))).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["tour_id"], "dashboard-intro");
    assert_eq!(body["data"]["status"], "showing");
    assert_eq!(body["data"]["hint_index"], 0);
    assert_eq!(body["data"]["hint_count"], 4);
    assert_eq!(body["data"]["start_delay_ms"], 1000);
    assert_eq!(body["data"]["hint"]["title"], "Welcome to ExamHub");
    // First hint is centered: (1280 - 300) / 2 and (800 - 150) / 2.
    assert_eq!(body["data"]["placement"]["left"], 490.0);
    assert_eq!(body["data"]["placement"]["top"], 325.0);
}

#[tokio::test]
async fn two_day_old_account_is_stale_under_a_day_window() {
    let mut cfg = common::test_config();
    cfg.tour_freshness_window_hours = 24;
    let app = TestApp::with_config(cfg).await;
    seed_fresh_account(&app).await;

    let body = start(&app, step_body(None)).await;
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn completed_tour_is_never_offered_again() {
    let app = TestApp::new().await;
    seed_fresh_account(&app).await;
    app.backend.seed_completed_tour(USER, VIEW).await;

    let body = start(&app, step_body(None)).await;
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn unknown_view_is_declined() {
    let app = TestApp::new().await;
    seed_fresh_account(&app).await;

    let body = start(&app, json!({ "user_id": USER, "view": "settings" })).await;
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn blank_user_is_declined() {
    let app = TestApp::new().await;
    let body = start(&app, json!({ "user_id": "   ", "view": VIEW })).await;
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn missing_account_record_declines_the_tour() {
    let app = TestApp::new().await;
    let body = start(&app, step_body(None)).await;
    assert!(body["data"].is_null());
}

#[tokio::test]
async fn full_walkthrough_persists_completion() {
    let app = TestApp::new().await;
    seed_fresh_account(&app).await;

    let body = start(&app, step_body(None)).await;
    assert_eq!(body["data"]["hint_index"], 0);
    assert!(body["data"]["placement"].is_null());

    for expected_index in 1..=3 {
        let body = next(&app).await;
        assert_eq!(body["data"]["status"], "showing");
        assert_eq!(body["data"]["hint_index"], expected_index);
    }

    // Next on the final hint completes the tour and drops the live state.
    let body = next(&app).await;
    assert_eq!(body["data"]["status"], "completed");
    assert!(body["data"]["hint"].is_null());
    assert!(app.backend.tour_completed(USER, VIEW).await);

    let body = start(&app, step_body(None)).await;
    assert!(body["data"].is_null());

    let response = app
        .request(Method::POST, "/api/v1/tours/next", Some(step_body(None)))
        .await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn previous_at_the_first_hint_stays_put() {
    let app = TestApp::new().await;
    seed_fresh_account(&app).await;
    start(&app, step_body(None)).await;

    let response = app
        .request(Method::POST, "/api/v1/tours/previous", Some(step_body(None)))
        .await;
    assert_eq!(response.status(), 200);
    let body = body_json(response).await;
    assert_eq!(body["data"]["status"], "showing");
    assert_eq!(body["data"]["hint_index"], 0);

    next(&app).await;
    let response = app
        .request(Method::POST, "/api/v1/tours/previous", Some(step_body(None)))
        .await;
    let body = body_json(response).await;
    assert_eq!(body["data"]["hint_index"], 0);
}

#[tokio::test]
async fn skip_persists_completion_from_the_current_hint() {
    let app = TestApp::new().await;
    seed_fresh_account(&app).await;
    start(&app, step_body(None)).await;
    next(&app).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/tours/skip",
            Some(json!({ "user_id": USER, "view": VIEW })),
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = body_json(response).await;
    assert_eq!(body["data"]["status"], "completed");
    assert_eq!(body["data"]["hint_index"], 1);
    assert!(app.backend.tour_completed(USER, VIEW).await);
}

#[tokio::test]
async fn close_discards_state_without_completing() {
    let app = TestApp::new().await;
    seed_fresh_account(&app).await;
    start(&app, step_body(None)).await;
    next(&app).await;

    let close_body = json!({ "user_id": USER, "view": VIEW });
    let response = app
        .request(Method::POST, "/api/v1/tours/close", Some(close_body.clone()))
        .await;
    assert_eq!(response.status(), 204);
    assert!(!app.backend.tour_completed(USER, VIEW).await);

    // The tour may offer itself again, from the top.
    let body = start(&app, step_body(None)).await;
    assert_eq!(body["data"]["hint_index"], 0);

    // Closing with no live tour is a harmless no-op.
    app.request(Method::POST, "/api/v1/tours/close", Some(close_body.clone()))
        .await;
    let response = app
        .request(Method::POST, "/api/v1/tours/close", Some(close_body))
        .await;
    assert_eq!(response.status(), 204);
}

#[tokio::test]
async fn placement_endpoint_applies_side_and_offsets() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/tours/placement",
            Some(json!({
                "hint": {
                    "target": "#past-papers",
                    "title": "Past papers",
                    "description": "Browse past exam papers by subject.",
                    "position": "right",
                    "offset_x": 12.0
                },
                "viewport": { "width": 1280.0, "height": 800.0 },
                "tooltip": { "width": 300.0, "height": 150.0 },
                "target": { "x": 200.0, "y": 250.0, "width": 100.0, "height": 60.0 }
            })),
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = body_json(response).await;
    // Right of the target plus the 10px gap plus the hint's own offset.
    assert_eq!(body["data"]["left"], 322.0);
    assert_eq!(body["data"]["top"], 205.0);
}

#[tokio::test]
async fn placement_without_a_measured_target_centers() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/tours/placement",
            Some(json!({
                "hint": {
                    "target": "#past-papers",
                    "title": "Past papers",
                    "description": "Browse past exam papers by subject.",
                    "position": "right"
                },
                "viewport": { "width": 1280.0, "height": 800.0 },
                "tooltip": { "width": 300.0, "height": 150.0 }
            })),
        )
        .await;
    assert_eq!(response.status(), 200);
    let body = body_json(response).await;
    assert_eq!(body["data"]["left"], 490.0);
    assert_eq!(body["data"]["top"], 325.0);
}
