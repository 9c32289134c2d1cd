//! HTTP-level integration tests for the job queue.

mod common;

use axum::http::StatusCode;
use common::{body_json, get, post_as, post_json_as};
use serde_json::json;

async fn enqueue(app: axum::Router, queue: &str, body: serde_json::Value) -> String {
    let response = post_json_as(app, &format!("/api/v1/queues/{queue}/jobs"), "producer", body).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    json["data"]["job_id"].as_str().unwrap().to_string()
}

async fn claim(app: axum::Router, queue: &str) -> serde_json::Value {
    let response = post_as(app, &format!("/api/v1/queues/{queue}/next"), "consumer").await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn jobs_are_claimed_by_priority() {
    let app = common::build_test_app();
    for priority in [2, 8, 5] {
        enqueue(
            app.clone(),
            "render",
            json!({ "job_type": "render.map", "payload": { "p": priority }, "priority": priority }),
        )
        .await;
    }

    let mut order = Vec::new();
    for _ in 0..3 {
        let json = claim(app.clone(), "render").await;
        assert_eq!(json["success"], true);
        order.push(json["data"]["priority"].as_i64().unwrap());
    }
    assert_eq!(order, vec![8, 5, 2]);

    let empty = claim(app, "render").await;
    assert_eq!(empty["success"], false);
    assert!(empty["data"].is_null());
}

#[tokio::test]
async fn delayed_job_is_not_claimable_yet() {
    let app = common::build_test_app();
    enqueue(
        app.clone(),
        "later",
        json!({ "job_type": "reminder", "delay_ms": 60000 }),
    )
    .await;

    let json = claim(app.clone(), "later").await;
    assert_eq!(json["success"], false);

    let stats = body_json(get(app, "/api/v1/queues/later/stats").await).await;
    assert_eq!(stats["data"]["delayed"], 1);
    assert_eq!(stats["data"]["waiting"], 0);
}

// ---------------------------------------------------------------------------
// Settling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn complete_records_result() {
    let app = common::build_test_app();
    let id = enqueue(app.clone(), "q", json!({ "job_type": "score" })).await;
    claim(app.clone(), "q").await;

    let response = post_json_as(
        app.clone(),
        &format!("/api/v1/jobs/{id}/complete"),
        "consumer",
        json!({ "result": { "points": 12 } }),
    )
    .await;
    assert_eq!(body_json(response).await["data"]["completed"], true);

    let job = body_json(get(app.clone(), &format!("/api/v1/jobs/{id}")).await).await;
    assert_eq!(job["data"]["status"], "completed");
    assert_eq!(job["data"]["result"]["points"], 12);

    // Settling twice is refused.
    let response = post_json_as(app, &format!("/api/v1/jobs/{id}/complete"), "consumer", json!({})).await;
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["data"]["completed"], false);
}

#[tokio::test]
async fn final_failure_dead_letters_job() {
    let app = common::build_test_app();
    let id = enqueue(app.clone(), "q", json!({ "job_type": "flaky", "max_attempts": 1 })).await;
    claim(app.clone(), "q").await;

    let response = post_json_as(
        app.clone(),
        &format!("/api/v1/jobs/{id}/fail"),
        "consumer",
        json!({ "reason": "upstream timeout" }),
    )
    .await;
    let json = body_json(response).await;
    assert_eq!(json["data"]["failed"], true);
    assert_eq!(json["data"]["will_retry"], false);

    let job = body_json(get(app.clone(), &format!("/api/v1/jobs/{id}")).await).await;
    assert_eq!(job["data"]["status"], "failed");
    assert_eq!(job["data"]["last_error"], "upstream timeout");

    let stats = body_json(get(app, "/api/v1/queues/q/stats").await).await;
    assert_eq!(stats["data"]["failed"], 1);
    assert_eq!(stats["data"]["active"], 0);
}

#[tokio::test]
async fn failure_with_attempts_left_schedules_retry() {
    let app = common::build_test_app();
    let id = enqueue(app.clone(), "q", json!({ "job_type": "flaky", "max_attempts": 3 })).await;
    claim(app.clone(), "q").await;

    let response = post_json_as(
        app.clone(),
        &format!("/api/v1/jobs/{id}/fail"),
        "consumer",
        json!({ "reason": "try again" }),
    )
    .await;
    let json = body_json(response).await;
    assert_eq!(json["data"]["will_retry"], true);
    assert_eq!(json["data"]["attempts"], 1);
    assert!(json["data"]["next_attempt_at"].is_string());

    let job = body_json(get(app, &format!("/api/v1/jobs/{id}")).await).await;
    assert_eq!(job["data"]["status"], "pending");
}

// ---------------------------------------------------------------------------
// Request errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_job_returns_404() {
    let app = common::build_test_app();
    let response = get(app, "/api/v1/jobs/does-not-exist").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn max_attempts_out_of_range_returns_400() {
    let app = common::build_test_app();
    let response = post_json_as(
        app,
        "/api/v1/queues/q/jobs",
        "producer",
        json!({ "job_type": "x", "max_attempts": 0 }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
