//! HTTP-level integration tests for session start.

mod common;

use axum::http::StatusCode;
use common::{body_json, get, post_json_as};
use serde_json::json;
use tabletop_api::session::{session_lock_id, SESSION_SETUP_JOB, SESSION_STARTED_EVENT};
use tabletop_coordination::LockOptions;

#[tokio::test]
async fn start_session_composes_every_service() {
    let app = common::build_test_app();

    let response = post_json_as(
        app.clone(),
        "/api/v1/games/g1/session/start",
        "host1",
        json!({ "board_id": "b1" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    let start = &json["data"];
    assert_eq!(start["game_id"], "g1");
    assert_eq!(start["started_by"], "host1");
    assert_eq!(start["presence_registered"], true);

    // Host presence.
    let roster = body_json(get(app.clone(), "/api/v1/boards/b1/presence").await).await;
    assert_eq!(roster["data"]["host1"]["role"], "host");

    // Started event.
    let events = body_json(get(app.clone(), "/api/v1/games/g1/events").await).await;
    assert_eq!(events["data"][0]["event_type"], SESSION_STARTED_EVENT);
    assert_eq!(events["data"][0]["id"], start["event_id"]);

    // Setup job.
    let job_id = start["setup_job_id"].as_str().unwrap();
    let job = body_json(get(app.clone(), &format!("/api/v1/jobs/{job_id}")).await).await;
    assert_eq!(job["data"]["job_type"], SESSION_SETUP_JOB);
    assert_eq!(job["data"]["payload"]["board_id"], "b1");

    // Lock released afterwards.
    let lock = body_json(get(app, "/api/v1/locks/session:g1").await).await;
    assert_eq!(lock["data"]["exists"], false);
}

#[tokio::test]
async fn board_defaults_to_game_id() {
    let app = common::build_test_app();
    let response = post_json_as(app, "/api/v1/games/g2/session/start", "host1", json!({})).await;

    let json = body_json(response).await;
    assert_eq!(json["data"]["board_id"], "g2");
}

#[tokio::test]
async fn concurrent_start_returns_409() {
    let (app, state) = common::build_test_app_with_state();

    // Another starter is mid-initialization.
    let held = state
        .locks
        .acquire_lock(&session_lock_id("g1"), "other-starter", &LockOptions::with_lease(10_000))
        .await
        .unwrap();
    assert!(held.acquired);

    let response = post_json_as(app.clone(), "/api/v1/games/g1/session/start", "host1", json!({})).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "SESSION_INITIALIZING");

    // Nothing was published or enqueued by the losing caller.
    let events = body_json(get(app, "/api/v1/games/g1/events").await).await;
    assert!(events["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn racing_starts_yield_one_winner_per_round() {
    let app = common::build_test_app();

    let mut handles = Vec::new();
    for n in 0..8 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            post_json_as(app, "/api/v1/games/g3/session/start", &format!("host{n}"), json!({}))
                .await
                .status()
        }));
    }

    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::OK => ok += 1,
            StatusCode::CONFLICT => {}
            other => panic!("unexpected status {other}"),
        }
    }
    assert!(ok >= 1);

    // Every successful start published exactly one event.
    let events = body_json(get(app, "/api/v1/games/g3/events").await).await;
    assert_eq!(events["data"].as_array().unwrap().len(), ok);
}
