//! HTTP-level integration tests for game events and chat.

mod common;

use axum::http::StatusCode;
use common::{body_json, get, post_json, post_json_as};
use serde_json::json;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn published_events_are_returned_oldest_first() {
    let app = common::build_test_app();

    for n in 0..3 {
        let response = post_json_as(
            app.clone(),
            "/api/v1/games/g1/events",
            "u1",
            json!({ "event_type": "piece.moved", "board_id": "b1", "payload": { "n": n } }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert!(json["data"]["id"].is_string());
    }

    let json = body_json(get(app, "/api/v1/games/g1/events").await).await;
    let events = json["data"].as_array().unwrap();
    assert_eq!(events.len(), 3);
    let order: Vec<_> = events.iter().map(|e| e["payload"]["n"].as_i64().unwrap()).collect();
    assert_eq!(order, vec![0, 1, 2]);
    assert_eq!(events[0]["user_id"], "u1");
    assert_eq!(events[0]["board_id"], "b1");
}

#[tokio::test]
async fn limit_returns_most_recent() {
    let app = common::build_test_app();
    for n in 0..5 {
        post_json_as(
            app.clone(),
            "/api/v1/games/g1/events",
            "u1",
            json!({ "event_type": "tick", "payload": { "n": n } }),
        )
        .await;
    }

    let json = body_json(get(app, "/api/v1/games/g1/events?limit=2").await).await;
    let order: Vec<_> = json["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["payload"]["n"].as_i64().unwrap())
        .collect();
    assert_eq!(order, vec![3, 4]);
}

#[tokio::test]
async fn bulk_publish_reports_every_event() {
    let app = common::build_test_app();
    let response = post_json_as(
        app.clone(),
        "/api/v1/games/g1/events/bulk",
        "u1",
        json!({ "events": [
            { "event_type": "a" },
            { "event_type": "b" },
        ] }),
    )
    .await;

    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["published"].as_array().unwrap().len(), 2);
    assert!(json["data"]["failed"].as_array().unwrap().is_empty());

    let stats = body_json(get(app, "/api/v1/games/g1/stats").await).await;
    assert_eq!(stats["data"]["total_events"], 2);
}

#[tokio::test]
async fn empty_bulk_publish_returns_400() {
    let app = common::build_test_app();
    let response = post_json_as(app, "/api/v1/games/g1/events/bulk", "u1", json!({ "events": [] })).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn publish_without_identity_returns_401() {
    let app = common::build_test_app();
    let response = post_json(app, "/api/v1/games/g1/events", json!({ "event_type": "x" })).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[tokio::test]
async fn chat_history_and_stats() {
    let app = common::build_test_app();
    post_json_as(app.clone(), "/api/v1/games/g1/chat", "u1", json!({ "message": "hello" })).await;
    post_json_as(
        app.clone(),
        "/api/v1/games/g1/chat",
        "u2",
        json!({ "message": "waves", "type": "emote" }),
    )
    .await;

    let json = body_json(get(app.clone(), "/api/v1/games/g1/chat").await).await;
    let history = json["data"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["message"], "hello");
    assert_eq!(history[0]["type"], "text");
    assert_eq!(history[1]["type"], "emote");

    let stats = body_json(get(app, "/api/v1/games/g1/stats").await).await;
    assert_eq!(stats["data"]["total_messages"], 2);
    assert_eq!(stats["data"]["total_events"], 0);
}

#[tokio::test]
async fn participants_cannot_post_system_messages() {
    let app = common::build_test_app();
    post_json_as(
        app.clone(),
        "/api/v1/games/g1/chat",
        "u1",
        json!({ "message": "I am the system", "type": "system" }),
    )
    .await;

    let json = body_json(get(app, "/api/v1/games/g1/chat").await).await;
    assert_eq!(json["data"][0]["type"], "text");
    assert_eq!(json["data"][0]["user_id"], "u1");
}

#[tokio::test]
async fn empty_chat_message_returns_400() {
    let app = common::build_test_app();
    let response = post_json_as(app, "/api/v1/games/g1/chat", "u1", json!({ "message": "  " })).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn announcement_is_system_authored() {
    let app = common::build_test_app();
    let response = post_json_as(
        app.clone(),
        "/api/v1/games/g1/announcements",
        "mod1",
        json!({ "text": "Round two begins" }),
    )
    .await;
    assert_eq!(body_json(response).await["success"], true);

    let json = body_json(get(app, "/api/v1/games/g1/chat").await).await;
    let line = &json["data"][0];
    assert_eq!(line["type"], "system");
    assert_eq!(line["message"], "Round two begins");
    assert_eq!(line["metadata"]["announced_by"], "mod1");
}
