mod common;

use axum::http::{Method, StatusCode};
use common::board_http::{bare_request, create_test_app, extract_json, TEST_KEY};
use common::setup_temp_dir;
use tower::ServiceExt;

// A plain GET to /ws never completes the upgrade, which is exactly how the
// rejection paths present themselves to ordinary HTTP clients.

#[tokio::test]
async fn handshake_without_a_key_is_diagnosed() {
    let dir = setup_temp_dir();
    let (app, _state) = create_test_app(dir.path()).await;

    let response = app.oneshot(bare_request(Method::GET, "/ws")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = extract_json(response).await;
    assert_eq!(body["type"], "handshake-error");
    assert_eq!(body["reason"], "missing_key");
    assert!(body["message"].as_str().unwrap().contains("key"));
}

#[tokio::test]
async fn handshake_with_the_wrong_key_is_diagnosed() {
    let dir = setup_temp_dir();
    let (app, _state) = create_test_app(dir.path()).await;

    let response = app
        .oneshot(bare_request(Method::GET, "/ws?key=wrong"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = extract_json(response).await;
    assert_eq!(body["type"], "handshake-error");
    assert_eq!(body["reason"], "invalid_key");
}

#[tokio::test]
async fn valid_key_without_an_upgrade_is_malformed() {
    let dir = setup_temp_dir();
    let (app, _state) = create_test_app(dir.path()).await;

    let response = app
        .oneshot(bare_request(Method::GET, &format!("/ws?key={TEST_KEY}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = extract_json(response).await;
    assert_eq!(body["type"], "handshake-error");
    assert_eq!(body["reason"], "malformed_request");
}
