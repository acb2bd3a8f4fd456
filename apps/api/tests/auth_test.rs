//! Integration tests for control token authentication
//!
//! Covers the request side and the bind side:
//! - Missing token (401), wrong token (403)
//! - Bearer, `X-Control-Token` and `?token=` presentation
//! - Tokens required but none configured (503 `auth_not_configured`)
//! - Refusing a non-loopback bind without tokens, before any socket opens

mod common;

use std::time::Duration;

use axum::http::{Method, StatusCode};
use common::*;
use librarian_api::{AuthPolicy, ControlServer};
use librarian_shared_config::ControlConfig;
use serde_json::json;

#[tokio::test]
async fn test_missing_token_returns_401() {
    let app = TestApp::with_token();

    let (status, body) = get(&app.router(), "/status").await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_wrong_token_returns_403() {
    let app = TestApp::with_token();

    let request = bearer(request(Method::GET, "/status", None), "not-the-token");
    let (status, body) = send(&app.router(), request).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_rejected_request_does_not_enqueue() {
    let app = TestApp::with_token();

    let (status, _) = post(
        &app.router(),
        "/enqueue",
        json!({ "args": ["Library", "noop"] }),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(app.daemon.registry().is_empty());
}

#[tokio::test]
async fn test_bearer_token_accepted() {
    let app = TestApp::with_token();

    let request = bearer(request(Method::GET, "/status", None), TEST_TOKEN);
    let (status, _) = send(&app.router(), request).await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_header_token_accepted() {
    let app = TestApp::with_token();

    let mut request = request(Method::GET, "/status", None);
    request
        .headers_mut()
        .insert("x-control-token", TEST_TOKEN.parse().unwrap());
    let (status, _) = send(&app.router(), request).await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_query_token_accepted() {
    let app = TestApp::with_token();

    let uri = format!("/status?token={}", TEST_TOKEN);
    let (status, _) = get(&app.router(), &uri).await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unconfigured_auth_returns_503() {
    let app = TestApp::build(AuthPolicy::Unconfigured);

    let request = bearer(request(Method::GET, "/status", None), TEST_TOKEN);
    let (status, body) = send(&app.router(), request).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "auth_not_configured");
}

#[tokio::test]
async fn test_open_policy_needs_no_token() {
    let app = TestApp::open();

    let (status, _) = get(&app.router(), "/status").await;

    assert_eq!(status, StatusCode::OK);
}

/// A port that was free a moment ago
fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::test]
async fn test_public_bind_without_tokens_is_refused() {
    let app = TestApp::open();
    let port = free_port();
    let config = ControlConfig {
        bind_address: "0.0.0.0".to_string(),
        port,
        ..ControlConfig::default()
    };

    let err = ControlServer::bind(&config, app.state.clone())
        .await
        .err()
        .expect("bind should be refused");
    assert!(err.to_string().starts_with("Authentication required"));

    // Nothing was left listening on the port
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await;
    assert!(listener.is_ok());
}

#[tokio::test]
async fn test_public_bind_with_tokens_is_allowed() {
    let app = TestApp::with_token();
    let config = ControlConfig {
        bind_address: "0.0.0.0".to_string(),
        port: 0,
        api_tokens: vec![TEST_TOKEN.to_string()],
        ..ControlConfig::default()
    };

    let server = ControlServer::bind(&config, app.state.clone()).await.unwrap();

    assert_ne!(server.local_addr().unwrap().port(), 0);
}

#[tokio::test]
async fn test_server_stops_with_daemon() {
    let app = TestApp::open();
    let server = ControlServer::bind(&ControlConfig::local(0), app.state.clone())
        .await
        .unwrap();
    let serving = tokio::spawn(server.serve());

    app.daemon.shutdown().await;

    let result = tokio::time::timeout(Duration::from_secs(5), serving)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok());
}
