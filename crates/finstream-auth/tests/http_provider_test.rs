//! HTTP token provider tests against a mock auth server.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use finstream_auth::{AuthClient, AuthClientError, Credentials, HttpTokenProvider};
use finstream_core::Token;
use finstream_ws::{AuthError, TokenProvider};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Calls {
    login: AtomicUsize,
    refresh: AtomicUsize,
}

#[derive(Deserialize)]
struct LoginBody {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct RefreshBody {
    refresh_token: String,
}

fn tokens(access: &str, refresh: &str) -> Response {
    Json(json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "bearer",
        "expires_in": 1800,
    }))
    .into_response()
}

async fn login(State(calls): State<Arc<Calls>>, Json(body): Json<LoginBody>) -> Response {
    calls.login.fetch_add(1, Ordering::SeqCst);
    if body.username == "demo" && body.password == "demo123" {
        tokens("access-login", "refresh-1")
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": "Incorrect username or password"})),
        )
            .into_response()
    }
}

async fn refresh(State(calls): State<Arc<Calls>>, Json(body): Json<RefreshBody>) -> Response {
    calls.refresh.fetch_add(1, Ordering::SeqCst);
    if body.refresh_token == "refresh-1" {
        tokens("access-refreshed", "refresh-2")
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Invalid refresh token"})),
        )
            .into_response()
    }
}

/// Start the mock auth server, returning its base URL.
async fn start_server() -> (String, Arc<Calls>) {
    let calls = Arc::new(Calls::default());
    let app = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .with_state(calls.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (format!("http://{addr}"), calls)
}

#[tokio::test]
async fn test_login_success() {
    let (url, calls) = start_server().await;
    let client = AuthClient::new(url).unwrap();

    let response = client.login("demo", "demo123").await.unwrap();
    assert_eq!(response.access_token, "access-login");
    assert_eq!(response.refresh_token, "refresh-1");
    assert_eq!(response.expires_in, 1800);
    assert_eq!(calls.login.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_login_bad_credentials_is_rejected() {
    let (url, _calls) = start_server().await;
    let client = AuthClient::new(url).unwrap();

    match client.login("demo", "wrong").await {
        Err(AuthClientError::Rejected { status, detail }) => {
            assert_eq!(status, 400);
            assert_eq!(detail, "Incorrect username or password");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_refresh_publishes_new_token() {
    let (url, calls) = start_server().await;
    let provider = HttpTokenProvider::new(AuthClient::new(url).unwrap())
        .with_tokens(Some(Token::new("access-old")), Some("refresh-1".to_string()));
    let mut changes = provider.changes();

    let token = provider.refresh().await.unwrap();
    assert_eq!(token, Token::new("access-refreshed"));
    assert_eq!(provider.current(), Some(token.clone()));

    assert!(changes.has_changed().unwrap());
    assert_eq!(changes.borrow_and_update().clone(), Some(token));
    assert_eq!(calls.refresh.load(Ordering::SeqCst), 1);
    assert_eq!(calls.login.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rejected_refresh_falls_back_to_login() {
    let (url, calls) = start_server().await;
    let provider = HttpTokenProvider::new(AuthClient::new(url).unwrap())
        .with_tokens(None, Some("revoked".to_string()))
        .with_credentials(Credentials::new("demo", "demo123"));

    let token = provider.refresh().await.unwrap();
    assert_eq!(token, Token::new("access-login"));
    assert_eq!(calls.refresh.load(Ordering::SeqCst), 1);
    assert_eq!(calls.login.load(Ordering::SeqCst), 1);

    // The stored refresh token is now the fresh one.
    let token = provider.refresh().await.unwrap();
    assert_eq!(token, Token::new("access-refreshed"));
}

#[tokio::test]
async fn test_rejected_refresh_without_credentials() {
    let (url, calls) = start_server().await;
    let provider = HttpTokenProvider::new(AuthClient::new(url).unwrap())
        .with_tokens(Some(Token::new("access-old")), Some("revoked".to_string()));

    assert_eq!(
        provider.refresh().await,
        Err(AuthError::Rejected("Invalid refresh token".to_string()))
    );
    assert_eq!(calls.login.load(Ordering::SeqCst), 0);
    assert_eq!(provider.current(), Some(Token::new("access-old")));
}

#[tokio::test]
async fn test_unreachable_server_is_refresh_failure() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let provider = HttpTokenProvider::new(AuthClient::new(format!("http://{addr}")).unwrap())
        .with_tokens(None, Some("refresh-1".to_string()));
    assert!(matches!(
        provider.refresh().await,
        Err(AuthError::RefreshFailed(_))
    ));
}

#[tokio::test]
async fn test_explicit_login() {
    let (url, _calls) = start_server().await;
    let provider = HttpTokenProvider::new(AuthClient::new(url).unwrap())
        .with_credentials(Credentials::new("demo", "demo123"));

    assert_eq!(provider.current(), None);
    let token = provider.login().await.unwrap();
    assert_eq!(provider.current(), Some(token));
}
