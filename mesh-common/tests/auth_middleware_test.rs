mod common;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    middleware::from_fn_with_state,
    routing::get,
};
use common::TokenHarness;
use http_body_util::BodyExt;
use mesh_common::auth::{
    AuthUser, CurrentIdentity, OptionalAuth, RequiredAuth, TokenService, authenticate,
};
use std::time::Duration;
use tower::ServiceExt;

async fn whoami(AuthUser(claims): AuthUser) -> String {
    claims.user_id.to_string()
}

async fn greeting(CurrentIdentity(identity): CurrentIdentity) -> String {
    match identity.user_id() {
        Some(id) => format!("hello {}", id),
        None => "hello anonymous".to_string(),
    }
}

fn required_app(tokens: TokenService) -> Router {
    Router::new()
        .route("/me", get(whoami))
        .layer(from_fn_with_state(
            RequiredAuth::new(tokens),
            authenticate::<RequiredAuth>,
        ))
}

fn optional_app(tokens: TokenService) -> Router {
    Router::new()
        .route("/greeting", get(greeting))
        .layer(from_fn_with_state(
            OptionalAuth::new(tokens),
            authenticate::<OptionalAuth>,
        ))
}

fn request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn missing_token_gets_401_with_challenge() {
    let harness = TokenHarness::new();

    let response = required_app(harness.tokens.clone())
        .oneshot(request("/me", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
        r#"Bearer realm="Authentication Required""#
    );
    let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["error"], "authentication required");
}

#[tokio::test]
async fn valid_token_reaches_the_handler() {
    let harness = TokenHarness::new();
    let token = harness.tokens.issue(42, Duration::from_secs(60)).unwrap();

    let response = required_app(harness.tokens.clone())
        .oneshot(request("/me", Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "42");
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let harness = TokenHarness::new();
    let token = harness.tokens.issue(42, Duration::from_secs(60)).unwrap();
    harness.advance_secs(61);

    let response = required_app(harness.tokens.clone())
        .oneshot(request("/me", Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn optional_auth_lets_anonymous_callers_through() {
    let harness = TokenHarness::new();

    let response = optional_app(harness.tokens.clone())
        .oneshot(request("/greeting", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "hello anonymous");
}

#[tokio::test]
async fn optional_auth_identifies_token_holders() {
    let harness = TokenHarness::new();
    let token = harness.tokens.issue(7, Duration::from_secs(60)).unwrap();

    let response = optional_app(harness.tokens.clone())
        .oneshot(request("/greeting", Some(&token)))
        .await
        .unwrap();

    assert_eq!(body_text(response).await, "hello 7");
}

#[tokio::test]
async fn optional_auth_rejects_garbage_tokens() {
    let harness = TokenHarness::new();

    let response = optional_app(harness.tokens.clone())
        .oneshot(request("/greeting", Some("garbage")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
