//! Integration tests for token exchange and refresh

use serde_json::json;
use wiremock::matchers::{body_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use nodemirror_core::config::AuthConfig;
use nodemirror_core::domain::MirrorError;
use nodemirror_core::ports::IAuthProvider;
use nodemirror_remote::OAuthAdapter;

use crate::common;

fn code_flow(server: &MockServer) -> OAuthAdapter {
    let config = AuthConfig {
        client_id: Some("client-123".to_string()),
        client_secret: Some("secret".to_string()),
        token_url: format!("{}/token", server.uri()),
        ..AuthConfig::default()
    };
    OAuthAdapter::new(&config, common::fast_client()).unwrap()
}

fn helper(server: &MockServer) -> OAuthAdapter {
    let config = AuthConfig {
        helper_refresh_url: format!("{}/refresh", server.uri()),
        ..AuthConfig::default()
    };
    OAuthAdapter::new(&config, common::fast_client()).unwrap()
}

#[tokio::test]
async fn test_code_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-1",
            "refresh_token": "refresh-1",
            "token_type": "bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tokens = code_flow(&server).exchange_code("abc").await.unwrap();

    assert_eq!(tokens.access_token, "access-1");
    assert_eq!(tokens.refresh_token.as_deref(), Some("refresh-1"));
    assert_eq!(tokens.expires_in, 3600);
}

#[tokio::test]
async fn test_rejected_refresh_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "The refresh token is invalid"
        })))
        .mount(&server)
        .await;

    let err = code_flow(&server).refresh("stale").await.unwrap_err();
    assert!(err.is_auth());
}

#[tokio::test]
async fn test_helper_refresh_posts_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/refresh"))
        .and(body_json(json!({"refresh_token": "refresh-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-2",
            "token_type": "bearer",
            "expires_in": 1800
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tokens = helper(&server).refresh("refresh-1").await.unwrap();

    assert_eq!(tokens.access_token, "access-2");
    assert_eq!(tokens.expires_in, 1800);
    assert!(tokens.refresh_token.is_none());
}

#[tokio::test]
async fn test_helper_rejection_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/refresh"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "bad token"})))
        .mount(&server)
        .await;

    let err = helper(&server).refresh("refresh-1").await.unwrap_err();
    assert!(err.is_auth());
}

#[tokio::test]
async fn test_code_exchange_refuses_absurd_lifetime() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-1",
            "token_type": "bearer",
            "expires_in": 10_000_000_000_000_u64
        })))
        .mount(&server)
        .await;

    let err = code_flow(&server).exchange_code("abc").await.unwrap_err();
    assert!(matches!(err, MirrorError::Protocol(_)), "got {err:?}");
}

#[tokio::test]
async fn test_helper_refresh_refuses_negative_lifetime() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-2",
            "expires_in": -10_000_000_000_000_i64
        })))
        .mount(&server)
        .await;

    let err = helper(&server).refresh("refresh-1").await.unwrap_err();
    assert!(matches!(err, MirrorError::Protocol(_)), "got {err:?}");
}
