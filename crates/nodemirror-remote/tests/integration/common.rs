//! Shared helpers for the remote integration tests
//!
//! Every helper points the adapters at a wiremock server. Discovery answers
//! with `{server}/meta/` and `{server}/content/` endpoints.

use std::time::Duration;

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use nodemirror_core::config::RemoteConfig;
use nodemirror_core::domain::Endpoints;
use nodemirror_core::ports::AuthHandle;
use nodemirror_core::retry::RetryPolicy;
use nodemirror_remote::{RemoteClient, RemoteNodeService};

pub const TOKEN: &str = "test-access-token";

/// Client with millisecond backoff so retry tests stay fast
pub fn fast_client() -> RemoteClient {
    RemoteClient::new(&RemoteConfig::default())
        .expect("client")
        .with_retry_policy(RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        })
}

/// Starts a mock server and a service whose discovery URL points at it
pub async fn setup_service() -> (MockServer, RemoteNodeService) {
    let server = MockServer::start().await;
    let service = RemoteNodeService::new(fast_client(), format!("{}/endpoint", server.uri()));
    (server, service)
}

/// Handle whose endpoints point at the mock server
pub fn handle(server: &MockServer) -> AuthHandle {
    AuthHandle {
        token_type: "bearer".to_string(),
        access_token: TOKEN.to_string(),
        endpoints: Endpoints::new(
            format!("{}/meta/", server.uri()),
            format!("{}/content/", server.uri()),
        ),
    }
}

/// Mounts the endpoint-discovery answer
pub async fn mount_discovery(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/endpoint"))
        .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "customerExists": true,
            "metadataUrl": format!("{}/meta/", server.uri()),
            "contentUrl": format!("{}/content/", server.uri()),
        })))
        .mount(server)
        .await;
}

/// Joins JSON records into a newline-delimited body
pub fn ndjson(parts: &[serde_json::Value]) -> String {
    parts
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}
