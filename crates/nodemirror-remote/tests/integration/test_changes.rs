//! Integration tests for endpoint discovery and the change feed

use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, ResponseTemplate};

use nodemirror_core::config::RemoteConfig;
use nodemirror_core::domain::{Checkpoint, Endpoints, MirrorError, NodeStatus, TokenBundle};
use nodemirror_core::ports::{AuthHandle, ChangeRequest, IRemoteService};
use nodemirror_remote::{RemoteClient, RemoteNodeService};

use crate::common;

#[tokio::test]
async fn test_discover_endpoints() {
    let (server, service) = common::setup_service().await;
    common::mount_discovery(&server).await;

    let tokens = TokenBundle::new("bearer", common::TOKEN, None, 3600, chrono::Utc::now());
    let endpoints = service.discover_endpoints(&tokens).await.unwrap();

    assert_eq!(endpoints.metadata_url, format!("{}/meta/", server.uri()));
    assert_eq!(endpoints.content_url, format!("{}/content/", server.uri()));
}

#[tokio::test]
async fn test_discovery_without_urls_is_protocol_error() {
    let (server, service) = common::setup_service().await;
    Mock::given(method("GET"))
        .and(path("/endpoint"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"customerExists": false})))
        .mount(&server)
        .await;

    let tokens = TokenBundle::new("bearer", common::TOKEN, None, 3600, chrono::Utc::now());
    let err = service.discover_endpoints(&tokens).await.unwrap_err();
    assert!(matches!(err, MirrorError::Protocol(_)));
}

#[tokio::test]
async fn test_first_page_sends_empty_body() {
    let (server, service) = common::setup_service().await;
    let body = common::ndjson(&[
        json!({"checkpoint": "c1", "reset": true, "nodes": [
            {"id": "r", "isRoot": true, "kind": "FOLDER"},
            {"id": "f1", "name": "Docs", "kind": "FOLDER", "parents": ["r"]},
        ]}),
        json!({"end": true}),
    ]);
    Mock::given(method("POST"))
        .and(path("/meta/changes"))
        .and(header("authorization", "Bearer test-access-token"))
        .and(body_json(json!({})))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&server)
        .await;

    let parts = service
        .fetch_changes(&common::handle(&server), &ChangeRequest::resuming_from(None))
        .await
        .unwrap();

    assert_eq!(parts.len(), 2);
    assert!(parts[0].reset);
    assert_eq!(parts[0].checkpoint.as_ref().unwrap().as_str(), "c1");
    assert_eq!(parts[0].nodes.as_ref().unwrap().len(), 2);
    assert!(parts[1].end);
}

#[tokio::test]
async fn test_resuming_page_sends_checkpoint_and_include_purged() {
    let (server, service) = common::setup_service().await;
    let body = common::ndjson(&[
        json!({"nodes": [{"id": "n1", "status": "PURGED"}]}),
        json!({"nodes": [], "checkpoint": "c2"}),
    ]);
    Mock::given(method("POST"))
        .and(path("/meta/changes"))
        .and(body_json(json!({"checkpoint": "c1", "includePurged": "true"})))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&server)
        .await;

    let request = ChangeRequest::resuming_from(Some(Checkpoint::new("c1").unwrap()));
    let parts = service
        .fetch_changes(&common::handle(&server), &request)
        .await
        .unwrap();

    assert_eq!(
        parts[0].nodes.as_ref().unwrap()[0].status(),
        NodeStatus::Purged
    );
    assert!(parts[1].is_drained());
    assert_eq!(parts[1].checkpoint.as_ref().unwrap().as_str(), "c2");
}

#[tokio::test]
async fn test_change_feed_401_is_auth_error() {
    let (server, service) = common::setup_service().await;
    Mock::given(method("POST"))
        .and(path("/meta/changes"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "Token has expired"})))
        .expect(1)
        .mount(&server)
        .await;

    let err = service
        .fetch_changes(&common::handle(&server), &ChangeRequest::default())
        .await
        .unwrap_err();
    assert!(err.is_auth());
}

#[tokio::test]
async fn test_change_feed_is_not_retried_on_server_error() {
    let (server, service) = common::setup_service().await;
    Mock::given(method("POST"))
        .and(path("/meta/changes"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let err = service
        .fetch_changes(&common::handle(&server), &ChangeRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, MirrorError::Remote { status: 503, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_empty_change_feed_body_is_protocol_error() {
    let (server, service) = common::setup_service().await;
    Mock::given(method("POST"))
        .and(path("/meta/changes"))
        .respond_with(ResponseTemplate::new(200).set_body_string(""))
        .mount(&server)
        .await;

    let err = service
        .fetch_changes(&common::handle(&server), &ChangeRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, MirrorError::Protocol(_)));
}

#[tokio::test]
async fn test_malformed_part_is_protocol_error() {
    let (server, service) = common::setup_service().await;
    Mock::given(method("POST"))
        .and(path("/meta/changes"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"nodes\":[]}\n{oops"))
        .mount(&server)
        .await;

    let err = service
        .fetch_changes(&common::handle(&server), &ChangeRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, MirrorError::Protocol(_)));
}

/// Serves one change-feed answer as chunked NDJSON, sleeping `gap` between
/// chunks, and returns the metadata base URL
async fn trickle_server(lines: Vec<String>, gap: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();

        // Drain the request so closing the socket does not reset it
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        let body_start = loop {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
            if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&request[..body_start]).to_lowercase();
        let content_length = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while request.len() < body_start + content_length {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
        }

        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\n\
                  transfer-encoding: chunked\r\nconnection: close\r\n\r\n",
            )
            .await
            .unwrap();
        for line in lines {
            tokio::time::sleep(gap).await;
            let chunk = format!("{:x}\r\n{}\r\n", line.len(), line);
            if socket.write_all(chunk.as_bytes()).await.is_err() {
                return;
            }
        }
        let _ = socket.write_all(b"0\r\n\r\n").await;
        let _ = socket.shutdown().await;
    });

    format!("http://{addr}/meta/")
}

fn one_second_client() -> RemoteClient {
    RemoteClient::new(&RemoteConfig {
        request_timeout_secs: 1,
        ..RemoteConfig::default()
    })
    .unwrap()
}

fn trickle_handle(metadata_url: String) -> AuthHandle {
    AuthHandle {
        token_type: "bearer".to_string(),
        access_token: common::TOKEN.to_string(),
        endpoints: Endpoints::new(metadata_url, "http://127.0.0.1:9/content/"),
    }
}

#[tokio::test]
async fn test_page_streaming_longer_than_request_timeout_completes() {
    let lines: Vec<String> = (0..5)
        .map(|i| format!("{}\n", json!({"nodes": [{"id": format!("n{i}"), "parents": ["r"]}]})))
        .chain([format!("{}\n", json!({"nodes": [], "checkpoint": "c9"}))])
        .collect();
    // Six chunks 400ms apart: 2.4s in total, never silent for a full second
    let metadata_url = trickle_server(lines, Duration::from_millis(400)).await;
    let service = RemoteNodeService::new(one_second_client(), "http://127.0.0.1:9/endpoint");

    let parts = service
        .fetch_changes(&trickle_handle(metadata_url), &ChangeRequest::resuming_from(None))
        .await
        .unwrap();

    assert_eq!(parts.len(), 6);
    assert_eq!(parts[5].checkpoint.as_ref().unwrap().as_str(), "c9");
}

#[tokio::test]
async fn test_page_that_goes_silent_is_transport_error() {
    let lines = vec![
        format!("{}\n", json!({"nodes": [{"id": "n1"}]})),
        format!("{}\n", json!({"nodes": [], "checkpoint": "c2"})),
    ];
    let metadata_url = trickle_server(lines, Duration::from_millis(2500)).await;
    let service = RemoteNodeService::new(one_second_client(), "http://127.0.0.1:9/endpoint");

    let err = service
        .fetch_changes(&trickle_handle(metadata_url), &ChangeRequest::resuming_from(None))
        .await
        .unwrap_err();

    assert!(matches!(err, MirrorError::Transport(_)), "got {err:?}");
}
