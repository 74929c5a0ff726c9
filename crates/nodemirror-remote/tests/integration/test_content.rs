//! Integration tests for byte-range content reads

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

use nodemirror_core::domain::{MirrorError, NodeId};
use nodemirror_core::ports::{ByteRange, IRemoteService};

use crate::common;

#[tokio::test]
async fn test_read_whole_content() {
    let (server, service) = common::setup_service().await;
    Mock::given(method("GET"))
        .and(path("/content/nodes/n1/content"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"hello world".to_vec())
                .append_header("Content-Type", "application/octet-stream"),
        )
        .mount(&server)
        .await;

    let bytes = service
        .read_content(&common::handle(&server), &NodeId::new("n1").unwrap(), None)
        .await
        .unwrap();
    assert_eq!(bytes, b"hello world");
}

#[tokio::test]
async fn test_read_range_sends_range_header() {
    let (server, service) = common::setup_service().await;
    Mock::given(method("GET"))
        .and(path("/content/nodes/n1/content"))
        .and(header("range", "bytes=6-10"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(b"world".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let bytes = service
        .read_content(
            &common::handle(&server),
            &NodeId::new("n1").unwrap(),
            Some(ByteRange::new(6, Some(10))),
        )
        .await
        .unwrap();
    assert_eq!(bytes, b"world");
}

#[tokio::test]
async fn test_read_missing_content_is_remote_error() {
    let (server, service) = common::setup_service().await;
    Mock::given(method("GET"))
        .and(path("/content/nodes/n1/content"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
        .mount(&server)
        .await;

    let err = service
        .read_content(&common::handle(&server), &NodeId::new("n1").unwrap(), None)
        .await
        .unwrap_err();
    match err {
        MirrorError::Remote { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "not here");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
