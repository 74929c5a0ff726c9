//! Integration tests for node reads and mutations

use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, ResponseTemplate};

use nodemirror_core::domain::{MirrorError, NodeId};
use nodemirror_core::ports::IRemoteService;

use crate::common;

fn id(s: &str) -> NodeId {
    NodeId::new(s).unwrap()
}

#[tokio::test]
async fn test_create_folder_posts_name_and_parent() {
    let (server, service) = common::setup_service().await;
    Mock::given(method("POST"))
        .and(path("/meta/nodes"))
        .and(body_json(json!({"name": "Docs", "kind": "FOLDER", "parents": ["r"]})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "f1", "name": "Docs", "kind": "FOLDER", "parents": ["r"], "status": "AVAILABLE"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = service
        .create_folder(&common::handle(&server), "Docs", &id("r"))
        .await
        .unwrap();

    assert!(response.is_success());
    assert_eq!(response.body["id"], "f1");
}

#[tokio::test]
async fn test_rename_patches_node() {
    let (server, service) = common::setup_service().await;
    Mock::given(method("PATCH"))
        .and(path("/meta/nodes/n1"))
        .and(body_json(json!({"name": "b.txt"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "n1", "name": "b.txt"})))
        .expect(1)
        .mount(&server)
        .await;

    let response = service
        .rename_node(&common::handle(&server), &id("n1"), "b.txt")
        .await
        .unwrap();
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn test_move_posts_to_destination_children() {
    let (server, service) = common::setup_service().await;
    Mock::given(method("POST"))
        .and(path("/meta/nodes/f2/children"))
        .and(body_json(json!({"fromParent": "f1", "childId": "n1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "n1", "parents": ["f2"]})))
        .expect(1)
        .mount(&server)
        .await;

    let response = service
        .move_node(&common::handle(&server), &id("n1"), &id("f1"), &id("f2"))
        .await
        .unwrap();
    assert_eq!(response.body["parents"][0], "f2");
}

#[tokio::test]
async fn test_trash_and_restore_paths() {
    let (server, service) = common::setup_service().await;
    Mock::given(method("PUT"))
        .and(path("/meta/trash/n1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "n1", "status": "TRASH"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/meta/trash/n1/restore"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "n1", "status": "AVAILABLE"})))
        .expect(1)
        .mount(&server)
        .await;

    let handle = common::handle(&server);
    let trashed = service.trash_node(&handle, &id("n1")).await.unwrap();
    assert_eq!(trashed.body["status"], "TRASH");
    let restored = service.restore_node(&handle, &id("n1")).await.unwrap();
    assert_eq!(restored.body["status"], "AVAILABLE");
}

#[tokio::test]
async fn test_mutation_failure_status_is_returned_not_raised() {
    let (server, service) = common::setup_service().await;
    Mock::given(method("PATCH"))
        .and(path("/meta/nodes/n1"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "NAME_ALREADY_EXISTS",
            "message": "Node with the name b.txt already exists"
        })))
        .mount(&server)
        .await;

    let response = service
        .rename_node(&common::handle(&server), &id("n1"), "b.txt")
        .await
        .unwrap();
    assert!(!response.is_success());
    assert_eq!(response.message(), "Node with the name b.txt already exists");
}

#[tokio::test]
async fn test_mutation_is_sent_once_on_server_error() {
    let (server, service) = common::setup_service().await;
    Mock::given(method("PUT"))
        .and(path("/meta/trash/n1"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let response = service
        .trash_node(&common::handle(&server), &id("n1"))
        .await
        .unwrap();
    assert_eq!(response.status, 500);
}

#[tokio::test]
async fn test_get_node_retries_transient_failures() {
    let (server, service) = common::setup_service().await;
    Mock::given(method("GET"))
        .and(path("/meta/nodes/n1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/meta/nodes/n1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "n1"})))
        .expect(1)
        .mount(&server)
        .await;

    let response = service
        .get_node(&common::handle(&server), &id("n1"))
        .await
        .unwrap();
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn test_get_node_gives_up_after_retry_budget() {
    let (server, service) = common::setup_service().await;
    Mock::given(method("GET"))
        .and(path("/meta/nodes/n1"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .expect(3)
        .mount(&server)
        .await;

    let err = service
        .get_node(&common::handle(&server), &id("n1"))
        .await
        .unwrap_err();
    assert!(matches!(err, MirrorError::Remote { status: 429, .. }));
}

#[tokio::test]
async fn test_get_node_not_found_is_a_response() {
    let (server, service) = common::setup_service().await;
    Mock::given(method("GET"))
        .and(path("/meta/nodes/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let response = service
        .get_node(&common::handle(&server), &id("gone"))
        .await
        .unwrap();
    assert_eq!(response.status, 404);
    assert!(response.body.is_null());
}
