//! RemoteNodeService - IRemoteService implementation
//!
//! Resolves every call against the endpoints discovered for the session:
//!
//! | Operation      | Request                                            |
//! |----------------|----------------------------------------------------|
//! | discover       | `GET {endpoint_url}`                               |
//! | change feed    | `POST {metadata}changes`                           |
//! | get node       | `GET {metadata}nodes/{id}`                         |
//! | create folder  | `POST {metadata}nodes`                             |
//! | rename         | `PATCH {metadata}nodes/{id}`                       |
//! | move           | `POST {metadata}nodes/{to}/children`               |
//! | trash          | `PUT {metadata}trash/{id}`                         |
//! | restore        | `POST {metadata}trash/{id}/restore`                |
//! | content        | `GET {content}nodes/{id}/content` (+ `Range`)      |
//!
//! Reads are retried with bounded backoff; the change request and the
//! mutations are sent once and their failures surfaced to the caller.

use async_trait::async_trait;
use reqwest::{header, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use nodemirror_core::domain::{Endpoints, MirrorError, NodeId, TokenBundle};
use nodemirror_core::ports::{
    AuthHandle, ByteRange, ChangePart, ChangeRequest, IRemoteService, RemoteResponse,
};

use crate::changes::ChangeFeedDecoder;
use crate::client::{endpoint_url, into_remote_response, RemoteClient};
use crate::RemoteError;

/// Body of the endpoint-discovery answer
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndpointResponse {
    metadata_url: Option<String>,
    content_url: Option<String>,
}

/// `IRemoteService` over the remote HTTP API
pub struct RemoteNodeService {
    client: RemoteClient,
    endpoint_url: String,
}

impl RemoteNodeService {
    /// # Arguments
    /// * `client` - Shared HTTP client
    /// * `endpoint_url` - Endpoint-discovery URL
    pub fn new(client: RemoteClient, endpoint_url: impl Into<String>) -> Self {
        Self {
            client,
            endpoint_url: endpoint_url.into(),
        }
    }

    fn metadata(handle: &AuthHandle, path: &str) -> String {
        endpoint_url(&handle.endpoints.metadata_url, path)
    }

    /// Sends a mutation once and reads its answer
    async fn mutate(
        &self,
        handle: &AuthHandle,
        method: Method,
        url: String,
        body: Value,
    ) -> Result<RemoteResponse, MirrorError> {
        debug!(method = %method, url = %url, "Sending mutation");
        let request = self
            .client
            .request(method, &url, &handle.access_token)
            .json(&body);
        let response = into_remote_response(self.client.send_once(request).await?).await?;
        debug!(status = response.status, "Mutation answered");
        Ok(response)
    }
}

/// Error for a non-success status on a call whose answer is not a node
fn status_error(status: StatusCode, body: &str) -> MirrorError {
    if status == StatusCode::UNAUTHORIZED {
        return RemoteError::Unauthorized("access token rejected (HTTP 401)".to_string()).into();
    }
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    RemoteError::Status {
        status: status.as_u16(),
        message,
    }
    .into()
}

#[async_trait]
impl IRemoteService for RemoteNodeService {
    async fn discover_endpoints(&self, tokens: &TokenBundle) -> Result<Endpoints, MirrorError> {
        let response = self
            .client
            .send_idempotent("discover_endpoints", || {
                self.client
                    .request(Method::GET, &self.endpoint_url, &tokens.access_token)
            })
            .await?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| MirrorError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(status_error(status, &text));
        }

        let parsed: EndpointResponse = serde_json::from_str(&text).map_err(|e| {
            RemoteError::InvalidResponse(format!("invalid endpoint response: {}", e))
        })?;
        match (parsed.metadata_url, parsed.content_url) {
            (Some(metadata), Some(content)) => {
                info!(metadata_url = %metadata, content_url = %content, "Discovered endpoints");
                Ok(Endpoints::new(metadata, content))
            }
            _ => Err(RemoteError::InvalidResponse(
                "endpoint response lacks metadataUrl or contentUrl".to_string(),
            )
            .into()),
        }
    }

    async fn fetch_changes(
        &self,
        handle: &AuthHandle,
        request: &ChangeRequest,
    ) -> Result<Vec<ChangePart>, MirrorError> {
        let mut body = serde_json::Map::new();
        if let Some(checkpoint) = &request.checkpoint {
            body.insert("checkpoint".to_string(), json!(checkpoint.as_str()));
        }
        if request.include_purged {
            body.insert("includePurged".to_string(), json!("true"));
        }

        debug!(
            resuming = request.checkpoint.is_some(),
            include_purged = request.include_purged,
            "Requesting change feed page"
        );
        // The page body may stream for longer than any fixed deadline
        let builder = self
            .client
            .stream_request(Method::POST, &Self::metadata(handle, "changes"), &handle.access_token)
            .json(&Value::Object(body));
        let mut response = self.client.send_once(builder).await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        let mut decoder = ChangeFeedDecoder::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| MirrorError::Transport(e.to_string()))?
        {
            decoder.push(&chunk)?;
        }
        let parts = decoder.finish()?;

        debug!(parts = parts.len(), "Change feed page received");
        Ok(parts)
    }

    async fn get_node(&self, handle: &AuthHandle, id: &NodeId) -> Result<RemoteResponse, MirrorError> {
        let url = Self::metadata(handle, &format!("nodes/{}", id));
        let response = self
            .client
            .send_idempotent("get_node", || {
                self.client.request(Method::GET, &url, &handle.access_token)
            })
            .await?;
        into_remote_response(response).await
    }

    async fn create_folder(
        &self,
        handle: &AuthHandle,
        name: &str,
        parent: &NodeId,
    ) -> Result<RemoteResponse, MirrorError> {
        let body = json!({
            "name": name,
            "kind": "FOLDER",
            "parents": [parent.as_str()],
        });
        self.mutate(handle, Method::POST, Self::metadata(handle, "nodes"), body)
            .await
    }

    async fn rename_node(
        &self,
        handle: &AuthHandle,
        id: &NodeId,
        new_name: &str,
    ) -> Result<RemoteResponse, MirrorError> {
        let url = Self::metadata(handle, &format!("nodes/{}", id));
        self.mutate(handle, Method::PATCH, url, json!({ "name": new_name }))
            .await
    }

    async fn move_node(
        &self,
        handle: &AuthHandle,
        id: &NodeId,
        from_parent: &NodeId,
        to_parent: &NodeId,
    ) -> Result<RemoteResponse, MirrorError> {
        let url = Self::metadata(handle, &format!("nodes/{}/children", to_parent));
        let body = json!({
            "fromParent": from_parent.as_str(),
            "childId": id.as_str(),
        });
        self.mutate(handle, Method::POST, url, body).await
    }

    async fn trash_node(&self, handle: &AuthHandle, id: &NodeId) -> Result<RemoteResponse, MirrorError> {
        let url = Self::metadata(handle, &format!("trash/{}", id));
        self.mutate(handle, Method::PUT, url, json!({})).await
    }

    async fn restore_node(&self, handle: &AuthHandle, id: &NodeId) -> Result<RemoteResponse, MirrorError> {
        let url = Self::metadata(handle, &format!("trash/{}/restore", id));
        self.mutate(handle, Method::POST, url, json!({})).await
    }

    async fn read_content(
        &self,
        handle: &AuthHandle,
        id: &NodeId,
        range: Option<ByteRange>,
    ) -> Result<Vec<u8>, MirrorError> {
        let url = endpoint_url(&handle.endpoints.content_url, &format!("nodes/{}/content", id));
        let response = self
            .client
            .send_idempotent("read_content", || {
                let request = self.client.request(Method::GET, &url, &handle.access_token);
                match range {
                    Some(r) => request.header(header::RANGE, r.header_value()),
                    None => request,
                }
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| MirrorError::Transport(e.to_string()))?;
        debug!(node_id = %id, bytes = bytes.len(), "Read node content");
        Ok(bytes.to_vec())
    }
}
