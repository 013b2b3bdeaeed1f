use reqwest::{Response, Url};
use serde::de::DeserializeOwned;
use tracing::debug;
use vibe_shared::schemas::{
    ApiErrorBody, BrowseResult, ChatRequest, ConversationRecord, ConversationResponse,
    ConversationSummary, ListConversationsResponse, MkdirRequest, MkdirResult, ModelInfo,
    ModelsResponse, StatusResponse,
};

use crate::error::{EnvoyError, EnvoyResult};

pub const GENERIC_FAILURE: &str = "Request failed";

/// HTTP transport for the chat backend.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base_url}/api/{segments..}`, each segment percent-escaped so ids
    /// containing `/`, `?` or `#` stay inside their own segment.
    fn endpoint(&self, segments: &[&str]) -> EnvoyResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| EnvoyError::InvalidUrl(format!("{}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| EnvoyError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    /// Issue the chat request. On success the returned response body is the
    /// event stream; non-2xx statuses become [`EnvoyError::Status`].
    pub async fn open_chat_stream(&self, request: &ChatRequest) -> EnvoyResult<Response> {
        debug!(mode = %request.mode, model = %request.model, "POST /api/chat");

        let response = self
            .client
            .post(self.endpoint(&["chat"])?)
            .json(request)
            .send()
            .await?;

        ensure_success(response).await
    }

    pub async fn health(&self) -> EnvoyResult<bool> {
        let response = self.client.get(self.endpoint(&["health"])?).send().await?;
        Ok(response.status().is_success())
    }

    pub async fn models(&self) -> EnvoyResult<Vec<ModelInfo>> {
        let response = self.client.get(self.endpoint(&["models"])?).send().await?;
        let body: ModelsResponse = read_json(response).await?;
        Ok(body.models)
    }

    pub async fn conversations(&self) -> EnvoyResult<Vec<ConversationSummary>> {
        let response = self.client.get(self.endpoint(&["conversations"])?).send().await?;
        let body: ListConversationsResponse = read_json(response).await?;
        Ok(body.conversations)
    }

    pub async fn conversation(&self, id: &str) -> EnvoyResult<ConversationRecord> {
        let response = self
            .client
            .get(self.endpoint(&["conversations", id])?)
            .send()
            .await?;

        let body: ConversationResponse = read_json(response).await?;
        body.conversation
            .ok_or_else(|| EnvoyError::ConversationNotFound(id.to_string()))
    }

    pub async fn delete_conversation(&self, id: &str) -> EnvoyResult<()> {
        let response = self
            .client
            .delete(self.endpoint(&["conversations", id])?)
            .send()
            .await?;

        ensure_success(response).await?;
        Ok(())
    }

    pub async fn browse(&self, path: &str) -> EnvoyResult<BrowseResult> {
        let response = self
            .client
            .get(self.endpoint(&["browse"])?)
            .query(&[("path", path)])
            .send()
            .await?;

        read_json(response).await
    }

    pub async fn mkdir(&self, path: &str) -> EnvoyResult<MkdirResult> {
        let response = self
            .client
            .post(self.endpoint(&["mkdir"])?)
            .json(&MkdirRequest {
                path: path.to_string(),
            })
            .send()
            .await?;

        read_json(response).await
    }

    /// Ask the backend to stop the agent process behind a conversation.
    pub async fn cancel_execution(&self, conversation_id: &str) -> EnvoyResult<StatusResponse> {
        let response = self
            .client
            .post(self.endpoint(&["cancel", conversation_id])?)
            .send()
            .await?;

        read_json(response).await
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> EnvoyResult<T> {
    let response = ensure_success(response).await?;
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn ensure_success(response: Response) -> EnvoyResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    // Best effort: the body may be missing or not JSON at all
    let message = match response.bytes().await {
        Ok(bytes) => serde_json::from_slice::<ApiErrorBody>(&bytes)
            .ok()
            .and_then(ApiErrorBody::message),
        Err(_) => None,
    };

    Err(EnvoyError::Status {
        status,
        message: message.unwrap_or_else(|| GENERIC_FAILURE.to_string()),
    })
}
