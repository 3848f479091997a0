//! Conversation CRUD boundary: the trait the engine consumes and its HTTP client.
//!
//! Endpoints (under the API prefix, default `/api`):
//! `GET /conversations`, `POST /conversations`, `GET /conversations/{id}`,
//! `PUT /conversations/{id}` with `{ "title" }`, `DELETE /conversations/{id}`, `GET /userinfo`.

use async_trait::async_trait;
use serde::Deserialize;

use crate::conversation::Conversation;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("conversation api request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("conversation api error: {status} {body}")]
    Status { status: u16, body: String },
}

/// Request/response access to conversations. Results are never retried by the engine.
#[async_trait]
pub trait ConversationApi: Send + Sync {
    /// Conversation summaries (id, title), most recently updated first.
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError>;

    async fn create_conversation(&self) -> Result<Conversation, ApiError>;

    /// Full conversation including its messages.
    async fn get_conversation(&self, id: &str) -> Result<Conversation, ApiError>;

    async fn update_conversation(&self, id: &str, title: &str) -> Result<(), ApiError>;

    async fn delete_conversation(&self, id: &str) -> Result<(), ApiError>;

    /// Username known to the service for this client, if any. Default: none.
    async fn user_info(&self) -> Result<Option<String>, ApiError> {
        Ok(None)
    }
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    username: Option<String>,
}

/// `ConversationApi` over HTTP with reqwest.
#[derive(Clone)]
pub struct HttpConversationApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpConversationApi {
    /// `origin` like "http://127.0.0.1:8000", `api_prefix` like "/api".
    pub fn new(origin: &str, api_prefix: &str) -> Self {
        let origin = origin.trim().trim_end_matches('/');
        let prefix = api_prefix.trim().trim_matches('/');
        let base_url = if prefix.is_empty() {
            origin.to_string()
        } else {
            format!("{}/{}", origin, prefix)
        };
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn conversation_url(&self, id: &str) -> String {
        format!("{}/conversations/{}", self.base_url, id)
    }
}

async fn check(res: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status().as_u16();
    let body = res.text().await.unwrap_or_default();
    Err(ApiError::Status { status, body })
}

#[async_trait]
impl ConversationApi for HttpConversationApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let url = format!("{}/conversations", self.base_url);
        let res = check(self.client.get(&url).send().await?).await?;
        Ok(res.json().await?)
    }

    async fn create_conversation(&self) -> Result<Conversation, ApiError> {
        let url = format!("{}/conversations", self.base_url);
        let res = check(self.client.post(&url).send().await?).await?;
        Ok(res.json().await?)
    }

    async fn get_conversation(&self, id: &str) -> Result<Conversation, ApiError> {
        let res = check(self.client.get(self.conversation_url(id)).send().await?).await?;
        Ok(res.json().await?)
    }

    async fn update_conversation(&self, id: &str, title: &str) -> Result<(), ApiError> {
        let body = serde_json::json!({ "title": title });
        check(
            self.client
                .put(self.conversation_url(id))
                .json(&body)
                .send()
                .await?,
        )
        .await?;
        Ok(())
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), ApiError> {
        check(self.client.delete(self.conversation_url(id)).send().await?).await?;
        Ok(())
    }

    async fn user_info(&self) -> Result<Option<String>, ApiError> {
        let url = format!("{}/userinfo", self.base_url);
        let res = check(self.client.get(&url).send().await?).await?;
        let info: UserInfo = res.json().await?;
        Ok(info
            .username
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty()))
    }
}
