/// REST API client for the initial conversation load
use crate::config::Config;
use crate::conversation_store::ConversationStore;
use crate::error::{ClientError, Result};
use crate::http::HttpClient;
use crate::messenger_types::ConversationListItem;
use crate::session::{AuthToken, SharedTokenProvider};
use hyper::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

/// Response body of `GET /conversations`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ConversationsResponse {
    Bare(Vec<ConversationListItem>),
    Wrapped { conversations: Vec<ConversationListItem> },
}

impl From<ConversationsResponse> for Vec<ConversationListItem> {
    fn from(response: ConversationsResponse) -> Self {
        match response {
            ConversationsResponse::Bare(items) => items,
            ConversationsResponse::Wrapped { conversations } => conversations,
        }
    }
}

/// Authenticated REST calls against the platform API
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http: HttpClient,
    tokens: SharedTokenProvider,
}

impl ApiClient {
    pub fn new(config: &Config, tokens: SharedTokenProvider) -> Self {
        Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            http: HttpClient::new(config.connection_timeout),
            tokens,
        }
    }

    fn token(&self) -> Result<AuthToken> {
        self.tokens
            .token()
            .ok_or_else(|| ClientError::Auth("No access token".to_string()))
    }

    /// Conversation list for the signed-in user
    pub async fn fetch_conversations(&self) -> Result<Vec<ConversationListItem>> {
        let token = self.token()?;
        let url = format!("{}/conversations", self.base_url);
        let response = self
            .http
            .get(
                &url,
                &[
                    ("authorization", token.bearer()),
                    ("accept", "application/json".to_string()),
                ],
            )
            .await?;

        match response.status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ClientError::Auth(format!(
                    "API refused the token ({})",
                    response.status
                )))
            }
            status if !status.is_success() => {
                return Err(ClientError::Http(format!("GET {} returned {}", url, status)))
            }
            _ => {}
        }

        let parsed: ConversationsResponse = serde_json::from_slice(&response.body)?;
        let items: Vec<ConversationListItem> = parsed.into();
        debug!("Fetched {} conversations", items.len());
        Ok(items)
    }

    /// Fetch the list and hydrate `store` with it
    pub async fn hydrate(&self, store: &ConversationStore) -> Result<usize> {
        let items = self.fetch_conversations().await?;
        let count = items.len();
        store.hydrate(items).await;
        info!("Loaded {} conversations", count);
        Ok(count)
    }
}
