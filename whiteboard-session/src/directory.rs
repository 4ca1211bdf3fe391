//! Room directory: creates rooms and resolves a room id to its relay.
//!
//! ```text
//! POST /rooms            → { room_id, relay_url, role }
//! GET  /rooms/{id}/info  → { room_id, relay_url, role, member_count, owner_id?, gated? }
//! ```

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionError;
use crate::presence::{Identity, Role};

fn default_gated() -> bool {
    true
}

/// Directory answer for one room, from the caller's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub room_id: String,
    pub relay_url: String,
    /// Role the caller holds in this room.
    pub role: Role,
    #[serde(default)]
    pub member_count: usize,
    #[serde(default)]
    pub owner_id: Option<Uuid>,
    /// Non-owners need approval to join.
    #[serde(default = "default_gated")]
    pub gated: bool,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Create a room owned by `owner`.
    async fn create_room(&self, owner: &Identity) -> Result<RoomInfo, SessionError>;

    /// Look up an existing room on behalf of `requester`.
    async fn room_info(&self, room_id: &str, requester: &Identity) -> Result<RoomInfo, SessionError>;
}

#[derive(Debug, Serialize)]
struct CreateRoomRequest<'a> {
    owner: &'a Identity,
}

/// JSON-over-HTTP directory client.
#[derive(Debug, Clone)]
pub struct HttpRoomDirectory {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRoomDirectory {
    /// Fails when the HTTP client cannot be built (e.g. no TLS backend).
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn fetch(&self, request: reqwest::RequestBuilder) -> Result<RoomInfo, SessionError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SessionError::RoomUnavailable(e.to_string()))?;
        response
            .json::<RoomInfo>()
            .await
            .map_err(|e| SessionError::RoomUnavailable(format!("invalid directory response: {e}")))
    }
}

#[async_trait]
impl RoomDirectory for HttpRoomDirectory {
    async fn create_room(&self, owner: &Identity) -> Result<RoomInfo, SessionError> {
        let url = format!("{}/rooms", self.base_url);
        let info = self
            .fetch(self.client.post(&url).json(&CreateRoomRequest { owner }))
            .await?;
        log::info!("Created room {} on {}", info.room_id, info.relay_url);
        Ok(info)
    }

    async fn room_info(&self, room_id: &str, requester: &Identity) -> Result<RoomInfo, SessionError> {
        let url = format!("{}/rooms/{room_id}/info", self.base_url);
        let participant = requester.id.to_string();
        self.fetch(self.client.get(&url).query(&[("participant", participant.as_str())]))
            .await
    }
}
