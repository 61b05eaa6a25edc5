//! Session records and the persistence collaborator's endpoints
//!
//! Sessions are owned by the backend; this module only consumes its CRUD
//! surface and the record shapes it returns.

use chrono::{DateTime, Utc};
use scry_stream::Error as StreamError;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::state::Message;

/// A persisted conversation, as returned by the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Response of `GET /sessions`
#[derive(Debug, Clone, Deserialize)]
pub struct SessionList {
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub total: usize,
}

#[derive(Debug, Serialize)]
struct SessionCreate<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
}

/// Client for the backend's session CRUD endpoints
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        let response = self
            .client
            .get(self.url("sessions"))
            .send()
            .await
            .map_err(StreamError::Http)?;
        let list: SessionList = check(response)
            .await?
            .json()
            .await
            .map_err(StreamError::Http)?;
        Ok(list.sessions)
    }

    pub async fn get_session(&self, id: &str) -> Result<Session> {
        let response = self
            .client
            .get(self.url(&format!("sessions/{}", id)))
            .send()
            .await
            .map_err(StreamError::Http)?;
        Ok(check(response).await?.json().await.map_err(StreamError::Http)?)
    }

    pub async fn create_session(&self, title: Option<&str>) -> Result<Session> {
        let response = self
            .client
            .post(self.url("sessions"))
            .json(&SessionCreate { title })
            .send()
            .await
            .map_err(StreamError::Http)?;
        Ok(check(response).await?.json().await.map_err(StreamError::Http)?)
    }

    pub async fn delete_session(&self, id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("sessions/{}", id)))
            .send()
            .await
            .map_err(StreamError::Http)?;
        check(response).await?;
        Ok(())
    }
}

/// Map non-success responses to a server error carrying the body text.
async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(StreamError::server(status.as_u16(), message).into())
}
