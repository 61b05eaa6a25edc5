//! Transport abstraction for opening chat streams
//!
//! The transport's only job is to turn a chat request into a raw byte
//! stream; frame assembly and decoding happen upstream in `scry-stream`.
//! Keeping it behind a trait lets tests script byte chunks with exact
//! boundaries.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use scry_stream::Error as StreamError;
use serde::Serialize;
use tokio_stream::Stream;

use crate::error::Result;

/// Body of `POST /chat` and `POST /chat/multi`
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub stream: bool,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            message: message.into(),
            session_id,
            stream: true,
        }
    }
}

/// Which research pipeline the backend should run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentMode {
    /// Single agent, `POST /chat`
    Single,
    /// Planner / researcher / writer pipeline, `POST /chat/multi`
    #[default]
    Multi,
}

impl AgentMode {
    pub fn endpoint(&self) -> &'static str {
        match self {
            AgentMode::Single => "chat",
            AgentMode::Multi => "chat/multi",
        }
    }
}

/// A raw, arbitrarily chunked byte stream from the backend
pub type ByteStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, StreamError>> + Send>>;

/// Supplier of response byte streams for chat requests
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the response stream for one chat request
    async fn open(&self, request: &ChatRequest) -> Result<ByteStream>;
}

/// HTTP transport talking to the research agent backend
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    mode: AgentMode,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, mode: AgentMode) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            mode,
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.mode.endpoint()
        )
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, request: &ChatRequest) -> Result<ByteStream> {
        let url = self.url();
        tracing::debug!(%url, session_id = ?request.session_id, "opening chat stream");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(StreamError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StreamError::server(status.as_u16(), message).into());
        }

        Ok(Box::pin(
            response.bytes_stream().map(|r| r.map_err(StreamError::Http)),
        ))
    }
}
