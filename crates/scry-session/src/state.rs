//! Conversation state exposed to readers
//!
//! The state is mutated only by the reducer and the orchestrator's single
//! consumer loop; everyone else sees immutable snapshots.

use chrono::{DateTime, Utc};
use scry_stream::{StreamEvent, ThinkingStep};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sessions::Session;

/// Message roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One entry in the conversation transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Every event received while this message was being produced,
    /// in arrival order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<StreamEvent>,
}

impl Message {
    /// Create an immutable user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            events: Vec::new(),
        }
    }

    /// Create an empty assistant message, ready to receive events
    pub fn assistant_empty() -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            content: String::new(),
            timestamp: Utc::now(),
            events: Vec::new(),
        }
    }
}

/// What the agent reports it is currently doing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingStatus {
    pub step: ThinkingStep,
    pub message: String,
}

/// The full conversation as seen by a consumer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    /// Backend session this conversation belongs to, once known
    pub session_id: Option<String>,
    /// Ordered transcript; at most the last message is open for mutation
    pub transcript: Vec<Message>,
    /// Live status line, cleared as soon as answer text arrives
    pub thinking: Option<ThinkingStatus>,
    /// Whether the current stream has reached a terminal state
    pub terminal: bool,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild state from a persisted session record. The restored
    /// transcript is closed: no message is open until the next turn begins.
    pub fn from_session(session: &Session) -> Self {
        Self {
            session_id: Some(session.session_id.clone()),
            transcript: session.messages.clone(),
            thinking: None,
            terminal: true,
        }
    }

    /// Start a new turn: append the user's message and an open assistant
    /// message that subsequent events will flow into.
    pub fn begin_turn(&mut self, prompt: impl Into<String>) {
        self.transcript.push(Message::user(prompt));
        self.transcript.push(Message::assistant_empty());
        self.thinking = None;
        self.terminal = false;
    }

    /// The assistant message currently receiving events, if any
    pub fn open_message(&self) -> Option<&Message> {
        self.transcript
            .last()
            .filter(|m| m.role == Role::Assistant && !self.terminal)
    }

    pub(crate) fn open_message_mut(&mut self) -> Option<&mut Message> {
        self.transcript
            .last_mut()
            .filter(|m| m.role == Role::Assistant)
    }
}
