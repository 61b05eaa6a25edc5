//! Typed events emitted by the research agent backend
//!
//! Each SSE data frame decodes into exactly one `StreamEvent`. The payload
//! shape is fixed per `type` tag; tool inputs and outputs are carried as
//! opaque JSON and never interpreted here.

use serde::{Deserialize, Serialize};

/// Open key-value metadata attached to an event
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Events emitted by the backend while producing one assistant turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Text fragment, appended to the assistant reply
    Text {
        content: String,
        #[serde(default, skip_serializing_if = "Metadata::is_empty")]
        metadata: Metadata,
    },
    /// Status line describing what the agent is currently doing
    Thinking {
        content: String,
        #[serde(default, skip_serializing_if = "Metadata::is_empty")]
        metadata: Metadata,
    },
    /// The agent invoked a tool
    ToolCall {
        content: ToolCall,
        #[serde(default, skip_serializing_if = "Metadata::is_empty")]
        metadata: Metadata,
    },
    /// A tool invocation produced output
    ToolResult {
        content: ToolOutput,
        #[serde(default, skip_serializing_if = "Metadata::is_empty")]
        metadata: Metadata,
    },
    /// Free-form intermediate action report from the agent runtime
    AgentAction {
        #[serde(default)]
        content: serde_json::Value,
        #[serde(default, skip_serializing_if = "Metadata::is_empty")]
        metadata: Metadata,
    },
    /// Session bookkeeping, sent once near the start of a stream
    Session {
        content: SessionInfo,
        #[serde(default, skip_serializing_if = "Metadata::is_empty")]
        metadata: Metadata,
    },
    /// Server-reported failure; terminates the stream
    Error {
        content: String,
        #[serde(default, skip_serializing_if = "Metadata::is_empty")]
        metadata: Metadata,
    },
    /// Stream completed successfully
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Metadata::is_empty")]
        metadata: Metadata,
    },
}

/// Tool invocation payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

/// Tool result payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool: String,
    #[serde(default)]
    pub output: serde_json::Value,
}

/// Session bookkeeping payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Phase of the research pipeline reported by `thinking` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingStep {
    #[default]
    Planning,
    Researching,
    Writing,
}

impl ThinkingStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThinkingStep::Planning => "planning",
            ThinkingStep::Researching => "researching",
            ThinkingStep::Writing => "writing",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "planning" => Some(ThinkingStep::Planning),
            "researching" => Some(ThinkingStep::Researching),
            "writing" => Some(ThinkingStep::Writing),
            _ => None,
        }
    }
}

impl StreamEvent {
    /// Check if this event terminates the stream (Done or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }

    /// The wire name of this event's type tag
    pub fn type_name(&self) -> &'static str {
        match self {
            StreamEvent::Text { .. } => "text",
            StreamEvent::Thinking { .. } => "thinking",
            StreamEvent::ToolCall { .. } => "tool_call",
            StreamEvent::ToolResult { .. } => "tool_result",
            StreamEvent::AgentAction { .. } => "agent_action",
            StreamEvent::Session { .. } => "session",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Done { .. } => "done",
        }
    }

    /// The metadata map attached to this event
    pub fn metadata(&self) -> &Metadata {
        match self {
            StreamEvent::Text { metadata, .. }
            | StreamEvent::Thinking { metadata, .. }
            | StreamEvent::ToolCall { metadata, .. }
            | StreamEvent::ToolResult { metadata, .. }
            | StreamEvent::AgentAction { metadata, .. }
            | StreamEvent::Session { metadata, .. }
            | StreamEvent::Error { metadata, .. }
            | StreamEvent::Done { metadata, .. } => metadata,
        }
    }

    /// The pipeline step carried in `metadata.step`, defaulting to planning.
    /// Only meaningful for `thinking` events.
    pub fn thinking_step(&self) -> ThinkingStep {
        self.metadata()
            .get("step")
            .and_then(|v| v.as_str())
            .and_then(ThinkingStep::parse)
            .unwrap_or_default()
    }
}
