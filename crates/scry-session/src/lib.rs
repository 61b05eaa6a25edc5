//! scry-session: Conversation state and stream orchestration
//!
//! This crate folds wire events into a conversation transcript: a pure
//! reducer applies each `StreamEvent` to a `ConversationState`, and
//! `StreamSession` drives the single consumer loop over an HTTP transport,
//! publishing read-only state snapshots to any interested observer.

pub mod error;
pub mod reducer;
pub mod session;
pub mod sessions;
pub mod state;
pub mod transport;

pub use error::{Error, Result};
pub use reducer::{Effect, apply};
pub use session::{SessionHandle, StreamOutcome, StreamPhase, StreamSession};
pub use sessions::{ApiClient, Session, SessionList};
pub use state::{ConversationState, Message, Role, ThinkingStatus};
pub use transport::{AgentMode, ByteStream, ChatRequest, HttpTransport, Transport};
