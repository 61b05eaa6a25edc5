//! Error types for scry-session

use thiserror::Error;

/// Result type alias using scry-session Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a conversation stream
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the wire/transport layer
    #[error(transparent)]
    Stream(#[from] scry_stream::Error),

    /// A failure reported by the agent inside the stream (an `error` event)
    #[error("agent error: {0}")]
    Agent(String),
}
