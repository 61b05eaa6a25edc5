//! Error types for scry-stream

use thiserror::Error;

/// Result type alias using scry-stream Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while fetching or parsing an event stream
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server responded with a non-success status
    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    /// A frame payload could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The byte stream failed mid-read
    #[error("stream error: {0}")]
    Stream(String),

    /// Stream was aborted by the caller
    #[error("request aborted")]
    Aborted,
}

impl Error {
    /// Create a server error from a status code and message
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }
}

/// A frame payload that is not valid JSON or carries an unrecognized
/// `type` tag. Non-fatal: callers drop the frame and keep reading.
#[derive(Error, Debug)]
#[error("undecodable frame: {0}")]
pub struct DecodeError(#[from] serde_json::Error);
