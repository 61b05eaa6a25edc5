//! scry-stream: Wire-level types for the research agent streaming protocol
//!
//! This crate covers the byte-to-event half of the pipeline: an incremental
//! frame parser that splits an arbitrarily chunked SSE byte stream into
//! payload frames, and the typed `StreamEvent` those frames decode into.

pub mod error;
pub mod event;
pub mod parser;

pub use error::{DecodeError, Error, Result};
pub use event::{Metadata, SessionInfo, StreamEvent, ThinkingStep, ToolCall, ToolOutput};
pub use parser::{FrameParser, decode_frame};
