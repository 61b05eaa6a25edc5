//! Stream session orchestration
//!
//! `StreamSession` owns one conversation and at most one in-flight stream.
//! A single consumer loop pulls chunks from the transport, feeds them
//! through the frame parser and reducer, and publishes an immutable
//! snapshot of the state after every reduction. Readers subscribe to the
//! snapshot channel; only this loop ever mutates the state.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use futures::StreamExt;
use parking_lot::Mutex;
use scry_stream::{FrameParser, Metadata, StreamEvent, decode_frame};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::reducer::{self, Effect};
use crate::state::ConversationState;
use crate::transport::{ChatRequest, Transport};

/// Lifecycle of one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamPhase {
    #[default]
    Idle,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl StreamPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamPhase::Completed | StreamPhase::Failed | StreamPhase::Cancelled
        )
    }
}

/// How a stream ended, when it ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Cancelled,
}

/// A cloneable handle for observing and aborting a session from outside.
///
/// All fields are `Arc`-wrapped, so cloning is cheap.
#[derive(Clone)]
pub struct SessionHandle {
    pub(crate) cancel: Arc<Mutex<CancellationToken>>,
    phase: Arc<Mutex<StreamPhase>>,
    pub(crate) is_running: Arc<AtomicBool>,
    pub(crate) idle_notify: Arc<tokio::sync::Notify>,
}

impl SessionHandle {
    fn new() -> Self {
        Self {
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            phase: Arc::new(Mutex::new(StreamPhase::Idle)),
            is_running: Arc::new(AtomicBool::new(false)),
            idle_notify: Arc::new(tokio::sync::Notify::new()),
        }
    }

    /// Abort the in-flight stream. Takes effect at the next read suspension
    /// point; partial content already reduced is retained.
    pub fn abort(&self) {
        self.cancel.lock().cancel();
    }

    /// Current stream phase
    pub fn phase(&self) -> StreamPhase {
        *self.phase.lock()
    }

    fn set_phase(&self, phase: StreamPhase) {
        *self.phase.lock() = phase;
    }

    /// Whether a stream is currently running
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Wait until the consumer loop finishes
    pub async fn wait_for_idle(&self) {
        let notified = self.idle_notify.notified();
        if !self.is_running.load(Ordering::Acquire) {
            return;
        }
        notified.await;
    }
}

/// One conversation and its (at most one) in-flight stream
pub struct StreamSession {
    transport: Arc<dyn Transport>,
    state: ConversationState,
    state_tx: watch::Sender<Arc<ConversationState>>,
    handle: SessionHandle,
}

impl StreamSession {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_state(transport, ConversationState::new())
    }

    /// Resume from previously persisted conversation state
    pub fn with_state(transport: Arc<dyn Transport>, state: ConversationState) -> Self {
        let (state_tx, _) = watch::channel(Arc::new(state.clone()));
        Self {
            transport,
            state,
            state_tx,
            handle: SessionHandle::new(),
        }
    }

    /// Get a cloneable handle for aborting and observing from outside
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Subscribe to state snapshots. Each reduction publishes a fresh
    /// `Arc<ConversationState>`; receivers always see the latest one.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ConversationState>> {
        self.state_tx.subscribe()
    }

    /// The live state. Between reductions this is a consistent snapshot;
    /// while streaming it may change between observations.
    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    /// Abort the in-flight stream, if any
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Run one conversation turn: send the prompt and consume the response
    /// stream until a terminal event, end of stream, failure, or abort.
    pub async fn stream(
        &mut self,
        prompt: &str,
        session_id: Option<String>,
    ) -> Result<StreamOutcome> {
        // At most one in-flight stream per conversation: a newer turn wins.
        if self.handle.is_running() {
            self.handle.abort();
            self.handle.wait_for_idle().await;
        }
        *self.handle.cancel.lock() = CancellationToken::new();
        self.handle.is_running.store(true, Ordering::Release);
        self.handle.set_phase(StreamPhase::Streaming);

        let session_id = session_id.or_else(|| self.state.session_id.clone());
        self.state.begin_turn(prompt);
        self.publish();

        let request = ChatRequest::new(prompt, session_id);
        let result = self.run(&request).await;

        self.handle.is_running.store(false, Ordering::Release);
        self.handle.idle_notify.notify_waiters();
        result
    }

    /// The single consumer loop. The only suspension points are the
    /// transport open and the per-chunk reads; everything downstream of a
    /// read is synchronous.
    async fn run(&mut self, request: &ChatRequest) -> Result<StreamOutcome> {
        let cancel = self.handle.cancel.lock().clone();

        let opened = {
            let transport = Arc::clone(&self.transport);
            tokio::select! {
                _ = cancel.cancelled() => None,
                opened = transport.open(request) => Some(opened),
            }
        };
        let mut bytes = match opened {
            None => return self.finish_cancelled(),
            Some(Err(e)) => return self.finish_failed(e),
            Some(Ok(stream)) => stream,
        };

        let mut parser = FrameParser::new();
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return self.finish_cancelled(),
                chunk = bytes.next() => chunk,
            };

            match chunk {
                Some(Ok(chunk)) => {
                    for payload in parser.feed(&chunk) {
                        match decode_frame(&payload) {
                            Ok(event) => {
                                if let Some(outcome) = self.reduce(event) {
                                    return outcome;
                                }
                            }
                            Err(e) => {
                                // Malformed frame: drop it, keep the stream alive.
                                tracing::warn!(error = %e, %payload, "dropping undecodable frame");
                            }
                        }
                    }
                }
                Some(Err(e)) => return self.finish_failed(e.into()),
                None => {
                    parser.finish();
                    if !self.state.terminal {
                        // Transport closed without a terminal frame: implicit done.
                        tracing::debug!("stream ended without terminal frame, treating as done");
                        let implicit = StreamEvent::Done {
                            content: None,
                            metadata: Metadata::new(),
                        };
                        if let Some(outcome) = self.reduce(implicit) {
                            return outcome;
                        }
                    }
                    return self.finish_completed();
                }
            }
        }
    }

    /// Apply one event, publish the snapshot, and translate terminal
    /// effects into an outcome that stops the read loop.
    fn reduce(&mut self, event: StreamEvent) -> Option<Result<StreamOutcome>> {
        let (next, effects) = reducer::apply(std::mem::take(&mut self.state), event);
        self.state = next;
        self.publish();

        for effect in effects {
            match effect {
                Effect::SessionEstablished(id) => {
                    tracing::debug!(session_id = %id, "session established");
                }
                Effect::Completed => return Some(self.finish_completed()),
                Effect::Failed(message) => {
                    self.state.thinking = None;
                    self.handle.set_phase(StreamPhase::Failed);
                    self.publish();
                    return Some(Err(Error::Agent(message)));
                }
            }
        }
        None
    }

    fn finish_completed(&mut self) -> Result<StreamOutcome> {
        self.state.terminal = true;
        self.state.thinking = None;
        self.handle.set_phase(StreamPhase::Completed);
        self.publish();
        Ok(StreamOutcome::Completed)
    }

    fn finish_cancelled(&mut self) -> Result<StreamOutcome> {
        // The open message keeps whatever it had accumulated.
        self.state.terminal = true;
        self.state.thinking = None;
        self.handle.set_phase(StreamPhase::Cancelled);
        self.publish();
        Ok(StreamOutcome::Cancelled)
    }

    fn finish_failed(&mut self, error: Error) -> Result<StreamOutcome> {
        self.state.terminal = true;
        self.state.thinking = None;
        self.handle.set_phase(StreamPhase::Failed);
        self.publish();
        Err(error)
    }

    fn publish(&self) {
        self.state_tx.send_replace(Arc::new(self.state.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Role;
    use crate::transport::ByteStream;
    use async_trait::async_trait;
    use bytes::Bytes;

    /// A transport that replays scripted byte chunks with exact boundaries.
    struct ScriptedTransport {
        chunks: Vec<Vec<u8>>,
    }

    impl ScriptedTransport {
        fn new(chunks: Vec<&[u8]>) -> Self {
            Self {
                chunks: chunks.into_iter().map(|c| c.to_vec()).collect(),
            }
        }

        fn from_frames(frames: &[&str]) -> Self {
            let mut body = String::new();
            for frame in frames {
                body.push_str("data: ");
                body.push_str(frame);
                body.push_str("\n\n");
            }
            Self::new(vec![body.as_bytes()])
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn open(&self, _request: &ChatRequest) -> Result<ByteStream> {
            let chunks = self.chunks.clone();
            let stream: ByteStream = Box::pin(async_stream::stream! {
                for chunk in chunks {
                    yield Ok(Bytes::from(chunk));
                }
            });
            Ok(stream)
        }
    }

    /// Yields one text frame, then stays pending until cancelled.
    struct StallingTransport;

    #[async_trait]
    impl Transport for StallingTransport {
        async fn open(&self, _request: &ChatRequest) -> Result<ByteStream> {
            let stream: ByteStream = Box::pin(async_stream::stream! {
                yield Ok(Bytes::from_static(
                    b"data: {\"type\": \"text\", \"content\": \"partial\"}\n",
                ));
                futures::future::pending::<()>().await;
            });
            Ok(stream)
        }
    }

    /// Fails every open with a server error.
    struct FailingTransport;

    #[async_trait]
    impl Transport for FailingTransport {
        async fn open(&self, _request: &ChatRequest) -> Result<ByteStream> {
            Err(scry_stream::Error::server(502, "bad gateway").into())
        }
    }

    #[tokio::test]
    async fn test_full_turn_over_scripted_stream() {
        let transport = Arc::new(ScriptedTransport::from_frames(&[
            r#"{"type": "session", "content": {"session_id": "s1"}}"#,
            r#"{"type": "thinking", "content": "planning", "metadata": {"step": "planning"}}"#,
            r#"{"type": "text", "content": "Hello "}"#,
            r#"{"type": "text", "content": "world"}"#,
            r#"{"type": "done", "content": null}"#,
        ]));
        let mut session = StreamSession::new(transport);

        let outcome = session.stream("hi", None).await.unwrap();
        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(session.handle().phase(), StreamPhase::Completed);

        let state = session.state();
        assert_eq!(state.session_id.as_deref(), Some("s1"));
        assert!(state.terminal);
        assert!(state.thinking.is_none());
        let last = state.transcript.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, "Hello world");
        // thinking + 2 text + done
        assert_eq!(last.events.len(), 4);
    }

    #[tokio::test]
    async fn test_frames_split_across_reads() {
        // One frame split mid-prefix and mid-payload over three reads,
        // then a second read holding two complete frames.
        let transport = Arc::new(ScriptedTransport::new(vec![
            b"da",
            b"ta: {\"type\": \"text\", \"conte",
            b"nt\": \"AB\"}\n",
            b"data: {\"type\": \"text\", \"content\": \"C\"}\ndata: {\"type\": \"done\", \"content\": null}\n",
        ]));
        let mut session = StreamSession::new(transport);

        let outcome = session.stream("hi", None).await.unwrap();
        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(session.state().transcript.last().unwrap().content, "ABC");
    }

    #[tokio::test]
    async fn test_malformed_frame_skipped() {
        let transport = Arc::new(ScriptedTransport::from_frames(&[
            r#"{"type": "text", "content": "Hello"}"#,
            r#"{not valid json"#,
            r#"{"type": "text", "content": "World"}"#,
            r#"{"type": "done", "content": null}"#,
        ]));
        let mut session = StreamSession::new(transport);

        let outcome = session.stream("hi", None).await.unwrap();
        assert_eq!(outcome, StreamOutcome::Completed);
        assert_eq!(
            session.state().transcript.last().unwrap().content,
            "HelloWorld"
        );
    }

    #[tokio::test]
    async fn test_eof_without_done_is_implicit_completion() {
        let transport = Arc::new(ScriptedTransport::from_frames(&[
            r#"{"type": "text", "content": "unfinished"}"#,
        ]));
        let mut session = StreamSession::new(transport);

        let outcome = session.stream("hi", None).await.unwrap();
        assert_eq!(outcome, StreamOutcome::Completed);
        let state = session.state();
        assert!(state.terminal);
        assert_eq!(state.transcript.last().unwrap().content, "unfinished");
        // The implicit done is reduced like an explicit one: it lands in
        // the audit log.
        assert_eq!(
            state.transcript.last().unwrap().events.last().unwrap().type_name(),
            "done"
        );
    }

    #[tokio::test]
    async fn test_error_event_fails_stream_and_keeps_partial() {
        let transport = Arc::new(ScriptedTransport::from_frames(&[
            r#"{"type": "text", "content": "partial answer"}"#,
            r#"{"type": "error", "content": "search backend down"}"#,
        ]));
        let mut session = StreamSession::new(transport);

        let err = session.stream("hi", None).await.unwrap_err();
        match err {
            Error::Agent(message) => assert_eq!(message, "search backend down"),
            other => panic!("expected agent error, got {:?}", other),
        }
        assert_eq!(session.handle().phase(), StreamPhase::Failed);
        assert_eq!(
            session.state().transcript.last().unwrap().content,
            "partial answer"
        );
    }

    #[tokio::test]
    async fn test_transport_open_failure() {
        let mut session = StreamSession::new(Arc::new(FailingTransport));

        let err = session.stream("hi", None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Stream(scry_stream::Error::Server { status: 502, .. })
        ));
        assert_eq!(session.handle().phase(), StreamPhase::Failed);
        // The open message is left with whatever it had (nothing).
        assert!(session.state().transcript.last().unwrap().content.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_retains_partial_text() {
        let mut session = StreamSession::new(Arc::new(StallingTransport));
        let handle = session.handle();
        let mut rx = session.subscribe();

        let task = tokio::spawn(async move {
            let outcome = session.stream("hi", None).await;
            (outcome, session)
        });

        // Wait until the partial text has been reduced into a snapshot.
        loop {
            rx.changed().await.unwrap();
            let snapshot = rx.borrow_and_update().clone();
            if snapshot
                .transcript
                .last()
                .is_some_and(|m| m.content == "partial")
            {
                break;
            }
        }
        handle.abort();

        let (outcome, session) = task.await.unwrap();
        assert_eq!(outcome.unwrap(), StreamOutcome::Cancelled);
        assert_eq!(handle.phase(), StreamPhase::Cancelled);
        let state = session.state();
        assert!(state.terminal);
        assert_eq!(state.transcript.last().unwrap().content, "partial");
    }

    #[tokio::test]
    async fn test_session_id_reused_on_next_turn() {
        let transport = Arc::new(ScriptedTransport::from_frames(&[
            r#"{"type": "session", "content": {"session_id": "s7"}}"#,
            r#"{"type": "text", "content": "first"}"#,
            r#"{"type": "done", "content": null}"#,
        ]));
        let mut session = StreamSession::new(transport);

        session.stream("one", None).await.unwrap();
        assert_eq!(session.state().session_id.as_deref(), Some("s7"));

        // Second turn reopens the transcript and keeps the session id.
        session.stream("two", None).await.unwrap();
        let state = session.state();
        assert_eq!(state.session_id.as_deref(), Some("s7"));
        assert_eq!(state.transcript.len(), 4);
    }

    #[tokio::test]
    async fn test_snapshots_published_per_reduction() {
        let transport = Arc::new(ScriptedTransport::from_frames(&[
            r#"{"type": "text", "content": "A"}"#,
            r#"{"type": "text", "content": "B"}"#,
            r#"{"type": "done", "content": null}"#,
        ]));
        let mut session = StreamSession::new(transport);
        let rx = session.subscribe();

        session.stream("hi", None).await.unwrap();

        // The receiver holds the final snapshot without having polled once.
        let snapshot = rx.borrow().clone();
        assert!(snapshot.terminal);
        assert_eq!(snapshot.transcript.last().unwrap().content, "AB");
    }
}
