//! Pure reduction of stream events into conversation state
//!
//! `apply` is the only place events touch state. It takes the state by
//! value and returns the next state plus the effects the caller must
//! surface; it performs no I/O and no logging side effects beyond warnings
//! about dropped events.

use scry_stream::StreamEvent;

use crate::state::{ConversationState, ThinkingStatus};

/// Externally observable consequences of one reduction
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// The backend assigned or confirmed a session id
    SessionEstablished(String),
    /// The stream finished cleanly
    Completed,
    /// The agent reported a failure; the message is user-visible
    Failed(String),
}

/// Apply one event in arrival order, producing the next state.
///
/// Once the state is terminal, every further event is a protocol
/// violation: logged and dropped, the state returned unchanged.
pub fn apply(mut state: ConversationState, event: StreamEvent) -> (ConversationState, Vec<Effect>) {
    if state.terminal {
        tracing::warn!(
            event = event.type_name(),
            "event received after terminal state, ignoring"
        );
        return (state, Vec::new());
    }

    let mut effects = Vec::new();

    match &event {
        StreamEvent::Session { content, .. } => {
            // Bookkeeping only: session events never touch the transcript.
            if let Some(id) = &content.session_id {
                state.session_id = Some(id.clone());
                effects.push(Effect::SessionEstablished(id.clone()));
            }
            return (state, effects);
        }
        StreamEvent::Thinking { content, .. } => {
            state.thinking = Some(ThinkingStatus {
                step: event.thinking_step(),
                message: content.clone(),
            });
        }
        StreamEvent::Text { content, .. } => {
            state.thinking = None;
            if let Some(open) = state.open_message_mut() {
                open.content.push_str(content);
            }
        }
        StreamEvent::ToolCall { .. }
        | StreamEvent::ToolResult { .. }
        | StreamEvent::AgentAction { .. } => {}
        StreamEvent::Error { content, .. } => {
            state.terminal = true;
            effects.push(Effect::Failed(content.clone()));
        }
        StreamEvent::Done { .. } => {
            state.terminal = true;
            effects.push(Effect::Completed);
        }
    }

    // Audit log: every event lands on the open message, in arrival order.
    match state.open_message_mut() {
        Some(open) => open.events.push(event),
        None => tracing::warn!(
            event = event.type_name(),
            "event with no open message, dropping"
        ),
    }

    (state, effects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scry_stream::{Metadata, SessionInfo, StreamEvent, ThinkingStep, ToolCall, ToolOutput};

    fn fresh() -> ConversationState {
        let mut state = ConversationState::new();
        state.begin_turn("research rust for me");
        state
    }

    fn text(content: &str) -> StreamEvent {
        StreamEvent::Text {
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    fn done() -> StreamEvent {
        StreamEvent::Done {
            content: None,
            metadata: Metadata::new(),
        }
    }

    fn apply_all(
        mut state: ConversationState,
        events: Vec<StreamEvent>,
    ) -> (ConversationState, Vec<Effect>) {
        let mut all_effects = Vec::new();
        for event in events {
            let (next, effects) = apply(state, event);
            state = next;
            all_effects.extend(effects);
        }
        (state, all_effects)
    }

    #[test]
    fn test_text_concatenation_law() {
        let (state, _) = apply_all(fresh(), vec![text("A"), text("B"), text("C")]);
        assert_eq!(state.open_message().unwrap().content, "ABC");
    }

    #[test]
    fn test_text_clears_thinking() {
        let thinking: StreamEvent = serde_json::from_str(
            r#"{"type": "thinking", "content": "planning the report", "metadata": {"step": "planning"}}"#,
        )
        .unwrap();
        let (state, _) = apply(fresh(), thinking);
        assert!(state.thinking.is_some());

        let (state, _) = apply(state, text("Here is"));
        assert!(state.thinking.is_none());
    }

    #[test]
    fn test_thinking_sets_status_without_touching_text() {
        let event: StreamEvent = serde_json::from_str(
            r#"{"type": "thinking", "content": "gathering sources", "metadata": {"step": "researching"}}"#,
        )
        .unwrap();
        let (state, _) = apply(fresh(), event);
        let status = state.thinking.as_ref().unwrap();
        assert_eq!(status.step, ThinkingStep::Researching);
        assert_eq!(status.message, "gathering sources");
        assert!(state.transcript.last().unwrap().content.is_empty());
    }

    #[test]
    fn test_session_bootstrap_scenario() {
        let session = StreamEvent::Session {
            content: SessionInfo {
                session_id: Some("s1".into()),
            },
            metadata: Metadata::new(),
        };
        let (state, effects) = apply_all(fresh(), vec![session, text("Hi"), done()]);

        assert_eq!(state.session_id.as_deref(), Some("s1"));
        assert_eq!(state.transcript.last().unwrap().content, "Hi");
        assert!(state.terminal);
        assert!(effects.contains(&Effect::SessionEstablished("s1".into())));
        assert!(effects.contains(&Effect::Completed));
    }

    #[test]
    fn test_session_event_not_recorded_on_transcript() {
        let session = StreamEvent::Session {
            content: SessionInfo {
                session_id: Some("s9".into()),
            },
            metadata: Metadata::new(),
        };
        let (state, _) = apply(fresh(), session);
        assert!(state.transcript.last().unwrap().events.is_empty());
    }

    #[test]
    fn test_tool_round_trip_scenario() {
        let call = StreamEvent::ToolCall {
            content: ToolCall {
                tool: "search".into(),
                input: serde_json::json!({"q": "x"}),
            },
            metadata: Metadata::new(),
        };
        let result = StreamEvent::ToolResult {
            content: ToolOutput {
                tool: "search".into(),
                output: serde_json::json!({"hits": 3}),
            },
            metadata: Metadata::new(),
        };
        let (state, _) = apply_all(fresh(), vec![call, result, done()]);

        let open = state.transcript.last().unwrap();
        assert_eq!(open.events.len(), 3);
        assert_eq!(open.events[0].type_name(), "tool_call");
        assert_eq!(open.events[1].type_name(), "tool_result");
        assert_eq!(open.events[2].type_name(), "done");
        assert!(open.content.is_empty());
    }

    #[test]
    fn test_event_audit_completeness() {
        let events = vec![
            text("a"),
            serde_json::from_str(r#"{"type": "thinking", "content": "t"}"#).unwrap(),
            serde_json::from_str(r#"{"type": "agent_action", "content": {"log": "x"}}"#).unwrap(),
            text("b"),
            done(),
        ];
        let n = events.len();
        let (state, _) = apply_all(fresh(), events);
        assert_eq!(state.transcript.last().unwrap().events.len(), n);
    }

    #[test]
    fn test_error_event_terminates_and_surfaces_message() {
        let error: StreamEvent =
            serde_json::from_str(r#"{"type": "error", "content": "model unavailable"}"#).unwrap();
        let (state, effects) = apply_all(fresh(), vec![text("so far"), error]);

        assert!(state.terminal);
        assert_eq!(effects, vec![Effect::Failed("model unavailable".into())]);
        // Partial content and the error event itself are retained.
        let last = state.transcript.last().unwrap();
        assert_eq!(last.content, "so far");
        assert_eq!(last.events.len(), 2);
    }

    #[test]
    fn test_terminal_monotonicity() {
        let (state, _) = apply_all(fresh(), vec![text("hi"), done()]);
        let before = state.transcript.clone();

        let (state, effects) = apply_all(
            state,
            vec![text("late"), done(), {
                StreamEvent::Session {
                    content: SessionInfo {
                        session_id: Some("late".into()),
                    },
                    metadata: Metadata::new(),
                }
            }],
        );
        assert!(state.terminal);
        assert!(effects.is_empty());
        assert_eq!(state.transcript, before);
        assert_ne!(state.session_id.as_deref(), Some("late"));
    }

    #[test]
    fn test_arrival_order_preserved() {
        let (state, _) = apply_all(fresh(), vec![text("1"), text("2"), text("3")]);
        let contents: Vec<&str> = state
            .transcript
            .last()
            .unwrap()
            .events
            .iter()
            .map(|e| match e {
                StreamEvent::Text { content, .. } => content.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(contents, vec!["1", "2", "3"]);
    }
}
