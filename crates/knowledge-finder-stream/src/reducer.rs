//! Folds decoded frames into the chat transcript, the log timeline and the
//! terminal result of one streaming session.
//!
//! The state machine is `idle -> streaming -> {completed | failed | cancelled}`.
//! Only `streaming` accepts frames; once terminal, every further input is
//! ignored.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::decoder::DecodedChunk;
use crate::errors::{SessionFailure, StreamError};
use crate::event::{Envelope, Frame, StreamEvent, Usage};
use crate::projection::{ChatMessage, LogEntry, NodeStatus, Role};

#[derive(Clone, Debug, PartialEq)]
pub enum SessionStatus {
    Idle,
    Streaming,
    Completed,
    Failed(SessionFailure),
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_) | Self::Cancelled)
    }

    /// Short label used in logs and history entries.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// What a single frame did to the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Applied {
    /// At least one projection changed.
    Updated,
    /// The frame was valid but changed nothing (ping, unknown kind, or the
    /// session is not streaming).
    Ignored,
    /// The frame did not fit the session and was discarded.
    Rejected(StreamError),
}

/// All projections of one session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionState {
    query: String,
    status: SessionStatus,
    transcript: Vec<ChatMessage>,
    log: Vec<LogEntry>,
    log_index: HashMap<String, usize>,
    task_id: Option<String>,
    conversation_id: Option<String>,
    workflow_run_id: Option<String>,
    outputs: Option<Value>,
    usage: Option<Usage>,
    skipped_frames: usize,
    rejected_frames: usize,
}

impl SessionState {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            status: SessionStatus::Idle,
            transcript: Vec::new(),
            log: Vec::new(),
            log_index: HashMap::new(),
            task_id: None,
            conversation_id: None,
            workflow_run_id: None,
            outputs: None,
            usage: None,
            skipped_frames: 0,
            rejected_frames: 0,
        }
    }

    /// Moves `idle -> streaming`, recording the user turn and opening the
    /// assistant message. Returns `false` from any other state.
    pub fn begin(&mut self) -> bool {
        if self.status != SessionStatus::Idle {
            return false;
        }
        if !self.query.trim().is_empty() {
            self.transcript.push(ChatMessage::user(self.query.clone()));
        }
        self.transcript.push(ChatMessage::open_assistant());
        self.status = SessionStatus::Streaming;
        true
    }

    pub fn apply(&mut self, frame: &Frame) -> Applied {
        if self.status != SessionStatus::Streaming {
            return Applied::Ignored;
        }
        self.note_envelope(&frame.envelope);

        match &frame.event {
            StreamEvent::WorkflowStarted(data) => {
                self.workflow_run_id = Some(data.id.clone());
                Applied::Updated
            }
            StreamEvent::NodeStarted(data) => {
                if self.log_index.contains_key(&data.id) {
                    return self.reject(format!("duplicate node_started for {}", data.id));
                }
                self.log_index.insert(data.id.clone(), self.log.len());
                self.log.push(LogEntry::started(data));
                Applied::Updated
            }
            StreamEvent::NodeFinished(data) => {
                let Some(&idx) = self.log_index.get(&data.id) else {
                    return self.reject(format!("node_finished without node_started for {}", data.id));
                };
                let entry = &mut self.log[idx];
                if entry.status != NodeStatus::Running {
                    return self.reject(format!("node {} already finished", data.id));
                }
                entry.finish(data);
                Applied::Updated
            }
            StreamEvent::Message { text } | StreamEvent::TextChunk { text } => {
                if text.is_empty() {
                    return Applied::Ignored;
                }
                let message_id = frame.envelope.message_id.clone();
                match self.open_message_mut() {
                    Some(message) => {
                        message.text.push_str(text);
                        if message.message_id.is_none() {
                            message.message_id = message_id;
                        }
                        Applied::Updated
                    }
                    None => self.reject("answer delta with no open message"),
                }
            }
            StreamEvent::MessageReplace { text } => match self.open_message_mut() {
                Some(message) => {
                    message.text.clone_from(text);
                    Applied::Updated
                }
                None => self.reject("message_replace with no open message"),
            },
            StreamEvent::WorkflowFinished(data) => {
                if data.outputs.is_some() {
                    self.outputs.clone_from(&data.outputs);
                }
                if data.is_failure() {
                    let message = data
                        .error
                        .clone()
                        .filter(|e| !e.is_empty())
                        .unwrap_or_else(|| {
                            format!("workflow {}", data.status.as_deref().unwrap_or("failed"))
                        });
                    self.terminate(SessionStatus::Failed(SessionFailure::Workflow { message }));
                }
                Applied::Updated
            }
            StreamEvent::MessageEnd(end) => {
                if let Some(message) = self.open_message_mut() {
                    message.citations.clone_from(&end.citations);
                }
                if end.outputs.is_some() {
                    self.outputs.clone_from(&end.outputs);
                }
                if end.usage.is_some() {
                    self.usage.clone_from(&end.usage);
                }
                self.terminate(SessionStatus::Completed);
                Applied::Updated
            }
            StreamEvent::Error(err) => {
                let failure = SessionFailure::Remote {
                    status: err.status,
                    code: err.code.clone(),
                    message: err
                        .message
                        .clone()
                        .unwrap_or_else(|| "stream error".to_string()),
                };
                self.terminate(SessionStatus::Failed(failure));
                Applied::Updated
            }
            StreamEvent::Ping => Applied::Ignored,
            StreamEvent::Unknown { kind } => {
                debug!(kind = %kind, "ignoring unknown stream event");
                Applied::Ignored
            }
        }
    }

    /// Applies one decoded chunk in order, stopping at the first terminal
    /// frame. Returns whether any projection changed.
    pub fn ingest(&mut self, chunk: &DecodedChunk) -> bool {
        let mut changed = false;
        for item in &chunk.items {
            if self.status != SessionStatus::Streaming {
                break;
            }
            match item {
                Ok(frame) => {
                    if self.apply(frame) == Applied::Updated {
                        changed = true;
                    }
                }
                Err(err) => self.record_skipped(err),
            }
        }
        changed
    }

    /// Counts a malformed line; ignored once the session is no longer
    /// streaming.
    pub fn record_skipped(&mut self, err: &StreamError) {
        if self.status == SessionStatus::Streaming {
            debug!(error = %err, "frame skipped");
            self.skipped_frames += 1;
        }
    }

    /// User cancellation; only valid while streaming.
    pub fn cancel(&mut self) -> bool {
        if self.status != SessionStatus::Streaming {
            return false;
        }
        self.terminate(SessionStatus::Cancelled);
        true
    }

    /// The transport closed without a terminal frame.
    pub fn transport_closed(&mut self) -> bool {
        if self.status != SessionStatus::Streaming {
            return false;
        }
        self.terminate(SessionStatus::Completed);
        true
    }

    /// The transport failed; accumulated content is kept.
    pub fn transport_failed(&mut self, message: impl Into<String>) -> bool {
        if self.status != SessionStatus::Streaming {
            return false;
        }
        self.terminate(SessionStatus::Failed(SessionFailure::Transport {
            message: message.into(),
        }));
        true
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    /// The assistant message of this session, open or closed.
    pub fn answer(&self) -> Option<&ChatMessage> {
        self.transcript
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn workflow_run_id(&self) -> Option<&str> {
        self.workflow_run_id.as_deref()
    }

    pub fn outputs(&self) -> Option<&Value> {
        self.outputs.as_ref()
    }

    pub fn usage(&self) -> Option<&Usage> {
        self.usage.as_ref()
    }

    /// Malformed lines skipped so far.
    pub fn skipped_frames(&self) -> usize {
        self.skipped_frames
    }

    /// Well-formed frames discarded as out of sequence.
    pub fn rejected_frames(&self) -> usize {
        self.rejected_frames
    }

    fn open_message_mut(&mut self) -> Option<&mut ChatMessage> {
        self.transcript
            .last_mut()
            .filter(|m| m.role == Role::Assistant && !m.complete)
    }

    fn note_envelope(&mut self, envelope: &Envelope) {
        if self.task_id.is_none() {
            self.task_id.clone_from(&envelope.task_id);
        }
        if envelope.conversation_id.is_some() {
            self.conversation_id.clone_from(&envelope.conversation_id);
        }
    }

    fn reject(&mut self, message: impl Into<String>) -> Applied {
        let err = StreamError::protocol(message);
        warn!(error = %err, "discarding out-of-sequence frame");
        self.rejected_frames += 1;
        Applied::Rejected(err)
    }

    fn terminate(&mut self, status: SessionStatus) {
        if let Some(message) = self.open_message_mut() {
            message.complete = true;
        }
        debug!(status = status.label(), "session reached terminal state");
        self.status = status;
    }
}

/// Pure form of [`SessionState::apply`].
pub fn reduce(mut state: SessionState, frame: &Frame) -> SessionState {
    let _ = state.apply(frame);
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{FrameDecoder, decode_line};

    fn frame(line: &str) -> Frame {
        decode_line(line)
            .expect("valid line")
            .expect("line carries a frame")
    }

    fn streaming(query: &str) -> SessionState {
        let mut state = SessionState::new(query);
        assert!(state.begin());
        state
    }

    fn feed(state: &mut SessionState, chunks: &[&[u8]]) {
        let mut decoder = FrameDecoder::default();
        for chunk in chunks {
            let decoded = decoder.push_chunk(chunk);
            state.ingest(&decoded);
        }
        if let Some(err) = decoder.finish() {
            state.record_skipped(&err);
        }
        state.transport_closed();
    }

    const CHAT_STREAM: &str = concat!(
        "data: {\"event\":\"workflow_started\",\"task_id\":\"t1\",\"conversation_id\":\"c1\",\"data\":{\"id\":\"run-1\"}}\n\n",
        "data: {\"event\":\"node_started\",\"data\":{\"id\":\"e1\",\"title\":\"Knowledge Retrieval\",\"created_at\":1700000000}}\n\n",
        "data: {\"event\":\"node_finished\",\"data\":{\"id\":\"e1\",\"status\":\"succeeded\",\"outputs\":{\"hits\":2},\"elapsed_time\":0.4,\"finished_at\":1700000001}}\n\n",
        "event: ping\n\n",
        "data: {\"event\":\"message\",\"message_id\":\"m1\",\"answer\":\"Caf\u{e9} \"}\n\n",
        "data: {\"event\":\"message\",\"message_id\":\"m1\",\"answer\":\"ol\u{e9}\"}\n\n",
        "data: {\"event\":\"message_end\",\"message_id\":\"m1\",\"metadata\":{\"retriever_resources\":[{\"position\":1,\"document_name\":\"menu.md\"}]}}\n\n",
    );

    #[test]
    fn hello_example_concatenates_and_completes() {
        let mut state = streaming("greet me");
        for line in [
            r#"data: {"event":"message","text":"Hel"}"#,
            r#"data: {"event":"message","text":"lo"}"#,
            r#"data: {"event":"message_end","outputs":{}}"#,
        ] {
            assert_eq!(state.apply(&frame(line)), Applied::Updated);
        }
        let answer = state.answer().expect("assistant message");
        assert_eq!(answer.text, "Hello");
        assert!(answer.complete);
        assert_eq!(state.status(), &SessionStatus::Completed);
        assert_eq!(state.transcript()[0].role, Role::User);
    }

    #[test]
    fn transcript_is_concatenation_of_deltas_in_order() {
        let deltas = ["The ", "answer ", "", "is ", "42", "."];
        let mut state = streaming("q");
        for delta in deltas {
            let line = format!(
                "data: {}",
                serde_json::json!({"event": "message", "answer": delta})
            );
            state.apply(&frame(&line));
        }
        state.apply(&frame(r#"data: {"event":"message_end"}"#));
        assert_eq!(state.answer().map(|m| m.text.as_str()), Some("The answer is 42."));
    }

    fn assert_split_invariant(bytes: &[u8]) -> SessionState {
        let mut whole = streaming("q");
        feed(&mut whole, &[bytes]);
        for offset in 0..=bytes.len() {
            let mut split = streaming("q");
            feed(&mut split, &[&bytes[..offset], &bytes[offset..]]);
            assert_eq!(split, whole, "projections differ when split at byte {offset}");
        }
        whole
    }

    #[test]
    fn chunk_boundary_invariance_at_every_offset() {
        let whole = assert_split_invariant(CHAT_STREAM.as_bytes());
        assert_eq!(whole.status(), &SessionStatus::Completed);
        assert_eq!(whole.answer().map(|m| m.text.as_str()), Some("Caf\u{e9} ol\u{e9}"));

        let trailing_garbage = concat!(
            "data: {\"event\":\"message\",\"answer\":\"done\"}\n",
            "data: {bad json\n",
            "data: {\"event\":\"message_end\"}\n",
            "data: {bad json\n",
            "garbage after the end\n",
            "data: {\"event\":\"message\",\"answer\":\" late\"}\n",
        );
        let whole = assert_split_invariant(trailing_garbage.as_bytes());
        assert_eq!(whole.status(), &SessionStatus::Completed);
        assert_eq!(whole.skipped_frames(), 1, "lines after message_end are not counted");
        assert_eq!(whole.answer().map(|m| m.text.as_str()), Some("done"));
    }

    #[test]
    fn projections_from_full_stream() {
        let mut state = streaming("q");
        feed(&mut state, &[CHAT_STREAM.as_bytes()]);
        assert_eq!(state.task_id(), Some("t1"));
        assert_eq!(state.conversation_id(), Some("c1"));
        assert_eq!(state.workflow_run_id(), Some("run-1"));
        assert_eq!(state.log().len(), 1);
        let entry = &state.log()[0];
        assert_eq!(entry.title, "Knowledge Retrieval");
        assert_eq!(entry.status, NodeStatus::Succeeded);
        assert!(entry.started_at.is_some() && entry.finished_at.is_some());
        let answer = state.answer().expect("answer");
        assert_eq!(answer.message_id.as_deref(), Some("m1"));
        assert_eq!(answer.citations.len(), 1);
    }

    #[test]
    fn orphan_node_finished_is_dropped() {
        let mut state = streaming("q");
        let applied = state.apply(&frame(
            r#"data: {"event":"node_finished","data":{"id":"ghost","status":"succeeded"}}"#,
        ));
        assert!(matches!(applied, Applied::Rejected(StreamError::Protocol { .. })));
        assert!(state.log().is_empty());
        assert_eq!(state.rejected_frames(), 1);
        assert_eq!(state.status(), &SessionStatus::Streaming);
    }

    #[test]
    fn duplicate_node_events_are_rejected() {
        let mut state = streaming("q");
        let started = frame(r#"data: {"event":"node_started","data":{"id":"e1","title":"LLM"}}"#);
        let finished = frame(r#"data: {"event":"node_finished","data":{"id":"e1","status":"failed","error":"boom"}}"#);
        assert_eq!(state.apply(&started), Applied::Updated);
        assert!(matches!(state.apply(&started), Applied::Rejected(_)));
        assert_eq!(state.apply(&finished), Applied::Updated);
        assert!(matches!(state.apply(&finished), Applied::Rejected(_)));
        assert_eq!(state.log().len(), 1);
        assert_eq!(state.log()[0].status, NodeStatus::Failed);
        assert_eq!(state.log()[0].error.as_deref(), Some("boom"));
    }

    #[test]
    fn cancel_freezes_partial_answer() {
        let mut state = streaming("q");
        state.apply(&frame(r#"data: {"event":"message","answer":"partial"}"#));
        assert!(state.cancel());
        assert!(!state.cancel());

        let after = [
            r#"data: {"event":"message","answer":" more"}"#,
            r#"data: {"event":"message_end"}"#,
            r#"data: {"event":"node_started","data":{"id":"late"}}"#,
        ];
        for line in after {
            assert_eq!(state.apply(&frame(line)), Applied::Ignored);
        }
        assert!(!state.transport_failed("late drop"));
        let answer = state.answer().expect("answer");
        assert_eq!(answer.text, "partial");
        assert!(answer.complete);
        assert_eq!(state.status(), &SessionStatus::Cancelled);
        assert!(state.log().is_empty());
    }

    #[test]
    fn error_frame_fails_and_keeps_partial_text() {
        let mut state = streaming("q");
        state.apply(&frame(r#"data: {"event":"message","answer":"half an ans"}"#));
        state.apply(&frame(
            r#"data: {"event":"error","status":400,"code":"completion_request_error","message":"quota"}"#,
        ));
        assert!(matches!(
            state.status(),
            SessionStatus::Failed(SessionFailure::Remote { status: Some(400), .. })
        ));
        let answer = state.answer().expect("answer");
        assert_eq!(answer.text, "half an ans");
        assert!(answer.complete);
    }

    #[test]
    fn transport_failure_keeps_partial_text() {
        let mut state = streaming("q");
        state.apply(&frame(r#"data: {"event":"message","answer":"so far"}"#));
        assert!(state.transport_failed("connection reset"));
        assert!(matches!(
            state.status(),
            SessionStatus::Failed(SessionFailure::Transport { .. })
        ));
        assert_eq!(state.answer().map(|m| m.text.as_str()), Some("so far"));
    }

    #[test]
    fn failed_workflow_finished_is_terminal() {
        let mut state = streaming("q");
        state.apply(&frame(
            r#"data: {"event":"workflow_finished","data":{"status":"failed","error":"node crashed"}}"#,
        ));
        assert_eq!(
            state.status(),
            &SessionStatus::Failed(SessionFailure::Workflow {
                message: "node crashed".into()
            })
        );
    }

    #[test]
    fn workflow_app_text_chunks_complete_on_close() {
        let mut state = streaming("summarize");
        feed(
            &mut state,
            &[concat!(
                "data: {\"event\":\"text_chunk\",\"data\":{\"text\":\"Sum\"}}\n",
                "data: {\"event\":\"text_chunk\",\"data\":{\"text\":\"mary\"}}\n",
                "data: {\"event\":\"workflow_finished\",\"data\":{\"status\":\"succeeded\",\"outputs\":{\"text\":\"Summary\"}}}\n",
            )
            .as_bytes()],
        );
        assert_eq!(state.status(), &SessionStatus::Completed);
        assert_eq!(state.answer().map(|m| m.text.as_str()), Some("Summary"));
        assert_eq!(state.outputs(), Some(&serde_json::json!({"text": "Summary"})));
    }

    #[test]
    fn message_replace_overwrites_open_text() {
        let mut state = streaming("q");
        state.apply(&frame(r#"data: {"event":"message","answer":"rude words"}"#));
        state.apply(&frame(r#"data: {"event":"message_replace","answer":"[redacted]"}"#));
        assert_eq!(state.answer().map(|m| m.text.as_str()), Some("[redacted]"));
    }

    #[test]
    fn malformed_line_between_valid_frames_is_skipped() {
        let mut state = streaming("q");
        feed(
            &mut state,
            &[b"data: {\"event\":\"message\",\"answer\":\"a\"}\ndata: {bad json\ndata: {\"event\":\"message\",\"answer\":\"b\"}\n".as_slice()],
        );
        assert_eq!(state.answer().map(|m| m.text.as_str()), Some("ab"));
        assert_eq!(state.skipped_frames(), 1);
    }

    #[test]
    fn unknown_and_ping_events_are_ignored() {
        let mut state = streaming("q");
        assert_eq!(state.apply(&frame(r#"data: {"event":"ping"}"#)), Applied::Ignored);
        assert_eq!(
            state.apply(&frame(r#"data: {"event":"tts_message","audio":"AAAA"}"#)),
            Applied::Ignored
        );
        assert_eq!(state.status(), &SessionStatus::Streaming);
    }

    #[test]
    fn idle_session_ignores_frames_and_cancel() {
        let mut state = SessionState::new("q");
        assert_eq!(
            state.apply(&frame(r#"data: {"event":"message","answer":"x"}"#)),
            Applied::Ignored
        );
        assert!(!state.cancel());
        assert!(state.transcript().is_empty());
        assert!(state.begin());
        assert!(!state.begin());
    }

    #[test]
    fn reduce_is_the_functional_form_of_apply() {
        let frames = [
            frame(r#"data: {"event":"message","answer":"x"}"#),
            frame(r#"data: {"event":"message_end"}"#),
        ];
        let state = frames.iter().fold(streaming("q"), reduce);
        assert_eq!(state.status(), &SessionStatus::Completed);
        assert_eq!(state.answer().map(|m| m.text.as_str()), Some("x"));
    }
}
