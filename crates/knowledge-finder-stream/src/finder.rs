use std::sync::Arc;

use tracing::info;

use crate::backend::{Backend, BackendMode, ChatRequest};
use crate::backends::{DifyBackend, ReplayBackend};
use crate::config::FinderConfig;
use crate::errors::FinderError;
use crate::history::{History, HistoryEntry};
use crate::reducer::{SessionState, SessionStatus};
use crate::run::{AbortHandle, RunStream, SessionReport};

/// Entry point for asking questions and keeping the answer history.
///
/// At most one session streams at a time: starting a new one aborts the
/// previous one first.
pub struct Finder {
    backend: Arc<dyn Backend>,
    config: FinderConfig,
    history: History,
    active: Option<AbortHandle>,
    conversation_id: Option<String>,
}

impl Finder {
    pub fn builder() -> FinderBuilder {
        FinderBuilder::default()
    }

    pub fn mode(&self) -> BackendMode {
        self.backend.mode()
    }

    pub fn config(&self) -> &FinderConfig {
        &self.config
    }

    /// Starts a streaming answer for `query`, continuing the current
    /// conversation when one is known.
    pub async fn ask(&mut self, query: impl Into<String>) -> Result<RunStream, FinderError> {
        let mut req = ChatRequest::new(query);
        if let Some(conversation_id) = self.conversation_id.as_ref() {
            req = req.conversation_id(conversation_id.clone());
        }
        self.ask_with(req).await
    }

    /// Starts a streaming answer for a fully specified request.
    pub async fn ask_with(&mut self, req: ChatRequest) -> Result<RunStream, FinderError> {
        req.validate()?;
        self.cancel_active();
        let state = SessionState::new(req.query.clone());
        let chunks = self.backend.open_stream(req).await?;
        let run = RunStream::spawn(chunks, state, self.config.update_buffer_capacity);
        info!(run_id = %run.run_id(), mode = %self.mode(), "started finder session");
        self.active = Some(run.abort_handle());
        Ok(run)
    }

    /// Aborts the active session, if any. Returns whether one was running.
    pub fn cancel_active(&mut self) -> bool {
        match self.active.take() {
            Some(handle) if !handle.is_aborted() && !handle.is_finished() => {
                info!("cancelling active finder session");
                handle.abort();
                true
            }
            _ => false,
        }
    }

    /// Records a finished session: completed answers go into the history and
    /// their conversation id is reused for follow-ups.
    ///
    /// Returns the id of the new history entry, if one was created.
    pub fn record(&mut self, report: &SessionReport) -> Option<uuid::Uuid> {
        let state = &report.state;
        if state.status() == &SessionStatus::Completed
            && let Some(conversation_id) = state.conversation_id()
        {
            self.conversation_id = Some(conversation_id.to_string());
        }
        let entry = HistoryEntry::from_session(state)?;
        let id = entry.id;
        self.history.push(entry);
        Some(id)
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Forgets the conversation so the next question starts a new one.
    pub fn reset_conversation(&mut self) {
        self.conversation_id = None;
    }
}

/// Builder used to choose the backend and settings before creating a
/// `Finder`.
#[derive(Default)]
pub struct FinderBuilder {
    backend: Option<Arc<dyn Backend>>,
    config: FinderConfig,
}

impl FinderBuilder {
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn config(mut self, config: FinderConfig) -> Self {
        self.config = config;
        self
    }

    /// Picks the backend matching `config.mode`: the given replay for mock
    /// mode, a Dify client from the environment for live mode.
    pub fn backend_for_mode(mut self, mock: ReplayBackend) -> Result<Self, FinderError> {
        let backend: Arc<dyn Backend> = match self.config.mode {
            BackendMode::Mock => Arc::new(mock),
            BackendMode::Live => Arc::new(DifyBackend::from_env()?),
        };
        self.backend = Some(backend);
        Ok(self)
    }

    /// Builds the finder; the backend's mode must match the configured mode.
    pub fn build(self) -> Result<Finder, FinderError> {
        self.config.validate()?;
        let backend = self
            .backend
            .ok_or_else(|| FinderError::Config("no backend configured".into()))?;
        if backend.mode() != self.config.mode {
            return Err(FinderError::Config(format!(
                "backend runs in {} mode but config selects {}",
                backend.mode(),
                self.config.mode
            )));
        }
        Ok(Finder {
            backend,
            history: History::with_capacity(self.config.history_capacity),
            config: self.config,
            active: None,
            conversation_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ChunkStream;
    use crate::errors::StreamError;
    use crate::run::SessionOutcome;
    use bytes::Bytes;
    use futures::stream;
    use std::sync::Mutex;

    const ANSWER: &str = concat!(
        "data: {\"event\":\"message\",\"conversation_id\":\"conv-1\",\"answer\":\"See \"}\n\n",
        "data: {\"event\":\"message\",\"conversation_id\":\"conv-1\",\"answer\":\"page 4.\"}\n\n",
        "data: {\"event\":\"message_end\",\"conversation_id\":\"conv-1\",\"metadata\":{\"retriever_resources\":[{\"position\":1,\"document_name\":\"guide.pdf\"}]}}\n\n",
    );

    fn mock_finder(backend: ReplayBackend) -> Finder {
        Finder::builder()
            .backend(Arc::new(backend))
            .build()
            .expect("finder")
    }

    /// First call hangs forever, later calls replay `ANSWER`; records requests.
    struct HangingThenAnswering {
        calls: Mutex<Vec<ChatRequest>>,
    }

    #[async_trait::async_trait]
    impl Backend for HangingThenAnswering {
        fn mode(&self) -> BackendMode {
            BackendMode::Mock
        }

        async fn open_stream(&self, req: ChatRequest) -> Result<ChunkStream, FinderError> {
            let first = {
                let mut calls = self.calls.lock().expect("lock");
                calls.push(req);
                calls.len() == 1
            };
            if first {
                Ok(Box::pin(stream::pending::<Result<Bytes, StreamError>>()))
            } else {
                Ok(Box::pin(stream::iter(vec![Ok(Bytes::from_static(
                    ANSWER.as_bytes(),
                ))])))
            }
        }
    }

    #[tokio::test]
    async fn ask_streams_and_record_fills_history() {
        let mut finder = mock_finder(ReplayBackend::chunked(ANSWER, 7));
        let run = finder.ask("where is the pricing table?").await.expect("ask");
        let report = run.finish().await.expect("report");
        assert_eq!(report.outcome, SessionOutcome::Completed);

        let id = finder.record(&report).expect("history entry");
        let entry = finder.history().get(id).expect("stored");
        assert_eq!(entry.answer, "See page 4.");
        assert_eq!(entry.citations.len(), 1);
        assert_eq!(finder.conversation_id(), Some("conv-1"));

        finder.clear_history();
        assert!(finder.history().is_empty());
    }

    #[tokio::test]
    async fn new_question_cancels_the_active_stream() {
        let backend = Arc::new(HangingThenAnswering {
            calls: Mutex::new(Vec::new()),
        });
        let mut finder = Finder::builder()
            .backend(backend.clone())
            .build()
            .expect("finder");

        let first = finder.ask("first").await.expect("first ask");
        let second = finder.ask("second").await.expect("second ask");

        let first_report = first.finish().await.expect("first report");
        assert_eq!(first_report.outcome, SessionOutcome::Cancelled);
        let second_report = second.finish().await.expect("second report");
        assert_eq!(second_report.outcome, SessionOutcome::Completed);
        assert_eq!(backend.calls.lock().expect("lock").len(), 2);
    }

    #[tokio::test]
    async fn follow_up_reuses_conversation_until_reset() {
        let backend = Arc::new(HangingThenAnswering {
            calls: Mutex::new(Vec::new()),
        });
        let mut finder = Finder::builder()
            .backend(backend.clone())
            .build()
            .expect("finder");

        finder.ask("warm-up").await.expect("ask");
        let report = finder.ask("first").await.expect("ask").finish().await.expect("report");
        finder.record(&report);
        let _ = finder.ask("follow-up").await.expect("ask");
        finder.reset_conversation();
        let _ = finder.ask("fresh").await.expect("ask");

        let calls = backend.calls.lock().expect("lock");
        assert_eq!(calls[1].conversation_id, None);
        assert_eq!(calls[2].conversation_id.as_deref(), Some("conv-1"));
        assert_eq!(calls[3].conversation_id, None);
    }

    #[tokio::test]
    async fn transport_failure_is_not_a_completed_history_entry() {
        let mut finder = mock_finder(
            ReplayBackend::new(vec!["data: {\"event\":\"message\",\"answer\":\"par\"}\n"])
                .fail_with("socket closed"),
        );
        let report = finder.ask("q").await.expect("ask").finish().await.expect("report");
        assert!(matches!(report.outcome, SessionOutcome::Failed(_)));
        let id = finder.record(&report).expect("partial answer kept");
        assert_eq!(finder.history().get(id).map(|e| e.outcome.as_str()), Some("failed"));
        assert_eq!(finder.conversation_id(), None);
    }

    #[tokio::test]
    async fn cancel_active_after_finished_session_is_noop() {
        let mut finder = mock_finder(ReplayBackend::new(vec![ANSWER]));
        let report = finder.ask("q").await.expect("ask").finish().await.expect("report");
        assert_eq!(report.outcome, SessionOutcome::Completed);
        assert!(!finder.cancel_active());
    }

    #[tokio::test]
    async fn cancel_active_without_session_is_noop() {
        let mut finder = mock_finder(ReplayBackend::default());
        assert!(!finder.cancel_active());
    }

    #[tokio::test]
    async fn empty_query_is_rejected_before_contacting_backend() {
        let mut finder = mock_finder(ReplayBackend::default());
        assert!(matches!(
            finder.ask("  ").await,
            Err(FinderError::Validation(_))
        ));
    }

    #[test]
    fn build_requires_backend_matching_mode() {
        assert!(matches!(
            Finder::builder().build(),
            Err(FinderError::Config(msg)) if msg.contains("no backend")
        ));
        let result = Finder::builder()
            .config(FinderConfig::default().mode(BackendMode::Live))
            .backend(Arc::new(ReplayBackend::default()))
            .build();
        assert!(matches!(result, Err(FinderError::Config(msg)) if msg.contains("mock mode")));
    }

    #[test]
    fn backend_for_mode_uses_replay_in_mock_mode() {
        let finder = Finder::builder()
            .backend_for_mode(ReplayBackend::default())
            .expect("mock backend")
            .build()
            .expect("finder");
        assert_eq!(finder.mode(), BackendMode::Mock);
        assert_eq!(finder.history().len(), 0);
    }
}
