//! Common imports for typical finder usage.
pub use crate::{
    AbortHandle, BackendMode, ChatMessage, ChatRequest, DifyBackend, DifyClientConfig, Finder,
    FinderConfig, FinderError, LogEntry, ReplayBackend, RunStream, SessionOutcome, SessionReport,
    SessionState, SessionStatus, SessionUpdate,
};
