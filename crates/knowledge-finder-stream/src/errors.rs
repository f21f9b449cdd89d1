/// Errors raised while turning raw chunks into reducer input.
///
/// `Parse` and `Protocol` are recovered locally (the offending frame is
/// skipped); `Transport` and `Cancelled` end the session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// A complete line could not be decoded into a stream event.
    #[error("malformed frame: {message}")]
    Parse { line: String, message: String },
    /// The byte stream failed (connection drop, body read error).
    #[error("transport error: {message}")]
    Transport { message: String },
    /// A well-formed frame arrived that does not fit the current session.
    #[error("unexpected frame: {message}")]
    Protocol { message: String },
    /// The caller requested cancellation.
    #[error("stream cancelled")]
    Cancelled,
}

impl StreamError {
    pub(crate) fn parse(line: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            line: line.into(),
            message: message.into(),
        }
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Whether the stream keeps going after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Parse { .. } | Self::Protocol { .. })
    }
}

/// Terminal session failure, kept on the session state so the UI can offer
/// a retry while still showing the partial answer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionFailure {
    /// The connection dropped or the body could not be read.
    #[error("transport failure: {message}")]
    Transport { message: String },
    /// The backend sent an `error` frame.
    #[error("remote failure ({}): {message}", .code.as_deref().unwrap_or("unknown"))]
    Remote {
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },
    /// A workflow run finished with a failed or stopped status.
    #[error("workflow failure: {message}")]
    Workflow { message: String },
}

/// Top-level error type for the public API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FinderError {
    /// Invalid client or finder configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input.
    #[error("validation error: {0}")]
    Validation(String),
    /// The backend answered the stream request with a non-success status.
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    /// The stream request could not be sent.
    #[error("transport error: {0}")]
    Transport(String),
    /// The session reached the failed terminal state.
    #[error(transparent)]
    Failed(SessionFailure),
    /// The session was cancelled before it completed.
    #[error("cancelled")]
    Cancelled,
    /// Internal sequencing problem between the runner and its consumer.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl FinderError {
    pub(crate) fn protocol_msg(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Whether a retry affordance makes sense for this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Failed(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<SessionFailure> for FinderError {
    fn from(value: SessionFailure) -> Self {
        FinderError::Failed(value)
    }
}
