use std::fmt;
use std::pin::Pin;
use std::str::FromStr;

use crate::errors::{FinderError, StreamError};

/// Raw response body chunks in arrival order.
pub type ChunkStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, StreamError>> + Send + 'static>>;

/// Which backend the UI is talking to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    #[default]
    Mock,
    Live,
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mock => "mock",
            Self::Live => "live",
        })
    }
}

impl FromStr for BackendMode {
    type Err = FinderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "live" => Ok(Self::Live),
            other => Err(FinderError::Config(format!(
                "unknown backend mode `{other}` (expected mock or live)"
            ))),
        }
    }
}

/// Dify application flavour; decides the endpoint and body shape.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppKind {
    #[default]
    Chat,
    Workflow,
}

impl FromStr for AppKind {
    type Err = FinderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" | "chatflow" | "advanced-chat" => Ok(Self::Chat),
            "workflow" => Ok(Self::Workflow),
            other => Err(FinderError::Config(format!("unknown Dify app kind `{other}`"))),
        }
    }
}

/// One question sent to a backend.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatRequest {
    pub query: String,
    /// App variables; must be a JSON object.
    pub inputs: serde_json::Value,
    pub conversation_id: Option<String>,
    /// End-user identifier; the backend's default is used when `None`.
    pub user: Option<String>,
}

impl ChatRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            inputs: serde_json::Value::Object(serde_json::Map::new()),
            conversation_id: None,
            user: None,
        }
    }

    pub fn inputs(mut self, inputs: serde_json::Value) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), FinderError> {
        if self.query.trim().is_empty() {
            return Err(FinderError::Validation("query must not be empty".into()));
        }
        if !self.inputs.is_object() {
            return Err(FinderError::Validation("inputs must be a JSON object".into()));
        }
        Ok(())
    }
}

/// Source of streaming answers.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    fn mode(&self) -> BackendMode;

    /// Sends the request and returns the response body as chunks.
    ///
    /// Errors here happen before any frame exists (bad status, unreachable
    /// host); failures while reading the body arrive as stream items.
    async fn open_stream(&self, req: ChatRequest) -> Result<ChunkStream, FinderError>;
}
