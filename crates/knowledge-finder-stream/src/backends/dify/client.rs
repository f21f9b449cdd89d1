use futures::StreamExt as _;
use tracing::debug;

use crate::backend::{AppKind, Backend, BackendMode, ChatRequest, ChunkStream};
use crate::errors::{FinderError, StreamError};

use super::config::DifyClientConfig;

/// Live backend talking to a Dify app over streaming HTTP.
pub struct DifyBackend {
    client: reqwest::Client,
    config: DifyClientConfig,
}

impl DifyBackend {
    pub fn new(config: DifyClientConfig) -> Result<Self, FinderError> {
        if config.api_key.trim().is_empty() {
            return Err(FinderError::Config(
                "Dify client config api_key must not be empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| FinderError::Config(format!("failed to build Dify client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a backend from `DIFY_*` environment variables.
    pub fn from_env() -> Result<Self, FinderError> {
        Self::new(DifyClientConfig::from_env()?)
    }
}

#[async_trait::async_trait]
impl Backend for DifyBackend {
    fn mode(&self) -> BackendMode {
        BackendMode::Live
    }

    async fn open_stream(&self, req: ChatRequest) -> Result<ChunkStream, FinderError> {
        req.validate()?;
        let body = build_request_body(&self.config, &req);
        let url = self.config.stream_url();
        debug!(url = %url, app = ?self.config.app, "opening Dify stream");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| FinderError::Transport(format!("Dify request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(FinderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let chunks = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| StreamError::transport(format!("Dify stream read failed: {e}")))
        });
        Ok(Box::pin(chunks))
    }
}

pub(crate) fn build_request_body(
    config: &DifyClientConfig,
    req: &ChatRequest,
) -> serde_json::Value {
    let user = req.user.clone().unwrap_or_else(|| config.user.clone());
    let mut body = serde_json::json!({
        "inputs": req.inputs,
        "response_mode": "streaming",
        "user": user,
    });
    if config.app == AppKind::Chat {
        body["query"] = serde_json::Value::String(req.query.clone());
        if let Some(conversation_id) = req.conversation_id.as_ref() {
            body["conversation_id"] = serde_json::Value::String(conversation_id.clone());
        }
    }
    body
}
