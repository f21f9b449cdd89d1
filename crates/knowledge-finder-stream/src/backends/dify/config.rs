use std::time::Duration;

use crate::backend::AppKind;
use crate::errors::FinderError;

const DEFAULT_BASE_URL: &str = "https://api.dify.ai";
const DEFAULT_USER: &str = "knowledge-finder";

/// Configuration for the Dify client.
#[derive(Clone, Debug)]
pub struct DifyClientConfig {
    /// App API key used for bearer auth.
    pub api_key: String,
    /// Base URL of the Dify deployment (self-hosted or cloud).
    pub base_url: String,
    /// Default end-user identifier sent with every request.
    pub user: String,
    /// Which app flavour the key belongs to.
    pub app: AppKind,
    /// Timeout for establishing the connection. The streamed body has no
    /// overall deadline.
    pub connect_timeout: Duration,
}

impl DifyClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            user: DEFAULT_USER.to_string(),
            app: AppKind::Chat,
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Builds a config from `DIFY_API_KEY`, `DIFY_BASE_URL`, `DIFY_USER` and
    /// `DIFY_APP_KIND`.
    pub fn from_env() -> Result<Self, FinderError> {
        let api_key = std::env::var("DIFY_API_KEY").unwrap_or_default();
        if api_key.trim().is_empty() {
            return Err(FinderError::Config(
                "missing DIFY_API_KEY for live mode".into(),
            ));
        }
        let mut config = Self::new(api_key);
        if let Some(base_url) = non_empty_env("DIFY_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(user) = non_empty_env("DIFY_USER") {
            config.user = user;
        }
        if let Some(app) = non_empty_env("DIFY_APP_KIND") {
            config.app = app.parse()?;
        }
        Ok(config)
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn app(mut self, app: AppKind) -> Self {
        self.app = app;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub(crate) fn stream_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base);
        match self.app {
            AppKind::Chat => format!("{base}/v1/chat-messages"),
            AppKind::Workflow => format!("{base}/v1/workflows/run"),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
