//! Env-driven configuration for the finder.

use std::env;
use std::path::Path;

use crate::backend::BackendMode;
use crate::errors::FinderError;

/// Loads `.env` from the working directory, then from the crate root.
///
/// Variables already present in the environment win over file values.
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
    let _ = dotenvy::from_path(Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/.env")));
}

/// Runtime settings for a [`Finder`](crate::Finder).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinderConfig {
    /// Mock or live backend.
    pub mode: BackendMode,
    /// Maximum number of remembered answers.
    pub history_capacity: usize,
    /// Bounded buffer between the stream task and its consumer.
    pub update_buffer_capacity: usize,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            mode: BackendMode::Mock,
            history_capacity: 50,
            update_buffer_capacity: 64,
        }
    }
}

impl FinderConfig {
    /// Reads `KNOWLEDGE_FINDER_MODE`, `KNOWLEDGE_FINDER_HISTORY_CAPACITY` and
    /// `KNOWLEDGE_FINDER_UPDATE_BUFFER`, falling back to defaults.
    pub fn from_env() -> Result<Self, FinderError> {
        let mut config = Self::default();
        if let Some(mode) = read_env("KNOWLEDGE_FINDER_MODE") {
            config.mode = mode.parse()?;
        }
        if let Some(raw) = read_env("KNOWLEDGE_FINDER_HISTORY_CAPACITY") {
            config.history_capacity = parse_usize("KNOWLEDGE_FINDER_HISTORY_CAPACITY", &raw)?;
        }
        if let Some(raw) = read_env("KNOWLEDGE_FINDER_UPDATE_BUFFER") {
            config.update_buffer_capacity = parse_usize("KNOWLEDGE_FINDER_UPDATE_BUFFER", &raw)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn mode(mut self, mode: BackendMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn update_buffer_capacity(mut self, capacity: usize) -> Self {
        self.update_buffer_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<(), FinderError> {
        if self.update_buffer_capacity == 0 {
            return Err(FinderError::Config(
                "update_buffer_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_usize(key: &str, raw: &str) -> Result<usize, FinderError> {
    raw.parse()
        .map_err(|e| FinderError::Config(format!("invalid {key}={raw}: {e}")))
}
