use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_LOG_FILE: &str = "knowledge-finder.logs.jsonl";

/// Logging settings resolved from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogSettings {
    pub enabled: bool,
    /// Explicit filter directive; `RUST_LOG` or `info` when `None`.
    pub level: Option<String>,
    /// JSONL output file; console output when `None`.
    pub json_path: Option<PathBuf>,
}

impl LogSettings {
    /// Reads `KNOWLEDGE_FINDER_LOG`, `KNOWLEDGE_FINDER_LOG_LEVEL` and
    /// `KNOWLEDGE_FINDER_JSON_LOG_PATH`.
    pub fn from_env() -> Self {
        let enabled = std::env::var("KNOWLEDGE_FINDER_LOG")
            .ok()
            .and_then(|v| parse_flag(&v))
            .unwrap_or(true);
        Self {
            enabled,
            level: std::env::var("KNOWLEDGE_FINDER_LOG_LEVEL").ok(),
            json_path: std::env::var_os("KNOWLEDGE_FINDER_JSON_LOG_PATH").map(PathBuf::from),
        }
    }

    fn filter(&self) -> EnvFilter {
        self.level
            .as_deref()
            .and_then(|level| EnvFilter::try_new(level).ok())
            .or_else(|| EnvFilter::try_from_default_env().ok())
            .unwrap_or_else(|| EnvFilter::new("info"))
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Installs the global `tracing` subscriber once per process, using
/// [`LogSettings::from_env`]. Later calls are no-ops.
pub fn init_observability() {
    init_with(LogSettings::from_env());
}

pub fn init_with(settings: LogSettings) {
    INIT.get_or_init(|| {
        if !settings.enabled {
            return;
        }
        let filter = settings.filter();
        match settings.json_path.as_deref() {
            Some(path) => {
                let (dir, file_name) = split_log_path(path);
                let _ = std::fs::create_dir_all(&dir);
                let writer = tracing_appender::rolling::never(dir, file_name);
                let layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(false)
                    .with_writer(writer);
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init();
            }
            None => {
                let layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init();
            }
        }
    });
}

fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    (dir, file_name)
}
