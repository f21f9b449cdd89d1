//! Streaming session reducer for the Knowledge Finder UI.
//!
//! A backend (live Dify app or a mock replay) answers a question with a body
//! of `data: <json>` lines. The session runner reassembles lines across chunk
//! boundaries, decodes them into typed frames and folds them into three
//! projections: the chat transcript, the node log timeline and the terminal
//! result, which can be copied into the answer history.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use knowledge_finder_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), FinderError> {
//! let mut finder = Finder::builder()
//!     .config(FinderConfig::default().mode(BackendMode::Live))
//!     .backend(Arc::new(DifyBackend::from_env()?))
//!     .build()?;
//!
//! let mut run = finder.ask("Where is the onboarding checklist?").await?;
//! while let Some(update) = run.next_update().await {
//!     if let Some(answer) = update.state.answer() {
//!         println!("{}", answer.text);
//!     }
//! }
//! let report = run.finish().await?;
//! finder.record(&report);
//! # Ok(())
//! # }
//! ```

/// Backend contract and request types.
pub mod backend;
/// Mock replay and live Dify backends.
pub mod backends;
/// Env-driven configuration.
pub mod config;
/// Line assembly and frame decoding.
pub mod decoder;
/// Error taxonomy.
pub mod errors;
/// Typed stream events.
pub mod event;
/// Finder entry point and builder.
pub mod finder;
/// In-memory answer history.
pub mod history;
/// `tracing` subscriber setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Chat transcript and log timeline entries.
pub mod projection;
/// Session state machine and reducer.
pub mod reducer;
/// Session driver, spawned run stream and cancellation handle.
pub mod run;

pub use backend::{AppKind, Backend, BackendMode, ChatRequest, ChunkStream};
pub use backends::{DifyBackend, DifyClientConfig, ReplayBackend};
pub use config::FinderConfig;
pub use decoder::{FrameDecoder, LineDecoder, decode_line};
pub use errors::{FinderError, SessionFailure, StreamError};
pub use event::{Citation, Frame, StreamEvent};
pub use finder::{Finder, FinderBuilder};
pub use history::{History, HistoryEntry};
pub use projection::{ChatMessage, LogEntry, NodeStatus, Role};
pub use reducer::{Applied, SessionState, SessionStatus, reduce};
pub use run::{AbortHandle, RunStream, SessionDriver, SessionOutcome, SessionReport, SessionUpdate};
