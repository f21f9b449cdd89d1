//! Dify integration for live mode.
//!
//! Chat and chatflow apps stream from `/v1/chat-messages`; workflow apps from
//! `/v1/workflows/run`. Both answer with `data: <json>` lines that the
//! decoder turns into frames.
mod client;
mod config;

pub use client::DifyBackend;
pub use config::DifyClientConfig;
