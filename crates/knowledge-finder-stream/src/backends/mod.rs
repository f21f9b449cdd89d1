//! Backend implementations behind the mock/live toggle.
pub mod dify;
pub mod replay;

pub use dify::{DifyBackend, DifyClientConfig};
pub use replay::ReplayBackend;
