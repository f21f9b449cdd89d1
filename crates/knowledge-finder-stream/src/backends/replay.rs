use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt as _;
use futures::stream;

use crate::backend::{Backend, BackendMode, ChatRequest, ChunkStream};
use crate::errors::{FinderError, StreamError};

/// Replays a fixed recording of response chunks.
///
/// Backs the "mock" mode and lets tests drive the full runner without a
/// network. Every `open_stream` call replays the same chunks from the start.
#[derive(Clone, Debug, Default)]
pub struct ReplayBackend {
    chunks: Vec<Result<Bytes, StreamError>>,
    delay: Option<Duration>,
}

impl ReplayBackend {
    pub fn new<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self {
            chunks: chunks.into_iter().map(|c| Ok(c.into())).collect(),
            delay: None,
        }
    }

    /// Splits a recorded body into fixed-size chunks, ignoring line
    /// boundaries.
    pub fn chunked(body: impl AsRef<[u8]>, chunk_size: usize) -> Self {
        let size = chunk_size.max(1);
        Self::new(
            body.as_ref()
                .chunks(size)
                .map(Bytes::copy_from_slice)
                .collect::<Vec<_>>(),
        )
    }

    /// Ends the replay with a transport failure after the recorded chunks.
    pub fn fail_with(mut self, message: impl Into<String>) -> Self {
        self.chunks.push(Err(StreamError::transport(message)));
        self
    }

    /// Waits before yielding each chunk.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait::async_trait]
impl Backend for ReplayBackend {
    fn mode(&self) -> BackendMode {
        BackendMode::Mock
    }

    async fn open_stream(&self, req: ChatRequest) -> Result<ChunkStream, FinderError> {
        req.validate()?;
        let delay = self.delay;
        let chunks = stream::iter(self.chunks.clone()).then(move |chunk| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            chunk
        });
        Ok(Box::pin(chunks))
    }
}
