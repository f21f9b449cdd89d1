use futures::StreamExt as _;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::backend::ChunkStream;
use crate::decoder::FrameDecoder;
use crate::errors::{FinderError, SessionFailure};
use crate::reducer::{SessionState, SessionStatus};

/// Handle used to request cancellation of a running session.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    fn channel() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, rx)
    }

    /// Requests cancellation.
    ///
    /// The session observes the request at its next chunk boundary and ends
    /// in the `cancelled` state; nothing is mutated after that.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Whether the session has been torn down (its driver was dropped).
    pub fn is_finished(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Projection snapshot published whenever a chunk changed the session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionUpdate {
    pub run_id: uuid::Uuid,
    /// Monotonic per run, starting at 0.
    pub seq: u64,
    pub state: SessionState,
}

impl SessionUpdate {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionOutcome {
    Completed,
    Failed(SessionFailure),
    Cancelled,
}

/// Final result of a session, with the projections as they ended.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionReport {
    pub run_id: uuid::Uuid,
    pub outcome: SessionOutcome,
    pub state: SessionState,
}

impl SessionReport {
    fn new(run_id: uuid::Uuid, state: SessionState) -> Self {
        let outcome = match state.status() {
            SessionStatus::Failed(failure) => SessionOutcome::Failed(failure.clone()),
            SessionStatus::Cancelled => SessionOutcome::Cancelled,
            _ => SessionOutcome::Completed,
        };
        Self {
            run_id,
            outcome,
            state,
        }
    }

    /// Converts into the projections on success, or a distinct error for
    /// failure and cancellation.
    pub fn into_result(self) -> Result<SessionState, FinderError> {
        match self.outcome {
            SessionOutcome::Completed => Ok(self.state),
            SessionOutcome::Failed(failure) => Err(FinderError::Failed(failure)),
            SessionOutcome::Cancelled => Err(FinderError::Cancelled),
        }
    }
}

/// Pull-based session over a chunk stream.
///
/// Each call to [`next_update`](Self::next_update) suspends only while
/// waiting for the next chunk; cancellation is checked before every chunk.
pub struct SessionDriver {
    run_id: uuid::Uuid,
    chunks: ChunkStream,
    decoder: FrameDecoder,
    state: SessionState,
    abort_rx: watch::Receiver<bool>,
    abort_handle: AbortHandle,
    seq: u64,
    started: bool,
    finished: bool,
}

impl SessionDriver {
    pub fn new(chunks: ChunkStream, state: SessionState) -> Self {
        let (abort_handle, abort_rx) = AbortHandle::channel();
        Self {
            run_id: uuid::Uuid::new_v4(),
            chunks,
            decoder: FrameDecoder::default(),
            state,
            abort_rx,
            abort_handle,
            seq: 0,
            started: false,
            finished: false,
        }
    }

    pub fn run_id(&self) -> uuid::Uuid {
        self.run_id
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Waits for the next projection change.
    ///
    /// The first update is the freshly started session; the last one is
    /// terminal. Returns `None` after the terminal update.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        if self.finished {
            return None;
        }
        if !self.started {
            self.started = true;
            if self.state.begin() {
                info!(run_id = %self.run_id, "session started");
                return Some(self.snapshot());
            }
        }

        loop {
            if *self.abort_rx.borrow() {
                if self.state.cancel() {
                    info!(run_id = %self.run_id, "session cancelled");
                }
                return Some(self.finish_update());
            }
            if self.state.is_terminal() {
                return Some(self.finish_update());
            }

            tokio::select! {
                biased;
                // The driver keeps its own sender alive, so this never errors.
                _ = self.abort_rx.changed() => {}
                next = self.chunks.next() => match next {
                    Some(Ok(chunk)) => {
                        let decoded = self.decoder.push_chunk(&chunk);
                        let changed = self.state.ingest(&decoded);
                        if self.state.is_terminal() {
                            return Some(self.finish_update());
                        }
                        if changed {
                            return Some(self.snapshot());
                        }
                    }
                    Some(Err(err)) => {
                        warn!(run_id = %self.run_id, error = %err, "session transport failed");
                        self.state.transport_failed(err.to_string());
                        return Some(self.finish_update());
                    }
                    None => {
                        if let Some(err) = self.decoder.finish() {
                            self.state.record_skipped(&err);
                        }
                        self.state.transport_closed();
                        return Some(self.finish_update());
                    }
                },
            }
        }
    }

    /// Drives the session to its end, handing every update to `on_update`.
    pub async fn run_to_end<F>(mut self, mut on_update: F) -> SessionReport
    where
        F: FnMut(&SessionUpdate),
    {
        while let Some(update) = self.next_update().await {
            on_update(&update);
        }
        self.into_report()
    }

    /// Ends the session where it stands; a session still streaming counts
    /// as cancelled.
    pub fn into_report(mut self) -> SessionReport {
        if !self.state.is_terminal() {
            self.state.begin();
            self.state.cancel();
        }
        SessionReport::new(self.run_id, self.state)
    }

    fn snapshot(&mut self) -> SessionUpdate {
        let update = SessionUpdate {
            run_id: self.run_id,
            seq: self.seq,
            state: self.state.clone(),
        };
        self.seq = self.seq.saturating_add(1);
        update
    }

    fn finish_update(&mut self) -> SessionUpdate {
        self.finished = true;
        info!(
            run_id = %self.run_id,
            status = self.state.status().label(),
            skipped = self.state.skipped_frames(),
            rejected = self.state.rejected_frames(),
            "session finished"
        );
        self.snapshot()
    }
}

/// Streaming handle over a session driven on a spawned task.
///
/// Use `next_update()` to render progress and `finish()` to obtain the
/// report after the terminal update. Dropping the handle aborts the session.
pub struct RunStream {
    run_id: uuid::Uuid,
    rx: mpsc::Receiver<SessionUpdate>,
    final_rx: oneshot::Receiver<SessionReport>,
    abort_handle: AbortHandle,
    saw_terminal: bool,
}

impl RunStream {
    /// Spawns the session onto the current tokio runtime.
    pub fn spawn(chunks: ChunkStream, state: SessionState, buffer: usize) -> Self {
        let driver = SessionDriver::new(chunks, state);
        let run_id = driver.run_id();
        let abort_handle = driver.abort_handle();
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let (final_tx, final_rx) = oneshot::channel();
        tokio::spawn(run_task(driver, tx, final_tx));
        Self {
            run_id,
            rx,
            final_rx,
            abort_handle,
            saw_terminal: false,
        }
    }

    pub fn run_id(&self) -> uuid::Uuid {
        self.run_id
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Returns `None` after the update channel is closed.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        let update = self.rx.recv().await;
        if update.as_ref().is_some_and(SessionUpdate::is_terminal) {
            self.saw_terminal = true;
        }
        update
    }

    /// Drains remaining updates (if any) and returns the report.
    pub async fn finish(mut self) -> Result<SessionReport, FinderError> {
        while !self.saw_terminal {
            match self.rx.recv().await {
                Some(update) if update.is_terminal() => self.saw_terminal = true,
                Some(_) => {}
                None => break,
            }
        }
        (&mut self.final_rx).await.map_err(|_| {
            FinderError::protocol_msg(format!(
                "session task ended without a report (run_id={})",
                self.run_id
            ))
        })
    }
}

impl Drop for RunStream {
    fn drop(&mut self) {
        self.abort_handle.abort();
    }
}

async fn run_task(
    mut driver: SessionDriver,
    tx: mpsc::Sender<SessionUpdate>,
    final_tx: oneshot::Sender<SessionReport>,
) {
    while let Some(update) = driver.next_update().await {
        if tx.send(update).await.is_err() {
            debug!(run_id = %driver.run_id(), "update receiver dropped; cancelling session");
            driver.abort_handle().abort();
        }
    }
    let _ = final_tx.send(driver.into_report());
}
