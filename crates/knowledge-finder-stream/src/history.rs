use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::Citation;
use crate::reducer::{SessionState, SessionStatus};

/// Completed answer kept for later recall.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: uuid::Uuid,
    pub query: String,
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Terminal state label (`completed`, `failed`, `cancelled`).
    pub outcome: String,
    pub recorded_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// Snapshot of a terminated session.
    ///
    /// Returns `None` while the session is still running or when it has no
    /// closed assistant message to remember.
    pub fn from_session(state: &SessionState) -> Option<Self> {
        if !state.is_terminal() {
            return None;
        }
        let answer = state.answer().filter(|m| m.complete)?;
        if answer.text.is_empty() && state.status() != &SessionStatus::Completed {
            return None;
        }
        Some(Self {
            id: uuid::Uuid::new_v4(),
            query: state.query().to_string(),
            answer: answer.text.clone(),
            citations: answer.citations.clone(),
            conversation_id: state.conversation_id().map(ToOwned::to_owned),
            outcome: state.status().label().to_string(),
            recorded_at: Utc::now(),
        })
    }
}

/// Bounded, newest-first, in-memory history list.
#[derive(Clone, Debug)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl History {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(256)),
            capacity,
        }
    }

    /// Inserts at the front, evicting the oldest entry past capacity.
    pub fn push(&mut self, entry: HistoryEntry) {
        if self.capacity == 0 {
            return;
        }
        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);
    }

    pub fn get(&self, id: uuid::Uuid) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn remove(&mut self, id: uuid::Uuid) -> Option<HistoryEntry> {
        let idx = self.entries.iter().position(|e| e.id == id)?;
        self.entries.remove(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for History {
    fn default() -> Self {
        Self::with_capacity(50)
    }
}
