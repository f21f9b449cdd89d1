use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::{Citation, NodeFinished, NodeStarted};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of the chat transcript.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl ChatMessage {
    pub(crate) fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            citations: Vec::new(),
            complete: true,
            message_id: None,
        }
    }

    pub(crate) fn open_assistant() -> Self {
        Self {
            role: Role::Assistant,
            text: String::new(),
            citations: Vec::new(),
            complete: false,
            message_id: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Running,
    Succeeded,
    Failed,
}

impl NodeStatus {
    /// Maps a Dify node status; anything other than success is a failure.
    pub(crate) fn from_finished(status: Option<&str>) -> Self {
        match status {
            Some("succeeded") | None => Self::Succeeded,
            Some("running") => Self::Running,
            Some(_) => Self::Failed,
        }
    }
}

/// One node execution on the log timeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub execution_id: String,
    pub node_id: Option<String>,
    pub node_type: Option<String>,
    pub title: String,
    pub status: NodeStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub inputs: Option<Value>,
    pub outputs: Option<Value>,
    pub error: Option<String>,
    /// Seconds reported by the backend.
    pub elapsed: Option<f64>,
}

impl LogEntry {
    pub(crate) fn started(data: &NodeStarted) -> Self {
        let title = data
            .title
            .clone()
            .or_else(|| data.node_type.clone())
            .unwrap_or_else(|| data.id.clone());
        Self {
            execution_id: data.id.clone(),
            node_id: data.node_id.clone(),
            node_type: data.node_type.clone(),
            title,
            status: NodeStatus::Running,
            started_at: data.created_at,
            finished_at: None,
            inputs: data.inputs.clone(),
            outputs: None,
            error: None,
            elapsed: None,
        }
    }

    pub(crate) fn finish(&mut self, data: &NodeFinished) {
        self.status = NodeStatus::from_finished(data.status.as_deref());
        self.finished_at = data.finished_at;
        if data.inputs.is_some() {
            self.inputs = data.inputs.clone();
        }
        self.outputs = data.outputs.clone();
        self.error = data.error.clone().filter(|e| !e.is_empty());
        self.elapsed = data.elapsed_time;
    }
}
