use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Identifiers shared by every frame kind.
///
/// Dify repeats these on each frame; all of them are optional because `ping`
/// and some error frames omit them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub workflow_run_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// One decoded `data:` line.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub envelope: Envelope,
    pub event: StreamEvent,
}

/// Typed stream event, selected by the payload's `event` field.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    WorkflowStarted(WorkflowStarted),
    NodeStarted(NodeStarted),
    NodeFinished(NodeFinished),
    /// Answer delta (`message` and `agent_message`).
    Message {
        text: String,
    },
    /// Answer delta emitted by workflow apps.
    TextChunk {
        text: String,
    },
    /// Replaces the text of the open answer (content moderation rewrites).
    MessageReplace {
        text: String,
    },
    WorkflowFinished(WorkflowFinished),
    MessageEnd(MessageEnd),
    Error(ErrorFrame),
    Ping,
    /// A kind this client does not know; ignored downstream.
    Unknown {
        kind: String,
    },
}

impl StreamEvent {
    /// Wire name of the event kind.
    pub fn kind(&self) -> &str {
        match self {
            Self::WorkflowStarted(_) => "workflow_started",
            Self::NodeStarted(_) => "node_started",
            Self::NodeFinished(_) => "node_finished",
            Self::Message { .. } => "message",
            Self::TextChunk { .. } => "text_chunk",
            Self::MessageReplace { .. } => "message_replace",
            Self::WorkflowFinished(_) => "workflow_finished",
            Self::MessageEnd(_) => "message_end",
            Self::Error(_) => "error",
            Self::Ping => "ping",
            Self::Unknown { kind } => kind,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct WorkflowStarted {
    pub id: String,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct NodeStarted {
    /// Node execution id; the log timeline key.
    pub id: String,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub node_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub inputs: Option<Value>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct NodeFinished {
    pub id: String,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub inputs: Option<Value>,
    #[serde(default)]
    pub outputs: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub elapsed_time: Option<f64>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct WorkflowFinished {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub outputs: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub elapsed_time: Option<f64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

impl WorkflowFinished {
    /// `failed` and `stopped` count as unsuccessful.
    pub fn is_failure(&self) -> bool {
        matches!(self.status.as_deref(), Some("failed" | "stopped"))
    }
}

/// Knowledge-base passage that backs the answer.
#[derive(Clone, Debug, PartialEq, Deserialize, serde::Serialize)]
pub struct Citation {
    #[serde(default)]
    pub position: Option<u32>,
    #[serde(default)]
    pub dataset_id: Option<String>,
    #[serde(default)]
    pub dataset_name: Option<String>,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub document_name: Option<String>,
    #[serde(default)]
    pub segment_id: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, serde::Serialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub latency: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessageEnd {
    pub citations: Vec<Citation>,
    pub usage: Option<Usage>,
    pub outputs: Option<Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ErrorFrame {
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Deserialize)]
struct DataWire<T> {
    data: T,
}

#[derive(Deserialize)]
struct AnswerWire {
    #[serde(alias = "text", default)]
    answer: String,
}

#[derive(Deserialize)]
struct TextChunkWire {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct MessageEndMetadataWire {
    #[serde(default)]
    retriever_resources: Vec<Citation>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct MessageEndWire {
    #[serde(default)]
    metadata: Option<MessageEndMetadataWire>,
    #[serde(default)]
    outputs: Option<Value>,
}

impl Frame {
    /// Builds a typed frame from a decoded JSON payload.
    ///
    /// Payloads without a string `event` field are rejected; unrecognized
    /// kinds decode to `StreamEvent::Unknown`.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        use serde::de::Error as _;

        let Some(kind) = value.get("event").and_then(Value::as_str).map(str::to_owned) else {
            return Err(serde_json::Error::custom("missing string field `event`"));
        };
        let envelope = Envelope::deserialize(&value)?;
        let event = match kind.as_str() {
            "workflow_started" => {
                StreamEvent::WorkflowStarted(DataWire::<WorkflowStarted>::deserialize(&value)?.data)
            }
            "node_started" => StreamEvent::NodeStarted(DataWire::<NodeStarted>::deserialize(&value)?.data),
            "node_finished" => StreamEvent::NodeFinished(DataWire::<NodeFinished>::deserialize(&value)?.data),
            "message" | "agent_message" => StreamEvent::Message {
                text: AnswerWire::deserialize(&value)?.answer,
            },
            "text_chunk" => StreamEvent::TextChunk {
                text: DataWire::<TextChunkWire>::deserialize(&value)?.data.text,
            },
            "message_replace" => StreamEvent::MessageReplace {
                text: AnswerWire::deserialize(&value)?.answer,
            },
            "workflow_finished" => {
                StreamEvent::WorkflowFinished(DataWire::<WorkflowFinished>::deserialize(&value)?.data)
            }
            "message_end" => {
                let wire = MessageEndWire::deserialize(&value)?;
                let metadata = wire.metadata.unwrap_or_default();
                StreamEvent::MessageEnd(MessageEnd {
                    citations: metadata.retriever_resources,
                    usage: metadata.usage,
                    outputs: wire.outputs,
                })
            }
            "error" => StreamEvent::Error(ErrorFrame::deserialize(&value)?),
            "ping" => StreamEvent::Ping,
            _ => StreamEvent::Unknown { kind },
        };
        Ok(Self { envelope, event })
    }
}
