use serde::{Deserialize, Serialize};

/// One decoded frame of the `/api/chat` event stream.
///
/// The backend tags every frame with a `type` field. Text-bearing frames
/// carry their payload in `data`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    Start {
        conversation_id: String,
    },
    ThinkingDelta {
        #[serde(rename = "data")]
        text: String,
    },
    ThinkingDone,
    TextDelta {
        #[serde(rename = "data")]
        text: String,
    },
    ToolCallStart(ToolCallStart),
    ToolCallDone(ToolCallDone),
    /// Raw process output the backend could not classify. Folded like `text_delta`.
    Output {
        #[serde(rename = "data")]
        text: String,
    },
    Done {
        #[serde(default)]
        exit_code: i32,
    },
    Error {
        message: String,
    },
    /// Any discriminator this client does not understand (e.g. `session_info`).
    #[serde(other)]
    Unknown,
}

impl ProtocolEvent {
    /// `done` and `error` end the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProtocolEvent::Done { .. } | ProtocolEvent::Error { .. })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ToolCallStart {
    pub call_id: String,
    pub tool_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// File content streamed with a `file_edit` start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ToolCallDone {
    pub call_id: String,
    #[serde(default)]
    pub tool_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines_added: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines_removed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_lines: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}
