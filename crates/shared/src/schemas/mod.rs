use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::message::Role;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Agent,
    Plan,
    Ask,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Agent => "agent",
            Mode::Plan => "plan",
            Mode::Ask => "ask",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(Mode::Agent),
            "plan" => Ok(Mode::Plan),
            "ask" => Ok(Mode::Ask),
            other => Err(format!("unknown mode '{}' (expected agent, plan or ask)", other)),
        }
    }
}

// Chat endpoint
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatRequest {
    pub prompt: String,
    pub working_dir: String,
    pub model: String,
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// Body of a non-2xx response. FastAPI-style backends use `detail`.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl ApiErrorBody {
    pub fn message(self) -> Option<String> {
        self.error.or(self.detail).filter(|m| !m.is_empty())
    }
}

// Models
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ModelsResponse {
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

// Conversation listing
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub working_dir: String,
    pub created_at: String,
    #[serde(default)]
    pub message_count: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ListConversationsResponse {
    #[serde(default)]
    pub conversations: Vec<ConversationSummary>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConversationRecord {
    pub id: String,
    pub title: String,
    pub working_dir: String,
    pub created_at: String,
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
}

/// `GET /api/conversations/{id}` answers `{conversation}` or `{error}`.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct ConversationResponse {
    #[serde(default)]
    pub conversation: Option<ConversationRecord>,
    #[serde(default)]
    pub error: Option<String>,
}

// Directory browsing
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BrowseEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct BrowseResult {
    pub current: String,
    #[serde(default)]
    pub parent: String,
    #[serde(default)]
    pub entries: Vec<BrowseEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MkdirRequest {
    pub path: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct MkdirResult {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Reply to the out-of-band cancel: `cancelled` or `not_found`.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct StatusResponse {
    #[serde(default)]
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_omits_missing_conversation_id() {
        let request = ChatRequest {
            prompt: "list files".into(),
            working_dir: "/tmp".into(),
            model: "auto".into(),
            mode: Mode::Plan,
            conversation_id: None,
        };

        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["mode"], "plan");
        assert!(value.get("conversation_id").is_none());
    }

    #[test]
    fn error_body_falls_back_to_detail() {
        let body: ApiErrorBody =
            serde_json::from_str(r#"{"detail":"Directory not found: /nope"}"#).unwrap();
        assert_eq!(body.message().as_deref(), Some("Directory not found: /nope"));

        let empty: ApiErrorBody = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.message(), None);
    }

    #[test]
    fn mode_parses_from_cli_text() {
        assert_eq!("ask".parse::<Mode>(), Ok(Mode::Ask));
        assert!("yolo".parse::<Mode>().is_err());
    }
}
