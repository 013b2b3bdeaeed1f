use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// A single chat message as the client holds it.
///
/// For assistant messages `content` is derived from the `Text` parts and
/// rebuilt by [`Message::refresh_content`] after every part mutation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
    pub timestamp: String,
    #[serde(default)]
    pub is_streaming: bool,
    #[serde(default)]
    pub is_error: bool,
}

impl Message {
    pub fn new(id: String, role: Role, content: String, timestamp: String) -> Self {
        Self {
            id,
            role,
            content,
            parts: Vec::new(),
            timestamp,
            is_streaming: false,
            is_error: false,
        }
    }

    /// An empty assistant message that is waiting for stream events.
    pub fn placeholder(id: String, timestamp: String) -> Self {
        Self {
            is_streaming: true,
            ..Self::new(id, Role::Assistant, String::new(), timestamp)
        }
    }

    pub fn refresh_content(&mut self) {
        self.content = self
            .parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text(text) => Some(text.content.as_str()),
                _ => None,
            })
            .collect();
    }

    pub fn tool_call(&self, call_id: &str) -> Option<&ToolCallPart> {
        self.parts.iter().find_map(|part| match part {
            MessagePart::ToolCall(call) if call.call_id == call_id => Some(call),
            _ => None,
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Thinking(ThinkingPart),
    Text(TextPart),
    ToolCall(ToolCallPart),
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ThinkingPart {
    pub content: String,
    pub is_complete: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct TextPart {
    pub content: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    #[default]
    Running,
    Completed,
    Error,
}

impl ToolStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ToolStatus::Running)
    }
}

/// Tool families the backend reports today. Anything else passes through as `Other`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolKind {
    Shell,
    FileEdit,
    ReadFile,
    Grep,
    ListFiles,
    Search,
    Other(String),
}

impl ToolKind {
    pub fn parse(tool_type: &str) -> Self {
        match tool_type {
            "shell" => ToolKind::Shell,
            "file_edit" => ToolKind::FileEdit,
            "read_file" => ToolKind::ReadFile,
            "grep" => ToolKind::Grep,
            "list_files" => ToolKind::ListFiles,
            "search" => ToolKind::Search,
            other => ToolKind::Other(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            ToolKind::Shell => "Shell",
            ToolKind::FileEdit => "Edit",
            ToolKind::ReadFile => "Read",
            ToolKind::Grep => "Grep",
            ToolKind::ListFiles => "List",
            ToolKind::Search => "Search",
            ToolKind::Other(name) => name,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ToolCallPart {
    pub call_id: String,
    /// Kept verbatim so unrecognised tool types survive storage and display.
    pub tool_type: String,
    pub status: ToolStatus,

    // Descriptive fields, set by tool_call_start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    // Completion fields, set by tool_call_done
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
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
}

impl ToolCallPart {
    pub fn kind(&self) -> ToolKind {
        ToolKind::parse(&self.tool_type)
    }

    /// The most telling descriptive field for a one-line summary.
    pub fn detail(&self) -> Option<&str> {
        self.command
            .as_deref()
            .or(self.path.as_deref())
            .or(self.pattern.as_deref())
            .or(self.query.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(content: &str) -> MessagePart {
        MessagePart::Text(TextPart {
            content: content.to_string(),
        })
    }

    #[test]
    fn content_joins_only_text_parts() {
        let mut message = Message::placeholder("a1".into(), "now".into());
        message.parts = vec![
            text("Hello "),
            MessagePart::Thinking(ThinkingPart {
                content: "hmm".into(),
                is_complete: true,
            }),
            MessagePart::ToolCall(ToolCallPart {
                call_id: "1".into(),
                tool_type: "shell".into(),
                stdout: Some("ignored".into()),
                ..Default::default()
            }),
            text("world"),
        ];

        message.refresh_content();

        assert_eq!(message.content, "Hello world");
    }

    #[test]
    fn unknown_tool_types_pass_through() {
        let kind = ToolKind::parse("webFetch");
        assert_eq!(kind, ToolKind::Other("webFetch".into()));
        assert_eq!(kind.label(), "webFetch");
        assert_eq!(ToolKind::parse("list_files"), ToolKind::ListFiles);
    }

    #[test]
    fn detail_prefers_command_then_path() {
        let call = ToolCallPart {
            path: Some("/tmp".into()),
            pattern: Some("*.rs".into()),
            ..Default::default()
        };
        assert_eq!(call.detail(), Some("/tmp"));
    }
}
