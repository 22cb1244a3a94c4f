//! Message domain types.
//!
//! Three shapes of "message" flow through the system:
//! - [`UiMessage`]: what the browser sends with a chat turn (id, role, parts)
//! - [`StoredMessage`]: a persisted row, append-only per conversation
//! - [`Message`]: what gets sent to an LLM provider

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions (persona, knowledge, memory)
    System,
    /// Tool execution result
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }

    /// Parse a stored role column. Unknown values are rejected.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message as sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// An assistant turn that only requests tool calls.
    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<MessageToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::with_role(Role::Assistant, content)
        }
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(Role::Tool, content)
        }
    }
}

/// A tool call embedded in an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as JSON string
    pub arguments: String,
}

/// A persisted conversation message. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    /// Epoch milliseconds
    pub created_at: i64,
}

impl StoredMessage {
    pub fn new(conversation_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            created_at: crate::now_millis(),
        }
    }
}

/// A message part in the browser's message format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiPart {
    Text { text: String },
    Reasoning { text: String },
    #[serde(other)]
    Other,
}

/// A message as submitted by the browser with a chat turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiMessage {
    #[serde(default)]
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<UiPart>,
}

impl UiMessage {
    pub fn user_text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
            parts: vec![UiPart::Text { text: text.into() }],
        }
    }

    /// The first text part, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.parts.iter().find_map(|p| match p {
            UiPart::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }

    /// All text parts concatenated; reasoning and other parts are not sent back upstream.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                UiPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Convert to a provider message.
    pub fn to_message(&self) -> Message {
        Message::with_role(self.role, self.text())
    }
}
