//! Parts of the streamed chat response.
//!
//! Each part is one JSON object on its own `data:` line. The browser's
//! message-stream reader dispatches on `type`:
//! - `start` carries the model in `messageMetadata.xModel`
//! - `start-step` / `finish-step` bracket one model call
//! - `text-start`, `text-delta`, `text-end` carry the reply text
//! - `tool-input-available` / `tool-output-available` report tool use
//! - `data-memory` is the out-of-band "memory saved" notice
//! - `error` replaces everything after a mid-stream failure
//! - `finish` ends a successful turn

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    pub x_model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySaved {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryData {
    pub memory_saved: MemorySaved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum StreamPart {
    Start {
        message_id: String,
        message_metadata: MessageMetadata,
    },
    StartStep,
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    ToolInputAvailable {
        tool_call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },
    ToolOutputAvailable {
        tool_call_id: String,
        output: serde_json::Value,
    },
    FinishStep,
    DataMemory {
        data: MemoryData,
    },
    Error {
        error_text: String,
    },
    Finish,
}

impl StreamPart {
    pub fn memory_saved(title: impl Into<String>, content: impl Into<String>) -> Self {
        StreamPart::DataMemory {
            data: MemoryData {
                memory_saved: MemorySaved {
                    title: title.into(),
                    content: content.into(),
                },
            },
        }
    }

    /// The `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::StartStep => "start-step",
            Self::TextStart { .. } => "text-start",
            Self::TextDelta { .. } => "text-delta",
            Self::TextEnd { .. } => "text-end",
            Self::ToolInputAvailable { .. } => "tool-input-available",
            Self::ToolOutputAvailable { .. } => "tool-output-available",
            Self::FinishStep => "finish-step",
            Self::DataMemory { .. } => "data-memory",
            Self::Error { .. } => "error",
            Self::Finish => "finish",
        }
    }
}
