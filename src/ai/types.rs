//! Wire-level types for the OpenAI-compatible chat completions API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Messages ─────────────────────────────────────────────────────────────────

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in a conversation.
///
/// Serializes directly to the OpenAI wire shape: assistant messages may carry
/// a `tool_calls` array, and tool messages reference the originating call via
/// `tool_call_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// An assistant turn that requested tool calls.
    pub fn assistant_with_tool_calls(content: impl Into<String>, calls: Vec<ToolCallSpec>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    /// A tool-result message answering the call with the given id.
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Serialized representation of one requested tool call, as stored in an
/// assistant message's `tool_calls` list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionSpec {
    pub name: String,
    /// JSON-encoded arguments, exactly as the wire format carries them.
    pub arguments: String,
}

impl ToolCallSpec {
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: String) -> Self {
        Self {
            id: id.into(),
            kind: "function".to_owned(),
            function: FunctionSpec {
                name: name.into(),
                arguments,
            },
        }
    }
}

// ─── Tool calls ───────────────────────────────────────────────────────────────

/// A fully-aggregated tool invocation request issued by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    /// Opaque id, unique within one LLM turn.
    pub id: String,
    /// Tool name as registered in the registry.
    pub name: String,
    /// Parsed arguments. Invalid JSON on the wire becomes an empty object.
    pub arguments: Value,
}

// ─── Stream events ────────────────────────────────────────────────────────────

/// Connection lifecycle phases surfaced to the UI thinking indicator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamPhase {
    Connecting,
    Waiting,
    Streaming,
}

/// Structured error codes for upstream failures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamErrorCode {
    ContextLengthExceeded,
    Timeout,
    RateLimit,
    AuthFailed,
    Generic,
}

impl StreamErrorCode {
    /// Whether the caller may usefully retry the same request.
    pub fn retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::RateLimit)
    }
}

/// Events yielded by [`ChatClient::stream_chat`].
///
/// The sequence is finite and not restartable: it ends with exactly one of
/// `ToolCall` (one per aggregated call), `Done`, or `Error`.
///
/// [`ChatClient::stream_chat`]: crate::ai::client::ChatClient::stream_chat
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Token {
        content: String,
    },
    /// A fragment of a tool call's streamed JSON arguments.
    ToolCallArgsDelta {
        index: usize,
        tool_name: String,
        delta: String,
    },
    ToolCall(ToolCallRequest),
    Phase(StreamPhase),
    Retrying {
        attempt: u32,
        message: String,
    },
    Error {
        message: String,
        code: StreamErrorCode,
    },
    Done,
}
