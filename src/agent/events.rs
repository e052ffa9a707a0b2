//! Typed events emitted by the agent loop.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::ai::types::{ChatMessage, StreamErrorCode, StreamPhase};
use crate::tools::traits::CallStatus;

/// Receives `(agent_id, event)` pairs from sub-agent loops for fan-out.
pub type EventSink = mpsc::UnboundedSender<(String, AgentEvent)>;

/// One record in the agent loop's event stream.
///
/// Serializes with a `kind` tag so each event maps directly onto one SSE
/// frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEvent {
    /// An LLM call is starting.
    Thinking,
    Phase {
        phase: StreamPhase,
    },
    Token {
        content: String,
    },
    ToolCallArgsDelta {
        index: usize,
        tool_name: String,
        delta: String,
    },
    ToolCallStart {
        id: String,
        tool_name: String,
        arguments: Value,
    },
    ToolCallEnd {
        id: String,
        tool_name: String,
        output: Value,
        status: CallStatus,
    },
    AssistantMessage {
        content: String,
    },
    /// A queued follow-up message was drained into the history.
    QueuedMessage {
        message: ChatMessage,
    },
    /// One-shot hint that the turn has grown large enough to plan.
    AutoPlanSuggest {
        tool_calls: usize,
    },
    Retrying {
        attempt: u32,
        message: String,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<StreamErrorCode>,
    },
    Done,
    SubagentStart {
        agent_id: String,
        prompt: String,
        model: String,
        depth: usize,
    },
    SubagentEnd {
        agent_id: String,
        elapsed_seconds: f64,
        tool_calls: Vec<String>,
        truncated: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl AgentEvent {
    /// The SSE event name for this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Thinking => "thinking",
            Self::Phase { .. } => "phase",
            Self::Token { .. } => "token",
            Self::ToolCallArgsDelta { .. } => "tool_call_args_delta",
            Self::ToolCallStart { .. } => "tool_call_start",
            Self::ToolCallEnd { .. } => "tool_call_end",
            Self::AssistantMessage { .. } => "assistant_message",
            Self::QueuedMessage { .. } => "queued_message",
            Self::AutoPlanSuggest { .. } => "auto_plan_suggest",
            Self::Retrying { .. } => "retrying",
            Self::Error { .. } => "error",
            Self::Done => "done",
            Self::SubagentStart { .. } => "subagent_start",
            Self::SubagentEnd { .. } => "subagent_end",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_matches_serialized_tag() {
        let event = AgentEvent::Token {
            content: "hi".to_owned(),
        };
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["kind"], event.kind());
        assert_eq!(v["content"], "hi");
    }

    #[test]
    fn tool_call_end_serializes_status() {
        let event = AgentEvent::ToolCallEnd {
            id: "t1".to_owned(),
            tool_name: "bash".to_owned(),
            output: json!({"stdout": ""}),
            status: CallStatus::Cancelled,
        };
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["kind"], "tool_call_end");
        assert_eq!(v["status"], "cancelled");
    }

    #[test]
    fn error_without_code_omits_field() {
        let event = AgentEvent::Error {
            message: "x".to_owned(),
            code: None,
        };
        let v = serde_json::to_value(&event).unwrap();
        assert!(v.get("code").is_none());
    }
}
