//! The agent loop: drives the streaming tool-call state machine for one
//! user turn.
//!
//! # Algorithm
//!
//! ```text
//! stream_chat(history + tools)
//!       │
//!       ▼ done, no tool calls ──► assistant_message + done
//!       │                          └─ queued follow-up? append, loop again
//!       ▼ tool calls present
//! append assistant(tool_calls) to history
//! dispatch all calls in parallel (each racing the cancel token)
//!   emit tool_call_end per completion (any order)
//!   append tool results to history in REQUEST order
//!       │
//!       ▼
//! auto-plan hint / narration cadence / next iteration
//! ```
//!
//! Context-window overflow is recovered in two stages (truncate oversized
//! tool outputs, then compact the whole history) before surfacing as an
//! error.  Cancellation never corrupts the history: every pending call gets
//! either its real result or a synthesized cancellation result.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::warn;

use crate::ai::client::ChatProvider;
use crate::ai::types::{
    ChatMessage, StreamErrorCode, StreamEvent, ToolCallRequest, ToolCallSpec,
};
use crate::cancel::CancelToken;
use crate::config::AgentRunConfig;
use crate::tools::traits::{CallStatus, ResultMap, cancelled_result, error_result, strip_internal_keys};

use super::compaction::{compact_messages, truncate_large_tool_outputs};
use super::events::AgentEvent;
use super::queue::MessageQueue;

/// Truncation once, compaction once.
const MAX_CONTEXT_RECOVERIES: usize = 2;

/// Grace period for a tool task after its cancel signal fires.
const CANCEL_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

const NARRATION_PROMPT: &str = "Briefly summarize your progress in 1-2 sentences: \
     what have you found or done so far, and what are you doing next? Then continue your work.";

/// Dispatches one tool call on behalf of the loop.
///
/// `Err` is reserved for catastrophic failures (unknown tool); every normal
/// tool failure is an `"error"` key inside the result map.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, tool_name: &str, arguments: Value) -> Result<ResultMap, String>;
}

/// Per-run knobs for the loop.
#[derive(Debug, Clone)]
pub struct AgentLoopConfig {
    pub max_iterations: usize,
    pub tool_output_max_chars: usize,
    /// Inject a progress-narration prompt every N tool calls (0 = off).
    pub narration_cadence: usize,
    /// Emit a one-shot `auto_plan_suggest` once this many tool calls have
    /// run in the turn (0 = off).
    pub auto_plan_threshold: usize,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            tool_output_max_chars: 2000,
            narration_cadence: 0,
            auto_plan_threshold: 0,
        }
    }
}

impl From<&AgentRunConfig> for AgentLoopConfig {
    fn from(config: &AgentRunConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            tool_output_max_chars: config.tool_output_max_chars,
            narration_cadence: config.narration_cadence,
            auto_plan_threshold: config.auto_plan_threshold,
        }
    }
}

/// Execute one tool call, racing it against the cancel token.
///
/// On cancellation the task is aborted and awaited with a bounded grace
/// period so no work dangles past the turn.
async fn execute_tool_call(
    request: &ToolCallRequest,
    executor: Arc<dyn ToolExecutor>,
    cancel: CancelToken,
) -> (ResultMap, CallStatus) {
    let tool_name = request.name.clone();
    let arguments = request.arguments.clone();
    let mut task =
        tokio::spawn(async move { executor.execute(&tool_name, arguments).await });

    tokio::select! {
        outcome = &mut task => match outcome {
            Ok(Ok(result)) => (result, CallStatus::Success),
            Ok(Err(e)) => (error_result(e), CallStatus::Error),
            Err(e) => (error_result(format!("tool task failed: {e}")), CallStatus::Error),
        },
        _ = cancel.cancelled() => {
            task.abort();
            let _ = tokio::time::timeout(CANCEL_DRAIN_TIMEOUT, task).await;
            (cancelled_result(), CallStatus::Cancelled)
        }
    }
}

fn encode_result(result: &ResultMap) -> String {
    serde_json::to_string(&Value::Object(result.clone())).unwrap_or_else(|_| "{}".to_owned())
}

/// Run the agentic tool-call loop, yielding [`AgentEvent`]s.
///
/// `messages` is mutated in place: assistant turns and tool results are
/// appended as the loop proceeds, so the caller's history stays consistent
/// whether the turn completes, errors, or is cancelled.
#[allow(clippy::too_many_arguments)]
pub fn run_agent_loop<'a>(
    client: &'a dyn ChatProvider,
    messages: &'a mut Vec<ChatMessage>,
    executor: Arc<dyn ToolExecutor>,
    tools: Option<Vec<Value>>,
    cancel: CancelToken,
    extra_system_prompt: Option<String>,
    config: AgentLoopConfig,
    queue: Option<Arc<MessageQueue>>,
) -> impl Stream<Item = AgentEvent> + 'a {
    stream! {
        let mut iteration = 0usize;
        let mut recovery_attempts = 0usize;
        let mut total_tool_calls = 0usize;
        let mut auto_plan_suggested = false;

        while iteration < config.max_iterations {
            iteration += 1;
            let mut pending: Vec<ToolCallRequest> = Vec::new();
            let mut assistant_content = String::new();
            let mut got_context_error = false;

            yield AgentEvent::Thinking;

            {
                let chat = client.stream_chat(
                    messages.clone(),
                    tools.clone(),
                    cancel.clone(),
                    extra_system_prompt.clone(),
                );
                let mut chat = std::pin::pin!(chat);
                while let Some(event) = chat.next().await {
                    match event {
                        StreamEvent::Token { content } => {
                            assistant_content.push_str(&content);
                            yield AgentEvent::Token { content };
                        }
                        StreamEvent::ToolCallArgsDelta { index, tool_name, delta } => {
                            yield AgentEvent::ToolCallArgsDelta { index, tool_name, delta };
                        }
                        StreamEvent::ToolCall(request) => {
                            yield AgentEvent::ToolCallStart {
                                id: request.id.clone(),
                                tool_name: request.name.clone(),
                                arguments: request.arguments.clone(),
                            };
                            pending.push(request);
                        }
                        StreamEvent::Phase(phase) => {
                            yield AgentEvent::Phase { phase };
                        }
                        StreamEvent::Retrying { attempt, message } => {
                            yield AgentEvent::Retrying { attempt, message };
                        }
                        StreamEvent::Error { message, code } => {
                            if code == StreamErrorCode::ContextLengthExceeded
                                && recovery_attempts < MAX_CONTEXT_RECOVERIES
                            {
                                got_context_error = true;
                                break;
                            }
                            yield AgentEvent::Error { message, code: Some(code) };
                            return;
                        }
                        StreamEvent::Done => break,
                    }
                }
            }

            if got_context_error {
                recovery_attempts += 1;
                // The failed attempt does not count against the iteration cap.
                iteration -= 1;

                if truncate_large_tool_outputs(messages, config.tool_output_max_chars) {
                    yield AgentEvent::Token {
                        content: "\n\n*Context limit reached — tool output was too large. \
                                  Truncated and retrying with smaller scope...*\n\n"
                            .to_owned(),
                    };
                    continue;
                }

                yield AgentEvent::Token {
                    content: "\n\n*Context limit reached — compacting conversation and retrying...*\n\n"
                        .to_owned(),
                };
                if compact_messages(client, messages).await {
                    continue;
                }

                yield AgentEvent::Error {
                    message: "Conversation too long for model context window. \
                              Recovery failed after truncation and compaction. \
                              Please start a new conversation."
                        .to_owned(),
                    code: None,
                };
                return;
            }

            if pending.is_empty() {
                if !assistant_content.is_empty() {
                    yield AgentEvent::AssistantMessage { content: assistant_content.clone() };
                }
                yield AgentEvent::Done;

                if let Some(queue) = &queue
                    && let Some(queued) = queue.try_pop()
                {
                    messages.push(queued.clone());
                    yield AgentEvent::QueuedMessage { message: queued };
                    continue;
                }
                return;
            }

            // Persist the assistant turn with its serialized tool-call list
            // before dispatching, so the history invariant holds whatever
            // happens next.
            yield AgentEvent::AssistantMessage { content: assistant_content.clone() };
            messages.push(ChatMessage::assistant_with_tool_calls(
                assistant_content.clone(),
                pending
                    .iter()
                    .map(|request| {
                        ToolCallSpec::function(
                            request.id.clone(),
                            request.name.clone(),
                            serde_json::to_string(&request.arguments)
                                .unwrap_or_else(|_| "{}".to_owned()),
                        )
                    })
                    .collect(),
            ));

            if cancel.is_cancelled() {
                for request in &pending {
                    let result = cancelled_result();
                    yield AgentEvent::ToolCallEnd {
                        id: request.id.clone(),
                        tool_name: request.name.clone(),
                        output: Value::Object(result.clone()),
                        status: CallStatus::Cancelled,
                    };
                    messages.push(ChatMessage::tool(request.id.clone(), encode_result(&result)));
                }
                yield AgentEvent::Done;
                return;
            }

            // Launch every pending call in parallel; emit completions as
            // they land (any order), then append history in request order.
            let mut results: HashMap<String, ResultMap> = HashMap::new();
            {
                let mut in_flight: FuturesUnordered<_> = pending
                    .iter()
                    .cloned()
                    .map(|request| {
                        let executor = executor.clone();
                        let cancel = cancel.clone();
                        async move {
                            let (result, status) =
                                execute_tool_call(&request, executor, cancel).await;
                            (request, result, status)
                        }
                    })
                    .collect();

                while let Some((request, result, status)) = in_flight.next().await {
                    yield AgentEvent::ToolCallEnd {
                        id: request.id.clone(),
                        tool_name: request.name.clone(),
                        output: Value::Object(result.clone()),
                        status,
                    };
                    results.insert(request.id, result);
                }
            }
            for request in &pending {
                let result = results.remove(&request.id).unwrap_or_else(|| {
                    warn!(id = %request.id, "missing tool result; synthesizing error");
                    error_result("tool produced no result")
                });
                let for_llm = strip_internal_keys(&result);
                messages.push(ChatMessage::tool(request.id.clone(), encode_result(&for_llm)));
            }
            total_tool_calls += pending.len();

            if cancel.is_cancelled() {
                yield AgentEvent::Done;
                return;
            }

            if config.auto_plan_threshold > 0
                && !auto_plan_suggested
                && total_tool_calls >= config.auto_plan_threshold
            {
                auto_plan_suggested = true;
                yield AgentEvent::AutoPlanSuggest { tool_calls: total_tool_calls };
            }

            // Narration cadence: inject an ephemeral prompt forcing a
            // progress update, then remove it BY INDEX so the stream having
            // mutated the history cannot strand it.
            if config.narration_cadence > 0
                && total_tool_calls > 0
                && total_tool_calls.is_multiple_of(config.narration_cadence)
            {
                yield AgentEvent::Thinking;
                let narration_idx = messages.len();
                messages.push(ChatMessage::user(NARRATION_PROMPT));
                {
                    let narration = client.stream_chat(
                        messages.clone(),
                        None,
                        cancel.clone(),
                        extra_system_prompt.clone(),
                    );
                    let mut narration = std::pin::pin!(narration);
                    while let Some(event) = narration.next().await {
                        match event {
                            StreamEvent::Token { content } => {
                                yield AgentEvent::Token { content };
                            }
                            StreamEvent::Done | StreamEvent::Error { .. } => break,
                            _ => {}
                        }
                    }
                }
                if messages.len() > narration_idx {
                    messages.remove(narration_idx);
                }
            }
        }

        yield AgentEvent::Error {
            message: format!("Max iterations ({}) reached", config.max_iterations),
            code: None,
        };
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
//
// Scenario-level coverage (parallel dispatch ordering, cancellation,
// recovery, queueing, sub-agent depth) lives in `tests/agent_loop.rs` with
// a scripted mock provider; these unit tests pin the small helpers.

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct SleepyExecutor;

    #[async_trait]
    impl ToolExecutor for SleepyExecutor {
        async fn execute(&self, _tool: &str, _args: Value) -> Result<ResultMap, String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(ResultMap::new())
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl ToolExecutor for FailingExecutor {
        async fn execute(&self, tool: &str, _args: Value) -> Result<ResultMap, String> {
            Err(format!("Unknown tool: {tool}"))
        }
    }

    fn request() -> ToolCallRequest {
        ToolCallRequest {
            id: "t1".to_owned(),
            name: "slow".to_owned(),
            arguments: json!({}),
        }
    }

    #[tokio::test]
    async fn cancel_beats_slow_tool() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let (result, status) =
            execute_tool_call(&request(), Arc::new(SleepyExecutor), cancel).await;
        assert_eq!(status, CallStatus::Cancelled);
        assert_eq!(result["error"], "Cancelled by user");
    }

    #[tokio::test]
    async fn executor_err_becomes_error_status() {
        let (result, status) =
            execute_tool_call(&request(), Arc::new(FailingExecutor), CancelToken::new()).await;
        assert_eq!(status, CallStatus::Error);
        assert!(result["error"].as_str().unwrap().contains("Unknown tool"));
    }

    #[test]
    fn config_from_agent_run_config() {
        let run = AgentRunConfig {
            max_iterations: 7,
            tool_output_max_chars: 123,
            narration_cadence: 4,
            auto_plan_threshold: 9,
        };
        let config = AgentLoopConfig::from(&run);
        assert_eq!(config.max_iterations, 7);
        assert_eq!(config.tool_output_max_chars, 123);
        assert_eq!(config.narration_cadence, 4);
        assert_eq!(config.auto_plan_threshold, 9);
    }

    #[test]
    fn encode_result_is_compact_json() {
        let mut map = ResultMap::new();
        map.insert("a".to_owned(), json!(1));
        assert_eq!(encode_result(&map), r#"{"a":1}"#);
    }
}
