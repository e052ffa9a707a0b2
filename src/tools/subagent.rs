//! Sub-agent tool: spawns isolated child agent sessions for parallel
//! execution.
//!
//! Admission is bounded three ways: nesting depth, concurrent slots, and a
//! total-spawn cap per root request.  Children share the parent's cancel
//! token and event sink but run an isolated message history.

use std::sync::LazyLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use serde_json::{Map, Value, json};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{info, instrument, warn};

use crate::agent::events::{AgentEvent, EventSink};
use crate::agent::loop_::{AgentLoopConfig, ToolExecutor, run_agent_loop};
use crate::ai::client::ChatProvider;
use crate::ai::types::ChatMessage;
use crate::cancel::CancelToken;

use super::context::{InvocationContext, SubagentContext};
use super::registry::ToolRegistry;
use super::traits::{ResultMap, Tool, error_result};

pub const MAX_SUBAGENT_DEPTH: usize = 3;
pub const MAX_CONCURRENT_SUBAGENTS: usize = 5;
pub const MAX_TOTAL_SUBAGENTS: usize = 10;
pub const MAX_OUTPUT_CHARS: usize = 4000;
pub const SUBAGENT_MAX_ITERATIONS: usize = 25;
const MAX_PROMPT_CHARS: usize = 32 * 1024;

static MODEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._:\-]{1,64}$").expect("model regex must compile"));

const SUBAGENT_SYSTEM_PROMPT: &str = "You are a sub-agent executing a specific task. Follow these rules strictly:\n\
     - Complete the task described in the user message. Do not deviate.\n\
     - You have access to file and shell tools. Use them to accomplish your task.\n\
     - All safety policies apply. Do not attempt to circumvent security controls.\n\
     - Do not execute destructive operations (rm -rf, DROP TABLE, etc.) unless explicitly instructed.\n\
     - Keep your response concise and focused on results.";

// ─── SubagentLimiter ──────────────────────────────────────────────────────────

/// Tracks concurrent and total sub-agent usage per root request.
pub struct SubagentLimiter {
    semaphore: Semaphore,
    total_spawned: Mutex<usize>,
    max_total: usize,
}

impl SubagentLimiter {
    pub fn new(max_concurrent: usize, max_total: usize) -> Self {
        Self {
            semaphore: Semaphore::new(max_concurrent),
            total_spawned: Mutex::new(0),
            max_total,
        }
    }

    /// Try to acquire a slot.  `None` once the total cap is exhausted; the
    /// returned permit releases the concurrent slot on drop.
    pub async fn acquire(&self) -> Option<SemaphorePermit<'_>> {
        {
            let mut total = match self.total_spawned.lock() {
                Ok(total) => total,
                Err(poisoned) => poisoned.into_inner(),
            };
            if *total >= self.max_total {
                return None;
            }
            *total += 1;
        }
        self.semaphore.acquire().await.ok()
    }

    pub fn total_spawned(&self) -> usize {
        self.total_spawned
            .lock()
            .map(|total| *total)
            .unwrap_or(self.max_total)
    }

    pub fn max_total(&self) -> usize {
        self.max_total
    }

    /// Start a fresh root request (interactive sessions reuse the limiter
    /// between prompts).
    pub fn reset(&self) {
        if let Ok(mut total) = self.total_spawned.lock() {
            *total = 0;
        }
    }
}

impl Default for SubagentLimiter {
    fn default() -> Self {
        Self::new(MAX_CONCURRENT_SUBAGENTS, MAX_TOTAL_SUBAGENTS)
    }
}

// ─── Child tool executor ──────────────────────────────────────────────────────

/// Delegates child tool calls back to the registry, re-injecting sub-agent
/// context for nested `run_agent` calls.
struct ChildExecutor {
    registry: Arc<ToolRegistry>,
    client: Arc<dyn ChatProvider>,
    cancel: CancelToken,
    /// Depth of the child this executor belongs to.
    depth: usize,
    agent_id: String,
    event_sink: Option<EventSink>,
    limiter: Arc<SubagentLimiter>,
    working_dir: std::path::PathBuf,
    child_counter: AtomicUsize,
}

#[async_trait]
impl ToolExecutor for ChildExecutor {
    async fn execute(&self, tool_name: &str, arguments: Value) -> Result<ResultMap, String> {
        let mut ctx = InvocationContext::new(self.working_dir.clone());
        if tool_name == "run_agent" {
            let n = self.child_counter.fetch_add(1, Ordering::SeqCst) + 1;
            ctx.subagent = Some(SubagentContext {
                client: self.client.clone(),
                registry: self.registry.clone(),
                cancel: self.cancel.clone(),
                depth: self.depth,
                agent_id: format!("{}.{n}", self.agent_id),
                event_sink: self.event_sink.clone(),
                limiter: self.limiter.clone(),
            });
        }
        self.registry.call_tool(tool_name, arguments, &ctx, None).await
    }
}

// ─── run_agent tool ───────────────────────────────────────────────────────────

pub struct SubagentTool;

#[async_trait]
impl Tool for SubagentTool {
    fn name(&self) -> &str {
        "run_agent"
    }

    fn description(&self) -> &str {
        "Launch an autonomous sub-agent to handle a complex or independent task. \
         The sub-agent runs its own AI session with access to tools (read, write, edit, bash, \
         glob, grep) and returns a summary of its work. Use this to parallelize independent \
         tasks — the parent AI can issue multiple run_agent calls simultaneously. \
         Each sub-agent has its own conversation context and cannot see the parent's history."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "A detailed, self-contained instruction for the sub-agent. \
                        Include all necessary context since the sub-agent cannot see the parent \
                        conversation. Be specific about what files to read, what to search for, \
                        or what to produce."
                },
                "model": {
                    "type": "string",
                    "description": "Optional model override for this sub-agent (e.g. a small \
                        fast model for simple tasks). Defaults to the parent's model."
                }
            },
            "required": ["prompt"],
            "additionalProperties": false
        })
    }

    #[instrument(name = "subagent.run", skip_all)]
    async fn execute(&self, args: Value, ctx: &InvocationContext) -> ResultMap {
        let Some(prompt) = args.get("prompt").and_then(Value::as_str) else {
            return error_result("Missing required argument 'prompt'");
        };
        if prompt.len() > MAX_PROMPT_CHARS {
            return error_result(format!(
                "Prompt too long ({} chars, max {MAX_PROMPT_CHARS})",
                prompt.len()
            ));
        }
        let model = args.get("model").and_then(Value::as_str);
        if let Some(model) = model
            && !MODEL_RE.is_match(model)
        {
            return error_result(format!("Invalid model identifier: {model}"));
        }

        let Some(sa) = &ctx.subagent else {
            return error_result("Sub-agent requires execution context");
        };
        if sa.depth >= MAX_SUBAGENT_DEPTH {
            return error_result(format!(
                "Maximum sub-agent depth ({MAX_SUBAGENT_DEPTH}) reached"
            ));
        }

        let Some(_permit) = sa.limiter.acquire().await else {
            return error_result(format!(
                "Maximum total sub-agents ({}) reached for this request. \
                 Reuse existing sub-agent results or reduce parallelism.",
                sa.limiter.max_total()
            ));
        };

        run_subagent(prompt, model, ctx.working_dir.clone(), sa).await
        // _permit drops here, releasing the concurrent slot.
    }
}

async fn run_subagent(
    prompt: &str,
    model: Option<&str>,
    working_dir: std::path::PathBuf,
    sa: &SubagentContext,
) -> ResultMap {
    let child_depth = sa.depth + 1;
    let started = Instant::now();

    info!(
        agent_id = %sa.agent_id,
        depth = child_depth,
        prompt_len = prompt.len(),
        "spawning sub-agent"
    );

    // Deep-copied config with the override; the token provider is shared.
    let child_client = match sa.client.child(model) {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "failed to build sub-agent client");
            return error_result("Sub-agent execution failed");
        }
    };
    let model_used = child_client.model();

    // At max depth the child must not see run_agent at all; a hand-crafted
    // invocation still hits the depth guard above.
    let mut child_tools = sa.registry.openai_tools();
    if child_depth >= MAX_SUBAGENT_DEPTH {
        child_tools.retain(|t| t["function"]["name"] != "run_agent");
    }

    let executor: Arc<dyn ToolExecutor> = Arc::new(ChildExecutor {
        registry: sa.registry.clone(),
        client: sa.client.clone(),
        cancel: sa.cancel.clone(),
        depth: child_depth,
        agent_id: sa.agent_id.clone(),
        event_sink: sa.event_sink.clone(),
        limiter: sa.limiter.clone(),
        working_dir,
        child_counter: AtomicUsize::new(0),
    });

    let emit = |event: AgentEvent| {
        if let Some(sink) = &sa.event_sink {
            let _ = sink.send((sa.agent_id.clone(), event));
        }
    };

    emit(AgentEvent::SubagentStart {
        agent_id: sa.agent_id.clone(),
        prompt: prompt.chars().take(200).collect(),
        model: model_used.clone(),
        depth: child_depth,
    });

    let mut messages = vec![ChatMessage::user(prompt)];
    let mut output = String::new();
    let mut tool_calls_made: Vec<String> = Vec::new();
    let mut error_message: Option<String> = None;

    {
        let events = run_agent_loop(
            child_client.as_ref(),
            &mut messages,
            executor,
            Some(child_tools),
            sa.cancel.clone(),
            Some(SUBAGENT_SYSTEM_PROMPT.to_owned()),
            AgentLoopConfig {
                max_iterations: SUBAGENT_MAX_ITERATIONS,
                ..AgentLoopConfig::default()
            },
            None,
        );
        let mut events = std::pin::pin!(events);
        while let Some(event) = events.next().await {
            match &event {
                AgentEvent::Token { content } => output.push_str(content),
                AgentEvent::ToolCallStart { tool_name, .. } => {
                    tool_calls_made.push(tool_name.clone());
                }
                AgentEvent::Error { message, .. } => {
                    error_message = Some(message.clone());
                }
                _ => {}
            }
            emit(event);
        }
    }

    let elapsed = (started.elapsed().as_secs_f64() * 10.0).round() / 10.0;
    let mut truncated = false;
    if output.chars().count() > MAX_OUTPUT_CHARS {
        output = output.chars().take(MAX_OUTPUT_CHARS).collect::<String>()
            + "\n\n... [output truncated]";
        truncated = true;
    }

    emit(AgentEvent::SubagentEnd {
        agent_id: sa.agent_id.clone(),
        elapsed_seconds: elapsed,
        tool_calls: tool_calls_made.clone(),
        truncated,
        error: error_message.clone(),
    });

    info!(
        agent_id = %sa.agent_id,
        elapsed_seconds = elapsed,
        tool_calls = tool_calls_made.len(),
        success = error_message.is_none(),
        "sub-agent finished"
    );

    let mut result = Map::new();
    result.insert("output".to_owned(), json!(output));
    result.insert("elapsed_seconds".to_owned(), json!(elapsed));
    result.insert("tool_calls_made".to_owned(), json!(tool_calls_made));
    result.insert("model_used".to_owned(), json!(model_used));
    if truncated {
        result.insert("truncated".to_owned(), json!(true));
    }
    // Loop-surfaced errors (iteration cap, failed context recovery) are
    // plain control-flow strings the parent needs verbatim; the generic
    // message is reserved for failures building the child itself.
    if let Some(error) = &error_message {
        result.insert("error".to_owned(), json!(error));
    }
    result
}

// ─── Tests ──────────────────────────────────────────────────────────────────
