//! The root tool executor: dispatches agent-loop tool calls to the
//! registry, MCP servers, or the sub-agent scheduler.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::agent::events::EventSink;
use crate::agent::loop_::ToolExecutor;
use crate::ai::client::ChatProvider;
use crate::cancel::CancelToken;
use crate::mcp::McpManager;
use crate::storage::Storage;

use super::context::{InvocationContext, SubagentContext};
use super::registry::{AdmissionOutcome, ApprovalHandler, ToolRegistry};
use super::subagent::SubagentLimiter;
use super::traits::{APPROVAL_DECISION_KEY, ResultMap};

/// Executor for a root agent turn (depth 0).
///
/// Built-in tools go through the registry's admission pipeline; MCP tools
/// bypass the registry, so the same admission conversation is run here
/// before delegating.  `run_agent` calls get a [`SubagentContext`] with a
/// fresh child id.
pub struct RootExecutor {
    registry: Arc<ToolRegistry>,
    client: Arc<dyn ChatProvider>,
    mcp: Option<Arc<dyn McpManager>>,
    cancel: CancelToken,
    limiter: Arc<SubagentLimiter>,
    confirm: Option<Arc<dyn ApprovalHandler>>,
    event_sink: Option<EventSink>,
    working_dir: PathBuf,
    conversation_id: Option<String>,
    storage: Option<Arc<dyn Storage>>,
    subagent_counter: AtomicUsize,
}

impl RootExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ToolRegistry>,
        client: Arc<dyn ChatProvider>,
        cancel: CancelToken,
        limiter: Arc<SubagentLimiter>,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            client,
            mcp: None,
            cancel,
            limiter,
            confirm: None,
            event_sink: None,
            working_dir,
            conversation_id: None,
            storage: None,
            subagent_counter: AtomicUsize::new(0),
        }
    }

    pub fn with_mcp(mut self, mcp: Option<Arc<dyn McpManager>>) -> Self {
        self.mcp = mcp;
        self
    }

    pub fn with_confirm(mut self, confirm: Option<Arc<dyn ApprovalHandler>>) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn with_event_sink(mut self, sink: Option<EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Attach conversation context so the canvas tools can persist.
    pub fn with_conversation(
        mut self,
        conversation_id: impl Into<String>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self.storage = Some(storage);
        self
    }

    fn context_for(&self, tool_name: &str) -> InvocationContext {
        let mut ctx = InvocationContext::new(self.working_dir.clone());
        ctx.conversation_id = self.conversation_id.clone();
        ctx.storage = self.storage.clone();
        if tool_name == "run_agent" {
            let n = self.subagent_counter.fetch_add(1, Ordering::SeqCst) + 1;
            ctx.subagent = Some(SubagentContext {
                client: self.client.clone(),
                registry: self.registry.clone(),
                cancel: self.cancel.clone(),
                depth: 0,
                agent_id: format!("agent-{n}"),
                event_sink: self.event_sink.clone(),
                limiter: self.limiter.clone(),
            });
        }
        ctx
    }

    async fn call_mcp(&self, mcp: &Arc<dyn McpManager>, name: &str, args: Value) -> ResultMap {
        // MCP tools never enter the registry; run the same admission
        // conversation here so decision tags, session grants, and block
        // shapes match the built-in path.
        match self.registry.admit(name, &args, self.confirm.clone()).await {
            AdmissionOutcome::Blocked(result) => result,
            AdmissionOutcome::Proceed { decision, .. } => {
                let mut result = mcp.call_tool(name, args).await;
                result.insert(APPROVAL_DECISION_KEY.to_owned(), json!(decision));
                result
            }
        }
    }
}

#[async_trait]
impl ToolExecutor for RootExecutor {
    async fn execute(&self, tool_name: &str, arguments: Value) -> Result<ResultMap, String> {
        if self.registry.has_tool(tool_name) {
            let ctx = self.context_for(tool_name);
            return self
                .registry
                .call_tool(tool_name, arguments, &ctx, self.confirm.clone())
                .await;
        }
        if let Some(mcp) = &self.mcp {
            return Ok(self.call_mcp(mcp, tool_name, arguments).await);
        }
        Err(format!("Unknown tool: {tool_name}"))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
