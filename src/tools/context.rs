//! Per-invocation context threaded through tool handlers.
//!
//! The original runtime passed these as hidden keyword arguments; here they
//! are an explicit parameter so the bypass flag and sub-agent wiring are
//! visible in the signature.

use std::path::PathBuf;
use std::sync::Arc;

use crate::agent::events::EventSink;
use crate::ai::client::ChatProvider;
use crate::cancel::CancelToken;
use crate::storage::Storage;

use super::registry::ToolRegistry;
use super::subagent::SubagentLimiter;

/// Context for one tool invocation.
#[derive(Clone, Default)]
pub struct InvocationContext {
    /// Directory file tools resolve relative paths against.
    pub working_dir: PathBuf,
    /// Conversation the canvas tools operate on; `None` outside web chat.
    pub conversation_id: Option<String>,
    /// Persistence handle for the canvas tools.
    pub storage: Option<Arc<dyn Storage>>,
    /// Set by the registry when the user explicitly approved a hard-blocked
    /// command; the bash handler then skips its last-line-of-defense check.
    pub bypass_hard_block: bool,
    /// Present only when invoking `run_agent`.
    pub subagent: Option<SubagentContext>,
}

impl InvocationContext {
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            working_dir,
            ..Default::default()
        }
    }
}

/// Execution context for the `run_agent` tool: everything a child agent
/// session needs from its parent.
#[derive(Clone)]
pub struct SubagentContext {
    /// The parent's chat client; children derive their own from its config.
    pub client: Arc<dyn ChatProvider>,
    pub registry: Arc<ToolRegistry>,
    /// Shared cancel token — cancelling the root turn stops every child.
    pub cancel: CancelToken,
    /// Nesting depth of the *caller* (root executor passes 0).
    pub depth: usize,
    /// Id assigned to the child being spawned, e.g. `"agent-2"` or
    /// `"agent-2.1"` for nested children.
    pub agent_id: String,
    /// Receives every child event tagged with the child's agent id.
    pub event_sink: Option<EventSink>,
    /// Shared per-root-request spawn budget.
    pub limiter: Arc<SubagentLimiter>,
}
