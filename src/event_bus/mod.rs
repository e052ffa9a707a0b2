//! Event fan-out: one agent loop, many consumers.
//!
//! The loop yields a single event stream; the bus broadcasts each event to
//! every subscriber (terminal renderer, SSE clients of the same
//! conversation, persister).  Publishing never blocks the loop — slow
//! subscribers lag and drop, they do not backpressure the turn.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::agent::events::AgentEvent;
use crate::storage::Storage;

const DEFAULT_CAPACITY: usize = 1024;

/// Events flowing through the bus.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    /// An agent-loop event, tagged with its conversation and (for
    /// sub-agents) the child agent id.
    Agent {
        conversation_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        event: AgentEvent,
    },
    /// A safety-gate approval is waiting for a user response.
    ApprovalRequired {
        conversation_id: String,
        approval_id: String,
        tool_name: String,
        reason: String,
        details: serde_json::Map<String, Value>,
    },
    /// The conversation received a generated title.
    TitleChanged {
        conversation_id: String,
        title: String,
    },
}

/// Broadcast bus backed by `tokio::sync::broadcast`.
#[derive(Clone)]
pub struct AgentBus {
    sender: broadcast::Sender<BusEvent>,
}

impl AgentBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all active subscribers.  Zero receivers is fine.
    pub fn publish(&self, event: BusEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }
}

impl Default for AgentBus {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Persister ────────────────────────────────────────────────────────────────

/// Spawn a bus subscriber that mirrors a conversation's events into
/// storage: assistant messages on `assistant_message`, tool call rows on
/// `tool_call_start`/`tool_call_end`.
///
/// Drains any backlog before honouring `done`, so firing the token after
/// the turn's last publish loses nothing.  The agent loop never waits on
/// the persister.
pub fn spawn_persister(
    bus: &AgentBus,
    storage: Arc<dyn Storage>,
    conversation_id: String,
    server_name_for: impl Fn(&str) -> String + Send + 'static,
    done: crate::cancel::CancelToken,
) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        let mut current_message_id: Option<String> = None;
        let mut pending_inputs: HashMap<String, (String, Value)> = HashMap::new();

        loop {
            let received = tokio::select! {
                biased;
                received = rx.recv() => received,
                _ = done.cancelled() => return,
            };
            let event = match received {
                Ok(BusEvent::Agent {
                    conversation_id: conv,
                    agent_id: None,
                    event,
                }) if conv == conversation_id => event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            };

            match event {
                AgentEvent::AssistantMessage { content } => {
                    let record = storage.create_message(&conversation_id, "assistant", &content);
                    current_message_id = Some(record.id);
                }
                AgentEvent::ToolCallStart {
                    id,
                    tool_name,
                    arguments,
                } => {
                    pending_inputs.insert(id, (tool_name, arguments));
                }
                AgentEvent::ToolCallEnd {
                    id,
                    tool_name,
                    output,
                    status,
                } => {
                    if let Some(message_id) = &current_message_id {
                        let (name, input) = pending_inputs
                            .remove(&id)
                            .unwrap_or((tool_name, Value::Null));
                        storage.create_tool_call(
                            message_id,
                            &name,
                            &server_name_for(&name),
                            &input,
                            &id,
                        );
                        storage.update_tool_call(&id, &output, status.as_str());
                    }
                }
                AgentEvent::QueuedMessage { .. } => {
                    // Next iteration produces a fresh assistant message.
                    current_message_id = None;
                }
                _ => {}
            }
        }
    })
}

// ─── Tests ──────────────────────────────────────────────────────────────────
