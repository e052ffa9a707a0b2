//! HTTP routes: chat streaming (SSE), stop, approval responses, health.

use std::collections::HashMap;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use async_stream::stream;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::StreamExt;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::info;

use crate::agent::canvas_stream::{CanvasStreamTracker, CanvasStreamUpdate};
use crate::agent::events::AgentEvent;
use crate::agent::loop_::{AgentLoopConfig, ToolExecutor, run_agent_loop};
use crate::agent::queue::MessageQueue;
use crate::ai::client::{ChatClient, ChatProvider};
use crate::ai::types::ChatMessage;
use crate::cancel::CancelToken;
use crate::config::AppConfig;
use crate::event_bus::{AgentBus, BusEvent, spawn_persister};
use crate::mcp::McpManager;
use crate::storage::Storage;
use crate::tools::canvas::is_streaming_canvas_tool;
use crate::tools::executor::RootExecutor;
use crate::tools::registry::{ApprovalHandler, ToolRegistry};
use crate::tools::subagent::SubagentLimiter;
use crate::tools::traits::CallStatus;

use super::approvals::{PendingApprovals, WebApprovalHandler};
use super::sse::{
    SseFrame, TokenThrottle, canvas_created_frame, canvas_patched_frame, canvas_stream_start_frame,
    canvas_streaming_frame, canvas_updated_frame, frame_for, title_frame,
};

static SAFE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]{1,64}$").expect("safe name regex must compile"));

/// Per-conversation gateway-side state.  History is in-memory only — the
/// storage collaborator receives a write-only mirror.
#[derive(Default)]
pub struct ConversationState {
    pub history: Vec<ChatMessage>,
    pub queue: Arc<MessageQueue>,
    pub cancel: Option<CancelToken>,
    pub active: bool,
}

pub struct GatewayState {
    pub bus: AgentBus,
    pub pending: Arc<PendingApprovals>,
    pub storage: Arc<dyn Storage>,
    pub registry: Arc<ToolRegistry>,
    pub client: Arc<ChatClient>,
    pub mcp: Option<Arc<dyn McpManager>>,
    pub config: AppConfig,
    pub working_dir: PathBuf,
    pub conversations: Mutex<HashMap<String, ConversationState>>,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn Storage>,
        registry: Arc<ToolRegistry>,
        client: Arc<ChatClient>,
        mcp: Option<Arc<dyn McpManager>>,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            bus: AgentBus::new(),
            pending: Arc::new(PendingApprovals::new()),
            storage,
            registry,
            client,
            mcp,
            config,
            working_dir,
            conversations: Mutex::new(HashMap::new()),
        }
    }

    fn server_name_for(&self, tool_name: &str) -> String {
        if self.registry.has_tool(tool_name) {
            "builtin".to_owned()
        } else if let Some(mcp) = &self.mcp {
            mcp.tool_server_name(tool_name)
        } else {
            "unknown".to_owned()
        }
    }
}

fn bad_request(detail: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "detail": detail }))).into_response()
}

// ─── Health ───────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "anteroom" }))
}

// ─── Chat ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// Items flowing from the loop task to the SSE translation stream.
enum TurnItem {
    Event(AgentEvent),
    Title(String),
}

pub async fn chat(
    State(state): State<SharedState>,
    Path(conversation_id): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Response {
    if !SAFE_NAME_RE.is_match(&conversation_id) {
        return bad_request("Invalid conversation id");
    }
    if request.message.trim().is_empty() {
        return bad_request("Message content cannot be empty");
    }

    // Queue the message if a stream is already active for this conversation.
    let (cancel, queue, history, first_message) = {
        let mut conversations = match state.conversations.lock() {
            Ok(conversations) => conversations,
            Err(poisoned) => poisoned.into_inner(),
        };
        let conv = conversations.entry(conversation_id.clone()).or_default();

        if conv.active {
            state
                .storage
                .create_message(&conversation_id, "user", &request.message);
            return match conv.queue.push(ChatMessage::user(&request.message)) {
                Ok(position) => {
                    Json(json!({ "status": "queued", "position": position })).into_response()
                }
                Err(full) => (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({ "detail": format!("Message queue full (max {})", full.capacity) })),
                )
                    .into_response(),
            };
        }

        conv.active = true;
        let cancel = CancelToken::new();
        conv.cancel = Some(cancel.clone());
        let first_message = conv.history.is_empty();
        state
            .storage
            .create_message(&conversation_id, "user", &request.message);
        conv.history.push(ChatMessage::user(&request.message));
        (cancel, conv.queue.clone(), conv.history.clone(), first_message)
    };

    info!(conversation_id, first_message, "starting chat turn");

    // Persister: mirrors this turn's events into storage off the bus.
    let persist_done = CancelToken::new();
    let persister_state = state.clone();
    let persister = spawn_persister(
        &state.bus,
        state.storage.clone(),
        conversation_id.clone(),
        move |name| persister_state.server_name_for(name),
        persist_done.clone(),
    );

    // Sub-agent events bridge onto the bus tagged with the child agent id.
    let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
    let sink_bus = state.bus.clone();
    let sink_conversation = conversation_id.clone();
    tokio::spawn(async move {
        while let Some((agent_id, event)) = sink_rx.recv().await {
            sink_bus.publish(BusEvent::Agent {
                conversation_id: sink_conversation.clone(),
                agent_id: Some(agent_id),
                event,
            });
        }
    });

    let confirm: Arc<dyn ApprovalHandler> = Arc::new(WebApprovalHandler {
        pending: state.pending.clone(),
        bus: state.bus.clone(),
        conversation_id: conversation_id.clone(),
        timeout: Duration::from_secs(state.config.safety.approval_timeout_secs),
    });
    let limiter = Arc::new(SubagentLimiter::new(
        state.config.safety.subagent.max_concurrent,
        state.config.safety.subagent.max_total,
    ));
    let executor: Arc<dyn ToolExecutor> = Arc::new(
        RootExecutor::new(
            state.registry.clone(),
            state.client.clone(),
            cancel.clone(),
            limiter,
            state.working_dir.clone(),
        )
        .with_mcp(state.mcp.clone())
        .with_confirm(Some(confirm))
        .with_event_sink(Some(sink_tx))
        .with_conversation(conversation_id.clone(), state.storage.clone()),
    );

    let mut tools = state.registry.openai_tools();
    if let Some(mcp) = &state.mcp {
        tools.extend(mcp.openai_tools());
    }

    // Drive the loop in its own task; the SSE response reads from `rx`.
    let (tx, mut rx) = mpsc::channel::<TurnItem>(32);
    let loop_state = state.clone();
    let loop_conversation = conversation_id.clone();
    let loop_cancel = cancel.clone();
    let user_text = request.message.clone();
    tokio::spawn(async move {
        let mut history = history;
        let config = AgentLoopConfig::from(&loop_state.config.agent);
        let mut throttle = TokenThrottle::new();
        // Terminal no-tool-call answers are the caller's to keep; track the
        // last one so it lands in the stored history.
        let mut final_assistant: Option<String> = None;
        {
            let events = run_agent_loop(
                loop_state.client.as_ref() as &dyn ChatProvider,
                &mut history,
                executor,
                Some(tools),
                loop_cancel.clone(),
                None,
                config,
                Some(queue),
            );
            let mut events = std::pin::pin!(events);
            while let Some(event) = events.next().await {
                match &event {
                    AgentEvent::AssistantMessage { content } => {
                        final_assistant = Some(content.clone());
                    }
                    AgentEvent::ToolCallEnd { .. } => {
                        final_assistant = None;
                    }
                    _ => {}
                }
                // Broadcast to other clients of this conversation; tokens
                // are throttled, everything else goes through verbatim.
                let broadcast = match &event {
                    AgentEvent::Token { .. } => throttle.allow(),
                    _ => true,
                };
                if broadcast {
                    loop_state.bus.publish(BusEvent::Agent {
                        conversation_id: loop_conversation.clone(),
                        agent_id: None,
                        event: event.clone(),
                    });
                }
                if tx.send(TurnItem::Event(event)).await.is_err() {
                    // Originating client disconnected; stop the turn.
                    loop_cancel.cancel();
                    break;
                }
            }
        }
        if let Some(content) = final_assistant.take()
            && !content.is_empty()
        {
            history.push(ChatMessage::assistant(content));
        }

        if first_message {
            let title = loop_state.client.generate_title(&user_text).await;
            loop_state.bus.publish(BusEvent::TitleChanged {
                conversation_id: loop_conversation.clone(),
                title: title.clone(),
            });
            let _ = tx.send(TurnItem::Title(title)).await;
        }

        {
            let mut conversations = match loop_state.conversations.lock() {
                Ok(conversations) => conversations,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(conv) = conversations.get_mut(&loop_conversation) {
                conv.history = history;
                conv.active = false;
                conv.cancel = None;
            }
        }

        // Let the persister drain its backlog, then stop it.
        persist_done.cancel();
        let _ = persister.await;
    });

    // Translate loop events into SSE frames for the originating client,
    // synthesizing the canvas streaming frames along the way.
    let storage = state.storage.clone();
    let sse_stream = stream! {
        let mut tracker = CanvasStreamTracker::new();
        while let Some(item) = rx.recv().await {
            let frames: Vec<SseFrame> = match item {
                TurnItem::Title(title) => vec![title_frame(&title)],
                TurnItem::Event(event) => match &event {
                    AgentEvent::ToolCallArgsDelta { index, tool_name, delta } => {
                        if is_streaming_canvas_tool(tool_name) {
                            tracker
                                .push_delta(*index, tool_name, delta)
                                .into_iter()
                                .map(|update| match update {
                                    CanvasStreamUpdate::Start { tool_name } => {
                                        canvas_stream_start_frame(&tool_name)
                                    }
                                    CanvasStreamUpdate::Delta { content_delta } => {
                                        canvas_streaming_frame(&content_delta)
                                    }
                                })
                                .collect()
                        } else {
                            Vec::new()
                        }
                    }
                    AgentEvent::ToolCallStart { .. } => {
                        tracker.reset();
                        vec![frame_for(&event)]
                    }
                    AgentEvent::ToolCallEnd { tool_name, output, status, .. } => {
                        let mut frames = vec![frame_for(&event)];
                        if *status == CallStatus::Success {
                            frames.extend(canvas_completion_frame(
                                storage.as_ref(),
                                tool_name,
                                output,
                            ));
                        }
                        frames
                    }
                    _ => vec![frame_for(&event)],
                },
            };
            for frame in frames {
                yield Ok::<_, Infallible>(
                    Event::default().event(frame.event).data(frame.data),
                );
            }
        }
    };

    Sse::new(sse_stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// After a successful canvas tool call, load the full snapshot and build
/// the matching `canvas_*` frame.
fn canvas_completion_frame(
    storage: &dyn Storage,
    tool_name: &str,
    output: &Value,
) -> Option<SseFrame> {
    let status = output.get("status").and_then(Value::as_str)?;
    let canvas_id = output.get("id").and_then(Value::as_str)?;
    let canvas = storage.get_canvas(canvas_id)?;
    match (tool_name, status) {
        ("create_canvas", "created") => Some(canvas_created_frame(&canvas)),
        ("update_canvas", "updated") => Some(canvas_updated_frame(&canvas)),
        ("patch_canvas", "patched") => {
            let edits = output
                .get("edits_applied")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            Some(canvas_patched_frame(&canvas, edits))
        }
        _ => None,
    }
}

// ─── Stop ─────────────────────────────────────────────────────────────────────

pub async fn stop(
    State(state): State<SharedState>,
    Path(conversation_id): Path<String>,
) -> Response {
    if !SAFE_NAME_RE.is_match(&conversation_id) {
        return bad_request("Invalid conversation id");
    }
    let conversations = match state.conversations.lock() {
        Ok(conversations) => conversations,
        Err(poisoned) => poisoned.into_inner(),
    };
    match conversations.get(&conversation_id) {
        Some(conv) => {
            if let Some(cancel) = &conv.cancel {
                cancel.cancel();
            }
            Json(json!({ "status": "stopped" })).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": "Conversation not found" })),
        )
            .into_response(),
    }
}

// ─── Approvals ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ApprovalRequest {
    pub approved: bool,
}

pub async fn respond_approval(
    State(state): State<SharedState>,
    Path(approval_id): Path<String>,
    Json(request): Json<ApprovalRequest>,
) -> Response {
    if state.pending.resolve(&approval_id, request.approved) {
        Json(json!({ "status": "ok" })).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": "Approval not found or expired" })),
        )
            .into_response()
    }
}
