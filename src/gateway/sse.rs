//! Agent-event → SSE frame translation and the token broadcast throttle.

use std::time::{Duration, Instant};

use serde_json::{Value, json};

use crate::agent::events::AgentEvent;
use crate::storage::Canvas;

/// One server-sent-events frame: `event:<name>` + `data:<json>`.
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

impl SseFrame {
    pub fn new(event: impl Into<String>, data: &Value) -> Self {
        Self {
            event: event.into(),
            data: data.to_string(),
        }
    }
}

/// Translate one agent event into its SSE frame.
pub fn frame_for(event: &AgentEvent) -> SseFrame {
    let mut data = serde_json::to_value(event).unwrap_or_else(|_| json!({}));
    // The kind rides in the SSE event name; keep the payload clean.
    if let Some(obj) = data.as_object_mut() {
        obj.remove("kind");
    }
    SseFrame::new(event.kind(), &data)
}

/// Frame announcing a generated conversation title.
pub fn title_frame(title: &str) -> SseFrame {
    SseFrame::new("title", &json!({ "title": title }))
}

/// Post-completion canvas snapshot frames.
pub fn canvas_created_frame(canvas: &Canvas) -> SseFrame {
    SseFrame::new(
        "canvas_created",
        &json!({
            "id": canvas.id,
            "title": canvas.title,
            "content": canvas.content,
            "language": canvas.language,
        }),
    )
}

pub fn canvas_updated_frame(canvas: &Canvas) -> SseFrame {
    SseFrame::new(
        "canvas_updated",
        &json!({
            "id": canvas.id,
            "title": canvas.title,
            "content": canvas.content,
            "language": canvas.language,
        }),
    )
}

pub fn canvas_patched_frame(canvas: &Canvas, edits_applied: u64) -> SseFrame {
    SseFrame::new(
        "canvas_patched",
        &json!({
            "id": canvas.id,
            "title": canvas.title,
            "version": canvas.version,
            "edits_applied": edits_applied,
            "content": canvas.content,
        }),
    )
}

pub fn canvas_stream_start_frame(tool_name: &str) -> SseFrame {
    SseFrame::new("canvas_stream_start", &json!({ "tool_name": tool_name }))
}

pub fn canvas_streaming_frame(content_delta: &str) -> SseFrame {
    SseFrame::new("canvas_streaming", &json!({ "content_delta": content_delta }))
}

/// Rate limiter for `stream_token` bus broadcasts to *other* clients of the
/// same conversation; the originating client sees every token verbatim.
pub struct TokenThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl TokenThrottle {
    pub fn new() -> Self {
        Self::with_interval(Duration::from_millis(100))
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// True when a broadcast is allowed now; records the send.
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

impl Default for TokenThrottle {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
