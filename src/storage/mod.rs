//! Persistence collaborator contract.
//!
//! The core never reads conversation state during a turn; it only writes.
//! Storage is modelled as single-writer: implementations serialize access
//! internally, and every operation is a small transaction.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub position: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// The LLM-issued call id; unique within a turn and used as the key for
    /// `update_tool_call`.
    pub call_id: String,
    pub message_id: String,
    pub tool_name: String,
    pub server_name: String,
    pub input: Value,
    pub output: Option<Value>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Canvas {
    pub id: String,
    pub conversation_id: String,
    pub title: String,
    pub content: String,
    pub language: Option<String>,
    pub version: u32,
}

/// Write-side persistence operations used by the core during a turn.
pub trait Storage: Send + Sync {
    fn create_message(&self, conversation_id: &str, role: &str, content: &str) -> MessageRecord;

    fn create_tool_call(
        &self,
        message_id: &str,
        tool_name: &str,
        server_name: &str,
        input: &Value,
        call_id: &str,
    ) -> ToolCallRecord;

    fn update_tool_call(&self, call_id: &str, output: &Value, status: &str);

    // Canvas operations used by the canvas tools.
    fn canvas_for_conversation(&self, conversation_id: &str) -> Option<Canvas>;
    fn get_canvas(&self, canvas_id: &str) -> Option<Canvas>;
    fn create_canvas(
        &self,
        conversation_id: &str,
        title: &str,
        content: &str,
        language: Option<&str>,
    ) -> Canvas;
    /// Update content and/or title, bumping the version.  Returns `None`
    /// when the canvas does not exist.
    fn update_canvas(
        &self,
        canvas_id: &str,
        content: Option<&str>,
        title: Option<&str>,
    ) -> Option<Canvas>;
}

// ─── In-memory implementation ────────────────────────────────────────────────

#[derive(Default)]
struct MemoryInner {
    messages: Vec<MessageRecord>,
    tool_calls: Vec<ToolCallRecord>,
    canvases: HashMap<String, Canvas>,
}

/// In-memory [`Storage`] used by the CLI and in tests.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<MemoryInner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<MessageRecord> {
        self.inner.lock().map(|i| i.messages.clone()).unwrap_or_default()
    }

    pub fn tool_calls(&self) -> Vec<ToolCallRecord> {
        self.inner
            .lock()
            .map(|i| i.tool_calls.clone())
            .unwrap_or_default()
    }
}

impl Storage for MemoryStorage {
    fn create_message(&self, conversation_id: &str, role: &str, content: &str) -> MessageRecord {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        let position = inner
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .count();
        let record = MessageRecord {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_owned(),
            role: role.to_owned(),
            content: content.to_owned(),
            position,
            created_at: chrono::Utc::now(),
        };
        inner.messages.push(record.clone());
        record
    }

    fn create_tool_call(
        &self,
        message_id: &str,
        tool_name: &str,
        server_name: &str,
        input: &Value,
        call_id: &str,
    ) -> ToolCallRecord {
        let record = ToolCallRecord {
            call_id: call_id.to_owned(),
            message_id: message_id.to_owned(),
            tool_name: tool_name.to_owned(),
            server_name: server_name.to_owned(),
            input: input.clone(),
            output: None,
            status: None,
        };
        if let Ok(mut inner) = self.inner.lock() {
            inner.tool_calls.push(record.clone());
        }
        record
    }

    fn update_tool_call(&self, call_id: &str, output: &Value, status: &str) {
        if let Ok(mut inner) = self.inner.lock()
            && let Some(tc) = inner.tool_calls.iter_mut().find(|tc| tc.call_id == call_id)
        {
            tc.output = Some(output.clone());
            tc.status = Some(status.to_owned());
        }
    }

    fn canvas_for_conversation(&self, conversation_id: &str) -> Option<Canvas> {
        self.inner.lock().ok().and_then(|inner| {
            inner
                .canvases
                .values()
                .find(|c| c.conversation_id == conversation_id)
                .cloned()
        })
    }

    fn get_canvas(&self, canvas_id: &str) -> Option<Canvas> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.canvases.get(canvas_id).cloned())
    }

    fn create_canvas(
        &self,
        conversation_id: &str,
        title: &str,
        content: &str,
        language: Option<&str>,
    ) -> Canvas {
        let canvas = Canvas {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_owned(),
            title: title.to_owned(),
            content: content.to_owned(),
            language: language.map(str::to_owned),
            version: 1,
        };
        if let Ok(mut inner) = self.inner.lock() {
            inner.canvases.insert(canvas.id.clone(), canvas.clone());
        }
        canvas
    }

    fn update_canvas(
        &self,
        canvas_id: &str,
        content: Option<&str>,
        title: Option<&str>,
    ) -> Option<Canvas> {
        let mut inner = self.inner.lock().ok()?;
        let canvas = inner.canvases.get_mut(canvas_id)?;
        if let Some(content) = content {
            canvas.content = content.to_owned();
        }
        if let Some(title) = title {
            canvas.title = title.to_owned();
        }
        canvas.version += 1;
        Some(canvas.clone())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn messages_get_sequential_positions_per_conversation() {
        let storage = MemoryStorage::new();
        let a1 = storage.create_message("conv-a", "user", "one");
        let b1 = storage.create_message("conv-b", "user", "other");
        let a2 = storage.create_message("conv-a", "assistant", "two");
        assert_eq!(a1.position, 0);
        assert_eq!(b1.position, 0);
        assert_eq!(a2.position, 1);
    }

    #[test]
    fn tool_call_update_round_trip() {
        let storage = MemoryStorage::new();
        let msg = storage.create_message("c", "assistant", "");
        storage.create_tool_call(&msg.id, "read_file", "builtin", &json!({"path": "x"}), "t1");
        storage.update_tool_call("t1", &json!({"content": "ok"}), "success");
        let calls = storage.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].status.as_deref(), Some("success"));
        assert_eq!(calls[0].output.as_ref().unwrap()["content"], "ok");
    }

    #[test]
    fn canvas_create_and_update_bumps_version() {
        let storage = MemoryStorage::new();
        let canvas = storage.create_canvas("c", "x.py", "print(1)", Some("python"));
        assert_eq!(canvas.version, 1);
        let updated = storage
            .update_canvas(&canvas.id, Some("print(2)"), None)
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.content, "print(2)");
        assert_eq!(updated.title, "x.py");
    }

    #[test]
    fn canvas_lookup_by_conversation() {
        let storage = MemoryStorage::new();
        assert!(storage.canvas_for_conversation("c").is_none());
        storage.create_canvas("c", "t", "body", None);
        assert!(storage.canvas_for_conversation("c").is_some());
    }

    #[test]
    fn update_missing_canvas_returns_none() {
        let storage = MemoryStorage::new();
        assert!(storage.update_canvas("nope", Some("x"), None).is_none());
    }
}
