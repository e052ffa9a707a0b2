//! Tool handler contract.
//!
//! Tool outcomes are *values*: every handler returns a JSON result map, with
//! failures carried under an `"error"` key.  Catastrophic failures (unknown
//! tool, invalid registry state) are the only `Err` path, surfaced by the
//! registry rather than individual tools.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::context::InvocationContext;

/// Structured result of one tool invocation.
pub type ResultMap = Map<String, Value>;

/// Internal bookkeeping key attached by the registry for auditing; stripped
/// before the result reaches the LLM.
pub const APPROVAL_DECISION_KEY: &str = "_approval_decision";

/// Outcome status attached to `tool_call_end` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Success,
    Error,
    Cancelled,
}

impl CallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// `{"error": message}`
pub fn error_result(message: impl Into<String>) -> ResultMap {
    let mut map = Map::new();
    map.insert("error".to_owned(), Value::String(message.into()));
    map
}

/// `{"error": message, "exit_code": -1}` — the shell-flavoured error shape.
pub fn shell_error_result(message: impl Into<String>) -> ResultMap {
    let mut map = error_result(message);
    map.insert("exit_code".to_owned(), Value::from(-1));
    map
}

/// Synthesized result for calls cancelled by the user.
pub fn cancelled_result() -> ResultMap {
    error_result("Cancelled by user")
}

/// Drop every key starting with `_` before shipping a result to the LLM.
pub fn strip_internal_keys(result: &ResultMap) -> ResultMap {
    result
        .iter()
        .filter(|(k, _)| !k.starts_with('_'))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// A capability the agent loop can invoke.
///
/// Implementations must be `Send + Sync` so they can be held in a shared
/// `Arc<dyn Tool>` registry.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable machine identifier (snake_case), e.g. `"read_file"`.
    fn name(&self) -> &str;

    /// Human-readable description used in LLM function schemas.
    fn description(&self) -> &str;

    /// JSON Schema object describing the tool's accepted parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool.  Validation failures are part of the result map;
    /// handlers do not panic on bad input.
    async fn execute(&self, args: Value, ctx: &InvocationContext) -> ResultMap;
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_result_shape() {
        let map = error_result("boom");
        assert_eq!(map["error"], "boom");
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn shell_error_carries_exit_code() {
        let map = shell_error_result("denied");
        assert_eq!(map["exit_code"], -1);
    }

    #[test]
    fn cancelled_result_message() {
        assert_eq!(cancelled_result()["error"], "Cancelled by user");
    }

    #[test]
    fn strip_removes_underscore_keys_only() {
        let mut map = ResultMap::new();
        map.insert("content".into(), json!("ok"));
        map.insert(APPROVAL_DECISION_KEY.into(), json!("auto"));
        map.insert("_other_internal".into(), json!(1));
        let stripped = strip_internal_keys(&map);
        assert_eq!(stripped.len(), 1);
        assert!(stripped.contains_key("content"));
    }

    #[test]
    fn call_status_strings() {
        assert_eq!(CallStatus::Success.as_str(), "success");
        assert_eq!(CallStatus::Error.as_str(), "error");
        assert_eq!(CallStatus::Cancelled.as_str(), "cancelled");
        assert_eq!(serde_json::to_value(CallStatus::Cancelled).unwrap(), "cancelled");
    }
}
