//! Central registry of tools, mediating every invocation through the
//! safety gate and the approval channel.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::safety::gate::{SafetyGate, SafetyVerdict};

use super::context::InvocationContext;
use super::traits::{APPROVAL_DECISION_KEY, ResultMap, Tool, error_result, shell_error_result};

/// User response to an approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalResponse {
    /// Allow this one call.
    Approved,
    /// Allow this call and grant the tool for the rest of the session.
    ApprovedForSession,
    Denied,
}

/// The approval conversation: shown a verdict, returns the user's decision.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn confirm(&self, verdict: &SafetyVerdict) -> ApprovalResponse;
}

/// Registry of tools with OpenAI function-call schemas.
///
/// Effectively immutable after setup; the session-allowed set lives in the
/// gate behind its own lock.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    gate: Arc<SafetyGate>,
    /// Fallback approval handler used when a call site passes none
    /// (sub-agent executors).  Set once at startup.
    default_confirm: RwLock<Option<Arc<dyn ApprovalHandler>>>,
}

impl ToolRegistry {
    pub fn new(gate: Arc<SafetyGate>) -> Self {
        Self {
            tools: HashMap::new(),
            gate,
            default_confirm: RwLock::new(None),
        }
    }

    /// Register a tool.  Overwrites any previous tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_owned(), tool);
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn gate(&self) -> &Arc<SafetyGate> {
        &self.gate
    }

    /// Schemas in the shape the chat completions API accepts.
    pub fn openai_tools(&self) -> Vec<Value> {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name(),
                        "description": tool.description(),
                        "parameters": tool.parameters_schema(),
                    },
                })
            })
            .collect()
    }

    pub fn set_confirm_handler(&self, handler: Option<Arc<dyn ApprovalHandler>>) {
        if let Ok(mut slot) = self.default_confirm.write() {
            *slot = handler;
        }
    }

    /// Grant "always allow for this session" for a tool.
    pub fn grant_session_permission(&self, tool_name: &str) {
        self.gate.grant_session_permission(tool_name);
    }

    pub fn clear_session_permissions(&self) {
        self.gate.clear_session_permissions();
    }

    /// Run the admission conversation for one call: gate check, approval
    /// prompt, session grants.
    ///
    /// Shared by [`call_tool`] and the executor's MCP dispatch so both
    /// paths produce identical decision tags and block shapes.
    ///
    /// [`call_tool`]: ToolRegistry::call_tool
    pub(crate) async fn admit(
        &self,
        name: &str,
        args: &Value,
        confirm: Option<Arc<dyn ApprovalHandler>>,
    ) -> AdmissionOutcome {
        let verdict = self.gate.check(name, args);
        let Some(verdict) = verdict.filter(|v| v.needs_approval) else {
            return AdmissionOutcome::Proceed {
                decision: "auto",
                bypass_hard_block: false,
            };
        };

        if verdict.hard_denied {
            warn!(tool = name, "tool hard-denied by config");
            let mut result = error_result(format!("Tool '{name}' is blocked by configuration"));
            result.insert("safety_blocked".to_owned(), Value::Bool(true));
            result.insert(APPROVAL_DECISION_KEY.to_owned(), json!("hard_denied"));
            return AdmissionOutcome::Blocked(result);
        }

        let confirm = confirm.or_else(|| {
            self.default_confirm
                .read()
                .ok()
                .and_then(|slot| slot.clone())
        });
        let Some(handler) = confirm else {
            // No approval channel: block silently.  This is the safety
            // net for unattended agents hitting hard-blocked commands.
            if verdict.is_hard_blocked {
                info!(
                    description = %verdict.hard_block_description,
                    "hard-block safety net (no approval channel)"
                );
            } else {
                warn!(reason = %verdict.reason, "safety gate blocked (no approval channel)");
            }
            let mut result = error_result("Operation blocked: no approval channel available");
            result.insert("safety_blocked".to_owned(), Value::Bool(true));
            result.insert(APPROVAL_DECISION_KEY.to_owned(), json!("denied"));
            return AdmissionOutcome::Blocked(result);
        };

        match handler.confirm(&verdict).await {
            ApprovalResponse::Denied => {
                let mut result = shell_error_result("Operation denied by user");
                result.insert(APPROVAL_DECISION_KEY.to_owned(), json!("denied"));
                AdmissionOutcome::Blocked(result)
            }
            ApprovalResponse::ApprovedForSession => {
                self.gate.grant_session_permission(name);
                AdmissionOutcome::Proceed {
                    decision: "allowed_once",
                    bypass_hard_block: verdict.is_hard_blocked,
                }
            }
            ApprovalResponse::Approved => AdmissionOutcome::Proceed {
                decision: "allowed_once",
                bypass_hard_block: verdict.is_hard_blocked,
            },
        }
    }

    /// Invoke a tool through the full admission pipeline.
    ///
    /// Returns `Err` only for unknown tools; every safety outcome is a
    /// normal result map so the LLM can see the denial and adjust.
    pub async fn call_tool(
        &self,
        name: &str,
        args: Value,
        ctx: &InvocationContext,
        confirm: Option<Arc<dyn ApprovalHandler>>,
    ) -> Result<ResultMap, String> {
        let Some(tool) = self.tools.get(name) else {
            return Err(format!("Unknown built-in tool: {name}"));
        };

        match self.admit(name, &args, confirm).await {
            AdmissionOutcome::Blocked(result) => Ok(result),
            AdmissionOutcome::Proceed {
                decision,
                bypass_hard_block,
            } => {
                let mut call_ctx = ctx.clone();
                call_ctx.bypass_hard_block = bypass_hard_block;

                let mut result = tool.execute(args, &call_ctx).await;
                result.insert(APPROVAL_DECISION_KEY.to_owned(), json!(decision));
                Ok(result)
            }
        }
    }
}

/// Outcome of the admission conversation for one tool call.
pub(crate) enum AdmissionOutcome {
    /// Execute the call, tagging the result with `decision`.
    Proceed {
        decision: &'static str,
        /// The user explicitly approved a hard-blocked pattern.
        bypass_hard_block: bool,
    },
    /// Do not execute; return this result map (decision tag attached).
    Blocked(ResultMap),
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SafetyConfig;
    use serde_json::Map;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, args: Value, _ctx: &InvocationContext) -> ResultMap {
            let mut map = Map::new();
            map.insert("echo".to_owned(), args);
            map
        }
    }

    /// Records whether the bypass flag reached the handler.
    struct BypassProbe;

    #[async_trait]
    impl Tool for BypassProbe {
        fn name(&self) -> &str {
            "bash"
        }
        fn description(&self) -> &str {
            "probe"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: Value, ctx: &InvocationContext) -> ResultMap {
            let mut map = Map::new();
            map.insert("bypass".to_owned(), Value::Bool(ctx.bypass_hard_block));
            map
        }
    }

    struct FixedHandler {
        response: ApprovalResponse,
        calls: AtomicUsize,
    }

    impl FixedHandler {
        fn new(response: ApprovalResponse) -> Arc<Self> {
            Arc::new(Self {
                response,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ApprovalHandler for FixedHandler {
        async fn confirm(&self, _verdict: &SafetyVerdict) -> ApprovalResponse {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response
        }
    }

    fn registry(mutate: impl FnOnce(&mut SafetyConfig)) -> ToolRegistry {
        let mut config = SafetyConfig::default();
        mutate(&mut config);
        let gate = Arc::new(SafetyGate::new(config, PathBuf::from("/work")));
        let mut reg = ToolRegistry::new(gate);
        reg.register(Arc::new(EchoTool));
        reg
    }

    fn ctx() -> InvocationContext {
        InvocationContext::new(PathBuf::from("/work"))
    }

    #[tokio::test]
    async fn unknown_tool_is_an_err() {
        let reg = registry(|_| {});
        let result = reg.call_tool("nope", json!({}), &ctx(), None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn auto_allowed_tool_runs_with_auto_decision() {
        // Unknown-tier `echo` defaults to Execute; allow-list it.
        let reg = registry(|c| c.allowed_tools = vec!["echo".to_owned()]);
        let result = reg
            .call_tool("echo", json!({"message": "hi"}), &ctx(), None)
            .await
            .unwrap();
        assert_eq!(result[APPROVAL_DECISION_KEY], "auto");
        assert_eq!(result["echo"]["message"], "hi");
    }

    #[tokio::test]
    async fn needs_approval_without_channel_is_blocked() {
        let reg = registry(|_| {});
        let result = reg.call_tool("echo", json!({}), &ctx(), None).await.unwrap();
        assert_eq!(result["safety_blocked"], true);
        assert_eq!(result[APPROVAL_DECISION_KEY], "denied");
    }

    #[tokio::test]
    async fn denied_by_user_returns_exit_code() {
        let reg = registry(|_| {});
        let handler = FixedHandler::new(ApprovalResponse::Denied);
        let result = reg
            .call_tool("echo", json!({}), &ctx(), Some(handler.clone()))
            .await
            .unwrap();
        assert_eq!(result["error"], "Operation denied by user");
        assert_eq!(result["exit_code"], -1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn approved_once_tags_allowed_once() {
        let reg = registry(|_| {});
        let handler = FixedHandler::new(ApprovalResponse::Approved);
        let result = reg
            .call_tool("echo", json!({}), &ctx(), Some(handler))
            .await
            .unwrap();
        assert_eq!(result[APPROVAL_DECISION_KEY], "allowed_once");
    }

    #[tokio::test]
    async fn session_approval_skips_prompt_on_next_call() {
        let reg = registry(|_| {});
        let handler = FixedHandler::new(ApprovalResponse::ApprovedForSession);
        reg.call_tool("echo", json!({}), &ctx(), Some(handler.clone()))
            .await
            .unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        // Second call: session grant short-circuits the prompt.
        let result = reg
            .call_tool("echo", json!({}), &ctx(), Some(handler.clone()))
            .await
            .unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result[APPROVAL_DECISION_KEY], "auto");
    }

    #[tokio::test]
    async fn hard_denied_tool_never_prompts() {
        let reg = registry(|c| c.denied_tools = vec!["echo".to_owned()]);
        let handler = FixedHandler::new(ApprovalResponse::Approved);
        let result = reg
            .call_tool("echo", json!({}), &ctx(), Some(handler.clone()))
            .await
            .unwrap();
        assert_eq!(result["safety_blocked"], true);
        assert_eq!(result[APPROVAL_DECISION_KEY], "hard_denied");
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0, "no prompt for hard deny");
    }

    #[tokio::test]
    async fn approving_hard_blocked_command_sets_bypass_flag() {
        let mut reg = registry(|_| {});
        reg.register(Arc::new(BypassProbe));
        let handler = FixedHandler::new(ApprovalResponse::Approved);
        let result = reg
            .call_tool("bash", json!({"command": "rm -rf /tmp/x"}), &ctx(), Some(handler))
            .await
            .unwrap();
        assert_eq!(result["bypass"], true);
    }

    #[tokio::test]
    async fn plain_approval_does_not_set_bypass_flag() {
        let mut reg = registry(|_| {});
        reg.register(Arc::new(BypassProbe));
        let handler = FixedHandler::new(ApprovalResponse::Approved);
        let result = reg
            .call_tool("bash", json!({"command": "cargo build"}), &ctx(), Some(handler))
            .await
            .unwrap();
        assert_eq!(result["bypass"], false);
    }

    #[tokio::test]
    async fn default_confirm_handler_is_used_when_none_passed() {
        let reg = registry(|_| {});
        let handler = FixedHandler::new(ApprovalResponse::Approved);
        reg.set_confirm_handler(Some(handler.clone()));
        let result = reg.call_tool("echo", json!({}), &ctx(), None).await.unwrap();
        assert_eq!(result[APPROVAL_DECISION_KEY], "allowed_once");
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn openai_tools_schema_shape() {
        let reg = registry(|_| {});
        let tools = reg.openai_tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["type"], "function");
        assert_eq!(tools[0]["function"]["name"], "echo");
        assert!(tools[0]["function"]["parameters"].is_object());
    }
}
