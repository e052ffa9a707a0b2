//! MCP collaborator contract.
//!
//! External tool servers are a black box behind this trait; the core
//! threads their tools through the same registry/safety pipeline as the
//! built-ins.  Transport implementations (stdio, SSE) live outside the
//! core.

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::traits::ResultMap;

#[async_trait]
pub trait McpManager: Send + Sync {
    /// Tool schemas in OpenAI function format, for merging into the LLM
    /// tool list.
    fn openai_tools(&self) -> Vec<Value>;

    /// Invoke a server tool.  Failures come back as `{"error": …}` result
    /// maps, matching the built-in tool convention.
    async fn call_tool(&self, name: &str, arguments: Value) -> ResultMap;

    /// Name of the server providing `name`, for audit records.
    fn tool_server_name(&self, name: &str) -> String;

    /// Whether any connected server provides `name`.
    fn has_tool(&self, name: &str) -> bool {
        self.tool_server_name(name) != "unknown"
    }
}
