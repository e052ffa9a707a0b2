pub mod agent;
pub mod ai;
pub mod cancel;
pub mod config;
pub mod event_bus;
#[cfg(feature = "gateway")]
pub mod gateway;
pub mod mcp;
pub mod safety;
pub mod storage;
pub mod tools;

/// Convenience re-exports for the most commonly used traits and types across
/// the Anteroom codebase.
///
/// ```rust
/// use anteroom::prelude::*;
/// ```
pub mod prelude {
    // Chat client
    pub use crate::ai::client::ChatClient;
    pub use crate::ai::types::{ChatMessage, Role, StreamErrorCode, StreamEvent, ToolCallRequest};
    // Agent loop
    pub use crate::agent::events::AgentEvent;
    pub use crate::agent::loop_::{AgentLoopConfig, ToolExecutor, run_agent_loop};
    pub use crate::agent::queue::MessageQueue;
    // Tool system
    pub use crate::tools::context::InvocationContext;
    pub use crate::tools::registry::{ApprovalHandler, ApprovalResponse, ToolRegistry};
    pub use crate::tools::traits::{ResultMap, Tool};
    // Safety
    pub use crate::safety::gate::{SafetyGate, SafetyVerdict};
    pub use crate::safety::tiers::{ApprovalMode, ToolTier};
    // Cancellation
    pub use crate::cancel::CancelToken;
    // Event fan-out
    pub use crate::event_bus::{AgentBus, BusEvent};
    // Configuration
    pub use crate::config::{AppConfig, load_default_config};
    // Collaborators
    pub use crate::mcp::McpManager;
    pub use crate::storage::Storage;
}
