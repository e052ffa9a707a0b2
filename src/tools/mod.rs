pub mod bash;
pub mod canvas;
pub mod context;
pub mod edit;
pub mod executor;
pub mod glob_tool;
pub mod grep;
pub mod read;
pub mod registry;
pub mod subagent;
pub mod traits;
pub mod write;

use std::sync::Arc;

pub use context::{InvocationContext, SubagentContext};
pub use executor::RootExecutor;
pub use registry::{ApprovalHandler, ApprovalResponse, ToolRegistry};
pub use subagent::{SubagentLimiter, SubagentTool};
pub use traits::{CallStatus, ResultMap, Tool};

/// Register all built-in tools.
pub fn register_default_tools(registry: &mut ToolRegistry) {
    registry.register(Arc::new(read::ReadFileTool));
    registry.register(Arc::new(write::WriteFileTool));
    registry.register(Arc::new(edit::EditFileTool));
    registry.register(Arc::new(bash::BashTool));
    registry.register(Arc::new(glob_tool::GlobTool));
    registry.register(Arc::new(grep::GrepTool));
    registry.register(Arc::new(canvas::CreateCanvasTool));
    registry.register(Arc::new(canvas::UpdateCanvasTool));
    registry.register(Arc::new(canvas::PatchCanvasTool));
    registry.register(Arc::new(subagent::SubagentTool));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SafetyConfig;
    use crate::safety::gate::SafetyGate;
    use std::path::PathBuf;

    #[test]
    fn default_tools_are_registered() {
        let gate = Arc::new(SafetyGate::new(SafetyConfig::default(), PathBuf::from(".")));
        let mut registry = ToolRegistry::new(gate);
        register_default_tools(&mut registry);
        for name in [
            "read_file",
            "write_file",
            "edit_file",
            "bash",
            "glob_files",
            "grep",
            "create_canvas",
            "update_canvas",
            "patch_canvas",
            "run_agent",
        ] {
            assert!(registry.has_tool(name), "{name} missing");
        }
        assert_eq!(registry.len(), 10);
    }
}
