pub mod loader;
pub mod schema;

pub use loader::{ConfigError, default_config_path, load_config, load_default_config};
pub use schema::{
    AgentRunConfig, AiConfig, AppConfig, CliConfig, SafetyConfig, SubagentConfig, ToolToggle,
};
