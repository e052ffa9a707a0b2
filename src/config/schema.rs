//! TOML configuration schema for Anteroom.
//!
//! All fields have `#[serde(default)]` so a partially-filled `config.toml`
//! works correctly.  Missing sections fall back to their `Default` impl.
//!
//! Example `~/.anteroom/config.toml`:
//! ```toml
//! [ai]
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-4o-mini"
//! api_key_command = "pass show openai/api-key"
//!
//! [safety]
//! approval_mode = "ask_for_writes"
//! denied_tools = ["bash"]
//!
//! [agent]
//! max_iterations = 50
//! narration_cadence = 5
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ─── AiConfig ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AiConfig {
    /// Base URL of the OpenAI-compatible endpoint (no trailing slash).
    pub base_url: String,
    /// Model identifier sent with every request (e.g. `"gpt-4o-mini"`).
    pub model: String,
    /// Static API key.  Ignored when `api_key_command` is set.
    pub api_key: String,
    /// External command that prints an API key to stdout.  When set, the
    /// client obtains and refreshes tokens through it.
    pub api_key_command: Option<String>,
    /// Read timeout for streaming requests, in seconds.
    pub request_timeout_secs: u64,
    /// Base system prompt prepended to every conversation.
    pub system_prompt: String,
    /// Set to `false` only for endpoints with self-signed certificates.
    pub verify_ssl: bool,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_owned(),
            model: "gpt-4o-mini".to_owned(),
            api_key: String::new(),
            api_key_command: None,
            request_timeout_secs: 120,
            system_prompt: "You are a helpful assistant with access to tools. \
                            Use them when they help you answer accurately."
                .to_owned(),
            verify_ssl: true,
        }
    }
}

// ─── SafetyConfig ─────────────────────────────────────────────────────────────

/// Per-tool enable toggle.  A disabled tool is hard-denied regardless of
/// approval mode or allow lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolToggle {
    pub enabled: bool,
}

impl Default for ToolToggle {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SafetyConfig {
    /// Master switch.  When `false` every tool call is auto-allowed.
    pub enabled: bool,
    /// `"auto"`, `"ask_for_dangerous"`, `"ask_for_writes"`, or `"ask"`.
    pub approval_mode: String,
    /// Tools that never require approval.
    pub allowed_tools: Vec<String>,
    /// Tools that are blocked without prompting.
    pub denied_tools: Vec<String>,
    /// Extra regex patterns that force approval for bash commands.
    pub custom_patterns: Vec<String>,
    /// Extra sensitive write paths (in addition to the built-in list).
    pub sensitive_paths: Vec<String>,
    /// Per-tool tier overrides: tool name → `"read"`, `"write"`,
    /// `"execute"`, or `"destructive"`.
    pub tool_tiers: HashMap<String, String>,
    /// Seconds to wait for an approval response before denying.
    pub approval_timeout_secs: u64,
    pub bash: ToolToggle,
    pub write_file: ToolToggle,
    pub subagent: SubagentConfig,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            approval_mode: "ask_for_writes".to_owned(),
            allowed_tools: Vec::new(),
            denied_tools: Vec::new(),
            custom_patterns: Vec::new(),
            sensitive_paths: Vec::new(),
            tool_tiers: HashMap::new(),
            approval_timeout_secs: 120,
            bash: ToolToggle::default(),
            write_file: ToolToggle::default(),
            subagent: SubagentConfig::default(),
        }
    }
}

// ─── SubagentConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SubagentConfig {
    /// Maximum sub-agents running at the same time.
    pub max_concurrent: usize,
    /// Maximum sub-agents spawned per root user request.
    pub max_total: usize,
}

impl Default for SubagentConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_total: 10,
        }
    }
}

// ─── AgentRunConfig ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentRunConfig {
    /// Maximum LLM-call iterations per user turn.
    pub max_iterations: usize,
    /// Tool outputs longer than this are truncated during context recovery.
    pub tool_output_max_chars: usize,
    /// Inject a progress-narration prompt every N tool calls (0 = off).
    pub narration_cadence: usize,
    /// Suggest switching to plan mode once this many tool calls have run
    /// in one turn (0 = off).
    pub auto_plan_threshold: usize,
}

impl Default for AgentRunConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            tool_output_max_chars: 2000,
            narration_cadence: 0,
            auto_plan_threshold: 0,
        }
    }
}

// ─── CliConfig ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CliConfig {
    /// Automatic retries on retryable stream errors (timeout, rate limit).
    pub max_retries: u32,
    /// Countdown length before each automatic retry, in seconds.
    pub retry_delay_secs: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_secs: 5,
        }
    }
}

// ─── AppConfig ────────────────────────────────────────────────────────────────

/// Top-level application configuration.
///
/// Loaded from `~/.anteroom/config.toml`, falling back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub ai: AiConfig,
    pub safety: SafetyConfig,
    pub agent: AgentRunConfig,
    pub cli: CliConfig,
}
