//! The layered safety gate: per-call admission decisions.
//!
//! Decision order, first match wins:
//! 1. Safety disabled → auto-allow.
//! 2. Per-tool disable toggle (bash / write_file) → hard deny.
//! 3. denied_tools → hard deny.
//! 4. allowed_tools ∪ session grants → auto-allow.
//! 5. Auto mode → auto-allow (skips the pattern checks).
//! 6. Tier below the mode threshold → destructive-pattern check for
//!    bash / write_file; clean → auto-allow.
//! 7. Otherwise → needs approval with a tier-based reason.
//!
//! The gate only *decides*; execution and the approval conversation live in
//! the tool registry.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{LazyLock, Mutex};

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::config::SafetyConfig;

use super::hard_block::check_hard_block;
use super::patterns::{find_destructive_pattern, find_sensitive_write};
use super::tiers::{Admission, admission, parse_approval_mode, tool_tier};

static TOOL_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_\-]{1,128}$").expect("tool name regex must compile"));

/// Decision emitted by the gate for one tool call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SafetyVerdict {
    pub needs_approval: bool,
    /// Blocked by config (denied_tools or per-tool disable); never execute,
    /// never prompt.
    pub hard_denied: bool,
    /// The command matches a hard-block pattern; the handler refuses it
    /// unless the user explicitly approves.
    pub is_hard_blocked: bool,
    pub hard_block_description: String,
    pub tool_name: String,
    pub reason: String,
    pub details: serde_json::Map<String, Value>,
}

impl SafetyVerdict {
    fn approval(tool_name: &str, reason: String) -> Self {
        Self {
            needs_approval: true,
            tool_name: tool_name.to_owned(),
            reason,
            ..Default::default()
        }
    }

    fn hard_denied(tool_name: &str, reason: String) -> Self {
        Self {
            needs_approval: true,
            hard_denied: true,
            tool_name: tool_name.to_owned(),
            reason,
            ..Default::default()
        }
    }

    fn with_detail(mut self, key: &str, value: impl Into<String>) -> Self {
        self.details.insert(key.to_owned(), Value::String(value.into()));
        self
    }
}

/// Stateful gate: configuration plus the session-granted permission set.
///
/// Shared via `Arc<SafetyGate>`; the session set is the only mutable state
/// and is guarded by an internal mutex.
pub struct SafetyGate {
    config: SafetyConfig,
    working_dir: PathBuf,
    session_allowed: Mutex<HashSet<String>>,
}

impl SafetyGate {
    pub fn new(config: SafetyConfig, working_dir: PathBuf) -> Self {
        Self {
            config,
            working_dir,
            session_allowed: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    /// Grant "for this session" permission for a tool.  Invalid names are
    /// rejected rather than stored.
    pub fn grant_session_permission(&self, tool_name: &str) {
        if !TOOL_NAME_RE.is_match(tool_name) {
            warn!(tool_name, "rejected invalid tool name for session permission");
            return;
        }
        if let Ok(mut allowed) = self.session_allowed.lock() {
            allowed.insert(tool_name.to_owned());
        }
    }

    /// Drop all session grants (end of session).
    pub fn clear_session_permissions(&self) {
        if let Ok(mut allowed) = self.session_allowed.lock() {
            allowed.clear();
        }
    }

    fn session_allowed_snapshot(&self) -> HashSet<String> {
        self.session_allowed
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Check whether a tool call requires approval.
    ///
    /// Returns `None` when the call is auto-allowed.  A verdict with
    /// `hard_denied` must be blocked without prompting.
    pub fn check(&self, tool_name: &str, arguments: &Value) -> Option<SafetyVerdict> {
        let config = &self.config;
        if !config.enabled {
            return None;
        }

        // Per-tool enabled toggle: when false, hard-deny the tool entirely.
        if (tool_name == "bash" && !config.bash.enabled)
            || (tool_name == "write_file" && !config.write_file.enabled)
        {
            return Some(SafetyVerdict::hard_denied(
                tool_name,
                format!("Tool '{tool_name}' is disabled in safety config"),
            ));
        }

        let tier = tool_tier(tool_name, &config.tool_tiers);
        let mode = parse_approval_mode(&config.approval_mode);
        let allowed: HashSet<String> = config.allowed_tools.iter().cloned().collect();
        let denied: HashSet<String> = config.denied_tools.iter().cloned().collect();
        let session = self.session_allowed_snapshot();

        match admission(tool_name, tier, mode, &allowed, &denied, &session) {
            Admission::HardDeny => Some(SafetyVerdict::hard_denied(
                tool_name,
                format!("Tool '{tool_name}' is in the denied tools list"),
            )),
            Admission::Allow => {
                // Tool-specific destructive patterns still apply below the
                // tier threshold — but not in auto mode, and not for tools
                // on the allow lists.
                if mode.threshold().is_none()
                    || allowed.contains(tool_name)
                    || session.contains(tool_name)
                {
                    return None;
                }
                self.pattern_verdict(tool_name, arguments)
            }
            Admission::Approve => {
                let reason = format!(
                    "Tool '{tool_name}' requires approval (mode: {})",
                    config.approval_mode
                );
                let verdict = match tool_name {
                    "bash" => {
                        let command = str_arg(arguments, "command");
                        let verdict =
                            SafetyVerdict::approval(tool_name, reason).with_detail("command", command);
                        self.enrich_with_hard_block(verdict, arguments)
                    }
                    "write_file" => SafetyVerdict::approval(tool_name, reason)
                        .with_detail("path", str_arg(arguments, "path")),
                    _ => SafetyVerdict::approval(tool_name, reason),
                };
                Some(verdict)
            }
        }
    }

    /// Destructive-pattern check for auto-allowed bash / write_file calls.
    fn pattern_verdict(&self, tool_name: &str, arguments: &Value) -> Option<SafetyVerdict> {
        match tool_name {
            "bash" => {
                let command = str_arg(arguments, "command");
                find_destructive_pattern(&command, &self.config.custom_patterns).map(|pattern| {
                    let verdict = SafetyVerdict::approval(
                        tool_name,
                        format!("Destructive command detected: {command}"),
                    )
                    .with_detail("command", command.clone())
                    .with_detail("matched_pattern", pattern);
                    self.enrich_with_hard_block(verdict, arguments)
                })
            }
            "write_file" => {
                let path = str_arg(arguments, "path");
                find_sensitive_write(&path, &self.working_dir, &self.config.sensitive_paths).map(
                    |matched| {
                        SafetyVerdict::approval(
                            tool_name,
                            format!("Write to sensitive path: {path}"),
                        )
                        .with_detail("path", path.clone())
                        .with_detail("matched_sensitive", matched)
                    },
                )
            }
            _ => None,
        }
    }

    /// Mark the verdict when the command also matches a hard-block pattern,
    /// so the approval prompt can warn accordingly and the registry can
    /// thread the bypass flag on approval.
    fn enrich_with_hard_block(&self, mut verdict: SafetyVerdict, arguments: &Value) -> SafetyVerdict {
        let command = str_arg(arguments, "command");
        if let Some(description) = check_hard_block(&command) {
            verdict.is_hard_blocked = true;
            verdict.hard_block_description = description.to_owned();
            verdict.reason = format!("DESTRUCTIVE command ({description}): {command}");
        }
        verdict
    }
}

fn str_arg(arguments: &Value, key: &str) -> String {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

// ─── Tests ──────────────────────────────────────────────────────────────────
