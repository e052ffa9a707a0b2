//! Tool risk tiers and approval-mode logic.
//!
//! Pure functions — no I/O, no side effects.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Risk tier for tools. Variant order defines ordinality: later = more
/// dangerous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolTier {
    Read,
    Write,
    Execute,
    Destructive,
}

impl ToolTier {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "read" => Some(Self::Read),
            "write" => Some(Self::Write),
            "execute" => Some(Self::Execute),
            "destructive" => Some(Self::Destructive),
            _ => None,
        }
    }
}

/// Approval mode controlling which tiers require approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Nothing triggers approval.
    Auto,
    /// Only destructive-tier tools.
    AskForDangerous,
    /// Write, execute, and destructive tiers.
    AskForWrites,
    /// Same threshold as `ask_for_writes`.
    Ask,
}

impl ApprovalMode {
    /// Minimum tier that triggers approval; `None` means nothing does.
    pub fn threshold(self) -> Option<ToolTier> {
        match self {
            Self::Auto => None,
            Self::AskForDangerous => Some(ToolTier::Destructive),
            Self::AskForWrites | Self::Ask => Some(ToolTier::Write),
        }
    }
}

/// Parse an approval mode string. Returns `AskForWrites` on invalid input.
pub fn parse_approval_mode(raw: &str) -> ApprovalMode {
    match raw.trim().to_ascii_lowercase().as_str() {
        "auto" => ApprovalMode::Auto,
        "ask_for_dangerous" => ApprovalMode::AskForDangerous,
        "ask" => ApprovalMode::Ask,
        _ => ApprovalMode::AskForWrites,
    }
}

/// Look up the risk tier for a tool.
///
/// Priority: config overrides > built-in table > the MCP/unknown default
/// (`Execute`).
pub fn tool_tier(tool_name: &str, tier_overrides: &HashMap<String, String>) -> ToolTier {
    if let Some(raw) = tier_overrides.get(tool_name)
        && let Some(tier) = ToolTier::parse(raw)
    {
        return tier;
    }

    match tool_name {
        "read_file" | "glob_files" | "grep" => ToolTier::Read,
        "write_file" | "edit_file" | "create_canvas" | "update_canvas" | "patch_canvas" => {
            ToolTier::Write
        }
        "bash" => ToolTier::Execute,
        _ => ToolTier::Execute,
    }
}

/// Outcome of the list/mode admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Auto-allowed; skip approval.
    Allow,
    /// Requires user approval.
    Approve,
    /// Blocked without prompting (denied_tools).
    HardDeny,
}

/// Determine whether a tool call requires approval, ignoring
/// pattern-specific checks (those layer on top in the gate).
pub fn admission(
    tool_name: &str,
    tier: ToolTier,
    mode: ApprovalMode,
    allowed_tools: &HashSet<String>,
    denied_tools: &HashSet<String>,
    session_allowed: &HashSet<String>,
) -> Admission {
    if denied_tools.contains(tool_name) {
        return Admission::HardDeny;
    }
    if allowed_tools.contains(tool_name) || session_allowed.contains(tool_name) {
        return Admission::Allow;
    }
    match mode.threshold() {
        None => Admission::Allow,
        Some(threshold) if tier >= threshold => Admission::Approve,
        Some(_) => Admission::Allow,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn tier_ordering() {
        assert!(ToolTier::Read < ToolTier::Write);
        assert!(ToolTier::Write < ToolTier::Execute);
        assert!(ToolTier::Execute < ToolTier::Destructive);
    }

    #[test]
    fn builtin_tiers() {
        let none = HashMap::new();
        assert_eq!(tool_tier("read_file", &none), ToolTier::Read);
        assert_eq!(tool_tier("grep", &none), ToolTier::Read);
        assert_eq!(tool_tier("write_file", &none), ToolTier::Write);
        assert_eq!(tool_tier("patch_canvas", &none), ToolTier::Write);
        assert_eq!(tool_tier("bash", &none), ToolTier::Execute);
    }

    #[test]
    fn unknown_tools_default_to_execute() {
        assert_eq!(tool_tier("mcp_fetch_page", &HashMap::new()), ToolTier::Execute);
    }

    #[test]
    fn tier_override_applies() {
        let overrides = HashMap::from([("grep".to_owned(), "DESTRUCTIVE".to_owned())]);
        assert_eq!(tool_tier("grep", &overrides), ToolTier::Destructive);
    }

    #[test]
    fn invalid_tier_override_falls_back() {
        let overrides = HashMap::from([("grep".to_owned(), "nuclear".to_owned())]);
        assert_eq!(tool_tier("grep", &overrides), ToolTier::Read);
    }

    #[test]
    fn parse_modes() {
        assert_eq!(parse_approval_mode("auto"), ApprovalMode::Auto);
        assert_eq!(
            parse_approval_mode("ask_for_dangerous"),
            ApprovalMode::AskForDangerous
        );
        assert_eq!(parse_approval_mode("ask"), ApprovalMode::Ask);
        assert_eq!(parse_approval_mode("ASK_FOR_WRITES"), ApprovalMode::AskForWrites);
        assert_eq!(parse_approval_mode("garbage"), ApprovalMode::AskForWrites);
    }

    #[test]
    fn denied_list_wins_over_allowed() {
        let result = admission(
            "bash",
            ToolTier::Execute,
            ApprovalMode::Auto,
            &set(&["bash"]),
            &set(&["bash"]),
            &HashSet::new(),
        );
        assert_eq!(result, Admission::HardDeny);
    }

    #[test]
    fn allowed_list_skips_approval() {
        let result = admission(
            "bash",
            ToolTier::Execute,
            ApprovalMode::AskForWrites,
            &set(&["bash"]),
            &HashSet::new(),
            &HashSet::new(),
        );
        assert_eq!(result, Admission::Allow);
    }

    #[test]
    fn session_grant_skips_approval() {
        let result = admission(
            "write_file",
            ToolTier::Write,
            ApprovalMode::AskForWrites,
            &HashSet::new(),
            &HashSet::new(),
            &set(&["write_file"]),
        );
        assert_eq!(result, Admission::Allow);
    }

    #[test]
    fn auto_mode_allows_everything() {
        let result = admission(
            "bash",
            ToolTier::Destructive,
            ApprovalMode::Auto,
            &HashSet::new(),
            &HashSet::new(),
            &HashSet::new(),
        );
        assert_eq!(result, Admission::Allow);
    }

    #[test]
    fn ask_for_writes_gates_write_tier_and_above() {
        for (tier, expect) in [
            (ToolTier::Read, Admission::Allow),
            (ToolTier::Write, Admission::Approve),
            (ToolTier::Execute, Admission::Approve),
            (ToolTier::Destructive, Admission::Approve),
        ] {
            let result = admission(
                "t",
                tier,
                ApprovalMode::AskForWrites,
                &HashSet::new(),
                &HashSet::new(),
                &HashSet::new(),
            );
            assert_eq!(result, expect, "tier {tier:?}");
        }
    }

    #[test]
    fn ask_for_dangerous_gates_only_destructive() {
        for (tier, expect) in [
            (ToolTier::Read, Admission::Allow),
            (ToolTier::Write, Admission::Allow),
            (ToolTier::Execute, Admission::Allow),
            (ToolTier::Destructive, Admission::Approve),
        ] {
            let result = admission(
                "t",
                tier,
                ApprovalMode::AskForDangerous,
                &HashSet::new(),
                &HashSet::new(),
                &HashSet::new(),
            );
            assert_eq!(result, expect, "tier {tier:?}");
        }
    }
}
