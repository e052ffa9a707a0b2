//! Last-line-of-defense command and path validation.
//!
//! [`sanitize_command`] hard-blocks catastrophic commands at the handler
//! level, regardless of approval mode, allowed_tools, session permissions,
//! or any other config.  The pattern detection in
//! [`patterns`](super::patterns) and the tier-based approval system are the
//! primary gates; this is the nuclear option.  The only way past it is the
//! explicit bypass flag the registry sets after a user approves a
//! hard-blocked command interactively.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use super::patterns::lexical_normalize;

/// Paths that should never be accessible via tools.
const BLOCKED_PATHS: &[&str] = &["/etc/shadow", "/etc/passwd", "/etc/sudoers"];

const BLOCKED_PREFIXES: &[&str] = &["/proc/", "/sys/", "/dev/"];

/// Catastrophic command patterns that should NEVER execute regardless of
/// configuration.  Less catastrophic but still dangerous commands
/// (git push --force, drop table) are handled by the approval prompt.
static HARD_BLOCK_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        // Mass recursive deletion
        (
            r"(?i)\brm\s+(-[a-zA-Z]*f[a-zA-Z]*\s+)?-[a-zA-Z]*r|\brm\s+(-[a-zA-Z]*r[a-zA-Z]*\s+)?-[a-zA-Z]*f",
            "recursive forced deletion (rm -rf)",
        ),
        // Disk formatting / wiping
        (r"(?i)\bmkfs\b", "disk formatting (mkfs)"),
        (
            r"(?i)\bdd\b.*\bif=/dev/(zero|urandom|random)\b",
            "disk overwrite (dd)",
        ),
        // Fork bombs
        (r":\(\)\s*\{.*\|.*&\s*\}\s*;", "fork bomb"),
        (r"(?i)\bfork\s*bomb\b", "fork bomb"),
        // chmod 777 on root
        (r"\bchmod\s+(-[a-zA-Z]*R[a-zA-Z]*\s+)?777\s+/\s*$", "recursive chmod 777 /"),
        // Pipe to shell from network (curl | sh, wget | bash, etc.)
        (r"\b(curl|wget)\b.*\|\s*(ba)?sh\b", "pipe from network to shell"),
        (r"\b(curl|wget)\b.*\|\s*sudo\b", "pipe from network to sudo"),
        // Direct eval/exec of base64 (common evasion technique)
        (r"\bbase64\b.*\|\s*(ba)?sh\b", "base64 decode piped to shell"),
        (r"\bbase64\b.*\|\s*sudo\b", "base64 decode piped to sudo"),
        // Python/perl/ruby one-liner evasion
        (
            r"\b(python|python3|perl|ruby)\s+-[a-zA-Z]*e\s+.*\bos\.(system|popen|exec)\b",
            "scripted shell escape",
        ),
        // sudo rm
        (r"\bsudo\s+rm\b", "sudo rm"),
    ]
    .iter()
    .map(|(p, desc)| (Regex::new(p).expect("hard-block pattern must compile"), *desc))
    .collect()
});

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Check a command against the hard-block list.  Returns the description of
/// the matched pattern.
pub fn check_hard_block(command: &str) -> Option<&'static str> {
    if command.trim().is_empty() {
        return None;
    }
    let normalized = normalize_whitespace(command);
    HARD_BLOCK_PATTERNS
        .iter()
        .find(|(pattern, _)| pattern.is_match(&normalized))
        .map(|(_, description)| *description)
}

/// Hard-block validation for shell commands.
///
/// Runs at the handler level AFTER all approval checks.  Only blocks
/// catastrophic patterns; less dangerous commands are gated by the approval
/// system.
pub fn sanitize_command(command: &str) -> Result<(), String> {
    if command.contains('\0') {
        return Err("Command contains null bytes".to_owned());
    }
    if let Some(description) = check_hard_block(command) {
        let preview: String = command.chars().take(100).collect();
        warn!(description, command = %preview, "hard-blocked dangerous command");
        return Err(format!("Blocked: {description}"));
    }
    Ok(())
}

/// Validate and resolve a file path for the file tools.
///
/// Relative inputs are resolved against `working_dir`; `..` components are
/// collapsed before checking.  Symlinks are resolved when the path exists.
pub fn validate_path(path: &str, working_dir: &Path) -> Result<PathBuf, String> {
    if path.contains('\0') {
        return Err("Path contains null bytes".to_owned());
    }

    let input = Path::new(path);
    let lexical = if input.is_absolute() {
        lexical_normalize(input)
    } else {
        lexical_normalize(&working_dir.join(input))
    };
    // Canonicalize when possible so symlinked paths cannot dodge the check;
    // non-existent paths keep the lexical form.
    let resolved = lexical.canonicalize().unwrap_or(lexical);

    for blocked in BLOCKED_PATHS {
        let blocked_path = Path::new(blocked);
        let blocked_real = blocked_path.canonicalize().unwrap_or_else(|_| blocked_path.to_path_buf());
        if resolved == blocked_path || resolved == blocked_real {
            warn!(path = %resolved.display(), "blocked access to sensitive path");
            return Err(format!("Access denied: {path}"));
        }
    }

    let resolved_str = resolved.to_string_lossy();
    for prefix in BLOCKED_PREFIXES {
        if resolved_str.starts_with(prefix) {
            warn!(path = %resolved.display(), "blocked access to system path");
            return Err(format!("Access denied: {path}"));
        }
    }

    Ok(resolved)
}

// ─── Tests ──────────────────────────────────────────────────────────────────
