//! Destructive-pattern detection for bash commands and sensitive write
//! paths.
//!
//! Pure functions — no I/O, no side effects.  A match here routes the call
//! through the approval prompt; it does not block outright (see
//! [`hard_block`](super::hard_block) for the unconditional tier).

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

static DESTRUCTIVE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\brm\b",
        r"\brmdir\b",
        r"\bgit\s+push\s+--force\b",
        r"\bgit\s+push\s+-f\b",
        r"\bgit\s+reset\s+--hard\b",
        r"\bgit\s+clean\b",
        r"\bgit\s+checkout\s+\.\s*$",
        r"(?i)\bdrop\s+table\b",
        r"(?i)\bdrop\s+database\b",
        r"(?i)\btruncate\b",
        r">\s*/dev/",
        r"\bchmod\s+777\b",
        r"\bkill\s+-9\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("destructive pattern must compile"))
    .collect()
});

const DEFAULT_SENSITIVE_PATHS: &[&str] = &[
    ".env",
    ".ssh",
    ".gnupg",
    ".aws/credentials",
    ".config/gcloud",
];

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapse `.` and `..` components without touching the filesystem.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    // Leading `..` on a relative path is kept as-is.
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Check a bash command against the destructive pattern list plus
/// user-supplied patterns.  Returns the matched pattern text.
///
/// User patterns that fail to compile as regex fall back to a
/// case-insensitive substring match.
pub fn find_destructive_pattern(command: &str, custom_patterns: &[String]) -> Option<String> {
    if command.trim().is_empty() {
        return None;
    }
    let normalized = normalize_whitespace(command);

    for pattern in DESTRUCTIVE_PATTERNS.iter() {
        if pattern.is_match(&normalized) {
            return Some(pattern.as_str().to_owned());
        }
    }

    for raw in custom_patterns {
        match Regex::new(&format!("(?i){raw}")) {
            Ok(compiled) => {
                if compiled.is_match(&normalized) {
                    return Some(raw.clone());
                }
            }
            Err(_) => {
                if normalized.to_lowercase().contains(&raw.to_lowercase()) {
                    return Some(raw.clone());
                }
            }
        }
    }

    None
}

/// Check a write path against the sensitive path list.  Returns the matched
/// sensitive entry.
///
/// Matches two ways: by resolved absolute path (relative inputs are joined
/// onto `working_dir`, `~`-prefixed sensitive entries onto the home
/// directory), and by path-component comparison so `.ssh/id_rsa` matches
/// even when the working directory is not the home directory.
pub fn find_sensitive_write(
    path: &str,
    working_dir: &Path,
    extra_sensitive: &[String],
) -> Option<String> {
    if path.is_empty() {
        return None;
    }

    let input = Path::new(path);
    let resolved = if input.is_absolute() {
        lexical_normalize(input)
    } else {
        lexical_normalize(&working_dir.join(input))
    };

    let home = dirs::home_dir();

    let path_parts: Vec<String> = lexical_normalize(input)
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    let all_sensitive = DEFAULT_SENSITIVE_PATHS
        .iter()
        .map(|s| s.to_string())
        .chain(extra_sensitive.iter().cloned());

    for sensitive in all_sensitive {
        let expanded: PathBuf = if let Some(rest) = sensitive.strip_prefix("~/") {
            match &home {
                Some(h) => h.join(rest),
                None => PathBuf::from(rest),
            }
        } else {
            PathBuf::from(&sensitive)
        };

        let sensitive_resolved = if expanded.is_absolute() {
            lexical_normalize(&expanded)
        } else {
            match &home {
                Some(h) => lexical_normalize(&h.join(&expanded)),
                None => lexical_normalize(&expanded),
            }
        };

        if resolved == sensitive_resolved || resolved.starts_with(&sensitive_resolved) {
            return Some(sensitive);
        }

        // Component matching: strip any ~/ or leading-slash prefix so
        // "~/.ssh" matches ".ssh" wherever it appears in the input path.
        let stripped = sensitive
            .trim_start_matches('~')
            .trim_start_matches('/')
            .trim_start_matches('\\');
        let sensitive_parts: Vec<String> = lexical_normalize(Path::new(stripped))
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        if sensitive_parts.is_empty() {
            continue;
        }
        if path_parts
            .windows(sensitive_parts.len())
            .any(|window| window == sensitive_parts.as_slice())
        {
            return Some(sensitive);
        }
    }

    None
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn no_custom() -> Vec<String> {
        Vec::new()
    }

    // ── Bash patterns ───────────────────────────────────────────────────

    #[test]
    fn rm_triggers() {
        assert!(find_destructive_pattern("rm file.txt", &no_custom()).is_some());
    }

    #[test]
    fn rmdir_triggers() {
        assert!(find_destructive_pattern("rmdir build", &no_custom()).is_some());
    }

    #[test]
    fn git_force_push_triggers() {
        assert!(find_destructive_pattern("git push --force origin main", &no_custom()).is_some());
        assert!(find_destructive_pattern("git push -f", &no_custom()).is_some());
    }

    #[test]
    fn git_reset_hard_triggers() {
        assert!(find_destructive_pattern("git reset --hard HEAD~3", &no_custom()).is_some());
    }

    #[test]
    fn git_checkout_dot_triggers() {
        assert!(find_destructive_pattern("git checkout .", &no_custom()).is_some());
    }

    #[test]
    fn git_checkout_branch_is_clean() {
        assert!(find_destructive_pattern("git checkout main", &no_custom()).is_none());
    }

    #[test]
    fn drop_table_case_insensitive() {
        assert!(find_destructive_pattern("psql -c 'DROP TABLE users'", &no_custom()).is_some());
        assert!(find_destructive_pattern("drop table users", &no_custom()).is_some());
    }

    #[test]
    fn redirect_to_dev_triggers() {
        assert!(find_destructive_pattern("echo x > /dev/sda", &no_custom()).is_some());
    }

    #[test]
    fn chmod_777_triggers() {
        assert!(find_destructive_pattern("chmod 777 script.sh", &no_custom()).is_some());
    }

    #[test]
    fn kill_9_triggers() {
        assert!(find_destructive_pattern("kill -9 1234", &no_custom()).is_some());
    }

    #[test]
    fn benign_commands_are_clean() {
        for cmd in ["ls -la", "cat README.md", "git status", "cargo build"] {
            assert!(
                find_destructive_pattern(cmd, &no_custom()).is_none(),
                "{cmd} should not match"
            );
        }
    }

    #[test]
    fn whitespace_is_normalized_before_matching() {
        assert!(find_destructive_pattern("git   push    --force", &no_custom()).is_some());
    }

    #[test]
    fn custom_regex_pattern_matches() {
        let custom = vec![r"\bterraform\s+destroy\b".to_owned()];
        assert!(find_destructive_pattern("terraform destroy -auto-approve", &custom).is_some());
    }

    #[test]
    fn invalid_custom_pattern_falls_back_to_substring() {
        let custom = vec!["[unclosed".to_owned()];
        assert!(find_destructive_pattern("run [unclosed thing", &custom).is_some());
        assert!(find_destructive_pattern("echo ok", &custom).is_none());
    }

    #[test]
    fn empty_command_is_clean() {
        assert!(find_destructive_pattern("   ", &no_custom()).is_none());
    }

    // ── Write paths ─────────────────────────────────────────────────────

    #[test]
    fn env_file_matches_by_component() {
        let matched = find_sensitive_write(".env", Path::new("/work"), &[]);
        assert_eq!(matched.as_deref(), Some(".env"));
    }

    #[test]
    fn ssh_dir_matches_relative_input() {
        let matched = find_sensitive_write(".ssh/id_rsa", Path::new("/work"), &[]);
        assert_eq!(matched.as_deref(), Some(".ssh"));
    }

    #[test]
    fn aws_credentials_matches_nested() {
        let matched = find_sensitive_write(".aws/credentials", Path::new("/work"), &[]);
        assert_eq!(matched.as_deref(), Some(".aws/credentials"));
    }

    #[test]
    fn absolute_home_path_matches() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        let path = home.join(".ssh").join("config");
        let matched = find_sensitive_write(&path.to_string_lossy(), Path::new("/work"), &[]);
        assert_eq!(matched.as_deref(), Some(".ssh"));
    }

    #[test]
    fn ordinary_paths_are_clean() {
        assert!(find_sensitive_write("src/main.rs", Path::new("/work"), &[]).is_none());
        assert!(find_sensitive_write("/tmp/out.txt", Path::new("/work"), &[]).is_none());
    }

    #[test]
    fn dot_dot_does_not_hide_sensitive_component() {
        let matched = find_sensitive_write("sub/../.ssh/key", Path::new("/work"), &[]);
        assert_eq!(matched.as_deref(), Some(".ssh"));
    }

    #[test]
    fn user_supplied_sensitive_path_matches() {
        let extra = vec!["secrets".to_owned()];
        let matched = find_sensitive_write("secrets/prod.yaml", Path::new("/work"), &extra);
        assert_eq!(matched.as_deref(), Some("secrets"));
    }

    #[test]
    fn empty_path_is_clean() {
        assert!(find_sensitive_write("", Path::new("/work"), &[]).is_none());
    }

    // ── lexical_normalize ───────────────────────────────────────────────

    #[test]
    fn normalize_collapses_dot_dot() {
        assert_eq!(
            lexical_normalize(Path::new("/a/b/../c")),
            PathBuf::from("/a/c")
        );
    }

    #[test]
    fn normalize_keeps_leading_dot_dot_on_relative() {
        assert_eq!(
            lexical_normalize(Path::new("../x")),
            PathBuf::from("../x")
        );
    }
}
