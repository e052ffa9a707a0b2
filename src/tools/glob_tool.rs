//! File pattern matching tool.

use std::path::PathBuf;
use std::time::SystemTime;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::safety::hard_block::validate_path;
use crate::safety::patterns::lexical_normalize;

use super::context::InvocationContext;
use super::traits::{ResultMap, Tool, error_result};

const MAX_RESULTS: usize = 500;

pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob_files"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern. Returns matching file paths sorted by \
         modification time (newest first)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern (e.g. \"**/*.rs\", \"src/**/*.ts\")"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search in. Defaults to working directory."
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value, ctx: &InvocationContext) -> ResultMap {
        let Some(pattern) = args.get("pattern").and_then(Value::as_str) else {
            return error_result("Missing required argument 'pattern'");
        };
        if pattern.contains('\0') {
            return error_result("Pattern contains null bytes");
        }

        let base_arg = args
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or(".")
            .to_owned();
        let base = match validate_path(&base_arg, &ctx.working_dir) {
            Ok(p) => p,
            Err(e) => return error_result(e),
        };
        if !base.is_dir() {
            return error_result("Directory not found");
        }

        let pattern = pattern.to_owned();
        let outcome = tokio::task::spawn_blocking(move || run_glob(&base, &pattern)).await;
        match outcome {
            Ok(Ok((files, truncated))) => {
                let mut result = Map::new();
                result.insert("count".to_owned(), json!(files.len()));
                result.insert("files".to_owned(), json!(files));
                result.insert("truncated".to_owned(), json!(truncated));
                result
            }
            Ok(Err(e)) => error_result(e),
            Err(e) => error_result(format!("glob task failed: {e}")),
        }
    }
}

fn run_glob(base: &PathBuf, pattern: &str) -> Result<(Vec<String>, bool), String> {
    let full_pattern = base.join(pattern).to_string_lossy().into_owned();
    let entries = glob::glob(&full_pattern).map_err(|e| format!("Invalid glob pattern: {e}"))?;

    let mut matches: Vec<(PathBuf, SystemTime)> = Vec::new();
    for entry in entries.flatten() {
        if !entry.is_file() {
            continue;
        }
        // Reject matches escaping the base via symlinks.
        let resolved = entry
            .canonicalize()
            .unwrap_or_else(|_| lexical_normalize(&entry));
        let resolved_base = base
            .canonicalize()
            .unwrap_or_else(|_| lexical_normalize(base));
        if !resolved.starts_with(&resolved_base) {
            continue;
        }
        let mtime = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        matches.push((entry, mtime));
    }

    matches.sort_by(|a, b| b.1.cmp(&a.1));
    let truncated = matches.len() > MAX_RESULTS;

    let files = matches
        .into_iter()
        .take(MAX_RESULTS)
        .map(|(path, _)| {
            path.strip_prefix(base)
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|_| path.to_string_lossy().into_owned())
        })
        .collect();

    Ok((files, truncated))
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn ctx(dir: &TempDir) -> InvocationContext {
        InvocationContext::new(dir.path().to_path_buf())
    }

    #[tokio::test]
    async fn matches_by_extension() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.rs"), "").unwrap();
        fs::write(dir.path().join("b.txt"), "").unwrap();
        let result = GlobTool
            .execute(json!({"pattern": "*.rs"}), &ctx(&dir))
            .await;
        assert_eq!(result["count"], 1);
        assert_eq!(result["files"][0], "a.rs");
    }

    #[tokio::test]
    async fn recursive_pattern_finds_nested_files() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src/deep")).unwrap();
        fs::write(dir.path().join("src/deep/mod.rs"), "").unwrap();
        let result = GlobTool
            .execute(json!({"pattern": "**/*.rs"}), &ctx(&dir))
            .await;
        assert_eq!(result["count"], 1);
        assert!(
            result["files"][0]
                .as_str()
                .unwrap()
                .ends_with("deep/mod.rs")
        );
    }

    #[tokio::test]
    async fn directories_are_not_listed() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();
        let result = GlobTool.execute(json!({"pattern": "*"}), &ctx(&dir)).await;
        assert_eq!(result["count"], 0);
    }

    #[tokio::test]
    async fn null_byte_pattern_rejected() {
        let dir = TempDir::new().unwrap();
        let result = GlobTool
            .execute(json!({"pattern": "*\u{0}*"}), &ctx(&dir))
            .await;
        assert!(result.contains_key("error"));
    }

    #[tokio::test]
    async fn missing_directory_errors() {
        let dir = TempDir::new().unwrap();
        let result = GlobTool
            .execute(
                json!({"pattern": "*", "path": "does-not-exist"}),
                &ctx(&dir),
            )
            .await;
        assert_eq!(result["error"], "Directory not found");
    }
}
