//! Regex content search tool.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value, json};

use crate::safety::hard_block::validate_path;

use super::context::InvocationContext;
use super::traits::{ResultMap, Tool, error_result};

const MAX_OUTPUT: usize = 100_000;
const MAX_FILE_SIZE: u64 = 5_000_000;
const MAX_MATCHES: usize = 200;

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents using a regex pattern. \
         Returns matching lines with file paths, line numbers, and optional context."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regex pattern to search for"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory to search in. Defaults to working directory."
                },
                "glob": {
                    "type": "string",
                    "description": "Glob to filter files (e.g. \"*.rs\", \"**/*.ts\"). Default: all files."
                },
                "context": {
                    "type": "integer",
                    "description": "Number of context lines before and after each match. Default 0.",
                    "default": 0
                },
                "case_insensitive": {
                    "type": "boolean",
                    "description": "Case insensitive search. Default false.",
                    "default": false
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value, ctx: &InvocationContext) -> ResultMap {
        let Some(pattern) = args.get("pattern").and_then(Value::as_str) else {
            return error_result("Missing required argument 'pattern'");
        };
        let case_insensitive = args
            .get("case_insensitive")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let context = args
            .get("context")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;

        let raw = if case_insensitive {
            format!("(?i){pattern}")
        } else {
            pattern.to_owned()
        };
        let regex = match Regex::new(&raw) {
            Ok(r) => r,
            Err(e) => return error_result(format!("Invalid regex: {e}")),
        };

        let base_arg = args
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or(".")
            .to_owned();
        let base = match validate_path(&base_arg, &ctx.working_dir) {
            Ok(p) => p,
            Err(e) => return error_result(e),
        };

        let file_glob = args
            .get("glob")
            .and_then(Value::as_str)
            .map(str::to_owned);
        if let Some(g) = &file_glob
            && g.contains('\0')
        {
            return error_result("Glob pattern contains null bytes");
        }

        let outcome =
            tokio::task::spawn_blocking(move || run_grep(&base, &regex, file_glob.as_deref(), context))
                .await;
        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => error_result(e),
            Err(e) => error_result(format!("grep task failed: {e}")),
        }
    }
}

struct FileMatch {
    line_number: usize,
    content: String,
}

fn search_file(path: &Path, regex: &Regex, context: usize) -> Vec<FileMatch> {
    let small_enough = path
        .metadata()
        .map(|m| m.len() <= MAX_FILE_SIZE)
        .unwrap_or(false);
    if !small_enough {
        return Vec::new();
    }
    let Ok(text) = std::fs::read_to_string(path) else {
        return Vec::new();
    };

    let lines: Vec<&str> = text.lines().collect();
    let mut matches = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if !regex.is_match(line) {
            continue;
        }
        let start = i.saturating_sub(context);
        let end = (i + context + 1).min(lines.len());
        let block: Vec<String> = (start..end)
            .map(|j| {
                let prefix = if j == i { ">" } else { " " };
                format!("{prefix}{:>6}\t{}", j + 1, lines[j])
            })
            .collect();
        matches.push(FileMatch {
            line_number: i + 1,
            content: block.join("\n"),
        });
    }
    matches
}

fn run_grep(
    base: &PathBuf,
    regex: &Regex,
    file_glob: Option<&str>,
    context: usize,
) -> Result<ResultMap, String> {
    if base.is_file() {
        let matches = search_file(base, regex, context);
        let entries: Vec<Value> = matches
            .iter()
            .take(MAX_MATCHES)
            .map(|m| {
                json!({
                    "file": base.display().to_string(),
                    "line_number": m.line_number,
                    "content": m.content,
                })
            })
            .collect();
        let mut result = Map::new();
        result.insert("matches".to_owned(), json!(entries));
        result.insert("total_matches".to_owned(), json!(matches.len()));
        return Ok(result);
    }

    if !base.is_dir() {
        return Err(format!("Path not found: {}", base.display()));
    }

    let full_pattern = base
        .join(file_glob.unwrap_or("**/*"))
        .to_string_lossy()
        .into_owned();
    let entries = glob::glob(&full_pattern).map_err(|e| format!("Invalid glob pattern: {e}"))?;

    let mut all: Vec<(String, FileMatch)> = Vec::new();
    'files: for path in entries.flatten() {
        if !path.is_file() {
            continue;
        }
        let rel = path
            .strip_prefix(base)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| path.to_string_lossy().into_owned());
        for m in search_file(&path, regex, context) {
            all.push((rel.clone(), m));
            if all.len() >= MAX_MATCHES {
                break 'files;
            }
        }
    }

    let mut output = Vec::new();
    for (file, m) in &all {
        output.push(format!("{file}:{}", m.line_number));
        output.push(m.content.clone());
        output.push(String::new());
    }
    let mut content = output.join("\n");
    if content.chars().count() > MAX_OUTPUT {
        content = content.chars().take(MAX_OUTPUT).collect::<String>() + "\n... (truncated)";
    }

    let mut result = Map::new();
    result.insert("content".to_owned(), json!(content));
    result.insert("total_matches".to_owned(), json!(all.len()));
    result.insert("truncated".to_owned(), json!(all.len() >= MAX_MATCHES));
    Ok(result)
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
    async fn finds_matches_in_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "needle here\nnothing").unwrap();
        fs::write(dir.path().join("b.txt"), "no match").unwrap();
        let result = GrepTool
            .execute(json!({"pattern": "needle"}), &ctx(&dir))
            .await;
        assert_eq!(result["total_matches"], 1);
        assert!(result["content"].as_str().unwrap().contains("a.txt:1"));
    }

    #[tokio::test]
    async fn single_file_returns_structured_matches() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "x\nneedle\ny").unwrap();
        let result = GrepTool
            .execute(json!({"pattern": "needle", "path": "a.txt"}), &ctx(&dir))
            .await;
        assert_eq!(result["total_matches"], 1);
        assert_eq!(result["matches"][0]["line_number"], 2);
    }

    #[tokio::test]
    async fn context_lines_are_included() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "before\nneedle\nafter").unwrap();
        let result = GrepTool
            .execute(
                json!({"pattern": "needle", "path": "a.txt", "context": 1}),
                &ctx(&dir),
            )
            .await;
        let content = result["matches"][0]["content"].as_str().unwrap();
        assert!(content.contains("before"));
        assert!(content.contains("after"));
        assert!(content.contains(">     2\tneedle"));
    }

    #[tokio::test]
    async fn case_insensitive_flag() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "NEEDLE").unwrap();
        let miss = GrepTool
            .execute(json!({"pattern": "needle"}), &ctx(&dir))
            .await;
        assert_eq!(miss["total_matches"], 0);
        let hit = GrepTool
            .execute(
                json!({"pattern": "needle", "case_insensitive": true}),
                &ctx(&dir),
            )
            .await;
        assert_eq!(hit["total_matches"], 1);
    }

    #[tokio::test]
    async fn glob_filter_limits_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.rs"), "needle").unwrap();
        fs::write(dir.path().join("a.txt"), "needle").unwrap();
        let result = GrepTool
            .execute(json!({"pattern": "needle", "glob": "*.rs"}), &ctx(&dir))
            .await;
        assert_eq!(result["total_matches"], 1);
        assert!(result["content"].as_str().unwrap().contains("a.rs"));
    }

    #[tokio::test]
    async fn invalid_regex_errors() {
        let dir = TempDir::new().unwrap();
        let result = GrepTool
            .execute(json!({"pattern": "[unclosed"}), &ctx(&dir))
            .await;
        assert!(result["error"].as_str().unwrap().contains("Invalid regex"));
    }
}
