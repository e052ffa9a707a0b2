//! Edit file via exact string replacement.

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::safety::hard_block::validate_path;

use super::context::InvocationContext;
use super::traits::{ResultMap, Tool, error_result};

pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing an exact string with new text. \
         The old_text must appear exactly once in the file (must be unique). \
         Use replace_all=true to replace all occurrences."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path (relative to working directory or absolute)"
                },
                "old_text": {
                    "type": "string",
                    "description": "The exact text to find and replace"
                },
                "new_text": {
                    "type": "string",
                    "description": "The replacement text"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "If true, replace all occurrences. Default false (must be unique).",
                    "default": false
                }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    async fn execute(&self, args: Value, ctx: &InvocationContext) -> ResultMap {
        let Some(path) = args.get("path").and_then(Value::as_str) else {
            return error_result("Missing required argument 'path'");
        };
        let Some(old_text) = args.get("old_text").and_then(Value::as_str) else {
            return error_result("Missing required argument 'old_text'");
        };
        let Some(new_text) = args.get("new_text").and_then(Value::as_str) else {
            return error_result("Missing required argument 'new_text'");
        };
        let replace_all = args
            .get("replace_all")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if old_text.is_empty() {
            return error_result("old_text must not be empty");
        }

        let resolved = match validate_path(path, &ctx.working_dir) {
            Ok(p) => p,
            Err(e) => return error_result(e),
        };
        if !resolved.is_file() {
            return error_result(format!("File not found: {path}"));
        }
        let content = match tokio::fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) => return error_result(e.to_string()),
        };

        let count = content.matches(old_text).count();
        if count == 0 {
            return error_result("old_text not found in file");
        }
        if count > 1 && !replace_all {
            return error_result(format!(
                "old_text matches {count} times. Use replace_all=true or provide more context to make it unique."
            ));
        }

        let new_content = if replace_all {
            content.replace(old_text, new_text)
        } else {
            content.replacen(old_text, new_text, 1)
        };

        if let Err(e) = tokio::fs::write(&resolved, new_content).await {
            return error_result(e.to_string());
        }

        let mut result = Map::new();
        result.insert("status".to_owned(), json!("ok"));
        result.insert(
            "replacements".to_owned(),
            json!(if replace_all { count } else { 1 }),
        );
        result
    }
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
    async fn replaces_unique_match() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "hello world").unwrap();
        let result = EditFileTool
            .execute(
                json!({"path": "a.txt", "old_text": "world", "new_text": "rust"}),
                &ctx(&dir),
            )
            .await;
        assert_eq!(result["status"], "ok");
        assert_eq!(result["replacements"], 1);
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "hello rust");
    }

    #[tokio::test]
    async fn ambiguous_match_errors_without_replace_all() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "x x x").unwrap();
        let result = EditFileTool
            .execute(
                json!({"path": "a.txt", "old_text": "x", "new_text": "y"}),
                &ctx(&dir),
            )
            .await;
        assert!(result["error"].as_str().unwrap().contains("3 times"));
    }

    #[tokio::test]
    async fn replace_all_replaces_every_occurrence() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "x x x").unwrap();
        let result = EditFileTool
            .execute(
                json!({"path": "a.txt", "old_text": "x", "new_text": "y", "replace_all": true}),
                &ctx(&dir),
            )
            .await;
        assert_eq!(result["replacements"], 3);
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "y y y");
    }

    #[tokio::test]
    async fn missing_old_text_errors() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "abc").unwrap();
        let result = EditFileTool
            .execute(
                json!({"path": "a.txt", "old_text": "zzz", "new_text": "y"}),
                &ctx(&dir),
            )
            .await;
        assert_eq!(result["error"], "old_text not found in file");
    }

    #[tokio::test]
    async fn missing_file_errors() {
        let dir = TempDir::new().unwrap();
        let result = EditFileTool
            .execute(
                json!({"path": "nope.txt", "old_text": "a", "new_text": "b"}),
                &ctx(&dir),
            )
            .await;
        assert!(result["error"].as_str().unwrap().contains("File not found"));
    }
}
