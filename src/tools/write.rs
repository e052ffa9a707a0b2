//! Write/create file tool.

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::safety::hard_block::validate_path;

use super::context::InvocationContext;
use super::traits::{ResultMap, Tool, error_result};

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates parent directories if needed. Overwrites existing files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path (relative to working directory or absolute)"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write to the file"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value, ctx: &InvocationContext) -> ResultMap {
        let Some(path) = args.get("path").and_then(Value::as_str) else {
            return error_result("Missing required argument 'path'");
        };
        let Some(content) = args.get("content").and_then(Value::as_str) else {
            return error_result("Missing required argument 'content'");
        };
        let resolved = match validate_path(path, &ctx.working_dir) {
            Ok(p) => p,
            Err(e) => return error_result(e),
        };

        if let Some(parent) = resolved.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return error_result(e.to_string());
        }
        if let Err(e) = tokio::fs::write(&resolved, content).await {
            return error_result(e.to_string());
        }

        let mut result = Map::new();
        result.insert("status".to_owned(), json!("ok"));
        result.insert("path".to_owned(), json!(resolved.display().to_string()));
        result.insert("bytes_written".to_owned(), json!(content.len()));
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
    async fn writes_file_and_reports_bytes() {
        let dir = TempDir::new().unwrap();
        let result = WriteFileTool
            .execute(json!({"path": "out.txt", "content": "hello"}), &ctx(&dir))
            .await;
        assert_eq!(result["status"], "ok");
        assert_eq!(result["bytes_written"], 5);
        assert_eq!(fs::read_to_string(dir.path().join("out.txt")).unwrap(), "hello");
    }

    #[tokio::test]
    async fn creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let result = WriteFileTool
            .execute(json!({"path": "a/b/c.txt", "content": "x"}), &ctx(&dir))
            .await;
        assert_eq!(result["status"], "ok");
        assert!(dir.path().join("a/b/c.txt").is_file());
    }

    #[tokio::test]
    async fn missing_content_errors() {
        let dir = TempDir::new().unwrap();
        let result = WriteFileTool
            .execute(json!({"path": "x.txt"}), &ctx(&dir))
            .await;
        assert!(result.contains_key("error"));
    }

    #[tokio::test]
    async fn blocked_path_errors() {
        let dir = TempDir::new().unwrap();
        let result = WriteFileTool
            .execute(json!({"path": "/proc/self/x", "content": "x"}), &ctx(&dir))
            .await;
        assert!(result["error"].as_str().unwrap().contains("Access denied"));
    }
}
