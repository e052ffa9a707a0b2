//! Read file contents, returning numbered lines.

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::safety::hard_block::validate_path;

use super::context::InvocationContext;
use super::traits::{ResultMap, Tool, error_result};

const MAX_OUTPUT: usize = 100_000;

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Returns numbered lines."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path (relative to working directory or absolute)"
                },
                "offset": {
                    "type": "integer",
                    "description": "Line number to start reading from (1-based). Optional."
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to read. Optional."
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &InvocationContext) -> ResultMap {
        let Some(path) = args.get("path").and_then(Value::as_str) else {
            return error_result("Missing required argument 'path'");
        };
        let resolved = match validate_path(path, &ctx.working_dir) {
            Ok(p) => p,
            Err(e) => return error_result(e),
        };
        if !resolved.is_file() {
            return error_result(format!("File not found: {path}"));
        }

        let contents = match tokio::fs::read_to_string(&resolved).await {
            Ok(c) => c,
            Err(e) => return error_result(e.to_string()),
        };

        let offset = args
            .get("offset")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(1);
        let limit = args.get("limit").and_then(Value::as_u64).map(|n| n as usize);

        let lines: Vec<&str> = contents.lines().collect();
        let start = offset.saturating_sub(1).min(lines.len());
        let end = match limit {
            Some(n) => (start + n).min(lines.len()),
            None => lines.len(),
        };
        let selected = &lines[start..end];

        let numbered: Vec<String> = selected
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{:>6}\t{}", start + i + 1, line.trim_end()))
            .collect();

        let mut content = numbered.join("\n");
        if content.chars().count() > MAX_OUTPUT {
            content = content.chars().take(MAX_OUTPUT).collect::<String>() + "\n... (truncated)";
        }

        let mut result = Map::new();
        result.insert("content".to_owned(), json!(content));
        result.insert("total_lines".to_owned(), json!(lines.len()));
        result.insert("lines_shown".to_owned(), json!(selected.len()));
        result
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
