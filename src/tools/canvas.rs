//! Canvas tools: create, replace, and patch a rich content panel rendered
//! alongside the chat.
//!
//! One canvas per conversation.  All three tools require conversation
//! context (web chat); elsewhere they return an error result.

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::storage::Storage;

use super::context::InvocationContext;
use super::traits::{ResultMap, Tool, error_result};

pub const MAX_CANVAS_CONTENT: usize = 100_000;
pub const MAX_PATCH_EDITS: usize = 50;

/// Tools whose streamed `content` argument is rendered progressively.
pub fn is_streaming_canvas_tool(name: &str) -> bool {
    matches!(name, "create_canvas" | "update_canvas")
}

fn canvas_context<'a>(
    ctx: &'a InvocationContext,
) -> Result<(&'a str, &'a dyn Storage), ResultMap> {
    match (&ctx.conversation_id, &ctx.storage) {
        (Some(conversation_id), Some(storage)) => {
            Ok((conversation_id.as_str(), storage.as_ref()))
        }
        _ => Err(error_result("Canvas tools require conversation context")),
    }
}

// ─── create_canvas ────────────────────────────────────────────────────────────

pub struct CreateCanvasTool;

#[async_trait]
impl Tool for CreateCanvasTool {
    fn name(&self) -> &str {
        "create_canvas"
    }

    fn description(&self) -> &str {
        "Create a canvas panel with rich content alongside the chat. \
         Use this when the user asks you to write code, documents, articles, or any structured \
         content that benefits from a dedicated editing panel. The canvas appears next to the \
         chat for the user to view and edit."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {
                    "type": "string",
                    "description": "Title for the canvas (e.g. 'fibonacci.py', 'Project README', 'SQL Schema')"
                },
                "content": {
                    "type": "string",
                    "description": "The full content to display in the canvas"
                },
                "language": {
                    "type": "string",
                    "description": "Programming language for syntax highlighting (e.g. 'python', 'javascript', 'sql'). Omit for plain text or markdown."
                }
            },
            "required": ["title", "content"]
        })
    }

    async fn execute(&self, args: Value, ctx: &InvocationContext) -> ResultMap {
        let (conversation_id, storage) = match canvas_context(ctx) {
            Ok(pair) => pair,
            Err(err) => return err,
        };
        let Some(title) = args.get("title").and_then(Value::as_str) else {
            return error_result("Missing required argument 'title'");
        };
        let Some(content) = args.get("content").and_then(Value::as_str) else {
            return error_result("Missing required argument 'content'");
        };
        let language = args.get("language").and_then(Value::as_str);

        if content.chars().count() > MAX_CANVAS_CONTENT {
            return error_result(format!(
                "Content too large ({} chars). Maximum is {MAX_CANVAS_CONTENT}.",
                content.chars().count()
            ));
        }
        if storage.canvas_for_conversation(conversation_id).is_some() {
            return error_result(
                "A canvas already exists for this conversation. Use update_canvas instead.",
            );
        }

        let canvas = storage.create_canvas(conversation_id, title, content, language);
        let mut result = Map::new();
        result.insert("status".to_owned(), json!("created"));
        result.insert("id".to_owned(), json!(canvas.id));
        result.insert("title".to_owned(), json!(canvas.title));
        result.insert("language".to_owned(), json!(canvas.language));
        result
    }
}

// ─── update_canvas ────────────────────────────────────────────────────────────

pub struct UpdateCanvasTool;

#[async_trait]
impl Tool for UpdateCanvasTool {
    fn name(&self) -> &str {
        "update_canvas"
    }

    fn description(&self) -> &str {
        "Update the content of the existing canvas panel. \
         Use this when the user asks you to modify, improve, or change the canvas content. \
         Provide the complete updated content (not a diff)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The complete updated content for the canvas"
                },
                "title": {
                    "type": "string",
                    "description": "Optional new title for the canvas"
                }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, args: Value, ctx: &InvocationContext) -> ResultMap {
        let (conversation_id, storage) = match canvas_context(ctx) {
            Ok(pair) => pair,
            Err(err) => return err,
        };
        let Some(content) = args.get("content").and_then(Value::as_str) else {
            return error_result("Missing required argument 'content'");
        };
        let title = args.get("title").and_then(Value::as_str);

        if content.chars().count() > MAX_CANVAS_CONTENT {
            return error_result(format!(
                "Content too large ({} chars). Maximum is {MAX_CANVAS_CONTENT}.",
                content.chars().count()
            ));
        }
        let Some(canvas) = storage.canvas_for_conversation(conversation_id) else {
            return error_result(
                "No canvas exists for this conversation. Use create_canvas first.",
            );
        };
        let Some(updated) = storage.update_canvas(&canvas.id, Some(content), title) else {
            return error_result("Failed to update canvas");
        };

        let mut result = Map::new();
        result.insert("status".to_owned(), json!("updated"));
        result.insert("id".to_owned(), json!(updated.id));
        result.insert("title".to_owned(), json!(updated.title));
        result.insert("version".to_owned(), json!(updated.version));
        result
    }
}

// ─── patch_canvas ─────────────────────────────────────────────────────────────

pub struct PatchCanvasTool;

#[async_trait]
impl Tool for PatchCanvasTool {
    fn name(&self) -> &str {
        "patch_canvas"
    }

    fn description(&self) -> &str {
        "Apply incremental search/replace edits to the existing canvas content. \
         Use this instead of update_canvas when making small, targeted changes — \
         it is more token-efficient. Each edit's search string must match exactly once in the \
         current content. Edits are applied sequentially (each operates on the result of the \
         previous)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "edits": {
                    "type": "array",
                    "description": "Array of search/replace pairs to apply sequentially",
                    "items": {
                        "type": "object",
                        "properties": {
                            "search": {
                                "type": "string",
                                "description": "Exact string to find in the current canvas content"
                            },
                            "replace": {
                                "type": "string",
                                "description": "Replacement string"
                            }
                        },
                        "required": ["search", "replace"]
                    }
                }
            },
            "required": ["edits"]
        })
    }

    async fn execute(&self, args: Value, ctx: &InvocationContext) -> ResultMap {
        let (conversation_id, storage) = match canvas_context(ctx) {
            Ok(pair) => pair,
            Err(err) => return err,
        };
        let Some(edits) = args.get("edits").and_then(Value::as_array) else {
            return error_result("Missing required argument 'edits'");
        };
        if edits.is_empty() {
            return error_result("No edits provided");
        }
        if edits.len() > MAX_PATCH_EDITS {
            return error_result(format!(
                "Too many edits ({}). Maximum is {MAX_PATCH_EDITS}.",
                edits.len()
            ));
        }
        let Some(canvas) = storage.canvas_for_conversation(conversation_id) else {
            return error_result(
                "No canvas exists for this conversation. Use create_canvas first.",
            );
        };

        let mut content = canvas.content.clone();
        let mut applied = 0usize;

        for (i, edit) in edits.iter().enumerate() {
            let search = edit.get("search").and_then(Value::as_str).unwrap_or("");
            let replace = edit.get("replace").and_then(Value::as_str).unwrap_or("");

            if search.is_empty() {
                let mut result = error_result("Empty search string");
                result.insert("edit_index".to_owned(), json!(i));
                result.insert("failed_edit".to_owned(), edit.clone());
                return result;
            }

            let count = content.matches(search).count();
            if count == 0 {
                let mut result = error_result("Search string not found in canvas content");
                result.insert("edit_index".to_owned(), json!(i));
                result.insert("failed_edit".to_owned(), edit.clone());
                return result;
            }
            if count > 1 {
                let mut result = error_result(format!(
                    "Search string is ambiguous ({count} matches). Provide more context to match exactly once."
                ));
                result.insert("edit_index".to_owned(), json!(i));
                result.insert("failed_edit".to_owned(), edit.clone());
                return result;
            }

            content = content.replacen(search, replace, 1);
            if content.chars().count() > MAX_CANVAS_CONTENT {
                return error_result(format!(
                    "Content exceeded size limit after edit {} ({} chars). Maximum is {MAX_CANVAS_CONTENT}.",
                    i + 1,
                    content.chars().count()
                ));
            }
            applied += 1;
        }

        let Some(updated) = storage.update_canvas(&canvas.id, Some(&content), None) else {
            return error_result("Failed to update canvas");
        };

        let mut result = Map::new();
        result.insert("status".to_owned(), json!("patched"));
        result.insert("id".to_owned(), json!(updated.id));
        result.insert("title".to_owned(), json!(updated.title));
        result.insert("version".to_owned(), json!(updated.version));
        result.insert("edits_applied".to_owned(), json!(applied));
        result
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn ctx_with_storage() -> (InvocationContext, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let mut ctx = InvocationContext::new(PathBuf::from("/work"));
        ctx.conversation_id = Some("conv-1".to_owned());
        ctx.storage = Some(storage.clone());
        (ctx, storage)
    }

    #[tokio::test]
    async fn create_requires_conversation_context() {
        let ctx = InvocationContext::new(PathBuf::from("/work"));
        let result = CreateCanvasTool
            .execute(json!({"title": "t", "content": "c"}), &ctx)
            .await;
        assert!(
            result["error"]
                .as_str()
                .unwrap()
                .contains("conversation context")
        );
    }

    #[tokio::test]
    async fn create_then_duplicate_create_errors() {
        let (ctx, _) = ctx_with_storage();
        let first = CreateCanvasTool
            .execute(
                json!({"title": "x.py", "content": "print(1)", "language": "python"}),
                &ctx,
            )
            .await;
        assert_eq!(first["status"], "created");
        assert_eq!(first["language"], "python");

        let second = CreateCanvasTool
            .execute(json!({"title": "y", "content": "z"}), &ctx)
            .await;
        assert!(second["error"].as_str().unwrap().contains("already exists"));
    }

    #[tokio::test]
    async fn update_replaces_content_and_bumps_version() {
        let (ctx, storage) = ctx_with_storage();
        CreateCanvasTool
            .execute(json!({"title": "t", "content": "old"}), &ctx)
            .await;
        let result = UpdateCanvasTool
            .execute(json!({"content": "new"}), &ctx)
            .await;
        assert_eq!(result["status"], "updated");
        assert_eq!(result["version"], 2);
        assert_eq!(storage.canvas_for_conversation("conv-1").unwrap().content, "new");
    }

    #[tokio::test]
    async fn update_without_canvas_errors() {
        let (ctx, _) = ctx_with_storage();
        let result = UpdateCanvasTool
            .execute(json!({"content": "new"}), &ctx)
            .await;
        assert!(result["error"].as_str().unwrap().contains("create_canvas first"));
    }

    #[tokio::test]
    async fn oversized_content_rejected() {
        let (ctx, _) = ctx_with_storage();
        let big = "x".repeat(MAX_CANVAS_CONTENT + 1);
        let result = CreateCanvasTool
            .execute(json!({"title": "t", "content": big}), &ctx)
            .await;
        assert!(result["error"].as_str().unwrap().contains("too large"));
    }

    #[tokio::test]
    async fn patch_applies_sequential_edits() {
        let (ctx, storage) = ctx_with_storage();
        CreateCanvasTool
            .execute(json!({"title": "t", "content": "aaa bbb"}), &ctx)
            .await;
        let result = PatchCanvasTool
            .execute(
                json!({"edits": [
                    {"search": "aaa", "replace": "xxx"},
                    {"search": "xxx bbb", "replace": "done"}
                ]}),
                &ctx,
            )
            .await;
        assert_eq!(result["status"], "patched");
        assert_eq!(result["edits_applied"], 2);
        assert_eq!(storage.canvas_for_conversation("conv-1").unwrap().content, "done");
    }

    #[tokio::test]
    async fn patch_ambiguous_search_reports_index() {
        let (ctx, _) = ctx_with_storage();
        CreateCanvasTool
            .execute(json!({"title": "t", "content": "dup dup"}), &ctx)
            .await;
        let result = PatchCanvasTool
            .execute(json!({"edits": [{"search": "dup", "replace": "x"}]}), &ctx)
            .await;
        assert!(result["error"].as_str().unwrap().contains("ambiguous"));
        assert_eq!(result["edit_index"], 0);
    }

    #[tokio::test]
    async fn patch_missing_search_reports_failed_edit() {
        let (ctx, _) = ctx_with_storage();
        CreateCanvasTool
            .execute(json!({"title": "t", "content": "abc"}), &ctx)
            .await;
        let result = PatchCanvasTool
            .execute(json!({"edits": [{"search": "zzz", "replace": "x"}]}), &ctx)
            .await;
        assert!(result["error"].as_str().unwrap().contains("not found"));
        assert_eq!(result["failed_edit"]["search"], "zzz");
    }

    #[tokio::test]
    async fn patch_rejects_too_many_edits() {
        let (ctx, _) = ctx_with_storage();
        CreateCanvasTool
            .execute(json!({"title": "t", "content": "abc"}), &ctx)
            .await;
        let edits: Vec<Value> = (0..MAX_PATCH_EDITS + 1)
            .map(|_| json!({"search": "a", "replace": "b"}))
            .collect();
        let result = PatchCanvasTool.execute(json!({"edits": edits}), &ctx).await;
        assert!(result["error"].as_str().unwrap().contains("Too many edits"));
    }

    #[test]
    fn streaming_tools_are_create_and_update() {
        assert!(is_streaming_canvas_tool("create_canvas"));
        assert!(is_streaming_canvas_tool("update_canvas"));
        assert!(!is_streaming_canvas_tool("patch_canvas"));
        assert!(!is_streaming_canvas_tool("bash"));
    }
}
