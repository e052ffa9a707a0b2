//! Context-window recovery: tool-output truncation and whole-history
//! compaction.
//!
//! Applied in order when the upstream reports `context_length_exceeded`:
//! truncation is cheap and preserves structure; compaction is the fallback
//! that replaces the entire history with an LLM-written summary.

use std::collections::HashMap;

use serde_json::Value;
use tracing::info;

use crate::ai::client::ChatProvider;
use crate::ai::types::{ChatMessage, Role};

const COMPACTION_MAX_TOKENS: u32 = 1000;

/// Map tool-call id → tool name from the assistant messages in `messages`.
fn tool_call_names(messages: &[ChatMessage]) -> HashMap<String, String> {
    let mut names = HashMap::new();
    for msg in messages {
        if let Some(calls) = &msg.tool_calls {
            for call in calls {
                if !call.id.is_empty() && !call.function.name.is_empty() {
                    names.insert(call.id.clone(), call.function.name.clone());
                }
            }
        }
    }
    names
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn group_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i).is_multiple_of(3) {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Truncate oversized tool result messages in place, appending a retry hint
/// that names the original size and the originating tool.  Returns true if
/// any message was truncated.  Idempotent: a second pass over already
/// truncated output is a no-op.
pub fn truncate_large_tool_outputs(messages: &mut [ChatMessage], max_chars: usize) -> bool {
    let names = tool_call_names(messages);
    let mut truncated_any = false;

    for msg in messages.iter_mut() {
        if msg.role != Role::Tool {
            continue;
        }
        let original_len = msg.content.chars().count();
        if original_len <= max_chars {
            continue;
        }

        let tool_name = msg
            .tool_call_id
            .as_ref()
            .and_then(|id| names.get(id))
            .map(String::as_str)
            .unwrap_or("unknown tool");

        msg.content = format!(
            "{}\n\n... [TRUNCATED — original output was {} chars from '{tool_name}'. \
             The output exceeded the context window. \
             You MUST retry this tool call with more constrained parameters \
             (e.g. fewer results, a narrower query, or a smaller limit) \
             to get output that fits within the context window.]",
            truncate_chars(&msg.content, max_chars),
            group_thousands(original_len),
        );
        truncated_any = true;
        info!(
            tool_name,
            call_id = msg.tool_call_id.as_deref().unwrap_or(""),
            original_len,
            new_len = msg.content.chars().count(),
            "truncated tool output"
        );
    }

    truncated_any
}

/// Build a structured history digest for the compaction prompt.
///
/// Includes tool call outcomes (not just names) so the model can
/// distinguish completed steps from pending ones after compaction.
pub fn build_compaction_history(messages: &[ChatMessage]) -> String {
    let names = tool_call_names(messages);
    let mut lines: Vec<String> = Vec::new();

    for msg in messages {
        if msg.role == Role::Tool {
            let tool_name = msg
                .tool_call_id
                .as_ref()
                .and_then(|id| names.get(id))
                .map(String::as_str)
                .unwrap_or("unknown");
            let parsed: Option<Value> = serde_json::from_str(&msg.content).ok();
            match parsed.as_ref().and_then(|v| v.get("error")) {
                Some(error) => {
                    let snippet = truncate_chars(&value_to_text(error), 200);
                    lines.push(format!("  tool_result: {tool_name} → ERROR: {snippet}"));
                }
                None => {
                    let mut snippet = truncate_chars(&msg.content, 200);
                    if msg.content.chars().count() > 200 {
                        snippet.push_str("...");
                    }
                    lines.push(format!("  tool_result: {tool_name} → SUCCESS: {snippet}"));
                }
            }
            continue;
        }

        if !msg.content.is_empty() {
            let mut text = truncate_chars(&msg.content, 500);
            if msg.content.chars().count() > 500 {
                text.push_str("...");
            }
            lines.push(format!("{}: {text}", role_label(msg.role)));
        }

        if let Some(calls) = &msg.tool_calls {
            for call in calls {
                let preview = match serde_json::from_str::<Value>(&call.function.arguments) {
                    Ok(Value::Object(args)) => args
                        .iter()
                        .take(3)
                        .map(|(k, v)| format!("{k}={:?}", truncate_chars(&value_to_text(v), 40)))
                        .collect::<Vec<_>>()
                        .join(", "),
                    _ => truncate_chars(&call.function.arguments, 80),
                };
                lines.push(format!("  tool_call: {}({preview})", call.function.name));
            }
        }
    }

    lines.join("\n")
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Replace the entire history with an LLM-written summary.  Returns true on
/// success; the caller retries the iteration.
pub async fn compact_messages(
    client: &dyn ChatProvider,
    messages: &mut Vec<ChatMessage>,
) -> bool {
    if messages.len() < 4 {
        return false;
    }

    let history_text = build_compaction_history(messages);
    let summary_prompt = format!(
        "Summarize the following conversation concisely, preserving:\n\
         - Key decisions and conclusions\n\
         - File paths that were read, written, or edited\n\
         - Important code changes and their purpose\n\
         - Which steps of any multi-step plan have been COMPLETED (tool_result SUCCESS) vs remaining\n\
         - Current state of the task — what has been done and what is next\n\
         - Any errors encountered and how they were resolved\n\n{history_text}"
    );

    let summary = match client
        .complete_once(
            vec![ChatMessage::user(summary_prompt)],
            Some(COMPACTION_MAX_TOKENS),
        )
        .await
    {
        Ok(summary) if !summary.is_empty() => summary,
        Ok(_) => "Conversation summary unavailable.".to_owned(),
        Err(e) => {
            tracing::error!(error = %e.message, "failed to generate compaction summary");
            return false;
        }
    };

    let original_count = messages.len();
    messages.clear();
    messages.push(ChatMessage::system(format!(
        "Previous conversation summary (auto-compacted from {original_count} messages):\n\n{summary}"
    )));
    info!(original_count, "compacted messages for context recovery");
    true
}

// ─── Tests ──────────────────────────────────────────────────────────────────
