//! Incremental extraction of the `"content"` field from a still-growing
//! JSON argument string.
//!
//! Canvas tools ship large content as one JSON argument; the UI wants to
//! render it as the model types.  A general JSON parser rejects incomplete
//! input, so this is a small hand-rolled decoder for exactly the subset
//! needed: find the `"content"` key, then decode the string value one
//! character at a time, stopping wherever the input currently ends.

use std::collections::{HashMap, HashSet};

/// Accumulator cap: canvas content max plus slack for the other argument
/// fields.  Beyond this, deltas are dropped silently — the final tool call
/// still carries the full payload through the normal path.
pub const MAX_CANVAS_ARGS_ACCUM: usize = 100_000 + 1024;

/// Extract the partial `content` value from an incomplete JSON argument
/// string.  Returns `None` while the `"content"` key (or its opening
/// quote) has not appeared yet.
pub fn extract_streaming_content(accumulated: &str) -> Option<String> {
    const KEY: &str = "\"content\"";
    let key_pos = accumulated.find(KEY)?;
    let chars: Vec<char> = accumulated[key_pos + KEY.len()..].chars().collect();
    let len = chars.len();
    let mut pos = 0;

    while pos < len && matches!(chars[pos], ' ' | '\t' | '\n' | '\r') {
        pos += 1;
    }
    if pos >= len || chars[pos] != ':' {
        return None;
    }
    pos += 1;
    while pos < len && matches!(chars[pos], ' ' | '\t' | '\n' | '\r') {
        pos += 1;
    }
    if pos >= len || chars[pos] != '"' {
        return None;
    }
    pos += 1;

    let mut result = String::new();
    while pos < len {
        let ch = chars[pos];
        if ch == '"' {
            break;
        }
        if ch == '\\' {
            pos += 1;
            if pos >= len {
                break;
            }
            match chars[pos] {
                'n' => result.push('\n'),
                't' => result.push('\t'),
                'r' => result.push('\r'),
                '"' => result.push('"'),
                '\\' => result.push('\\'),
                '/' => result.push('/'),
                'b' => result.push('\u{0008}'),
                'f' => result.push('\u{000C}'),
                'u' => {
                    if pos + 4 >= len {
                        // Incomplete unicode escape — wait for more bytes.
                        break;
                    }
                    let hex: String = chars[pos + 1..pos + 5].iter().collect();
                    match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                        Some(decoded) => {
                            result.push(decoded);
                            pos += 4;
                        }
                        None => result.push('u'),
                    }
                }
                other => result.push(other),
            }
        } else {
            result.push(ch);
        }
        pos += 1;
    }

    Some(result)
}

/// Emitted by [`CanvasStreamTracker::push_delta`] in order.
#[derive(Debug, Clone, PartialEq)]
pub enum CanvasStreamUpdate {
    Start { tool_name: String },
    Delta { content_delta: String },
}

/// Tracks per-tool-call-index argument accumulation and diffs successive
/// extractions into incremental content deltas.
#[derive(Default)]
pub struct CanvasStreamTracker {
    accumulated: HashMap<usize, String>,
    sent_chars: HashMap<usize, usize>,
    started: HashSet<usize>,
}

impl CanvasStreamTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one argument fragment; returns the updates to emit.
    pub fn push_delta(
        &mut self,
        index: usize,
        tool_name: &str,
        delta: &str,
    ) -> Vec<CanvasStreamUpdate> {
        let accum = self.accumulated.entry(index).or_default();
        if accum.len() > MAX_CANVAS_ARGS_ACCUM {
            return Vec::new();
        }
        accum.push_str(delta);

        let Some(content) = extract_streaming_content(accum) else {
            return Vec::new();
        };

        let total = content.chars().count();
        let sent = self.sent_chars.get(&index).copied().unwrap_or(0);
        if total <= sent {
            return Vec::new();
        }
        let delta_text: String = content.chars().skip(sent).collect();
        self.sent_chars.insert(index, total);

        let mut updates = Vec::new();
        if self.started.insert(index) {
            updates.push(CanvasStreamUpdate::Start {
                tool_name: tool_name.to_owned(),
            });
        }
        updates.push(CanvasStreamUpdate::Delta {
            content_delta: delta_text,
        });
        updates
    }

    /// Forget all per-call state (new LLM turn).
    pub fn reset(&mut self) {
        self.accumulated.clear();
        self.sent_chars.clear();
        self.started.clear();
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
