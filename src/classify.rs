//! Shared content-block classification.
//!
//! The trimmer and the analyzer disagree only on what to *do* with a
//! block's classification — trim it away or count its bytes. Routing both
//! through one function is the correctness guarantee spec.md §4.2 asks
//! for: "the analyzer's notion of trimmable bytes must match the
//! trimmer's notion of bytes removed up to the stub overhead."

use serde_json::Value;

/// The closed tagged variant a content block dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockClass {
    Text,
    ThinkingSignature,
    ToolUse,
    ToolResult,
    Image,
    Other,
}

/// Classify a single raw content block by its `type` field.
pub fn classify_block(block: &Value) -> BlockClass {
    match block.get("type").and_then(|t| t.as_str()) {
        Some("text") => BlockClass::Text,
        Some("thinking") => BlockClass::ThinkingSignature,
        Some("tool_use") => BlockClass::ToolUse,
        Some("tool_result") => BlockClass::ToolResult,
        Some("image") => BlockClass::Image,
        _ => BlockClass::Other,
    }
}

/// The UTF-8 byte length of a block's serialized JSON form. Used both to
/// decide whether a `tool_result` exceeds the stub threshold and to bucket bytes in the analyzer's breakdown (§4.3).
pub fn block_bytes(block: &Value) -> usize {
    serde_json::to_string(block).map(|s| s.len()).unwrap_or(0)
}

/// The length, in bytes, of a `tool_result`'s content as the trimmer
/// measures it for the stub-threshold check: a plain string's length, or
/// (for array content) the sum of each sub-block's serialized size —
/// meaning a stripped image's former bytes still count.
pub fn tool_result_content_size(content: &Value) -> usize {
    match content {
        Value::String(s) => s.len(),
        Value::Array(items) => items.iter().map(block_bytes).sum(),
        other => block_bytes(other),
    }
}

/// Semantic text characters contributed by a block: `text.text`, `thinking.text`, serialized
/// `tool_use.input`, and recursive `tool_result.content` text. Image
/// blocks and JSON structural overhead never contribute.
pub fn block_chars(block: &Value) -> usize {
    match classify_block(block) {
        BlockClass::Text => block
            .get("text")
            .and_then(|t| t.as_str())
            .map(str::len)
            .unwrap_or(0),
        BlockClass::ThinkingSignature => block
            .get("thinking")
            .and_then(|t| t.as_str())
            .map(str::len)
            .unwrap_or(0),
        BlockClass::ToolUse => block
            .get("input")
            .map(|v| serde_json::to_string(v).map(|s| s.len()).unwrap_or(0))
            .unwrap_or(0),
        BlockClass::ToolResult => block
            .get("content")
            .map(tool_result_content_chars)
            .unwrap_or(0),
        BlockClass::Image | BlockClass::Other => 0,
    }
}

/// Recursive text-char accounting for `tool_result.content`: a plain
/// string contributes its length; an array contributes the sum of its
/// `text` sub-blocks' lengths (images contribute nothing).
pub fn tool_result_content_chars(content: &Value) -> usize {
    match content {
        Value::String(s) => s.len(),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                if item.get("type").and_then(|t| t.as_str()) == Some("text") {
                    item.get("text")
                        .and_then(|t| t.as_str())
                        .map(str::len)
                        .unwrap_or(0)
                } else {
                    0
                }
            })
            .sum(),
        _ => 0,
    }
}
