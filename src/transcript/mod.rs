//! Transcript data model: one JSON record per `.jsonl` line.
//!
//! Shared verbatim between the trimmer and the analyzer — both need the
//! same notion of "what kind of line/block is this", which is the whole
//! point of keeping classification in one place (see `crate::classify`).

use serde::Deserialize;
use std::collections::HashMap;

// ===================================================================
// Top-level transcript entry — one per JSONL line
// ===================================================================

/// A single line in a transcript `.jsonl` file, discriminated by `type`
/// (or, for conversation turns, `role`).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum TranscriptEntry {
    #[serde(rename = "user")]
    User(ConversationEntry),
    #[serde(rename = "assistant")]
    Assistant(ConversationEntry),
    #[serde(rename = "file-history-snapshot")]
    FileHistorySnapshot(FileHistorySnapshotEntry),
    #[serde(rename = "queue-operation")]
    QueueOperation(QueueOperationEntry),
    /// `{"type":"summary", ...}` — a compaction marker.
    #[serde(rename = "summary")]
    Summary(SummaryEntry),
    /// Anything else, including `{"type":"system","subtype":"compact_boundary"}`
    /// (the other shape of compaction marker) and unrecognized record kinds.
    /// Preserved verbatim by the trimmer, bucketed as `other` by the
    /// analyzer.
    #[serde(other)]
    Other,
}

/// Resolve the effective dispatch tag for a raw line per spec.md §3.1's
/// recognition rules — `role == "user"`/`"assistant"` (at the top level or
/// nested under `message`) is as valid a signal as `type`, `type ==
/// "human"` is an alias for `user`, and `type == "message"` defers to
/// `role`. Returns `raw` unchanged when its own `type` field is already
/// the effective one, and a shallow clone with `type` rewritten otherwise
/// — callers use the result only to pick a `TranscriptEntry` variant,
/// never to replace the line that gets written back out.
fn dispatch_value(raw: &serde_json::Value) -> serde_json::Value {
    let top_type = raw.get("type").and_then(|v| v.as_str());
    let role = raw
        .get("role")
        .and_then(|v| v.as_str())
        .or_else(|| raw.get("message").and_then(|m| m.get("role")).and_then(|v| v.as_str()));

    let resolved: Option<&str> = match top_type {
        Some("human") => Some("user"),
        Some("message") => role.filter(|r| *r == "user" || *r == "assistant"),
        Some(other) => Some(other),
        None => role.filter(|r| *r == "user" || *r == "assistant"),
    };

    match resolved {
        Some(t) if Some(t) != top_type => {
            let mut cloned = raw.clone();
            if let Some(obj) = cloned.as_object_mut() {
                obj.insert("type".to_string(), serde_json::Value::String(t.to_string()));
            }
            cloned
        }
        _ => raw.clone(),
    }
}

/// Classify a raw transcript line into a `TranscriptEntry`, applying the
/// `role`/`type` recognition rules of spec.md §3.1 before dispatch and
/// falling back to `Other` on any deserialization failure. The single
/// entry point trim/analyze use so the two components never drift in
/// what counts as a user/assistant message.
pub fn classify_entry(raw: &serde_json::Value) -> TranscriptEntry {
    serde_json::from_value::<TranscriptEntry>(dispatch_value(raw)).unwrap_or(TranscriptEntry::Other)
}

impl TranscriptEntry {
    /// True for either spelling of a compaction marker: `type == "summary"`, or `type == "system" &&
    /// subtype == "compact_boundary"`.
    pub fn is_compaction_marker(&self, raw: &serde_json::Value) -> bool {
        match self {
            TranscriptEntry::Summary(_) => true,
            TranscriptEntry::Other => {
                raw.get("type").and_then(|v| v.as_str()) == Some("system")
                    && raw.get("subtype").and_then(|v| v.as_str()) == Some("compact_boundary")
            }
            _ => false,
        }
    }
}

// ===================================================================
// Conversation entries (user + assistant share the same shape)
// ===================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub parent_uuid: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Absent for the alternate format, where content/usage live at the
    /// top level of the line instead of nested under `message`.
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummaryEntry {
    #[serde(default)]
    pub summary: Option<String>,
}

// ===================================================================
// Message
// ===================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// `message.content` (or the alternate top-level `content`) is either a
/// plain string or an array of content blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

// ===================================================================
// Content blocks inside message.content[]
// ===================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text(TextBlock),
    #[serde(rename = "thinking")]
    Thinking(ThinkingBlock),
    #[serde(rename = "tool_use")]
    ToolUse(ToolUseBlock),
    #[serde(rename = "tool_result")]
    ToolResult(ToolResultBlock),
    #[serde(rename = "image")]
    Image(ImageBlock),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextBlock {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThinkingBlock {
    #[serde(default)]
    pub thinking: String,
    #[serde(default)]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    /// A plain string, an array of `{type:"text",text}` / `{type:"image",...}`
    /// sub-blocks, or some other shape — kept as raw JSON
    /// since the inner shape varies by tool.
    pub content: serde_json::Value,
    #[serde(default)]
    pub is_error: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageBlock {
    #[serde(default)]
    pub source: Option<serde_json::Value>,
}

// ===================================================================
// Usage (token counts on assistant messages)
// ===================================================================

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl Usage {
    /// `input_tokens + cache_creation_input_tokens + cache_read_input_tokens`
    ///.
    pub fn total_api_input(&self) -> u64 {
        self.input_tokens + self.cache_creation_input_tokens + self.cache_read_input_tokens
    }
}

// ===================================================================
// File history snapshots
// ===================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileHistorySnapshotEntry {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub tracked_file_backups: Option<HashMap<String, serde_json::Value>>,
}

// ===================================================================
// Queue operations
// ===================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueOperationEntry {
    #[serde(default)]
    pub operation: Option<String>,
}

// ===================================================================
// A parsed line: the typed entry plus the original raw value.
// ===================================================================

/// One successfully-parsed JSONL line: its 0-based line index, the typed
/// entry (best-effort — unknown shapes fall into `TranscriptEntry::Other`),
/// and the original raw JSON (needed for byte-accurate rewriting/bucketing
/// and for reading alternate field locations like top-level `content`).
pub struct ParsedLine {
    pub line_index: usize,
    pub entry: TranscriptEntry,
    pub raw: serde_json::Value,
}

/// A line that failed to parse as JSON at all.
pub struct LineError {
    pub line_index: usize,
    pub message: String,
}

/// Read every message-bearing content block for a line, whether it's
/// nested under `message.content` or found at the alternate top-level
/// `content`.
pub fn content_blocks(entry: &TranscriptEntry, raw: &serde_json::Value) -> Vec<ContentBlock> {
    match entry {
        TranscriptEntry::User(c) | TranscriptEntry::Assistant(c) => match c.message.as_ref().and_then(|m| m.content.as_ref()) {
            Some(MessageContent::Blocks(b)) => return b.clone(),
            Some(MessageContent::Text(_)) | None => {}
        },
        _ => {}
    }
    // Alternate format: content blocks at the top level of the line.
    if let Some(arr) = raw.get("content").and_then(|v| v.as_array()) {
        if let Ok(blocks) =
            serde_json::from_value::<Vec<ContentBlock>>(serde_json::Value::Array(arr.clone()))
        {
            return blocks;
        }
    }
    Vec::new()
}

/// The raw JSON array backing a line's content blocks, wherever it lives
/// (`message.content` or the alternate top-level `content`).
/// `None` when content is a plain string or absent.
pub fn raw_content_array(raw: &serde_json::Value) -> Option<&Vec<serde_json::Value>> {
    raw.get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_array())
        .or_else(|| raw.get("content").and_then(|c| c.as_array()))
}

/// Read the `usage` object at `message.usage` or the alternate top-level
/// `usage`.
pub fn entry_usage(entry: &TranscriptEntry, raw: &serde_json::Value) -> Option<Usage> {
    if let TranscriptEntry::Assistant(c) = entry {
        if let Some(u) = c.message.as_ref().and_then(|m| m.usage) {
            return Some(u);
        }
    }
    raw.get("usage")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

/// Parse a JSONL transcript's contents line by line. Malformed lines are
/// collected as `LineError`s rather than aborting the parse.
/// Empty lines are skipped silently.
pub fn parse_lines(contents: &str) -> (Vec<ParsedLine>, Vec<LineError>) {
    let mut lines = Vec::new();
    let mut errors = Vec::new();
    for (i, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(raw) => {
                let entry = classify_entry(&raw);
                lines.push(ParsedLine {
                    line_index: i,
                    entry,
                    raw,
                });
            }
            Err(e) => errors.push(LineError {
                line_index: i,
                message: e.to_string(),
            }),
        }
    }
    (lines, errors)
}

/// Find the 0-based line index of the *last* compaction marker in a
/// transcript, if any.
pub fn last_compaction_line(lines: &[ParsedLine]) -> Option<usize> {
    lines
        .iter()
        .rev()
        .find(|l| l.entry.is_compaction_marker(&l.raw))
        .map(|l| l.line_index)
}

/// Whether a conversation entry counts toward `user_messages` /
/// `assistant_responses`.
pub fn is_user_entry(entry: &TranscriptEntry) -> bool {
    matches!(entry, TranscriptEntry::User(_))
}

pub fn is_assistant_entry(entry: &TranscriptEntry) -> bool {
    matches!(entry, TranscriptEntry::Assistant(_))
}
