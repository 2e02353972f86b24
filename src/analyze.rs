//! Single-pass breakdown analyzer.

use crate::classify::{self, BlockClass};
use crate::error::{EngineError, Result};
use crate::transcript::{self, TranscriptEntry, Usage};
use serde_json::Value;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

pub const CONTEXT_LIMIT: u64 = 200_000;
pub const SYSTEM_OVERHEAD: u64 = 20_000;

#[derive(Debug, Clone, Copy, Default)]
pub struct BucketStats {
    pub bytes: u64,
    pub count: u64,
}

impl BucketStats {
    fn percent_of(&self, total: u64) -> u32 {
        if total == 0 {
            0
        } else {
            ((self.bytes as f64 / total as f64) * 100.0).round() as u32
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Breakdown {
    pub tool_results: BucketStats,
    pub thinking_signatures: BucketStats,
    pub file_history: BucketStats,
    pub conversation: BucketStats,
    pub tool_use_requests: BucketStats,
    pub other: BucketStats,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCounts {
    pub user: u64,
    pub assistant: u64,
    pub tool_results: u64,
}

/// `analyze`'s output.
#[derive(Debug, Clone, Default)]
pub struct SessionAnalysis {
    pub total_bytes: u64,
    pub estimated_tokens: u64,
    pub context_limit: u64,
    pub context_used_percent: u32,
    pub breakdown: Breakdown,
    pub message_count: MessageCounts,
}

/// Running state for the token-estimation algorithm.
struct TokenTracker {
    last_api_input_tokens: u64,
    have_api_reading: bool,
    content_chars: u64,
    content_chars_at_last_update: u64,
}

impl TokenTracker {
    fn new() -> Self {
        Self {
            last_api_input_tokens: 0,
            have_api_reading: false,
            content_chars: 0,
            content_chars_at_last_update: 0,
        }
    }

    fn observe_usage(&mut self, usage: &Usage) {
        let total = usage.total_api_input();
        if total != 0 && total != self.last_api_input_tokens {
            self.last_api_input_tokens = total;
            self.have_api_reading = true;
            self.content_chars_at_last_update = self.content_chars;
        }
    }

    fn add_chars(&mut self, n: u64) {
        self.content_chars += n;
    }

    fn reset_for_compaction(&mut self, summary_len: u64) {
        self.content_chars = summary_len;
        self.content_chars_at_last_update = summary_len;
    }

    fn estimate(&self) -> u64 {
        if self.have_api_reading {
            let delta = self.content_chars.saturating_sub(self.content_chars_at_last_update);
            self.last_api_input_tokens + delta / 4
        } else {
            self.content_chars / 4 + SYSTEM_OVERHEAD
        }
    }
}

/// The plain-string form of a line's content (`message.content` or
/// top-level `content`), when content isn't a block array.
fn plain_text_content(raw: &Value) -> Option<&str> {
    raw.get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .or_else(|| raw.get("content").and_then(|c| c.as_str()))
}

/// Read `jsonl_path` once, bucketing bytes into the six categories of
/// spec.md §4.3 and estimating tokens, respecting compaction boundaries
///.
pub fn analyze(jsonl_path: &Path) -> Result<SessionAnalysis> {
    let file = fs::File::open(jsonl_path).map_err(|e| EngineError::io(jsonl_path, e))?;

    let mut breakdown = Breakdown::default();
    let mut message_count = MessageCounts::default();
    let mut total_bytes: u64 = 0;
    let mut tracker = TokenTracker::new();

    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| EngineError::io(jsonl_path, e))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let line_bytes = trimmed.len() as u64;

        let Ok(raw) = serde_json::from_str::<Value>(trimmed) else {
            breakdown.other.bytes += line_bytes;
            breakdown.other.count += 1;
            total_bytes += line_bytes;
            continue;
        };
        let entry = transcript::classify_entry(&raw);

        if entry.is_compaction_marker(&raw) {
            breakdown = Breakdown::default();
            message_count = MessageCounts::default();
            total_bytes = 0;
            let summary_len = raw
                .get("summary")
                .and_then(|v| v.as_str())
                .map(|s| s.len() as u64)
                .unwrap_or(0);
            tracker.reset_for_compaction(summary_len);
            // The marker line itself is still part of the active window.
            breakdown.other.bytes += line_bytes;
            breakdown.other.count += 1;
            total_bytes += line_bytes;
            tracker.add_chars(summary_len);
            continue;
        }

        total_bytes += line_bytes;

        if let Some(usage) = transcript::entry_usage(&entry, &raw) {
            tracker.observe_usage(&usage);
        }

        match &entry {
            TranscriptEntry::FileHistorySnapshot(_) => {
                breakdown.file_history.bytes += line_bytes;
                breakdown.file_history.count += 1;
                continue;
            }
            TranscriptEntry::User(_) => message_count.user += 1,
            TranscriptEntry::Assistant(_) => message_count.assistant += 1,
            _ => {}
        }

        let is_conversation_role = transcript::is_user_entry(&entry) || transcript::is_assistant_entry(&entry);
        let blocks = transcript::raw_content_array(&raw);

        if let Some(blocks) = blocks {
            let mut accounted: u64 = 0;
            for block in blocks {
                let block_bytes = classify::block_bytes(block) as u64;
                match classify::classify_block(block) {
                    BlockClass::ToolResult => {
                        breakdown.tool_results.bytes += block_bytes;
                        breakdown.tool_results.count += 1;
                        message_count.tool_results += 1;
                        accounted += block_bytes;
                    }
                    BlockClass::ThinkingSignature => {
                        breakdown.thinking_signatures.bytes += block_bytes;
                        breakdown.thinking_signatures.count += 1;
                        accounted += block_bytes;
                    }
                    BlockClass::ToolUse => {
                        breakdown.tool_use_requests.bytes += block_bytes;
                        breakdown.tool_use_requests.count += 1;
                        accounted += block_bytes;
                    }
                    _ => {}
                }
                tracker.add_chars(classify::block_chars(block) as u64);
            }
            let remainder = line_bytes.saturating_sub(accounted);
            if is_conversation_role {
                breakdown.conversation.bytes += remainder;
            } else {
                breakdown.other.bytes += remainder;
            }
        } else if is_conversation_role {
            breakdown.conversation.bytes += line_bytes;
            tracker.add_chars(plain_text_content(&raw).map(|s| s.len() as u64).unwrap_or(0));
        } else {
            breakdown.other.bytes += line_bytes;
        }
    }

    let estimated_tokens = tracker.estimate();
    let context_used_percent = if CONTEXT_LIMIT == 0 {
        0
    } else {
        ((estimated_tokens as f64 / CONTEXT_LIMIT as f64) * 100.0).round() as u32
    };

    Ok(SessionAnalysis {
        total_bytes,
        estimated_tokens,
        context_limit: CONTEXT_LIMIT,
        context_used_percent,
        breakdown,
        message_count,
    })
}

impl Breakdown {
    pub fn tool_results_percent(&self, total: u64) -> u32 {
        self.tool_results.percent_of(total)
    }
    pub fn thinking_signatures_percent(&self, total: u64) -> u32 {
        self.thinking_signatures.percent_of(total)
    }
    pub fn file_history_percent(&self, total: u64) -> u32 {
        self.file_history.percent_of(total)
    }
    pub fn conversation_percent(&self, total: u64) -> u32 {
        self.conversation.percent_of(total)
    }
    pub fn tool_use_requests_percent(&self, total: u64) -> u32 {
        self.tool_use_requests.percent_of(total)
    }
    pub fn other_percent(&self, total: u64) -> u32 {
        self.other.percent_of(total)
    }
}

#[cfg(test)]
mod tests;
