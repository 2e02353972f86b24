//! The two-pass streaming trimmer.

use crate::classify::{self, BlockClass};
use crate::error::{EngineError, Result};
use crate::transcript::{self, TranscriptEntry};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

pub const DEFAULT_STUB_THRESHOLD: usize = 500;
pub const MIN_STUB_THRESHOLD: usize = 50;

const WRITE_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit", "NotebookEdit"];
const WRITE_TOOL_FIELDS: &[&str] = &["content", "old_string", "new_string", "new_source"];
const PRESERVED_FIELDS: &[&str] = &[
    "file_path",
    "notebook_path",
    "command",
    "description",
    "pattern",
    "path",
    "url",
    "skill",
    "args",
    "replace_all",
    "edit_mode",
    "cell_type",
    "cell_id",
];

/// Options carried through `trim`.
#[derive(Debug, Clone, Copy)]
pub struct TrimOptions {
    pub stub_threshold: usize,
}

impl Default for TrimOptions {
    fn default() -> Self {
        Self {
            stub_threshold: DEFAULT_STUB_THRESHOLD,
        }
    }
}

impl TrimOptions {
    fn threshold(&self) -> usize {
        self.stub_threshold.max(MIN_STUB_THRESHOLD)
    }
}

/// Byte-accurate counters produced by a trim run.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrimMetrics {
    pub original_bytes: u64,
    pub trimmed_bytes: u64,
    pub tool_results_stubbed: u64,
    pub signatures_stripped: u64,
    pub file_history_removed: u64,
    pub images_stripped: u64,
    pub tool_use_inputs_stubbed: u64,
    pub pre_compaction_lines_skipped: u64,
    pub queue_operations_removed: u64,
    pub user_messages: u64,
    pub assistant_responses: u64,
    pub tool_use_requests: u64,
}

fn stub_message(kind: &str, n: usize) -> String {
    format!("[Trimmed {kind}: ~{n} chars]")
}

/// Rewrite one `tool_result` block in place, applying rules 4 (image
/// stripping) and 5 (stubbing). Returns whether an image was stripped and
/// whether the block was stubbed.
fn rewrite_tool_result(block: &mut Value, threshold: usize, metrics: &mut TrimMetrics) {
    let Some(content) = block.get_mut("content") else {
        return;
    };
    // Measure before stripping: a stripped image's former bytes still count
    // toward the stub-threshold decision (§4.1 rule 4).
    let size = classify::tool_result_content_size(content);
    let mut image_stripped = false;
    if let Value::Array(items) = content {
        let before = items.len();
        items.retain(|item| classify::classify_block(item) != BlockClass::Image);
        if items.len() != before {
            image_stripped = true;
        }
    }
    if image_stripped {
        metrics.images_stripped += 1;
    }
    if size > threshold {
        *content = Value::Array(vec![serde_json::json!({
            "type": "text",
            "text": stub_message("tool result", size),
        })]);
        metrics.tool_results_stubbed += 1;
    }
}

/// Rewrite one `tool_use` block's `input` in place, applying rule 6.
fn rewrite_tool_input(block: &mut Value, threshold: usize, metrics: &mut TrimMetrics) {
    let name = block.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let Some(Value::Object(input)) = block.get_mut("input") else {
        return;
    };

    if WRITE_TOOLS.contains(&name.as_str()) {
        let mut stubbed_any = false;
        for field in WRITE_TOOL_FIELDS {
            if let Some(Value::String(s)) = input.get(*field) {
                if s.len() > threshold {
                    let n = s.len();
                    input.insert((*field).to_string(), Value::String(stub_message("input", n)));
                    stubbed_any = true;
                }
            }
        }
        if stubbed_any {
            metrics.tool_use_inputs_stubbed += 1;
        }
        return;
    }

    let serialized_len = serde_json::to_string(&Value::Object(input.clone()))
        .map(|s| s.len())
        .unwrap_or(0);
    if serialized_len <= threshold {
        return;
    }
    let mut stubbed_any = false;
    let keys: Vec<String> = input.keys().cloned().collect();
    for key in keys {
        if PRESERVED_FIELDS.contains(&key.as_str()) {
            continue;
        }
        if let Some(Value::String(s)) = input.get(&key) {
            if s.len() > threshold {
                let n = s.len();
                input.insert(key, Value::String(stub_message("input", n)));
                stubbed_any = true;
            }
        }
    }
    if stubbed_any {
        metrics.tool_use_inputs_stubbed += 1;
    }
}

/// Apply the removal taxonomy to one content-block array in place,
/// dropping thinking blocks and orphaned tool results, stubbing the rest.
fn rewrite_blocks(
    blocks: &mut Vec<Value>,
    threshold: usize,
    skipped_tool_use_ids: &HashSet<String>,
    metrics: &mut TrimMetrics,
) {
    blocks.retain_mut(|block| match classify::classify_block(block) {
        BlockClass::ThinkingSignature => {
            metrics.signatures_stripped += 1;
            false
        }
        BlockClass::ToolResult => {
            let orphaned = block
                .get("tool_use_id")
                .and_then(|v| v.as_str())
                .map(|id| skipped_tool_use_ids.contains(id))
                .unwrap_or(false);
            if orphaned {
                return false;
            }
            rewrite_tool_result(block, threshold, metrics);
            true
        }
        BlockClass::ToolUse => {
            rewrite_tool_input(block, threshold, metrics);
            metrics.tool_use_requests += 1;
            true
        }
        _ => true,
    });
}

fn rewrite_line(mut raw: Value, threshold: usize, skipped_tool_use_ids: &HashSet<String>, metrics: &mut TrimMetrics) -> Value {
    // Rule 8: usage is stale the moment token-affecting content changes.
    if let Some(message) = raw.get_mut("message") {
        if let Some(obj) = message.as_object_mut() {
            obj.remove("usage");
        }
    }
    if let Some(obj) = raw.as_object_mut() {
        obj.remove("usage");
    }

    let content_path: Option<&str> = if raw
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_array())
        .is_some()
    {
        Some("message")
    } else if raw.get("content").and_then(|c| c.as_array()).is_some() {
        Some("")
    } else {
        None
    };

    match content_path {
        Some("message") => {
            if let Some(Value::Array(blocks)) = raw
                .get_mut("message")
                .and_then(|m| m.get_mut("content"))
            {
                rewrite_blocks(blocks, threshold, skipped_tool_use_ids, metrics);
            }
        }
        Some(_) => {
            if let Some(Value::Array(blocks)) = raw.get_mut("content") {
                rewrite_blocks(blocks, threshold, skipped_tool_use_ids, metrics);
            }
        }
        None => {}
    }
    raw
}

fn count_preservation(entry: &TranscriptEntry, metrics: &mut TrimMetrics) {
    match entry {
        TranscriptEntry::User(_) => metrics.user_messages += 1,
        TranscriptEntry::Assistant(_) => metrics.assistant_responses += 1,
        _ => {}
    }
}

/// Stream `source_path` through the removal taxonomy of spec.md §4.1,
/// writing `destination_path` atomically and returning byte-accurate
/// metrics.
pub fn trim(source_path: &Path, destination_path: &Path, opts: TrimOptions) -> Result<TrimMetrics> {
    let threshold = opts.threshold();
    let original_bytes = fs::metadata(source_path)
        .map_err(|e| EngineError::io(source_path, e))?
        .len();

    // Pass 1a: stream once to find the last compaction marker's line index.
    let mut last_compaction_line: Option<usize> = None;
    {
        let file = fs::File::open(source_path).map_err(|e| EngineError::io(source_path, e))?;
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| EngineError::io(source_path, e))?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(raw) = serde_json::from_str::<Value>(trimmed) else {
                continue;
            };
            let entry = transcript::classify_entry(&raw);
            if entry.is_compaction_marker(&raw) {
                last_compaction_line = Some(i);
            }
        }
    }

    // Pass 1b: stream again, stopping at the boundary, collecting the
    // tool_use ids that pass 2 will strip — any tool_result elsewhere that
    // references one of these ids is about to become orphaned.
    let mut skipped_tool_use_ids: HashSet<String> = HashSet::new();
    if let Some(boundary) = last_compaction_line {
        let file = fs::File::open(source_path).map_err(|e| EngineError::io(source_path, e))?;
        for (i, line) in BufReader::new(file).lines().enumerate() {
            if i >= boundary {
                break;
            }
            let line = line.map_err(|e| EngineError::io(source_path, e))?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(raw) = serde_json::from_str::<Value>(trimmed) else {
                continue;
            };
            if let Some(arr) = transcript::raw_content_array(&raw) {
                for block in arr {
                    if classify::classify_block(block) == BlockClass::ToolUse {
                        if let Some(id) = block.get("id").and_then(|v| v.as_str()) {
                            skipped_tool_use_ids.insert(id.to_string());
                        }
                    }
                }
            }
        }
    }

    // Pass 2: rewrite.
    let mut metrics = TrimMetrics {
        original_bytes,
        ..Default::default()
    };

    let tmp_path = destination_path.with_extension(format!(
        "tmp-{}",
        uuid::Uuid::new_v4().simple()
    ));
    let result = (|| -> Result<()> {
        let mut out = fs::File::create(&tmp_path).map_err(|e| EngineError::io(&tmp_path, e))?;
        let src = fs::File::open(source_path).map_err(|e| EngineError::io(source_path, e))?;
        for (i, line) in BufReader::new(src).lines().enumerate() {
            let line = line.map_err(|e| EngineError::io(source_path, e))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(boundary) = last_compaction_line {
                if i < boundary {
                    metrics.pre_compaction_lines_skipped += 1;
                    continue;
                }
            }
            let Ok(raw) = serde_json::from_str::<Value>(line) else {
                writeln!(out, "{line}").map_err(|e| EngineError::io(&tmp_path, e))?;
                continue;
            };
            let entry = transcript::classify_entry(&raw);
            match &entry {
                TranscriptEntry::FileHistorySnapshot(_) => {
                    metrics.file_history_removed += 1;
                    continue;
                }
                TranscriptEntry::QueueOperation(_) => {
                    metrics.queue_operations_removed += 1;
                    continue;
                }
                _ => {}
            }
            count_preservation(&entry, &mut metrics);
            let rewritten = rewrite_line(raw, threshold, &skipped_tool_use_ids, &mut metrics);
            let serialized = serde_json::to_string(&rewritten)?;
            writeln!(out, "{serialized}").map_err(|e| EngineError::io(&tmp_path, e))?;
        }
        out.flush().map_err(|e| EngineError::io(&tmp_path, e))?;
        Ok(())
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    match fs::rename(&tmp_path, destination_path) {
        Ok(()) => {}
        Err(_) => {
            let _ = fs::remove_file(destination_path);
            fs::rename(&tmp_path, destination_path).map_err(|e| EngineError::io(destination_path, e))?;
        }
    }

    metrics.trimmed_bytes = fs::metadata(destination_path)
        .map_err(|e| EngineError::io(destination_path, e))?
        .len();
    Ok(metrics)
}

#[cfg(test)]
mod tests;
