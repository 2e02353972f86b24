use super::*;
use std::io::Write as _;

fn write_jsonl(lines: &[&str]) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(f, "{line}").unwrap();
    }
    f.flush().unwrap();
    f
}

#[test]
fn removes_file_history_snapshot() {
    let src = write_jsonl(&[
        r#"{"type":"file-history-snapshot","data":{}}"#,
        r#"{"type":"user","message":{"content":"hi"}}"#,
    ]);
    let dst = tempfile::NamedTempFile::new().unwrap();
    let metrics = trim(src.path(), dst.path(), TrimOptions::default()).unwrap();
    assert_eq!(metrics.file_history_removed, 1);
    assert_eq!(metrics.user_messages, 1);
    let out = std::fs::read_to_string(dst.path()).unwrap();
    assert_eq!(out.lines().count(), 1);
    assert!(out.contains("\"user\""));
}

#[test]
fn stubs_oversized_tool_result() {
    let text = "X".repeat(800);
    let line = serde_json::json!({
        "type": "assistant",
        "message": {"content": [{"type": "tool_result", "tool_use_id": "t1", "content": [{"type": "text", "text": text}]}]}
    });
    let src = write_jsonl(&[&line.to_string()]);
    let dst = tempfile::NamedTempFile::new().unwrap();
    let metrics = trim(src.path(), dst.path(), TrimOptions::default()).unwrap();
    assert_eq!(metrics.tool_results_stubbed, 1);
    assert!(metrics.trimmed_bytes < metrics.original_bytes);
    let out = std::fs::read_to_string(dst.path()).unwrap();
    assert!(out.contains("Trimmed tool result"));
}

#[test]
fn image_strip_pushes_tool_result_over_threshold() {
    let image_data = "z".repeat(600);
    let line = serde_json::json!({
        "type": "assistant",
        "message": {"content": [{
            "type": "tool_result",
            "tool_use_id": "t1",
            "content": [
                {"type": "text", "text": "small"},
                {"type": "image", "source": {"data": image_data}}
            ]
        }]}
    });
    let src = write_jsonl(&[&line.to_string()]);
    let dst = tempfile::NamedTempFile::new().unwrap();
    let metrics = trim(src.path(), dst.path(), TrimOptions::default()).unwrap();
    assert_eq!(metrics.images_stripped, 1);
    assert_eq!(metrics.tool_results_stubbed, 1);
}

#[test]
fn removes_thinking_block_keeps_text() {
    let line = serde_json::json!({
        "type": "assistant",
        "message": {"content": [
            {"type": "text", "text": "hello"},
            {"type": "thinking", "thinking": "deep thought", "signature": "abc"}
        ]}
    });
    let src = write_jsonl(&[&line.to_string()]);
    let dst = tempfile::NamedTempFile::new().unwrap();
    let metrics = trim(src.path(), dst.path(), TrimOptions::default()).unwrap();
    assert_eq!(metrics.signatures_stripped, 1);
    let out = std::fs::read_to_string(dst.path()).unwrap();
    assert!(out.contains("hello"));
    assert!(!out.contains("deep thought"));
}

#[test]
fn skips_everything_before_last_compaction_marker() {
    let src = write_jsonl(&[
        r#"{"type":"user","message":{"content":"l1"}}"#,
        r#"{"type":"summary","summary":"earlier work"}"#,
        r#"{"type":"user","message":{"content":"l3"}}"#,
        r#"{"type":"system","subtype":"compact_boundary"}"#,
        r#"{"type":"user","message":{"content":"l5"}}"#,
    ]);
    let dst = tempfile::NamedTempFile::new().unwrap();
    let metrics = trim(src.path(), dst.path(), TrimOptions::default()).unwrap();
    assert_eq!(metrics.pre_compaction_lines_skipped, 3);
    let out = std::fs::read_to_string(dst.path()).unwrap();
    assert_eq!(out.lines().count(), 2);
    assert!(out.contains("compact_boundary"));
    assert!(out.contains("l5"));
}

#[test]
fn malformed_line_passes_through() {
    let src = write_jsonl(&["not json at all", r#"{"type":"user","message":{"content":"hi"}}"#]);
    let dst = tempfile::NamedTempFile::new().unwrap();
    let metrics = trim(src.path(), dst.path(), TrimOptions::default()).unwrap();
    assert_eq!(metrics.user_messages, 1);
    let out = std::fs::read_to_string(dst.path()).unwrap();
    assert!(out.contains("not json at all"));
}

#[test]
fn threshold_is_floored_at_minimum() {
    assert_eq!(TrimOptions { stub_threshold: 1 }.threshold(), MIN_STUB_THRESHOLD);
}

#[test]
fn write_tool_stubs_old_and_new_string_but_preserves_file_path() {
    let old = "a".repeat(800);
    let new = "b".repeat(800);
    let line = serde_json::json!({
        "type": "assistant",
        "message": {"content": [{
            "type": "tool_use",
            "id": "toolu_1",
            "name": "Edit",
            "input": {
                "file_path": "/tmp/f.txt",
                "old_string": old,
                "new_string": new,
            }
        }]}
    });
    let src = write_jsonl(&[&line.to_string()]);
    let dst = tempfile::NamedTempFile::new().unwrap();
    let metrics = trim(src.path(), dst.path(), TrimOptions::default()).unwrap();
    assert_eq!(metrics.tool_use_inputs_stubbed, 1);
    let out = std::fs::read_to_string(dst.path()).unwrap();
    assert!(out.contains("/tmp/f.txt"));
    assert!(out.contains("Trimmed input"));
    assert!(!out.contains(&"a".repeat(800)));
}

#[test]
fn non_write_tool_stubs_long_fields_but_preserves_named_fields() {
    let long = "q".repeat(800);
    let line = serde_json::json!({
        "type": "assistant",
        "message": {"content": [{
            "type": "tool_use",
            "id": "toolu_2",
            "name": "Bash",
            "input": {
                "command": long.clone(),
                "description": "run a thing",
                "some_other_blob": long,
            }
        }]}
    });
    let src = write_jsonl(&[&line.to_string()]);
    let dst = tempfile::NamedTempFile::new().unwrap();
    let metrics = trim(src.path(), dst.path(), TrimOptions::default()).unwrap();
    assert_eq!(metrics.tool_use_inputs_stubbed, 1);
    let out: serde_json::Value =
        serde_json::from_str(std::fs::read_to_string(dst.path()).unwrap().trim()).unwrap();
    let input = &out["message"]["content"][0]["input"];
    // "command" is a preserved field even though it's over threshold.
    assert_eq!(input["command"].as_str().unwrap().len(), 800);
    assert_eq!(input["description"], "run a thing");
    // Everything else over threshold gets stubbed.
    assert!(input["some_other_blob"].as_str().unwrap().starts_with("[Trimmed input"));
}

#[test]
fn orphaned_tool_result_is_stripped_after_precompaction_skip() {
    // toolu_1's tool_use lives before the compaction boundary and is
    // skipped outright; the tool_result referencing it survives in a
    // later line and must be dropped rather than left dangling.
    let src = write_jsonl(&[
        r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"toolu_1","name":"Read","input":{"file_path":"/a"}}]}}"#,
        r#"{"type":"system","subtype":"compact_boundary"}"#,
        r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"toolu_1","content":"stale result"}]}}"#,
    ]);
    let dst = tempfile::NamedTempFile::new().unwrap();
    trim(src.path(), dst.path(), TrimOptions::default()).unwrap();
    let out = std::fs::read_to_string(dst.path()).unwrap();
    assert!(!out.contains("stale result"));
    assert!(!out.contains("tool_use_id"));
}

#[test]
fn trim_is_idempotent() {
    let text = "X".repeat(800);
    let src = write_jsonl(&[
        r#"{"type":"file-history-snapshot","data":{}}"#,
        &serde_json::json!({
            "type": "assistant",
            "message": {"content": [
                {"type": "thinking", "thinking": "hmm", "signature": "sig"},
                {"type": "tool_result", "tool_use_id": "t1", "content": [{"type": "text", "text": text}]}
            ]}
        }).to_string(),
        r#"{"type":"user","message":{"content":"hi"}}"#,
    ]);
    let once = tempfile::NamedTempFile::new().unwrap();
    trim(src.path(), once.path(), TrimOptions::default()).unwrap();

    let twice = tempfile::NamedTempFile::new().unwrap();
    let second_metrics = trim(once.path(), twice.path(), TrimOptions::default()).unwrap();

    assert_eq!(second_metrics.trimmed_bytes, std::fs::metadata(once.path()).unwrap().len());
    assert_eq!(second_metrics.file_history_removed, 0);
    assert_eq!(second_metrics.signatures_stripped, 0);
    assert_eq!(second_metrics.tool_results_stubbed, 0);
    assert_eq!(second_metrics.images_stripped, 0);
    assert_eq!(second_metrics.tool_use_inputs_stubbed, 0);
    assert_eq!(second_metrics.queue_operations_removed, 0);
}

#[test]
fn lower_threshold_trims_at_least_as_aggressively() {
    let text = "X".repeat(200);
    let line = serde_json::json!({
        "type": "assistant",
        "message": {"content": [{"type": "tool_result", "tool_use_id": "t1", "content": [{"type": "text", "text": text}]}]}
    });
    let src = write_jsonl(&[&line.to_string()]);
    let original_bytes = std::fs::metadata(src.path()).unwrap().len();

    let low = tempfile::NamedTempFile::new().unwrap();
    let low_metrics = trim(
        src.path(),
        low.path(),
        TrimOptions { stub_threshold: 50 },
    )
    .unwrap();

    let high = tempfile::NamedTempFile::new().unwrap();
    let high_metrics = trim(
        src.path(),
        high.path(),
        TrimOptions { stub_threshold: 500 },
    )
    .unwrap();

    assert!(low_metrics.trimmed_bytes <= high_metrics.trimmed_bytes);
    assert!(high_metrics.trimmed_bytes <= original_bytes);
}
